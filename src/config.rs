//! Pipeline configuration.
//!
//! Every knob of a run lives in [`PipelineConfig`]. The defaults describe the
//! Pisa deployment; a JSON file only needs the keys it overrides:
//! ```json
//! {
//!   "cities": ["Pisa", "Lucca"],
//!   "weeks": [22, 23],
//!   "cell_size": 1000.0
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::emissions::FuelType;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Prefix of the trajectory files, e.g. `italy_trajectories_week_22.csv`.
    pub area: String,
    /// Appended to each city name when geocoding its boundary.
    pub country: String,
    /// Side of a tessellation cell, in meters.
    pub cell_size: f64,
    /// Largest gap between two points of the same trajectory, in seconds.
    pub max_interval_secs: i64,
    pub weeks: Vec<u32>,
    pub cities: Vec<String>,
    pub trajectories_dir: PathBuf,
    pub road_networks_dir: PathBuf,
    pub output_dir: PathBuf,
    pub vehicle_registry_path: PathBuf,
    pub emission_functions_path: PathBuf,
    pub fuel_types: Vec<FuelType>,
    /// Cache for geocoded region boundaries. `None` always hits the geocoder.
    pub boundaries_dir: Option<PathBuf>,
    pub nominatim_url: String,
    /// CSV that collects one [`crate::stats::RunStats`] row per iteration.
    pub summary_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            area: "italy".to_string(),
            country: "Italy".to_string(),
            cell_size: 1500.0,
            max_interval_secs: 120,
            weeks: vec![22],
            cities: vec!["Pisa".to_string()],
            trajectories_dir: PathBuf::from("./data/trajectories/"),
            road_networks_dir: PathBuf::from("./data/road_networks/"),
            output_dir: PathBuf::from("./data/emissions/"),
            vehicle_registry_path: PathBuf::from("./data/modelli_auto.tar.xz"),
            emission_functions_path: PathBuf::from("./data/emission_functions.csv"),
            fuel_types: vec![FuelType::Petrol, FuelType::Diesel, FuelType::Lpg],
            boundaries_dir: Some(PathBuf::from("./data/boundaries/")),
            nominatim_url: "https://nominatim.openstreetmap.org/search".to_string(),
            summary_path: Some(PathBuf::from("./data/emissions/run_summary.csv")),
        }
    }
}

impl PipelineConfig {
    /// Loads the config from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: PipelineConfig = serde_json::from_str(&content)
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    pub fn trajectories_file(&self, week: u32) -> PathBuf {
        self.trajectories_dir
            .join(format!("{}_trajectories_week_{}.csv", self.area, week))
    }

    pub fn network_file(&self, city: &str) -> PathBuf {
        self.road_networks_dir
            .join(format!("{}_network.graphml", city.to_lowercase()))
    }

    pub fn output_file(&self, city: &str, week: u32) -> PathBuf {
        let city = city.to_lowercase();
        self.output_dir
            .join(&city)
            .join(format!("{}_emissions_week_{}.csv", city, week))
    }

    /// Free-form geocoder query for a city, e.g. `"Pisa, Italy"`.
    pub fn region(&self, city: &str) -> String {
        format!("{}, {}", city, self.country)
    }

    pub fn boundary_file(&self, city: &str) -> Option<PathBuf> {
        self.boundaries_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}_boundary.geojson", city.to_lowercase())))
    }
}
