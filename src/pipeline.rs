//! The weekly emissions pipeline.
//!
//! Each `(week, city)` pair runs through the same stages, in order:
//! load → tessellate → spatial filter → temporal/kinematic filter → load
//! network → map match → resolve fuel types → compute and aggregate
//! emissions → write. Nothing is shared between iterations.

use anyhow::{Context, Result, bail};
use std::fmt;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::emissions::{
    EmissionFunctionTable, aggregate_emissions, compute_emissions, load_vehicle_registry,
    match_vehicle_to_fuel_type,
};
use crate::network::{RoadMatcher, load_graphml, match_points};
use crate::output::{append_record, write_totals};
use crate::stats::{RunStats, unique_uids};
use crate::tessellation::{BoundaryApi, SquareTessellation, load_or_fetch_boundary, select_within};
use crate::trajectory::{filter_trajectories, load_trajectories};

/// Stage that aborted an iteration, attached to the error as context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    LoadTrajectories,
    Tessellation,
    LoadNetwork,
    ResolveVehicles,
    LoadEmissionFunctions,
    WriteOutput,
}

impl Stage {
    /// Value of the `error_type` column in the run summary.
    pub fn error_type(self) -> &'static str {
        match self {
            Stage::LoadTrajectories => "trajectory_error",
            Stage::Tessellation => "tessellation_error",
            Stage::LoadNetwork => "network_error",
            Stage::ResolveVehicles => "vehicle_registry_error",
            Stage::LoadEmissionFunctions => "emission_functions_error",
            Stage::WriteOutput => "write_error",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self {
            Stage::LoadTrajectories => "loading trajectories",
            Stage::Tessellation => "building tessellation",
            Stage::LoadNetwork => "loading road network",
            Stage::ResolveVehicles => "loading vehicle registry",
            Stage::LoadEmissionFunctions => "loading emission functions",
            Stage::WriteOutput => "writing emission totals",
        };
        f.write_str(what)
    }
}

pub struct Pipeline<B> {
    config: PipelineConfig,
    boundary_api: B,
}

impl<B: BoundaryApi> Pipeline<B> {
    pub fn new(config: PipelineConfig, boundary_api: B) -> Self {
        Self {
            config,
            boundary_api,
        }
    }

    /// Processes every configured `(week, city)` pair in sequence.
    ///
    /// A failed iteration is logged and recorded in the run summary, and the
    /// remaining iterations still run. Returns an error if any failed.
    pub async fn run(&self) -> Result<()> {
        let mut failures = 0usize;
        let total = self.config.weeks.len() * self.config.cities.len();

        for &week in &self.config.weeks {
            for city in &self.config.cities {
                match self.run_week_city(week, city).await {
                    Ok(stats) => self.record_summary(&stats),
                    Err(e) => {
                        failures += 1;
                        let error_type = e
                            .downcast_ref::<Stage>()
                            .map_or("pipeline_error", |stage| stage.error_type());
                        error!(week, city = %city, error_type, error = %format!("{e:#}"), "Iteration failed");

                        let stats = RunStats::from_error(error_type, &format!("{e:#}"))
                            .with_run_info(week, city);
                        self.record_summary(&stats);
                    }
                }
            }
        }

        if failures > 0 {
            bail!("{failures} of {total} iterations failed");
        }
        info!(iterations = total, "All iterations finished");
        Ok(())
    }

    /// Runs all stages for one week of one city and writes its totals.
    #[tracing::instrument(skip(self))]
    pub async fn run_week_city(&self, week: u32, city: &str) -> Result<RunStats> {
        let config = &self.config;
        let mut stats = RunStats::new(week, city);

        let points =
            load_trajectories(config.trajectories_file(week)).context(Stage::LoadTrajectories)?;
        stats.rows_loaded = points.len();
        stats.uids_loaded = unique_uids(points.iter().map(|p| p.uid.as_str()));
        info!(
            area = %config.area,
            uids = stats.uids_loaded,
            rows = stats.rows_loaded,
            "Trajectories loaded"
        );

        let region = config.region(city);
        let boundary_cache = config.boundary_file(city);
        let tessellation = async {
            let boundary =
                load_or_fetch_boundary(&self.boundary_api, &region, boundary_cache.as_deref())
                    .await?;
            SquareTessellation::build(&boundary, config.cell_size)
        }
        .await
        .context(Stage::Tessellation)?;
        stats.tessellation_cells = tessellation.len();

        let points = select_within(points, &tessellation);
        stats.rows_in_tessellation = points.len();
        info!(
            cells = stats.tessellation_cells,
            uids = unique_uids(points.iter().map(|p| p.uid.as_str())),
            rows = stats.rows_in_tessellation,
            "Trajectories within tessellation selected"
        );

        let points = filter_trajectories(points, config.max_interval_secs);
        stats.record_filtered(&points);
        info!(
            uids = stats.uids_after_filter,
            trajectories = stats.trajectories,
            rows = stats.rows_after_filter,
            "Filtered on time interval, speed and acceleration"
        );

        let network = load_graphml(config.network_file(city))
            .context(Stage::LoadNetwork)?
            .to_undirected();
        let matcher = RoadMatcher::new(&network);
        let matched = match_points(&matcher, points);
        stats.matched_rows = matched.len();
        info!(
            edges = network.edges.len(),
            rows = stats.matched_rows,
            "Points matched to road network"
        );

        let registry =
            load_vehicle_registry(&config.vehicle_registry_path).context(Stage::ResolveVehicles)?;
        let functions = EmissionFunctionTable::load(&config.emission_functions_path)
            .context(Stage::LoadEmissionFunctions)?;
        let fuel_types = match_vehicle_to_fuel_type(
            matched.iter().map(|m| m.point.uid.as_str()),
            &registry,
            &config.fuel_types,
        );
        stats.vehicles_with_fuel_type = fuel_types.len();

        let per_point = compute_emissions(&matched, &functions, &fuel_types);
        stats.emission_rows = per_point.len();
        let totals = aggregate_emissions(per_point);
        stats.record_output(&totals);

        if totals.is_empty() {
            warn!("No emissions left after matching vehicles to fuel types");
        }

        write_totals(config.output_file(city, week), &totals).context(Stage::WriteOutput)?;
        info!(
            rows = stats.output_rows,
            uids = stats.output_uids,
            road_links = stats.unique_road_links,
            "Weekly totals complete"
        );

        Ok(stats)
    }

    fn record_summary(&self, stats: &RunStats) {
        let Some(path) = &self.config.summary_path else {
            return;
        };
        if let Err(e) = append_record(path, stats) {
            warn!(path = %path.display(), error = %e, "Failed to append run summary");
        }
    }
}
