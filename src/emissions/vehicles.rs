//! Vehicle registry and fuel-type resolution.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FuelType {
    #[serde(alias = "petrol", alias = "GASOLINE")]
    Petrol,
    #[serde(alias = "diesel")]
    Diesel,
    #[serde(alias = "lpg")]
    Lpg,
}

impl FromStr for FuelType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PETROL" | "GASOLINE" => Ok(FuelType::Petrol),
            "DIESEL" => Ok(FuelType::Diesel),
            "LPG" => Ok(FuelType::Lpg),
            other => bail!("unknown fuel type {other:?}"),
        }
    }
}

impl fmt::Display for FuelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FuelType::Petrol => "PETROL",
            FuelType::Diesel => "DIESEL",
            FuelType::Lpg => "LPG",
        };
        f.write_str(name)
    }
}

/// One row of the vehicle registry: `(vid, manufacturer, type)`.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleRecord {
    pub vid: String,
    pub manufacturer: String,
    pub vehicle_type: String,
}

/// Reads the registry from a header-less CSV, a `.tar.xz` or a `.tar.gz`.
///
/// Every CSV member of an archive is read. Columns past the third are
/// ignored.
pub fn load_vehicle_registry(path: impl AsRef<Path>) -> Result<Vec<VehicleRecord>> {
    let path = path.as_ref();
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let file =
        File::open(path).with_context(|| format!("failed to open registry {}", path.display()))?;

    let records = if name.ends_with(".tar.xz") || name.ends_with(".txz") {
        read_tar(xz2::read::XzDecoder::new(file))
    } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        read_tar(flate2::read::GzDecoder::new(file))
    } else {
        parse_registry(file)
    }
    .with_context(|| format!("in {}", path.display()))?;

    debug!(path = %path.display(), vehicles = records.len(), "Vehicle registry loaded");
    Ok(records)
}

fn read_tar<R: Read>(reader: R) -> Result<Vec<VehicleRecord>> {
    let mut archive = tar::Archive::new(reader);
    let mut records = Vec::new();
    let mut members = 0usize;

    for entry in archive.entries()? {
        let entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let entry_path = entry.path()?.to_path_buf();
        let is_hidden = entry_path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'));
        if is_hidden {
            continue;
        }

        members += 1;
        records.extend(
            parse_registry(entry)
                .with_context(|| format!("archive member {}", entry_path.display()))?,
        );
    }

    if members == 0 {
        bail!("archive contains no registry file");
    }
    Ok(records)
}

/// Parses header-less `vid,manufacturer,type` rows.
pub fn parse_registry<R: Read>(reader: R) -> Result<Vec<VehicleRecord>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut records = Vec::new();
    for result in rdr.records() {
        let row = result?;
        if row.len() < 3 {
            bail!("registry row {:?} has fewer than 3 columns", row.position().map(|p| p.line()));
        }
        records.push(VehicleRecord {
            vid: row[0].trim().to_string(),
            manufacturer: row[1].trim().to_string(),
            vehicle_type: row[2].trim().to_string(),
        });
    }
    Ok(records)
}

/// Maps each trajectory `uid` to its fuel type.
///
/// The registry `vid` is matched against `uid`; the first entry per vid
/// wins. Vehicles whose type is unknown or not in `allowed` are left out.
pub fn match_vehicle_to_fuel_type<'a>(
    uids: impl IntoIterator<Item = &'a str>,
    registry: &[VehicleRecord],
    allowed: &[FuelType],
) -> HashMap<String, FuelType> {
    let mut by_vid: HashMap<&str, &VehicleRecord> = HashMap::new();
    for record in registry {
        by_vid.entry(record.vid.as_str()).or_insert(record);
    }

    let uids: HashSet<&str> = uids.into_iter().collect();
    let mut fuel_types = HashMap::new();
    let mut unregistered = 0usize;
    let mut unresolved = 0usize;

    for uid in uids {
        let Some(record) = by_vid.get(uid) else {
            unregistered += 1;
            continue;
        };
        match record.vehicle_type.parse::<FuelType>() {
            Ok(fuel) if allowed.contains(&fuel) => {
                fuel_types.insert(uid.to_string(), fuel);
            }
            _ => unresolved += 1,
        }
    }

    if unregistered + unresolved > 0 {
        warn!(
            unregistered,
            unresolved,
            matched = fuel_types.len(),
            "Some vehicles have no usable fuel type and are excluded"
        );
    }

    fuel_types
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const REGISTRY: &str = "u1,FIAT,PETROL\nu2,VW,diesel,extra\nu3,TESLA,ELECTRIC\nu1,FIAT,DIESEL\n";

    fn tar_bytes(members: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, content) in members {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(name)
    }

    #[test]
    fn test_fuel_type_parsing() {
        assert_eq!("petrol".parse::<FuelType>().unwrap(), FuelType::Petrol);
        assert_eq!(" GASOLINE ".parse::<FuelType>().unwrap(), FuelType::Petrol);
        assert_eq!("Lpg".parse::<FuelType>().unwrap(), FuelType::Lpg);
        assert!("ELECTRIC".parse::<FuelType>().is_err());
        assert_eq!(FuelType::Diesel.to_string(), "DIESEL");
    }

    #[test]
    fn test_parse_registry_ignores_extra_columns() {
        let records = parse_registry(REGISTRY.as_bytes()).unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[1].vehicle_type, "diesel");
    }

    #[test]
    fn test_parse_registry_short_row_is_error() {
        assert!(parse_registry("u1,FIAT\n".as_bytes()).is_err());
    }

    #[test]
    fn test_match_vehicle_to_fuel_type() {
        let registry = parse_registry(REGISTRY.as_bytes()).unwrap();
        let allowed = [FuelType::Petrol, FuelType::Diesel, FuelType::Lpg];
        let fuels = match_vehicle_to_fuel_type(["u1", "u2", "u3", "u4"], &registry, &allowed);

        assert_eq!(fuels.len(), 2);
        // first registry entry wins
        assert_eq!(fuels["u1"], FuelType::Petrol);
        assert_eq!(fuels["u2"], FuelType::Diesel);
        assert!(!fuels.contains_key("u3"));
        assert!(!fuels.contains_key("u4"));
    }

    #[test]
    fn test_match_respects_allowed_list() {
        let registry = parse_registry(REGISTRY.as_bytes()).unwrap();
        let fuels = match_vehicle_to_fuel_type(["u1", "u2"], &registry, &[FuelType::Diesel]);
        assert_eq!(fuels.keys().collect::<Vec<_>>(), vec!["u2"]);
    }

    #[test]
    fn test_load_tar_xz() {
        let path = temp_path("weekly_emissions_test_registry.tar.xz");
        let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
        encoder
            .write_all(&tar_bytes(&[("modelli_auto.csv", REGISTRY)]))
            .unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        let records = load_vehicle_registry(&path).unwrap();
        assert_eq!(records.len(), 4);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_tar_gz_reads_all_members() {
        let path = temp_path("weekly_emissions_test_registry.tar.gz");
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder
            .write_all(&tar_bytes(&[("a.csv", "u1,FIAT,PETROL\n"), ("b.csv", "u2,VW,LPG\n")]))
            .unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        let records = load_vehicle_registry(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].vid, "u2");

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_plain_csv() {
        let path = temp_path("weekly_emissions_test_registry.csv");
        std::fs::write(&path, REGISTRY).unwrap();

        assert_eq!(load_vehicle_registry(&path).unwrap().len(), 4);

        std::fs::remove_file(&path).unwrap();
    }
}
