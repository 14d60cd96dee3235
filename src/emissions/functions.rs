//! Instantaneous emission functions keyed by fuel type and pollutant.
//!
//! Each row of the table gives
//! `E(v, a) = max(e0, f1 + f2·v + f3·v² + f4·a + f5·a² + f6·v·a)`
//! for speed `v` (m/s) and acceleration `a` (m/s²). Some pollutants use
//! different coefficients while decelerating, so a row also carries the
//! acceleration range it applies to:
//!
//! | `acceleration` | applies when |
//! |----------------|--------------|
//! | `any`          | always       |
//! | `a>=-0.5`      | a ≥ -0.5     |
//! | `a<-0.5`       | a < -0.5     |

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Deserializer};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

use crate::emissions::FuelType;

const DECELERATION_THRESHOLD: f64 = -0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum Pollutant {
    #[serde(rename = "CO_2", alias = "CO2")]
    Co2,
    #[serde(rename = "NO_x", alias = "NOx", alias = "NOX")]
    Nox,
    #[serde(rename = "PM")]
    Pm,
    #[serde(rename = "VOC")]
    Voc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelerationCondition {
    Any,
    AtLeastThreshold,
    BelowThreshold,
}

impl AccelerationCondition {
    fn matches(self, acceleration: f64) -> bool {
        match self {
            AccelerationCondition::Any => true,
            AccelerationCondition::AtLeastThreshold => acceleration >= DECELERATION_THRESHOLD,
            AccelerationCondition::BelowThreshold => acceleration < DECELERATION_THRESHOLD,
        }
    }
}

impl<'de> Deserialize<'de> for AccelerationCondition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        match compact.to_ascii_lowercase().as_str() {
            "" | "any" => Ok(AccelerationCondition::Any),
            "a>=-0.5" => Ok(AccelerationCondition::AtLeastThreshold),
            "a<-0.5" => Ok(AccelerationCondition::BelowThreshold),
            _ => Err(serde::de::Error::custom(format!(
                "unknown acceleration condition {raw:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EmissionFunction {
    pub pollutant: Pollutant,
    pub fuel_type: FuelType,
    #[serde(alias = "condition")]
    pub acceleration: AccelerationCondition,
    pub e0: f64,
    pub f1: f64,
    pub f2: f64,
    pub f3: f64,
    pub f4: f64,
    pub f5: f64,
    pub f6: f64,
}

impl EmissionFunction {
    pub fn evaluate(&self, speed: f64, acceleration: f64) -> f64 {
        let (v, a) = (speed, acceleration);
        let value = self.f1
            + self.f2 * v
            + self.f3 * v * v
            + self.f4 * a
            + self.f5 * a * a
            + self.f6 * v * a;
        value.max(self.e0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct EmissionFunctionTable {
    functions: Vec<EmissionFunction>,
}

impl EmissionFunctionTable {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open emission functions {}", path.display()))?;
        let table = Self::parse(file).with_context(|| format!("in {}", path.display()))?;
        debug!(path = %path.display(), functions = table.functions.len(), "Emission functions loaded");
        Ok(table)
    }

    pub fn parse<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let functions = rdr
            .deserialize()
            .collect::<Result<Vec<EmissionFunction>, _>>()?;
        if functions.is_empty() {
            bail!("emission function table is empty");
        }
        Ok(Self { functions })
    }

    /// Emission rate for one fix; 0 when the table has no matching function.
    pub fn evaluate(
        &self,
        fuel_type: FuelType,
        pollutant: Pollutant,
        speed: f64,
        acceleration: f64,
    ) -> f64 {
        self.functions
            .iter()
            .find(|f| {
                f.fuel_type == fuel_type
                    && f.pollutant == pollutant
                    && f.acceleration.matches(acceleration)
            })
            .map_or(0.0, |f| f.evaluate(speed, acceleration))
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
pollutant,fuel_type,acceleration,e0,f1,f2,f3,f4,f5,f6
CO_2,PETROL,any,0,0.553,0.161,-0.00289,0.266,0.511,0.183
NO_x,PETROL,a>=-0.5,0,0.000619,0.00008,-0.00000403,-0.000413,0.00038,0.000177
NO_x,PETROL,a<-0.5,0,0.000217,0,0,0,0,0
PM,DIESEL,any,0,0,0.000313,-0.0000184,0,0.00075,0.000378
VOC,DIESEL, a >= -0.5 ,0,0.0000922,0.00000909,-0.000000229,-0.000000022,0.0000169,0.00000375
";

    #[test]
    fn test_parse_table() {
        let table = EmissionFunctionTable::parse(TABLE.as_bytes()).unwrap();
        assert_eq!(table.len(), 5);
    }

    #[test]
    fn test_evaluate_polynomial() {
        let table = EmissionFunctionTable::parse(TABLE.as_bytes()).unwrap();
        let (v, a) = (10.0, 0.5);
        let expected =
            0.553 + 0.161 * v - 0.00289 * v * v + 0.266 * a + 0.511 * a * a + 0.183 * v * a;

        let got = table.evaluate(FuelType::Petrol, Pollutant::Co2, v, a);
        assert!((got - expected).abs() < 1e-12);
    }

    #[test]
    fn test_deceleration_uses_its_own_row() {
        let table = EmissionFunctionTable::parse(TABLE.as_bytes()).unwrap();

        let braking = table.evaluate(FuelType::Petrol, Pollutant::Nox, 10.0, -2.0);
        assert!((braking - 0.000217).abs() < 1e-12);

        let cruising = table.evaluate(FuelType::Petrol, Pollutant::Nox, 10.0, -0.5);
        assert!(cruising > 0.000217);
    }

    #[test]
    fn test_missing_function_is_zero() {
        let table = EmissionFunctionTable::parse(TABLE.as_bytes()).unwrap();
        assert_eq!(table.evaluate(FuelType::Petrol, Pollutant::Pm, 10.0, 0.0), 0.0);
        assert_eq!(table.evaluate(FuelType::Lpg, Pollutant::Co2, 10.0, 0.0), 0.0);
    }

    #[test]
    fn test_floor_at_e0() {
        let f = EmissionFunction {
            pollutant: Pollutant::Co2,
            fuel_type: FuelType::Diesel,
            acceleration: AccelerationCondition::Any,
            e0: 0.1,
            f1: -5.0,
            f2: 0.0,
            f3: 0.0,
            f4: 0.0,
            f5: 0.0,
            f6: 0.0,
        };
        assert_eq!(f.evaluate(3.0, 1.0), 0.1);
    }

    #[test]
    fn test_bad_condition_is_error() {
        let table = "pollutant,fuel_type,acceleration,e0,f1,f2,f3,f4,f5,f6\n\
                     PM,DIESEL,sometimes,0,0,0,0,0,0,0\n";
        assert!(EmissionFunctionTable::parse(table.as_bytes()).is_err());
    }

    #[test]
    fn test_empty_table_is_error() {
        let table = "pollutant,fuel_type,acceleration,e0,f1,f2,f3,f4,f5,f6\n";
        assert!(EmissionFunctionTable::parse(table.as_bytes()).is_err());
    }
}
