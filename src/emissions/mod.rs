//! Fuel-type resolution, emission estimation and weekly aggregation.

pub mod aggregate;
pub mod compute;
pub mod functions;
pub mod types;
pub mod vehicles;

pub use aggregate::aggregate_emissions;
pub use compute::compute_emissions;
pub use functions::{AccelerationCondition, EmissionFunction, EmissionFunctionTable, Pollutant};
pub use types::{EmissionKey, EmissionRecord};
pub use vehicles::{
    FuelType, VehicleRecord, load_vehicle_registry, match_vehicle_to_fuel_type, parse_registry,
};
