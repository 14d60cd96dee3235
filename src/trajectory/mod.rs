//! GPS trajectory loading and cleaning.
//!
//! [`load_trajectories`] reads the weekly CSV, [`filter_trajectories`] splits
//! it into segments and removes kinematically implausible points.

pub mod filter;
pub mod point;

pub use filter::{
    MAX_ABS_ACCELERATION, MAX_SPEED, compute_speed_and_acceleration, filter_kinematics,
    filter_trajectories, split_on_time_gap,
};
pub use point::{TrajectoryPoint, load_trajectories, parse_trajectories};
