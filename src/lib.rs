pub mod config;
pub mod emissions;
pub mod fetch;
pub mod geometry;
pub mod network;
pub mod output;
pub mod pipeline;
pub mod stats;
pub mod tessellation;
pub mod trajectory;
