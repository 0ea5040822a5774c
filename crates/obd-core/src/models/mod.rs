//! Shared data models for the telemetry link

mod metric;
mod poll;

pub use metric::*;
pub use poll::*;
