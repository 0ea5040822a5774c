//! obd-core - Core types and sink interfaces for the OBD-II telemetry link
//!
//! This crate holds what every layer of the link agrees on: the decoded
//! metric model, the polling classes, and the narrow outward interface the
//! presentation layer consumes.

pub mod models;
pub mod sink;
pub mod testing;

pub use models::*;
pub use sink::{BroadcastSink, NullSink, TelemetryEvent, TelemetrySink};
