//! Test utilities for code built on the telemetry link
//!
//! Provides a sink that records every callback so tests can assert on
//! exactly what the presentation layer would have seen.

use parking_lot::Mutex;

use crate::models::{Metric, MetricKind};
use crate::sink::TelemetrySink;

/// One recorded sink callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkCall {
    Metric(Metric),
    ConnectionStatus(bool),
    LinkError(bool),
}

/// Sink that records callbacks in arrival order
#[derive(Debug, Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All callbacks so far
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().clone()
    }

    /// Only the metric callbacks
    pub fn metrics(&self) -> Vec<Metric> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                SinkCall::Metric(m) => Some(*m),
                _ => None,
            })
            .collect()
    }

    /// Most recent value reported for a metric
    pub fn last_value(&self, kind: MetricKind) -> Option<i32> {
        self.metrics()
            .into_iter()
            .rev()
            .find(|m| m.kind == kind)
            .map(|m| m.value)
    }

    /// Sequence of connection status values reported
    pub fn connection_changes(&self) -> Vec<bool> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                SinkCall::ConnectionStatus(c) => Some(*c),
                _ => None,
            })
            .collect()
    }

    /// Sequence of link error values reported
    pub fn link_error_changes(&self) -> Vec<bool> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                SinkCall::LinkError(e) => Some(*e),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

impl TelemetrySink for RecordingSink {
    fn on_metric(&self, metric: Metric) {
        self.calls.lock().push(SinkCall::Metric(metric));
    }

    fn on_connection_status(&self, connected: bool) {
        self.calls.lock().push(SinkCall::ConnectionStatus(connected));
    }

    fn on_link_error(&self, present: bool) {
        self.calls.lock().push(SinkCall::LinkError(present));
    }
}
