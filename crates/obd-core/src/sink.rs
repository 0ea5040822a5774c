//! Outward interface consumed by the presentation layer
//!
//! The link calls these from inside its locked context, so implementations
//! must return promptly and must never call back into the link.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::{Metric, MetricKind};

/// Receiver of decoded metrics and link status changes
pub trait TelemetrySink: Send + Sync {
    /// A metric was decoded from an adapter response
    fn on_metric(&self, metric: Metric);

    /// The link entered (`true`) or left (`false`) the ready state
    fn on_connection_status(&self, connected: bool);

    /// The adapter started (`true`) or stopped (`false`) reporting errors
    fn on_link_error(&self, present: bool);
}

/// Sink that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn on_metric(&self, _metric: Metric) {}
    fn on_connection_status(&self, _connected: bool) {}
    fn on_link_error(&self, _present: bool) {}
}

/// A sink callback captured as a value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent {
    Metric {
        kind: MetricKind,
        value: i32,
        unit: String,
        timestamp: DateTime<Utc>,
    },
    ConnectionStatus {
        connected: bool,
        timestamp: DateTime<Utc>,
    },
    LinkError {
        present: bool,
        timestamp: DateTime<Utc>,
    },
}

impl TelemetryEvent {
    pub fn metric(metric: Metric) -> Self {
        Self::Metric {
            kind: metric.kind,
            value: metric.value,
            unit: metric.kind.unit().to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn connection_status(connected: bool) -> Self {
        Self::ConnectionStatus {
            connected,
            timestamp: Utc::now(),
        }
    }

    pub fn link_error(present: bool) -> Self {
        Self::LinkError {
            present,
            timestamp: Utc::now(),
        }
    }
}

/// Republishes every callback on a broadcast channel
///
/// Sending never blocks; events are dropped when nobody is subscribed and
/// lagging receivers lose the oldest events.
pub struct BroadcastSink {
    tx: broadcast::Sender<TelemetryEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Get a receiver for all subsequent events
    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.tx.subscribe()
    }

    fn publish(&self, event: TelemetryEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Telemetry event dropped (no subscribers)");
        }
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl TelemetrySink for BroadcastSink {
    fn on_metric(&self, metric: Metric) {
        self.publish(TelemetryEvent::metric(metric));
    }

    fn on_connection_status(&self, connected: bool) {
        self.publish(TelemetryEvent::connection_status(connected));
    }

    fn on_link_error(&self, present: bool) {
        self.publish(TelemetryEvent::link_error(present));
    }
}
