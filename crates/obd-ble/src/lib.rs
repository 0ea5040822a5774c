//! obd-ble - BLE link to an ELM327-style OBD-II adapter
//!
//! This crate discovers and maintains the connection to the adapter,
//! initializes it, polls vehicle metrics at three rates and hands decoded
//! values to a [`TelemetrySink`](obd_core::TelemetrySink).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TelemetryLink                          │
//! │  Routes transport events, owns the link context             │
//! │                                                             │
//! │  ┌──────────────────── LinkContext (one lock) ───────────┐  │
//! │  │ ┌───────────────┐  ┌─────────────┐  ┌──────────────┐  │  │
//! │  │ │LinkStateMachine│  │ Scheduler   │  │ InitSequence │  │  │
//! │  │ │ (lifecycle)    │  │ (poll rates)│  │ (ATZ/E0/SP6) │  │  │
//! │  │ └───────────────┘  └─────────────┘  └──────────────┘  │  │
//! │  └───────────────────────────────────────────────────────┘  │
//! │            │ LinkAction                 ▲ TransportEvent    │
//! │            ▼                            │                   │
//! │                 ┌─────────────────┐                         │
//! │                 │  BleTransport   │                         │
//! │                 │ (btleplug/mock) │                         │
//! │                 └─────────────────┘                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use obd_ble::{LinkConfig, TelemetryLink};
//! use obd_core::BroadcastSink;
//!
//! let sink = Arc::new(BroadcastSink::default());
//! let mut updates = sink.subscribe();
//! let link = Arc::new(TelemetryLink::from_config(LinkConfig::default(), sink).await?);
//!
//! tokio::spawn({
//!     let link = link.clone();
//!     async move { link.run().await }
//! });
//! while let Ok(event) = updates.recv().await {
//!     println!("{:?}", event);
//! }
//! ```

pub mod config;
pub mod error;
pub mod link;
pub mod scheduler;
pub mod telemetry;
pub mod transport;

pub use config::LinkConfig;
pub use error::LinkError;
pub use link::{LinkAction, LinkEvent, LinkState, LinkStateMachine};
pub use scheduler::Scheduler;
pub use telemetry::TelemetryLink;
pub use transport::{create_transport, AdapterRecord, BleTransport, TransportError, TransportEvent};

// Re-export for convenience
pub use obd_core::{Metric, MetricKind, PollClass, TelemetrySink};
