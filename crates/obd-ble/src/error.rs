//! Telemetry link errors

use thiserror::Error;

use crate::transport::TransportError;

/// Errors raised while building or running a telemetry link
///
/// Runtime connection failures never surface here: they are absorbed by
/// the state machine and show up as a return to `Idle`.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Transport could not be created
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// `run` called while another run loop is active
    #[error("Telemetry link is already running")]
    AlreadyRunning,
}
