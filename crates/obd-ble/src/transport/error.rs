//! Transport layer errors

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("Scan failed: {0}")]
    ScanFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Characteristic 0x{0:04X} not found")]
    CharacteristicMissing(u16),

    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Transport not supported: {0}")]
    Unsupported(String),
}
