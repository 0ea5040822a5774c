//! Error types for frame conversion

use thiserror::Error;

/// A character outside `'0'-'9'` / `'A'-'F'`
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("invalid hex digit: 0x{0:02X}")]
pub struct HexError(pub u8);

/// Coarse classification of a rejected frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Truncated,
    AdapterError,
    UnexpectedResponse,
    Mismatch,
    InvalidHex,
}

/// Why a response frame produced no metric
///
/// All variants are local to the frame; none of them affect the link.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Frame too short for the fields being read
    #[error("frame truncated: {len} bytes, need at least {needed}")]
    Truncated { len: usize, needed: usize },

    /// Adapter reported an error string (`...ERRO...` at offset 4)
    #[error("adapter reported an error")]
    AdapterError,

    /// Frame is not a mode-01 positive response
    #[error("unexpected response (no 41 marker)")]
    UnexpectedResponse,

    /// Response PID does not match the command in flight
    #[error("PID mismatch: expected {}, got 0x{actual:02X}", format_expected(.expected))]
    Mismatch { expected: Option<u8>, actual: u8 },

    /// Non-hex character where a hex pair was expected
    #[error("invalid hex at offset {offset}: {source}")]
    InvalidHex {
        offset: usize,
        #[source]
        source: HexError,
    },
}

impl ParseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ParseError::Truncated { .. } => ErrorKind::Truncated,
            ParseError::AdapterError => ErrorKind::AdapterError,
            ParseError::UnexpectedResponse => ErrorKind::UnexpectedResponse,
            ParseError::Mismatch { .. } => ErrorKind::Mismatch,
            ParseError::InvalidHex { .. } => ErrorKind::InvalidHex,
        }
    }
}

fn format_expected(expected: &Option<u8>) -> String {
    match expected {
        Some(pid) => format!("0x{:02X}", pid),
        None => "nothing in flight".to_string(),
    }
}
