//! Adapter link lifecycle
//!
//! This module owns discovery, connection, subscription and reconnection
//! policy, plus the AT initialization sequence issued once the link is
//! ready.

mod init;
mod machine;

pub use init::{InitSequence, InitStep};
pub use machine::{LinkAction, LinkEvent, LinkStateMachine, Transition};

/// Lifecycle state of the adapter link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    /// No connection and no scan in progress
    Idle,
    /// Waiting for an advertiser exposing the adapter service
    Scanning,
    /// Connection attempt in progress
    Connecting,
    /// Discovering the command characteristic and enabling notifications
    Subscribing,
    /// Notifications enabled, commands may be written
    Ready,
    /// Local close in progress
    Disconnecting,
}

impl Default for LinkState {
    fn default() -> Self {
        Self::Idle
    }
}

impl LinkState {
    /// Whether a connection handle is (or may be) held in this state
    pub fn holds_connection(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Subscribing | Self::Ready | Self::Disconnecting
        )
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Connecting => "connecting",
            Self::Subscribing => "subscribing",
            Self::Ready => "ready",
            Self::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}
