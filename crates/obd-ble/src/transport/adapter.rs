//! BLE transport trait and types

use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::TransportError;

/// Bluetooth base UUID `00000000-0000-1000-8000-00805F9B34FB`
pub const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;

/// Expand a 16-bit assigned number to a full 128-bit UUID
pub fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | (u128::from(short) << 96))
}

/// A peripheral seen during discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterRecord {
    /// Platform address (MAC on Linux/Windows, CoreBluetooth UUID on macOS)
    pub address: String,
    /// Advertised local name
    pub name: Option<String>,
    /// Advertised service UUIDs
    pub services: Vec<Uuid>,
    /// Signal strength at discovery time
    pub rssi: Option<i16>,
}

impl AdapterRecord {
    pub fn advertises(&self, service: &Uuid) -> bool {
        self.services.contains(service)
    }
}

/// One notification from the command characteristic
#[derive(Debug, Clone)]
pub struct IncomingFrame {
    /// When the notification was received
    pub timestamp: Instant,
    /// Raw ASCII reply bytes
    pub data: Vec<u8>,
}

impl IncomingFrame {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            timestamp: Instant::now(),
            data,
        }
    }
}

/// Asynchronous events from the BLE stack
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A peripheral advertised during an active scan
    AdapterDiscovered(AdapterRecord),
    /// The subscribed characteristic notified a value
    Notification(IncomingFrame),
    /// The connection dropped without being asked to (remote close or link loss)
    Disconnected { reason: String },
}

/// Capabilities of the discovered command characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    pub can_notify: bool,
    pub can_write: bool,
}

/// Transport-agnostic BLE central
///
/// Holds at most one connection. Methods are called by the telemetry link
/// outside its lock; results and asynchronous stack callbacks are fed back
/// into the link's state machine.
#[async_trait]
pub trait BleTransport: Send + Sync {
    /// Start reporting advertisers of `service` as
    /// [`TransportEvent::AdapterDiscovered`]
    async fn start_scan(&self, service: Uuid) -> Result<(), TransportError>;

    /// Stop an active scan (no-op when not scanning)
    async fn stop_scan(&self) -> Result<(), TransportError>;

    /// Open a connection to a discovered adapter
    async fn connect(&self, adapter: &AdapterRecord) -> Result<(), TransportError>;

    /// Locate the command characteristic on the connected adapter
    ///
    /// Returns [`TransportError::CharacteristicMissing`] when the service or
    /// characteristic is not present.
    async fn discover_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<CharacteristicInfo, TransportError>;

    /// Enable notifications on the discovered characteristic
    async fn subscribe(&self) -> Result<(), TransportError>;

    /// Write a frame without waiting for an acknowledgment
    async fn write_without_response(&self, frame: &[u8]) -> Result<(), TransportError>;

    /// Close the connection (no-op when not connected)
    ///
    /// A local close is not reported as [`TransportEvent::Disconnected`].
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Subscribe to scan results, notifications and disconnects
    fn events(&self) -> broadcast::Receiver<TransportEvent>;
}
