//! Mock transport simulating an ELM327 BLE adapter

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{
    uuid_from_u16, AdapterRecord, BleTransport, CharacteristicInfo, IncomingFrame,
    TransportError, TransportEvent,
};
use crate::config::MockConfig;

const SERVICE_UUID: u16 = 0xFFF0;
const CHARACTERISTIC_UUID: u16 = 0xFFF1;

#[derive(Debug)]
struct MockState {
    scanning: bool,
    subscribed: bool,
    advertising: bool,
    characteristic_present: bool,
    notify_supported: bool,
    scan_failures: u32,
    connect_failures: u32,
    write_failures: u32,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            scanning: false,
            subscribed: false,
            advertising: true,
            characteristic_present: true,
            notify_supported: true,
            scan_failures: 0,
            connect_failures: 0,
            write_failures: 0,
        }
    }
}

/// Mock transport for testing
///
/// Advertises a single adapter exposing service `0xFFF0` with a
/// notify/write characteristic `0xFFF1`, and answers every write with a
/// notification the way an ELM327 clone with echo enabled would.
pub struct MockTransport {
    config: MockConfig,
    record: AdapterRecord,
    events_tx: broadcast::Sender<TransportEvent>,
    connected: Arc<AtomicBool>,
    /// Bumped on every disconnect so delayed replies from an old
    /// connection are never delivered on a new one
    generation: Arc<AtomicU64>,
    disconnect_calls: AtomicU32,
    state: Mutex<MockState>,
    /// Request (without CR) -> reply mapping
    responses: RwLock<Vec<(Vec<u8>, Vec<u8>)>>,
    /// Requests that are accepted but never answered
    silenced: RwLock<HashSet<Vec<u8>>>,
    writes: Mutex<Vec<Vec<u8>>>,
}

impl MockTransport {
    pub fn new(config: &MockConfig) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        let record = AdapterRecord {
            address: config.address.clone(),
            name: Some(config.name.clone()),
            services: vec![uuid_from_u16(SERVICE_UUID)],
            rssi: Some(-58),
        };
        Self {
            config: config.clone(),
            record,
            events_tx,
            connected: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            disconnect_calls: AtomicU32::new(0),
            state: Mutex::new(MockState::default()),
            responses: RwLock::new(Self::default_responses()),
            silenced: RwLock::new(HashSet::new()),
            writes: Mutex::new(Vec::new()),
        }
    }

    fn default_responses() -> Vec<(Vec<u8>, Vec<u8>)> {
        vec![
            // Reset banner
            (b"ATZ".to_vec(), b"\r\rELM327 v1.5\r\r>".to_vec()),
            // Echo still on when ATE0 arrives
            (b"ATE0".to_vec(), b"ATE0\rOK\r\r>".to_vec()),
            (b"ATSP6".to_vec(), b"OK\r\r>".to_vec()),
            // Vehicle speed: 0x3C = 60 km/h
            (b"010D".to_vec(), b"41 0D 3C \r\r>".to_vec()),
            // Engine RPM: 0x2EE0 / 4 = 3000 rpm
            (b"010C".to_vec(), b"41 0C 2E E0 \r\r>".to_vec()),
            // Fuel level: 0x80 = 50.2 % -> 25 L of 50
            (b"012F".to_vec(), b"41 2F 80 \r\r>".to_vec()),
            // Coolant: 0x82 - 40 = 90 °C
            (b"0105".to_vec(), b"41 05 82 \r\r>".to_vec()),
        ]
    }

    /// The adapter this mock advertises
    pub fn record(&self) -> &AdapterRecord {
        &self.record
    }

    /// Replace the reply for a request (given without the terminator)
    pub fn set_response(&self, request: &str, reply: &[u8]) {
        let key = request.as_bytes().to_vec();
        let mut responses = self.responses.write();
        responses.retain(|(req, _)| *req != key);
        responses.push((key, reply.to_vec()));
    }

    /// Accept a request but never answer it
    pub fn silence(&self, request: &str) {
        self.silenced.write().insert(request.as_bytes().to_vec());
    }

    pub fn unsilence(&self, request: &str) {
        self.silenced.write().remove(request.as_bytes());
    }

    /// Make the next `n` scan starts fail
    pub fn fail_next_scans(&self, n: u32) {
        self.state.lock().scan_failures = n;
    }

    /// Make the next `n` connection attempts fail
    pub fn fail_next_connects(&self, n: u32) {
        self.state.lock().connect_failures = n;
    }

    /// Make the next `n` writes fail
    pub fn fail_next_writes(&self, n: u32) {
        self.state.lock().write_failures = n;
    }

    /// Hide (or restore) the command characteristic
    pub fn set_characteristic_present(&self, present: bool) {
        self.state.lock().characteristic_present = present;
    }

    /// Advertise the characteristic without the notify property
    pub fn set_notify_supported(&self, supported: bool) {
        self.state.lock().notify_supported = supported;
    }

    /// Stop (or resume) advertising on scan start
    pub fn set_advertising(&self, advertising: bool) {
        self.state.lock().advertising = advertising;
    }

    /// Report an arbitrary advertiser while scanning
    pub fn advertise(&self, record: AdapterRecord) {
        if self.state.lock().scanning {
            self.emit(TransportEvent::AdapterDiscovered(record));
        }
    }

    /// Simulate link loss or a remote close
    pub fn drop_link(&self, reason: &str) {
        if self.close() {
            self.emit(TransportEvent::Disconnected {
                reason: reason.to_string(),
            });
        }
    }

    fn close(&self) -> bool {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.state.lock().subscribed = false;
        true
    }

    /// Deliver an unsolicited notification
    pub fn inject_notification(&self, data: &[u8]) {
        self.emit(TransportEvent::Notification(IncomingFrame::new(data.to_vec())));
    }

    /// Every frame written so far
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().clone()
    }

    pub fn clear_writes(&self) {
        self.writes.lock().clear();
    }

    /// Number of `disconnect` calls, including ones with nothing to close
    pub fn disconnect_calls(&self) -> u32 {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn is_scanning(&self) -> bool {
        self.state.lock().scanning
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn emit(&self, event: TransportEvent) {
        if self.events_tx.send(event).is_err() {
            tracing::trace!("Mock transport: event dropped (no receivers)");
        }
    }

    fn find_response(&self, request: &[u8]) -> Vec<u8> {
        let responses = self.responses.read();
        if let Some((_, reply)) = responses.iter().find(|(req, _)| req == request) {
            return reply.clone();
        }
        if request.starts_with(b"AT") {
            return b"OK\r\r>".to_vec();
        }
        b"NO DATA\r\r>".to_vec()
    }
}

#[async_trait]
impl BleTransport for MockTransport {
    async fn start_scan(&self, service: Uuid) -> Result<(), TransportError> {
        let advertise = {
            let mut state = self.state.lock();
            if state.scan_failures > 0 {
                state.scan_failures -= 1;
                return Err(TransportError::ScanFailed(
                    "Mock scan failure".to_string(),
                ));
            }
            state.scanning = true;
            state.advertising
        };

        tracing::debug!(%service, "Mock transport: scan started");
        if advertise && !self.is_connected() {
            self.emit(TransportEvent::AdapterDiscovered(self.record.clone()));
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.state.lock().scanning = false;
        Ok(())
    }

    async fn connect(&self, adapter: &AdapterRecord) -> Result<(), TransportError> {
        {
            let mut state = self.state.lock();
            if state.connect_failures > 0 {
                state.connect_failures -= 1;
                return Err(TransportError::ConnectionFailed(
                    "Mock connect failure".to_string(),
                ));
            }
        }
        if adapter.address != self.record.address {
            return Err(TransportError::ConnectionFailed(format!(
                "Unknown device {}",
                adapter.address
            )));
        }
        if self.connected.swap(true, Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed(
                "Already connected".to_string(),
            ));
        }
        tracing::debug!(address = %adapter.address, "Mock transport: connected");
        Ok(())
    }

    async fn discover_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<CharacteristicInfo, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::ConnectionClosed);
        }
        let state = self.state.lock();
        if !state.characteristic_present
            || service != uuid_from_u16(SERVICE_UUID)
            || characteristic != uuid_from_u16(CHARACTERISTIC_UUID)
        {
            return Err(TransportError::CharacteristicMissing(CHARACTERISTIC_UUID));
        }
        Ok(CharacteristicInfo {
            uuid: characteristic,
            can_notify: state.notify_supported,
            can_write: true,
        })
    }

    async fn subscribe(&self) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::ConnectionClosed);
        }
        let mut state = self.state.lock();
        if !state.notify_supported {
            return Err(TransportError::SubscribeFailed(
                "Notify not supported".to_string(),
            ));
        }
        state.subscribed = true;
        Ok(())
    }

    async fn write_without_response(&self, frame: &[u8]) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::ConnectionClosed);
        }
        {
            let mut state = self.state.lock();
            if state.write_failures > 0 {
                state.write_failures -= 1;
                return Err(TransportError::WriteFailed(
                    "Mock write failure".to_string(),
                ));
            }
        }
        self.writes.lock().push(frame.to_vec());

        let request = frame.strip_suffix(b"\r").unwrap_or(frame);
        tracing::debug!(request = %String::from_utf8_lossy(request), "Mock transport: write");

        if !self.state.lock().subscribed || self.silenced.read().contains(request) {
            return Ok(());
        }

        let reply = self.find_response(request);
        if self.config.latency_ms == 0 {
            self.emit(TransportEvent::Notification(IncomingFrame::new(reply)));
            return Ok(());
        }

        // Replies arrive on the BLE stack's context, not the writer's
        let events_tx = self.events_tx.clone();
        let connected = self.connected.clone();
        let generation = self.generation.clone();
        let sent_generation = generation.load(Ordering::SeqCst);
        let latency = Duration::from_millis(self.config.latency_ms);
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            if connected.load(Ordering::SeqCst)
                && generation.load(Ordering::SeqCst) == sent_generation
            {
                let _ = events_tx.send(TransportEvent::Notification(IncomingFrame::new(reply)));
            }
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        if self.close() {
            tracing::debug!("Mock transport: disconnected");
        }
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events_tx.subscribe()
    }
}
