//! BLE central backed by the host Bluetooth stack

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ::btleplug::api::{
    BDAddr, Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use ::btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::BtleplugConfig;
use crate::transport::{
    AdapterRecord, BleTransport, CharacteristicInfo, IncomingFrame, TransportError,
    TransportEvent,
};

struct ActiveLink {
    peripheral: Peripheral,
    characteristic: Option<Characteristic>,
    notify_handle: Option<JoinHandle<()>>,
}

/// BLE central using btleplug
pub struct BtleplugTransport {
    central: Adapter,
    events_tx: broadcast::Sender<TransportEvent>,
    scanning: Arc<AtomicBool>,
    /// Peripherals seen during discovery, keyed by record address
    seen: Arc<Mutex<HashMap<String, Peripheral>>>,
    /// Peripheral whose disconnect is reported to the link
    active_id: Arc<Mutex<Option<PeripheralId>>>,
    link: Mutex<Option<ActiveLink>>,
    listener_handle: Mutex<Option<JoinHandle<()>>>,
}

impl BtleplugTransport {
    pub async fn new(config: &BtleplugConfig) -> Result<Self, TransportError> {
        let manager = Manager::new().await.map_err(|e| {
            TransportError::InvalidConfig(format!("Bluetooth unavailable: {}", e))
        })?;
        let adapters = manager.adapters().await.map_err(|e| {
            TransportError::InvalidConfig(format!("Failed to list Bluetooth adapters: {}", e))
        })?;
        let central = adapters
            .into_iter()
            .nth(config.adapter_index)
            .ok_or_else(|| {
                TransportError::InvalidConfig(format!(
                    "No Bluetooth adapter at index {}",
                    config.adapter_index
                ))
            })?;

        let (events_tx, _) = broadcast::channel(256);

        let transport = Self {
            central,
            events_tx,
            scanning: Arc::new(AtomicBool::new(false)),
            seen: Arc::new(Mutex::new(HashMap::new())),
            active_id: Arc::new(Mutex::new(None)),
            link: Mutex::new(None),
            listener_handle: Mutex::new(None),
        };

        transport.start_listener().await?;

        Ok(transport)
    }

    async fn start_listener(&self) -> Result<(), TransportError> {
        let mut events = self
            .central
            .events()
            .await
            .map_err(|e| TransportError::ScanFailed(format!("No central event stream: {}", e)))?;

        let central = self.central.clone();
        let events_tx = self.events_tx.clone();
        let scanning = self.scanning.clone();
        let seen = self.seen.clone();
        let active_id = self.active_id.clone();

        let handle = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                match event {
                    CentralEvent::DeviceDiscovered(id)
                    | CentralEvent::DeviceUpdated(id)
                    | CentralEvent::ServicesAdvertisement { id, .. } => {
                        if !scanning.load(Ordering::SeqCst) {
                            continue;
                        }
                        let Ok(peripheral) = central.peripheral(&id).await else {
                            continue;
                        };
                        let Some(record) = adapter_record(&peripheral).await else {
                            continue;
                        };
                        tracing::trace!(address = %record.address, name = ?record.name, "Advertiser seen");
                        seen.lock().insert(record.address.clone(), peripheral);
                        let _ = events_tx.send(TransportEvent::AdapterDiscovered(record));
                    }
                    CentralEvent::DeviceDisconnected(id) => {
                        let was_active = {
                            let mut active = active_id.lock();
                            if active.as_ref() == Some(&id) {
                                *active = None;
                                true
                            } else {
                                false
                            }
                        };
                        if was_active {
                            let _ = events_tx.send(TransportEvent::Disconnected {
                                reason: "peripheral disconnected".to_string(),
                            });
                        }
                    }
                    _ => {}
                }
            }
            tracing::debug!("BLE central event stream ended");
        });

        *self.listener_handle.lock() = Some(handle);
        Ok(())
    }

    fn active_peripheral(&self) -> Result<Peripheral, TransportError> {
        self.link
            .lock()
            .as_ref()
            .map(|link| link.peripheral.clone())
            .ok_or(TransportError::ConnectionClosed)
    }

    fn active_characteristic(&self) -> Result<(Peripheral, Characteristic), TransportError> {
        let link = self.link.lock();
        let link = link.as_ref().ok_or(TransportError::ConnectionClosed)?;
        let characteristic = link
            .characteristic
            .clone()
            .ok_or_else(|| TransportError::SubscribeFailed("Characteristic not discovered".to_string()))?;
        Ok((link.peripheral.clone(), characteristic))
    }
}

async fn adapter_record(peripheral: &Peripheral) -> Option<AdapterRecord> {
    let properties = peripheral.properties().await.ok()??;
    // CoreBluetooth hides the MAC, fall back to the platform id
    let address = if properties.address == BDAddr::default() {
        format!("{:?}", peripheral.id())
    } else {
        properties.address.to_string()
    };
    Some(AdapterRecord {
        address,
        name: properties.local_name,
        services: properties.services,
        rssi: properties.rssi,
    })
}

fn short_uuid(uuid: Uuid) -> u16 {
    (uuid.as_u128() >> 96) as u16
}

#[async_trait]
impl BleTransport for BtleplugTransport {
    async fn start_scan(&self, service: Uuid) -> Result<(), TransportError> {
        self.seen.lock().clear();
        self.scanning.store(true, Ordering::SeqCst);
        let result = self
            .central
            .start_scan(ScanFilter {
                services: vec![service],
            })
            .await;
        if let Err(e) = result {
            self.scanning.store(false, Ordering::SeqCst);
            return Err(TransportError::ScanFailed(e.to_string()));
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.scanning.store(false, Ordering::SeqCst);
        self.central
            .stop_scan()
            .await
            .map_err(|e| TransportError::ScanFailed(e.to_string()))
    }

    async fn connect(&self, adapter: &AdapterRecord) -> Result<(), TransportError> {
        let peripheral = self
            .seen
            .lock()
            .get(&adapter.address)
            .cloned()
            .ok_or_else(|| {
                TransportError::ConnectionFailed(format!("Unknown device {}", adapter.address))
            })?;

        // A link dropped by the remote side may still own a notification task
        let previous = self.link.lock().take();
        if let Some(handle) = previous.and_then(|link| link.notify_handle) {
            handle.abort();
        }

        peripheral
            .connect()
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        *self.active_id.lock() = Some(peripheral.id());
        *self.link.lock() = Some(ActiveLink {
            peripheral,
            characteristic: None,
            notify_handle: None,
        });
        Ok(())
    }

    async fn discover_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<CharacteristicInfo, TransportError> {
        let peripheral = self.active_peripheral()?;
        peripheral
            .discover_services()
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("Service discovery: {}", e)))?;

        let found = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.service_uuid == service && c.uuid == characteristic)
            .ok_or(TransportError::CharacteristicMissing(short_uuid(characteristic)))?;

        let info = CharacteristicInfo {
            uuid: found.uuid,
            can_notify: found.properties.contains(CharPropFlags::NOTIFY),
            can_write: found
                .properties
                .intersects(CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE),
        };

        if let Some(link) = self.link.lock().as_mut() {
            link.characteristic = Some(found);
        }
        Ok(info)
    }

    async fn subscribe(&self) -> Result<(), TransportError> {
        let (peripheral, characteristic) = self.active_characteristic()?;

        peripheral
            .subscribe(&characteristic)
            .await
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))?;
        let mut notifications = peripheral
            .notifications()
            .await
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))?;

        let events_tx = self.events_tx.clone();
        let uuid = characteristic.uuid;
        let handle = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != uuid {
                    continue;
                }
                tracing::trace!(data = %hex::encode(&notification.value), "Notification");
                let _ = events_tx.send(TransportEvent::Notification(IncomingFrame::new(
                    notification.value,
                )));
            }
        });

        if let Some(link) = self.link.lock().as_mut() {
            if let Some(previous) = link.notify_handle.replace(handle) {
                previous.abort();
            }
        }
        Ok(())
    }

    async fn write_without_response(&self, frame: &[u8]) -> Result<(), TransportError> {
        let (peripheral, characteristic) = self.active_characteristic()?;
        peripheral
            .write(&characteristic, frame, WriteType::WithoutResponse)
            .await
            .map_err(|e| TransportError::WriteFailed(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        // Forget the id first so the stack's disconnect event is not forwarded
        self.active_id.lock().take();
        let Some(link) = self.link.lock().take() else {
            return Ok(());
        };
        if let Some(handle) = link.notify_handle {
            handle.abort();
        }
        link.peripheral
            .disconnect()
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("Disconnect: {}", e)))
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events_tx.subscribe()
    }
}

impl Drop for BtleplugTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.listener_handle.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.link.lock().as_mut().and_then(|l| l.notify_handle.take()) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::uuid_from_u16;

    #[test]
    fn test_short_uuid() {
        assert_eq!(short_uuid(uuid_from_u16(0xFFF1)), 0xFFF1);
        assert_eq!(short_uuid(uuid_from_u16(0x180A)), 0x180A);
    }
}
