//! Transport layer for the adapter link
//!
//! This module provides BLE central implementations:
//! - btleplug adapter for the host Bluetooth stack (feature `btleplug`)
//! - Mock adapter simulating an ELM327 for testing
//!
//! # Example
//!
//! ```ignore
//! use obd_ble::transport::{create_transport, uuid_from_u16};
//! use obd_ble::config::TransportConfig;
//!
//! let config = TransportConfig::Mock(Default::default());
//! let transport = create_transport(&config).await?;
//! let mut events = transport.events();
//! transport.start_scan(uuid_from_u16(0xFFF0)).await?;
//! ```

mod adapter;
pub mod error;
pub mod mock;

#[cfg(feature = "btleplug")]
pub mod btleplug;

pub use adapter::{
    uuid_from_u16, AdapterRecord, BleTransport, CharacteristicInfo, IncomingFrame,
    TransportEvent, BLUETOOTH_BASE_UUID,
};
pub use error::TransportError;

use std::sync::Arc;

use crate::config::TransportConfig;

/// Create a transport adapter based on configuration
pub async fn create_transport(
    config: &TransportConfig,
) -> Result<Arc<dyn BleTransport>, TransportError> {
    match config {
        #[cfg(feature = "btleplug")]
        TransportConfig::Btleplug(cfg) => {
            let adapter = btleplug::BtleplugTransport::new(cfg).await?;
            Ok(Arc::new(adapter))
        }
        #[cfg(not(feature = "btleplug"))]
        TransportConfig::Btleplug(_) => Err(TransportError::Unsupported(
            "Host Bluetooth requires the 'btleplug' feature".to_string(),
        )),
        TransportConfig::Mock(cfg) => {
            let adapter = mock::MockTransport::new(cfg);
            Ok(Arc::new(adapter))
        }
    }
}
