//! Host Bluetooth transport via btleplug (BlueZ / CoreBluetooth / WinRT)

mod adapter;

pub use adapter::BtleplugTransport;
