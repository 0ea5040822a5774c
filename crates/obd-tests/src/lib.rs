//! End-to-end tests for the OBD-II telemetry link
//!
//! These tests run the full stack against the simulated ELM327 adapter:
//! - Link state machine and reconnection policy
//! - AT initialization sequence
//! - Multi-rate polling and response decoding
//! - Sink notifications
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p obd-tests
//! ```
//!
//! No Bluetooth hardware is needed; the mock transport answers every
//! request in-process.
//!
//! # Test Structure
//!
//! - `link_e2e_test.rs` - Connection lifecycle, polling and error paths

// This crate only contains tests, no library code
