//! Telemetry link configuration
//!
//! Every section has working defaults, so an empty TOML document yields a
//! link that talks to the mock adapter with the standard polling plan.

use std::path::Path;
use std::time::Duration;

use obd_conv::DEFAULT_TANK_CAPACITY_L;
use obd_core::{MetricKind, PollClass};
use serde::{Deserialize, Serialize};

use crate::error::LinkError;

/// Configuration for a telemetry link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Which adapter to look for
    #[serde(default)]
    pub adapter: AdapterConfig,
    /// Transport configuration
    #[serde(default)]
    pub transport: TransportConfig,
    /// Polling plan and timing
    #[serde(default)]
    pub polling: PollingConfig,
    /// Adapter initialization timing
    #[serde(default)]
    pub init: InitConfig,
    /// Vehicle constants used when decoding
    #[serde(default)]
    pub vehicle: VehicleConfig,
    /// Delay before retrying after the BLE stack refused to start a scan
    #[serde(default = "default_scan_retry")]
    pub scan_retry_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            adapter: AdapterConfig::default(),
            transport: TransportConfig::default(),
            polling: PollingConfig::default(),
            init: InitConfig::default(),
            vehicle: VehicleConfig::default(),
            scan_retry_ms: default_scan_retry(),
        }
    }
}

fn default_scan_retry() -> u64 {
    1000
}

impl LinkConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self, LinkError> {
        let config: LinkConfig =
            toml::from_str(s).map_err(|e| LinkError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LinkError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), LinkError> {
        for class in PollClass::PRIORITY {
            if self.polling.interval(class).is_zero() {
                return Err(LinkError::Config(format!(
                    "polling.{}_interval_ms must be greater than zero",
                    class
                )));
            }
        }
        if self.polling.tick_ms == 0 {
            return Err(LinkError::Config(
                "polling.tick_ms must be greater than zero".to_string(),
            ));
        }
        if self.polling.plan().iter().all(|(_, kinds)| kinds.is_empty()) {
            return Err(LinkError::Config(
                "polling plan does not request any metric".to_string(),
            ));
        }
        Ok(())
    }

    pub fn scan_retry(&self) -> Duration {
        Duration::from_millis(self.scan_retry_ms)
    }
}

// =============================================================================
// Adapter Configuration
// =============================================================================

/// GATT identity of the OBD-II adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Advertised 16-bit service UUID
    #[serde(default = "default_service_uuid")]
    pub service_uuid: u16,
    /// Command/notify characteristic 16-bit UUID
    #[serde(default = "default_characteristic_uuid")]
    pub characteristic_uuid: u16,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            service_uuid: default_service_uuid(),
            characteristic_uuid: default_characteristic_uuid(),
        }
    }
}

fn default_service_uuid() -> u16 {
    0xFFF0
}

fn default_characteristic_uuid() -> u16 {
    0xFFF1
}

// =============================================================================
// Transport Configuration
// =============================================================================

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Host Bluetooth adapter via btleplug
    Btleplug(BtleplugConfig),
    /// Simulated ELM327 adapter
    Mock(MockConfig),
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Mock(MockConfig::default())
    }
}

/// Host Bluetooth configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BtleplugConfig {
    /// Index into the host's Bluetooth adapters
    #[serde(default)]
    pub adapter_index: usize,
}

/// Mock transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockConfig {
    /// Simulated reply latency in milliseconds
    #[serde(default)]
    pub latency_ms: u64,
    /// Advertised device name
    #[serde(default = "default_mock_name")]
    pub name: String,
    /// Advertised device address
    #[serde(default = "default_mock_address")]
    pub address: String,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            latency_ms: 0,
            name: default_mock_name(),
            address: default_mock_address(),
        }
    }
}

fn default_mock_name() -> String {
    "OBDII".to_string()
}

fn default_mock_address() -> String {
    "66:1E:32:00:0B:D2".to_string()
}

// =============================================================================
// Polling Configuration
// =============================================================================

/// Polling plan: which metrics belong to which class, and how often
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_fast_interval")]
    pub fast_interval_ms: u64,
    #[serde(default = "default_medium_interval")]
    pub medium_interval_ms: u64,
    #[serde(default = "default_slow_interval")]
    pub slow_interval_ms: u64,
    /// Metrics requested every fast interval, in order
    #[serde(default = "default_fast_metrics")]
    pub fast: Vec<MetricKind>,
    #[serde(default = "default_medium_metrics")]
    pub medium: Vec<MetricKind>,
    #[serde(default = "default_slow_metrics")]
    pub slow: Vec<MetricKind>,
    /// Abandon an unanswered command after this long (0 = wait forever)
    #[serde(default = "default_response_timeout")]
    pub response_timeout_ms: u64,
    /// Control loop period
    #[serde(default = "default_tick")]
    pub tick_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            fast_interval_ms: default_fast_interval(),
            medium_interval_ms: default_medium_interval(),
            slow_interval_ms: default_slow_interval(),
            fast: default_fast_metrics(),
            medium: default_medium_metrics(),
            slow: default_slow_metrics(),
            response_timeout_ms: default_response_timeout(),
            tick_ms: default_tick(),
        }
    }
}

fn default_fast_interval() -> u64 {
    100
}

fn default_medium_interval() -> u64 {
    1000
}

fn default_slow_interval() -> u64 {
    10_000
}

fn default_fast_metrics() -> Vec<MetricKind> {
    vec![MetricKind::Speed, MetricKind::EngineRpm]
}

fn default_medium_metrics() -> Vec<MetricKind> {
    vec![MetricKind::CoolantTemp]
}

fn default_slow_metrics() -> Vec<MetricKind> {
    vec![MetricKind::FuelLevel]
}

fn default_response_timeout() -> u64 {
    1000
}

fn default_tick() -> u64 {
    10
}

impl PollingConfig {
    pub fn interval(&self, class: PollClass) -> Duration {
        let ms = match class {
            PollClass::Fast => self.fast_interval_ms,
            PollClass::Medium => self.medium_interval_ms,
            PollClass::Slow => self.slow_interval_ms,
        };
        Duration::from_millis(ms)
    }

    pub fn metrics(&self, class: PollClass) -> &[MetricKind] {
        match class {
            PollClass::Fast => &self.fast,
            PollClass::Medium => &self.medium,
            PollClass::Slow => &self.slow,
        }
    }

    /// `(class, metrics)` pairs in priority order
    pub fn plan(&self) -> Vec<(PollClass, &[MetricKind])> {
        PollClass::PRIORITY
            .into_iter()
            .map(|class| (class, self.metrics(class)))
            .collect()
    }

    pub fn response_timeout(&self) -> Option<Duration> {
        (self.response_timeout_ms > 0).then(|| Duration::from_millis(self.response_timeout_ms))
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

// =============================================================================
// Initialization Configuration
// =============================================================================

/// Spacing of the ATZ / ATE0 / ATSP6 sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitConfig {
    /// Wait after the link becomes ready before sending ATZ
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
    /// Maximum wait between init commands
    #[serde(default = "default_step_delay")]
    pub step_delay_ms: u64,
    /// Move to the next command as soon as the adapter prints its `>` prompt
    #[serde(default = "default_true")]
    pub advance_on_prompt: bool,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay(),
            step_delay_ms: default_step_delay(),
            advance_on_prompt: default_true(),
        }
    }
}

fn default_settle_delay() -> u64 {
    500
}

fn default_step_delay() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

impl InitConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }
}

// =============================================================================
// Vehicle Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleConfig {
    /// Fuel tank capacity in litres
    #[serde(default = "default_tank_capacity")]
    pub tank_capacity_l: u32,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            tank_capacity_l: default_tank_capacity(),
        }
    }
}

fn default_tank_capacity() -> u32 {
    DEFAULT_TANK_CAPACITY_L
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = LinkConfig::from_toml_str("").unwrap();
        assert_eq!(config.adapter.service_uuid, 0xFFF0);
        assert_eq!(config.adapter.characteristic_uuid, 0xFFF1);
        assert!(matches!(config.transport, TransportConfig::Mock(_)));
        assert_eq!(config.polling.interval(PollClass::Fast), Duration::from_millis(100));
        assert_eq!(config.polling.interval(PollClass::Medium), Duration::from_millis(1000));
        assert_eq!(config.polling.interval(PollClass::Slow), Duration::from_millis(10_000));
        assert_eq!(config.polling.response_timeout(), Some(Duration::from_secs(1)));
        assert_eq!(config.vehicle.tank_capacity_l, 50);
        assert_eq!(config.init.settle_delay(), Duration::from_millis(500));
        assert_eq!(config.init.step_delay(), Duration::from_millis(300));
        assert!(config.init.advance_on_prompt);
    }

    #[test]
    fn test_full_document() {
        let toml = r#"
scan_retry_ms = 2500

[adapter]
service_uuid = 0xFFE0
characteristic_uuid = 0xFFE1

[transport]
type = "btleplug"
adapter_index = 1

[polling]
fast_interval_ms = 200
fast = ["engine_rpm"]
medium = ["speed", "coolant_temp"]
slow = ["fuel_level"]
response_timeout_ms = 0

[init]
advance_on_prompt = false

[vehicle]
tank_capacity_l = 65
"#;
        let config = LinkConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.adapter.service_uuid, 0xFFE0);
        assert_eq!(config.adapter.characteristic_uuid, 0xFFE1);
        match &config.transport {
            TransportConfig::Btleplug(cfg) => assert_eq!(cfg.adapter_index, 1),
            other => panic!("Expected btleplug transport, got {:?}", other),
        }
        assert_eq!(config.polling.interval(PollClass::Fast), Duration::from_millis(200));
        assert_eq!(config.polling.metrics(PollClass::Fast), &[MetricKind::EngineRpm]);
        assert_eq!(
            config.polling.metrics(PollClass::Medium),
            &[MetricKind::Speed, MetricKind::CoolantTemp]
        );
        assert_eq!(config.polling.response_timeout(), None);
        assert!(!config.init.advance_on_prompt);
        assert_eq!(config.vehicle.tank_capacity_l, 65);
        assert_eq!(config.scan_retry(), Duration::from_millis(2500));
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let err = LinkConfig::from_toml_str("[polling]\nmedium_interval_ms = 0\n").unwrap_err();
        assert!(err.to_string().contains("medium_interval_ms"));
    }

    #[test]
    fn test_empty_plan_is_rejected() {
        let err =
            LinkConfig::from_toml_str("[polling]\nfast = []\nmedium = []\nslow = []\n").unwrap_err();
        assert!(matches!(err, LinkError::Config(_)));
    }

    #[test]
    fn test_unknown_metric_is_rejected() {
        let err = LinkConfig::from_toml_str("[polling]\nfast = [\"boost\"]\n").unwrap_err();
        assert!(matches!(err, LinkError::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[transport]\ntype = \"mock\"\nlatency_ms = 20").unwrap();

        let config = LinkConfig::from_file(file.path()).unwrap();
        match config.transport {
            TransportConfig::Mock(cfg) => {
                assert_eq!(cfg.latency_ms, 20);
                assert_eq!(cfg.name, "OBDII");
            }
            other => panic!("Expected mock transport, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = LinkConfig::from_file("/nonexistent/obdlink.toml").unwrap_err();
        assert!(matches!(err, LinkError::Io(_)));
    }
}
