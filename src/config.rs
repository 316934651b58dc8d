//! Controller configuration.

use crate::cdev::{PulseCalibration, RcTiming};
use crate::error::{ControlError, Result};
use crate::rp1::{PwmConfig, WindowConfig};
use crate::sensors::Dht11Settings;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which pin backend [`crate::open_backend`] builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Kernel GPIO character device
    #[default]
    CharDevice,
    /// Memory-mapped RP1 registers
    Registers,
}

/// Configuration for every component of the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Backend used for plain pin operations
    pub backend: BackendKind,
    /// GPIO chip device for the character-device backend
    pub chip_path: String,
    /// Consumer label attached to requested lines
    pub consumer: String,
    pub pulse: PulseCalibration,
    pub rc: RcTiming,
    pub dht11: Dht11Settings,
    pub window: WindowConfig,
    pub pwm: PwmConfig,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            chip_path: crate::DEFAULT_CHIP_PATH.to_string(),
            consumer: crate::DEFAULT_CONSUMER.to_string(),
            pulse: PulseCalibration::default(),
            rc: RcTiming::default(),
            dht11: Dht11Settings::default(),
            window: WindowConfig::default(),
            pwm: PwmConfig::default(),
        }
    }
}

impl ControlConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| ControlError::config_error(format!("invalid configuration: {}", e)))
    }

    /// Load a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ControlError::config_error(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            ControlError::config_error(format!("cannot serialize configuration: {}", e))
        })
    }

    /// Select the pin backend.
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Set the GPIO chip device path.
    pub fn with_chip_path(mut self, path: impl Into<String>) -> Self {
        self.chip_path = path.into();
        self
    }

    /// Set the consumer label.
    pub fn with_consumer(mut self, consumer: impl Into<String>) -> Self {
        self.consumer = consumer.into();
        self
    }

    pub fn with_pulse(mut self, pulse: PulseCalibration) -> Self {
        self.pulse = pulse;
        self
    }

    pub fn with_rc(mut self, rc: RcTiming) -> Self {
        self.rc = rc;
        self
    }

    pub fn with_dht11(mut self, dht11: Dht11Settings) -> Self {
        self.dht11 = dht11;
        self
    }

    pub fn with_window(mut self, window: WindowConfig) -> Self {
        self.window = window;
        self
    }

    pub fn with_pwm(mut self, pwm: PwmConfig) -> Self {
        self.pwm = pwm;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_defaults() {
        let config = ControlConfig::default();
        assert_eq!(config.backend, BackendKind::CharDevice);
        assert_eq!(config.chip_path, "/dev/gpiochip0");
        assert_eq!(config.pulse.min_width_us, 165);
        assert_eq!(config.rc.timeout_us, 500_000);
        assert_eq!(config.dht11.ack_retries, 3);
        assert_eq!(config.pwm.clock_hz, 50_000_000);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ControlConfig::from_json(
            r#"{ "backend": "registers", "dht11": { "ack_retries": 5 } }"#,
        )
        .unwrap();
        assert_eq!(config.backend, BackendKind::Registers);
        assert_eq!(config.dht11.ack_retries, 5);
        assert_eq!(config.dht11.edge_timeout_us, 2_000);
        assert_eq!(config.consumer, crate::DEFAULT_CONSUMER);
    }

    #[test]
    fn test_json_round_trip() {
        let config = ControlConfig::default()
            .with_chip_path("/dev/gpiochip4")
            .with_consumer("bench");
        let back = ControlConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let err = ControlConfig::from_json("{ backend: ").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
