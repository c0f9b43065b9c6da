//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `device.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - SamplingConfig: sensor and aggregation periods.
//!     - ShadowConfig: transport selection and sync engine timing.
//!     - IdentityConfig: where the device serial comes from.
//!     - GasSensorConfig: I2C address and command delay.
//!     - DashboardConfig / LoggingConfig.
//!
//! every section is optional; a missing key takes its default.
//!
//! ==============================================================================

use crate::shadow::EngineSettings;

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct DeviceConfig {
    pub sampling: SamplingConfig,
    pub shadow: ShadowConfig,
    pub identity: IdentityConfig,
    pub gas_sensor: GasSensorConfig,
    pub dashboard: DashboardConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SamplingConfig {
    pub aggregation_interval_ms: u64,
    pub temperature_period_ms: u64,
    pub noise_period_ms: u64,
    pub light_period_ms: u64,
    pub gas_period_ms: u64,
    /// delay before each sampler's first read
    pub startup_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Loopback,
    Http,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ShadowConfig {
    pub transport: TransportKind,
    /// base url of the shadow service, http transport only
    pub endpoint: String,
    pub yield_timeout_ms: u64,
    pub ack_timeout_secs: u64,
    pub publish_interval_ms: u64,
    pub settle_delay_ms: u64,
    pub auto_reconnect: bool,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct IdentityConfig {
    /// hex serial, takes precedence over serial_path
    pub serial: Option<String>,
    pub serial_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GasSensorConfig {
    pub i2c_address: u8,
    pub command_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            aggregation_interval_ms: 1000,
            temperature_period_ms: 1000,
            noise_period_ms: 100,
            light_period_ms: 1000,
            gas_period_ms: 1000,
            startup_delay_ms: 1000,
        }
    }
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Loopback,
            endpoint: "http://127.0.0.1:8443".to_string(),
            yield_timeout_ms: 1000,
            ack_timeout_secs: 5,
            publish_interval_ms: 5000,
            settle_delay_ms: 2000,
            auto_reconnect: true,
            request_timeout_ms: 3000,
        }
    }
}

impl Default for GasSensorConfig {
    fn default() -> Self {
        Self { i2c_address: 0x58, command_delay_ms: 10 }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self { enabled: true, bind: "0.0.0.0:3000".to_string() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_sensor_data: true }
    }
}

impl ShadowConfig {
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            yield_timeout: Duration::from_millis(self.yield_timeout_ms),
            ack_timeout: Duration::from_secs(self.ack_timeout_secs),
            publish_interval: Duration::from_millis(self.publish_interval_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            auto_reconnect: self.auto_reconnect,
        }
    }

    /// host:port the readiness probe dials, derived from the endpoint url
    pub fn probe_addr(&self) -> Option<String> {
        let rest = self.endpoint.split_once("://").map(|(_, r)| r).unwrap_or(&self.endpoint);
        let authority = rest.split('/').next().filter(|a| !a.is_empty())?;
        if authority.contains(':') {
            Some(authority.to_string())
        } else if self.endpoint.starts_with("https") {
            Some(format!("{}:443", authority))
        } else {
            Some(format!("{}:80", authority))
        }
    }
}

impl DeviceConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        let config: DeviceConfig =
            toml::from_str(&content).map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        Ok(config)
    }

    /// Load with default fallback
    pub fn load_or_default() -> Self {
        let paths = [
            PathBuf::from("config").join("device.toml"),
            PathBuf::from("..").join("config").join("device.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        tracing::info!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("[CONFIG] Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        tracing::warn!("[CONFIG] No config file found - using defaults");
        Self::default()
    }

    /// Log configuration summary
    pub fn print_summary(&self) {
        tracing::info!(
            transport = ?self.shadow.transport,
            endpoint = %self.shadow.endpoint,
            auto_reconnect = self.shadow.auto_reconnect,
            "[CONFIG] shadow"
        );
        tracing::info!(
            aggregation_ms = self.sampling.aggregation_interval_ms,
            noise_ms = self.sampling.noise_period_ms,
            gas_i2c = %format!("{:#04x}", self.gas_sensor.i2c_address),
            "[CONFIG] sampling"
        );
        tracing::info!(
            dashboard = self.dashboard.enabled,
            bind = %self.dashboard.bind,
            level = %self.logging.level,
            "[CONFIG] host"
        );
    }
}
