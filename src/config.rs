//! Device configuration
//!
//! Everything the web UI can change lives in one [`DeviceConfig`] value.
//! It is loaded from NVS at boot, validated at every save boundary and
//! handed to the sampling loop by value; nothing reads it from a global.

use heapless::String;
use serde::{Deserialize, Serialize};

use crate::app::ports::ConfigError;
use crate::measure::{BatteryModel, CalibrationProfile, Channel};

/// How often accumulator totals are written to NVS (seconds).
pub const ACCUMULATOR_PERSIST_SECS: u32 = 600;

/// Default report file on the SD card.
pub const DEFAULT_DATALOG: &str = "/datalog.csv";

/// Wi-Fi station credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub ssid: String<32>,
    pub pass: String<64>,
}

impl NetworkConfig {
    pub fn has_credentials(&self) -> bool {
        !self.ssid.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmoncmsConfig {
    pub server: String<64>,
    pub path: String<32>,
    pub node: String<32>,
    pub apikey: String<48>,
    /// TLS certificate fingerprint, empty for plain HTTP.
    pub fingerprint: String<64>,
}

impl EmoncmsConfig {
    pub fn is_enabled(&self) -> bool {
        !self.server.is_empty() && !self.apikey.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttConfig {
    pub server: String<64>,
    pub topic: String<64>,
    pub feed_prefix: String<32>,
    pub user: String<32>,
    pub pass: String<64>,
}

impl MqttConfig {
    pub fn is_enabled(&self) -> bool {
        !self.server.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminConfig {
    pub username: String<32>,
    pub password: String<32>,
}

/// Complete device configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Sampling / reporting interval (seconds)
    pub interval_secs: u16,
    /// Calibration for channels A and B
    pub channels: [CalibrationProfile; 2],
    pub battery: BatteryModel,
    /// Channel the battery is wired to
    pub battery_channel: Channel,

    pub network: NetworkConfig,
    pub emoncms: EmoncmsConfig,
    pub mqtt: MqttConfig,
    pub admin: AdminConfig,

    /// Report file on the SD card
    pub datalog_file: String<32>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        let mut datalog_file = String::new();
        // Fits: the literal is shorter than the capacity.
        let _ = datalog_file.push_str(DEFAULT_DATALOG);
        Self {
            interval_secs: 10,
            channels: [CalibrationProfile::default(); 2],
            battery: BatteryModel::default(),
            battery_channel: Channel::A,
            network: NetworkConfig::default(),
            emoncms: EmoncmsConfig::default(),
            mqtt: MqttConfig::default(),
            admin: AdminConfig::default(),
            datalog_file,
        }
    }
}

impl DeviceConfig {
    /// Check every invariant the measurement pipeline relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=3600).contains(&self.interval_secs) {
            return Err(ConfigError::ValidationFailed("interval must be 1–3600 s"));
        }
        for profile in &self.channels {
            profile.validate().map_err(ConfigError::ValidationFailed)?;
        }
        self.battery.validate().map_err(ConfigError::ValidationFailed)?;
        if !self.datalog_file.starts_with('/') || self.datalog_file.contains("..") {
            return Err(ConfigError::ValidationFailed(
                "datalog file must be an absolute path",
            ));
        }
        Ok(())
    }

    pub fn profile(&self, channel: Channel) -> &CalibrationProfile {
        &self.channels[channel.index()]
    }

    pub fn profile_mut(&mut self, channel: Channel) -> &mut CalibrationProfile {
        &mut self.channels[channel.index()]
    }

    pub fn interval_ms(&self) -> u64 {
        u64::from(self.interval_secs) * 1000
    }
}
