//! JSON bodies served by the web API.
//!
//! `/config` keys follow the naming the web UI already uses (`icalA`,
//! `R1_A`, `chanA_VrefSet`, ...), so the per-channel names are built from
//! [`Channel::suffix`] rather than derived from field names.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::app::ports::SdEntry;
use crate::config::DeviceConfig;
use crate::measure::Channel;
use crate::rtc::DateTime;

/// Firmware version reported by `/config` and `/status`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Body of `GET /status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    /// `STA`, `AP` or `STA+AP`.
    pub mode: &'static str,
    /// SSIDs from the last scan, strongest first.
    pub networks: Vec<String>,
    pub rssi: Vec<i8>,
    /// Station RSSI while connected.
    pub srssi: Option<i8>,
    pub ipaddress: String,
    pub emoncms_connected: bool,
    pub packets_sent: u32,
    pub packets_success: u32,
    pub mqtt_connected: bool,
    pub free_heap: u32,
    pub rtc_set: bool,
    /// ISO 8601 UTC, present once the clock is set.
    pub time: Option<String>,
    pub uptime: u64,
    pub version: &'static str,
}

/// Body of `GET /config`.  Secrets (passwords, API key) are not included.
pub fn config_json(cfg: &DeviceConfig) -> Value {
    let mut m = Map::new();
    let mut put = |k: String, v: Value| {
        m.insert(k, v);
    };

    put("postInterval".into(), cfg.interval_secs.into());
    for ch in Channel::ALL {
        let p = cfg.profile(ch);
        let s = ch.suffix();
        put(format!("ical{s}"), p.current_scale.into());
        put(format!("vcal{s}"), p.voltage_scale.into());
        put(format!("chan{s}_VrefSet"), p.reference_known.into());
        put(format!("chan{s}_Vref"), p.reference_volts.into());
        put(format!("channel{s}_gain"), u16::from(p.gain).into());
        put(format!("R1_{s}"), p.divider_r1.into());
        put(format!("R2_{s}"), p.divider_r2.into());
        put(format!("Rshunt_{s}"), p.shunt_ohms.into());
        put(format!("AmpOffset_{s}"), p.current_offset.into());
        put(format!("VoltOffset_{s}"), p.voltage_offset.into());
    }

    let b = &cfg.battery;
    put("BattType".into(), u16::from(b.battery_type).into());
    put("BattCapacity".into(), b.capacity_ah.into());
    put("BattCapHr".into(), b.capacity_hour_rating.into());
    put("BattNom".into(), b.nominal_volts.into());
    put("BattVoltsAlarmHigh".into(), b.alarm_high_volts.into());
    put("BattVoltsAlarmLow".into(), b.alarm_low_volts.into());
    put("BattPeukert".into(), b.peukert_exponent.into());
    put("BattTempCo".into(), b.temperature_coefficient.into());
    put("BattChannel".into(), cfg.battery_channel.suffix().into());

    put("ssid".into(), cfg.network.ssid.as_str().into());
    put("emoncms_server".into(), cfg.emoncms.server.as_str().into());
    put("emoncms_path".into(), cfg.emoncms.path.as_str().into());
    put("emoncms_node".into(), cfg.emoncms.node.as_str().into());
    put("emoncms_fingerprint".into(), cfg.emoncms.fingerprint.as_str().into());
    put("mqtt_server".into(), cfg.mqtt.server.as_str().into());
    put("mqtt_topic".into(), cfg.mqtt.topic.as_str().into());
    put("mqtt_feed_prefix".into(), cfg.mqtt.feed_prefix.as_str().into());
    put("mqtt_user".into(), cfg.mqtt.user.as_str().into());
    put("www_username".into(), cfg.admin.username.as_str().into());
    put("datalog".into(), cfg.datalog_file.as_str().into());
    put("version".into(), VERSION.into());

    Value::Object(m)
}

/// One entry of an SD directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SdListEntry {
    pub name: String,
    pub url: String,
    pub directory: bool,
    pub hidden: bool,
    pub size: u64,
    pub modified: String,
}

impl SdListEntry {
    /// `dir` is the card path being listed (`/` or `/logs`).
    pub fn new(dir: &str, entry: &SdEntry) -> Self {
        let full = if dir.ends_with('/') {
            format!("{dir}{}", entry.name)
        } else {
            format!("{dir}/{}", entry.name)
        };
        Self {
            url: format!("/sd{full}"),
            directory: entry.is_dir,
            hidden: entry.name.starts_with('.'),
            size: entry.size,
            modified: DateTime::from_unix(entry.modified)
                .map(|t| t.to_string())
                .unwrap_or_default(),
            name: entry.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_json_uses_ui_key_names() {
        let cfg = DeviceConfig::default();
        let v = config_json(&cfg);
        assert_eq!(v["postInterval"], 10);
        assert_eq!(v["Rshunt_A"], 0.001);
        assert_eq!(v["channelB_gain"], 16);
        assert_eq!(v["chanA_VrefSet"], false);
        assert_eq!(v["BattCapacity"], 100.0);
        assert_eq!(v["BattChannel"], "A");
        assert_eq!(v["version"], VERSION);
    }

    #[test]
    fn config_json_hides_secrets() {
        let mut cfg = DeviceConfig::default();
        cfg.network.pass.push_str("hunter22").unwrap();
        cfg.emoncms.apikey.push_str("secretkey").unwrap();
        let text = config_json(&cfg).to_string();
        assert!(!text.contains("hunter22"));
        assert!(!text.contains("secretkey"));
    }

    #[test]
    fn list_entry_builds_url_and_flags() {
        let e = SdEntry {
            name: ".hidden.csv".into(),
            is_dir: false,
            size: 42,
            modified: 1_704_067_200,
        };
        let l = SdListEntry::new("/logs", &e);
        assert_eq!(l.url, "/sd/logs/.hidden.csv");
        assert!(l.hidden);
        assert_eq!(l.modified, "2024-01-01T00:00:00Z");

        let root = SdListEntry::new("/", &SdEntry { modified: 0, ..e });
        assert_eq!(root.url, "/sd/.hidden.csv");
    }
}
