//! Mock hardware for integration tests.
//!
//! A scripted UART feeding the serial link, a recording event sink, an
//! in-memory storage partition and an uplink that keeps every report it
//! is handed.

use std::collections::HashMap;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use emondc::app::events::AppEvent;
use emondc::app::ports::{EventSink, StorageError, StoragePort};
use emondc::app::report::Report;
use emondc::adapters::forward::{Uplink, UplinkError, UplinkKind};
use emondc::config::DeviceConfig;
use emondc::measure::{BatteryModel, CalibrationProfile, Gain};

// ── Calibration used by every test ────────────────────────────

const VOLTS_PER_COUNT: f64 = 2.048 / 32_768.0;

/// Both channels: 10:1 divider, 10 mΩ shunt, gain ×1, known reference.
pub fn bench_config() -> DeviceConfig {
    let profile = CalibrationProfile {
        shunt_ohms: 0.01,
        gain: Gain::X1,
        divider_r1: 90_000,
        divider_r2: 10_000,
        reference_known: true,
        ..Default::default()
    };
    DeviceConfig {
        channels: [profile; 2],
        battery: BatteryModel {
            peukert_exponent: 1.0,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Sensor-board line for `volts`/`amps` on channel A, channel B idle.
pub fn frame_line(volts: f64, amps: f64) -> String {
    format!(
        "VA:{:.3},IA:{:.3},VB:0,IB:0\r\n",
        volts / 10.0 / VOLTS_PER_COUNT,
        amps * 0.01 / VOLTS_PER_COUNT
    )
}

// ── ScriptedUart ──────────────────────────────────────────────

/// UART whose receive buffer the test fills between ticks.  Clones share
/// the buffer, so a test keeps one handle after the link takes the other.
#[derive(Clone, Default)]
pub struct ScriptedUart {
    rx: Arc<Mutex<Vec<u8>>>,
}

impl ScriptedUart {
    pub fn push(&self, data: &str) {
        self.rx.lock().unwrap().extend_from_slice(data.as_bytes());
    }
}

impl embedded_io::ErrorType for ScriptedUart {
    type Error = Infallible;
}

impl embedded_io::Read for ScriptedUart {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Infallible> {
        let mut rx = self.rx.lock().unwrap();
        let n = buf.len().min(rx.len());
        buf[..n].copy_from_slice(&rx[..n]);
        rx.drain(..n);
        Ok(n)
    }
}

impl embedded_io::ReadReady for ScriptedUart {
    fn read_ready(&mut self) -> Result<bool, Infallible> {
        Ok(!self.rx.lock().unwrap().is_empty())
    }
}

// ── RecordingSink ─────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<AppEvent>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn reports(&self) -> Vec<&Report> {
        self.events
            .iter()
            .filter_map(|e| match e {
                AppEvent::Report(r) => Some(r),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &AppEvent) {
        self.events.push(event.clone());
    }
}

// ── MemStorage ────────────────────────────────────────────────

#[derive(Default)]
pub struct MemStorage {
    store: HashMap<String, Vec<u8>>,
}

impl StoragePort for MemStorage {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let v = self
            .store
            .get(&format!("{namespace}::{key}"))
            .ok_or(StorageError::NotFound)?;
        let n = v.len().min(buf.len());
        buf[..n].copy_from_slice(&v[..n]);
        Ok(n)
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.store.insert(format!("{namespace}::{key}"), data.to_vec());
        Ok(())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.store.remove(&format!("{namespace}::{key}"));
        Ok(())
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.store.contains_key(&format!("{namespace}::{key}"))
    }
}

// ── RecordingUplink ───────────────────────────────────────────

/// Emoncms stand-in.  Reports land in the shared vector; `reject` makes
/// every send fail.
#[derive(Clone, Default)]
pub struct RecordingUplink {
    pub sent: Arc<Mutex<Vec<Report>>>,
    pub reject: bool,
    pub reconfigured: Arc<Mutex<u32>>,
}

impl Uplink for RecordingUplink {
    fn kind(&self) -> UplinkKind {
        UplinkKind::Emoncms
    }

    fn reconfigure(&mut self, _config: &DeviceConfig) {
        *self.reconfigured.lock().unwrap() += 1;
    }

    fn send(&mut self, report: &Report) -> Result<(), UplinkError> {
        if self.reject {
            return Err(UplinkError::Rejected(401));
        }
        self.sent.lock().unwrap().push(report.clone());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.reject
    }
}

// ── Scratch directories ───────────────────────────────────────

/// Fresh directory standing in for the SD card root.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("emondc-it-{name}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
