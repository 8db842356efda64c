//! Shared device state behind the web API.
//!
//! The HTTP server runs on its own task.  Each handler gets a clone of
//! [`SharedDevice`]; clones share the configuration, the live network and
//! serial state the main loop publishes, the clock and the forwarding
//! counters.  Changes for the sampling loop go out as [`AppCommand`]s.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{info, warn};

use super::forward::ForwardStats;
use super::time::SystemClock;
use super::wifi::{NetworkMode, NetworkStatus};
use crate::app::channels;
use crate::app::commands::AppCommand;
use crate::app::ports::{ConfigError, ConfigPort, ScanResult};
use crate::config::DeviceConfig;
use crate::rtc::DateTime;
use crate::web::router::DevicePort;
use crate::web::views::{StatusSnapshot, VERSION};

type CommandSink = Arc<dyn Fn(AppCommand) -> bool + Send + Sync>;

/// State the main loop publishes for the handlers.
#[derive(Debug, Clone, Default)]
struct Live {
    network: Option<NetworkStatus>,
    scan: Vec<ScanResult>,
    last_line: String,
    free_heap: u32,
}

#[derive(Clone)]
pub struct SharedDevice<C: ConfigPort> {
    port: C,
    config: Arc<Mutex<DeviceConfig>>,
    live: Arc<Mutex<Live>>,
    clock: SystemClock,
    stats: Arc<ForwardStats>,
    commands: CommandSink,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<C: ConfigPort> SharedDevice<C> {
    /// Commands go to the static command channel.
    pub fn new(port: C, config: DeviceConfig, clock: SystemClock, stats: Arc<ForwardStats>) -> Self {
        Self {
            port,
            config: Arc::new(Mutex::new(config)),
            live: Arc::new(Mutex::new(Live::default())),
            clock,
            stats,
            commands: Arc::new(channels::submit),
        }
    }

    /// Route commands somewhere other than the static channel.
    pub fn with_command_sink(mut self, sink: impl Fn(AppCommand) -> bool + Send + Sync + 'static) -> Self {
        self.commands = Arc::new(sink);
        self
    }

    pub fn publish_network(&self, status: NetworkStatus, scan: &[ScanResult]) {
        let mut live = lock(&self.live);
        live.network = Some(status);
        live.scan = scan.to_vec();
    }

    pub fn publish_last_line(&self, line: &str) {
        let mut live = lock(&self.live);
        if live.last_line != line {
            live.last_line = line.to_owned();
        }
    }

    pub fn publish_free_heap(&self, bytes: u32) {
        lock(&self.live).free_heap = bytes;
    }
}

impl<C: ConfigPort> DevicePort for SharedDevice<C> {
    fn config(&self) -> DeviceConfig {
        lock(&self.config).clone()
    }

    /// The loop must accept the change before it is stored or shown, so a
    /// full command queue leaves NVS and `/config` untouched.
    fn save_config(&mut self, config: DeviceConfig) -> Result<(), ConfigError> {
        config.validate()?;
        if !(self.commands)(AppCommand::UpdateConfig(Box::new(config.clone()))) {
            warn!("Device: command queue full, config not saved");
            return Err(ConfigError::Busy);
        }
        self.port.save(&config)?;
        *lock(&self.config) = config;
        Ok(())
    }

    fn factory_reset(&mut self) -> Result<(), ConfigError> {
        self.port.erase()?;
        *lock(&self.config) = DeviceConfig::default();
        info!("Device: configuration erased");
        Ok(())
    }

    fn status(&self) -> StatusSnapshot {
        let live = lock(&self.live);
        let net = live.network.as_ref();
        let mut scan = live.scan.clone();
        scan.sort_by(|a, b| b.rssi.cmp(&a.rssi));
        StatusSnapshot {
            mode: net.map_or(NetworkMode::ApOnly, |n| n.mode).status_str(),
            networks: scan.iter().map(|s| s.ssid.clone()).collect(),
            rssi: scan.iter().map(|s| s.rssi).collect(),
            srssi: net.filter(|n| n.connected).and_then(|n| n.rssi),
            ipaddress: net.map(NetworkStatus::ip_string).unwrap_or_default(),
            emoncms_connected: self.stats.emoncms_connected.load(Ordering::Relaxed),
            packets_sent: self.stats.packets_sent.load(Ordering::Relaxed),
            packets_success: self.stats.packets_success.load(Ordering::Relaxed),
            mqtt_connected: self.stats.mqtt_connected.load(Ordering::Relaxed),
            free_heap: live.free_heap,
            rtc_set: self.clock.is_set(),
            time: self.clock.now_utc().map(|t| t.to_string()),
            uptime: self.clock.uptime_ms() / 1000,
            version: VERSION,
        }
    }

    fn set_time(&mut self, time: DateTime) {
        self.clock.set(time);
    }

    fn last_values(&self) -> String {
        lock(&self.live).last_line.clone()
    }

    fn scan_results(&self) -> Vec<ScanResult> {
        lock(&self.live).scan.clone()
    }

    fn network_mode(&self) -> NetworkMode {
        lock(&self.live)
            .network
            .as_ref()
            .map_or(NetworkMode::ApOnly, |n| n.mode)
    }

    fn submit(&mut self, cmd: AppCommand) -> bool {
        (self.commands)(cmd)
    }
}
