//! Network forwarding of reports (Emoncms, MQTT).
//!
//! The sampling loop must never wait on the network, so the
//! [`Forwarder`] sink only queues reports on a bounded channel.  An
//! [`UplinkWorker`] on its own thread drains the queue into every
//! configured [`Uplink`] and keeps the counters shown by `/status`.
//!
//! ```text
//!  AppService ──Report──▶ Forwarder ──sync_channel──▶ UplinkWorker ──▶ Emoncms
//!                                                                  └──▶ MQTT
//! ```

use core::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use url::form_urlencoded;

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;
use crate::app::report::Report;
use crate::config::{DeviceConfig, EmoncmsConfig, MqttConfig};

/// Reports queued before new ones are dropped.
pub const QUEUE_DEPTH: usize = 4;

// ───────────────────────────────────────────────────────────────
// Uplink port
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UplinkKind {
    Emoncms,
    Mqtt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UplinkError {
    /// Not configured or not connected; nothing was sent.
    Offline,
    /// The server answered with a non-2xx status.
    Rejected(u16),
    Transport,
}

impl fmt::Display for UplinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offline => write!(f, "offline"),
            Self::Rejected(code) => write!(f, "server returned {code}"),
            Self::Transport => write!(f, "transport error"),
        }
    }
}

/// A remote service that accepts reports.
pub trait Uplink {
    fn kind(&self) -> UplinkKind;

    /// Pick up new server settings.
    fn reconfigure(&mut self, config: &DeviceConfig);

    fn send(&mut self, report: &Report) -> Result<(), UplinkError>;

    fn is_connected(&self) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Message formats
// ───────────────────────────────────────────────────────────────

/// Emoncms input URL for `report`, `None` when Emoncms is not configured.
pub fn emoncms_url(cfg: &EmoncmsConfig, report: &Report) -> Option<String> {
    if !cfg.is_enabled() {
        return None;
    }
    let scheme = if cfg.fingerprint.is_empty() { "http" } else { "https" };
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("node", &cfg.node)
        .append_pair("json", &format!("{{{}}}", report.input_string()))
        .append_pair("apikey", &cfg.apikey)
        .finish();
    Some(format!(
        "{scheme}://{}{}/input/post?{query}",
        cfg.server,
        cfg.path.trim_end_matches('/')
    ))
}

/// One `(topic, payload)` per input key: `<topic>/<prefix><key>`.
pub fn mqtt_messages(cfg: &MqttConfig, report: &Report) -> Vec<(String, String)> {
    report
        .input_string()
        .split(',')
        .filter_map(|pair| pair.split_once(':'))
        .map(|(key, value)| {
            (
                format!("{}/{}{}", cfg.topic, cfg.feed_prefix, key),
                value.to_owned(),
            )
        })
        .collect()
}

// ───────────────────────────────────────────────────────────────
// Counters
// ───────────────────────────────────────────────────────────────

/// Shared with the status handler.
#[derive(Debug, Default)]
pub struct ForwardStats {
    pub packets_sent: AtomicU32,
    pub packets_success: AtomicU32,
    pub emoncms_connected: AtomicBool,
    pub mqtt_connected: AtomicBool,
}

impl ForwardStats {
    fn record(&self, kind: UplinkKind, result: Result<(), UplinkError>) {
        match kind {
            UplinkKind::Emoncms => {
                self.packets_sent.fetch_add(1, Ordering::Relaxed);
                let ok = result.is_ok();
                if ok {
                    self.packets_success.fetch_add(1, Ordering::Relaxed);
                }
                self.emoncms_connected.store(ok, Ordering::Relaxed);
            }
            UplinkKind::Mqtt => {
                self.mqtt_connected.store(result.is_ok(), Ordering::Relaxed);
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Forwarder (EventSink side)
// ───────────────────────────────────────────────────────────────

/// What the worker acts on next.
pub enum Outbound {
    Report(Box<Report>),
    Reconfigure(Box<DeviceConfig>),
}

/// Queue entries.  `Wake` only rouses an idle worker to look at the
/// settings slot.
enum Queued {
    Report(Box<Report>),
    Wake,
}

/// Newest unapplied server settings.  Held outside the report queue so a
/// backlog of reports never loses them.
type SettingsSlot = Arc<Mutex<Option<Box<DeviceConfig>>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Event sink that queues reports for the uplink worker.
pub struct Forwarder {
    tx: SyncSender<Queued>,
    settings: SettingsSlot,
    dropped: u32,
}

/// Receiving end, consumed by [`UplinkWorker::run`].
pub struct Outbox {
    rx: Receiver<Queued>,
    settings: SettingsSlot,
}

/// Create a forwarder and the receiving end for [`UplinkWorker::run`].
pub fn channel() -> (Forwarder, Outbox) {
    let (tx, rx) = mpsc::sync_channel(QUEUE_DEPTH);
    let settings = SettingsSlot::default();
    (
        Forwarder {
            tx,
            settings: Arc::clone(&settings),
            dropped: 0,
        },
        Outbox { rx, settings },
    )
}

impl Forwarder {
    /// Pass new server settings to the worker.  A later call before the
    /// worker looks replaces an earlier one.
    pub fn reconfigure(&mut self, config: &DeviceConfig) {
        *lock(&self.settings) = Some(Box::new(config.clone()));
        // A full queue wakes the worker anyway.
        let _ = self.tx.try_send(Queued::Wake);
    }

    /// Reports dropped because the queue was full.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    fn push(&mut self, report: Report) {
        match self.tx.try_send(Queued::Report(Box::new(report))) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                warn!("Forward: queue full, dropped ({} total)", self.dropped);
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped += 1;
                debug!("Forward: worker gone");
            }
        }
    }
}

impl Outbox {
    fn pending_settings(&self) -> Option<Outbound> {
        lock(&self.settings).take().map(Outbound::Reconfigure)
    }

    /// Block for the next message.  Pending settings go ahead of queued
    /// reports.  `None` once every forwarder is gone.
    pub fn recv(&self) -> Option<Outbound> {
        loop {
            if let Some(msg) = self.pending_settings() {
                return Some(msg);
            }
            match self.rx.recv().ok()? {
                Queued::Report(r) => return Some(Outbound::Report(r)),
                Queued::Wake => {}
            }
        }
    }

    pub fn try_recv(&self) -> Option<Outbound> {
        loop {
            if let Some(msg) = self.pending_settings() {
                return Some(msg);
            }
            match self.rx.try_recv().ok()? {
                Queued::Report(r) => return Some(Outbound::Report(r)),
                Queued::Wake => {}
            }
        }
    }

    /// Everything available without blocking.
    pub fn try_iter(&self) -> impl Iterator<Item = Outbound> + '_ {
        core::iter::from_fn(|| self.try_recv())
    }
}

impl EventSink for Forwarder {
    fn emit(&mut self, event: &AppEvent) {
        if let AppEvent::Report(r) = event {
            self.push(r.clone());
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Worker
// ───────────────────────────────────────────────────────────────

pub struct UplinkWorker {
    uplinks: Vec<Box<dyn Uplink + Send>>,
    stats: Arc<ForwardStats>,
}

impl UplinkWorker {
    pub fn new(stats: Arc<ForwardStats>) -> Self {
        Self {
            uplinks: Vec::new(),
            stats,
        }
    }

    pub fn with(mut self, uplink: impl Uplink + Send + 'static) -> Self {
        self.uplinks.push(Box::new(uplink));
        self
    }

    pub fn handle(&mut self, msg: Outbound) {
        match msg {
            Outbound::Report(report) => {
                for up in &mut self.uplinks {
                    let result = up.send(&report);
                    match result {
                        Ok(()) => debug!("Forward: {:?} ok", up.kind()),
                        Err(UplinkError::Offline) => continue,
                        Err(e) => warn!("Forward: {:?} failed: {e}", up.kind()),
                    }
                    self.stats.record(up.kind(), result);
                }
            }
            Outbound::Reconfigure(config) => {
                for up in &mut self.uplinks {
                    up.reconfigure(&config);
                }
                info!("Forward: uplinks reconfigured");
            }
        }
    }

    /// Block on the outbox until every sender is gone.
    pub fn run(mut self, outbox: Outbox) {
        while let Some(msg) = outbox.recv() {
            self.handle(msg);
        }
        info!("Forward: worker stopped");
    }
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF uplinks
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub use esp::{EmoncmsUplink, MqttUplink};

#[cfg(target_os = "espidf")]
mod esp {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use esp_idf_svc::http::Method;
    use esp_idf_svc::http::client::{Configuration, EspHttpConnection};
    use esp_idf_svc::mqtt::client::{EspMqttClient, EventPayload, MqttClientConfiguration, QoS};
    use log::{info, warn};

    use super::{Uplink, UplinkError, UplinkKind, emoncms_url, mqtt_messages};
    use crate::app::report::Report;
    use crate::config::{DeviceConfig, EmoncmsConfig, MqttConfig};

    pub struct EmoncmsUplink {
        config: EmoncmsConfig,
        connected: bool,
    }

    impl EmoncmsUplink {
        pub fn new(config: &DeviceConfig) -> Self {
            Self {
                config: config.emoncms.clone(),
                connected: false,
            }
        }
    }

    impl Uplink for EmoncmsUplink {
        fn kind(&self) -> UplinkKind {
            UplinkKind::Emoncms
        }

        fn reconfigure(&mut self, config: &DeviceConfig) {
            self.config = config.emoncms.clone();
        }

        fn send(&mut self, report: &Report) -> Result<(), UplinkError> {
            let url = emoncms_url(&self.config, report).ok_or(UplinkError::Offline)?;
            let conf = Configuration {
                crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
                ..Default::default()
            };
            let mut conn = EspHttpConnection::new(&conf).map_err(|_| UplinkError::Transport)?;
            conn.initiate_request(Method::Get, &url, &[])
                .map_err(|_| UplinkError::Transport)?;
            conn.initiate_response().map_err(|_| UplinkError::Transport)?;
            let status = conn.status();
            self.connected = (200..300).contains(&status);
            if self.connected {
                Ok(())
            } else {
                Err(UplinkError::Rejected(status))
            }
        }

        fn is_connected(&self) -> bool {
            self.connected
        }
    }

    pub struct MqttUplink {
        config: MqttConfig,
        client: Option<EspMqttClient<'static>>,
        connected: Arc<AtomicBool>,
    }

    impl MqttUplink {
        pub fn new(config: &DeviceConfig) -> Self {
            let mut up = Self {
                config: config.mqtt.clone(),
                client: None,
                connected: Arc::new(AtomicBool::new(false)),
            };
            up.connect();
            up
        }

        fn connect(&mut self) {
            self.client = None;
            self.connected.store(false, Ordering::Relaxed);
            if !self.config.is_enabled() {
                return;
            }
            let url = format!("mqtt://{}", self.config.server);
            let conf = MqttClientConfiguration {
                client_id: Some(crate::adapters::device_id::HOSTNAME),
                username: (!self.config.user.is_empty()).then_some(self.config.user.as_str()),
                password: (!self.config.pass.is_empty()).then_some(self.config.pass.as_str()),
                ..Default::default()
            };
            let flag = Arc::clone(&self.connected);
            match EspMqttClient::new_cb(&url, &conf, move |ev| match ev.payload() {
                EventPayload::Connected(_) => flag.store(true, Ordering::Relaxed),
                EventPayload::Disconnected => flag.store(false, Ordering::Relaxed),
                _ => {}
            }) {
                Ok(client) => {
                    info!("Forward: MQTT client for {url}");
                    self.client = Some(client);
                }
                Err(e) => warn!("Forward: MQTT client failed: {e}"),
            }
        }
    }

    impl Uplink for MqttUplink {
        fn kind(&self) -> UplinkKind {
            UplinkKind::Mqtt
        }

        fn reconfigure(&mut self, config: &DeviceConfig) {
            self.config = config.mqtt.clone();
            self.connect();
        }

        fn send(&mut self, report: &Report) -> Result<(), UplinkError> {
            if !self.is_connected() {
                return Err(UplinkError::Offline);
            }
            let client = self.client.as_mut().ok_or(UplinkError::Offline)?;
            for (topic, payload) in mqtt_messages(&self.config, report) {
                client
                    .enqueue(&topic, QoS::AtMostOnce, false, payload.as_bytes())
                    .map_err(|_| UplinkError::Transport)?;
            }
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::Relaxed)
        }
    }
}
