//! Wi-Fi network-mode manager.
//!
//! Drives the radio through [`RadioPort`] without ever blocking: every
//! call to [`NetworkManager::poll`] does at most one 500 ms step of the
//! join sequence, so the sampling loop keeps its cadence while the radio
//! is busy.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: [`EspRadio`] over `esp_idf_svc::wifi::EspWifi`.
//! - **all other targets**: [`SimRadio`] for host-side tests.
//!
//! ## Join policy
//!
//! ```text
//!  no credentials ─────────────────────────────▶ AP_ONLY
//!  credentials ──▶ STA: 20 tries ──fail──▶ retry: 15 tries (≤ 3 attempts)
//!                    │ button held                     │ all failed
//!                    ▼                                 ▼
//!                 AP_ONLY                      AP_STA_RETRY ──5 min──▶ STA
//! ```

use core::fmt;

use embedded_hal::digital::InputPin;
use log::{debug, info, warn};

use crate::app::ports::{RadioError, RadioPort, ScanResult};
use crate::config::NetworkConfig;

/// Soft-AP address.
pub const AP_ADDRESS: [u8; 4] = [192, 168, 4, 1];
/// Interval between join polls.
pub const POLL_INTERVAL_MS: u64 = 500;
/// Polls allowed for the first join attempt.
pub const FIRST_ATTEMPT_TRIES: u32 = 20;
/// Polls allowed for each later attempt.
pub const RETRY_ATTEMPT_TRIES: u32 = 15;
/// Join attempts before falling back to the access point.
pub const MAX_ATTEMPTS: u32 = 3;
/// How long `AP_STA_RETRY` waits before trying the station again.
pub const RETRY_COOLDOWN_MS: u64 = 300_000;

// ───────────────────────────────────────────────────────────────
// Modes and status
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkMode {
    /// Station only.
    Sta,
    /// Access point only, no credentials or user cancelled.
    ApOnly,
    /// Access point while (re-)joining a new network.
    ApAndSta,
    /// Access point after failed joins; the station is retried later.
    ApStaRetry,
}

impl NetworkMode {
    /// The `mode` value reported by `/status`.
    pub const fn status_str(self) -> &'static str {
        match self {
            Self::Sta => "STA",
            Self::ApOnly | Self::ApStaRetry => "AP",
            Self::ApAndSta => "STA+AP",
        }
    }

    pub const fn ap_active(self) -> bool {
        !matches!(self, Self::Sta)
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Sta => "STA",
            Self::ApOnly => "AP_ONLY",
            Self::ApAndSta => "AP_AND_STA",
            Self::ApStaRetry => "AP_STA_RETRY",
        };
        f.write_str(s)
    }
}

/// Snapshot for `/status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkStatus {
    pub mode: NetworkMode,
    pub connected: bool,
    /// SSID joined, or the AP SSID while serving the access point.
    pub network: String,
    pub ip: [u8; 4],
    pub rssi: Option<i8>,
}

impl NetworkStatus {
    pub fn ip_string(&self) -> String {
        let [a, b, c, d] = self.ip;
        format!("{a}.{b}.{c}.{d}")
    }
}

/// Something the main loop may want to react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    Connected([u8; 4]),
    LinkLost,
    AccessPointStarted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Joining { tries: u32, attempt: u32, limit: u32 },
    Connected,
    Cooldown { since_ms: u64 },
}

// ───────────────────────────────────────────────────────────────
// Manager
// ───────────────────────────────────────────────────────────────

pub struct NetworkManager<R: RadioPort, B: InputPin> {
    radio: R,
    /// Boot button; held low cancels a join.
    button: B,
    ap_ssid: String,
    credentials: NetworkConfig,
    mode: NetworkMode,
    phase: Phase,
    last_poll_ms: u64,
    scan: Vec<ScanResult>,
}

impl<R: RadioPort, B: InputPin> NetworkManager<R, B> {
    pub fn new(radio: R, button: B, ap_ssid: impl Into<String>) -> Self {
        Self {
            radio,
            button,
            ap_ssid: ap_ssid.into(),
            credentials: NetworkConfig::default(),
            mode: NetworkMode::ApOnly,
            phase: Phase::Idle,
            last_poll_ms: 0,
            scan: Vec::new(),
        }
    }

    /// Boot-time bring-up.
    pub fn begin(&mut self, credentials: &NetworkConfig, now_ms: u64) -> Option<NetworkEvent> {
        self.credentials = credentials.clone();
        let _ = self.radio.disconnect();
        if !self.credentials.has_credentials() {
            info!("WiFi: no credentials, starting access point");
            self.mode = NetworkMode::ApOnly;
            self.phase = Phase::Idle;
            return self.start_ap();
        }
        self.mode = NetworkMode::Sta;
        self.start_join(now_ms);
        None
    }

    /// Re-join with new credentials, keeping the access point up meanwhile.
    pub fn restart(&mut self, credentials: &NetworkConfig, now_ms: u64) -> Option<NetworkEvent> {
        self.credentials = credentials.clone();
        let ev = self.start_ap();
        self.mode = NetworkMode::ApAndSta;
        if self.credentials.has_credentials() {
            self.start_join(now_ms);
        } else {
            self.phase = Phase::Idle;
        }
        ev
    }

    /// Abandon the station and serve only the access point.
    pub fn cancel_to_ap(&mut self) -> Option<NetworkEvent> {
        info!("WiFi: join cancelled, access point only");
        let _ = self.radio.disconnect();
        self.mode = NetworkMode::ApOnly;
        self.phase = Phase::Idle;
        self.start_ap()
    }

    /// Drop the access point once the station is up (`/apoff`).
    pub fn ap_off(&mut self) -> bool {
        if self.phase != Phase::Connected {
            warn!("WiFi: refusing to stop the access point while not connected");
            return false;
        }
        if let Err(e) = self.radio.stop_ap() {
            warn!("WiFi: stop AP failed: {e}");
            return false;
        }
        self.mode = NetworkMode::Sta;
        info!("WiFi: access point off");
        true
    }

    /// Advance the join state machine.  Cheap when called more often than
    /// [`POLL_INTERVAL_MS`].
    pub fn poll(&mut self, now_ms: u64) -> Option<NetworkEvent> {
        if now_ms.saturating_sub(self.last_poll_ms) < POLL_INTERVAL_MS {
            return None;
        }
        self.last_poll_ms = now_ms;

        match self.phase {
            Phase::Idle => None,
            Phase::Joining { tries, attempt, limit } => {
                if self.radio.is_connected() {
                    self.phase = Phase::Connected;
                    let ip = self.radio.ip_address().unwrap_or([0; 4]);
                    info!(
                        "WiFi: connected to '{}' as {}",
                        self.credentials.ssid,
                        self.status().ip_string()
                    );
                    return Some(NetworkEvent::Connected(ip));
                }
                if self.button_held() {
                    return self.cancel_to_ap();
                }
                let tries = tries + 1;
                if tries < limit {
                    self.phase = Phase::Joining { tries, attempt, limit };
                    return None;
                }
                if attempt >= MAX_ATTEMPTS {
                    warn!("WiFi: '{}' not reachable, retry in 5 min", self.credentials.ssid);
                    self.mode = NetworkMode::ApStaRetry;
                    self.phase = Phase::Cooldown { since_ms: now_ms };
                    let _ = self.radio.disconnect();
                    return self.start_ap();
                }
                debug!("WiFi: attempt {attempt} failed, trying again");
                let _ = self.radio.disconnect();
                self.begin_join();
                self.phase = Phase::Joining {
                    tries: 0,
                    attempt: attempt + 1,
                    limit: RETRY_ATTEMPT_TRIES,
                };
                None
            }
            Phase::Connected => {
                if self.radio.is_connected() {
                    return None;
                }
                warn!("WiFi: link lost, re-joining");
                self.start_join(now_ms);
                Some(NetworkEvent::LinkLost)
            }
            Phase::Cooldown { since_ms } => {
                if now_ms.saturating_sub(since_ms) < RETRY_COOLDOWN_MS {
                    return None;
                }
                info!("WiFi: cooldown over, retrying station");
                let _ = self.radio.stop_ap();
                self.mode = NetworkMode::Sta;
                self.start_join(now_ms);
                None
            }
        }
    }

    pub fn mode(&self) -> NetworkMode {
        self.mode
    }

    pub fn is_connected(&self) -> bool {
        self.phase == Phase::Connected
    }

    pub fn status(&self) -> NetworkStatus {
        let connected = self.is_connected();
        let (network, ip) = if connected {
            (
                self.credentials.ssid.as_str().to_owned(),
                self.radio.ip_address().unwrap_or([0; 4]),
            )
        } else if self.mode.ap_active() {
            (self.ap_ssid.clone(), AP_ADDRESS)
        } else {
            (String::new(), [0; 4])
        };
        NetworkStatus {
            mode: self.mode,
            connected,
            network,
            ip,
            rssi: if connected { self.radio.rssi() } else { None },
        }
    }

    /// Results of the last scan.
    pub fn scan_results(&self) -> &[ScanResult] {
        &self.scan
    }

    /// Scan now and keep the results.
    pub fn rescan(&mut self) -> Result<&[ScanResult], RadioError> {
        self.scan = self.radio.scan()?;
        Ok(&self.scan)
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    #[cfg(test)]
    fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    // ── Internal ──────────────────────────────────────────────

    fn start_join(&mut self, now_ms: u64) {
        self.last_poll_ms = now_ms;
        self.begin_join();
        self.phase = Phase::Joining {
            tries: 0,
            attempt: 1,
            limit: FIRST_ATTEMPT_TRIES,
        };
    }

    fn begin_join(&mut self) {
        info!("WiFi: connecting to '{}'", self.credentials.ssid);
        if let Err(e) = self
            .radio
            .begin_join(&self.credentials.ssid, &self.credentials.pass)
        {
            warn!("WiFi: join request failed: {e}");
        }
    }

    fn start_ap(&mut self) -> Option<NetworkEvent> {
        match self.radio.scan() {
            Ok(found) => {
                info!("WiFi: {} networks found", found.len());
                self.scan = found;
            }
            Err(e) => warn!("WiFi: scan failed: {e}"),
        }
        match self.radio.start_ap(&self.ap_ssid) {
            Ok(()) => {
                info!("WiFi: access point '{}' at 192.168.4.1", self.ap_ssid);
                Some(NetworkEvent::AccessPointStarted)
            }
            Err(e) => {
                warn!("WiFi: access point failed: {e}");
                None
            }
        }
    }

    fn button_held(&mut self) -> bool {
        self.button.is_low().unwrap_or(false)
    }
}

// ───────────────────────────────────────────────────────────────
// Credential validation
// ───────────────────────────────────────────────────────────────

fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

pub fn validate_ssid(ssid: &str) -> Result<(), RadioError> {
    if ssid.is_empty() || ssid.len() > 32 || !is_printable_ascii(ssid) {
        return Err(RadioError::InvalidSsid);
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), RadioError> {
    if password.is_empty() {
        return Ok(());
    }
    if password.len() < 8 || password.len() > 64 {
        return Err(RadioError::InvalidPassword);
    }
    Ok(())
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF radio
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub use esp::EspRadio;

#[cfg(target_os = "espidf")]
mod esp {
    use esp_idf_svc::wifi::{
        AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration, EspWifi,
    };
    use log::warn;

    use super::{validate_password, validate_ssid};
    use crate::app::ports::{RadioError, RadioPort, ScanResult};

    pub struct EspRadio {
        wifi: EspWifi<'static>,
        ap: Option<heapless::String<32>>,
        sta: Option<(heapless::String<32>, heapless::String<64>)>,
    }

    fn driver(e: esp_idf_svc::sys::EspError) -> RadioError {
        warn!("WiFi(espidf): {e}");
        RadioError::Driver
    }

    impl EspRadio {
        pub fn new(wifi: EspWifi<'static>) -> Self {
            Self { wifi, ap: None, sta: None }
        }

        fn apply(&mut self) -> Result<(), RadioError> {
            let client = self.sta.as_ref().map(|(ssid, pass)| ClientConfiguration {
                ssid: ssid.clone(),
                password: pass.clone(),
                auth_method: if pass.is_empty() {
                    AuthMethod::None
                } else {
                    AuthMethod::WPA2Personal
                },
                ..Default::default()
            });
            let ap = self.ap.as_ref().map(|ssid| AccessPointConfiguration {
                ssid: ssid.clone(),
                auth_method: AuthMethod::None,
                ..Default::default()
            });
            let conf = match (client, ap) {
                (Some(c), Some(a)) => Configuration::Mixed(c, a),
                (Some(c), None) => Configuration::Client(c),
                (None, Some(a)) => Configuration::AccessPoint(a),
                (None, None) => Configuration::None,
            };
            self.wifi.set_configuration(&conf).map_err(driver)?;
            if !self.wifi.is_started().map_err(driver)? {
                self.wifi.start().map_err(driver)?;
            }
            Ok(())
        }
    }

    impl RadioPort for EspRadio {
        fn start_ap(&mut self, ssid: &str) -> Result<(), RadioError> {
            validate_ssid(ssid)?;
            self.ap = Some(ssid.try_into().map_err(|_| RadioError::InvalidSsid)?);
            self.apply()
        }

        fn stop_ap(&mut self) -> Result<(), RadioError> {
            self.ap = None;
            self.apply()
        }

        fn begin_join(&mut self, ssid: &str, pass: &str) -> Result<(), RadioError> {
            validate_ssid(ssid)?;
            validate_password(pass)?;
            self.sta = Some((
                ssid.try_into().map_err(|_| RadioError::InvalidSsid)?,
                pass.try_into().map_err(|_| RadioError::InvalidPassword)?,
            ));
            self.apply()?;
            self.wifi.connect().map_err(driver)
        }

        fn disconnect(&mut self) -> Result<(), RadioError> {
            if self.sta.take().is_some() {
                let _ = self.wifi.disconnect();
            }
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.wifi.is_up().unwrap_or(false)
        }

        fn rssi(&self) -> Option<i8> {
            let mut info: esp_idf_svc::sys::wifi_ap_record_t = unsafe { core::mem::zeroed() };
            let ret = unsafe { esp_idf_svc::sys::esp_wifi_sta_get_ap_info(&mut info) };
            (ret == esp_idf_svc::sys::ESP_OK).then_some(info.rssi)
        }

        fn ip_address(&self) -> Option<[u8; 4]> {
            let info = self.wifi.sta_netif().get_ip_info().ok()?;
            Some(info.ip.octets())
        }

        fn scan(&mut self) -> Result<Vec<ScanResult>, RadioError> {
            self.apply()?;
            let found = self.wifi.scan().map_err(driver)?;
            Ok(found
                .into_iter()
                .map(|ap| ScanResult {
                    ssid: ap.ssid.as_str().to_owned(),
                    rssi: ap.signal_strength,
                })
                .collect())
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Simulation radio
// ───────────────────────────────────────────────────────────────

/// Host-side radio.  Joins succeed only for `reachable`, after
/// `join_delay_polls` calls to `is_connected`.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Clone, Default)]
pub struct SimRadio {
    pub reachable: Option<String>,
    pub visible: Vec<ScanResult>,
    pub ap_ssid: Option<String>,
    pub joined: Option<String>,
    pub link_up: bool,
    pub join_requests: u32,
}

#[cfg(not(target_os = "espidf"))]
impl SimRadio {
    pub fn reachable(ssid: &str) -> Self {
        Self {
            reachable: Some(ssid.to_owned()),
            visible: vec![ScanResult { ssid: ssid.to_owned(), rssi: -55 }],
            link_up: true,
            ..Default::default()
        }
    }

    pub fn unreachable() -> Self {
        Self {
            link_up: true,
            ..Default::default()
        }
    }
}

#[cfg(not(target_os = "espidf"))]
impl RadioPort for SimRadio {
    fn start_ap(&mut self, ssid: &str) -> Result<(), RadioError> {
        validate_ssid(ssid)?;
        self.ap_ssid = Some(ssid.to_owned());
        Ok(())
    }

    fn stop_ap(&mut self) -> Result<(), RadioError> {
        self.ap_ssid = None;
        Ok(())
    }

    fn begin_join(&mut self, ssid: &str, pass: &str) -> Result<(), RadioError> {
        validate_ssid(ssid)?;
        validate_password(pass)?;
        self.join_requests += 1;
        self.joined = (self.reachable.as_deref() == Some(ssid)).then(|| ssid.to_owned());
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), RadioError> {
        self.joined = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.joined.is_some() && self.link_up
    }

    fn rssi(&self) -> Option<i8> {
        self.is_connected().then_some(-55)
    }

    fn ip_address(&self) -> Option<[u8; 4]> {
        self.is_connected().then_some([192, 168, 1, 50])
    }

    fn scan(&mut self) -> Result<Vec<ScanResult>, RadioError> {
        Ok(self.visible.clone())
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
