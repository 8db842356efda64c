//! HTTP routing.
//!
//! [`Router::handle`] maps a parsed [`Request`] to a [`Reply`].  Device
//! state is reached only through [`DevicePort`]; anything that must touch
//! the sampling loop is posted as an [`AppCommand`] and applied at the
//! next tick boundary.  SD transfers take the [`SdGate`] for their whole
//! lifetime, so a second download or upload gets 429 until the first
//! session is dropped.

use core::str::FromStr;

use log::{info, warn};

use super::request::{Method, Request};
use super::response::{OCTET_STREAM, Reply, Response};
use super::sd::{DownloadSession, SdGate, UploadSession};
use super::views::{SdListEntry, StatusSnapshot, config_json};
use crate::adapters::wifi::{AP_ADDRESS, NetworkMode, validate_password, validate_ssid};
use crate::app::commands::AppCommand;
use crate::app::ports::{ConfigError, ScanResult, SdCard};
use crate::config::DeviceConfig;
use crate::error::SdError;
use crate::measure::{BatteryType, CalibrationProfile, Channel, Gain};
use crate::rtc::DateTime;
use crate::scheduler::TaskId;
use crate::serial::codec::Line;

const SD_PREFIX: &str = "/sd";
const BUSY_MSG: &str = "Already downloading a file from SD, try again later";
const UNAVAILABLE_MSG: &str = "SD card busy or not initialized";

/// Delay before Wi-Fi is torn down after `/savenetwork`, so the reply
/// reaches the browser first.
pub const WIFI_RESTART_DELAY_MS: u64 = 2_000;
/// Delay before `/restart` and `/reset` take effect.
pub const RESTART_DELAY_MS: u64 = 1_000;

// ───────────────────────────────────────────────────────────────
// Device port
// ───────────────────────────────────────────────────────────────

/// Everything the web API needs from the rest of the firmware.
pub trait DevicePort {
    /// Current configuration.
    fn config(&self) -> DeviceConfig;

    /// Validate, persist and hand `config` to the sampling loop.
    fn save_config(&mut self, config: DeviceConfig) -> Result<(), ConfigError>;

    /// Erase the stored configuration.
    fn factory_reset(&mut self) -> Result<(), ConfigError>;

    fn status(&self) -> StatusSnapshot;

    fn set_time(&mut self, time: DateTime);

    /// Last raw line from the sensor board.
    fn last_values(&self) -> String;

    fn scan_results(&self) -> Vec<ScanResult>;

    fn network_mode(&self) -> NetworkMode;

    /// Post a command to the sampling loop.  `false` when the queue is full.
    fn submit(&mut self, cmd: AppCommand) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Router
// ───────────────────────────────────────────────────────────────

pub struct Router<S: SdCard> {
    sd: S,
    gate: SdGate,
}

impl<S: SdCard> Router<S> {
    pub fn new(sd: S, gate: SdGate) -> Self {
        Self { sd, gate }
    }

    pub fn gate(&self) -> &SdGate {
        &self.gate
    }

    pub fn handle<D: DevicePort>(&self, req: &Request, dev: &mut D) -> Reply<S::File> {
        if req.method == Method::Options {
            return Response::empty(200).into();
        }
        if let Some(card_path) = sd_path(&req.path) {
            return self.sd_route(req, card_path);
        }

        let resp = match req.path.as_str() {
            "/status" => Response::json(&dev.status()),
            "/config" => Response::json(&config_json(&dev.config())),
            "/lastvalues" => Response::ok(dev.last_values()),
            "/scan" => Response::json(&dev.scan_results()),
            "/savedc" => save_dc(req, dev),
            "/savenetwork" => save_network(req, dev),
            "/saveemoncms" => save_emoncms(req, dev),
            "/savemqtt" => save_mqtt(req, dev),
            "/saveadmin" => save_admin(req, dev),
            "/settime" => set_time(req, dev),
            "/input" => inject(req, dev),
            "/reset" => factory_reset(dev),
            "/restart" => enqueue(
                dev,
                AppCommand::Schedule {
                    task: TaskId::SystemRestart,
                    delay_ms: RESTART_DELAY_MS,
                },
                "1",
            ),
            "/apoff" => enqueue(dev, AppCommand::ApOff, "Turning AP Off"),
            "/resetah" => enqueue(dev, AppCommand::MarkFull, "Ok"),
            "/clearacc" => enqueue(dev, AppCommand::ResetAccumulators, "Ok"),
            "/download" => return self.download(&dev.config()),
            _ => not_found(dev),
        };
        resp.into()
    }

    /// Open the upload target for a `POST /sd/<file>`.  The session holds
    /// the SD gate until it is finished or dropped.
    pub fn begin_upload(&self, req: &Request) -> Result<UploadSession<S::File>, Response> {
        let Some(path) = sd_path(&req.path) else {
            return Err(Response::empty(404));
        };
        if path == "/" {
            return Err(Response::empty(405));
        }
        if !self.sd.is_present() {
            return Err(Response::text(428, UNAVAILABLE_MSG));
        }
        if self.sd.stat(path).is_ok_and(|e| e.is_dir) {
            return Err(Response::text(405, "Can not upload to directories"));
        }
        let lease = self
            .gate
            .try_acquire()
            .map_err(|_| Response::text(429, BUSY_MSG))?;
        let file = self.sd.create(path).map_err(|e| {
            warn!("Web: create {path} failed: {e}");
            Response::text(500, "Error opening file for write")
        })?;
        info!("Web: upload to {path}");
        Ok(UploadSession::new(file, path, lease))
    }

    fn sd_route(&self, req: &Request, path: &str) -> Reply<S::File> {
        match req.method {
            Method::Get if req.path == SD_PREFIX => self.card_info().into(),
            Method::Get => self.sd_get(path),
            Method::Delete => self.sd_delete(path).into(),
            Method::Post => match self.begin_upload(req) {
                Ok(mut session) => {
                    let written = session.write_chunk(&req.body).and_then(|()| session.finish());
                    match written {
                        Ok(n) => {
                            info!("Web: uploaded {n} bytes to {path}");
                            Response::ok("Ok").into()
                        }
                        Err(e) => Response::text(500, e.to_string()).into(),
                    }
                }
                Err(resp) => resp.into(),
            },
            _ => Response::empty(405).into(),
        }
    }

    fn card_info(&self) -> Response {
        match self.sd.card_info() {
            Ok(info) => Response::json(&info),
            Err(_) => Response::text(428, UNAVAILABLE_MSG),
        }
    }

    fn sd_get(&self, path: &str) -> Reply<S::File> {
        if !self.sd.is_present() {
            return Response::text(428, UNAVAILABLE_MSG).into();
        }
        let entry = match self.sd.stat(path) {
            Ok(e) => e,
            Err(SdError::NotFound | SdError::InvalidPath) => return path_missing(path).into(),
            Err(e) => return Response::text(e.http_status(), e.to_string()).into(),
        };
        if entry.is_dir {
            return match self.sd.list(path) {
                Ok(entries) => {
                    let listing: Vec<_> = entries.iter().map(|e| SdListEntry::new(path, e)).collect();
                    Response::json(&listing).into()
                }
                Err(e) => Response::text(e.http_status(), e.to_string()).into(),
            };
        }
        let Ok(lease) = self.gate.try_acquire() else {
            return Response::text(429, BUSY_MSG).into();
        };
        match self.sd.open(path) {
            Ok(file) => {
                let session = DownloadSession::new(file, entry.name.clone(), lease);
                Reply::Stream {
                    head: attachment_head(&entry.name),
                    session,
                }
            }
            Err(e) => Response::text(e.http_status(), e.to_string()).into(),
        }
    }

    fn sd_delete(&self, path: &str) -> Response {
        if path == "/" {
            return Response::empty(405);
        }
        if !self.sd.is_present() {
            return Response::text(428, UNAVAILABLE_MSG);
        }
        match self.sd.stat(path) {
            Ok(e) if e.is_dir => return Response::text(405, "Can not delete directories"),
            Ok(_) => {}
            Err(_) => return path_missing(path),
        }
        let Ok(_lease) = self.gate.try_acquire() else {
            return Response::text(429, BUSY_MSG);
        };
        match self.sd.remove(path) {
            Ok(()) => {
                info!("Web: deleted {path}");
                Response::ok("Ok")
            }
            Err(e) => Response::text(e.http_status(), e.to_string()),
        }
    }

    /// Stream the configured datalog file.
    fn download(&self, config: &DeviceConfig) -> Reply<S::File> {
        let path = config.datalog_file.as_str();
        if !self.sd.is_present() {
            return Response::text(500, UNAVAILABLE_MSG).into();
        }
        let Ok(lease) = self.gate.try_acquire() else {
            return Response::text(500, UNAVAILABLE_MSG).into();
        };
        let opened = self
            .sd
            .stat(path)
            .and_then(|entry| self.sd.open(path).map(|file| (entry, file)));
        match opened {
            Ok((entry, file)) => Reply::Stream {
                head: attachment_head(&entry.name),
                session: DownloadSession::new(file, entry.name, lease),
            },
            Err(_) => Response::text(500, format!("Could not open {path}")).into(),
        }
    }
}

/// Card path for an `/sd...` request path; `/sd` and `/sd/` both map to
/// the root.
fn sd_path(path: &str) -> Option<&str> {
    match path.strip_prefix(SD_PREFIX)? {
        "" => Some("/"),
        rest if rest.starts_with('/') => Some(rest),
        _ => None,
    }
}

fn path_missing(path: &str) -> Response {
    Response::text(404, format!("Path \"{path}\" does not exist"))
}

fn attachment_head(name: &str) -> Response {
    Response::new(200, OCTET_STREAM, Vec::new())
        .with_header("Content-Disposition", format!("attachment; filename=\"{name}\""))
}

fn not_found<D: DevicePort>(dev: &D) -> Response {
    if dev.network_mode() == NetworkMode::ApOnly {
        let [a, b, c, d] = AP_ADDRESS;
        Response::redirect(format!("http://{a}.{b}.{c}.{d}"))
    } else {
        Response::text(404, "Not found")
    }
}

fn enqueue<D: DevicePort>(dev: &mut D, cmd: AppCommand, body: &str) -> Response {
    if dev.submit(cmd) {
        Response::ok(body)
    } else {
        Response::text(503, "command queue full")
    }
}

fn save<D: DevicePort>(dev: &mut D, config: DeviceConfig) -> Result<(), Response> {
    dev.save_config(config).map_err(|e| match e {
        ConfigError::ValidationFailed(msg) => Response::text(400, msg),
        ConfigError::Busy => Response::text(503, "command queue full"),
        other => {
            warn!("Web: config save failed: {other}");
            Response::text(500, other.to_string())
        }
    })
}

// ───────────────────────────────────────────────────────────────
// Form parsing
// ───────────────────────────────────────────────────────────────

fn malformed(name: &str) -> Response {
    Response::text(400, format!("malformed parameter {name}"))
}

/// Overwrite `slot` when `name` is present.
fn field<T: FromStr>(req: &Request, name: &str, slot: &mut T) -> Result<(), Response> {
    if let Some(raw) = req.arg(name) {
        *slot = raw.trim().parse().map_err(|_| malformed(name))?;
    }
    Ok(())
}

fn flag(req: &Request, name: &str, slot: &mut bool) -> Result<(), Response> {
    if let Some(raw) = req.arg(name) {
        *slot = match raw.trim() {
            "1" | "true" | "on" => true,
            "0" | "false" | "off" => false,
            _ => return Err(malformed(name)),
        };
    }
    Ok(())
}

fn text<const N: usize>(value: &str, name: &str, slot: &mut heapless::String<N>) -> Result<(), Response> {
    *slot = heapless::String::try_from(value).map_err(|()| Response::text(400, format!("{name} too long")))?;
    Ok(())
}

fn apply_channel(req: &Request, ch: Channel, p: &mut CalibrationProfile) -> Result<(), Response> {
    let s = ch.suffix();
    field(req, &format!("ical{s}"), &mut p.current_scale)?;
    field(req, &format!("vcal{s}"), &mut p.voltage_scale)?;
    flag(req, &format!("chan{s}_VrefSet"), &mut p.reference_known)?;
    field(req, &format!("chan{s}_Vref"), &mut p.reference_volts)?;
    let gain_key = format!("channel{s}_gain");
    if let Some(raw) = req.arg(&gain_key) {
        let value: u16 = raw.trim().parse().map_err(|_| malformed(&gain_key))?;
        p.gain = Gain::try_from(value).map_err(|_| malformed(&gain_key))?;
    }
    field(req, &format!("R1_{s}"), &mut p.divider_r1)?;
    field(req, &format!("R2_{s}"), &mut p.divider_r2)?;
    field(req, &format!("Rshunt_{s}"), &mut p.shunt_ohms)?;
    field(req, &format!("AmpOffset_{s}"), &mut p.current_offset)?;
    field(req, &format!("VoltOffset_{s}"), &mut p.voltage_offset)?;
    Ok(())
}

/// Apply the `/savedc` parameters to `cfg`.  Absent parameters keep their
/// current value.
fn apply_dc_form(req: &Request, cfg: &mut DeviceConfig) -> Result<(), Response> {
    field(req, "interval", &mut cfg.interval_secs)?;
    for ch in Channel::ALL {
        apply_channel(req, ch, cfg.profile_mut(ch))?;
    }

    let b = &mut cfg.battery;
    if let Some(raw) = req.arg("BattType") {
        let code: u16 = raw.trim().parse().map_err(|_| malformed("BattType"))?;
        b.battery_type = BatteryType::try_from(code).map_err(|_| malformed("BattType"))?;
    }
    field(req, "BattCapacity", &mut b.capacity_ah)?;
    field(req, "BattCapHr", &mut b.capacity_hour_rating)?;
    field(req, "BattNom", &mut b.nominal_volts)?;
    field(req, "BattVoltsAlarmHigh", &mut b.alarm_high_volts)?;
    field(req, "BattVoltsAlarmLow", &mut b.alarm_low_volts)?;
    field(req, "BattPeukert", &mut b.peukert_exponent)?;
    field(req, "BattTempCo", &mut b.temperature_coefficient)?;
    field(req, "BattChannel", &mut cfg.battery_channel)?;
    if let Some(path) = req.arg("datalog") {
        text(path, "datalog", &mut cfg.datalog_file)?;
    }
    Ok(())
}

// ───────────────────────────────────────────────────────────────
// Handlers
// ───────────────────────────────────────────────────────────────

fn save_dc<D: DevicePort>(req: &Request, dev: &mut D) -> Response {
    let mut cfg = dev.config();
    if let Err(resp) = apply_dc_form(req, &mut cfg) {
        return resp;
    }
    match save(dev, cfg) {
        Ok(()) => Response::ok("saved"),
        Err(resp) => resp,
    }
}

fn save_network<D: DevicePort>(req: &Request, dev: &mut D) -> Response {
    let ssid = req.arg_or_empty("ssid");
    let pass = req.arg_or_empty("pass");
    if ssid.is_empty() {
        return Response::text(400, "No SSID");
    }
    if let Err(e) = validate_ssid(ssid).and_then(|()| validate_password(pass)) {
        return Response::text(400, e.to_string());
    }
    let mut cfg = dev.config();
    let parsed = text(ssid, "ssid", &mut cfg.network.ssid).and_then(|()| text(pass, "pass", &mut cfg.network.pass));
    if let Err(resp) = parsed.and_then(|()| save(dev, cfg)) {
        return resp;
    }
    info!("Web: network '{ssid}' saved");
    enqueue(
        dev,
        AppCommand::Schedule {
            task: TaskId::WifiRestart,
            delay_ms: WIFI_RESTART_DELAY_MS,
        },
        "saved",
    )
}

fn save_emoncms<D: DevicePort>(req: &Request, dev: &mut D) -> Response {
    let mut cfg = dev.config();
    let e = &mut cfg.emoncms;
    let parsed = text(req.arg_or_empty("server"), "server", &mut e.server)
        .and_then(|()| text(req.arg_or_empty("path"), "path", &mut e.path))
        .and_then(|()| text(req.arg_or_empty("node"), "node", &mut e.node))
        .and_then(|()| text(req.arg_or_empty("apikey"), "apikey", &mut e.apikey))
        .and_then(|()| text(req.arg_or_empty("fingerprint"), "fingerprint", &mut e.fingerprint));
    let body = format!(
        "Saved: {} {} {} {} {}",
        e.server, e.path, e.node, e.apikey, e.fingerprint
    );
    match parsed.and_then(|()| save(dev, cfg)) {
        Ok(()) => Response::ok(body),
        Err(resp) => resp,
    }
}

fn save_mqtt<D: DevicePort>(req: &Request, dev: &mut D) -> Response {
    let mut cfg = dev.config();
    let m = &mut cfg.mqtt;
    let parsed = text(req.arg_or_empty("server"), "server", &mut m.server)
        .and_then(|()| text(req.arg_or_empty("topic"), "topic", &mut m.topic))
        .and_then(|()| text(req.arg_or_empty("prefix"), "prefix", &mut m.feed_prefix))
        .and_then(|()| text(req.arg_or_empty("user"), "user", &mut m.user))
        .and_then(|()| text(req.arg_or_empty("pass"), "pass", &mut m.pass));
    let body = format!(
        "Saved: {} {} {} {} {}",
        m.server, m.topic, m.feed_prefix, m.user, m.pass
    );
    if let Err(resp) = parsed.and_then(|()| save(dev, cfg)) {
        return resp;
    }
    enqueue(
        dev,
        AppCommand::Schedule {
            task: TaskId::MqttRestart,
            delay_ms: 0,
        },
        &body,
    )
}

fn save_admin<D: DevicePort>(req: &Request, dev: &mut D) -> Response {
    let mut cfg = dev.config();
    let parsed = text(req.arg_or_empty("user"), "user", &mut cfg.admin.username)
        .and_then(|()| text(req.arg_or_empty("pass"), "pass", &mut cfg.admin.password));
    match parsed.and_then(|()| save(dev, cfg)) {
        Ok(()) => Response::ok("saved"),
        Err(resp) => resp,
    }
}

fn set_time<D: DevicePort>(req: &Request, dev: &mut D) -> Response {
    match req.arg("time").map(DateTime::parse_iso8601) {
        Some(Ok(t)) => {
            dev.set_time(t);
            Response::ok("set")
        }
        _ => Response::text(400, "could not parse time"),
    }
}

fn inject<D: DevicePort>(req: &Request, dev: &mut D) -> Response {
    let input = req.arg_or_empty("string");
    match Line::try_from(input) {
        Ok(line) => enqueue(dev, AppCommand::InjectFrame(line), input),
        Err(()) => Response::text(400, "input too long"),
    }
}

fn factory_reset<D: DevicePort>(dev: &mut D) -> Response {
    if let Err(e) = dev.factory_reset() {
        warn!("Web: factory reset failed: {e}");
        return Response::text(500, e.to_string());
    }
    warn!("Web: factory reset, rebooting");
    enqueue(
        dev,
        AppCommand::Schedule {
            task: TaskId::SystemReboot,
            delay_ms: RESTART_DELAY_MS,
        },
        "1",
    )
}
