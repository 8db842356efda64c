//! emonDC Firmware: Main Entry Point
//!
//! Hexagonal architecture with a single cooperative sampling loop.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  SerialLink       LogEventSink   NvsAdapter    SystemClock     │
//! │  (SampleSource)   SdLogger       (Config+NVS)  NetworkManager  │
//! │                   Forwarder                    MdnsAdapter     │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │              AppService (pure logic)                   │    │
//! │  │  FSM · Meter · Accumulators · Battery model            │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  Scheduler (named deadlines) · HTTP server task → CMD_CHANNEL  │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

mod pins;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use embedded_io::{ErrorKind, ErrorType, Read, ReadReady, Write as _};
use esp_idf_hal::delay::NON_BLOCK;
use esp_idf_hal::gpio::{AnyIOPin, PinDriver, Pull};
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_hal::spi::{SpiDriver, SpiDriverConfig};
use esp_idf_hal::uart::{UartDriver, config::Config as UartConfig};
use esp_idf_hal::units::Hertz;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::fs::fatfs::Fatfs;
use esp_idf_svc::http::server::{Configuration as HttpConfig, EspHttpConnection, EspHttpServer};
use esp_idf_svc::io::vfs::MountedFatfs;
use esp_idf_svc::sd::spi::SdSpiHostDriver;
use esp_idf_svc::sd::{SdCardConfiguration, SdCardDriver};
use esp_idf_svc::wifi::EspWifi;
use log::{error, info, warn};

use emondc::adapters::device::SharedDevice;
use emondc::adapters::device_id::{self, HOSTNAME};
use emondc::adapters::forward::{self, EmoncmsUplink, ForwardStats, MqttUplink, UplinkWorker};
use emondc::adapters::log_sink::LogEventSink;
use emondc::adapters::mdns::MdnsAdapter;
use emondc::adapters::nvs::NvsAdapter;
use emondc::adapters::sd_card::{FsSdCard, MOUNT_POINT};
use emondc::adapters::sd_logger::SdLogger;
use emondc::adapters::time::SystemClock;
use emondc::adapters::wifi::{EspRadio, NetworkEvent, NetworkManager};
use emondc::app::channels;
use emondc::app::commands::AppCommand;
use emondc::app::ports::{ConfigPort, ScheduleFiredKind, SchedulerDelegate};
use emondc::app::service::AppService;
use emondc::config::{ACCUMULATOR_PERSIST_SECS, DeviceConfig};
use emondc::scheduler::{MAX_DEADLINES, Scheduler, TaskId};
use emondc::serial::SerialLink;
use emondc::web::sd::CHUNK_SIZE;
use emondc::web::request::MAX_FORM_BODY;
use emondc::web::{Method, Reply, Request, Response, Router};

/// Main loop period.  Sampling itself runs on the `Sample` deadline.
const LOOP_PERIOD_MS: u64 = 50;
const HTTP_STACK_SIZE: usize = 10 * 1024;
const UPLINK_STACK_SIZE: usize = 12 * 1024;

// ── Sensor UART ───────────────────────────────────────────────
//
// `SerialLink` reads through `embedded_io`; the driver is wrapped so the
// reads never block the loop.

struct SensorUart(UartDriver<'static>);

impl ErrorType for SensorUart {
    type Error = ErrorKind;
}

impl Read for SensorUart {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ErrorKind> {
        self.0.read(buf, NON_BLOCK).map_err(|_| ErrorKind::Other)
    }
}

impl ReadReady for SensorUart {
    fn read_ready(&mut self) -> Result<bool, ErrorKind> {
        self.0
            .remaining_read()
            .map(|n| n > 0)
            .map_err(|_| ErrorKind::Other)
    }
}

// ── Scheduler delegate ────────────────────────────────────────
//
// The scheduler only records what fired; the loop dispatches afterwards
// with full access to the adapters.

#[derive(Default)]
struct FiredTasks(heapless::Vec<TaskId, MAX_DEADLINES>);

impl SchedulerDelegate for FiredTasks {
    fn on_deadline(&mut self, task: TaskId, _kind: ScheduleFiredKind) {
        if self.0.push(task).is_err() {
            warn!("Scheduler: fired list full, dropping '{task}'");
        }
    }
}

// ── HTTP glue ─────────────────────────────────────────────────

type HttpRequest<'a, 'c> = esp_idf_svc::http::server::Request<&'a mut EspHttpConnection<'c>>;

fn header_list(resp: &Response) -> Vec<(&str, &str)> {
    std::iter::once(("Content-Type", resp.content_type))
        .chain(resp.headers.iter().map(|(k, v)| (*k, v.as_str())))
        .collect()
}

fn send(req: HttpRequest<'_, '_>, resp: &Response) -> Result<()> {
    let headers = header_list(resp);
    req.into_response(resp.status, None, &headers)?
        .write_all(&resp.body)?;
    Ok(())
}

fn serve(
    mut req: HttpRequest<'_, '_>,
    method: Method,
    router: &Router<FsSdCard>,
    dev: &mut SharedDevice<NvsAdapter>,
) -> Result<()> {
    let request = Request::parse(method, req.uri());

    // Uploads stream the body straight into the file.
    if method == Method::Post && request.path.starts_with("/sd/") {
        let resp = match router.begin_upload(&request) {
            Ok(mut session) => {
                let mut buf = [0u8; CHUNK_SIZE];
                loop {
                    let n = req.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    session.write_chunk(&buf[..n]).map_err(|e| anyhow!("{e}"))?;
                }
                let n = session.finish().map_err(|e| anyhow!("{e}"))?;
                info!("Web: upload complete ({n} bytes)");
                Response::ok("Ok")
            }
            Err(resp) => resp,
        };
        return send(req, &resp);
    }

    // Settings forms arrive urlencoded in the body.
    let request = if request.is_form_post() {
        let mut body = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            let n = req.read(&mut buf)?;
            if n == 0 {
                break;
            }
            if body.len() + n > MAX_FORM_BODY {
                warn!("Web: form body for {} over {MAX_FORM_BODY} bytes", request.path);
                return send(req, &Response::text(413, "Request too large"));
            }
            body.extend_from_slice(&buf[..n]);
        }
        request.with_body(body)
    } else {
        request
    };

    match router.handle(&request, dev) {
        Reply::Full(resp) => send(req, &resp),
        Reply::Stream { head, mut session } => {
            let headers = header_list(&head);
            let mut out = req.into_response(head.status, None, &headers)?;
            let mut buf = [0u8; CHUNK_SIZE];
            loop {
                let n = session.next_chunk(&mut buf).map_err(|e| anyhow!("{e}"))?;
                if n == 0 {
                    break;
                }
                // A peer disconnect errors out here; dropping the session
                // releases the SD gate.
                out.write_all(&buf[..n])?;
            }
            info!("Web: sent {} ({} bytes)", session.file_name(), session.bytes_sent());
            Ok(())
        }
    }
}

fn start_http(router: Arc<Router<FsSdCard>>, device: SharedDevice<NvsAdapter>) -> Result<EspHttpServer<'static>> {
    let mut server = EspHttpServer::new(&HttpConfig {
        stack_size: HTTP_STACK_SIZE,
        uri_match_wildcard: true,
        ..Default::default()
    })?;
    for (esp_method, method) in [
        (esp_idf_svc::http::Method::Get, Method::Get),
        (esp_idf_svc::http::Method::Post, Method::Post),
        (esp_idf_svc::http::Method::Delete, Method::Delete),
        (esp_idf_svc::http::Method::Options, Method::Options),
    ] {
        let router = Arc::clone(&router);
        let device = device.clone();
        server.fn_handler::<anyhow::Error, _>("/*", esp_method, move |req| {
            let mut dev = device.clone();
            serve(req, method, &router, &mut dev)
        })?;
    }
    info!("Web: HTTP server listening on :80");
    Ok(server)
}

// ── SD card ───────────────────────────────────────────────────

fn sd_capacity() -> u64 {
    let mut total: u64 = 0;
    let mut free: u64 = 0;
    let ret = unsafe { esp_idf_svc::sys::esp_vfs_fat_info(c"/sdcard".as_ptr(), &mut total, &mut free) };
    if ret == esp_idf_svc::sys::ESP_OK { total } else { 0 }
}

// ── Main ──────────────────────────────────────────────────────

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  emonDC v{}                          ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let clock = SystemClock::new();

    // ── 2. Load config from NVS (or defaults) ─────────────────
    let mut nvs = NvsAdapter::new().map_err(|e| anyhow!("NVS init failed: {e}"))?;
    let config = match nvs.load() {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("NVS config load failed ({e}), using defaults");
            DeviceConfig::default()
        }
    };

    // ── 3. SD card ────────────────────────────────────────────
    let mount = (|| -> Result<_> {
        let spi = SpiDriver::new(
            peripherals.spi3,
            unsafe { AnyIOPin::new(pins::SD_SCK_GPIO) },
            unsafe { AnyIOPin::new(pins::SD_MOSI_GPIO) },
            Some(unsafe { AnyIOPin::new(pins::SD_MISO_GPIO) }),
            &SpiDriverConfig::default(),
        )?;
        let host = SdSpiHostDriver::new(
            spi,
            Some(unsafe { AnyIOPin::new(pins::SD_CS_GPIO) }),
            Option::<AnyIOPin>::None,
            Option::<AnyIOPin>::None,
            Option::<AnyIOPin>::None,
            None,
        )?;
        let card = SdCardDriver::new_spi(host, &SdCardConfiguration::new())?;
        Ok(MountedFatfs::mount(Fatfs::new_sdcard(0, card)?, MOUNT_POINT, 4)?)
    })();
    let _sd_mount = match mount {
        Ok(m) => {
            info!("SdCard: mounted at {MOUNT_POINT}");
            Some(m)
        }
        Err(e) => {
            warn!("SdCard: mount failed ({e}), logging disabled");
            None
        }
    };
    let sd = FsSdCard::new(MOUNT_POINT, sd_capacity());
    let router = Arc::new(Router::new(sd.clone(), emondc::web::SdGate::new()));

    // ── 4. Sensor link ────────────────────────────────────────
    let uart = UartDriver::new(
        peripherals.uart2,
        unsafe { AnyIOPin::new(pins::SENSOR_UART_TX_GPIO) },
        unsafe { AnyIOPin::new(pins::SENSOR_UART_RX_GPIO) },
        Option::<AnyIOPin>::None,
        Option::<AnyIOPin>::None,
        &UartConfig::default().baudrate(Hertz(pins::SENSOR_UART_BAUD)),
    )?;
    let mut link = SerialLink::new(SensorUart(uart));

    // ── 5. Network ────────────────────────────────────────────
    let mac = device_id::read_mac();
    let ap_ssid = device_id::ap_ssid(&mac);
    info!("Device: AP SSID {ap_ssid}, hostname {HOSTNAME}");

    let wifi = EspWifi::new(peripherals.modem, sysloop, None)?;
    let mut button = PinDriver::input(unsafe { AnyIOPin::new(pins::BUTTON_GPIO) })?;
    button.set_pull(Pull::Up)?;
    let mut net = NetworkManager::new(EspRadio::new(wifi), button, ap_ssid.as_str());
    if let Err(e) = net.rescan() {
        warn!("WiFi: scan failed: {e}");
    }
    net.begin(&config.network, clock.uptime_ms());
    let mut mdns = MdnsAdapter::new(HOSTNAME);

    // ── 6. Sinks and forwarding ───────────────────────────────
    let stats = Arc::new(ForwardStats::default());
    let (forwarder, outbound) = forward::channel();
    let worker = UplinkWorker::new(Arc::clone(&stats))
        .with(EmoncmsUplink::new(&config))
        .with(MqttUplink::new(&config));
    std::thread::Builder::new()
        .name("uplink".into())
        .stack_size(UPLINK_STACK_SIZE)
        .spawn(move || worker.run(outbound))?;

    let logger = SdLogger::new(sd, router.gate().clone(), &config.datalog_file);
    let mut sinks = (LogEventSink::new(), logger, forwarder);

    // ── 7. App service ────────────────────────────────────────
    let mut app = AppService::new(config.clone());
    match app.restore_accumulators(&nvs) {
        Ok(true) => info!("Accumulators restored from NVS"),
        Ok(false) => info!("No stored accumulators"),
        Err(e) => warn!("Accumulator restore failed: {e}"),
    }
    app.start(&mut sinks);

    let device = SharedDevice::new(nvs.clone(), config.clone(), clock.clone(), Arc::clone(&stats));
    let _http = start_http(Arc::clone(&router), device.clone())?;

    // ── 8. Deadlines ──────────────────────────────────────────
    let mut sched = Scheduler::new();
    let now = clock.uptime_ms();
    sched.schedule_periodic(TaskId::Sample, config.interval_ms(), now + config.interval_ms());
    let persist_ms = u64::from(ACCUMULATOR_PERSIST_SECS) * 1000;
    sched.schedule_periodic(TaskId::PersistAccumulators, persist_ms, now + persist_ms);

    info!("System ready. Entering main loop.");

    // ── 9. Main loop ──────────────────────────────────────────
    let mut fired = FiredTasks::default();
    loop {
        let now = clock.uptime_ms();
        link.poll();

        // Commands from the HTTP task, applied at the tick boundary.
        while let Some(cmd) = channels::next_command() {
            match cmd {
                AppCommand::InjectFrame(line) => link.inject(&line),
                AppCommand::Schedule { task, delay_ms } => {
                    sched.schedule_once(task, delay_ms, now);
                }
                AppCommand::ApOff => {
                    net.ap_off();
                }
                AppCommand::UpdateConfig(cfg) => {
                    sinks.1.set_path(&cfg.datalog_file);
                    sinks.2.reconfigure(&cfg);
                    sched.schedule_periodic(TaskId::Sample, cfg.interval_ms(), now + cfg.interval_ms());
                    app.handle_command(AppCommand::UpdateConfig(cfg), &mut sinks);
                }
                other => app.handle_command(other, &mut sinks),
            }
        }

        fired.0.clear();
        sched.tick(now, &mut fired);
        for task in fired.0.iter().copied() {
            match task {
                TaskId::Sample => {
                    app.tick(now, clock.at(now), &mut link, &mut sinks);
                    device.publish_last_line(link.last_line());
                }
                TaskId::PersistAccumulators => {
                    if app.accumulators_dirty() {
                        if let Err(e) = app.persist_accumulators(&mut nvs) {
                            warn!("Accumulator persist failed: {e}");
                        }
                    }
                }
                TaskId::WifiRestart => {
                    net.restart(&app.current_config().network, now);
                }
                TaskId::MqttRestart => sinks.2.reconfigure(&app.current_config()),
                TaskId::SystemRestart | TaskId::SystemReboot => {
                    if task == TaskId::SystemRestart && app.accumulators_dirty() {
                        if let Err(e) = app.persist_accumulators(&mut nvs) {
                            error!("Accumulator persist before restart failed: {e}");
                        }
                    }
                    info!("Restarting ({task})");
                    unsafe { esp_idf_svc::sys::esp_restart() };
                }
            }
        }

        match net.poll(now) {
            Some(NetworkEvent::Connected(_)) => mdns.start(),
            Some(NetworkEvent::LinkLost) => mdns.stop(),
            Some(NetworkEvent::AccessPointStarted) | None => {}
        }
        device.publish_network(net.status(), net.scan_results());
        device.publish_free_heap(unsafe { esp_idf_svc::sys::esp_get_free_heap_size() });

        std::thread::sleep(Duration::from_millis(LOOP_PERIOD_MS));
    }
}
