//! HTTP API → SharedDevice → NVS / command queue / SD card.

use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use embedded_hal::digital::{ErrorType, InputPin};
use emondc::adapters::device::SharedDevice;
use emondc::adapters::forward::ForwardStats;
use emondc::adapters::nvs::NvsAdapter;
use emondc::adapters::sd_card::FsSdCard;
use emondc::adapters::sd_logger::SdLogger;
use emondc::adapters::time::SystemClock;
use emondc::adapters::wifi::{NetworkManager, POLL_INTERVAL_MS, SimRadio};
use emondc::app::commands::AppCommand;
use emondc::app::ports::ConfigPort;
use emondc::app::service::AppService;
use emondc::config::DeviceConfig;
use emondc::measure::Channel;
use emondc::scheduler::TaskId;
use emondc::serial::SerialLink;
use emondc::web::{Method, Reply, Request, Response, Router, SdGate};

use super::mock_hw::{ScriptedUart, bench_config, frame_line, scratch_dir};

struct Button;

impl ErrorType for Button {
    type Error = Infallible;
}

impl InputPin for Button {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        Ok(true)
    }
    fn is_low(&mut self) -> Result<bool, Infallible> {
        Ok(false)
    }
}

struct Rig {
    router: Router<FsSdCard>,
    device: SharedDevice<NvsAdapter>,
    nvs: NvsAdapter,
    commands: Arc<Mutex<Vec<AppCommand>>>,
    dir: std::path::PathBuf,
}

fn rig(name: &str) -> Rig {
    rig_with_queue(name, true)
}

/// `accepting = false` models a command channel that stays full.
fn rig_with_queue(name: &str, accepting: bool) -> Rig {
    let dir = scratch_dir(name);
    let nvs = NvsAdapter::new().unwrap();
    let commands = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&commands);
    let device = SharedDevice::new(
        nvs.clone(),
        bench_config(),
        SystemClock::new(),
        Arc::new(ForwardStats::default()),
    )
    .with_command_sink(move |cmd| {
        if accepting {
            log.lock().unwrap().push(cmd);
        }
        accepting
    });
    Rig {
        router: Router::new(FsSdCard::new(&dir, 1 << 30), SdGate::new()),
        device,
        nvs,
        commands,
        dir,
    }
}

impl Rig {
    fn call(&mut self, method: Method, uri: &str) -> Reply<std::fs::File> {
        let req = Request::parse(method, uri);
        self.router.handle(&req, &mut self.device)
    }

    fn get(&mut self, uri: &str) -> Response {
        self.call(Method::Get, uri)
            .into_full()
            .expect("expected a complete response")
    }

    fn post_form(&mut self, uri: &str, body: &str) -> Response {
        let req = Request::parse(Method::Post, uri).with_body(body);
        self.router
            .handle(&req, &mut self.device)
            .into_full()
            .expect("expected a complete response")
    }

    fn json(&mut self, uri: &str) -> serde_json::Value {
        let resp = self.get(uri);
        assert_eq!(resp.status, 200, "{uri}: {}", resp.body_str());
        serde_json::from_slice(&resp.body).unwrap()
    }

    fn take_commands(&self) -> Vec<AppCommand> {
        std::mem::take(&mut *self.commands.lock().unwrap())
    }
}

fn drain(reply: Reply<std::fs::File>) -> Vec<u8> {
    let Reply::Stream { mut session, .. } = reply else {
        panic!("expected a stream");
    };
    let mut out = Vec::new();
    let mut buf = [0u8; 64];
    loop {
        let n = session.next_chunk(&mut buf).unwrap();
        if n == 0 {
            return out;
        }
        out.extend_from_slice(&buf[..n]);
    }
}

#[test]
fn savedc_is_persisted_and_applied_at_the_next_tick() {
    let mut rig = rig("savedc");
    let resp = rig.get("/savedc?interval=30&BattCapacity=200&BattChannel=B&icalA=1.02");
    assert_eq!(resp.status, 200, "{}", resp.body_str());

    let stored = rig.nvs.load().unwrap();
    assert_eq!(stored.interval_secs, 30);
    assert_eq!(stored.battery.capacity_ah, 200.0);
    assert_eq!(stored.battery_channel, Channel::B);
    assert_eq!(stored.profile(Channel::A).current_scale, 1.02);

    let mut app = AppService::new(bench_config());
    let mut sink = super::mock_hw::RecordingSink::default();
    for cmd in rig.take_commands() {
        app.handle_command(cmd, &mut sink);
    }
    assert_eq!(app.current_config(), stored);

    let cfg = rig.json("/config");
    assert_eq!(cfg["postInterval"], 30);
    assert_eq!(cfg["BattChannel"], "B");
}

#[test]
fn browser_forms_post_their_fields_in_the_body() {
    let mut rig = rig("form-post");
    let resp = rig.post_form("/savedc", "interval=30&icalA=1.5&BattChannel=B");
    assert_eq!((resp.status, resp.body_str()), (200, "saved"));
    let stored = rig.nvs.load().unwrap();
    assert_eq!(stored.interval_secs, 30);
    assert_eq!(stored.profile(Channel::A).current_scale, 1.5);
    assert_eq!(stored.battery_channel, Channel::B);

    let resp = rig.post_form("/savenetwork", "ssid=shed&pass=password1");
    assert_eq!(resp.status, 200, "{}", resp.body_str());
    assert_eq!(rig.nvs.load().unwrap().network.ssid.as_str(), "shed");

    let resp = rig.post_form("/settime", "time=2024-01-01T00%3A00%3A00Z");
    assert_eq!(resp.status, 200, "{}", resp.body_str());
    assert_eq!(rig.json("/status")["rtc_set"], true);
}

#[test]
fn save_is_refused_while_the_loop_cannot_take_it() {
    let mut rig = rig_with_queue("savedc-busy", false);
    let resp = rig.post_form("/savedc", "interval=30&icalA=1.5");
    assert_eq!((resp.status, resp.body_str()), (503, "command queue full"));
    assert_eq!(rig.nvs.load().unwrap(), DeviceConfig::default());
    assert!(rig.take_commands().is_empty());
    let cfg = rig.json("/config");
    assert_eq!(cfg["postInterval"], bench_config().interval_secs);
}

#[test]
fn invalid_savedc_changes_nothing() {
    let mut rig = rig("savedc-bad");
    let resp = rig.get("/savedc?interval=0");
    assert_eq!(resp.status, 400);
    assert!(rig.take_commands().is_empty());
    assert_eq!(rig.nvs.load().unwrap(), DeviceConfig::default());

    let resp = rig.get("/savedc?BattCapacity=lots");
    assert_eq!(resp.status, 400);
}

#[test]
fn settime_shows_up_in_status() {
    let mut rig = rig("settime");
    assert_eq!(rig.json("/status")["rtc_set"], false);

    assert_eq!(rig.get("/settime?time=2024-01-01T00:00:00Z").status, 200);
    let status = rig.json("/status");
    assert_eq!(status["rtc_set"], true);
    assert!(status["time"].as_str().unwrap().starts_with("2024-01-01T00:00"));

    assert_eq!(rig.get("/settime?time=notadate").status, 400);
}

#[test]
fn network_state_flows_into_status_and_fallback_routing() {
    let mut rig = rig("network");
    let mut net = NetworkManager::new(SimRadio::reachable("shed"), Button, "emonDC_00AB12");

    net.begin(&DeviceConfig::default().network, 0);
    rig.device.publish_network(net.status(), net.scan_results());
    let status = rig.json("/status");
    assert_eq!(status["mode"], "AP");
    assert_eq!(status["ipaddress"], "192.168.4.1");
    let captive = rig.get("/generate_204");
    assert_eq!(captive.status, 301);
    assert_eq!(captive.header("Location"), Some("http://192.168.4.1"));

    assert_eq!(rig.get("/savenetwork?ssid=shed&pass=password1").status, 200);
    let cmds = rig.take_commands();
    assert!(cmds.iter().any(|c| matches!(
        c,
        AppCommand::Schedule { task: TaskId::WifiRestart, delay_ms: 2_000 }
    )));

    // The loop fires WifiRestart with the saved credentials.
    let creds = rig.nvs.load().unwrap().network;
    let mut now = 0;
    net.restart(&creds, now);
    for _ in 0..5 {
        now += POLL_INTERVAL_MS;
        net.poll(now);
    }
    assert!(net.is_connected());
    rig.device.publish_network(net.status(), net.scan_results());
    let status = rig.json("/status");
    assert_eq!(status["mode"], "STA+AP");
    assert_eq!(status["networks"][0], "shed");

    assert!(net.ap_off());
    rig.device.publish_network(net.status(), net.scan_results());
    assert_eq!(rig.json("/status")["mode"], "STA");
    assert_eq!(rig.get("/generate_204").status, 404);
}

#[test]
fn savenetwork_rejects_bad_credentials() {
    let mut rig = rig("network-bad");
    assert_eq!(rig.get("/savenetwork?ssid=&pass=x").status, 400);
    assert_eq!(rig.get("/savenetwork?ssid=shed&pass=short").status, 400);
    assert!(rig.take_commands().is_empty());
}

#[test]
fn factory_reset_erases_and_schedules_reboot() {
    let mut rig = rig("reset");
    assert_eq!(rig.get("/savedc?interval=60").status, 200);
    rig.take_commands();

    assert_eq!(rig.get("/reset").status, 200);
    assert_eq!(rig.nvs.load().unwrap(), DeviceConfig::default());
    assert_eq!(rig.json("/config")["postInterval"], 10);
    let cmds = rig.take_commands();
    assert!(matches!(
        cmds.as_slice(),
        [AppCommand::Schedule { task: TaskId::SystemReboot, .. }]
    ));
}

#[test]
fn one_transfer_at_a_time() {
    let mut rig = rig("sd");
    let req = Request::parse(Method::Post, "/sd/notes.txt").with_body(b"hello card".to_vec());
    let resp = rig.router.handle(&req, &mut rig.device).into_full().unwrap();
    assert_eq!(resp.status, 200);

    let listing = rig.json("/sd/");
    assert_eq!(listing[0]["name"], "notes.txt");
    assert_eq!(listing[0]["size"], 10);

    let first = rig.call(Method::Get, "/sd/notes.txt");
    assert_eq!(first.status(), 200);
    let second = rig.get("/sd/notes.txt");
    assert_eq!(second.status, 429);
    assert_eq!(rig.call(Method::Delete, "/sd/notes.txt").status(), 429);

    assert_eq!(drain(first), b"hello card");
    assert_eq!(rig.call(Method::Delete, "/sd/notes.txt").status(), 200);
    assert_eq!(rig.get("/sd/notes.txt").status, 404);
}

#[test]
fn download_streams_the_datalog_the_logger_wrote() {
    let mut rig = rig("download");
    let mut logger = SdLogger::new(
        FsSdCard::new(&rig.dir, 1 << 30),
        rig.router.gate().clone(),
        "/datalog.csv",
    );
    let mut app = AppService::new(bench_config());
    let mut link = SerialLink::new(ScriptedUart::default());
    for step in 0..2u64 {
        link.inject(&frame_line(12.5, 1.0));
        app.tick(step * 10_000, None, &mut link, &mut logger);
    }

    let body = drain(rig.call(Method::Get, "/download"));
    let text = String::from_utf8(body).unwrap();
    assert_eq!(text.lines().count(), 3);
    assert!(text.lines().nth(1).unwrap().contains(",12.500,"));
}

#[test]
fn input_and_lastvalues_round_trip_through_the_loop() {
    let mut rig = rig("input");
    let line = "VA:100,IA:0,VB:0,IB:0";
    let resp = rig.get(&format!("/input?string={line}"));
    assert_eq!(resp.status, 200);

    let mut link = SerialLink::new(ScriptedUart::default());
    for cmd in rig.take_commands() {
        if let AppCommand::InjectFrame(l) = cmd {
            link.inject(&l);
        }
    }
    let mut app = AppService::new(bench_config());
    let mut sink = super::mock_hw::RecordingSink::default();
    app.tick(0, None, &mut link, &mut sink);
    rig.device.publish_last_line(link.last_line());

    assert_eq!(rig.get("/lastvalues").body_str(), line);
}
