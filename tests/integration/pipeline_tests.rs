//! Serial link → AppService → sinks (log, SD, forwarder) → uplink worker.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use emondc::adapters::forward::{self, ForwardStats, UplinkWorker};
use emondc::adapters::sd_card::FsSdCard;
use emondc::adapters::sd_logger::SdLogger;
use emondc::app::commands::AppCommand;
use emondc::app::events::AppEvent;
use emondc::app::ports::EventSink;
use emondc::app::report::CSV_HEADER;
use emondc::app::service::AppService;
use emondc::error::{LinkError, MeasureError};
use emondc::fsm::StateId;
use emondc::fsm::context::TickOutcome;
use emondc::measure::Channel;
use emondc::serial::SerialLink;
use emondc::web::SdGate;

use super::mock_hw::{
    MemStorage, RecordingSink, RecordingUplink, ScriptedUart, bench_config, frame_line, scratch_dir,
};

const HALF_HOUR_MS: u64 = 1_800_000;

fn started_app() -> (AppService, RecordingSink) {
    let mut app = AppService::new(bench_config());
    let mut sink = RecordingSink::default();
    app.start(&mut sink);
    (app, sink)
}

fn scripted_link() -> (SerialLink<ScriptedUart>, ScriptedUart) {
    let uart = ScriptedUart::default();
    (SerialLink::new(uart.clone()), uart)
}

fn feed(link: &mut SerialLink<ScriptedUart>, uart: &ScriptedUart, line: &str) {
    uart.push(line);
    link.poll();
}

#[test]
fn hour_of_discharge_reaches_every_sink() {
    let dir = scratch_dir("pipeline");
    let gate = SdGate::new();
    let logger = SdLogger::new(FsSdCard::new(&dir, 1 << 30), gate, "/datalog.csv");
    let (forwarder, rx) = forward::channel();
    let (mut app, recorder) = started_app();
    let mut sinks = (recorder, logger, forwarder);
    let (mut link, uart) = scripted_link();

    for step in 0..3 {
        feed(&mut link, &uart, &frame_line(12.0, 2.5));
        let outcome = app.tick(step * HALF_HOUR_MS, None, &mut link, &mut sinks);
        assert_eq!(outcome, TickOutcome::Reported);
        assert_eq!(app.state(), StateId::Idle);
    }

    // Recorder: three reports, the last after one hour at 2.5 A.
    let reports = sinks.0.reports();
    assert_eq!(reports.len(), 3);
    let a = reports[2].channel(Channel::A);
    assert!((a.volts - 12.0).abs() < 1e-6);
    assert!((a.amp_hours - 2.5).abs() < 1e-6);
    assert!((a.watt_hours - 30.0).abs() < 1e-6);
    assert!(reports[2].state_of_charge < 100.0);

    // SD: header plus one row per report.
    let csv = std::fs::read_to_string(dir.join("datalog.csv")).unwrap();
    let lines: Vec<_> = csv.lines().collect();
    assert_eq!(lines[0], CSV_HEADER);
    assert_eq!(lines.len(), 4);
    assert_eq!(sinks.1.lines_written(), 3);

    // Forwarder: the worker sees every queued report.
    let stats = Arc::new(ForwardStats::default());
    let uplink = RecordingUplink::default();
    let mut worker = UplinkWorker::new(Arc::clone(&stats)).with(uplink.clone());
    for msg in rx.try_iter() {
        worker.handle(msg);
    }
    assert_eq!(uplink.sent.lock().unwrap().len(), 3);
    assert_eq!(stats.packets_sent.load(Ordering::Relaxed), 3);
    assert_eq!(stats.packets_success.load(Ordering::Relaxed), 3);
    assert!(stats.emoncms_connected.load(Ordering::Relaxed));
}

#[test]
fn unknown_reference_voltage_is_flagged_in_the_log() {
    let dir = scratch_dir("uncalibrated");
    let logger = SdLogger::new(FsSdCard::new(&dir, 1 << 30), SdGate::new(), "/datalog.csv");
    let mut cfg = bench_config();
    cfg.channels[1].reference_known = false;
    let mut app = AppService::new(cfg);
    let mut sinks = (RecordingSink::default(), logger);
    app.start(&mut sinks);
    let (mut link, uart) = scripted_link();

    feed(&mut link, &uart, &frame_line(12.0, 1.0));
    assert_eq!(app.tick(0, None, &mut link, &mut sinks), TickOutcome::Reported);

    let reports = sinks.0.reports();
    let report = reports[0];
    assert!(report.channel(Channel::A).calibrated);
    assert!(!report.channel(Channel::B).calibrated);
    assert!(report.input_string().contains(",calB:0,"));

    let csv = std::fs::read_to_string(dir.join("datalog.csv")).unwrap();
    let header: Vec<&str> = CSV_HEADER.split(',').collect();
    let row: Vec<&str> = csv.lines().nth(1).unwrap().split(',').collect();
    let col = |name: &str| row[header.iter().position(|h| *h == name).unwrap()];
    assert_eq!((col("calA"), col("calB")), ("1", "0"));
}

#[test]
fn missing_and_garbled_frames_leave_totals_alone() {
    let (mut app, mut sink) = started_app();
    let (mut link, uart) = scripted_link();

    feed(&mut link, &uart, &frame_line(12.0, 2.5));
    app.tick(0, None, &mut link, &mut sink);
    let before = app.accumulators().snapshot();

    let outcome = app.tick(HALF_HOUR_MS, None, &mut link, &mut sink);
    assert_eq!(outcome, TickOutcome::Skipped(LinkError::SerialTimeout));

    feed(&mut link, &uart, "VA:12,IA:oops\n");
    let outcome = app.tick(2 * HALF_HOUR_MS, None, &mut link, &mut sink);
    assert_eq!(outcome, TickOutcome::Skipped(LinkError::MalformedFrame));

    assert_eq!(app.accumulators().snapshot(), before);
    assert_eq!(app.state(), StateId::Idle);
    assert_eq!(sink.reports().len(), 1);
    assert_eq!(link.last_line(), "VA:12,IA:oops");
}

#[test]
fn clock_running_backwards_is_rejected() {
    let (mut app, mut sink) = started_app();
    let (mut link, uart) = scripted_link();

    feed(&mut link, &uart, &frame_line(12.0, 1.0));
    app.tick(10_000, None, &mut link, &mut sink);
    feed(&mut link, &uart, &frame_line(12.0, 1.0));
    let outcome = app.tick(5_000, None, &mut link, &mut sink);

    assert_eq!(outcome, TickOutcome::Rejected(MeasureError::NonMonotonicTime));
    assert!(sink.events.iter().any(|e| matches!(e, AppEvent::TickRejected(_))));
    assert_eq!(app.state(), StateId::Idle);
}

#[test]
fn injected_line_is_sampled_like_a_uart_line() {
    let (mut app, mut sink) = started_app();
    let (mut link, _uart) = scripted_link();

    link.inject(&frame_line(13.0, 0.0));
    assert_eq!(app.tick(0, None, &mut link, &mut sink), TickOutcome::Reported);
    let report = app.report().unwrap();
    assert!((report.channel(Channel::A).volts - 13.0).abs() < 1e-6);
}

#[test]
fn logger_buffers_while_a_download_holds_the_card() {
    let dir = scratch_dir("busy");
    let gate = SdGate::new();
    let card = FsSdCard::new(&dir, 1 << 30);
    let mut logger = SdLogger::new(card, gate.clone(), "/datalog.csv");
    let (mut app, _) = started_app();
    let (mut link, uart) = scripted_link();

    let lease = gate.try_acquire().unwrap();
    feed(&mut link, &uart, &frame_line(12.0, 1.0));
    app.tick(0, None, &mut link, &mut logger);
    assert_eq!(logger.pending(), 1);
    assert!(!dir.join("datalog.csv").exists());

    drop(lease);
    feed(&mut link, &uart, &frame_line(12.0, 1.0));
    app.tick(10_000, None, &mut link, &mut logger);
    assert_eq!(logger.pending(), 0);
    let csv = std::fs::read_to_string(dir.join("datalog.csv")).unwrap();
    assert_eq!(csv.lines().count(), 3);
}

#[test]
fn totals_survive_a_reboot() {
    let mut nvs = MemStorage::default();
    let (mut app, mut sink) = started_app();
    let (mut link, uart) = scripted_link();
    for step in 0..3 {
        feed(&mut link, &uart, &frame_line(12.0, 2.5));
        app.tick(step * HALF_HOUR_MS, None, &mut link, &mut sink);
    }
    assert!(app.accumulators_dirty());
    app.persist_accumulators(&mut nvs).unwrap();
    assert!(!app.accumulators_dirty());

    let (mut rebooted, mut sink) = started_app();
    assert!(rebooted.restore_accumulators(&nvs).unwrap());
    assert_eq!(rebooted.accumulators().snapshot(), app.accumulators().snapshot());

    // First tick after boot only re-establishes the time base.
    let (mut link, uart) = scripted_link();
    feed(&mut link, &uart, &frame_line(12.0, 2.5));
    rebooted.tick(999_999_999, None, &mut link, &mut sink);
    let a = rebooted.report().unwrap().channel(Channel::A);
    assert!((a.amp_hours - 2.5).abs() < 1e-6);
}

#[test]
fn restore_with_empty_storage_reports_nothing_stored() {
    let (mut app, _) = started_app();
    assert!(!app.restore_accumulators(&MemStorage::default()).unwrap());
}

#[test]
fn mark_full_then_reset_via_commands() {
    let (mut app, mut sink) = started_app();
    let (mut link, uart) = scripted_link();
    for step in 0..2 {
        feed(&mut link, &uart, &frame_line(12.0, 2.0));
        app.tick(step * HALF_HOUR_MS, None, &mut link, &mut sink);
    }

    app.handle_command(AppCommand::MarkFull, &mut sink);
    let a = app.accumulators().state(Channel::A);
    assert_eq!(a.amp_hours_since_full(), 0.0);
    assert!(matches!(sink.events.last(), Some(AppEvent::MarkedFull(Channel::A))));

    app.handle_command(AppCommand::ResetAccumulators, &mut sink);
    assert_eq!(app.accumulators().state(Channel::A).amp_hours, 0.0);
}

#[test]
fn full_forward_queue_drops_newest() {
    let (mut app, _) = started_app();
    let (mut link, uart) = scripted_link();
    let mut recorder = RecordingSink::default();
    feed(&mut link, &uart, &frame_line(12.0, 1.0));
    app.tick(0, None, &mut link, &mut recorder);
    let report = recorder.reports()[0].clone();

    let (mut forwarder, rx) = forward::channel();
    for _ in 0..forward::QUEUE_DEPTH + 2 {
        forwarder.emit(&AppEvent::Report(report.clone()));
    }
    assert_eq!(forwarder.dropped(), 2);
    assert_eq!(rx.try_iter().count(), forward::QUEUE_DEPTH);
}

#[test]
fn new_server_settings_survive_a_report_backlog() {
    let (mut app, _) = started_app();
    let (mut link, uart) = scripted_link();
    let mut recorder = RecordingSink::default();
    feed(&mut link, &uart, &frame_line(12.0, 1.0));
    app.tick(0, None, &mut link, &mut recorder);
    let report = recorder.reports()[0].clone();

    let (mut forwarder, rx) = forward::channel();
    for _ in 0..forward::QUEUE_DEPTH {
        forwarder.emit(&AppEvent::Report(report.clone()));
    }
    forwarder.reconfigure(&app.current_config());

    let stats = Arc::new(ForwardStats::default());
    let uplink = RecordingUplink::default();
    let mut worker = UplinkWorker::new(stats).with(uplink.clone());
    for msg in rx.try_iter() {
        worker.handle(msg);
    }
    assert_eq!(*uplink.reconfigured.lock().unwrap(), 1);
    assert_eq!(uplink.sent.lock().unwrap().len(), forward::QUEUE_DEPTH);
    assert_eq!(forwarder.dropped(), 0);
}

#[test]
fn worker_thread_drains_until_senders_are_gone() {
    let (mut forwarder, rx) = forward::channel();
    let stats = Arc::new(ForwardStats::default());
    let uplink = RecordingUplink::default();
    let worker = UplinkWorker::new(Arc::clone(&stats)).with(uplink.clone());
    let handle = std::thread::spawn(move || worker.run(rx));

    let (mut app, _) = started_app();
    let (mut link, uart) = scripted_link();
    feed(&mut link, &uart, &frame_line(12.0, 1.0));
    app.tick(0, None, &mut link, &mut forwarder);
    forwarder.reconfigure(&app.current_config());
    drop(forwarder);
    handle.join().unwrap();

    assert_eq!(uplink.sent.lock().unwrap().len(), 1);
    assert_eq!(*uplink.reconfigured.lock().unwrap(), 1);
}

#[test]
fn rejected_uplink_counts_as_sent_but_not_successful() {
    let (forwarder, rx) = forward::channel();
    let mut forwarder = forwarder;
    let stats = Arc::new(ForwardStats::default());
    let mut worker = UplinkWorker::new(Arc::clone(&stats)).with(RecordingUplink {
        reject: true,
        ..Default::default()
    });

    let (mut app, _) = started_app();
    let (mut link, uart) = scripted_link();
    feed(&mut link, &uart, &frame_line(12.0, 1.0));
    app.tick(0, None, &mut link, &mut forwarder);
    for msg in rx.try_iter() {
        worker.handle(msg);
    }

    assert_eq!(stats.packets_sent.load(Ordering::Relaxed), 1);
    assert_eq!(stats.packets_success.load(Ordering::Relaxed), 0);
    assert!(!stats.emoncms_connected.load(Ordering::Relaxed));
}
