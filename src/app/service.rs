//! Application service, the hexagonal core.
//!
//! [`AppService`] owns the FSM and its context (meter, accumulators,
//! configuration).  It exposes a hardware-agnostic API.  All I/O flows
//! through port traits injected at call sites, making the entire service
//! testable with mock adapters.
//!
//! ```text
//!  SampleSource ──▶ ┌─────────────────────────┐ ──▶ EventSink
//!                   │       AppService         │
//!   StoragePort ◀──▶│  FSM · Meter · Reports   │
//!                   └─────────────────────────┘
//! ```

use log::{debug, info, warn};

use crate::config::DeviceConfig;
use crate::fsm::context::{FsmContext, TickOutcome};
use crate::fsm::states::build_state_table;
use crate::fsm::{Fsm, StateId};
use crate::measure::{AccumulatorSnapshot, Accumulators};
use crate::rtc::DateTime;

use super::commands::AppCommand;
use super::events::AppEvent;
use super::ports::{EventSink, SampleSource, StorageError, StoragePort};
use super::report::Report;

/// NVS namespace for runtime state.
pub const STATE_NAMESPACE: &str = "emondc";
/// Key of the accumulator snapshot blob.
pub const ACCUMULATOR_KEY: &str = "acc";

/// Big enough for a postcard-encoded [`AccumulatorSnapshot`].
const SNAPSHOT_BUF: usize = 128;

// ───────────────────────────────────────────────────────────────
// AppService
// ───────────────────────────────────────────────────────────────

/// The application service orchestrates all domain logic.
pub struct AppService {
    fsm: Fsm,
    ctx: FsmContext,
    tick_count: u64,
    /// Totals changed since the last successful persist.
    accumulators_dirty: bool,
}

impl AppService {
    /// Construct the service from a validated configuration.
    ///
    /// Does **not** start the FSM; call [`start`](Self::start) next.
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            fsm: Fsm::new(build_state_table(), StateId::Idle),
            ctx: FsmContext::new(config),
            tick_count: 0,
            accumulators_dirty: false,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    pub fn start(&mut self, sink: &mut impl EventSink) {
        self.fsm.start(&mut self.ctx);
        sink.emit(&AppEvent::Started(self.fsm.current_state()));
        info!("AppService started in {}", self.fsm.current_state());
    }

    // ── Per-tick orchestration ────────────────────────────────

    /// Run one sampling tick: acquire → convert → accumulate → estimate →
    /// report.
    ///
    /// The FSM walks `Idle → Sampling → Reporting → Idle` within this call.
    /// A failed acquisition or a rejected measurement returns to `Idle`
    /// without touching any accumulator.
    pub fn tick(
        &mut self,
        now_ms: u64,
        wall_time: Option<DateTime>,
        source: &mut impl SampleSource,
        sink: &mut impl EventSink,
    ) -> TickOutcome {
        self.tick_count += 1;
        let frame = source.acquire();
        self.ctx.begin_tick(now_ms, wall_time, frame);

        // One pass per state is enough to come back to Idle.
        for _ in 0..=StateId::COUNT {
            let prev = self.fsm.current_state();
            self.fsm.tick(&mut self.ctx);
            let next = self.fsm.current_state();
            if next != prev {
                sink.emit(&AppEvent::StateChanged { from: prev, to: next });
            }

            if next == StateId::Reporting && self.ctx.report_pending() {
                self.deliver(sink);
            }
            if next == StateId::Idle && self.ctx.outcome.is_some() {
                break;
            }
        }

        if self.fsm.current_state() != StateId::Idle {
            warn!("AppService: tick did not settle, forcing Idle");
            self.fsm.force_transition(StateId::Idle, &mut self.ctx);
        }

        let outcome = self
            .ctx
            .outcome
            .take()
            .unwrap_or(TickOutcome::Skipped(crate::error::LinkError::SerialTimeout));
        match outcome {
            TickOutcome::Reported => self.accumulators_dirty = true,
            TickOutcome::Skipped(e) => sink.emit(&AppEvent::TickSkipped(e)),
            TickOutcome::Rejected(e) => sink.emit(&AppEvent::TickRejected(e)),
        }
        outcome
    }

    fn deliver(&mut self, sink: &mut impl EventSink) {
        if let Some(report) = &self.ctx.report {
            sink.emit(&AppEvent::Report(report.clone()));
        }
        if let Some((from, to)) = self.ctx.measurement.and_then(|m| m.alarm_change) {
            sink.emit(&AppEvent::AlarmChanged { from, to });
        }
        self.ctx.delivered = true;
    }

    // ── Command handling ──────────────────────────────────────

    /// Apply a command at the tick boundary.
    ///
    /// Commands that concern the network or the scheduler are handled by
    /// the main loop and ignored here.
    pub fn handle_command(&mut self, cmd: AppCommand, sink: &mut impl EventSink) {
        match cmd {
            AppCommand::UpdateConfig(config) => {
                self.ctx.meter.reconfigure(&config);
                self.ctx.config = *config;
                sink.emit(&AppEvent::ConfigApplied);
                info!("AppService: configuration applied");
            }
            AppCommand::ResetAccumulators => {
                self.ctx.meter.accumulators_mut().reset();
                self.accumulators_dirty = true;
                sink.emit(&AppEvent::AccumulatorsReset);
                info!("AppService: accumulators reset");
            }
            AppCommand::MarkFull => {
                let ch = self.ctx.meter.battery_channel();
                self.ctx.meter.accumulators_mut().mark_full(ch);
                self.accumulators_dirty = true;
                sink.emit(&AppEvent::MarkedFull(ch));
                info!("AppService: battery on channel {ch} marked full");
            }
            AppCommand::InjectFrame(_) | AppCommand::Schedule { .. } | AppCommand::ApOff => {
                debug!("AppService: {cmd:?} is handled by the main loop");
            }
        }
    }

    // ── Persistence ───────────────────────────────────────────

    /// Write the accumulator totals to storage.
    pub fn persist_accumulators(&mut self, storage: &mut impl StoragePort) -> Result<(), StorageError> {
        let bytes = postcard::to_allocvec(&self.ctx.meter.accumulators().snapshot())
            .map_err(|_| StorageError::Corrupted)?;
        storage.write(STATE_NAMESPACE, ACCUMULATOR_KEY, &bytes)?;
        self.accumulators_dirty = false;
        debug!("AppService: accumulators persisted ({} bytes)", bytes.len());
        Ok(())
    }

    /// Load accumulator totals saved by [`persist_accumulators`](Self::persist_accumulators).
    ///
    /// Returns `Ok(false)` when nothing was stored.  The time base is reset
    /// so the first tick after boot only re-establishes it.
    pub fn restore_accumulators(&mut self, storage: &impl StoragePort) -> Result<bool, StorageError> {
        let mut buf = [0u8; SNAPSHOT_BUF];
        let len = match storage.read(STATE_NAMESPACE, ACCUMULATOR_KEY, &mut buf) {
            Ok(len) => len,
            Err(StorageError::NotFound) => return Ok(false),
            Err(e) => return Err(e),
        };
        let snapshot: AccumulatorSnapshot =
            postcard::from_bytes(&buf[..len]).map_err(|_| StorageError::Corrupted)?;
        self.ctx.meter.accumulators_mut().restore(&snapshot);
        info!("AppService: accumulators restored");
        Ok(true)
    }

    pub fn accumulators_dirty(&self) -> bool {
        self.accumulators_dirty
    }

    // ── Queries ───────────────────────────────────────────────

    /// Most recent report, if any tick has succeeded.
    pub fn report(&self) -> Option<&Report> {
        self.ctx.report.as_ref()
    }

    pub fn accumulators(&self) -> &Accumulators {
        self.ctx.meter.accumulators()
    }

    /// Current FSM state.
    pub fn state(&self) -> StateId {
        self.fsm.current_state()
    }

    /// Sampling ticks executed since startup.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Clone of the live configuration.
    pub fn current_config(&self) -> DeviceConfig {
        self.ctx.config.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LinkError;
    use crate::measure::RawFrame;

    struct Frames(Vec<Result<RawFrame, LinkError>>);

    impl SampleSource for Frames {
        fn acquire(&mut self) -> Result<RawFrame, LinkError> {
            if self.0.is_empty() {
                Err(LinkError::SerialTimeout)
            } else {
                self.0.remove(0)
            }
        }

        fn last_line(&self) -> &str {
            ""
        }
    }

    #[derive(Default)]
    struct Events(Vec<AppEvent>);

    impl EventSink for Events {
        fn emit(&mut self, event: &AppEvent) {
            self.0.push(event.clone());
        }
    }

    #[test]
    fn good_tick_emits_one_report_and_returns_to_idle() {
        let mut app = AppService::new(DeviceConfig::default());
        let mut events = Events::default();
        app.start(&mut events);

        let mut src = Frames(vec![Ok(RawFrame::default())]);
        let outcome = app.tick(1_000, None, &mut src, &mut events);

        assert_eq!(outcome, TickOutcome::Reported);
        assert_eq!(app.state(), StateId::Idle);
        let reports = events.0.iter().filter(|e| matches!(e, AppEvent::Report(_))).count();
        assert_eq!(reports, 1);
        assert!(app.report().is_some());
        assert!(app.accumulators_dirty());
    }

    #[test]
    fn timeout_emits_skip_and_no_report() {
        let mut app = AppService::new(DeviceConfig::default());
        let mut events = Events::default();
        app.start(&mut events);

        let outcome = app.tick(1_000, None, &mut Frames(vec![]), &mut events);
        assert_eq!(outcome, TickOutcome::Skipped(LinkError::SerialTimeout));
        assert!(events.0.iter().any(|e| matches!(e, AppEvent::TickSkipped(_))));
        assert!(!events.0.iter().any(|e| matches!(e, AppEvent::Report(_))));
        assert!(app.report().is_none());
    }

    #[test]
    fn reset_command_zeroes_totals() {
        let mut app = AppService::new(DeviceConfig::default());
        let mut events = Events::default();
        app.handle_command(AppCommand::ResetAccumulators, &mut events);
        assert!(matches!(events.0.last(), Some(AppEvent::AccumulatorsReset)));
        assert_eq!(app.accumulators().snapshot(), AccumulatorSnapshot::default());
    }

    #[test]
    fn update_config_is_visible() {
        let mut app = AppService::new(DeviceConfig::default());
        let mut events = Events::default();
        let cfg = DeviceConfig { interval_secs: 30, ..Default::default() };
        app.handle_command(AppCommand::UpdateConfig(Box::new(cfg)), &mut events);
        assert_eq!(app.current_config().interval_secs, 30);
    }
}
