//! Shared mutable context threaded through every FSM handler.
//!
//! `FsmContext` is the single struct that state handlers read from and
//! write to.  It carries the frame acquired for the current tick, the
//! [`Meter`] with its accumulators, the configuration, and whatever the
//! tick produced.  Think of it as the "blackboard" in a blackboard
//! architecture.

use crate::app::report::Report;
use crate::config::DeviceConfig;
use crate::error::{LinkError, MeasureError};
use crate::measure::{Measurement, Meter, RawFrame};
use crate::rtc::DateTime;

// ---------------------------------------------------------------------------
// Tick outcome
// ---------------------------------------------------------------------------

/// How one sampling tick ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A report was produced and handed off.
    Reported,
    /// Acquisition failed; nothing was accumulated.
    Skipped(LinkError),
    /// The frame was read but the meter refused it; nothing was accumulated.
    Rejected(MeasureError),
}

// ---------------------------------------------------------------------------
// FsmContext
// ---------------------------------------------------------------------------

/// The shared context passed to every state handler function.
pub struct FsmContext {
    // -- Timing --
    /// Ticks elapsed since the current state was entered.
    pub ticks_in_state: u64,
    /// Monotonic total tick count.
    pub total_ticks: u64,
    /// Monotonic time of the sampling tick in progress.
    pub now_ms: u64,
    /// Wall-clock time, `None` until the RTC is set.
    pub wall_time: Option<DateTime>,

    // -- Input --
    /// Result of this tick's acquisition.  Consumed by `Sampling`.
    pub frame: Option<Result<RawFrame, LinkError>>,

    // -- Engine --
    pub meter: Meter,
    pub config: DeviceConfig,

    // -- Output --
    pub measurement: Option<Measurement>,
    /// Latest report.  Kept after delivery for status queries.
    pub report: Option<Report>,
    /// Set by the service once `report` has reached the sinks.
    pub delivered: bool,
    pub outcome: Option<TickOutcome>,
}

impl FsmContext {
    /// Create a new context with the given configuration.
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            ticks_in_state: 0,
            total_ticks: 0,
            now_ms: 0,
            wall_time: None,
            frame: None,
            meter: Meter::new(&config),
            config,
            measurement: None,
            report: None,
            delivered: false,
            outcome: None,
        }
    }

    /// Load the inputs for one sampling tick.
    pub fn begin_tick(
        &mut self,
        now_ms: u64,
        wall_time: Option<DateTime>,
        frame: Result<RawFrame, LinkError>,
    ) {
        self.now_ms = now_ms;
        self.wall_time = wall_time;
        self.frame = Some(frame);
        self.delivered = false;
        self.outcome = None;
    }

    /// Whether a report is waiting for delivery.
    pub fn report_pending(&self) -> bool {
        self.report.is_some() && !self.delivered
    }
}
