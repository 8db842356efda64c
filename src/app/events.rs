//! Outbound application events.
//!
//! The [`AppService`](super::service::AppService) emits these through the
//! [`EventSink`](super::ports::EventSink) port.  Adapters on the other
//! side decide what to do with them: log to serial, append to the SD card,
//! forward to Emoncms.

use super::report::Report;
use crate::error::{LinkError, MeasureError};
use crate::fsm::StateId;
use crate::measure::{AlarmState, Channel};

/// Structured events emitted by the application core.
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// A sampling tick produced a report.
    Report(Report),

    /// The FSM transitioned between states.
    StateChanged { from: StateId, to: StateId },

    /// The application service has started (carries initial state).
    Started(StateId),

    /// Acquisition failed; no accumulator was touched.
    TickSkipped(LinkError),

    /// The frame arrived but the measurement was rejected.
    TickRejected(MeasureError),

    /// Battery voltage crossed an alarm threshold.
    AlarmChanged { from: AlarmState, to: AlarmState },

    /// All accumulators were zeroed.
    AccumulatorsReset,

    /// The battery on this channel was marked fully charged.
    MarkedFull(Channel),

    /// A new configuration took effect.
    ConfigApplied,
}
