//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to
//! the ESP-IDF logger (UART in production).

use log::{error, info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;
use crate::measure::{AlarmState, Channel};

/// Adapter that logs every [`AppEvent`] to the serial console.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Report(r) => {
                let a = r.channel(Channel::A);
                let b = r.channel(Channel::B);
                info!(
                    "REPORT | A {:.3}V {:.3}A {:.2}Wh | B {:.3}V {:.3}A {:.2}Wh | SOC {:.1}% | {}",
                    a.volts, a.amps, a.watt_hours, b.volts, b.amps, b.watt_hours,
                    r.state_of_charge, r.alarm,
                );
            }
            AppEvent::StateChanged { from, to } => {
                log::debug!("STATE | {from} -> {to}");
            }
            AppEvent::Started(state) => {
                info!("START | initial_state={state}");
            }
            AppEvent::TickSkipped(e) => {
                warn!("SKIP | {e}");
            }
            AppEvent::TickRejected(e) => {
                warn!("REJECT | {e}");
            }
            AppEvent::AlarmChanged { from, to } => match to {
                AlarmState::Normal => info!("ALARM | cleared (was {from})"),
                _ => error!("ALARM | battery voltage {to}"),
            },
            AppEvent::AccumulatorsReset => info!("ACC | reset"),
            AppEvent::MarkedFull(ch) => info!("ACC | channel {ch} marked full"),
            AppEvent::ConfigApplied => info!("CONFIG | applied"),
        }
    }
}
