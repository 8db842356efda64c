//! Watt-hour / Amp-hour integration.
//!
//! Rectangular (Euler) integration of power and current over each
//! sampling interval, in `f64` so drift stays bounded over multi-year
//! uptimes.  Contributions are signed: positive current discharges the
//! battery, negative current (charging) is subtracted.
//!
//! ```text
//!   ΔWh = A · V · t / 3600        ΔAh = A · t / 3600
//! ```

use serde::{Deserialize, Serialize};

use super::calibration::Channel;
use crate::error::MeasureError;

const SECS_PER_HOUR: f64 = 3600.0;

/// Running totals for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AccumulatorState {
    pub watt_hours: f64,
    pub amp_hours: f64,
    /// `amp_hours` at the last "mark as full" event.
    pub amp_hours_at_full: f64,
}

impl AccumulatorState {
    /// Amp-hours drawn since the battery was last marked full.
    pub fn amp_hours_since_full(&self) -> f64 {
        self.amp_hours - self.amp_hours_at_full
    }
}

/// Persisted form of both channels' totals.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AccumulatorSnapshot {
    pub channels: [AccumulatorState; 2],
}

/// Accumulators for both channels sharing one monotonic time base.
#[derive(Debug, Clone, Default)]
pub struct Accumulators {
    channels: [AccumulatorState; 2],
    /// Monotonic timestamp (ms) of the last committed tick.
    last_update_ms: Option<u64>,
}

impl Accumulators {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seconds between the last committed tick and `now_ms`.
    ///
    /// The first call after boot returns `0.0`: there is no interval to
    /// integrate yet.
    pub fn elapsed_since(&self, now_ms: u64) -> Result<f64, MeasureError> {
        match self.last_update_ms {
            None => Ok(0.0),
            Some(last) if now_ms < last => Err(MeasureError::NonMonotonicTime),
            Some(last) => Ok((now_ms - last) as f64 / 1000.0),
        }
    }

    /// Record `now_ms` as the time base for the next interval.
    pub fn commit(&mut self, now_ms: u64) {
        self.last_update_ms = Some(now_ms);
    }

    pub fn last_update_ms(&self) -> Option<u64> {
        self.last_update_ms
    }

    /// Integrate one interval of `amps` at `volts` into `channel`.
    ///
    /// Zero elapsed time is a no-op.  Negative (or NaN) elapsed time fails
    /// with [`MeasureError::NonMonotonicTime`] and leaves state untouched.
    pub fn accumulate(
        &mut self,
        channel: Channel,
        amps: f64,
        volts: f64,
        elapsed_secs: f64,
    ) -> Result<AccumulatorState, MeasureError> {
        if elapsed_secs.is_nan() || elapsed_secs < 0.0 {
            return Err(MeasureError::NonMonotonicTime);
        }
        let state = &mut self.channels[channel.index()];
        if elapsed_secs == 0.0 {
            return Ok(*state);
        }
        state.watt_hours += amps * volts * elapsed_secs / SECS_PER_HOUR;
        state.amp_hours += amps * elapsed_secs / SECS_PER_HOUR;
        Ok(*state)
    }

    /// Zero every accumulator (including the full-charge marker).
    ///
    /// The time base is kept so the next tick integrates only its own
    /// interval.
    pub fn reset(&mut self) {
        self.channels = [AccumulatorState::default(); 2];
    }

    /// Mark the battery on `channel` as fully charged.
    pub fn mark_full(&mut self, channel: Channel) {
        let state = &mut self.channels[channel.index()];
        state.amp_hours_at_full = state.amp_hours;
    }

    pub fn state(&self, channel: Channel) -> AccumulatorState {
        self.channels[channel.index()]
    }

    pub fn snapshot(&self) -> AccumulatorSnapshot {
        AccumulatorSnapshot {
            channels: self.channels,
        }
    }

    /// Restore persisted totals.  The monotonic time base does not survive
    /// a reboot, so the next tick starts a fresh interval.
    pub fn restore(&mut self, snapshot: &AccumulatorSnapshot) {
        self.channels = snapshot.channels;
        self.last_update_ms = None;
    }
}
