//! Battery state estimation.
//!
//! Peukert-corrected effective capacity, remaining capacity since the last
//! full charge, time to empty, and a three-way voltage alarm.
//!
//! ```text
//!   effective = C · ((C / I) / H)^(k − 1)
//!
//!   C  rated capacity (Ah) at the H-hour rate
//!   I  average discharge current over the last few samples (A)
//!   k  Peukert exponent (1.0 = ideal battery)
//! ```

use core::fmt;
use core::time::Duration;

use log::{error, info};
use serde::{Deserialize, Serialize};

use super::accumulator::AccumulatorState;

/// Reference temperature for the capacity temperature coefficient.
const REFERENCE_TEMP_C: f64 = 25.0;

// ---------------------------------------------------------------------------
// Battery model
// ---------------------------------------------------------------------------

/// Battery chemistry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
#[repr(u16)]
pub enum BatteryType {
    FloodedLeadAcid = 0,
    Agm = 1,
    Gel = 2,
    LiFePo4 = 3,
    LithiumIon = 4,
}

impl TryFrom<u16> for BatteryType {
    type Error = &'static str;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::FloodedLeadAcid),
            1 => Ok(Self::Agm),
            2 => Ok(Self::Gel),
            3 => Ok(Self::LiFePo4),
            4 => Ok(Self::LithiumIon),
            _ => Err("unknown battery type"),
        }
    }
}

impl From<BatteryType> for u16 {
    fn from(t: BatteryType) -> Self {
        t as u16
    }
}

/// Capacity model of the monitored battery.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryModel {
    pub battery_type: BatteryType,
    /// Rated capacity (Ah) at `capacity_hour_rating`.
    pub capacity_ah: f64,
    /// Discharge duration (hours) the rated capacity refers to, e.g. C20 → 20.
    pub capacity_hour_rating: u16,
    pub nominal_volts: f64,
    pub alarm_high_volts: f64,
    pub alarm_low_volts: f64,
    pub peukert_exponent: f64,
    /// Fractional capacity change per °C away from 25 °C.
    pub temperature_coefficient: f64,
}

impl Default for BatteryModel {
    fn default() -> Self {
        Self {
            battery_type: BatteryType::FloodedLeadAcid,
            capacity_ah: 100.0,
            capacity_hour_rating: 20,
            nominal_volts: 12.0,
            alarm_high_volts: 14.8,
            alarm_low_volts: 11.6,
            peukert_exponent: 1.2,
            temperature_coefficient: 0.0,
        }
    }
}

impl BatteryModel {
    pub fn validate(&self) -> Result<(), &'static str> {
        if !(self.capacity_ah.is_finite() && self.capacity_ah > 0.0) {
            return Err("battery capacity must be > 0");
        }
        if self.capacity_hour_rating == 0 {
            return Err("capacity hour rating must be > 0");
        }
        if !(self.peukert_exponent.is_finite() && self.peukert_exponent >= 1.0) {
            return Err("Peukert exponent must be >= 1.0");
        }
        if !self.temperature_coefficient.is_finite() {
            return Err("temperature coefficient must be finite");
        }
        if !(self.alarm_low_volts < self.nominal_volts
            && self.nominal_volts < self.alarm_high_volts)
        {
            return Err("alarm thresholds must satisfy low < nominal < high");
        }
        Ok(())
    }

    /// Peukert-corrected capacity at the present discharge current.
    ///
    /// Not discharging (`amps <= 0`) means no rate correction applies.
    pub fn effective_capacity(&self, discharge_amps: f64) -> f64 {
        if !(discharge_amps.is_finite() && discharge_amps > 0.0) {
            return self.capacity_ah;
        }
        let discharge_hours = self.capacity_ah / discharge_amps;
        let rate_ratio = discharge_hours / f64::from(self.capacity_hour_rating);
        self.capacity_ah * rate_ratio.powf(self.peukert_exponent - 1.0)
    }

    /// Multiplier applied to capacity at `temperature_c`, floored at zero.
    pub fn temperature_factor(&self, temperature_c: Option<f64>) -> f64 {
        match temperature_c {
            Some(t) if t.is_finite() => {
                (1.0 + self.temperature_coefficient * (t - REFERENCE_TEMP_C)).max(0.0)
            }
            _ => 1.0,
        }
    }

    /// Capacity of a full battery discharged at the present rate and
    /// temperature.
    pub fn effective_capacity_from_full(&self, discharge_amps: f64, temperature_c: Option<f64>) -> f64 {
        self.effective_capacity(discharge_amps) * self.temperature_factor(temperature_c)
    }

    /// Remaining capacity given what has been drawn since the last full mark.
    pub fn remaining_capacity(
        &self,
        state: &AccumulatorState,
        discharge_amps: f64,
        temperature_c: Option<f64>,
    ) -> RemainingCapacity {
        let effective_ah = self.effective_capacity_from_full(discharge_amps, temperature_c);
        // Net charge beyond the full mark cannot raise capacity above full.
        let discharged_ah = state.amp_hours_since_full().max(0.0);
        let remaining_ah = (effective_ah - discharged_ah).max(0.0);
        let state_of_charge = if effective_ah > 0.0 {
            (remaining_ah / effective_ah * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };
        RemainingCapacity {
            effective_ah,
            discharged_ah,
            remaining_ah,
            state_of_charge,
        }
    }

    /// Time until `remaining_ah` is exhausted at `discharge_amps`.
    pub fn time_to_empty(&self, remaining_ah: f64, discharge_amps: f64) -> TimeToEmpty {
        TimeToEmpty::from_hours(remaining_ah, discharge_amps)
    }

    /// Time a full battery would last at the present rate.
    pub fn time_until_discharged_from_full(
        &self,
        discharge_amps: f64,
        temperature_c: Option<f64>,
    ) -> TimeToEmpty {
        let capacity = self.effective_capacity_from_full(discharge_amps, temperature_c);
        TimeToEmpty::from_hours(capacity, discharge_amps)
    }

    /// Three-way comparison against the alarm thresholds; ties are normal.
    pub fn alarm_state(&self, volts: f64) -> AlarmState {
        if volts > self.alarm_high_volts {
            AlarmState::High
        } else if volts < self.alarm_low_volts {
            AlarmState::Low
        } else {
            AlarmState::Normal
        }
    }
}

// ---------------------------------------------------------------------------
// Estimates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RemainingCapacity {
    pub effective_ah: f64,
    pub discharged_ah: f64,
    pub remaining_ah: f64,
    /// 0–100 %.
    pub state_of_charge: f64,
}

/// Time-to-empty estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeToEmpty {
    Remaining(Duration),
    /// Not discharging, so the battery never empties at this rate.
    Indeterminate,
}

impl TimeToEmpty {
    fn from_hours(capacity_ah: f64, discharge_amps: f64) -> Self {
        if !(discharge_amps.is_finite() && discharge_amps > 0.0) {
            return Self::Indeterminate;
        }
        let secs = capacity_ah.max(0.0) / discharge_amps * 3600.0;
        Duration::try_from_secs_f64(secs).map_or(Self::Indeterminate, Self::Remaining)
    }

    /// Hours remaining, `None` when indeterminate.
    pub fn hours(&self) -> Option<f64> {
        match self {
            Self::Remaining(d) => Some(d.as_secs_f64() / 3600.0),
            Self::Indeterminate => None,
        }
    }
}

impl fmt::Display for TimeToEmpty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.hours() {
            Some(h) => write!(f, "{h:.2}"),
            None => f.write_str("-"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlarmState {
    #[default]
    Normal,
    High,
    Low,
}

impl AlarmState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::High => "high",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Alarm monitor
// ---------------------------------------------------------------------------

/// Latches the alarm state and reports transitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlarmMonitor {
    state: AlarmState,
}

impl AlarmMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AlarmState {
        self.state
    }

    /// Evaluate `volts`; returns `Some((from, to))` when the state changed.
    pub fn update(&mut self, model: &BatteryModel, volts: f64) -> Option<(AlarmState, AlarmState)> {
        let next = model.alarm_state(volts);
        if next == self.state {
            return None;
        }
        let prev = self.state;
        self.state = next;
        match next {
            AlarmState::Normal => info!("BATTERY ALARM CLEARED: {prev} ({volts:.2} V)"),
            _ => error!("BATTERY ALARM SET: {next} ({volts:.2} V)"),
        }
        Some((prev, next))
    }
}
