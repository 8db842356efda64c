//! Per-channel calibration constants.
//!
//! The front end digitises two channels (A and B), each with a voltage
//! divider on the voltage input and a shunt on the current input.  A
//! [`CalibrationProfile`] holds everything needed to turn raw ADC counts
//! from one channel into volts and amps.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MeasureError;

/// Full-scale count of the 16-bit differential ADC (positive half).
pub const ADC_FULL_SCALE: f64 = 32_768.0;

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Measurement channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Channel {
    #[default]
    A = 0,
    B = 1,
}

impl Channel {
    /// Both channels in index order.
    pub const ALL: [Self; 2] = [Self::A, Self::B];

    /// Array index for per-channel tables.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Suffix used in wire keys and HTTP parameter names (`vcalA`, `IB`).
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
        }
    }
}

impl TryFrom<u8> for Channel {
    type Error = MeasureError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::A),
            1 => Ok(Self::B),
            _ => Err(MeasureError::InvalidChannel),
        }
    }
}

impl FromStr for Channel {
    type Err = MeasureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "A" | "a" | "0" => Ok(Self::A),
            "B" | "b" | "1" => Ok(Self::B),
            _ => Err(MeasureError::InvalidChannel),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

// ---------------------------------------------------------------------------
// Gain
// ---------------------------------------------------------------------------

/// Programmable pre-amplifier gain of the current-sense input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
#[repr(u16)]
pub enum Gain {
    X1 = 1,
    X2 = 2,
    X4 = 4,
    X8 = 8,
    X16 = 16,
    X32 = 32,
    X64 = 64,
    X128 = 128,
}

impl Gain {
    pub const fn factor(self) -> f64 {
        self as u16 as f64
    }
}

impl TryFrom<u16> for Gain {
    type Error = MeasureError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::X1),
            2 => Ok(Self::X2),
            4 => Ok(Self::X4),
            8 => Ok(Self::X8),
            16 => Ok(Self::X16),
            32 => Ok(Self::X32),
            64 => Ok(Self::X64),
            128 => Ok(Self::X128),
            other => Err(MeasureError::UnsupportedGain(other)),
        }
    }
}

impl From<Gain> for u16 {
    fn from(g: Gain) -> Self {
        g as u16
    }
}

// ---------------------------------------------------------------------------
// CalibrationProfile
// ---------------------------------------------------------------------------

/// Calibration constants for one channel.
///
/// Offsets are expressed in physical units (volts / amps) and subtracted
/// after scaling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProfile {
    /// Voltage calibration multiplier (`vcal`).
    pub voltage_scale: f64,
    /// Current calibration multiplier (`ical`).
    pub current_scale: f64,
    /// Volts subtracted after scaling.
    pub voltage_offset: f64,
    /// Amps subtracted after scaling.
    pub current_offset: f64,
    /// Upper divider resistor (ohms).
    pub divider_r1: u32,
    /// Lower divider resistor (ohms), across which the ADC measures.
    pub divider_r2: u32,
    /// Current shunt (ohms).
    pub shunt_ohms: f64,
    /// Current-sense pre-amplifier gain.
    pub gain: Gain,
    /// Whether the ADC reference voltage has been measured for this channel.
    pub reference_known: bool,
    /// ADC reference voltage (full-scale input).
    pub reference_volts: f64,
}

impl Default for CalibrationProfile {
    fn default() -> Self {
        Self {
            voltage_scale: 1.0,
            current_scale: 1.0,
            voltage_offset: 0.0,
            current_offset: 0.0,
            divider_r1: 1_000_000,
            divider_r2: 20_000,
            shunt_ohms: 0.001,
            gain: Gain::X16,
            reference_known: false,
            reference_volts: 2.048,
        }
    }
}

impl CalibrationProfile {
    /// Input volts represented by one ADC count.
    pub fn volts_per_count(&self) -> f64 {
        self.reference_volts / ADC_FULL_SCALE
    }

    /// Voltage-divider ratio `(R1 + R2) / R2`.
    pub fn divider_ratio(&self) -> f64 {
        (f64::from(self.divider_r1) + f64::from(self.divider_r2)) / f64::from(self.divider_r2)
    }

    /// Check every invariant that conversion relies on.
    pub fn validate(&self) -> Result<(), &'static str> {
        if !(self.shunt_ohms.is_finite() && self.shunt_ohms > 0.0) {
            return Err("shunt resistance must be > 0");
        }
        if self.divider_r1 == 0 || self.divider_r2 == 0 {
            return Err("divider resistors must be non-zero");
        }
        if !(self.reference_volts.is_finite() && self.reference_volts > 0.0) {
            return Err("reference voltage must be > 0");
        }
        let finite = [
            self.voltage_scale,
            self.current_scale,
            self.voltage_offset,
            self.current_offset,
        ];
        if finite.iter().any(|v| !v.is_finite()) {
            return Err("calibration scale and offset must be finite");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CalibrationStore
// ---------------------------------------------------------------------------

/// Read-mostly table of both channel profiles.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CalibrationStore {
    profiles: [CalibrationProfile; 2],
}

impl CalibrationStore {
    pub fn new(profiles: [CalibrationProfile; 2]) -> Self {
        Self { profiles }
    }

    pub fn profile(&self, channel: Channel) -> &CalibrationProfile {
        &self.profiles[channel.index()]
    }

    /// Replace one channel's profile.  Callers validate first.
    pub fn replace(&mut self, channel: Channel, profile: CalibrationProfile) {
        self.profiles[channel.index()] = profile;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_from_wire_byte() {
        assert_eq!(Channel::try_from(0), Ok(Channel::A));
        assert_eq!(Channel::try_from(1), Ok(Channel::B));
        assert_eq!(Channel::try_from(2), Err(MeasureError::InvalidChannel));
    }

    #[test]
    fn channel_from_str() {
        assert_eq!("a".parse::<Channel>(), Ok(Channel::A));
        assert_eq!(" B ".parse::<Channel>(), Ok(Channel::B));
        assert_eq!("C".parse::<Channel>(), Err(MeasureError::InvalidChannel));
    }

    #[test]
    fn gain_accepts_only_supported_values() {
        assert_eq!(Gain::try_from(16), Ok(Gain::X16));
        assert_eq!(Gain::try_from(3), Err(MeasureError::UnsupportedGain(3)));
        assert_eq!(u16::from(Gain::X128), 128);
    }

    #[test]
    fn gain_serde_uses_numeric_form() {
        let json = serde_json::to_string(&Gain::X4).unwrap();
        assert_eq!(json, "4");
        assert!(serde_json::from_str::<Gain>("5").is_err());
    }

    #[test]
    fn default_profile_is_valid() {
        assert!(CalibrationProfile::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_shunt_and_divider() {
        let p = CalibrationProfile { shunt_ohms: 0.0, ..Default::default() };
        assert!(p.validate().is_err());
        let p = CalibrationProfile { divider_r2: 0, ..Default::default() };
        assert!(p.validate().is_err());
        let p = CalibrationProfile { current_offset: f64::NAN, ..Default::default() };
        assert!(p.validate().is_err());
    }

    #[test]
    fn divider_ratio_matches_resistors() {
        let p = CalibrationProfile { divider_r1: 90_000, divider_r2: 10_000, ..Default::default() };
        assert!((p.divider_ratio() - 10.0).abs() < 1e-12);
    }
}
