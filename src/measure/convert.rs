//! Raw ADC counts → calibrated volts and amps.
//!
//! Pure functions of a [`CalibrationProfile`]; no state, no side effects.
//! Zero shunt or divider values never reach this module because
//! [`CalibrationProfile::validate`] rejects them at configuration save.

use super::calibration::{CalibrationProfile, CalibrationStore, Channel, Gain};

/// A converted value plus whether its absolute scale can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Reading {
    pub value: f64,
    /// `false` while the channel's ADC reference has not been measured.
    pub calibrated: bool,
}

/// Volts per raw count for the voltage input of `profile`.
pub fn volts_gain(profile: &CalibrationProfile) -> f64 {
    profile.volts_per_count() * profile.divider_ratio() * profile.voltage_scale
}

/// Amps per raw count for the current input of `profile` at `gain`.
pub fn amps_gain(profile: &CalibrationProfile, gain: Gain) -> f64 {
    profile.volts_per_count() / (gain.factor() * profile.shunt_ohms) * profile.current_scale
}

/// Convert a raw voltage reading.
pub fn to_volts(profile: &CalibrationProfile, raw: f64) -> Reading {
    Reading {
        value: raw * volts_gain(profile) - profile.voltage_offset,
        calibrated: profile.reference_known,
    }
}

/// Convert a raw current reading taken at `gain`.
pub fn to_amps(profile: &CalibrationProfile, raw: f64, gain: Gain) -> Reading {
    Reading {
        value: raw * amps_gain(profile, gain) - profile.current_offset,
        calibrated: profile.reference_known,
    }
}

impl CalibrationStore {
    pub fn to_volts(&self, raw: f64, channel: Channel) -> Reading {
        to_volts(self.profile(channel), raw)
    }

    pub fn to_amps(&self, raw: f64, channel: Channel, gain: Gain) -> Reading {
        to_amps(self.profile(channel), raw, gain)
    }
}
