//! One sampling tick: raw frame in, calibrated measurement out.
//!
//! `Meter` owns the calibration table, the accumulators, the battery model
//! and the alarm latch.  `process` validates the elapsed interval before
//! touching any state, so a rejected tick leaves everything as it was.

use heapless::HistoryBuffer;

use super::accumulator::{AccumulatorState, Accumulators};
use super::battery::{AlarmMonitor, AlarmState, BatteryModel, RemainingCapacity, TimeToEmpty};
use super::calibration::{CalibrationStore, Channel};
use super::convert::Reading;
use crate::config::DeviceConfig;
use crate::error::MeasureError;

/// Raw ADC values from one serial frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RawFrame {
    pub volts_raw: [f64; 2],
    pub amps_raw: [f64; 2],
    pub temperature_c: Option<f64>,
}

/// Calibrated values for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ChannelReading {
    pub volts: Reading,
    pub amps: Reading,
    pub watts: f64,
    pub totals: AccumulatorState,
}

/// Battery estimate derived from the battery channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryEstimate {
    pub capacity: RemainingCapacity,
    /// Hours to empty from the present charge, `None` when not discharging.
    pub hours_to_empty: Option<f64>,
    /// Hours a full battery would last at the present rate.
    pub hours_from_full: Option<f64>,
    pub alarm: AlarmState,
}

/// Result of one accepted tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub channels: [ChannelReading; 2],
    pub temperature_c: Option<f64>,
    pub elapsed_secs: f64,
    pub battery: BatteryEstimate,
    /// `Some((from, to))` when this tick changed the alarm state.
    pub alarm_change: Option<(AlarmState, AlarmState)>,
}

impl Measurement {
    pub fn channel(&self, channel: Channel) -> &ChannelReading {
        &self.channels[channel.index()]
    }
}

/// Accepted samples averaged into the battery discharge current.
pub const CURRENT_WINDOW: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct Meter {
    calibration: CalibrationStore,
    accumulators: Accumulators,
    battery: BatteryModel,
    battery_channel: Channel,
    alarm: AlarmMonitor,
    /// Battery-channel current of the most recent accepted ticks.
    recent_amps: HistoryBuffer<f64, CURRENT_WINDOW>,
}

impl Meter {
    pub fn new(config: &DeviceConfig) -> Self {
        let mut meter = Self::default();
        meter.reconfigure(config);
        meter
    }

    /// Apply a (validated) configuration.  Accumulated totals are kept.
    pub fn reconfigure(&mut self, config: &DeviceConfig) {
        self.calibration = CalibrationStore::new(config.channels);
        self.battery = config.battery;
        if self.battery_channel != config.battery_channel {
            self.recent_amps = HistoryBuffer::new();
        }
        self.battery_channel = config.battery_channel;
    }

    /// Mean battery-channel current over the last [`CURRENT_WINDOW`]
    /// accepted ticks.
    fn average_amps(&self) -> f64 {
        let window = self.recent_amps.as_slice();
        if window.is_empty() {
            return 0.0;
        }
        window.iter().sum::<f64>() / window.len() as f64
    }

    pub fn accumulators(&self) -> &Accumulators {
        &self.accumulators
    }

    pub fn accumulators_mut(&mut self) -> &mut Accumulators {
        &mut self.accumulators
    }

    pub fn battery_channel(&self) -> Channel {
        self.battery_channel
    }

    pub fn alarm_state(&self) -> AlarmState {
        self.alarm.state()
    }

    /// Convert `frame` and integrate it over the interval ending at `now_ms`.
    pub fn process(&mut self, frame: &RawFrame, now_ms: u64) -> Result<Measurement, MeasureError> {
        let elapsed_secs = self.accumulators.elapsed_since(now_ms)?;

        let mut channels = [ChannelReading::default(); 2];
        for ch in Channel::ALL {
            let i = ch.index();
            let gain = self.calibration.profile(ch).gain;
            let volts = self.calibration.to_volts(frame.volts_raw[i], ch);
            let amps = self.calibration.to_amps(frame.amps_raw[i], ch, gain);
            let totals = self.accumulators.accumulate(ch, amps.value, volts.value, elapsed_secs)?;
            channels[i] = ChannelReading {
                volts,
                amps,
                watts: volts.value * amps.value,
                totals,
            };
        }
        self.accumulators.commit(now_ms);

        let batt = &channels[self.battery_channel.index()];
        self.recent_amps.write(batt.amps.value);
        let amps = self.average_amps();
        let capacity = self.battery.remaining_capacity(&batt.totals, amps, frame.temperature_c);
        let hours_to_empty: TimeToEmpty = self.battery.time_to_empty(capacity.remaining_ah, amps);
        let hours_from_full = self
            .battery
            .time_until_discharged_from_full(amps, frame.temperature_c);
        let alarm_change = self.alarm.update(&self.battery, batt.volts.value);

        Ok(Measurement {
            channels,
            temperature_c: frame.temperature_c,
            elapsed_secs,
            battery: BatteryEstimate {
                capacity,
                hours_to_empty: hours_to_empty.hours(),
                hours_from_full: hours_from_full.hours(),
                alarm: self.alarm.state(),
            },
            alarm_change,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measure::calibration::{CalibrationProfile, Gain};

    fn config() -> DeviceConfig {
        let profile = CalibrationProfile {
            shunt_ohms: 0.01,
            gain: Gain::X1,
            divider_r1: 90_000,
            divider_r2: 10_000,
            reference_known: true,
            ..Default::default()
        };
        DeviceConfig {
            channels: [profile; 2],
            battery: BatteryModel { peukert_exponent: 1.0, ..Default::default() },
            ..Default::default()
        }
    }

    fn frame(volts: f64, amps: f64) -> RawFrame {
        let vpc = 2.048 / 32_768.0;
        RawFrame {
            volts_raw: [volts / 10.0 / vpc, 0.0],
            amps_raw: [amps * 0.01 / vpc, 0.0],
            temperature_c: None,
        }
    }

    #[test]
    fn first_tick_only_establishes_time_base() {
        let mut meter = Meter::new(&config());
        let m = meter.process(&frame(12.0, 2.5), 1_000).unwrap();
        assert_eq!(m.elapsed_secs, 0.0);
        assert!((m.channel(Channel::A).volts.value - 12.0).abs() < 1e-9);
        assert!((m.channel(Channel::A).amps.value - 2.5).abs() < 1e-9);
        assert_eq!(m.channel(Channel::A).totals, AccumulatorState::default());
    }

    #[test]
    fn hour_of_ticks_accumulates_amp_hours() {
        let mut meter = Meter::new(&config());
        meter.process(&frame(12.0, 2.5), 0).unwrap();
        let mut m = None;
        for i in 1..=360 {
            m = Some(meter.process(&frame(12.0, 2.5), i * 10_000).unwrap());
        }
        let totals = m.unwrap().channel(Channel::A).totals;
        assert!((totals.amp_hours - 2.5).abs() < 1e-6);
        assert!((totals.watt_hours - 30.0).abs() < 1e-6);
    }

    #[test]
    fn clock_going_backwards_leaves_state_unchanged() {
        let mut meter = Meter::new(&config());
        meter.process(&frame(12.0, 2.5), 10_000).unwrap();
        meter.process(&frame(12.0, 2.5), 20_000).unwrap();
        let before = meter.accumulators().snapshot();
        assert_eq!(
            meter.process(&frame(12.0, 2.5), 15_000),
            Err(MeasureError::NonMonotonicTime)
        );
        assert_eq!(meter.accumulators().snapshot(), before);
        assert_eq!(meter.accumulators().last_update_ms(), Some(20_000));
    }

    #[test]
    fn battery_estimate_tracks_discharge() {
        let mut meter = Meter::new(&config());
        meter.process(&frame(12.5, 5.0), 0).unwrap();
        let m = meter.process(&frame(12.5, 5.0), 3_600_000).unwrap();
        assert!((m.battery.capacity.remaining_ah - 95.0).abs() < 1e-6);
        assert!((m.battery.hours_to_empty.unwrap() - 19.0).abs() < 1e-6);
        assert!((m.battery.hours_from_full.unwrap() - 20.0).abs() < 1e-6);
    }

    #[test]
    fn time_to_empty_follows_the_average_current() {
        let mut meter = Meter::new(&config());
        meter.process(&frame(12.5, 5.0), 0).unwrap();
        let m = meter.process(&frame(12.5, 1.0), 3_600_000).unwrap();
        // 1 Ah drawn over the hour, averaged rate (5 + 1) / 2 = 3 A.
        assert!((m.battery.capacity.remaining_ah - 99.0).abs() < 1e-6);
        assert!((m.battery.hours_to_empty.unwrap() - 33.0).abs() < 1e-6);
    }

    #[test]
    fn current_window_forgets_old_samples() {
        let mut meter = Meter::new(&config());
        meter.process(&frame(12.5, 50.0), 0).unwrap();
        let mut m = None;
        for i in 1..=CURRENT_WINDOW as u64 {
            m = Some(meter.process(&frame(12.5, 2.0), i * 1_000).unwrap());
        }
        let m = m.unwrap();
        let expected = m.battery.capacity.remaining_ah / 2.0;
        assert!((m.battery.hours_to_empty.unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn low_voltage_raises_alarm_once() {
        let mut meter = Meter::new(&config());
        let m = meter.process(&frame(11.0, 1.0), 0).unwrap();
        assert_eq!(m.alarm_change, Some((AlarmState::Normal, AlarmState::Low)));
        let m = meter.process(&frame(11.0, 1.0), 1_000).unwrap();
        assert_eq!(m.alarm_change, None);
        assert_eq!(m.battery.alarm, AlarmState::Low);
    }

    #[test]
    fn reconfigure_keeps_totals() {
        let mut meter = Meter::new(&config());
        meter.process(&frame(12.0, 2.0), 0).unwrap();
        meter.process(&frame(12.0, 2.0), 3_600_000).unwrap();
        let before = meter.accumulators().state(Channel::A);
        meter.reconfigure(&DeviceConfig::default());
        assert_eq!(meter.accumulators().state(Channel::A), before);
    }
}
