//! The per-tick report line.
//!
//! One [`Report`] is produced for every accepted sampling tick.  The SD
//! logger writes it as a CSV row and the forwarder sends it as an Emoncms
//! `key:value` input string.

use core::fmt::Write;

use crate::measure::{AlarmState, Channel, Measurement};
use crate::rtc::DateTime;

/// CSV header matching [`Report::csv_line`].  `calA`/`calB` are 0 while a
/// channel's absolute values rest on an unknown reference voltage.
pub const CSV_HEADER: &str = "time,uptime_s,VA,IA,WA,WhA,AhA,calA,VB,IB,WB,WhB,AhB,calB,T,SOC,Ah_remaining,hours_to_empty,hours_from_full,alarm";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelFigures {
    pub volts: f64,
    pub amps: f64,
    pub watts: f64,
    pub watt_hours: f64,
    pub amp_hours: f64,
    pub calibrated: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    /// Wall-clock time, `None` while the RTC is unset.
    pub time: Option<DateTime>,
    pub uptime_ms: u64,
    pub channels: [ChannelFigures; 2],
    pub temperature_c: Option<f64>,
    pub state_of_charge: f64,
    pub remaining_ah: f64,
    pub hours_to_empty: Option<f64>,
    pub hours_from_full: Option<f64>,
    pub alarm: AlarmState,
}

impl Report {
    pub fn new(m: &Measurement, time: Option<DateTime>, uptime_ms: u64) -> Self {
        let figures = |ch: Channel| {
            let r = m.channel(ch);
            ChannelFigures {
                volts: r.volts.value,
                amps: r.amps.value,
                watts: r.watts,
                watt_hours: r.totals.watt_hours,
                amp_hours: r.totals.amp_hours,
                calibrated: r.volts.calibrated && r.amps.calibrated,
            }
        };
        Self {
            time,
            uptime_ms,
            channels: [figures(Channel::A), figures(Channel::B)],
            temperature_c: m.temperature_c,
            state_of_charge: m.battery.capacity.state_of_charge,
            remaining_ah: m.battery.capacity.remaining_ah,
            hours_to_empty: m.battery.hours_to_empty,
            hours_from_full: m.battery.hours_from_full,
            alarm: m.battery.alarm,
        }
    }

    pub fn channel(&self, ch: Channel) -> &ChannelFigures {
        &self.channels[ch.index()]
    }

    /// One CSV row, without the trailing newline.  Unknown values are empty.
    pub fn csv_line(&self) -> String {
        let mut s = String::with_capacity(160);
        if let Some(t) = self.time {
            let _ = write!(s, "{}", t.log_format());
        }
        let _ = write!(s, ",{}", self.uptime_ms / 1000);
        for c in &self.channels {
            let _ = write!(
                s,
                ",{:.3},{:.3},{:.2},{:.3},{:.4},{}",
                c.volts,
                c.amps,
                c.watts,
                c.watt_hours,
                c.amp_hours,
                u8::from(c.calibrated)
            );
        }
        s.push(',');
        if let Some(t) = self.temperature_c {
            let _ = write!(s, "{t:.1}");
        }
        let _ = write!(s, ",{:.1},{:.3},", self.state_of_charge, self.remaining_ah);
        if let Some(h) = self.hours_to_empty {
            let _ = write!(s, "{h:.2}");
        }
        s.push(',');
        if let Some(h) = self.hours_from_full {
            let _ = write!(s, "{h:.2}");
        }
        let _ = write!(s, ",{}", self.alarm);
        s
    }

    /// Emoncms input string: `VA:12.400,IA:2.500,...`.
    pub fn input_string(&self) -> String {
        let mut s = String::with_capacity(200);
        for ch in Channel::ALL {
            let c = self.channel(ch);
            let sfx = ch.suffix();
            if !s.is_empty() {
                s.push(',');
            }
            let _ = write!(
                s,
                "V{sfx}:{:.3},I{sfx}:{:.3},W{sfx}:{:.2},Wh{sfx}:{:.3},Ah{sfx}:{:.4},cal{sfx}:{}",
                c.volts,
                c.amps,
                c.watts,
                c.watt_hours,
                c.amp_hours,
                u8::from(c.calibrated)
            );
        }
        if let Some(t) = self.temperature_c {
            let _ = write!(s, ",T:{t:.1}");
        }
        let _ = write!(s, ",SOC:{:.1},AhRem:{:.3}", self.state_of_charge, self.remaining_ah);
        if let Some(h) = self.hours_to_empty {
            let _ = write!(s, ",Hrs:{h:.2}");
        }
        s
    }
}
