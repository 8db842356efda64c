//! Calendar time for report timestamps and `/settime`.
//!
//! Only UTC is handled.  Conversion uses the days-from-civil algorithm so
//! no time-zone database or calendar crate is needed on target.

use core::fmt;

/// UTC calendar date and time, second resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseTimeError;

impl fmt::Display for ParseTimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("could not parse time")
    }
}

fn is_leap(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: i64, month: u8) -> u8 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap(year) => 29,
        2 => 28,
        _ => 0,
    }
}

/// Days since 1970-01-01 for a proleptic Gregorian date.
fn days_from_civil(y: i64, m: i64, d: i64) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let mp = (m + 9) % 12;
    let doy = (153 * mp + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

fn civil_from_days(z: i64) -> (i64, u8, u8) {
    let z = z + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let m = (if mp < 10 { mp + 3 } else { mp - 9 }) as u8;
    let y = yoe + era * 400 + i64::from(m <= 2);
    (y, m, d)
}

fn digits<const N: usize>(s: &[u8]) -> Result<u32, ParseTimeError> {
    if s.len() != N || !s.iter().all(u8::is_ascii_digit) {
        return Err(ParseTimeError);
    }
    Ok(s.iter().fold(0, |acc, b| acc * 10 + u32::from(b - b'0')))
}

impl DateTime {
    /// Parse `YYYY-MM-DDTHH:MM:SSZ`.
    pub fn parse_iso8601(s: &str) -> Result<Self, ParseTimeError> {
        let b = s.trim().as_bytes();
        if b.len() != 20
            || b[4] != b'-'
            || b[7] != b'-'
            || b[10] != b'T'
            || b[13] != b':'
            || b[16] != b':'
            || b[19] != b'Z'
        {
            return Err(ParseTimeError);
        }
        let year = digits::<4>(&b[0..4])?;
        let month = digits::<2>(&b[5..7])?;
        let day = digits::<2>(&b[8..10])?;
        let hour = digits::<2>(&b[11..13])?;
        let minute = digits::<2>(&b[14..16])?;
        let second = digits::<2>(&b[17..19])?;

        if year < 1970
            || !(1..=12).contains(&month)
            || day == 0
            || day > u32::from(days_in_month(i64::from(year), month as u8))
            || hour > 23
            || minute > 59
            || second > 59
        {
            return Err(ParseTimeError);
        }
        Ok(Self {
            year: year as u16,
            month: month as u8,
            day: day as u8,
            hour: hour as u8,
            minute: minute as u8,
            second: second as u8,
        })
    }

    /// Seconds since the Unix epoch.
    pub fn to_unix(&self) -> i64 {
        let days = days_from_civil(
            i64::from(self.year),
            i64::from(self.month),
            i64::from(self.day),
        );
        days * 86_400
            + i64::from(self.hour) * 3600
            + i64::from(self.minute) * 60
            + i64::from(self.second)
    }

    /// Inverse of [`to_unix`](Self::to_unix); `None` outside 1970–9999.
    pub fn from_unix(secs: i64) -> Option<Self> {
        if secs < 0 {
            return None;
        }
        let (y, month, day) = civil_from_days(secs.div_euclid(86_400));
        if y > 9999 {
            return None;
        }
        let rem = secs.rem_euclid(86_400);
        Some(Self {
            year: y as u16,
            month,
            day,
            hour: (rem / 3600) as u8,
            minute: (rem % 3600 / 60) as u8,
            second: (rem % 60) as u8,
        })
    }

    /// `YYYY-MM-DD hh:mm:ss`, the SD log timestamp format.
    pub fn log_format(&self) -> heapless::String<19> {
        use core::fmt::Write;
        let mut s = heapless::String::new();
        let _ = write!(
            s,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        );
        s
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

impl core::str::FromStr for DateTime {
    type Err = ParseTimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_iso8601(s)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn unix_roundtrip(secs in 0i64..253_402_300_799) {
            let t = DateTime::from_unix(secs).unwrap();
            prop_assert_eq!(t.to_unix(), secs);
            prop_assert_eq!(DateTime::parse_iso8601(&t.to_string()), Ok(t));
        }
    }
}
