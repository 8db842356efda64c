//! Line-oriented frame codec for the sensor-board serial link.
//!
//! Wire format, one frame per sampling interval:
//! ```text
//! VA:<raw>,IA:<raw>,VB:<raw>,IB:<raw>[,T:<°C>]\r\n
//! ```
//!
//! The decoder accumulates bytes and yields complete lines.  A single UART
//! read may return part of a line or several lines concatenated.  Lines
//! longer than [`MAX_LINE`] are dropped up to the next terminator.

use heapless::String;

use crate::error::LinkError;
use crate::measure::{Channel, RawFrame};

/// Longest accepted line, excluding the terminator.
pub const MAX_LINE: usize = 256;

pub type Line = String<MAX_LINE>;

/// Decoder state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    /// Appending bytes to the current line.
    Collecting,
    /// Line overflowed; skipping until the next terminator.
    Discarding,
}

/// Streaming line decoder.
pub struct LineDecoder {
    state: DecoderState,
    buf: Line,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::Collecting,
            buf: String::new(),
        }
    }

    /// Feed one byte.
    ///
    /// Returns `Some(Ok(line))` when a non-empty line completes and
    /// `Some(Err(Overflow))` when an oversized line ends.
    pub fn feed_byte(&mut self, byte: u8) -> Option<Result<Line, LinkError>> {
        match (self.state, byte) {
            (DecoderState::Discarding, b'\n' | b'\r') => {
                self.state = DecoderState::Collecting;
                Some(Err(LinkError::Overflow))
            }
            (DecoderState::Discarding, _) => None,
            (DecoderState::Collecting, b'\n' | b'\r') => {
                if self.buf.is_empty() {
                    // CRLF pair or blank line.
                    return None;
                }
                Some(Ok(core::mem::take(&mut self.buf)))
            }
            (DecoderState::Collecting, _) => {
                // Non-ASCII bytes are garbage from line noise.
                let ch = if byte.is_ascii() { byte as char } else { '\u{FFFD}' };
                if self.buf.push(ch).is_err() {
                    self.buf.clear();
                    self.state = DecoderState::Discarding;
                }
                None
            }
        }
    }

    /// Feed a chunk; returns the last complete line (or error) in it.
    pub fn feed(&mut self, data: &[u8]) -> Option<Result<Line, LinkError>> {
        let mut last = None;
        for &b in data {
            if let Some(item) = self.feed_byte(b) {
                last = Some(item);
            }
        }
        last
    }

    /// Drop any partial line (e.g. after a UART reset).
    pub fn reset(&mut self) {
        self.buf.clear();
        self.state = DecoderState::Collecting;
    }
}

/// Parse a complete line into raw channel values.
///
/// `VA`, `IA`, `VB` and `IB` are required; `T` is optional; unknown keys
/// are ignored.  Every value must be a finite number.
pub fn parse_frame(line: &str) -> Result<RawFrame, LinkError> {
    let mut volts: [Option<f64>; 2] = [None; 2];
    let mut amps: [Option<f64>; 2] = [None; 2];
    let mut temperature_c = None;

    for field in line.trim().split(',') {
        let (key, value) = field.split_once(':').ok_or(LinkError::MalformedFrame)?;
        let key = key.trim();
        let slot = match key {
            "T" => &mut temperature_c,
            _ => match key.split_at_checked(1) {
                Some(("V", ch)) => match ch.parse::<Channel>() {
                    Ok(c) => &mut volts[c.index()],
                    Err(_) => continue,
                },
                Some(("I", ch)) => match ch.parse::<Channel>() {
                    Ok(c) => &mut amps[c.index()],
                    Err(_) => continue,
                },
                _ => continue,
            },
        };
        let parsed: f64 = value.trim().parse().map_err(|_| LinkError::MalformedFrame)?;
        if !parsed.is_finite() {
            return Err(LinkError::MalformedFrame);
        }
        *slot = Some(parsed);
    }

    let [Some(va), Some(vb)] = volts else {
        return Err(LinkError::MalformedFrame);
    };
    let [Some(ia), Some(ib)] = amps else {
        return Err(LinkError::MalformedFrame);
    };
    Ok(RawFrame {
        volts_raw: [va, vb],
        amps_raw: [ia, ib],
        temperature_c,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(decoder: &mut LineDecoder, data: &[u8]) -> Vec<Result<Line, LinkError>> {
        data.iter().filter_map(|&b| decoder.feed_byte(b)).collect()
    }

    #[test]
    fn decodes_crlf_terminated_line() {
        let mut d = LineDecoder::new();
        let out = decode_all(&mut d, b"VA:1,IA:2,VB:3,IB:4\r\n");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().unwrap().as_str(), "VA:1,IA:2,VB:3,IB:4");
    }

    #[test]
    fn handles_split_reads() {
        let mut d = LineDecoder::new();
        assert!(d.feed(b"VA:10,IA").is_none());
        let line = d.feed(b":20,VB:30,IB:40\n").unwrap().unwrap();
        assert_eq!(line.as_str(), "VA:10,IA:20,VB:30,IB:40");
    }

    #[test]
    fn oversized_line_is_dropped() {
        let mut d = LineDecoder::new();
        let long = vec![b'x'; MAX_LINE + 10];
        assert!(decode_all(&mut d, &long).is_empty());
        assert_eq!(d.feed_byte(b'\n'), Some(Err(LinkError::Overflow)));
        // Decoder recovers on the next line.
        let line = d.feed(b"VA:1,IA:1,VB:1,IB:1\n").unwrap().unwrap();
        assert!(line.starts_with("VA"));
    }

    #[test]
    fn reset_discards_partial_line() {
        let mut d = LineDecoder::new();
        d.feed(b"VA:99,IA");
        d.reset();
        let line = d.feed(b"VA:1,IA:2,VB:3,IB:4\n").unwrap().unwrap();
        assert_eq!(line.as_str(), "VA:1,IA:2,VB:3,IB:4");
    }

    #[test]
    fn parses_full_frame() {
        let f = parse_frame("VA:1200.5,IA:-56,VB:800,IB:12,T:21.5").unwrap();
        assert_eq!(f.volts_raw, [1200.5, 800.0]);
        assert_eq!(f.amps_raw, [-56.0, 12.0]);
        assert_eq!(f.temperature_c, Some(21.5));
    }

    #[test]
    fn ignores_unknown_keys() {
        let f = parse_frame("VA:1,IA:2,VB:3,IB:4,XY:9,VC:5").unwrap();
        assert_eq!(f.temperature_c, None);
        assert_eq!(f.volts_raw, [1.0, 3.0]);
    }

    #[test]
    fn rejects_missing_or_bad_fields() {
        assert_eq!(parse_frame("VA:1,IA:2,VB:3"), Err(LinkError::MalformedFrame));
        assert_eq!(parse_frame("VA:1,IA:x,VB:3,IB:4"), Err(LinkError::MalformedFrame));
        assert_eq!(parse_frame("VA:1,IA:2,VB:3,IB:inf"), Err(LinkError::MalformedFrame));
        assert_eq!(parse_frame("garbage"), Err(LinkError::MalformedFrame));
        assert_eq!(parse_frame(""), Err(LinkError::MalformedFrame));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn decoder_never_exceeds_line_limit(data in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let mut d = LineDecoder::new();
            for b in data {
                if let Some(Ok(line)) = d.feed_byte(b) {
                    prop_assert!(line.len() <= MAX_LINE);
                    prop_assert!(!line.contains('\n'));
                }
            }
        }

        #[test]
        fn parser_never_panics(s in "\\PC{0,300}") {
            let _ = parse_frame(&s);
        }

        #[test]
        fn well_formed_frames_parse(
            va in -32_768i32..32_768,
            ia in -32_768i32..32_768,
            vb in -32_768i32..32_768,
            ib in -32_768i32..32_768,
        ) {
            let line = format!("VA:{va},IA:{ia},VB:{vb},IB:{ib}");
            let f = parse_frame(&line).unwrap();
            prop_assert_eq!(f.volts_raw, [f64::from(va), f64::from(vb)]);
            prop_assert_eq!(f.amps_raw, [f64::from(ia), f64::from(ib)]);
        }
    }
}
