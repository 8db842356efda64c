//! Fuzz target: `LineDecoder::feed_byte` + `parse_frame`
//!
//! Drives arbitrary bytes from the sensor-board UART through the line
//! decoder and the frame parser.  Neither may panic, no line may exceed
//! `MAX_LINE`, and every parsed value must be finite.
//!
//! cargo fuzz run fuzz_frame_decoder

#![no_main]

use emondc::serial::{LineDecoder, MAX_LINE, parse_frame};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut decoder = LineDecoder::new();

    for &b in data {
        if let Some(Ok(line)) = decoder.feed_byte(b) {
            assert!(line.len() <= MAX_LINE, "line exceeds MAX_LINE");
            if let Ok(frame) = parse_frame(&line) {
                assert!(frame.volts_raw.iter().all(|v| v.is_finite()));
                assert!(frame.amps_raw.iter().all(|v| v.is_finite()));
            }
        }
    }

    // After a reset the decoder must accept bytes cleanly again.
    decoder.reset();
    let _ = decoder.feed(data);
});
