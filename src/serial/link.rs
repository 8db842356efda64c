//! Serial link to the sensor board.
//!
//! `SerialLink` drains the UART without blocking, keeps the newest complete
//! line for the next sampling tick and remembers the last line for
//! `/lastvalues`.  It is generic over `embedded_io` so the firmware wraps
//! the ESP-IDF UART driver and tests wrap an in-memory buffer.

use embedded_io::{Read, ReadReady};
use log::{debug, warn};

use super::codec::{Line, LineDecoder, parse_frame};
use crate::app::ports::SampleSource;
use crate::error::LinkError;
use crate::measure::RawFrame;

const READ_CHUNK: usize = 64;

pub struct SerialLink<U> {
    uart: U,
    decoder: LineDecoder,
    /// Newest line (or overflow) since the last `acquire`.
    pending: Option<Result<Line, LinkError>>,
    last_line: Line,
}

impl<U: Read + ReadReady> SerialLink<U> {
    pub fn new(uart: U) -> Self {
        Self {
            uart,
            decoder: LineDecoder::new(),
            pending: None,
            last_line: Line::new(),
        }
    }

    /// Read whatever bytes are ready.  Never blocks.
    pub fn poll(&mut self) {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match self.uart.read_ready() {
                Ok(true) => {}
                Ok(false) => return,
                Err(e) => {
                    warn!("Serial: read_ready failed: {e:?}");
                    return;
                }
            }
            let n = match self.uart.read(&mut buf) {
                Ok(0) => return,
                Ok(n) => n,
                Err(e) => {
                    warn!("Serial: read failed: {e:?}");
                    self.decoder.reset();
                    return;
                }
            };
            for &b in &buf[..n] {
                if let Some(item) = self.decoder.feed_byte(b) {
                    self.accept(item);
                }
            }
        }
    }

    /// Treat `line` as if it had arrived on the wire (`/input`).
    pub fn inject(&mut self, line: &str) {
        let mut l = Line::new();
        let item = match l.push_str(line.trim_end_matches(['\r', '\n'])) {
            Ok(()) => Ok(l),
            Err(()) => Err(LinkError::Overflow),
        };
        self.accept(item);
    }

    /// Last complete line received, for `/lastvalues`.
    pub fn last_line(&self) -> &str {
        &self.last_line
    }

    fn accept(&mut self, item: Result<Line, LinkError>) {
        match &item {
            Ok(line) => {
                debug!("Serial: {line}");
                self.last_line.clone_from(line);
            }
            Err(e) => warn!("Serial: {e}"),
        }
        self.pending = Some(item);
    }
}

impl<U: Read + ReadReady> SampleSource for SerialLink<U> {
    fn acquire(&mut self) -> Result<RawFrame, LinkError> {
        self.poll();
        match self.pending.take() {
            None => Err(LinkError::SerialTimeout),
            // An oversized line is unusable data, same as garbage.
            Some(Err(_)) => Err(LinkError::MalformedFrame),
            Some(Ok(line)) => parse_frame(&line),
        }
    }

    fn last_line(&self) -> &str {
        &self.last_line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;

    /// In-memory UART that hands out its buffer in small reads.
    struct FakeUart {
        data: Vec<u8>,
        pos: usize,
    }

    impl embedded_io::ErrorType for FakeUart {
        type Error = Infallible;
    }

    impl Read for FakeUart {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, Infallible> {
            let n = buf.len().min(7).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    impl ReadReady for FakeUart {
        fn read_ready(&mut self) -> Result<bool, Infallible> {
            Ok(self.pos < self.data.len())
        }
    }

    fn link(data: &[u8]) -> SerialLink<FakeUart> {
        SerialLink::new(FakeUart { data: data.to_vec(), pos: 0 })
    }

    #[test]
    fn acquire_without_data_times_out() {
        let mut l = link(b"");
        assert_eq!(l.acquire(), Err(LinkError::SerialTimeout));
    }

    #[test]
    fn acquire_returns_newest_frame_once() {
        let mut l = link(b"VA:1,IA:1,VB:1,IB:1\r\nVA:2,IA:2,VB:2,IB:2\r\n");
        let f = l.acquire().unwrap();
        assert_eq!(f.volts_raw, [2.0, 2.0]);
        assert_eq!(l.acquire(), Err(LinkError::SerialTimeout));
        assert_eq!(l.last_line(), "VA:2,IA:2,VB:2,IB:2");
    }

    #[test]
    fn garbled_line_is_malformed() {
        let mut l = link(b"VA:1,IA:?\n");
        assert_eq!(l.acquire(), Err(LinkError::MalformedFrame));
        assert_eq!(l.last_line(), "VA:1,IA:?");
    }

    #[test]
    fn injected_line_is_acquired() {
        let mut l = link(b"");
        l.inject("VA:5,IA:6,VB:7,IB:8\n");
        let f = l.acquire().unwrap();
        assert_eq!(f.amps_raw, [6.0, 8.0]);
        assert_eq!(SerialLink::last_line(&l), "VA:5,IA:6,VB:7,IB:8");
    }
}
