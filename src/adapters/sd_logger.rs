//! CSV data log on the SD card.
//!
//! Every report becomes one line appended to the configured datalog
//! file.  A new file starts with [`CSV_HEADER`].  While a web transfer
//! holds the [`SdGate`] lines are kept in memory and flushed on the next
//! report that finds the card free; the oldest are dropped past
//! [`PENDING_LINES`].

use std::collections::VecDeque;
use std::io::Write;

use log::{debug, info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::{EventSink, SdCard};
use crate::app::report::CSV_HEADER;
use crate::error::SdError;
use crate::web::sd::SdGate;

/// Lines held while the card is busy.
pub const PENDING_LINES: usize = 32;

pub struct SdLogger<S: SdCard> {
    card: S,
    gate: SdGate,
    path: String,
    pending: VecDeque<String>,
    written: u64,
    dropped: u64,
}

impl<S: SdCard> SdLogger<S> {
    pub fn new(card: S, gate: SdGate, path: &str) -> Self {
        Self {
            card,
            gate,
            path: path.to_owned(),
            pending: VecDeque::new(),
            written: 0,
            dropped: 0,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Switch to another datalog file (after a config change).
    pub fn set_path(&mut self, path: &str) {
        if self.path != path {
            info!("SdLogger: logging to {path}");
            self.path = path.to_owned();
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn lines_written(&self) -> u64 {
        self.written
    }

    pub fn lines_dropped(&self) -> u64 {
        self.dropped
    }

    fn queue(&mut self, line: String) {
        if self.pending.len() == PENDING_LINES {
            self.pending.pop_front();
            self.dropped += 1;
        }
        self.pending.push_back(line);
    }

    /// Append every pending line.  Lines stay queued on failure.
    fn flush(&mut self) -> Result<(), SdError> {
        if !self.card.is_present() {
            return Err(SdError::Unavailable);
        }
        let _lease = self.gate.try_acquire()?;
        let (mut file, created) = self.card.append(&self.path)?;
        if created {
            writeln!(file, "{CSV_HEADER}")?;
        }
        while let Some(line) = self.pending.front() {
            writeln!(file, "{line}")?;
            self.pending.pop_front();
            self.written += 1;
        }
        file.flush()?;
        Ok(())
    }
}

impl<S: SdCard> EventSink for SdLogger<S> {
    fn emit(&mut self, event: &AppEvent) {
        let AppEvent::Report(report) = event else {
            return;
        };
        self.queue(report.csv_line());
        match self.flush() {
            Ok(()) => debug!("SdLogger: {} lines in {}", self.written, self.path),
            Err(SdError::Busy) => debug!("SdLogger: card busy, {} pending", self.pending.len()),
            Err(e) => warn!("SdLogger: {e}, {} pending", self.pending.len()),
        }
    }
}
