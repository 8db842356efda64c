//! SD-card transfer sessions.
//!
//! Only one file may be streamed to or from the card at a time.  The
//! [`SdGate`] is a shared flag; taking it yields an [`SdLease`] that clears
//! the flag when dropped.  Sessions own both the file handle and the
//! lease, so every exit path (completion, error, peer disconnect) releases
//! the card exactly once.

use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};

use crate::error::SdError;

/// Upper bound on bytes moved per chunk so the sampling loop is never
/// starved.
pub const CHUNK_SIZE: usize = 1024;

/// Single-transfer-in-flight gate, shared between handlers.
#[derive(Debug, Clone, Default)]
pub struct SdGate(Arc<AtomicBool>);

impl SdGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the card, or `SdError::Busy` if a transfer is in flight.
    pub fn try_acquire(&self) -> Result<SdLease, SdError> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| SdLease {
                flag: Arc::clone(&self.0),
            })
            .map_err(|_| SdError::Busy)
    }

    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Proof of exclusive access; releases the gate on drop.
#[derive(Debug)]
pub struct SdLease {
    flag: Arc<AtomicBool>,
}

impl Drop for SdLease {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
        debug!("SdGate: released");
    }
}

// -----------------------------------------------------------------------
// Download
// -----------------------------------------------------------------------

/// A file being streamed to a client.
pub struct DownloadSession<F> {
    file: F,
    name: String,
    sent: u64,
    _lease: SdLease,
}

impl<F: Read> DownloadSession<F> {
    pub fn new(file: F, name: impl Into<String>, lease: SdLease) -> Self {
        Self {
            file,
            name: name.into(),
            sent: 0,
            _lease: lease,
        }
    }

    /// File name for `Content-Disposition`.
    pub fn file_name(&self) -> &str {
        &self.name
    }

    pub fn bytes_sent(&self) -> u64 {
        self.sent
    }

    /// Read the next chunk into `buf`.  At most [`CHUNK_SIZE`] bytes are
    /// read; `Ok(0)` means the file is finished.
    pub fn next_chunk(&mut self, buf: &mut [u8]) -> Result<usize, SdError> {
        let limit = buf.len().min(CHUNK_SIZE);
        let n = self.file.read(&mut buf[..limit]).map_err(|e| {
            warn!("SdGate: read of '{}' failed: {e}", self.name);
            SdError::Io
        })?;
        self.sent += n as u64;
        Ok(n)
    }
}

// -----------------------------------------------------------------------
// Upload
// -----------------------------------------------------------------------

/// A request body being written to the card.
pub struct UploadSession<F> {
    file: F,
    path: String,
    received: u64,
    _lease: SdLease,
}

impl<F: Write> UploadSession<F> {
    pub fn new(file: F, path: impl Into<String>, lease: SdLease) -> Self {
        Self {
            file,
            path: path.into(),
            received: 0,
            _lease: lease,
        }
    }

    /// Append body bytes, [`CHUNK_SIZE`] at a time.
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<(), SdError> {
        for part in data.chunks(CHUNK_SIZE) {
            self.file.write_all(part)?;
        }
        self.received += data.len() as u64;
        Ok(())
    }

    /// Flush and release the card.  Returns the byte count.
    pub fn finish(mut self) -> Result<u64, SdError> {
        self.file.flush()?;
        debug!("SdGate: wrote {} bytes to '{}'", self.received, self.path);
        Ok(self.received)
    }
}
