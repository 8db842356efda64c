//! Unified error types for the emonDC firmware.
//!
//! A single `Error` enum that every subsystem can convert into, keeping the
//! sampling loop's error handling uniform.  All variants are `Copy` so they
//! can be carried through FSM context and HTTP responses without
//! allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Conversion or accumulation was rejected.
    Measure(MeasureError),
    /// The serial link to the sensor board failed this tick.
    Link(LinkError),
    /// SD card access failed.
    Sd(SdError),
    /// Configuration is invalid or could not be loaded.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Measure(e) => write!(f, "measure: {e}"),
            Self::Link(e) => write!(f, "link: {e}"),
            Self::Sd(e) => write!(f, "sd: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Measurement errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasureError {
    /// Channel identifier is not A or B.
    InvalidChannel,
    /// The monotonic clock went backwards between two ticks.
    NonMonotonicTime,
    /// Gain value is not one the ADC front end supports.
    UnsupportedGain(u16),
}

impl fmt::Display for MeasureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidChannel => write!(f, "invalid channel"),
            Self::NonMonotonicTime => write!(f, "non-monotonic time"),
            Self::UnsupportedGain(g) => write!(f, "unsupported gain {g}"),
        }
    }
}

impl From<MeasureError> for Error {
    fn from(e: MeasureError) -> Self {
        Self::Measure(e)
    }
}

// ---------------------------------------------------------------------------
// Serial link errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// No complete frame arrived since the previous tick.
    SerialTimeout,
    /// A frame arrived but could not be parsed.
    MalformedFrame,
    /// A line exceeded the receive buffer and was dropped.
    Overflow,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SerialTimeout => write!(f, "serial timeout"),
            Self::MalformedFrame => write!(f, "malformed frame"),
            Self::Overflow => write!(f, "line overflow"),
        }
    }
}

impl From<LinkError> for Error {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

// ---------------------------------------------------------------------------
// SD card errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdError {
    /// Another transfer holds the card.
    Busy,
    /// Card absent or not mounted.
    Unavailable,
    /// Path does not exist.
    NotFound,
    /// Operation not allowed on a directory.
    IsDirectory,
    /// Path escapes the card root or is otherwise unusable.
    InvalidPath,
    /// Filesystem read/write failed.
    Io,
}

impl SdError {
    /// HTTP status the web layer reports for this error.
    pub const fn http_status(self) -> u16 {
        match self {
            Self::Busy => 429,
            Self::Unavailable => 428,
            Self::NotFound => 404,
            Self::IsDirectory => 405,
            Self::InvalidPath => 400,
            Self::Io => 500,
        }
    }
}

impl fmt::Display for SdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy => write!(f, "SD card busy"),
            Self::Unavailable => write!(f, "SD card busy or not initialized"),
            Self::NotFound => write!(f, "path not found"),
            Self::IsDirectory => write!(f, "path is a directory"),
            Self::InvalidPath => write!(f, "invalid path"),
            Self::Io => write!(f, "SD I/O error"),
        }
    }
}

impl From<SdError> for Error {
    fn from(e: SdError) -> Self {
        Self::Sd(e)
    }
}

impl From<std::io::Error> for SdError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound,
            _ => Self::Io,
        }
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
