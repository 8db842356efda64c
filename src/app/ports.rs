//! Port traits form the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ AppService (domain)
//! ```
//!
//! Driven adapters (serial link, event sinks, storage, SD card, radio)
//! implement these traits.  The [`AppService`](super::service::AppService)
//! and the web [`Router`](crate::web::Router) consume them via generics, so
//! the domain core never touches hardware directly.
//!
//! - **ConfigPort** implementations MUST validate before persisting.
//! - All port errors are typed; callers handle every variant explicitly.

use core::fmt;
use std::io::{Read, Seek, Write};

use serde::Serialize;

use crate::config::DeviceConfig;
use crate::error::{LinkError, SdError};
use crate::measure::RawFrame;
use crate::scheduler::TaskId;

// ───────────────────────────────────────────────────────────────
// Sample source (driven adapter: sensor board → domain)
// ───────────────────────────────────────────────────────────────

/// Read-side port: the sampling loop calls this once per tick.
pub trait SampleSource {
    /// Newest frame since the previous call.
    ///
    /// `SerialTimeout` when nothing arrived, `MalformedFrame` when the line
    /// could not be parsed.
    fn acquire(&mut self) -> Result<RawFrame, LinkError>;

    /// Last complete raw line, for `/lastvalues`.
    fn last_line(&self) -> &str;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → log / SD / network)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port.  Adapters decide where they go (serial log, SD
/// card, Emoncms, MQTT).
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AppEvent);
}

impl<A: EventSink, B: EventSink> EventSink for (A, B) {
    fn emit(&mut self, event: &super::events::AppEvent) {
        self.0.emit(event);
        self.1.emit(event);
    }
}

impl<A: EventSink, B: EventSink, C: EventSink> EventSink for (A, B, C) {
    fn emit(&mut self, event: &super::events::AppEvent) {
        self.0.emit(event);
        self.1.emit(event);
        self.2.emit(event);
    }
}

impl<T: EventSink + ?Sized> EventSink for &mut T {
    fn emit(&mut self, event: &super::events::AppEvent) {
        (**self).emit(event);
    }
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists device configuration.
///
/// Implementations MUST call [`DeviceConfig::validate`] before persisting.
/// Invalid values are rejected with [`ConfigError::ValidationFailed`], never
/// clamped.
pub trait ConfigPort {
    /// Load configuration.  Returns [`DeviceConfig::default()`] if no
    /// stored config exists.
    fn load(&self) -> Result<DeviceConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&self, config: &DeviceConfig) -> Result<(), ConfigError>;

    /// Erase the stored configuration (factory reset).
    fn erase(&self) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage for accumulator totals and other blobs.
///
/// Write operations MUST be atomic: no partial writes on power loss.
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// SD card port (driven adapter: web layer / logger ↔ FAT volume)
// ───────────────────────────────────────────────────────────────

/// Card-level information for `GET /sd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CardInfo {
    #[serde(rename = "type")]
    pub card_type: &'static str,
    pub size: u64,
    #[serde(rename = "totalBytes")]
    pub total_bytes: u64,
    #[serde(rename = "usedBytes")]
    pub used_bytes: u64,
}

/// One directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    /// Seconds since the Unix epoch, 0 when unknown.
    pub modified: i64,
}

/// File-system operations on the SD card.  Paths are absolute, rooted at
/// the card (`/datalog.csv`).
pub trait SdCard {
    type File: Read + Write + Seek + Send + 'static;

    /// Whether a card is inserted and mounted.
    fn is_present(&self) -> bool;

    fn card_info(&self) -> Result<CardInfo, SdError>;

    fn stat(&self, path: &str) -> Result<SdEntry, SdError>;

    fn list(&self, dir: &str) -> Result<Vec<SdEntry>, SdError>;

    /// Open an existing file for reading.
    fn open(&self, path: &str) -> Result<Self::File, SdError>;

    /// Create (or truncate) a file for writing.
    fn create(&self, path: &str) -> Result<Self::File, SdError>;

    /// Open a file for appending, creating it if missing.  The flag is
    /// `true` when the file was newly created.
    fn append(&self, path: &str) -> Result<(Self::File, bool), SdError>;

    /// Remove a file.  Directories are refused with `IsDirectory`.
    fn remove(&self, path: &str) -> Result<(), SdError>;
}

// ───────────────────────────────────────────────────────────────
// Radio port (driven adapter: network manager ↔ Wi-Fi driver)
// ───────────────────────────────────────────────────────────────

/// An access point seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    pub ssid: String,
    pub rssi: i8,
}

/// Low-level Wi-Fi operations the network manager drives.
///
/// Every call returns promptly; connection progress is observed through
/// [`RadioPort::is_connected`] on later polls.
pub trait RadioPort {
    /// Bring up the soft-AP with `ssid` (open network).
    fn start_ap(&mut self, ssid: &str) -> Result<(), RadioError>;

    fn stop_ap(&mut self) -> Result<(), RadioError>;

    /// Begin joining `ssid`.  Returns immediately.
    fn begin_join(&mut self, ssid: &str, pass: &str) -> Result<(), RadioError>;

    fn disconnect(&mut self) -> Result<(), RadioError>;

    fn is_connected(&self) -> bool;

    fn rssi(&self) -> Option<i8>;

    /// Station IP address, when connected.
    fn ip_address(&self) -> Option<[u8; 4]>;

    fn scan(&mut self) -> Result<Vec<ScanResult>, RadioError>;
}

// ───────────────────────────────────────────────────────────────
// Scheduler delegate (decouples scheduler from the main loop)
// ───────────────────────────────────────────────────────────────

/// Callback trait that the scheduler invokes when a deadline fires.
///
/// The main loop implements this by dispatching on the [`TaskId`]; the
/// scheduler itself knows nothing about sampling, Wi-Fi or reboots.
pub trait SchedulerDelegate {
    fn on_deadline(&mut self, task: TaskId, kind: ScheduleFiredKind);
}

/// Discriminant passed to [`SchedulerDelegate::on_deadline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleFiredKind {
    /// A recurring deadline fired and was re-armed.
    Periodic,
    /// A one-shot deadline fired and was removed.
    OneShot,
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// No config found in storage (first boot).
    NotFound,
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// Underlying storage is full.
    StorageFull,
    /// Generic I/O error from the storage backend.
    IoError,
    /// The sampling loop could not take the change; nothing was saved.
    Busy,
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Generic I/O error.
    IoError,
    /// Stored blob could not be decoded.
    Corrupted,
}

/// Errors from [`RadioPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioError {
    InvalidSsid,
    InvalidPassword,
    Driver,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "{msg}"),
            Self::StorageFull => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
            Self::Busy => write!(f, "command queue full"),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
            Self::Corrupted => write!(f, "stored data corrupted"),
        }
    }
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSsid => write!(f, "SSID invalid (must be 1-32 printable ASCII bytes)"),
            Self::InvalidPassword => write!(f, "password invalid (8-64 bytes, or empty for open)"),
            Self::Driver => write!(f, "Wi-Fi driver error"),
        }
    }
}

impl From<ConfigError> for crate::error::Error {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::ValidationFailed(msg) => Self::Config(msg),
            ConfigError::NotFound => Self::Config("config not found"),
            ConfigError::Corrupted => Self::Config("config corrupted"),
            ConfigError::StorageFull => Self::Config("storage full"),
            ConfigError::IoError => Self::Config("config I/O error"),
            ConfigError::Busy => Self::Config("command queue full"),
        }
    }
}
