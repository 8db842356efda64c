//! Clock adapter.
//!
//! Provides the monotonic time base for the sampling loop and a wall-clock
//! offset set through `/settime`.
//!
//! - **`target_os = "espidf"`**: wraps `esp_timer_get_time()` from the
//!   ESP-IDF high-resolution timer (microsecond precision, monotonic).
//! - **`not(target_os = "espidf")`**: uses `std::time::Instant` for
//!   host-side testing and simulation.
//!
//! The wall clock is never read back from the system; it is the monotonic
//! uptime plus an offset, so setting it can never make the sampling time
//! base go backwards.

use std::sync::{Arc, Mutex, PoisonError};

use log::info;

use crate::rtc::DateTime;

/// Shared clock.  Clones see the same wall-clock offset.
#[derive(Debug, Clone)]
pub struct SystemClock {
    /// Unix milliseconds minus uptime milliseconds, once set.
    wall_offset_ms: Arc<Mutex<Option<i64>>>,
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            wall_offset_ms: Arc::new(Mutex::new(None)),
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
        }
    }

    /// Milliseconds since boot (monotonic).
    #[cfg(target_os = "espidf")]
    pub fn uptime_ms(&self) -> u64 {
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64 / 1_000
    }

    /// Milliseconds since boot (monotonic).
    #[cfg(not(target_os = "espidf"))]
    pub fn uptime_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Set the wall clock to `now`.
    pub fn set(&self, now: DateTime) {
        self.set_at(now, self.uptime_ms());
    }

    /// Set the wall clock so that `now` corresponds to `uptime_ms`.
    pub fn set_at(&self, now: DateTime, uptime_ms: u64) {
        let offset = now.to_unix() * 1000 - uptime_ms as i64;
        *self
            .wall_offset_ms
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(offset);
        info!("Clock: set to {now}");
    }

    pub fn is_set(&self) -> bool {
        self.offset().is_some()
    }

    /// Current UTC time, `None` until [`set`](Self::set) was called.
    pub fn now_utc(&self) -> Option<DateTime> {
        self.at(self.uptime_ms())
    }

    /// Wall-clock time at `uptime_ms`.
    pub fn at(&self, uptime_ms: u64) -> Option<DateTime> {
        let offset = self.offset()?;
        DateTime::from_unix((uptime_ms as i64 + offset).div_euclid(1000))
    }

    fn offset(&self) -> Option<i64> {
        *self
            .wall_offset_ms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
