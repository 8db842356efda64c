//! Inbound commands to the sampling loop.
//!
//! HTTP handlers never touch engine state directly.  They post these
//! through [`CMD_CHANNEL`](super::channels::CMD_CHANNEL) and the main loop
//! applies them between ticks.

use crate::config::DeviceConfig;
use crate::scheduler::TaskId;
use crate::serial::codec::Line;

/// Commands that external adapters can send into the application core.
#[derive(Debug, Clone)]
pub enum AppCommand {
    /// Apply an already validated and persisted configuration.
    UpdateConfig(Box<DeviceConfig>),

    /// Zero every accumulator (`/clearacc`).
    ResetAccumulators,

    /// Mark the battery fully charged (`/resetah`).
    MarkFull,

    /// Feed a line to the serial link as if received (`/input`).
    InjectFrame(Line),

    /// Arm a one-shot deadline (restarts, Wi-Fi and MQTT reconnects).
    Schedule { task: TaskId, delay_ms: u64 },

    /// Drop to access-point-only mode (`/apoff`).
    ApOff,
}
