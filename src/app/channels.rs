//! Inter-task command channel.
//!
//! Uses an `embassy-sync` bounded channel to bridge the HTTP server task
//! with the synchronous sampling loop without heap allocation.
//!
//! ```text
//! ┌──────────────┐  AppCommand  ┌───────────────┐
//! │ HTTP server  │─────────────▶│ Sampling loop │
//! │ (handlers)   │              │ (main task)   │
//! └──────────────┘              └───────────────┘
//! ```

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use super::commands::AppCommand;

/// Channel depth for commands.
pub const CMD_DEPTH: usize = 8;

/// Command channel: HTTP handlers → sampling loop.
pub static CMD_CHANNEL: Channel<CriticalSectionRawMutex, AppCommand, CMD_DEPTH> = Channel::new();

/// Post a command.  Returns `false` when the queue is full.
pub fn submit(cmd: AppCommand) -> bool {
    CMD_CHANNEL.try_send(cmd).is_ok()
}

/// Take the next pending command, if any.
pub fn next_command() -> Option<AppCommand> {
    CMD_CHANNEL.try_receive().ok()
}
