//! Concrete state handler functions and table builder.
//!
//! Each state is defined by three plain `fn` pointers: no closures, no
//! dynamic dispatch, no heap.
//!
//! ```text
//!  IDLE ──[frame pending]──▶ SAMPLING ──[measured]──▶ REPORTING
//!    ▲                          │                         │
//!    │        [acquire failed / rejected]                 │
//!    ├──────────────────────────┘                         │
//!    └──────────────────[report delivered]────────────────┘
//! ```

use super::context::{FsmContext, TickOutcome};
use super::{StateDescriptor, StateId};
use crate::app::report::Report;
use log::{debug, warn};

// ═══════════════════════════════════════════════════════════════════════════
//  Table builder
// ═══════════════════════════════════════════════════════════════════════════

/// Build the static state table.  Called once at startup.
pub fn build_state_table() -> [StateDescriptor; StateId::COUNT] {
    [
        // Index 0: Idle
        StateDescriptor {
            id: StateId::Idle,
            name: "Idle",
            on_enter: None,
            on_exit: None,
            on_update: idle_update,
        },
        // Index 1: Sampling
        StateDescriptor {
            id: StateId::Sampling,
            name: "Sampling",
            on_enter: None,
            on_exit: Some(sampling_exit),
            on_update: sampling_update,
        },
        // Index 2: Reporting
        StateDescriptor {
            id: StateId::Reporting,
            name: "Reporting",
            on_enter: Some(reporting_enter),
            on_exit: None,
            on_update: reporting_update,
        },
    ]
}

// ═══════════════════════════════════════════════════════════════════════════
//  IDLE state
// ═══════════════════════════════════════════════════════════════════════════

fn idle_update(ctx: &mut FsmContext) -> Option<StateId> {
    ctx.frame.is_some().then_some(StateId::Sampling)
}

// ═══════════════════════════════════════════════════════════════════════════
//  SAMPLING state
// ═══════════════════════════════════════════════════════════════════════════

fn sampling_update(ctx: &mut FsmContext) -> Option<StateId> {
    let Some(frame) = ctx.frame.take() else {
        return Some(StateId::Idle);
    };

    let raw = match frame {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Sampling: tick skipped, {e}");
            ctx.outcome = Some(TickOutcome::Skipped(e));
            return Some(StateId::Idle);
        }
    };

    match ctx.meter.process(&raw, ctx.now_ms) {
        Ok(m) => {
            ctx.report = Some(Report::new(&m, ctx.wall_time, ctx.now_ms));
            ctx.measurement = Some(m);
            ctx.outcome = Some(TickOutcome::Reported);
            Some(StateId::Reporting)
        }
        Err(e) => {
            warn!("Sampling: measurement rejected, {e}");
            ctx.outcome = Some(TickOutcome::Rejected(e));
            Some(StateId::Idle)
        }
    }
}

fn sampling_exit(ctx: &mut FsmContext) {
    // An abandoned tick must not leave a frame for the next one.
    ctx.frame = None;
}

// ═══════════════════════════════════════════════════════════════════════════
//  REPORTING state
// ═══════════════════════════════════════════════════════════════════════════

fn reporting_enter(ctx: &mut FsmContext) {
    ctx.delivered = false;
    debug!("Reporting: tick {} ready", ctx.total_ticks);
}

fn reporting_update(ctx: &mut FsmContext) -> Option<StateId> {
    ctx.delivered.then_some(StateId::Idle)
}
