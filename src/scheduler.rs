//! Named-deadline scheduler.
//!
//! Every timed action in the firmware is a [`TaskId`] with an absolute
//! deadline on the monotonic clock.  The main loop calls [`Scheduler::tick`]
//! once per iteration; due entries are reported to a
//! [`SchedulerDelegate`] in deadline order and the delegate decides what to
//! do (sample, persist, restart Wi-Fi, reboot, ...).
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Deadline table                          │
//! │                                                              │
//! │  ┌───────────┐  ┌─────────────┐  ┌────────────┐  ┌────────┐  │
//! │  │ Sample    │  │ Persist     │  │ WifiRestart│  │ Reboot │  │
//! │  │ periodic  │  │ periodic    │  │ one-shot   │  │one-shot│  │
//! │  └─────┬─────┘  └──────┬──────┘  └─────┬──────┘  └───┬────┘  │
//! │        └───────────────┴───────┬───────┴─────────────┘       │
//! │                                ▼                             │
//! │                      SchedulerDelegate                       │
//! │                    (main loop dispatches)                    │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use core::fmt;

use log::{debug, info, warn};

use crate::app::ports::{ScheduleFiredKind, SchedulerDelegate};

// ═══════════════════════════════════════════════════════════════
//  Task identifiers
// ═══════════════════════════════════════════════════════════════

/// Every deadline the firmware can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskId {
    /// Sampling tick, every `interval_secs`.
    Sample,
    /// Write accumulator totals to NVS.
    PersistAccumulators,
    /// Tear down and re-join Wi-Fi after new credentials.
    WifiRestart,
    /// Reconnect MQTT after new broker settings.
    MqttRestart,
    /// Soft restart.
    SystemRestart,
    /// Restart after a factory reset.
    SystemReboot,
}

impl TaskId {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Sample => "sample",
            Self::PersistAccumulators => "persist-accumulators",
            Self::WifiRestart => "wifi-restart",
            Self::MqttRestart => "mqtt-restart",
            Self::SystemRestart => "system-restart",
            Self::SystemReboot => "system-reboot",
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ═══════════════════════════════════════════════════════════════
//  Schedule types
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleKind {
    /// Re-armed `period_ms` after each fire.
    Periodic { period_ms: u64 },
    /// Fires once, then the slot is freed.
    OneShot,
}

#[derive(Debug, Clone, Copy)]
struct Deadline {
    task: TaskId,
    due_ms: u64,
    kind: ScheduleKind,
}

/// Maximum number of concurrent deadlines (stack-allocated).
pub const MAX_DEADLINES: usize = 8;

// ═══════════════════════════════════════════════════════════════
//  Scheduler engine
// ═══════════════════════════════════════════════════════════════

/// Fixed-capacity deadline table.  At most one entry per [`TaskId`].
#[derive(Debug, Default)]
pub struct Scheduler {
    slots: [Option<Deadline>; MAX_DEADLINES],
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, deadline: Deadline) -> bool {
        // Re-scheduling a task replaces its pending deadline.
        if let Some(slot) = self
            .slots
            .iter_mut()
            .find(|s| s.is_some_and(|d| d.task == deadline.task))
        {
            *slot = Some(deadline);
            return true;
        }
        match self.slots.iter_mut().find(|s| s.is_none()) {
            Some(slot) => {
                *slot = Some(deadline);
                true
            }
            None => {
                warn!("Scheduler: table full, dropping '{}'", deadline.task);
                false
            }
        }
    }

    /// Run `task` every `period_ms`, first at `first_due_ms`.
    pub fn schedule_periodic(&mut self, task: TaskId, period_ms: u64, first_due_ms: u64) -> bool {
        let period_ms = period_ms.max(1);
        info!("Scheduler: '{task}' every {period_ms} ms");
        self.insert(Deadline {
            task,
            due_ms: first_due_ms,
            kind: ScheduleKind::Periodic { period_ms },
        })
    }

    /// Run `task` once, `delay_ms` after `now_ms`.
    pub fn schedule_once(&mut self, task: TaskId, delay_ms: u64, now_ms: u64) -> bool {
        info!("Scheduler: '{task}' in {delay_ms} ms");
        self.insert(Deadline {
            task,
            due_ms: now_ms.saturating_add(delay_ms),
            kind: ScheduleKind::OneShot,
        })
    }

    /// Drop the pending deadline for `task`, if any.
    pub fn cancel(&mut self, task: TaskId) {
        for slot in &mut self.slots {
            if slot.is_some_and(|d| d.task == task) {
                debug!("Scheduler: cancelled '{task}'");
                *slot = None;
            }
        }
    }

    pub fn is_scheduled(&self, task: TaskId) -> bool {
        self.slots.iter().flatten().any(|d| d.task == task)
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<(TaskId, u64)> {
        self.slots
            .iter()
            .flatten()
            .min_by_key(|d| d.due_ms)
            .map(|d| (d.task, d.due_ms))
    }

    /// Fire every deadline at or before `now_ms`, earliest first.
    ///
    /// A periodic task that fell more than one period behind fires once
    /// and skips the missed slots.
    pub fn tick(&mut self, now_ms: u64, delegate: &mut dyn SchedulerDelegate) {
        loop {
            let next = self
                .slots
                .iter()
                .enumerate()
                .filter_map(|(i, s)| s.map(|d| (i, d)))
                .filter(|(_, d)| d.due_ms <= now_ms)
                .min_by_key(|(_, d)| d.due_ms);
            let Some((index, deadline)) = next else {
                return;
            };

            match deadline.kind {
                ScheduleKind::Periodic { period_ms } => {
                    let mut due = deadline.due_ms.saturating_add(period_ms);
                    if due <= now_ms {
                        let missed = (now_ms - deadline.due_ms) / period_ms;
                        warn!("Scheduler: '{}' skipped {missed} missed slot(s)", deadline.task);
                        due = deadline.due_ms.saturating_add((missed + 1) * period_ms);
                    }
                    self.slots[index] = Some(Deadline { due_ms: due, ..deadline });
                    delegate.on_deadline(deadline.task, ScheduleFiredKind::Periodic);
                }
                ScheduleKind::OneShot => {
                    self.slots[index] = None;
                    info!("Scheduler: '{}' fired", deadline.task);
                    delegate.on_deadline(deadline.task, ScheduleFiredKind::OneShot);
                }
            }
        }
    }

    /// Number of pending deadlines.
    pub fn active_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    struct Order(Vec<u64>, Vec<(TaskId, u64)>);

    impl SchedulerDelegate for Order {
        fn on_deadline(&mut self, task: TaskId, _kind: ScheduleFiredKind) {
            let due = self
                .1
                .iter()
                .find(|(t, _)| *t == task)
                .map_or(0, |(_, d)| *d);
            self.0.push(due);
        }
    }

    const TASKS: [TaskId; 4] = [
        TaskId::WifiRestart,
        TaskId::MqttRestart,
        TaskId::SystemRestart,
        TaskId::SystemReboot,
    ];

    proptest! {
        #[test]
        fn one_shots_fire_in_nondecreasing_order(delays in proptest::array::uniform4(0u64..10_000)) {
            let mut sched = Scheduler::new();
            let mut plan = Vec::new();
            for (task, delay) in TASKS.iter().zip(delays) {
                sched.schedule_once(*task, delay, 0);
                plan.push((*task, delay));
            }
            let mut order = Order(Vec::new(), plan);
            sched.tick(10_000, &mut order);
            prop_assert_eq!(order.0.len(), 4);
            prop_assert!(order.0.windows(2).all(|w| w[0] <= w[1]));
        }
    }
}
