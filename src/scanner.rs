//! Past-due scan: finds completed or snoozed tasks whose cooldown has
//! elapsed and turns them into renewal commands.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::cooldown;
use crate::store::TaskStore;
use crate::types::{Task, TaskPatch};

/// A pending write against the store: reset a task, and optionally record a
/// history entry for the reset.
#[derive(Debug, Clone, PartialEq)]
pub struct Renewal {
    pub task_id: String,
    pub patch: TaskPatch,
    /// Whether the reset is recorded in the audit trail. Snoozed-only resets
    /// are silent; a snooze is a private deferral, not an audited completion.
    pub record_history: bool,
}

impl Renewal {
    /// Renewal of a task whose cooldown elapsed.
    pub fn past_due(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            patch: TaskPatch::renewal(),
            record_history: task.completed && !task.snoozed,
        }
    }
}

/// Scan a snapshot of tasks and emit a renewal for every completed or
/// snoozed task that is past due. The snapshot itself is not mutated.
pub fn scan(tasks: &[Task], now: DateTime<Utc>) -> Vec<Renewal> {
    let mut renewals = Vec::new();

    for task in tasks {
        if !task.completed && !task.snoozed {
            continue;
        }
        let Some(last) = task.last_completed_at else {
            continue;
        };
        if cooldown::due_status(now, last, task.cooldown, task.cooldown_unit) {
            debug!(task = %task.id, unit = task.cooldown_unit.as_str(), "task past due");
            renewals.push(Renewal::past_due(task));
        }
    }

    renewals
}

/// Issue renewal writes against the store, best-effort. One task's failure
/// is logged and does not block renewal of the rest. Returns the number of
/// tasks successfully reset.
pub async fn apply(store: &dyn TaskStore, renewals: &[Renewal], actor: &str) -> usize {
    let mut applied = 0;

    for renewal in renewals {
        if let Err(err) = store.update_task(&renewal.task_id, renewal.patch.clone()).await {
            warn!(task = %renewal.task_id, %err, "renewal write failed, continuing scan");
            continue;
        }
        if renewal.record_history {
            if let Err(err) = store
                .create_history_entry(&renewal.task_id, actor, false)
                .await
            {
                warn!(task = %renewal.task_id, %err, "renewal history write failed");
            }
        }
        applied += 1;
    }

    applied
}
