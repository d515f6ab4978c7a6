//! Trigger-chain resolution: completing a task can reopen one linked task.

use crate::scanner::Renewal;
use crate::types::{Task, TaskPatch};

/// Resolve the trigger link for a completion transition.
///
/// Fires only on incomplete -> complete, and only for a valid non-self link.
/// The reopen is unconditional: the linked task is set incomplete whatever
/// its current state, and the reset is recorded in the audit trail under the
/// reserved auto-renew actor. Chains do not cascade: if the linked task has
/// its own trigger, that hop fires when *it* is completed, not here.
pub fn resolve(task: &Task, was_completed: bool, now_completed: bool) -> Option<Renewal> {
    if was_completed || !now_completed {
        return None;
    }
    let target = task.triggers_task.as_deref()?;
    if target == task.id {
        // Self-links are rejected at write time; an old record carrying one
        // is ignored rather than looped.
        return None;
    }
    Some(Renewal {
        task_id: target.to_string(),
        patch: TaskPatch::reopen(),
        record_history: true,
    })
}
