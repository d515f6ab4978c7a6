//! In-memory partition of the visible task set and the state machine that
//! keeps it consistent under concurrent edits.
//!
//! The reconciler owns two ordered sequences (pending, completed) and
//! applies three kinds of transitions: local optimistic mutations, remote
//! create/update/delete events from other clients, and wholesale snapshot
//! replacement. A task id lives in at most one sequence at any time;
//! relocations always remove-by-id first, so duplicate event delivery is
//! idempotent.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{EventKind, StoreEvent, Task};

/// Ordered split of the visible tasks into pending and completed.
///
/// Order within a sequence is arrival order; relocated or newly created
/// tasks are appended at the end of their destination. Sorting for display
/// is the presentation layer's concern.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    pub pending: Vec<Task>,
    pub completed: Vec<Task>,
}

impl Partition {
    /// Partition a snapshot: completed-or-snoozed tasks go to `completed`,
    /// the rest to `pending`, preserving snapshot order.
    pub fn from_snapshot(tasks: Vec<Task>) -> Self {
        let mut partition = Partition::default();
        for task in tasks {
            if task.completed || task.snoozed {
                partition.completed.push(task);
            } else {
                partition.pending.push(task);
            }
        }
        partition
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.pending.iter().any(|t| t.id == task_id)
            || self.completed.iter().any(|t| t.id == task_id)
    }

    pub fn get(&self, task_id: &str) -> Option<&Task> {
        self.pending
            .iter()
            .chain(self.completed.iter())
            .find(|t| t.id == task_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len() + self.completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.completed.is_empty()
    }

    /// Remove a task by id from whichever sequence holds it.
    fn remove(&mut self, task_id: &str) -> Option<Task> {
        if let Some(pos) = self.pending.iter().position(|t| t.id == task_id) {
            return Some(self.pending.remove(pos));
        }
        if let Some(pos) = self.completed.iter().position(|t| t.id == task_id) {
            return Some(self.completed.remove(pos));
        }
        None
    }
}

/// Outcome of a local optimistic mutation: the task as moved, plus the
/// completion state it was in before. Callers use the pair to issue the
/// confirming store write and to resolve trigger links.
#[derive(Debug, Clone)]
pub struct AppliedMutation {
    pub task: Task,
    pub was_completed: bool,
}

/// State machine over a [`Partition`].
#[derive(Debug)]
pub struct StateReconciler {
    local_user: String,
    partition: Partition,
}

impl StateReconciler {
    pub fn new(local_user: impl Into<String>) -> Self {
        Self {
            local_user: local_user.into(),
            partition: Partition::default(),
        }
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn local_user(&self) -> &str {
        &self.local_user
    }

    /// Replace both sequences wholesale from a fresh snapshot.
    pub fn replace_snapshot(&mut self, tasks: Vec<Task>) {
        self.partition = Partition::from_snapshot(tasks);
    }

    /// Apply a local completion toggle before the store confirms the write.
    ///
    /// Moves the task to the sequence matching `complete` and, when
    /// completing, stamps the completion time and actor. Returns `None` when
    /// the id is not in the partition.
    pub fn apply_local(
        &mut self,
        task_id: &str,
        complete: bool,
        now_ms: i64,
    ) -> Option<AppliedMutation> {
        let mut task = self.partition.remove(task_id)?;
        let was_completed = task.completed;

        task.completed = complete;
        if complete {
            task.snoozed = false;
            task.last_completed_at = Some(now_ms);
            task.last_completed_by = Some(self.local_user.clone());
        }

        let applied = AppliedMutation {
            task: task.clone(),
            was_completed,
        };
        if complete {
            self.partition.completed.push(task);
        } else {
            self.partition.pending.push(task);
        }
        Some(applied)
    }

    /// Apply a remote create/update/delete event from another client.
    pub fn apply_remote(&mut self, event: &StoreEvent) {
        match event.kind {
            EventKind::Create => self.apply_remote_create(&event.task),
            EventKind::Update => self.apply_remote_update(&event.task),
            EventKind::Delete => {
                // Absence is a no-op, not an error.
                self.partition.remove(&event.task.id);
            }
        }
    }

    fn apply_remote_create(&mut self, task: &Task) {
        if task.created_by == self.local_user {
            // Our own create; the local flow already placed it.
            return;
        }
        if self.partition.contains(&task.id) {
            return;
        }
        // New tasks are always pending, never born completed.
        self.partition.pending.push(task.clone());
    }

    fn apply_remote_update(&mut self, task: &Task) {
        if task.last_completed_by.as_deref() == Some(self.local_user.as_str()) {
            // Echo of our own optimistic mutation; re-applying would re-move
            // the task.
            return;
        }
        if self.partition.remove(&task.id).is_none() {
            // Event raced ahead of the snapshot; a refetch will pick it up.
            debug!(task = %task.id, "dropping update for unknown task");
            return;
        }
        if task.completed {
            self.partition.completed.push(task.clone());
        } else {
            self.partition.pending.push(task.clone());
        }
    }
}
