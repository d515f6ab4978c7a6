//! Core types for the chore-sync engine.

use serde::{Deserialize, Serialize};

/// Reserved actor identity for history entries written by the engine itself
/// (auto-renewal and trigger chains). Never a valid family member id;
/// display layers recognize it to render "auto renewed" instead of a name.
pub const AUTO_RENEW_ACTOR: &str = "auto-renew";

/// Unit of a task's cooldown interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CooldownUnit {
    Day,
    Week,
    Month,
    Year,
    /// The task never becomes due again on its own.
    #[default]
    Never,
}

impl CooldownUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            CooldownUnit::Day => "day",
            CooldownUnit::Week => "week",
            CooldownUnit::Month => "month",
            CooldownUnit::Year => "year",
            CooldownUnit::Never => "never",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "day" => Some(CooldownUnit::Day),
            "week" => Some(CooldownUnit::Week),
            "month" => Some(CooldownUnit::Month),
            "year" => Some(CooldownUnit::Year),
            "never" => Some(CooldownUnit::Never),
            _ => None,
        }
    }
}

/// A recurring household task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub family: String,
    pub title: String,
    pub description: String,
    pub created_by: String,

    pub completed: bool,
    pub snoozed: bool,

    /// Cooldown magnitude; 0 means due again immediately (every cycle).
    pub cooldown: u32,
    pub cooldown_unit: CooldownUnit,
    /// Epoch milliseconds of the last completion, if any.
    pub last_completed_at: Option<i64>,
    pub last_completed_by: Option<String>,

    /// Id of another task reopened when this one is completed.
    /// Never equal to `id`; self-links are rejected at write time.
    pub triggers_task: Option<String>,

    /// User ids the task is restricted to; empty means visible to everyone
    /// in the family.
    pub can_view: Vec<String>,

    pub created_at: i64,
    pub updated_at: i64,
}

impl Task {
    /// Whether the given user may see this task.
    pub fn visible_to(&self, user_id: &str) -> bool {
        self.can_view.is_empty() || self.can_view.iter().any(|u| u == user_id)
    }
}

/// Input for creating a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub family: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub created_by: String,
    #[serde(default)]
    pub cooldown: u32,
    #[serde(default)]
    pub cooldown_unit: CooldownUnit,
    #[serde(default)]
    pub triggers_task: Option<String>,
    #[serde(default)]
    pub can_view: Vec<String>,
}

/// Partial update for a task. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub completed: Option<bool>,
    pub snoozed: Option<bool>,
    pub cooldown: Option<u32>,
    pub cooldown_unit: Option<CooldownUnit>,
    pub last_completed_at: Option<i64>,
    pub last_completed_by: Option<String>,
    /// `Some(None)` clears the trigger link.
    pub triggers_task: Option<Option<String>>,
    pub can_view: Option<Vec<String>>,
}

impl TaskPatch {
    /// Patch that reopens a task after its cooldown elapsed.
    pub fn renewal() -> Self {
        Self {
            completed: Some(false),
            snoozed: Some(false),
            ..Self::default()
        }
    }

    /// Patch that reopens a task through a trigger link. Snooze state is
    /// left alone; only the completion flag is cleared.
    pub fn reopen() -> Self {
        Self {
            completed: Some(false),
            ..Self::default()
        }
    }
}

/// Immutable audit record of a completion state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub task_id: String,
    /// Acting user, or [`AUTO_RENEW_ACTOR`].
    pub user_id: String,
    /// The new completion state being recorded.
    pub completed: bool,
    pub created_at: i64,
}

impl HistoryEntry {
    pub fn is_auto_renew(&self) -> bool {
        self.user_id == AUTO_RENEW_ACTOR
    }
}

/// Kind of a live change event delivered by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Create,
    Update,
    Delete,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Create => "create",
            EventKind::Update => "update",
            EventKind::Delete => "delete",
        }
    }
}

/// A live change event for a task in scope. Carries the full record as it
/// looked when the event was published (for deletes, the record as deleted).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreEvent {
    pub kind: EventKind,
    pub task: Task,
}
