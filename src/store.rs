//! The task store collaborator: the interface the engine talks to, plus the
//! SQLite-backed implementation with live change notifications.

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::db::Database;
use crate::error::StoreResult;
use crate::types::{EventKind, HistoryEntry, NewTask, StoreEvent, Task, TaskPatch};

/// Buffered events per subscriber before old ones are dropped.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Storage and change-notification interface for a family's task set.
///
/// Writes follow last-write-wins per field. Every successful mutation is
/// published to live subscribers, including the client that issued it (echo
/// suppression is the reconciler's job).
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Point-in-time snapshot of all tasks in a family.
    async fn list_tasks(&self, family: &str) -> StoreResult<Vec<Task>>;

    async fn create_task(&self, input: NewTask) -> StoreResult<Task>;

    /// Partial update. Fails with `NotFound` for unknown ids and
    /// `Validation` for self-referential trigger links.
    async fn update_task(&self, task_id: &str, patch: TaskPatch) -> StoreResult<Task>;

    async fn delete_task(&self, task_id: &str) -> StoreResult<()>;

    /// Append an audit entry recording a completion state change.
    async fn create_history_entry(
        &self,
        task_id: &str,
        actor: &str,
        completed: bool,
    ) -> StoreResult<HistoryEntry>;

    /// Family-wide audit trail, most recent first.
    async fn list_history(&self, family: &str, limit: usize) -> StoreResult<Vec<HistoryEntry>>;

    /// Start receiving live change events for a family. Delivery stops when
    /// the returned subscription is dropped.
    fn subscribe(&self, family: &str) -> StoreResult<Subscription>;
}

/// Live event stream for one family. Dropping it unsubscribes.
pub struct Subscription {
    rx: broadcast::Receiver<StoreEvent>,
    family: String,
}

impl Subscription {
    pub fn new(rx: broadcast::Receiver<StoreEvent>, family: impl Into<String>) -> Self {
        Self {
            rx,
            family: family.into(),
        }
    }

    /// Stop receiving events. Dropping the subscription has the same
    /// effect; this just makes the intent explicit at call sites.
    pub fn close(self) {}

    /// Next event for the subscribed family. Returns `None` once the store
    /// side has shut down. A slow consumer may miss events; the miss is
    /// logged and the stream continues with the next available event.
    pub async fn next(&mut self) -> Option<StoreEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.task.family == self.family => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "subscription lagged; refetch to resync");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// SQLite-backed task store with in-process change fan-out.
#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
    events: broadcast::Sender<StoreEvent>,
}

impl SqliteStore {
    /// Open or create the store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Ok(Self::with_db(Database::open(path)?))
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        Ok(Self::with_db(Database::open_in_memory()?))
    }

    fn with_db(db: Database) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { db, events }
    }

    /// Direct access to the underlying database.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Number of live subscriptions on this store.
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    fn publish(&self, kind: EventKind, task: Task) {
        debug!(task = %task.id, kind = kind.as_str(), "publishing store event");
        // Send only fails when nobody is subscribed.
        let _ = self.events.send(StoreEvent { kind, task });
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn list_tasks(&self, family: &str) -> StoreResult<Vec<Task>> {
        Ok(self.db.list_tasks(family)?)
    }

    async fn create_task(&self, input: NewTask) -> StoreResult<Task> {
        let task = self.db.create_task(input)?;
        self.publish(EventKind::Create, task.clone());
        Ok(task)
    }

    async fn update_task(&self, task_id: &str, patch: TaskPatch) -> StoreResult<Task> {
        let task = self.db.update_task(task_id, patch)?;
        self.publish(EventKind::Update, task.clone());
        Ok(task)
    }

    async fn delete_task(&self, task_id: &str) -> StoreResult<()> {
        let task = self.db.delete_task(task_id)?;
        self.publish(EventKind::Delete, task);
        Ok(())
    }

    async fn create_history_entry(
        &self,
        task_id: &str,
        actor: &str,
        completed: bool,
    ) -> StoreResult<HistoryEntry> {
        Ok(self.db.create_history_entry(task_id, actor, completed)?)
    }

    async fn list_history(&self, family: &str, limit: usize) -> StoreResult<Vec<HistoryEntry>> {
        Ok(self.db.list_history(family, limit)?)
    }

    fn subscribe(&self, family: &str) -> StoreResult<Subscription> {
        Ok(Subscription::new(self.events.subscribe(), family))
    }
}
