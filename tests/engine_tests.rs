//! End-to-end engine tests: snapshot building, optimistic toggles, trigger
//! chains, auto-renewal, and live remote event merging over a real
//! SQLite-backed store.

use std::sync::Arc;
use std::time::Duration;

use chore_sync::config::EngineConfig;
use chore_sync::engine::{EngineInput, PartitionView, SyncEngine};
use chore_sync::error::{StoreError, StoreResult};
use chore_sync::scanner;
use chore_sync::store::{SqliteStore, TaskStore};
use chore_sync::types::{
    AUTO_RENEW_ACTOR, CooldownUnit, NewTask, Task, TaskPatch,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

fn setup_store() -> Arc<SqliteStore> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    Arc::new(SqliteStore::open_in_memory().expect("Failed to create in-memory store"))
}

fn new_task(title: &str, created_by: &str) -> NewTask {
    NewTask {
        family: "fam".to_string(),
        title: title.to_string(),
        description: String::new(),
        created_by: created_by.to_string(),
        cooldown: 1,
        cooldown_unit: CooldownUnit::Day,
        triggers_task: None,
        can_view: vec![],
    }
}

fn days_ago_ms(days: i64) -> i64 {
    (chrono::Utc::now() - chrono::Duration::days(days)).timestamp_millis()
}

/// Mark a task completed in the database without publishing an event, as if
/// it happened before this session started.
fn seed_completed(store: &SqliteStore, task_id: &str, by: &str, at_ms: i64) {
    store
        .database()
        .update_task(
            task_id,
            TaskPatch {
                completed: Some(true),
                last_completed_at: Some(at_ms),
                last_completed_by: Some(by.to_string()),
                ..TaskPatch::default()
            },
        )
        .expect("Failed to seed completed task");
}

/// Start an engine for user `local_user` on a background task.
fn start_engine(
    store: &Arc<SqliteStore>,
    local_user: &str,
) -> (
    mpsc::Sender<EngineInput>,
    PartitionView,
    JoinHandle<StoreResult<()>>,
) {
    let store: Arc<dyn TaskStore> = Arc::clone(store) as Arc<dyn TaskStore>;
    let mut engine = SyncEngine::new(store, "fam", local_user, EngineConfig::default());
    let view = engine.view();
    let (tx, rx) = engine.input_channel();
    let handle = tokio::spawn(async move { engine.run(rx).await });
    (tx, view, handle)
}

async fn toggle(tx: &mpsc::Sender<EngineInput>, task_id: &str, complete: bool) -> StoreResult<()> {
    let (reply_tx, reply_rx) = oneshot::channel();
    tx.send(EngineInput::Toggle {
        task_id: task_id.to_string(),
        complete,
        reply: Some(reply_tx),
    })
    .await
    .expect("engine input queue closed");
    reply_rx.await.expect("engine dropped the reply")
}

/// Poll until `cond` holds or a second has passed.
async fn wait_for(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

fn pending_ids(view: &PartitionView) -> Vec<String> {
    view.load().pending.iter().map(|t| t.id.clone()).collect()
}

fn completed_ids(view: &PartitionView) -> Vec<String> {
    view.load().completed.iter().map(|t| t.id.clone()).collect()
}

mod snapshot_tests {
    use super::*;

    #[tokio::test]
    async fn initial_snapshot_partitions_pending_and_completed() {
        let store = setup_store();
        let open = store.create_task(new_task("Dishes", "alice")).await.unwrap();
        let done = store.create_task(new_task("Vacuum", "alice")).await.unwrap();
        // Recently completed: within cooldown, stays in the completed lane.
        seed_completed(&store, &done.id, "bob", days_ago_ms(0));

        let (tx, view, handle) = start_engine(&store, "alice");

        wait_for("initial snapshot", || view.load().len() == 2).await;
        assert_eq!(pending_ids(&view), vec![open.id.clone()]);
        assert_eq!(completed_ids(&view), vec![done.id.clone()]);

        tx.send(EngineInput::Shutdown).await.unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn snoozed_tasks_land_in_the_completed_lane() {
        let store = setup_store();
        let task = store.create_task(new_task("Dishes", "alice")).await.unwrap();
        store
            .database()
            .update_task(
                &task.id,
                TaskPatch {
                    snoozed: Some(true),
                    last_completed_at: Some(days_ago_ms(0)),
                    ..TaskPatch::default()
                },
            )
            .unwrap();

        let (tx, view, handle) = start_engine(&store, "alice");

        wait_for("snapshot", || view.load().len() == 1).await;
        assert_eq!(completed_ids(&view), vec![task.id.clone()]);

        tx.send(EngineInput::Shutdown).await.unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn tasks_hidden_from_local_user_are_excluded() {
        let store = setup_store();
        let mut private = new_task("Gift shopping", "bob");
        private.can_view = vec!["bob".to_string()];
        store.create_task(private).await.unwrap();
        let visible = store.create_task(new_task("Dishes", "bob")).await.unwrap();

        let (tx, view, handle) = start_engine(&store, "alice");

        wait_for("snapshot", || view.load().len() == 1).await;
        assert_eq!(pending_ids(&view), vec![visible.id.clone()]);

        tx.send(EngineInput::Shutdown).await.unwrap();
        handle.await.unwrap().unwrap();
    }
}

mod renewal_tests {
    use super::*;

    #[tokio::test]
    async fn past_due_task_is_renewed_on_snapshot() {
        let store = setup_store();
        let task = store.create_task(new_task("Dishes", "alice")).await.unwrap();
        seed_completed(&store, &task.id, "bob", days_ago_ms(2));

        let (tx, view, handle) = start_engine(&store, "alice");

        // The local copy is reset before partitioning.
        wait_for("renewed task in pending", || {
            pending_ids(&view) == vec![task.id.clone()]
        })
        .await;

        // The fire-and-forget store write lands eventually.
        let db = store.database().clone();
        let id = task.id.clone();
        wait_for("store write", || {
            !db.get_task(&id).unwrap().unwrap().completed
        })
        .await;

        // Exactly one audit entry, attributed to the reserved actor.
        let history = store.list_history("fam", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].user_id, AUTO_RENEW_ACTOR);
        assert!(!history[0].completed);

        tx.send(EngineInput::Shutdown).await.unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn past_due_snoozed_task_resets_without_history() {
        let store = setup_store();
        let task = store.create_task(new_task("Dishes", "alice")).await.unwrap();
        store
            .database()
            .update_task(
                &task.id,
                TaskPatch {
                    snoozed: Some(true),
                    last_completed_at: Some(days_ago_ms(2)),
                    ..TaskPatch::default()
                },
            )
            .unwrap();

        let (tx, view, handle) = start_engine(&store, "alice");

        wait_for("reset snoozed task", || {
            pending_ids(&view) == vec![task.id.clone()]
        })
        .await;
        let db = store.database().clone();
        let id = task.id.clone();
        wait_for("store write", || !db.get_task(&id).unwrap().unwrap().snoozed).await;

        assert!(store.list_history("fam", 10).await.unwrap().is_empty());

        tx.send(EngineInput::Shutdown).await.unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn never_cooldown_is_left_alone() {
        let store = setup_store();
        let mut input = new_task("Fix the roof", "alice");
        input.cooldown_unit = CooldownUnit::Never;
        let task = store.create_task(input).await.unwrap();
        seed_completed(&store, &task.id, "bob", days_ago_ms(400));

        let (tx, view, handle) = start_engine(&store, "alice");

        wait_for("snapshot", || view.load().len() == 1).await;
        assert_eq!(completed_ids(&view), vec![task.id.clone()]);
        assert!(store.list_history("fam", 10).await.unwrap().is_empty());

        tx.send(EngineInput::Shutdown).await.unwrap();
        handle.await.unwrap().unwrap();
    }
}

mod toggle_tests {
    use super::*;

    #[tokio::test]
    async fn local_toggle_completes_and_writes_through() {
        let store = setup_store();
        let task = store.create_task(new_task("Dishes", "alice")).await.unwrap();

        let (tx, view, handle) = start_engine(&store, "alice");
        wait_for("snapshot", || view.load().len() == 1).await;

        toggle(&tx, &task.id, true).await.unwrap();

        assert_eq!(completed_ids(&view), vec![task.id.clone()]);

        let stored = store.database().get_task(&task.id).unwrap().unwrap();
        assert!(stored.completed);
        assert_eq!(stored.last_completed_by.as_deref(), Some("alice"));
        assert!(stored.last_completed_at.is_some());

        let history = store.list_history("fam", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].user_id, "alice");
        assert!(history[0].completed);

        tx.send(EngineInput::Shutdown).await.unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn own_echo_does_not_duplicate_or_re_move() {
        let store = setup_store();
        let task = store.create_task(new_task("Dishes", "alice")).await.unwrap();

        let (tx, view, handle) = start_engine(&store, "alice");
        wait_for("snapshot", || view.load().len() == 1).await;

        toggle(&tx, &task.id, true).await.unwrap();

        // Give the echo event time to arrive and be suppressed.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let partition = view.load();
        assert_eq!(partition.len(), 1);
        assert_eq!(completed_ids(&view), vec![task.id.clone()]);

        tx.send(EngineInput::Shutdown).await.unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn toggle_of_unknown_task_replies_not_found() {
        let store = setup_store();
        let (tx, view, handle) = start_engine(&store, "alice");
        wait_for("snapshot", || view.load().is_empty()).await;

        let err = toggle(&tx, "ghost", true).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        tx.send(EngineInput::Shutdown).await.unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn uncomplete_moves_back_without_new_completion_stamp() {
        let store = setup_store();
        let task = store.create_task(new_task("Dishes", "alice")).await.unwrap();
        seed_completed(&store, &task.id, "alice", days_ago_ms(0));

        let (tx, view, handle) = start_engine(&store, "alice");
        wait_for("snapshot", || view.load().len() == 1).await;

        toggle(&tx, &task.id, false).await.unwrap();

        assert_eq!(pending_ids(&view), vec![task.id.clone()]);
        let history = store.list_history("fam", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(!history[0].completed);

        tx.send(EngineInput::Shutdown).await.unwrap();
        handle.await.unwrap().unwrap();
    }
}

mod trigger_tests {
    use super::*;

    #[tokio::test]
    async fn completing_a_task_reopens_its_linked_task() {
        let store = setup_store();
        let linked = store.create_task(new_task("Dry laundry", "alice")).await.unwrap();
        // Linked task sits completed with a cooldown that will not fire.
        let mut never = TaskPatch::default();
        never.completed = Some(true);
        never.cooldown_unit = Some(CooldownUnit::Never);
        never.last_completed_at = Some(days_ago_ms(0));
        never.last_completed_by = Some("bob".to_string());
        store.database().update_task(&linked.id, never).unwrap();

        let mut input = new_task("Wash laundry", "alice");
        input.triggers_task = Some(linked.id.clone());
        let task = store.create_task(input).await.unwrap();

        let (tx, view, handle) = start_engine(&store, "alice");
        wait_for("snapshot", || view.load().len() == 2).await;

        toggle(&tx, &task.id, true).await.unwrap();

        let stored = store.database().get_task(&linked.id).unwrap().unwrap();
        assert!(!stored.completed);

        // One entry for the completed task by the user, one for the linked
        // task by the reserved actor.
        let linked_history = store
            .database()
            .list_task_history(&linked.id, 10)
            .unwrap();
        assert_eq!(linked_history.len(), 1);
        assert_eq!(linked_history[0].user_id, AUTO_RENEW_ACTOR);
        assert!(!linked_history[0].completed);

        let own_history = store.database().list_task_history(&task.id, 10).unwrap();
        assert_eq!(own_history.len(), 1);
        assert_eq!(own_history[0].user_id, "alice");

        // The reopen event relocates the linked task in the partition.
        wait_for("linked task pending", || {
            pending_ids(&view).contains(&linked.id)
        })
        .await;

        tx.send(EngineInput::Shutdown).await.unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn trigger_fires_even_when_target_is_already_open() {
        let store = setup_store();
        let linked = store.create_task(new_task("Dry laundry", "alice")).await.unwrap();
        let mut input = new_task("Wash laundry", "alice");
        input.triggers_task = Some(linked.id.clone());
        let task = store.create_task(input).await.unwrap();

        let (tx, view, handle) = start_engine(&store, "alice");
        wait_for("snapshot", || view.load().len() == 2).await;

        toggle(&tx, &task.id, true).await.unwrap();

        let linked_history = store
            .database()
            .list_task_history(&linked.id, 10)
            .unwrap();
        assert_eq!(linked_history.len(), 1);
        assert_eq!(linked_history[0].user_id, AUTO_RENEW_ACTOR);

        tx.send(EngineInput::Shutdown).await.unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn uncompleting_does_not_fire_the_trigger() {
        let store = setup_store();
        let linked = store.create_task(new_task("Dry laundry", "alice")).await.unwrap();
        let mut input = new_task("Wash laundry", "alice");
        input.triggers_task = Some(linked.id.clone());
        let task = store.create_task(input).await.unwrap();
        seed_completed(&store, &task.id, "alice", days_ago_ms(0));

        let (tx, view, handle) = start_engine(&store, "alice");
        wait_for("snapshot", || view.load().len() == 2).await;

        toggle(&tx, &task.id, false).await.unwrap();

        assert!(store
            .database()
            .list_task_history(&linked.id, 10)
            .unwrap()
            .is_empty());

        tx.send(EngineInput::Shutdown).await.unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn stale_trigger_link_does_not_fail_the_toggle() {
        let store = setup_store();
        let linked = store.create_task(new_task("Dry laundry", "alice")).await.unwrap();
        let mut input = new_task("Wash laundry", "alice");
        input.triggers_task = Some(linked.id.clone());
        let task = store.create_task(input).await.unwrap();
        store.delete_task(&linked.id).await.unwrap();

        let (tx, view, handle) = start_engine(&store, "alice");
        wait_for("snapshot", || view.load().len() == 1).await;

        // The linked task is gone; the completion itself still succeeds.
        toggle(&tx, &task.id, true).await.unwrap();
        assert_eq!(completed_ids(&view), vec![task.id.clone()]);

        tx.send(EngineInput::Shutdown).await.unwrap();
        handle.await.unwrap().unwrap();
    }
}

mod remote_event_tests {
    use super::*;

    #[tokio::test]
    async fn remote_create_by_another_member_appends_to_pending() {
        let store = setup_store();
        let seed = store.create_task(new_task("Vacuum", "alice")).await.unwrap();
        let (tx, view, handle) = start_engine(&store, "alice");
        wait_for("snapshot", || view.load().len() == 1).await;

        let task = store.create_task(new_task("Dishes", "bob")).await.unwrap();

        wait_for("remote create", || {
            pending_ids(&view) == vec![seed.id.clone(), task.id.clone()]
        })
        .await;

        tx.send(EngineInput::Shutdown).await.unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn remote_completion_by_another_member_relocates_the_task() {
        let store = setup_store();
        let task = store.create_task(new_task("Dishes", "alice")).await.unwrap();

        let (tx, view, handle) = start_engine(&store, "alice");
        wait_for("snapshot", || view.load().len() == 1).await;

        store
            .update_task(
                &task.id,
                TaskPatch {
                    completed: Some(true),
                    last_completed_at: Some(days_ago_ms(0)),
                    last_completed_by: Some("bob".to_string()),
                    ..TaskPatch::default()
                },
            )
            .await
            .unwrap();

        wait_for("remote completion", || {
            completed_ids(&view) == vec![task.id.clone()]
        })
        .await;
        assert_eq!(view.load().len(), 1);

        tx.send(EngineInput::Shutdown).await.unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn remote_delete_removes_the_task() {
        let store = setup_store();
        let task = store.create_task(new_task("Dishes", "alice")).await.unwrap();

        let (tx, view, handle) = start_engine(&store, "alice");
        wait_for("snapshot", || view.load().len() == 1).await;

        store.delete_task(&task.id).await.unwrap();

        wait_for("remote delete", || view.load().is_empty()).await;

        tx.send(EngineInput::Shutdown).await.unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn refresh_rebuilds_the_partition() {
        let store = setup_store();
        let (tx, view, handle) = start_engine(&store, "alice");
        // An empty view alone can't tell "snapshot taken" from "engine not
        // yet started"; wait for the subscription so the create event below
        // reaches the engine instead of racing ahead of its first snapshot.
        wait_for("subscribe", || store.subscriber_count() == 1).await;
        wait_for("snapshot", || view.load().is_empty()).await;

        // A task created by the local user is not placed by the create event
        // (the optimistic flow owns it); a refresh picks it up.
        let task = store.create_task(new_task("Dishes", "alice")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(view.load().is_empty());

        tx.send(EngineInput::Refresh).await.unwrap();
        wait_for("refetch", || pending_ids(&view) == vec![task.id.clone()]).await;

        tx.send(EngineInput::Shutdown).await.unwrap();
        handle.await.unwrap().unwrap();
    }
}

mod scan_resilience_tests {
    use super::*;
    use async_trait::async_trait;
    use chore_sync::types::HistoryEntry;

    /// Store wrapper that fails updates for one task id.
    struct FailingStore {
        inner: Arc<SqliteStore>,
        fail_id: String,
    }

    #[async_trait]
    impl TaskStore for FailingStore {
        async fn list_tasks(&self, family: &str) -> StoreResult<Vec<Task>> {
            self.inner.list_tasks(family).await
        }

        async fn create_task(&self, input: NewTask) -> StoreResult<Task> {
            self.inner.create_task(input).await
        }

        async fn update_task(&self, task_id: &str, patch: TaskPatch) -> StoreResult<Task> {
            if task_id == self.fail_id {
                return Err(StoreError::Unavailable("injected failure".to_string()));
            }
            self.inner.update_task(task_id, patch).await
        }

        async fn delete_task(&self, task_id: &str) -> StoreResult<()> {
            self.inner.delete_task(task_id).await
        }

        async fn create_history_entry(
            &self,
            task_id: &str,
            actor: &str,
            completed: bool,
        ) -> StoreResult<HistoryEntry> {
            self.inner.create_history_entry(task_id, actor, completed).await
        }

        async fn list_history(&self, family: &str, limit: usize) -> StoreResult<Vec<HistoryEntry>> {
            self.inner.list_history(family, limit).await
        }

        fn subscribe(&self, family: &str) -> StoreResult<chore_sync::store::Subscription> {
            self.inner.subscribe(family)
        }
    }

    #[tokio::test]
    async fn one_failing_renewal_does_not_block_the_rest() {
        let inner = setup_store();
        let broken = inner.create_task(new_task("Broken", "alice")).await.unwrap();
        let healthy = inner.create_task(new_task("Healthy", "alice")).await.unwrap();
        seed_completed(&inner, &broken.id, "bob", days_ago_ms(2));
        seed_completed(&inner, &healthy.id, "bob", days_ago_ms(2));

        let store = FailingStore {
            inner: Arc::clone(&inner),
            fail_id: broken.id.clone(),
        };

        let tasks = store.list_tasks("fam").await.unwrap();
        let renewals = scanner::scan(&tasks, chrono::Utc::now());
        assert_eq!(renewals.len(), 2);

        let applied = scanner::apply(&store, &renewals, AUTO_RENEW_ACTOR).await;

        assert_eq!(applied, 1);
        let healthy_after = inner.database().get_task(&healthy.id).unwrap().unwrap();
        assert!(!healthy_after.completed);
        let broken_after = inner.database().get_task(&broken.id).unwrap().unwrap();
        assert!(broken_after.completed);
    }
}
