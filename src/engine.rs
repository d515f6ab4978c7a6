//! The sync engine: one logical actor that owns the partition and merges
//! local optimistic mutations with live remote change events.
//!
//! All mutation of the partition happens on the engine's event loop; inputs
//! and remote events are serialized into one ordered stream and each is
//! fully applied before the next. The store subscription lives exactly as
//! long as the loop, released on every exit path. Renewal writes from the
//! past-due scan are fire-and-forget: a remote event for a task another
//! client already renewed resolves last-write-wins.

use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::db::now_ms;
use crate::error::{StoreError, StoreResult};
use crate::reconciler::{Partition, StateReconciler};
use crate::scanner;
use crate::store::{Subscription, TaskStore};
use crate::trigger;
use crate::types::TaskPatch;

/// Inputs accepted by the engine, applied strictly in arrival order.
#[derive(Debug)]
pub enum EngineInput {
    /// Local optimistic completion toggle. The optimistic move happens
    /// immediately; the confirming write's outcome is sent on `reply` so the
    /// caller can revert its UI if the write fails. The engine itself does
    /// not roll back.
    Toggle {
        task_id: String,
        complete: bool,
        reply: Option<oneshot::Sender<StoreResult<()>>>,
    },
    /// Refetch the snapshot and rebuild the partition.
    Refresh,
    Shutdown,
}

/// Shared read handle onto the engine's latest partition.
pub type PartitionView = Arc<ArcSwap<Partition>>;

/// Recurrence & reconciliation engine for one family's task list.
pub struct SyncEngine {
    store: Arc<dyn TaskStore>,
    config: EngineConfig,
    family: String,
    reconciler: StateReconciler,
    published: PartitionView,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn TaskStore>,
        family: impl Into<String>,
        local_user: impl Into<String>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            config,
            family: family.into(),
            reconciler: StateReconciler::new(local_user),
            published: Arc::new(ArcSwap::from_pointee(Partition::default())),
        }
    }

    /// Create the input queue for this engine, sized from config.
    pub fn input_channel(&self) -> (mpsc::Sender<EngineInput>, mpsc::Receiver<EngineInput>) {
        mpsc::channel(self.config.queue_capacity)
    }

    /// Handle for readers; updated after every applied input.
    pub fn view(&self) -> PartitionView {
        Arc::clone(&self.published)
    }

    /// The current partition (callers on the engine's own task).
    pub fn partition(&self) -> &Partition {
        self.reconciler.partition()
    }

    /// Run until the input queue closes, `Shutdown` arrives, or the store
    /// subscription ends. Subscribes before the initial snapshot so no event
    /// is missed; updates racing ahead of the snapshot are dropped and the
    /// snapshot supersedes them.
    pub async fn run(&mut self, mut inputs: mpsc::Receiver<EngineInput>) -> StoreResult<()> {
        let subscription = self.store.subscribe(&self.family)?;
        info!(family = %self.family, "engine started");

        let result = self.event_loop(&mut inputs, subscription).await;

        debug!(family = %self.family, "store subscription released");
        result
    }

    /// Subscription is owned here so every exit path, error included,
    /// releases it.
    async fn event_loop(
        &mut self,
        inputs: &mut mpsc::Receiver<EngineInput>,
        mut subscription: Subscription,
    ) -> StoreResult<()> {
        self.refresh().await?;

        loop {
            tokio::select! {
                input = inputs.recv() => match input {
                    Some(EngineInput::Toggle { task_id, complete, reply }) => {
                        self.handle_toggle(&task_id, complete, reply).await;
                    }
                    Some(EngineInput::Refresh) => self.refresh().await?,
                    Some(EngineInput::Shutdown) | None => return Ok(()),
                },
                event = subscription.next() => match event {
                    Some(event) => self.handle_remote(&event),
                    None => {
                        info!(family = %self.family, "store event stream closed");
                        return Ok(());
                    }
                },
            }
        }
    }

    /// Fetch a snapshot, auto-renew past-due tasks, rebuild the partition.
    ///
    /// Resets are applied to the local copies up front; the store writes go
    /// out fire-and-forget afterwards.
    async fn refresh(&mut self) -> StoreResult<()> {
        let mut tasks = self.store.list_tasks(&self.family).await?;
        tasks.retain(|t| t.visible_to(self.reconciler.local_user()));

        if self.config.scan_on_refresh {
            let renewals = scanner::scan(&tasks, Utc::now());
            if !renewals.is_empty() {
                info!(count = renewals.len(), "renewing past-due tasks");
                for renewal in &renewals {
                    if let Some(task) = tasks.iter_mut().find(|t| t.id == renewal.task_id) {
                        task.completed = false;
                        task.snoozed = false;
                    }
                }
                let store = Arc::clone(&self.store);
                let actor = self.config.auto_renew_actor.clone();
                tokio::spawn(async move {
                    let applied = scanner::apply(store.as_ref(), &renewals, &actor).await;
                    debug!(applied, "auto-renew writes finished");
                });
            }
        }

        self.reconciler.replace_snapshot(tasks);
        self.publish();
        Ok(())
    }

    async fn handle_toggle(
        &mut self,
        task_id: &str,
        complete: bool,
        reply: Option<oneshot::Sender<StoreResult<()>>>,
    ) {
        let Some(applied) = self.reconciler.apply_local(task_id, complete, now_ms()) else {
            warn!(task = %task_id, "toggle for unknown task ignored");
            if let Some(reply) = reply {
                let _ = reply.send(Err(StoreError::NotFound(task_id.to_string())));
            }
            return;
        };
        self.publish();

        let mut patch = TaskPatch {
            completed: Some(complete),
            ..TaskPatch::default()
        };
        if complete {
            patch.snoozed = Some(false);
            patch.last_completed_at = applied.task.last_completed_at;
            patch.last_completed_by = applied.task.last_completed_by.clone();
        }

        let outcome = match self.store.update_task(task_id, patch).await {
            Ok(_) => {
                if let Err(err) = self
                    .store
                    .create_history_entry(task_id, self.reconciler.local_user(), complete)
                    .await
                {
                    warn!(task = %task_id, %err, "history write failed");
                }
                self.resolve_trigger(&applied).await;
                Ok(())
            }
            Err(err) => {
                warn!(task = %task_id, %err, "confirming write failed; caller must revert");
                Err(err)
            }
        };

        if let Some(reply) = reply {
            let _ = reply.send(outcome);
        }
    }

    /// One-hop trigger chain: reopen the linked task and record the reset
    /// under the auto-renew actor. Failures (stale links included) are
    /// logged, not propagated.
    async fn resolve_trigger(&self, applied: &crate::reconciler::AppliedMutation) {
        let Some(renewal) =
            trigger::resolve(&applied.task, applied.was_completed, applied.task.completed)
        else {
            return;
        };
        debug!(task = %applied.task.id, target = %renewal.task_id, "trigger link fired");
        scanner::apply(
            self.store.as_ref(),
            std::slice::from_ref(&renewal),
            &self.config.auto_renew_actor,
        )
        .await;
    }

    fn handle_remote(&mut self, event: &crate::types::StoreEvent) {
        use crate::types::EventKind;

        // Restricted tasks another member edited stay out of this view.
        if event.kind != EventKind::Delete
            && !event.task.visible_to(self.reconciler.local_user())
        {
            return;
        }

        self.reconciler.apply_remote(event);
        self.publish();
    }

    fn publish(&self) {
        self.published
            .store(Arc::new(self.reconciler.partition().clone()));
    }
}
