//! The trigger executor: dispatches due triggers to a worker pool.
//!
//! One producer ticks every second, fetching scheduled triggers whose
//! `start_at` has passed and pushing them onto a bounded channel; a full
//! channel blocks the producer, which is the back-pressure signal. Each
//! worker drains the channel: it flips the trigger to `executing`, arms
//! the schedule's next trigger before the workflow runs (so workflow
//! duration never stretches the recurrence period), executes the bound
//! action, and records `completed` or `failed`.
//!
//! Two overdue triggers of the same schedule may run on different workers
//! concurrently; the status-driven fetch is the only dedupe, so delivery
//! is at-least-once.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use cronny_core::{CronnyError, Result};

use crate::models::{Trigger, TriggerStatus};
use crate::stats;
use crate::store::Store;
use crate::workflow::WorkflowEngine;

/// Worker pool size.
pub const EXECUTOR_CONCURRENCY: usize = 10;
/// Bounded trigger queue capacity.
pub const TRIGGER_QUEUE_CAPACITY: usize = 1024;

const TICK_INTERVAL: Duration = Duration::from_secs(1);

pub struct TriggerExecutor {
    store: Arc<dyn Store>,
    engine: Arc<WorkflowEngine>,
    cancel: CancellationToken,
    concurrency: usize,
    queue_capacity: usize,
}

impl TriggerExecutor {
    pub fn new(
        store: Arc<dyn Store>,
        engine: Arc<WorkflowEngine>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            engine,
            cancel,
            concurrency: EXECUTOR_CONCURRENCY,
            queue_capacity: TRIGGER_QUEUE_CAPACITY,
        }
    }

    /// Override the pool size and queue capacity (used by tests and
    /// non-default deployments).
    pub fn with_limits(mut self, concurrency: usize, queue_capacity: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self.queue_capacity = queue_capacity.max(1);
        self
    }

    /// Run one trigger through its full state machine.
    pub async fn process_one(&self, trigger: &Trigger) -> Result<()> {
        let schedule = trigger.schedule.as_ref().ok_or_else(|| {
            CronnyError::NotFound(format!("schedule not loaded on trigger {}", trigger.id))
        })?;
        let action = schedule.action.as_ref().ok_or_else(|| {
            CronnyError::NotFound(format!("action not loaded on schedule {}", schedule.id))
        })?;

        self.store
            .update_trigger_status(trigger.id, TriggerStatus::Executing)
            .await?;

        // Arm the next firing first, so recurring schedules keep ticking
        // even when this execution fails or runs long.
        schedule.create_trigger(self.store.as_ref()).await?;

        stats::SCHEDULES_TRIGGERED_COUNT.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            "🔔 executing trigger {} for schedule '{}' ({})",
            trigger.id,
            schedule.name,
            schedule.id
        );

        let final_status = match self.engine.execute_action(action).await {
            Ok(()) => TriggerStatus::Completed,
            Err(e) => {
                tracing::warn!(
                    "action '{}' failed for trigger {}: {e}",
                    action.name,
                    trigger.id
                );
                TriggerStatus::Failed
            }
        };
        self.store
            .update_trigger_status(trigger.id, final_status)
            .await?;
        Ok(())
    }

    /// One producer pass: enqueue every due trigger.
    pub async fn run_one_iter(&self, queue: &mpsc::Sender<Trigger>) -> Result<usize> {
        let triggers = self.store.due_triggers(Utc::now()).await?;
        let count = triggers.len();
        for trigger in triggers {
            if queue.send(trigger).await.is_err() {
                // Workers are gone; shutdown is in progress.
                break;
            }
        }
        Ok(count)
    }

    async fn listen_for_triggers(
        &self,
        worker_id: usize,
        queue: Arc<tokio::sync::Mutex<mpsc::Receiver<Trigger>>>,
    ) {
        loop {
            let trigger = tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!("executor worker {worker_id} shutting down");
                    return;
                }
                received = async { queue.lock().await.recv().await } => {
                    match received {
                        Some(trigger) => trigger,
                        None => return,
                    }
                }
            };
            if let Err(e) = self.process_one(&trigger).await {
                tracing::warn!(
                    "failed to process trigger {} (schedule {}): {e}",
                    trigger.id,
                    trigger.schedule_id
                );
            }
        }
    }

    /// Producer loop plus worker pool; returns when cancelled and every
    /// worker has drained its in-flight trigger.
    pub async fn run(self: Arc<Self>) {
        tracing::info!(
            "🚀 trigger executor started (workers={}, queue={})",
            self.concurrency,
            self.queue_capacity
        );

        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut workers = Vec::with_capacity(self.concurrency);
        for worker_id in 0..self.concurrency {
            let this = Arc::clone(&self);
            let queue = Arc::clone(&rx);
            workers.push(tokio::spawn(async move {
                this.listen_for_triggers(worker_id, queue).await;
            }));
        }

        let mut interval = tokio::time::interval(TICK_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("trigger executor shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.run_one_iter(&tx).await {
                        tracing::error!("trigger executor iteration failed: {e}");
                    }
                }
            }
        }

        drop(tx);
        for worker in workers {
            let _ = worker.await;
        }
    }
}
