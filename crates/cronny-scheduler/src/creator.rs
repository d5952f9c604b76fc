//! The trigger creator: turns pending schedules into triggers.
//!
//! One tick per second. A schedule passes through `pending` exactly once;
//! after its first trigger is materialized it moves to `processing` and
//! the trigger executor arms every subsequent firing.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use cronny_core::Result;

use crate::models::{Schedule, ScheduleStatus, Trigger};
use crate::store::Store;

const TICK_INTERVAL: Duration = Duration::from_secs(1);

pub struct TriggerCreator {
    store: Arc<dyn Store>,
    cancel: CancellationToken,
}

impl TriggerCreator {
    pub fn new(store: Arc<dyn Store>, cancel: CancellationToken) -> Self {
        Self { store, cancel }
    }

    /// Materialize one schedule's first trigger and advance its status.
    pub async fn process_schedule(&self, schedule: &Schedule) -> Result<Option<Trigger>> {
        let trigger = schedule.create_trigger(self.store.as_ref()).await?;
        if trigger.is_some() {
            self.store
                .update_schedule_status(schedule.id, ScheduleStatus::Processing)
                .await?;
        }
        Ok(trigger)
    }

    /// One pass over all pending schedules. A failing schedule is logged
    /// and skipped; the rest of the batch continues.
    pub async fn run_one_iter(&self) -> Result<usize> {
        let schedules = self.store.schedules_by_status(ScheduleStatus::Pending).await?;
        let mut processed = 0;
        for schedule in &schedules {
            match self.process_schedule(schedule).await {
                Ok(Some(trigger)) => {
                    tracing::debug!(
                        "trigger {} armed for schedule '{}' at {}",
                        trigger.id,
                        schedule.name,
                        trigger.start_at
                    );
                    processed += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        "failed to process schedule '{}' ({}): {e}",
                        schedule.name,
                        schedule.id
                    );
                }
            }
        }
        Ok(processed)
    }

    /// Tick loop; returns when cancelled.
    pub async fn run(&self) {
        tracing::info!("⏰ trigger creator started");
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("trigger creator shutting down");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.run_one_iter().await {
                        tracing::error!("trigger creator iteration failed: {e}");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Action, ScheduleType, ScheduleUnit, TriggerStatus};
    use crate::sqlite::SqliteStore;
    use chrono::{Duration as ChronoDuration, Utc};

    async fn seeded_schedule(store: &Arc<SqliteStore>) -> Schedule {
        let mut action = Action::new(1, "wf", "");
        store.save_action(&mut action).await.unwrap();
        let mut schedule = Schedule::new(
            1,
            "every-5s",
            ScheduleType::Relative,
            "5",
            ScheduleUnit::Second,
            action.id,
        );
        store.save_schedule(&mut schedule).await.unwrap();
        schedule
    }

    #[tokio::test]
    async fn test_pending_schedule_becomes_processing_with_trigger() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let schedule = seeded_schedule(&store).await;
        let creator = TriggerCreator::new(store.clone(), CancellationToken::new());

        let before = Utc::now();
        let processed = creator.run_one_iter().await.unwrap();
        assert_eq!(processed, 1);

        let loaded = store.schedule(schedule.id).await.unwrap();
        assert_eq!(loaded.schedule_status, ScheduleStatus::Processing);

        // The armed trigger fires one period out.
        let due = store
            .due_triggers(before + ChronoDuration::seconds(6))
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].trigger_status, TriggerStatus::Scheduled);
        assert!(due[0].start_at >= before + ChronoDuration::seconds(5));
        assert!(due[0].start_at <= Utc::now() + ChronoDuration::seconds(6));
        // Triggers inherit the schedule's owner.
        assert_eq!(due[0].user_id, schedule.user_id);
    }

    #[tokio::test]
    async fn test_ended_schedule_is_marked_processed() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let mut schedule = seeded_schedule(&store).await;
        schedule.ends_at = Some((Utc::now() - ChronoDuration::seconds(1)).to_rfc3339());
        store.save_schedule(&mut schedule).await.unwrap();

        let creator = TriggerCreator::new(store.clone(), CancellationToken::new());
        let processed = creator.run_one_iter().await.unwrap();
        assert_eq!(processed, 0);

        let loaded = store.schedule(schedule.id).await.unwrap();
        assert_eq!(loaded.schedule_status, ScheduleStatus::Processed);
        assert!(store.due_triggers(Utc::now() + ChronoDuration::days(365)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_processing_schedules_are_not_rearmed() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        seeded_schedule(&store).await;
        let creator = TriggerCreator::new(store.clone(), CancellationToken::new());

        assert_eq!(creator.run_one_iter().await.unwrap(), 1);
        // Second pass sees no pending schedules.
        assert_eq!(creator.run_one_iter().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_returns_on_cancellation() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let cancel = CancellationToken::new();
        let creator = TriggerCreator::new(store, cancel.clone());

        let handle = tokio::spawn(async move { creator.run().await });
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("creator should stop promptly")
            .unwrap();
    }
}
