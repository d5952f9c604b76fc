//! The persistence gateway contract.
//!
//! The engine talks to storage only through this trait (consumed as
//! `Arc<dyn Store>`), keeping the relational engine an external
//! collaborator. [`crate::SqliteStore`] is the bundled implementation.
//!
//! Save methods insert when `id == 0` and update otherwise, run the
//! entity's `before_save` hook, stamp timestamps, and reject rows with a
//! missing owning user.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use cronny_core::Result;

use crate::models::{
    Action, Job, JobExecution, JobTemplate, Schedule, ScheduleStatus, Trigger, TriggerStatus,
};

#[async_trait]
pub trait Store: Send + Sync {
    // Actions
    async fn save_action(&self, action: &mut Action) -> Result<()>;
    async fn action(&self, id: i64) -> Result<Action>;
    /// Soft-deletes; fails while jobs or schedules still reference the action.
    async fn delete_action(&self, id: i64) -> Result<()>;

    // Jobs
    async fn save_job(&self, job: &mut Job) -> Result<()>;
    async fn job(&self, id: i64) -> Result<Job>;
    async fn jobs(&self) -> Result<Vec<Job>>;
    /// The unique root job of an action.
    async fn root_job(&self, action_id: i64) -> Result<Job>;
    /// A job addressed by name within one action (template references).
    async fn job_by_name(&self, action_id: i64, name: &str) -> Result<Job>;

    // Job templates
    async fn save_job_template(&self, template: &mut JobTemplate) -> Result<()>;
    async fn job_template(&self, id: i64) -> Result<JobTemplate>;

    // Job executions
    async fn save_job_execution(&self, execution: &mut JobExecution) -> Result<()>;
    /// Most recent execution by `execution_stop_time`.
    async fn latest_job_execution(&self, job_id: i64) -> Result<JobExecution>;
    /// All executions of a job, oldest first by `execution_stop_time`.
    async fn job_executions(&self, job_id: i64) -> Result<Vec<JobExecution>>;
    async fn delete_job_execution(&self, id: i64) -> Result<()>;

    // Schedules
    async fn save_schedule(&self, schedule: &mut Schedule) -> Result<()>;
    async fn schedule(&self, id: i64) -> Result<Schedule>;
    async fn schedules_by_status(&self, status: ScheduleStatus) -> Result<Vec<Schedule>>;
    /// User-scoped listing for ownership-aware callers.
    async fn schedules_for_user(&self, user_id: i64) -> Result<Vec<Schedule>>;
    async fn update_schedule_status(&self, id: i64, status: ScheduleStatus) -> Result<()>;

    // Triggers
    async fn save_trigger(&self, trigger: &mut Trigger) -> Result<()>;
    /// Scheduled triggers whose `start_at` has passed, with the owning
    /// schedule and its action eagerly loaded.
    async fn due_triggers(&self, now: DateTime<Utc>) -> Result<Vec<Trigger>>;
    async fn update_trigger_status(&self, id: i64, status: TriggerStatus) -> Result<()>;
}
