//! Entities and the schedule policy.
//!
//! Every entity carries a surrogate id, UTC timestamps, a soft-delete
//! marker, and the owning user id. Saves go through the [`Store`], which
//! runs each entity's `before_save` hook and enforces the user-id
//! invariant.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use cronny_core::{CronnyError, Result};

use crate::store::Store;

/// How a schedule's value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum ScheduleType {
    /// `schedule_value` is an RFC3339 instant.
    Absolute,
    /// Fires every N units, re-armed after each firing.
    Recurring,
    /// Fires once, N units from now.
    Relative,
}

impl From<ScheduleType> for i64 {
    fn from(value: ScheduleType) -> Self {
        match value {
            ScheduleType::Absolute => 1,
            ScheduleType::Recurring => 2,
            ScheduleType::Relative => 3,
        }
    }
}

impl TryFrom<i64> for ScheduleType {
    type Error = CronnyError;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            1 => Ok(ScheduleType::Absolute),
            2 => Ok(ScheduleType::Recurring),
            3 => Ok(ScheduleType::Relative),
            other => Err(CronnyError::Validation(format!(
                "schedule type {other} is not supported"
            ))),
        }
    }
}

/// Lifecycle of a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum ScheduleStatus {
    /// Registered, no trigger materialized yet.
    Pending,
    /// Has a live trigger downstream.
    Processing,
    /// Finished (ends_at passed, or a one-shot fired).
    Processed,
    /// Configuration parked as invalid/disabled.
    Inactive,
}

impl From<ScheduleStatus> for i64 {
    fn from(value: ScheduleStatus) -> Self {
        match value {
            ScheduleStatus::Pending => 1,
            ScheduleStatus::Processing => 2,
            ScheduleStatus::Processed => 3,
            ScheduleStatus::Inactive => 4,
        }
    }
}

impl TryFrom<i64> for ScheduleStatus {
    type Error = CronnyError;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            1 => Ok(ScheduleStatus::Pending),
            2 => Ok(ScheduleStatus::Processing),
            3 => Ok(ScheduleStatus::Processed),
            4 => Ok(ScheduleStatus::Inactive),
            other => Err(CronnyError::Validation(format!(
                "schedule status {other} is not supported"
            ))),
        }
    }
}

/// Lifecycle of a materialized firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum TriggerStatus {
    Scheduled,
    Executing,
    Completed,
    Failed,
}

impl From<TriggerStatus> for i64 {
    fn from(value: TriggerStatus) -> Self {
        match value {
            TriggerStatus::Scheduled => 1,
            TriggerStatus::Executing => 2,
            TriggerStatus::Completed => 3,
            TriggerStatus::Failed => 4,
        }
    }
}

impl TryFrom<i64> for TriggerStatus {
    type Error = CronnyError;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            1 => Ok(TriggerStatus::Scheduled),
            2 => Ok(TriggerStatus::Executing),
            3 => Ok(TriggerStatus::Completed),
            4 => Ok(TriggerStatus::Failed),
            other => Err(CronnyError::Validation(format!(
                "trigger status {other} is not supported"
            ))),
        }
    }
}

/// Unit of a recurring/relative schedule value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl ScheduleUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleUnit::Second => "second",
            ScheduleUnit::Minute => "minute",
            ScheduleUnit::Hour => "hour",
            ScheduleUnit::Day => "day",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "second" => Ok(ScheduleUnit::Second),
            "minute" => Ok(ScheduleUnit::Minute),
            "hour" => Ok(ScheduleUnit::Hour),
            "day" => Ok(ScheduleUnit::Day),
            other => Err(CronnyError::Validation(format!(
                "schedule unit '{other}' is not supported"
            ))),
        }
    }

    /// N of this unit as a chrono duration.
    pub fn span(&self, n: i64) -> Duration {
        match self {
            ScheduleUnit::Second => Duration::seconds(n),
            ScheduleUnit::Minute => Duration::minutes(n),
            ScheduleUnit::Hour => Duration::hours(n),
            ScheduleUnit::Day => Duration::days(n),
        }
    }
}

/// How a job's input is resolved before execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobInputType {
    /// `job_input_value` is a JSON object literal.
    StaticInput,
    /// `job_input_value` is a job id; that job's latest output is the input.
    JobOutputAsInput,
    /// `job_input_value` is a template rendered against prior job outputs.
    JobInputAsTemplate,
}

impl JobInputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobInputType::StaticInput => "static_input",
            JobInputType::JobOutputAsInput => "job_output_as_input",
            JobInputType::JobInputAsTemplate => "job_input_as_template",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "static_input" => Ok(JobInputType::StaticInput),
            "job_output_as_input" => Ok(JobInputType::JobOutputAsInput),
            "job_input_as_template" => Ok(JobInputType::JobInputAsTemplate),
            other => Err(CronnyError::Validation(format!(
                "no job input type matched for '{other}'"
            ))),
        }
    }
}

/// A named container of jobs; exactly one job is its root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Action {
    pub fn new(user_id: i64, name: &str, description: &str) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            user_id,
            name: name.to_string(),
            description: description.to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

/// One node of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub action_id: i64,
    pub job_template_id: i64,
    pub job_input_type: JobInputType,
    pub job_input_value: String,
    /// Serialized condition rule set routing to the next job.
    pub condition: String,
    pub is_root_job: bool,
    pub job_timeout_in_secs: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        user_id: i64,
        name: &str,
        action_id: i64,
        job_template_id: i64,
        input_type: JobInputType,
        input_value: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            user_id,
            name: name.to_string(),
            action_id,
            job_template_id,
            job_input_type: input_type,
            job_input_value: input_value.to_string(),
            condition: String::new(),
            is_root_job: false,
            job_timeout_in_secs: 0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Save hook: default the timeout, require both associations.
    pub fn before_save(&mut self) -> Result<()> {
        if self.job_timeout_in_secs <= 0 {
            self.job_timeout_in_secs = cronny_core::config::DEFAULT_JOB_TIMEOUT_SECS;
        }
        if self.action_id <= 0 {
            return Err(CronnyError::Validation(format!(
                "action is not set for job '{}'",
                self.name
            )));
        }
        if self.job_template_id <= 0 {
            return Err(CronnyError::Validation(format!(
                "job template is not set for job '{}'",
                self.name
            )));
        }
        Ok(())
    }
}

/// Names a registered executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTemplate {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl JobTemplate {
    pub fn new(user_id: i64, name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            user_id,
            name: name.to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

/// Append-only history row for one job run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: i64,
    pub user_id: i64,
    pub job_id: i64,
    pub execution_start_time: DateTime<Utc>,
    pub execution_stop_time: DateTime<Utc>,
    /// Serialized executor output, typically a JSON object.
    pub output: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl JobExecution {
    pub fn new(
        user_id: i64,
        job_id: i64,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
        output: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            user_id,
            job_id,
            execution_start_time: start,
            execution_stop_time: stop,
            output,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

/// A timing policy bound to an action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub schedule_type: ScheduleType,
    /// RFC3339 for absolute schedules, a positive integer string otherwise.
    pub schedule_value: String,
    pub schedule_unit: ScheduleUnit,
    pub schedule_status: ScheduleStatus,
    /// RFC3339; the schedule stops producing triggers after this instant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<String>,
    pub action_id: i64,
    /// Eagerly loaded by `due_triggers`; not persisted on the schedule row.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Schedule {
    pub fn new(
        user_id: i64,
        name: &str,
        schedule_type: ScheduleType,
        value: &str,
        unit: ScheduleUnit,
        action_id: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            user_id,
            name: name.to_string(),
            schedule_type,
            schedule_value: value.to_string(),
            schedule_unit: unit,
            schedule_status: ScheduleStatus::Pending,
            ends_at: None,
            action_id,
            action: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn interval(&self) -> Result<i64> {
        let interval: i64 = self.schedule_value.parse().map_err(|_| {
            CronnyError::Validation(format!(
                "invalid schedule value '{}', must be an integer",
                self.schedule_value
            ))
        })?;
        if interval <= 0 {
            return Err(CronnyError::Validation(
                "schedule value must be greater than 0 for recurring/relative schedules".into(),
            ));
        }
        Ok(interval)
    }

    /// Save hook: value must parse per type, ends_at must be RFC3339.
    pub fn before_save(&mut self) -> Result<()> {
        match self.schedule_type {
            ScheduleType::Absolute => {
                DateTime::parse_from_rfc3339(&self.schedule_value).map_err(|e| {
                    CronnyError::Validation(format!(
                        "invalid schedule value for absolute schedule, must be RFC3339: {e}"
                    ))
                })?;
            }
            ScheduleType::Recurring | ScheduleType::Relative => {
                self.interval()?;
            }
        }
        if let Some(ends_at) = &self.ends_at {
            DateTime::parse_from_rfc3339(ends_at).map_err(|e| {
                CronnyError::Validation(format!("invalid ends_at value, must be RFC3339: {e}"))
            })?;
        }
        Ok(())
    }

    /// The next firing instant, computed from `now` by schedule type.
    ///
    /// Recurring anchors to `now` rather than a base epoch, so a period of
    /// one hour means "about an hour after the previous dispatch", not
    /// "on the hour".
    pub fn execution_time(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        match self.schedule_type {
            ScheduleType::Relative => Ok(now + self.schedule_unit.span(self.interval()?)),
            ScheduleType::Absolute => Ok(DateTime::parse_from_rfc3339(&self.schedule_value)
                .map(|t| t.with_timezone(&Utc))?),
            ScheduleType::Recurring => {
                let interval = self.interval()?;
                let mut exec_time = now + self.schedule_unit.span(interval);
                if exec_time < now {
                    exec_time = exec_time + self.schedule_unit.span(interval);
                }
                Ok(exec_time)
            }
        }
    }

    /// True when ends_at is set, parses, and is already behind `now`.
    pub fn should_end(&self, now: DateTime<Utc>) -> bool {
        let Some(ends_at) = &self.ends_at else {
            return false;
        };
        match DateTime::parse_from_rfc3339(ends_at) {
            Ok(t) => now > t.with_timezone(&Utc),
            Err(_) => false,
        }
    }

    /// Mark the schedule as finished.
    pub async fn end(&self, store: &dyn Store) -> Result<()> {
        store
            .update_schedule_status(self.id, ScheduleStatus::Processed)
            .await
    }

    /// Materialize the next firing of this schedule.
    ///
    /// Returns `None` (after marking the schedule processed) when the
    /// schedule is past its ends_at.
    pub async fn create_trigger(&self, store: &dyn Store) -> Result<Option<Trigger>> {
        let now = Utc::now();
        if self.should_end(now) {
            self.end(store).await.map_err(|e| {
                CronnyError::Database(format!(
                    "failed to end schedule '{}' ({}): {e}",
                    self.name, self.id
                ))
            })?;
            return Ok(None);
        }
        let exec_time = self.execution_time(now).map_err(|e| {
            CronnyError::Validation(format!(
                "failed to get execution time for schedule '{}' ({}): {e}",
                self.name, self.id
            ))
        })?;
        let mut trigger = Trigger::new(self.user_id, self.id, exec_time);
        store.save_trigger(&mut trigger).await.map_err(|e| {
            CronnyError::Database(format!(
                "failed to create trigger for schedule '{}' ({}): {e}",
                self.name, self.id
            ))
        })?;
        Ok(Some(trigger))
    }
}

/// A single materialized firing of a schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub id: i64,
    pub user_id: i64,
    pub start_at: DateTime<Utc>,
    pub schedule_id: i64,
    pub trigger_status: TriggerStatus,
    /// Eagerly loaded by `due_triggers`; not persisted on the trigger row.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Trigger {
    pub fn new(user_id: i64, schedule_id: i64, start_at: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            user_id,
            start_at,
            schedule_id,
            trigger_status: TriggerStatus::Scheduled,
            schedule: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}
