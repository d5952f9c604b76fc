//! SQLite-backed persistence gateway.
//!
//! All timestamps are stored as RFC3339 TEXT in UTC. Deletes are soft:
//! rows get a `deleted_at` marker and every query filters on it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

use cronny_core::{CronnyError, Result};

use crate::models::{
    Action, Job, JobExecution, JobInputType, JobTemplate, Schedule, ScheduleStatus, ScheduleType,
    ScheduleUnit, Trigger, TriggerStatus,
};
use crate::store::Store;

/// SQLite persistence store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn db_err(e: rusqlite::Error) -> CronnyError {
    CronnyError::Database(e.to_string())
}

fn not_found(entity: &str, what: impl std::fmt::Display, e: rusqlite::Error) -> CronnyError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => CronnyError::NotFound(format!("{entity} {what}")),
        other => CronnyError::Database(other.to_string()),
    }
}

fn conv_err<E>(e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
}

fn parse_ts(raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(conv_err)
}

fn parse_opt_ts(raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(parse_ts).transpose()
}

fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

fn opt_ts(t: Option<DateTime<Utc>>) -> Option<String> {
    t.map(ts)
}

fn require_user(user_id: i64) -> Result<()> {
    if user_id <= 0 {
        return Err(CronnyError::MissingUserId);
    }
    Ok(())
}

impl SqliteStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// An in-memory database, used by tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS actions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_actions_user_id ON actions(user_id);

            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                action_id INTEGER NOT NULL,
                job_template_id INTEGER NOT NULL,
                job_input_type TEXT NOT NULL,
                job_input_value TEXT NOT NULL DEFAULT '',
                condition TEXT NOT NULL DEFAULT '',
                is_root_job INTEGER NOT NULL DEFAULT 0,
                job_timeout_in_secs INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_user_id ON jobs(user_id);
            CREATE INDEX IF NOT EXISTS idx_jobs_action_id ON jobs(action_id);

            CREATE TABLE IF NOT EXISTS job_templates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_job_templates_user_id ON job_templates(user_id);

            CREATE TABLE IF NOT EXISTS job_executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                job_id INTEGER NOT NULL,
                execution_start_time TEXT NOT NULL,
                execution_stop_time TEXT NOT NULL,
                output TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_job_executions_job_id ON job_executions(job_id);
            CREATE INDEX IF NOT EXISTS idx_job_executions_user_id ON job_executions(user_id);

            CREATE TABLE IF NOT EXISTS schedules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                schedule_type INTEGER NOT NULL,
                schedule_value TEXT NOT NULL,
                schedule_unit TEXT NOT NULL,
                schedule_status INTEGER NOT NULL,
                ends_at TEXT,
                action_id INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_schedules_status ON schedules(schedule_status);
            CREATE INDEX IF NOT EXISTS idx_schedules_type ON schedules(schedule_type);
            CREATE INDEX IF NOT EXISTS idx_schedules_user_id ON schedules(user_id);

            CREATE TABLE IF NOT EXISTS triggers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                start_at TEXT NOT NULL,
                schedule_id INTEGER NOT NULL,
                trigger_status INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_triggers_status ON triggers(trigger_status);
            CREATE INDEX IF NOT EXISTS idx_triggers_start_at ON triggers(start_at);
            CREATE INDEX IF NOT EXISTS idx_triggers_user_id ON triggers(user_id);
            ",
        )
        .map_err(db_err)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| CronnyError::Database(format!("connection lock poisoned: {e}")))
    }
}

// Row mappers and sync query helpers. The helpers take the borrowed
// connection so composite loads (trigger + schedule + action) run under
// one lock acquisition.

fn action_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Action> {
    Ok(Action {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        created_at: parse_ts(row.get(4)?)?,
        updated_at: parse_ts(row.get(5)?)?,
        deleted_at: parse_opt_ts(row.get(6)?)?,
    })
}

fn job_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    Ok(Job {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        action_id: row.get(3)?,
        job_template_id: row.get(4)?,
        job_input_type: JobInputType::parse(&row.get::<_, String>(5)?).map_err(conv_err)?,
        job_input_value: row.get(6)?,
        condition: row.get(7)?,
        is_root_job: row.get::<_, i64>(8)? != 0,
        job_timeout_in_secs: row.get(9)?,
        created_at: parse_ts(row.get(10)?)?,
        updated_at: parse_ts(row.get(11)?)?,
        deleted_at: parse_opt_ts(row.get(12)?)?,
    })
}

fn job_template_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobTemplate> {
    Ok(JobTemplate {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        created_at: parse_ts(row.get(3)?)?,
        updated_at: parse_ts(row.get(4)?)?,
        deleted_at: parse_opt_ts(row.get(5)?)?,
    })
}

fn job_execution_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobExecution> {
    Ok(JobExecution {
        id: row.get(0)?,
        user_id: row.get(1)?,
        job_id: row.get(2)?,
        execution_start_time: parse_ts(row.get(3)?)?,
        execution_stop_time: parse_ts(row.get(4)?)?,
        output: row.get(5)?,
        created_at: parse_ts(row.get(6)?)?,
        updated_at: parse_ts(row.get(7)?)?,
        deleted_at: parse_opt_ts(row.get(8)?)?,
    })
}

fn schedule_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Schedule> {
    Ok(Schedule {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        schedule_type: ScheduleType::try_from(row.get::<_, i64>(3)?).map_err(conv_err)?,
        schedule_value: row.get(4)?,
        schedule_unit: ScheduleUnit::parse(&row.get::<_, String>(5)?).map_err(conv_err)?,
        schedule_status: ScheduleStatus::try_from(row.get::<_, i64>(6)?).map_err(conv_err)?,
        ends_at: row.get(7)?,
        action_id: row.get(8)?,
        action: None,
        created_at: parse_ts(row.get(9)?)?,
        updated_at: parse_ts(row.get(10)?)?,
        deleted_at: parse_opt_ts(row.get(11)?)?,
    })
}

fn trigger_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Trigger> {
    Ok(Trigger {
        id: row.get(0)?,
        user_id: row.get(1)?,
        start_at: parse_ts(row.get(2)?)?,
        schedule_id: row.get(3)?,
        trigger_status: TriggerStatus::try_from(row.get::<_, i64>(4)?).map_err(conv_err)?,
        schedule: None,
        created_at: parse_ts(row.get(5)?)?,
        updated_at: parse_ts(row.get(6)?)?,
        deleted_at: parse_opt_ts(row.get(7)?)?,
    })
}

const ACTION_COLS: &str = "id, user_id, name, description, created_at, updated_at, deleted_at";
const JOB_COLS: &str = "id, user_id, name, action_id, job_template_id, job_input_type, \
                        job_input_value, condition, is_root_job, job_timeout_in_secs, \
                        created_at, updated_at, deleted_at";
const JOB_TEMPLATE_COLS: &str = "id, user_id, name, created_at, updated_at, deleted_at";
const JOB_EXECUTION_COLS: &str = "id, user_id, job_id, execution_start_time, \
                                  execution_stop_time, output, created_at, updated_at, deleted_at";
const SCHEDULE_COLS: &str = "id, user_id, name, schedule_type, schedule_value, schedule_unit, \
                             schedule_status, ends_at, action_id, created_at, updated_at, deleted_at";
const TRIGGER_COLS: &str = "id, user_id, start_at, schedule_id, trigger_status, \
                            created_at, updated_at, deleted_at";

fn get_action(conn: &Connection, id: i64) -> Result<Action> {
    conn.query_row(
        &format!("SELECT {ACTION_COLS} FROM actions WHERE id = ?1 AND deleted_at IS NULL"),
        params![id],
        action_from_row,
    )
    .map_err(|e| not_found("action", id, e))
}

fn get_schedule(conn: &Connection, id: i64) -> Result<Schedule> {
    conn.query_row(
        &format!("SELECT {SCHEDULE_COLS} FROM schedules WHERE id = ?1 AND deleted_at IS NULL"),
        params![id],
        schedule_from_row,
    )
    .map_err(|e| not_found("schedule", id, e))
}

#[async_trait]
impl Store for SqliteStore {
    async fn save_action(&self, action: &mut Action) -> Result<()> {
        require_user(action.user_id)?;
        action.updated_at = Utc::now();
        let conn = self.lock()?;
        if action.id == 0 {
            action.created_at = action.updated_at;
            conn.execute(
                "INSERT INTO actions (user_id, name, description, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    action.user_id,
                    action.name,
                    action.description,
                    ts(action.created_at),
                    ts(action.updated_at),
                ],
            )
            .map_err(db_err)?;
            action.id = conn.last_insert_rowid();
        } else {
            conn.execute(
                "UPDATE actions SET user_id = ?1, name = ?2, description = ?3, updated_at = ?4
                 WHERE id = ?5 AND deleted_at IS NULL",
                params![
                    action.user_id,
                    action.name,
                    action.description,
                    ts(action.updated_at),
                    action.id,
                ],
            )
            .map_err(db_err)?;
        }
        Ok(())
    }

    async fn action(&self, id: i64) -> Result<Action> {
        let conn = self.lock()?;
        get_action(&conn, id)
    }

    async fn delete_action(&self, id: i64) -> Result<()> {
        let conn = self.lock()?;
        let job_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM jobs WHERE action_id = ?1 AND deleted_at IS NULL",
                params![id],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        if job_count > 0 {
            return Err(CronnyError::Validation(format!(
                "action is connected to {job_count} jobs, disassociate them first"
            )));
        }
        let schedule_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM schedules WHERE action_id = ?1 AND deleted_at IS NULL",
                params![id],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        if schedule_count > 0 {
            return Err(CronnyError::Validation(format!(
                "action is connected to {schedule_count} schedules, disassociate them first"
            )));
        }
        let affected = conn
            .execute(
                "UPDATE actions SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
                params![ts(Utc::now()), id],
            )
            .map_err(db_err)?;
        if affected == 0 {
            return Err(CronnyError::NotFound(format!("action {id}")));
        }
        Ok(())
    }

    async fn save_job(&self, job: &mut Job) -> Result<()> {
        require_user(job.user_id)?;
        job.before_save()?;
        job.updated_at = Utc::now();
        let conn = self.lock()?;
        if job.id == 0 {
            job.created_at = job.updated_at;
            conn.execute(
                "INSERT INTO jobs (user_id, name, action_id, job_template_id, job_input_type,
                                   job_input_value, condition, is_root_job, job_timeout_in_secs,
                                   created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    job.user_id,
                    job.name,
                    job.action_id,
                    job.job_template_id,
                    job.job_input_type.as_str(),
                    job.job_input_value,
                    job.condition,
                    job.is_root_job as i64,
                    job.job_timeout_in_secs,
                    ts(job.created_at),
                    ts(job.updated_at),
                ],
            )
            .map_err(db_err)?;
            job.id = conn.last_insert_rowid();
        } else {
            conn.execute(
                "UPDATE jobs SET user_id = ?1, name = ?2, action_id = ?3, job_template_id = ?4,
                                 job_input_type = ?5, job_input_value = ?6, condition = ?7,
                                 is_root_job = ?8, job_timeout_in_secs = ?9, updated_at = ?10
                 WHERE id = ?11 AND deleted_at IS NULL",
                params![
                    job.user_id,
                    job.name,
                    job.action_id,
                    job.job_template_id,
                    job.job_input_type.as_str(),
                    job.job_input_value,
                    job.condition,
                    job.is_root_job as i64,
                    job.job_timeout_in_secs,
                    ts(job.updated_at),
                    job.id,
                ],
            )
            .map_err(db_err)?;
        }
        Ok(())
    }

    async fn job(&self, id: i64) -> Result<Job> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {JOB_COLS} FROM jobs WHERE id = ?1 AND deleted_at IS NULL"),
            params![id],
            job_from_row,
        )
        .map_err(|e| not_found("job", id, e))
    }

    async fn jobs(&self) -> Result<Vec<Job>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {JOB_COLS} FROM jobs WHERE deleted_at IS NULL ORDER BY id"
            ))
            .map_err(db_err)?;
        let jobs = stmt
            .query_map([], job_from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(jobs)
    }

    async fn root_job(&self, action_id: i64) -> Result<Job> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "SELECT {JOB_COLS} FROM jobs
                 WHERE is_root_job = 1 AND action_id = ?1 AND deleted_at IS NULL
                 LIMIT 1"
            ),
            params![action_id],
            job_from_row,
        )
        .map_err(|e| not_found("root job for action", action_id, e))
    }

    async fn job_by_name(&self, action_id: i64, name: &str) -> Result<Job> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "SELECT {JOB_COLS} FROM jobs
                 WHERE action_id = ?1 AND name = ?2 AND deleted_at IS NULL
                 LIMIT 1"
            ),
            params![action_id, name],
            job_from_row,
        )
        .map_err(|e| not_found("job", format!("'{name}' in action {action_id}"), e))
    }

    async fn save_job_template(&self, template: &mut JobTemplate) -> Result<()> {
        require_user(template.user_id)?;
        template.updated_at = Utc::now();
        let conn = self.lock()?;
        if template.id == 0 {
            template.created_at = template.updated_at;
            conn.execute(
                "INSERT INTO job_templates (user_id, name, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    template.user_id,
                    template.name,
                    ts(template.created_at),
                    ts(template.updated_at),
                ],
            )
            .map_err(db_err)?;
            template.id = conn.last_insert_rowid();
        } else {
            conn.execute(
                "UPDATE job_templates SET user_id = ?1, name = ?2, updated_at = ?3
                 WHERE id = ?4 AND deleted_at IS NULL",
                params![
                    template.user_id,
                    template.name,
                    ts(template.updated_at),
                    template.id,
                ],
            )
            .map_err(db_err)?;
        }
        Ok(())
    }

    async fn job_template(&self, id: i64) -> Result<JobTemplate> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "SELECT {JOB_TEMPLATE_COLS} FROM job_templates
                 WHERE id = ?1 AND deleted_at IS NULL"
            ),
            params![id],
            job_template_from_row,
        )
        .map_err(|e| not_found("job template", id, e))
    }

    async fn save_job_execution(&self, execution: &mut JobExecution) -> Result<()> {
        require_user(execution.user_id)?;
        execution.updated_at = Utc::now();
        let conn = self.lock()?;
        if execution.id == 0 {
            execution.created_at = execution.updated_at;
            conn.execute(
                "INSERT INTO job_executions (user_id, job_id, execution_start_time,
                                             execution_stop_time, output, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    execution.user_id,
                    execution.job_id,
                    ts(execution.execution_start_time),
                    ts(execution.execution_stop_time),
                    execution.output,
                    ts(execution.created_at),
                    ts(execution.updated_at),
                ],
            )
            .map_err(db_err)?;
            execution.id = conn.last_insert_rowid();
        } else {
            conn.execute(
                "UPDATE job_executions SET user_id = ?1, job_id = ?2, execution_start_time = ?3,
                                           execution_stop_time = ?4, output = ?5, updated_at = ?6
                 WHERE id = ?7 AND deleted_at IS NULL",
                params![
                    execution.user_id,
                    execution.job_id,
                    ts(execution.execution_start_time),
                    ts(execution.execution_stop_time),
                    execution.output,
                    ts(execution.updated_at),
                    execution.id,
                ],
            )
            .map_err(db_err)?;
        }
        Ok(())
    }

    async fn latest_job_execution(&self, job_id: i64) -> Result<JobExecution> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "SELECT {JOB_EXECUTION_COLS} FROM job_executions
                 WHERE job_id = ?1 AND deleted_at IS NULL
                 ORDER BY execution_stop_time DESC LIMIT 1"
            ),
            params![job_id],
            job_execution_from_row,
        )
        .map_err(|e| not_found("job execution for job", job_id, e))
    }

    async fn job_executions(&self, job_id: i64) -> Result<Vec<JobExecution>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {JOB_EXECUTION_COLS} FROM job_executions
                 WHERE job_id = ?1 AND deleted_at IS NULL
                 ORDER BY execution_stop_time"
            ))
            .map_err(db_err)?;
        let executions = stmt
            .query_map(params![job_id], job_execution_from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(executions)
    }

    async fn delete_job_execution(&self, id: i64) -> Result<()> {
        let conn = self.lock()?;
        let affected = conn
            .execute(
                "UPDATE job_executions SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
                params![ts(Utc::now()), id],
            )
            .map_err(db_err)?;
        if affected == 0 {
            return Err(CronnyError::NotFound(format!("job execution {id}")));
        }
        Ok(())
    }

    async fn save_schedule(&self, schedule: &mut Schedule) -> Result<()> {
        require_user(schedule.user_id)?;
        schedule.before_save()?;
        schedule.updated_at = Utc::now();
        let conn = self.lock()?;
        if schedule.id == 0 {
            schedule.created_at = schedule.updated_at;
            conn.execute(
                "INSERT INTO schedules (user_id, name, schedule_type, schedule_value,
                                        schedule_unit, schedule_status, ends_at, action_id,
                                        created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    schedule.user_id,
                    schedule.name,
                    i64::from(schedule.schedule_type),
                    schedule.schedule_value,
                    schedule.schedule_unit.as_str(),
                    i64::from(schedule.schedule_status),
                    schedule.ends_at,
                    schedule.action_id,
                    ts(schedule.created_at),
                    ts(schedule.updated_at),
                ],
            )
            .map_err(db_err)?;
            schedule.id = conn.last_insert_rowid();
        } else {
            conn.execute(
                "UPDATE schedules SET user_id = ?1, name = ?2, schedule_type = ?3,
                                      schedule_value = ?4, schedule_unit = ?5,
                                      schedule_status = ?6, ends_at = ?7, action_id = ?8,
                                      updated_at = ?9
                 WHERE id = ?10 AND deleted_at IS NULL",
                params![
                    schedule.user_id,
                    schedule.name,
                    i64::from(schedule.schedule_type),
                    schedule.schedule_value,
                    schedule.schedule_unit.as_str(),
                    i64::from(schedule.schedule_status),
                    schedule.ends_at,
                    schedule.action_id,
                    ts(schedule.updated_at),
                    schedule.id,
                ],
            )
            .map_err(db_err)?;
        }
        Ok(())
    }

    async fn schedule(&self, id: i64) -> Result<Schedule> {
        let conn = self.lock()?;
        get_schedule(&conn, id)
    }

    async fn schedules_by_status(&self, status: ScheduleStatus) -> Result<Vec<Schedule>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SCHEDULE_COLS} FROM schedules
                 WHERE schedule_status = ?1 AND deleted_at IS NULL
                 ORDER BY id"
            ))
            .map_err(db_err)?;
        let schedules = stmt
            .query_map(params![i64::from(status)], schedule_from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(schedules)
    }

    async fn schedules_for_user(&self, user_id: i64) -> Result<Vec<Schedule>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SCHEDULE_COLS} FROM schedules
                 WHERE user_id = ?1 AND deleted_at IS NULL
                 ORDER BY id"
            ))
            .map_err(db_err)?;
        let schedules = stmt
            .query_map(params![user_id], schedule_from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(schedules)
    }

    async fn update_schedule_status(&self, id: i64, status: ScheduleStatus) -> Result<()> {
        let conn = self.lock()?;
        let affected = conn
            .execute(
                "UPDATE schedules SET schedule_status = ?1, updated_at = ?2
                 WHERE id = ?3 AND deleted_at IS NULL",
                params![i64::from(status), ts(Utc::now()), id],
            )
            .map_err(db_err)?;
        if affected == 0 {
            return Err(CronnyError::NotFound(format!("schedule {id}")));
        }
        Ok(())
    }

    async fn save_trigger(&self, trigger: &mut Trigger) -> Result<()> {
        require_user(trigger.user_id)?;
        trigger.updated_at = Utc::now();
        let conn = self.lock()?;
        if trigger.id == 0 {
            trigger.created_at = trigger.updated_at;
            conn.execute(
                "INSERT INTO triggers (user_id, start_at, schedule_id, trigger_status,
                                       created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    trigger.user_id,
                    ts(trigger.start_at),
                    trigger.schedule_id,
                    i64::from(trigger.trigger_status),
                    ts(trigger.created_at),
                    ts(trigger.updated_at),
                ],
            )
            .map_err(db_err)?;
            trigger.id = conn.last_insert_rowid();
        } else {
            conn.execute(
                "UPDATE triggers SET user_id = ?1, start_at = ?2, schedule_id = ?3,
                                     trigger_status = ?4, updated_at = ?5
                 WHERE id = ?6 AND deleted_at IS NULL",
                params![
                    trigger.user_id,
                    ts(trigger.start_at),
                    trigger.schedule_id,
                    i64::from(trigger.trigger_status),
                    ts(trigger.updated_at),
                    trigger.id,
                ],
            )
            .map_err(db_err)?;
        }
        Ok(())
    }

    async fn due_triggers(&self, now: DateTime<Utc>) -> Result<Vec<Trigger>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {TRIGGER_COLS} FROM triggers
                 WHERE trigger_status = ?1 AND start_at < ?2 AND deleted_at IS NULL
                 ORDER BY start_at"
            ))
            .map_err(db_err)?;
        let mut triggers = stmt
            .query_map(
                params![i64::from(TriggerStatus::Scheduled), ts(now)],
                trigger_from_row,
            )
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        for trigger in &mut triggers {
            let mut schedule = get_schedule(&conn, trigger.schedule_id)?;
            schedule.action = Some(get_action(&conn, schedule.action_id)?);
            trigger.schedule = Some(schedule);
        }
        Ok(triggers)
    }

    async fn update_trigger_status(&self, id: i64, status: TriggerStatus) -> Result<()> {
        let conn = self.lock()?;
        let affected = conn
            .execute(
                "UPDATE triggers SET trigger_status = ?1, updated_at = ?2
                 WHERE id = ?3 AND deleted_at IS NULL",
                params![i64::from(status), ts(Utc::now()), id],
            )
            .map_err(db_err)?;
        if affected == 0 {
            return Err(CronnyError::NotFound(format!("trigger {id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobInputType;
    use chrono::Duration;

    async fn seed_action(store: &SqliteStore) -> Action {
        let mut action = Action::new(1, "workflow", "test workflow");
        store.save_action(&mut action).await.unwrap();
        action
    }

    #[tokio::test]
    async fn test_save_rejects_missing_user_id() {
        let store = SqliteStore::in_memory().unwrap();
        let mut action = Action::new(0, "orphan", "");
        let err = store.save_action(&mut action).await.unwrap_err();
        assert!(matches!(err, CronnyError::MissingUserId));
    }

    #[tokio::test]
    async fn test_action_round_trip_and_soft_delete() {
        let store = SqliteStore::in_memory().unwrap();
        let action = seed_action(&store).await;
        assert!(action.id > 0);

        let loaded = store.action(action.id).await.unwrap();
        assert_eq!(loaded.name, "workflow");

        store.delete_action(action.id).await.unwrap();
        assert!(store.action(action.id).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_action_guards_associations() {
        let store = SqliteStore::in_memory().unwrap();
        let action = seed_action(&store).await;

        let mut template = JobTemplate::new(1, "logger");
        store.save_job_template(&mut template).await.unwrap();

        let mut job = Job::new(1, "j1", action.id, template.id, JobInputType::StaticInput, "{}");
        store.save_job(&mut job).await.unwrap();

        let err = store.delete_action(action.id).await.unwrap_err();
        assert!(err.to_string().contains("jobs"));
    }

    #[tokio::test]
    async fn test_job_save_applies_before_save() {
        let store = SqliteStore::in_memory().unwrap();
        let action = seed_action(&store).await;
        let mut template = JobTemplate::new(1, "logger");
        store.save_job_template(&mut template).await.unwrap();

        let mut job = Job::new(1, "j1", action.id, template.id, JobInputType::StaticInput, "{}");
        store.save_job(&mut job).await.unwrap();
        assert_eq!(job.job_timeout_in_secs, 60);

        let loaded = store.job(job.id).await.unwrap();
        assert_eq!(loaded.job_timeout_in_secs, 60);
        assert_eq!(loaded.job_input_type, JobInputType::StaticInput);
    }

    #[tokio::test]
    async fn test_root_job_and_job_by_name() {
        let store = SqliteStore::in_memory().unwrap();
        let action = seed_action(&store).await;
        let mut template = JobTemplate::new(1, "logger");
        store.save_job_template(&mut template).await.unwrap();

        let mut root = Job::new(1, "root", action.id, template.id, JobInputType::StaticInput, "{}");
        root.is_root_job = true;
        store.save_job(&mut root).await.unwrap();

        let mut leaf = Job::new(1, "leaf", action.id, template.id, JobInputType::StaticInput, "{}");
        store.save_job(&mut leaf).await.unwrap();

        assert_eq!(store.root_job(action.id).await.unwrap().id, root.id);
        assert_eq!(store.job_by_name(action.id, "leaf").await.unwrap().id, leaf.id);
        assert!(store.job_by_name(action.id, "ghost").await.is_err());
    }

    #[tokio::test]
    async fn test_latest_job_execution_ordering() {
        let store = SqliteStore::in_memory().unwrap();
        let action = seed_action(&store).await;
        let mut template = JobTemplate::new(1, "logger");
        store.save_job_template(&mut template).await.unwrap();
        let mut job = Job::new(1, "j1", action.id, template.id, JobInputType::StaticInput, "{}");
        store.save_job(&mut job).await.unwrap();

        let base = Utc::now();
        for i in 0..3 {
            let stop = base + Duration::seconds(i);
            let mut exec =
                JobExecution::new(1, job.id, stop - Duration::seconds(1), stop, format!("{{\"n\":\"{i}\"}}"));
            store.save_job_execution(&mut exec).await.unwrap();
        }

        let latest = store.latest_job_execution(job.id).await.unwrap();
        assert_eq!(latest.output, "{\"n\":\"2\"}");

        let all = store.job_executions(job.id).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].output, "{\"n\":\"0\"}");
    }

    #[tokio::test]
    async fn test_schedule_status_updates_are_idempotent() {
        let store = SqliteStore::in_memory().unwrap();
        let action = seed_action(&store).await;
        let mut schedule = Schedule::new(
            1,
            "every-5s",
            ScheduleType::Relative,
            "5",
            ScheduleUnit::Second,
            action.id,
        );
        store.save_schedule(&mut schedule).await.unwrap();

        store
            .update_schedule_status(schedule.id, ScheduleStatus::Processing)
            .await
            .unwrap();
        store
            .update_schedule_status(schedule.id, ScheduleStatus::Processing)
            .await
            .unwrap();

        let loaded = store.schedule(schedule.id).await.unwrap();
        assert_eq!(loaded.schedule_status, ScheduleStatus::Processing);
    }

    #[tokio::test]
    async fn test_save_schedule_validates() {
        let store = SqliteStore::in_memory().unwrap();
        let action = seed_action(&store).await;
        let mut invalid = Schedule::new(
            1,
            "bad",
            ScheduleType::Recurring,
            "0",
            ScheduleUnit::Second,
            action.id,
        );
        assert!(store.save_schedule(&mut invalid).await.is_err());
    }

    #[tokio::test]
    async fn test_due_triggers_filters_and_preloads() {
        let store = SqliteStore::in_memory().unwrap();
        let action = seed_action(&store).await;
        let mut schedule = Schedule::new(
            1,
            "every-5s",
            ScheduleType::Relative,
            "5",
            ScheduleUnit::Second,
            action.id,
        );
        store.save_schedule(&mut schedule).await.unwrap();

        let now = Utc::now();
        let mut due = Trigger::new(1, schedule.id, now - Duration::seconds(10));
        store.save_trigger(&mut due).await.unwrap();

        let mut future = Trigger::new(1, schedule.id, now + Duration::hours(1));
        store.save_trigger(&mut future).await.unwrap();

        let mut executing = Trigger::new(1, schedule.id, now - Duration::seconds(10));
        store.save_trigger(&mut executing).await.unwrap();
        store
            .update_trigger_status(executing.id, TriggerStatus::Executing)
            .await
            .unwrap();

        let found = store.due_triggers(now).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, due.id);

        let loaded_schedule = found[0].schedule.as_ref().unwrap();
        assert_eq!(loaded_schedule.id, schedule.id);
        assert_eq!(loaded_schedule.action.as_ref().unwrap().id, action.id);
    }

    #[tokio::test]
    async fn test_schedules_for_user_scopes_rows() {
        let store = SqliteStore::in_memory().unwrap();
        let action = seed_action(&store).await;
        let mut mine = Schedule::new(
            1,
            "mine",
            ScheduleType::Relative,
            "5",
            ScheduleUnit::Second,
            action.id,
        );
        store.save_schedule(&mut mine).await.unwrap();

        let mut theirs = Schedule::new(
            2,
            "theirs",
            ScheduleType::Relative,
            "5",
            ScheduleUnit::Second,
            action.id,
        );
        store.save_schedule(&mut theirs).await.unwrap();

        let schedules = store.schedules_for_user(1).await.unwrap();
        assert_eq!(schedules.len(), 1);
        assert_eq!(schedules[0].name, "mine");
    }
}
