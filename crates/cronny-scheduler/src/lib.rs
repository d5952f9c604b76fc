//! # Cronny Scheduler
//!
//! The scheduling and workflow-execution engine.
//!
//! ## Architecture
//! ```text
//! TriggerCreator (1s tick)
//!   └── pending Schedules → Triggers (start_at = policy), Schedule → processing
//!
//! TriggerExecutor (1s tick producer + bounded queue + 10 workers)
//!   ├── due Triggers → queue (cap 1024, send blocks = back-pressure)
//!   └── worker: Trigger → executing
//!                 → arm next Trigger for the Schedule
//!                 → WorkflowEngine: root Job → execute → route → next Job ...
//!                 → Trigger → completed | failed
//!
//! WorkflowEngine (per Job)
//!   ├── input: static JSON | previous job's output | rendered template
//!   ├── executor via ActionRegistry, bounded by job_timeout_in_secs
//!   ├── JobExecution history row appended per run
//!   └── Condition rules over the output pick the next Job
//!
//! ExecutionCleaner (60s tick)  - bounds history per Job
//! StatsCollector (10s tick)  - flushes process-wide counters
//! ```
//!
//! Persistence goes through the [`Store`] trait; [`SqliteStore`] is the
//! bundled implementation.

pub mod cleaner;
pub mod condition;
pub mod creator;
pub mod executor;
pub mod models;
pub mod sqlite;
pub mod stats;
pub mod store;
pub mod template;
pub mod workflow;

pub use cleaner::ExecutionCleaner;
pub use condition::{Comparison, Condition, ConditionRule, Filter};
pub use creator::TriggerCreator;
pub use executor::TriggerExecutor;
pub use models::{
    Action, Job, JobExecution, JobInputType, JobTemplate, Schedule, ScheduleStatus, ScheduleType,
    ScheduleUnit, Trigger, TriggerStatus,
};
pub use sqlite::SqliteStore;
pub use stats::StatsCollector;
pub use store::Store;
pub use workflow::WorkflowEngine;
