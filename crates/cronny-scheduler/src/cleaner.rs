//! The execution history cleaner.
//!
//! Every minute, each job's execution history is trimmed to the retention
//! bound: the oldest rows (by `execution_stop_time`) beyond the limit are
//! deleted.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use cronny_core::Result;

use crate::store::Store;

const TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Default executions retained per job.
pub const ALLOWED_JOB_EXECUTIONS_PER_JOB: usize = 10;

pub struct ExecutionCleaner {
    store: Arc<dyn Store>,
    cancel: CancellationToken,
    pub allowed_job_executions_per_job: usize,
}

impl ExecutionCleaner {
    pub fn new(store: Arc<dyn Store>, cancel: CancellationToken) -> Self {
        Self {
            store,
            cancel,
            allowed_job_executions_per_job: ALLOWED_JOB_EXECUTIONS_PER_JOB,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.allowed_job_executions_per_job = limit;
        self
    }

    /// One cleaning pass over every job. Returns the number of deleted rows.
    pub async fn run_one_iter(&self) -> Result<u32> {
        let jobs = self.store.jobs().await?;
        let mut total_cleaned = 0u32;
        for job in &jobs {
            let executions = self.store.job_executions(job.id).await?;
            if executions.len() <= self.allowed_job_executions_per_job {
                continue;
            }
            let to_clean = executions.len() - self.allowed_job_executions_per_job;
            for execution in &executions[..to_clean] {
                self.store.delete_job_execution(execution.id).await?;
                total_cleaned += 1;
            }
        }
        Ok(total_cleaned)
    }

    /// Tick loop; returns when cancelled.
    pub async fn run(&self) {
        tracing::info!("🧹 execution cleaner started");
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("execution cleaner shutting down");
                    return;
                }
                _ = interval.tick() => {
                    match self.run_one_iter().await {
                        Ok(0) => {}
                        Ok(total) => tracing::info!("cleaned {total} job executions"),
                        Err(e) => tracing::error!("execution cleaner iteration failed: {e}"),
                    }
                }
            }
        }
    }
}
