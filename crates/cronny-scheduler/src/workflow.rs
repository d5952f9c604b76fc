//! The job workflow engine.
//!
//! An action's workflow starts at its root job. Each job resolves an
//! input, runs its template's executor under the job's deadline, appends
//! a history row, and routes to the next job by evaluating its condition
//! rules against the output. The walk is iterative with a visited set, so
//! an accidental cycle fails instead of recursing forever.

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use cronny_actions::ActionRegistry;
use cronny_core::{validate_input, CronnyError, Input, Result};

use crate::condition::Condition;
use crate::models::{Action, Job, JobExecution, JobInputType};
use crate::stats;
use crate::store::Store;
use crate::template::InputTemplate;

/// Runs job workflows against a store and an executor registry.
pub struct WorkflowEngine {
    store: Arc<dyn Store>,
    registry: Arc<ActionRegistry>,
}

impl WorkflowEngine {
    pub fn new(store: Arc<dyn Store>, registry: Arc<ActionRegistry>) -> Self {
        Self { store, registry }
    }

    /// Resolve the input map for a job according to its input type.
    pub async fn input(&self, job: &Job) -> Result<Input> {
        match job.job_input_type {
            JobInputType::StaticInput => {
                serde_json::from_str(&job.job_input_value).map_err(|e| {
                    CronnyError::Validation(format!(
                        "failed to parse static input for job {}: {e}",
                        job.id
                    ))
                })
            }
            JobInputType::JobOutputAsInput => {
                let prev_job_id: i64 = job.job_input_value.parse().map_err(|_| {
                    CronnyError::Validation(format!(
                        "failed to convert job id '{}' to an integer",
                        job.job_input_value
                    ))
                })?;
                let prev_job = self.store.job(prev_job_id).await.map_err(|e| {
                    CronnyError::NotFound(format!("previous job {prev_job_id}: {e}"))
                })?;
                let execution =
                    self.store
                        .latest_job_execution(prev_job.id)
                        .await
                        .map_err(|e| {
                            CronnyError::NotFound(format!(
                                "latest execution of job {prev_job_id}: {e}"
                            ))
                        })?;
                serde_json::from_str(&execution.output).map_err(|e| {
                    CronnyError::Validation(format!(
                        "failed to parse output of job {prev_job_id} as input: {e}"
                    ))
                })
            }
            JobInputType::JobInputAsTemplate => {
                let rendered =
                    InputTemplate::new(self.store.as_ref(), job, &job.job_input_value)
                        .render()
                        .await?;
                serde_json::from_str(&rendered).map_err(|e| {
                    CronnyError::Validation(format!(
                        "failed to parse rendered template for job {}: {e}",
                        job.id
                    ))
                })
            }
        }
    }

    /// Run one job: input, executor under deadline, history row.
    /// Returns the serialized output.
    pub async fn execute_job(&self, job: &Job) -> Result<String> {
        tracing::info!("⚙️ executing job '{}' ({})", job.name, job.id);

        let input = self.input(job).await?;
        let template = self.store.job_template(job.job_template_id).await?;
        let executor = self
            .registry
            .get(&template.name)
            .ok_or_else(|| CronnyError::UnknownTemplate(template.name.clone()))?;

        // Required keys are checked before the clock starts.
        validate_input(executor.as_ref(), &input)?;

        let start = Utc::now();
        let deadline = Duration::from_secs(job.job_timeout_in_secs.max(0) as u64);
        let handle = tokio::spawn(async move { executor.execute(input).await });
        let output_map = match tokio::time::timeout(deadline, handle).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join_err)) => {
                return Err(CronnyError::Action(format!(
                    "executor for job {} aborted: {join_err}",
                    job.id
                )));
            }
            // The spawned executor keeps running; its late result is dropped.
            Err(_) => return Err(CronnyError::Timeout(job.job_timeout_in_secs)),
        };
        let stop = Utc::now();

        let output = serde_json::to_string(&output_map)?;
        let mut execution =
            JobExecution::new(job.user_id, job.id, start, stop, output.clone());
        self.store.save_job_execution(&mut execution).await?;
        stats::JOBS_EXECUTED_COUNT.fetch_add(1, Ordering::Relaxed);
        Ok(output)
    }

    /// Pick the next job from the condition rules and this job's output.
    /// `None` means the workflow ends here.
    pub async fn next(&self, job: &Job, output: &str) -> Result<Option<Job>> {
        if job.condition.trim().is_empty() {
            return Ok(None);
        }
        let condition = Condition::parse(&job.condition).map_err(|e| {
            CronnyError::Validation(format!(
                "failed to parse condition of job {}: {e}",
                job.id
            ))
        })?;
        if condition.is_terminal() {
            return Ok(None);
        }
        let output_map = serde_json::from_str(output).map_err(|e| {
            CronnyError::Validation(format!(
                "failed to parse output of job {} for routing: {e}",
                job.id
            ))
        })?;
        let next_job_id = condition.next_job_id(&output_map)?;
        stats::CONDITIONS_MATCHED_COUNT.fetch_add(1, Ordering::Relaxed);
        let next_job = self.store.job(next_job_id).await.map_err(|e| {
            CronnyError::NotFound(format!("next job {next_job_id}: {e}"))
        })?;
        Ok(Some(next_job))
    }

    /// Walk an action's workflow from its root job to termination.
    pub async fn execute_action(&self, action: &Action) -> Result<()> {
        let root = self.store.root_job(action.id).await.map_err(|e| {
            CronnyError::NotFound(format!(
                "no root job for action '{}' ({}): {e}",
                action.name, action.id
            ))
        })?;

        let mut visited = HashSet::new();
        let mut current = root;
        loop {
            if !visited.insert(current.id) {
                return Err(CronnyError::Validation(format!(
                    "workflow cycle detected at job '{}' ({})",
                    current.name, current.id
                )));
            }
            let output = self.execute_job(&current).await?;
            match self.next(&current, &output).await? {
                Some(next_job) => current = next_job,
                None => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobTemplate;
    use crate::sqlite::SqliteStore;
    use async_trait::async_trait;
    use cronny_core::{ActionExecutor, ActionKey, Output};
    use serde_json::json;

    struct SleepAction;

    #[async_trait]
    impl ActionExecutor for SleepAction {
        fn name(&self) -> &'static str {
            "sleep"
        }
        fn required_keys(&self) -> Vec<ActionKey> {
            vec![]
        }
        async fn execute(&self, input: Input) -> cronny_core::Result<Output> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(input)
        }
    }

    struct Fixture {
        store: Arc<SqliteStore>,
        engine: WorkflowEngine,
        action: Action,
        template_id: i64,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let mut registry = ActionRegistry::builtin();
        registry.register(Arc::new(SleepAction));
        let engine = WorkflowEngine::new(store.clone(), Arc::new(registry));

        let mut action = Action::new(1, "wf", "");
        store.save_action(&mut action).await.unwrap();
        let mut template = JobTemplate::new(1, "logger");
        store.save_job_template(&mut template).await.unwrap();

        Fixture {
            store,
            engine,
            action,
            template_id: template.id,
        }
    }

    fn logger_job(f: &Fixture, name: &str, input_value: &str) -> Job {
        Job::new(
            1,
            name,
            f.action.id,
            f.template_id,
            JobInputType::StaticInput,
            input_value,
        )
    }

    fn route(rules: serde_json::Value) -> String {
        json!({"version": 1, "condition_rules": rules}).to_string()
    }

    #[tokio::test]
    async fn test_static_input_workflow_terminates() {
        let f = fixture().await;
        let mut job = logger_job(&f, "J1", r#"{"method":"GET","url":"https://x"}"#);
        job.is_root_job = true;
        job.condition = r#"{"rules":[]}"#.to_string();
        f.store.save_job(&mut job).await.unwrap();

        f.engine.execute_action(&f.action).await.unwrap();

        let executions = f.store.job_executions(job.id).await.unwrap();
        assert_eq!(executions.len(), 1);
        let execution = &executions[0];
        assert!(execution.execution_stop_time >= execution.execution_start_time);
        let output: serde_json::Value = serde_json::from_str(&execution.output).unwrap();
        assert_eq!(output["method"], "GET");
        // History rows inherit the job's owner.
        assert_eq!(execution.user_id, job.user_id);
    }

    #[tokio::test]
    async fn test_missing_root_job_fails() {
        let f = fixture().await;
        let err = f.engine.execute_action(&f.action).await.unwrap_err();
        assert!(err.to_string().contains("root job"));
    }

    #[tokio::test]
    async fn test_unknown_template_fails() {
        let f = fixture().await;
        let mut template = JobTemplate::new(1, "quantum");
        f.store.save_job_template(&mut template).await.unwrap();
        let mut job = Job::new(
            1,
            "J1",
            f.action.id,
            template.id,
            JobInputType::StaticInput,
            "{}",
        );
        f.store.save_job(&mut job).await.unwrap();

        let err = f.engine.execute_job(&job).await.unwrap_err();
        assert!(matches!(err, CronnyError::UnknownTemplate(_)));
    }

    #[tokio::test]
    async fn test_output_as_input_chain() {
        let f = fixture().await;
        let mut j1 = logger_job(&f, "J1", r#"{"id":"42"}"#);
        j1.is_root_job = true;
        f.store.save_job(&mut j1).await.unwrap();
        f.engine.execute_job(&j1).await.unwrap();

        let mut j2 = Job::new(
            1,
            "J2",
            f.action.id,
            f.template_id,
            JobInputType::JobOutputAsInput,
            &j1.id.to_string(),
        );
        f.store.save_job(&mut j2).await.unwrap();

        let input = f.engine.input(&j2).await.unwrap();
        assert_eq!(input.get("id").and_then(|v| v.as_str()), Some("42"));
    }

    #[tokio::test]
    async fn test_template_input() {
        let f = fixture().await;
        let mut j1 = logger_job(&f, "J1", r#"{"title":"foo"}"#);
        f.store.save_job(&mut j1).await.unwrap();
        f.engine.execute_job(&j1).await.unwrap();

        let mut j2 = Job::new(
            1,
            "J2",
            f.action.id,
            f.template_id,
            JobInputType::JobInputAsTemplate,
            r#"{"message":"hi <<job__J1__output__title>>"}"#,
        );
        f.store.save_job(&mut j2).await.unwrap();

        let input = f.engine.input(&j2).await.unwrap();
        assert_eq!(input.get("message").and_then(|v| v.as_str()), Some("hi foo"));
    }

    #[tokio::test]
    async fn test_condition_routing() {
        let f = fixture().await;
        let mut j2 = logger_job(&f, "J2", "{}");
        f.store.save_job(&mut j2).await.unwrap();
        let mut j3 = logger_job(&f, "J3", "{}");
        f.store.save_job(&mut j3).await.unwrap();

        let mut j1 = logger_job(&f, "J1", r#"{"status":"success"}"#);
        j1.condition = route(json!([
            {"filters": [{"name": "status", "should_match": true,
                          "comparison_type": "equality", "value": "success"}],
             "job_id": j2.id},
            {"filters": [{"name": "status", "should_match": true,
                          "comparison_type": "equality", "value": "error"}],
             "job_id": j3.id},
        ]));
        f.store.save_job(&mut j1).await.unwrap();

        let next = f
            .engine
            .next(&j1, r#"{"status":"success"}"#)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.id, j2.id);

        let next = f
            .engine
            .next(&j1, r#"{"status":"error"}"#)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.id, j3.id);

        let err = f
            .engine
            .next(&j1, r#"{"status":"unknown"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, CronnyError::NoRoute(_)));
    }

    #[tokio::test]
    async fn test_empty_condition_ends_workflow() {
        let f = fixture().await;
        let mut job = logger_job(&f, "J1", "{}");
        f.store.save_job(&mut job).await.unwrap();

        assert!(f.engine.next(&job, "{}").await.unwrap().is_none());

        job.condition = r#"{"version":1,"condition_rules":[]}"#.to_string();
        assert!(f.engine.next(&job, "{}").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_timeout() {
        let f = fixture().await;
        let mut template = JobTemplate::new(1, "sleep");
        f.store.save_job_template(&mut template).await.unwrap();
        let mut job = Job::new(
            1,
            "slow",
            f.action.id,
            template.id,
            JobInputType::StaticInput,
            "{}",
        );
        job.job_timeout_in_secs = 1;
        f.store.save_job(&mut job).await.unwrap();

        let err = f.engine.execute_job(&job).await.unwrap_err();
        assert!(matches!(err, CronnyError::Timeout(1)));
        // No history row is written for a timed-out run.
        assert!(f.store.job_executions(job.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cycle_detection() {
        let f = fixture().await;
        let mut j1 = logger_job(&f, "J1", r#"{"status":"loop"}"#);
        j1.is_root_job = true;
        f.store.save_job(&mut j1).await.unwrap();
        let mut j2 = logger_job(&f, "J2", r#"{"status":"loop"}"#);
        f.store.save_job(&mut j2).await.unwrap();

        let wildcard_to = |job_id: i64| route(json!([{"filters": [], "job_id": job_id}]));
        j1.condition = wildcard_to(j2.id);
        f.store.save_job(&mut j1).await.unwrap();
        j2.condition = wildcard_to(j1.id);
        f.store.save_job(&mut j2).await.unwrap();

        let err = f.engine.execute_action(&f.action).await.unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[tokio::test]
    async fn test_unknown_next_job_fails() {
        let f = fixture().await;
        let mut j1 = logger_job(&f, "J1", r#"{"status":"go"}"#);
        j1.condition = route(json!([{"filters": [], "job_id": 9999}]));
        f.store.save_job(&mut j1).await.unwrap();

        let err = f.engine.next(&j1, r#"{"status":"go"}"#).await.unwrap_err();
        assert!(matches!(err, CronnyError::NotFound(_)));
    }
}
