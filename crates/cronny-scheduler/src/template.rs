//! Job input templating.
//!
//! Markers of the form `<<job__NAME__output__FIELD>>` are replaced with a
//! field from the named job's most recent execution output. The named job
//! must belong to the same action as the job being resolved, and the
//! referenced field must be a JSON string.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use cronny_core::{CronnyError, Result};

use crate::models::Job;
use crate::store::Store;

/// Segment separator inside a marker expression.
pub const KEYWORD_DELIMITER: &str = "__";

static MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<<([^>]+)>>").expect("marker regex is valid")
});

/// A template bound to the job whose input it resolves.
pub struct InputTemplate<'a> {
    store: &'a dyn Store,
    job: &'a Job,
    pool: &'a str,
}

impl<'a> InputTemplate<'a> {
    pub fn new(store: &'a dyn Store, job: &'a Job, pool: &'a str) -> Self {
        Self { store, job, pool }
    }

    /// Substitute every marker; text without markers passes through as-is.
    pub async fn render(&self) -> Result<String> {
        let mut result = String::new();
        let mut last = 0;
        for captures in MARKER_RE.captures_iter(self.pool) {
            let marker = captures.get(0).ok_or_else(|| {
                CronnyError::Template("marker match without a range".into())
            })?;
            let expr = captures
                .get(1)
                .ok_or_else(|| CronnyError::Template("marker match without an expression".into()))?
                .as_str();
            let replacement = self.resolve(expr).await?;
            result.push_str(&self.pool[last..marker.start()]);
            result.push_str(&replacement);
            last = marker.end();
        }
        result.push_str(&self.pool[last..]);
        Ok(result)
    }

    /// Resolve one `job__NAME__output__FIELD` expression.
    async fn resolve(&self, expr: &str) -> Result<String> {
        let segments: Vec<&str> = expr.split(KEYWORD_DELIMITER).collect();
        if segments.len() < 4 {
            return Err(CronnyError::Template(format!(
                "not enough elements in marker '{expr}'"
            )));
        }
        if segments[0] != "job" {
            return Err(CronnyError::Template(format!(
                "prefix keyword doesn't match in '{expr}'"
            )));
        }
        if segments[2] != "output" {
            return Err(CronnyError::Template(format!(
                "output keyword doesn't match in '{expr}'"
            )));
        }
        let job_name = segments[1];
        let field = segments[3..].join(KEYWORD_DELIMITER);
        let field = field.trim();

        let referred = self
            .store
            .job_by_name(self.job.action_id, job_name)
            .await
            .map_err(|e| {
                CronnyError::Template(format!("job '{job_name}' referenced by '{expr}': {e}"))
            })?;
        let latest = self.store.latest_job_execution(referred.id).await?;
        let output: Value = serde_json::from_str(&latest.output)?;
        match output.get(field) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(_) => Err(CronnyError::Template(format!(
                "field '{field}' of job '{job_name}' output is not a string"
            ))),
            None => Err(CronnyError::Template(format!(
                "field '{field}' not present in job '{job_name}' output"
            ))),
        }
    }
}
