//! The executor contract: one registered task implementation.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::{CronnyError, Result};
use crate::types::{Input, Output};

/// Nominal type tag of a declared input key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKeyType {
    Number,
    String,
    Float,
}

/// A key an executor requires in its input.
#[derive(Debug, Clone)]
pub struct ActionKey {
    pub name: &'static str,
    pub key_type: ActionKeyType,
}

impl ActionKey {
    pub const fn new(name: &'static str, key_type: ActionKeyType) -> Self {
        Self { name, key_type }
    }
}

/// One concrete task implementation (HTTP call, logger, Slack message, ...).
///
/// Executors may block on I/O; they run on trigger executor workers and
/// must therefore be shareable across tasks. The engine bounds each call
/// with the owning job's timeout.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Registry name, e.g. `"http"`.
    fn name(&self) -> &'static str;

    /// Keys that must be present in the input for `execute` to run.
    fn required_keys(&self) -> Vec<ActionKey>;

    /// Run the task against a resolved input map.
    async fn execute(&self, input: Input) -> Result<Output>;
}

/// Check that every required key is present in the input.
pub fn validate_input(executor: &dyn ActionExecutor, input: &Input) -> Result<()> {
    for key in executor.required_keys() {
        if !input.contains_key(key.name) {
            return Err(CronnyError::Validation(format!(
                "key '{}' not present in the input for '{}'",
                key.name,
                executor.name()
            )));
        }
    }
    Ok(())
}

/// Validate the input, then run the executor.
pub async fn run_action(executor: Arc<dyn ActionExecutor>, input: Input) -> Result<Output> {
    validate_input(executor.as_ref(), &input)?;
    executor.execute(input).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoAction;

    #[async_trait]
    impl ActionExecutor for EchoAction {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn required_keys(&self) -> Vec<ActionKey> {
            vec![ActionKey::new("message", ActionKeyType::String)]
        }

        async fn execute(&self, input: Input) -> Result<Output> {
            Ok(input)
        }
    }

    fn obj(value: serde_json::Value) -> Input {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn test_run_action_validates_required_keys() {
        let executor: Arc<dyn ActionExecutor> = Arc::new(EchoAction);

        let result = run_action(executor.clone(), obj(json!({}))).await;
        assert!(result.is_err());

        let output = run_action(executor, obj(json!({"message": "hi"})))
            .await
            .unwrap();
        assert_eq!(output.get("message").and_then(|v| v.as_str()), Some("hi"));
    }

    #[test]
    fn test_validate_input_reports_missing_key() {
        let err = validate_input(&EchoAction, &obj(json!({"other": 1}))).unwrap_err();
        assert!(err.to_string().contains("message"));
    }
}
