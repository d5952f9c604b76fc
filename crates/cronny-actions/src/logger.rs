//! Logger executor: writes the input to the service log.

use async_trait::async_trait;
use cronny_core::{ActionExecutor, ActionKey, Input, Output, Result};

pub struct LoggerAction;

impl LoggerAction {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoggerAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionExecutor for LoggerAction {
    fn name(&self) -> &'static str {
        "logger"
    }

    fn required_keys(&self) -> Vec<ActionKey> {
        vec![]
    }

    async fn execute(&self, input: Input) -> Result<Output> {
        tracing::info!(
            "📝 logger action: {}",
            serde_json::Value::Object(input.clone())
        );
        // Echo the input so downstream condition rules and templates
        // have data to route on.
        Ok(input)
    }
}
