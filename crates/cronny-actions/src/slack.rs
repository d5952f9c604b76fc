//! Slack executor: posts a message to a channel via the Web API.

use async_trait::async_trait;
use cronny_core::types::require_str;
use cronny_core::{ActionExecutor, ActionKey, ActionKeyType, CronnyError, Input, Output, Result};
use serde_json::Value;

const POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";

pub struct SlackAction;

impl SlackAction {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SlackAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionExecutor for SlackAction {
    fn name(&self) -> &'static str {
        "slack"
    }

    fn required_keys(&self) -> Vec<ActionKey> {
        vec![
            ActionKey::new("slack_api_token", ActionKeyType::String),
            ActionKey::new("channel_id", ActionKeyType::String),
            ActionKey::new("message", ActionKeyType::String),
        ]
    }

    async fn execute(&self, input: Input) -> Result<Output> {
        let token = require_str(&input, "slack_api_token")?;
        let channel_id = require_str(&input, "channel_id")?;
        let message = require_str(&input, "message")?;

        let client = reqwest::Client::new();
        let response = client
            .post(POST_MESSAGE_URL)
            .bearer_auth(token)
            .json(&serde_json::json!({
                "channel": channel_id,
                "text": message,
            }))
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| CronnyError::Action(format!("slack send failed: {e}")))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| CronnyError::Action(format!("slack response read failed: {e}")))?;

        let ok = body.get("ok").and_then(Value::as_bool).unwrap_or(false);
        if !ok {
            let reason = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            tracing::warn!("slack post to {} failed: {}", channel_id, reason);
            return Err(CronnyError::Action(format!("slack api error: {reason}")));
        }

        tracing::info!("💬 slack message posted to {}", channel_id);
        let mut output = Output::new();
        output.insert("ok".into(), Value::String("true".into()));
        output.insert("channel_id".into(), Value::String(channel_id.to_string()));
        Ok(output)
    }
}
