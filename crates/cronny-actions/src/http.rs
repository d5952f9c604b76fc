//! HTTP executor: calls an external endpoint and captures the response.

use async_trait::async_trait;
use cronny_core::types::require_str;
use cronny_core::{ActionExecutor, ActionKey, ActionKeyType, CronnyError, Input, Output, Result};
use serde_json::Value;

pub struct HttpAction;

impl HttpAction {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HttpAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionExecutor for HttpAction {
    fn name(&self) -> &'static str {
        "http"
    }

    fn required_keys(&self) -> Vec<ActionKey> {
        vec![
            ActionKey::new("url", ActionKeyType::String),
            ActionKey::new("method", ActionKeyType::String),
        ]
    }

    async fn execute(&self, input: Input) -> Result<Output> {
        let url = require_str(&input, "url")?;
        let method = require_str(&input, "method")?.to_uppercase();
        let timeout = input
            .get("timeout_secs")
            .and_then(Value::as_u64)
            .unwrap_or(30);

        let client = reqwest::Client::builder()
            .user_agent("Cronny/0.1")
            .timeout(std::time::Duration::from_secs(timeout))
            .build()
            .map_err(|e| CronnyError::Action(format!("http client: {e}")))?;

        let mut request = match method.as_str() {
            "GET" => client.get(url),
            "POST" => client.post(url),
            "PUT" => client.put(url),
            "DELETE" => client.delete(url),
            "PATCH" => client.patch(url),
            other => {
                return Err(CronnyError::Action(format!(
                    "unsupported http method: {other}"
                )));
            }
        };

        if let Some(body) = input.get("request_body") {
            request = request
                .header("Content-Type", "application/json")
                .body(body.to_string());
        }

        let response = request
            .send()
            .await
            .map_err(|e| CronnyError::Action(format!("http request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CronnyError::Action(format!("http body read failed: {e}")))?;

        tracing::debug!("http {} {} -> {}", method, url, status);

        // Status is kept as a string so condition filters can compare it.
        let mut output = Output::new();
        output.insert("status".into(), Value::String(status.as_u16().to_string()));
        output.insert("response_body".into(), Value::String(body));
        Ok(output)
    }
}
