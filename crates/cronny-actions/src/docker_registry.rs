//! Docker registry executor: pulls an image, optionally from a private
//! registry with credentials.

use async_trait::async_trait;
use cronny_core::types::{opt_str, require_str};
use cronny_core::{ActionExecutor, ActionKey, ActionKeyType, CronnyError, Input, Output, Result};
use serde_json::Value;
use tokio::process::Command;

pub struct DockerRegistryAction;

impl DockerRegistryAction {
    pub fn new() -> Self {
        Self
    }

    /// Registry credentials must come as a pair or not at all.
    fn validate_credentials(input: &Input) -> Result<()> {
        let has_username = input.contains_key("registry_username");
        let has_password = input.contains_key("registry_password");
        if has_username != has_password {
            return Err(CronnyError::Validation(
                "when providing registry credentials, both username and password must be provided"
                    .into(),
            ));
        }
        Ok(())
    }
}

impl Default for DockerRegistryAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionExecutor for DockerRegistryAction {
    fn name(&self) -> &'static str {
        "docker-registry"
    }

    fn required_keys(&self) -> Vec<ActionKey> {
        // Registry information is optional.
        vec![ActionKey::new("image", ActionKeyType::String)]
    }

    async fn execute(&self, input: Input) -> Result<Output> {
        Self::validate_credentials(&input)?;

        let image = require_str(&input, "image")?;
        let registry = opt_str(&input, "registry");

        let image_ref = match registry {
            Some(registry) => format!("{}/{}", registry.trim_end_matches('/'), image),
            None => image.to_string(),
        };

        if let (Some(registry), Some(username), Some(password)) = (
            registry,
            opt_str(&input, "registry_username"),
            opt_str(&input, "registry_password"),
        ) {
            let login = Command::new("docker")
                .args(["login", registry, "--username", username, "--password-stdin"])
                .stdin(std::process::Stdio::piped())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::piped())
                .spawn()
                .map_err(|e| CronnyError::Action(format!("docker login spawn failed: {e}")))?;
            write_stdin(login, password).await?;
        }

        tracing::info!("🐳 pulling image {}", image_ref);
        let pull = Command::new("docker")
            .args(["pull", &image_ref])
            .output()
            .await
            .map_err(|e| CronnyError::Action(format!("docker pull spawn failed: {e}")))?;

        if !pull.status.success() {
            let stderr = String::from_utf8_lossy(&pull.stderr);
            return Err(CronnyError::Action(format!(
                "docker pull of {image_ref} failed: {}",
                stderr.trim()
            )));
        }

        let mut output = Output::new();
        output.insert("image".into(), Value::String(image_ref));
        output.insert("status".into(), Value::String("pulled".into()));
        Ok(output)
    }
}

/// Feed a secret to a child process over stdin and wait for it.
async fn write_stdin(mut child: tokio::process::Child, secret: &str) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(secret.as_bytes())
            .await
            .map_err(|e| CronnyError::Action(format!("docker login stdin: {e}")))?;
    }
    let result = child
        .wait_with_output()
        .await
        .map_err(|e| CronnyError::Action(format!("docker login wait: {e}")))?;
    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(CronnyError::Action(format!(
            "docker login failed: {}",
            stderr.trim()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: serde_json::Value) -> Input {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_required_keys() {
        let keys = DockerRegistryAction::new().required_keys();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].name, "image");
    }

    #[test]
    fn test_credentials_must_be_paired() {
        let lone_username = obj(json!({
            "image": "alpine",
            "registry": "r.example.com",
            "registry_username": "bob",
        }));
        assert!(DockerRegistryAction::validate_credentials(&lone_username).is_err());

        let paired = obj(json!({
            "image": "alpine",
            "registry": "r.example.com",
            "registry_username": "bob",
            "registry_password": "hunter2",
        }));
        assert!(DockerRegistryAction::validate_credentials(&paired).is_ok());

        let none = obj(json!({"image": "alpine"}));
        assert!(DockerRegistryAction::validate_credentials(&none).is_ok());
    }
}
