//! Dynamic value model for job inputs and outputs.
//!
//! Workflows carry heterogeneous data (strings, numbers, nested objects),
//! so inputs and outputs are JSON object maps end to end. A job's stored
//! output is the serialized form of its executor's `Output`.

use serde_json::{Map, Value};

/// Input handed to an executor: a JSON object map.
pub type Input = Map<String, Value>;

/// Output produced by an executor: a JSON object map.
pub type Output = Map<String, Value>;

/// Fetch a required string field from an input map.
pub fn require_str<'a>(input: &'a Input, key: &str) -> crate::Result<&'a str> {
    match input.get(key) {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(crate::CronnyError::Validation(format!(
            "key '{key}' must be a string"
        ))),
        None => Err(crate::CronnyError::Validation(format!(
            "key '{key}' not present in the input"
        ))),
    }
}

/// Fetch an optional string field from an input map.
pub fn opt_str<'a>(input: &'a Input, key: &str) -> Option<&'a str> {
    input.get(key).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Input {
        let Value::Object(map) = json!({"url": "https://x", "count": 3}) else {
            unreachable!()
        };
        map
    }

    #[test]
    fn test_require_str() {
        let input = sample();
        assert_eq!(require_str(&input, "url").unwrap(), "https://x");
        assert!(require_str(&input, "count").is_err());
        assert!(require_str(&input, "missing").is_err());
    }

    #[test]
    fn test_opt_str() {
        let input = sample();
        assert_eq!(opt_str(&input, "url"), Some("https://x"));
        assert_eq!(opt_str(&input, "count"), None);
        assert_eq!(opt_str(&input, "missing"), None);
    }
}
