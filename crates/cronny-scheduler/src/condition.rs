//! Condition rule evaluation: routes a job's output to the next job.
//!
//! A condition is an ordered rule list; the first rule whose every filter
//! is satisfied wins. A rule with no filters is a wildcard catch-all. An
//! empty rule list marks the end of a workflow.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use cronny_core::{CronnyError, Output, Result};

/// Comparison applied by a filter. Only `equality` is evaluated;
/// `greater_than`/`lesser_than` are reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Equality,
    GreaterThan,
    LesserThan,
}

impl Comparison {
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparison::Equality => "equality",
            Comparison::GreaterThan => "greater_than",
            Comparison::LesserThan => "lesser_than",
        }
    }
}

/// One predicate over a single input key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub name: String,
    pub should_match: bool,
    pub comparison_type: Comparison,
    pub value: String,
}

impl Filter {
    /// Check this filter against the input; an error means unsatisfied.
    pub fn compare(&self, input: &Output) -> Result<()> {
        let input_value = match input.get(&self.name) {
            Some(Value::String(s)) => s,
            Some(_) => {
                return Err(CronnyError::Validation(format!(
                    "filter key '{}' is not a string in the input",
                    self.name
                )));
            }
            None => {
                return Err(CronnyError::Validation(format!(
                    "filter key '{}' not present in the input",
                    self.name
                )));
            }
        };
        match self.comparison_type {
            Comparison::Equality => {
                if self.should_match && input_value != &self.value {
                    return Err(CronnyError::Validation(format!(
                        "filter value '{}' doesn't match input '{input_value}'",
                        self.value
                    )));
                }
                if !self.should_match && input_value == &self.value {
                    return Err(CronnyError::Validation(format!(
                        "filter value '{}' matches input '{input_value}'",
                        self.value
                    )));
                }
                Ok(())
            }
            other => Err(CronnyError::UnsupportedComparison(other.as_str().into())),
        }
    }
}

/// One routing rule: all filters must hold for `job_id` to be chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionRule {
    /// Empty filters make this a wildcard rule.
    #[serde(default)]
    pub filters: Vec<Filter>,
    pub job_id: i64,
}

impl ConditionRule {
    fn matches(&self, input: &Output) -> bool {
        for filter in &self.filters {
            if let Err(e) = filter.compare(input) {
                tracing::debug!("condition filter unsatisfied: {e}");
                return false;
            }
        }
        true
    }
}

/// An ordered rule set serialized into `jobs.condition`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default)]
    pub version: u32,
    #[serde(rename = "condition_rules", default)]
    pub rules: Vec<ConditionRule>,
}

impl Condition {
    /// Deserialize a condition from its stored JSON form.
    pub fn parse(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// An empty rule set means the workflow ends here.
    pub fn is_terminal(&self) -> bool {
        self.rules.is_empty()
    }

    /// The job id of the first rule satisfied by `input`.
    pub fn next_job_id(&self, input: &Output) -> Result<i64> {
        for rule in &self.rules {
            if rule.matches(input) {
                return Ok(rule.job_id);
            }
        }
        Err(CronnyError::NoRoute(
            serde_json::Value::Object(input.clone()).to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: serde_json::Value) -> Output {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn eq_filter(name: &str, value: &str, should_match: bool) -> Filter {
        Filter {
            name: name.into(),
            should_match,
            comparison_type: Comparison::Equality,
            value: value.into(),
        }
    }

    fn status_condition() -> Condition {
        Condition {
            version: 1,
            rules: vec![
                ConditionRule {
                    filters: vec![eq_filter("status", "success", true)],
                    job_id: 2,
                },
                ConditionRule {
                    filters: vec![eq_filter("status", "error", true)],
                    job_id: 3,
                },
            ],
        }
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let condition = status_condition();
        assert_eq!(
            condition.next_job_id(&obj(json!({"status": "success"}))).unwrap(),
            2
        );
        assert_eq!(
            condition.next_job_id(&obj(json!({"status": "error"}))).unwrap(),
            3
        );
    }

    #[test]
    fn test_no_route_when_nothing_matches() {
        let condition = status_condition();
        let err = condition
            .next_job_id(&obj(json!({"status": "unknown"})))
            .unwrap_err();
        assert!(matches!(err, CronnyError::NoRoute(_)));
    }

    #[test]
    fn test_missing_key_skips_rule() {
        let condition = status_condition();
        let err = condition.next_job_id(&obj(json!({"other": "x"}))).unwrap_err();
        assert!(matches!(err, CronnyError::NoRoute(_)));
    }

    #[test]
    fn test_should_match_false() {
        let condition = Condition {
            version: 1,
            rules: vec![ConditionRule {
                filters: vec![eq_filter("status", "error", false)],
                job_id: 7,
            }],
        };
        assert_eq!(
            condition.next_job_id(&obj(json!({"status": "success"}))).unwrap(),
            7
        );
        assert!(condition
            .next_job_id(&obj(json!({"status": "error"})))
            .is_err());
        // Key must still be present for a negated filter.
        assert!(condition.next_job_id(&obj(json!({}))).is_err());
    }

    #[test]
    fn test_empty_filters_is_wildcard() {
        let condition = Condition {
            version: 1,
            rules: vec![ConditionRule {
                filters: vec![],
                job_id: 9,
            }],
        };
        assert_eq!(condition.next_job_id(&obj(json!({"anything": "at all"}))).unwrap(), 9);
    }

    #[test]
    fn test_unsupported_comparison_skips_rule() {
        let condition = Condition {
            version: 1,
            rules: vec![
                ConditionRule {
                    filters: vec![Filter {
                        name: "count".into(),
                        should_match: true,
                        comparison_type: Comparison::GreaterThan,
                        value: "5".into(),
                    }],
                    job_id: 2,
                },
                ConditionRule {
                    filters: vec![],
                    job_id: 3,
                },
            ],
        };
        // The reserved comparison never matches; the wildcard takes over.
        assert_eq!(condition.next_job_id(&obj(json!({"count": "9"}))).unwrap(), 3);
    }

    #[test]
    fn test_serialization_round_trip() {
        let condition = status_condition();
        let raw = serde_json::to_string(&condition).unwrap();
        assert!(raw.contains("condition_rules"));
        assert!(raw.contains("\"comparison_type\":\"equality\""));
        let parsed = Condition::parse(&raw).unwrap();
        assert_eq!(parsed, condition);
    }

    #[test]
    fn test_empty_rules_is_terminal() {
        let condition = Condition::parse(r#"{"version":1,"condition_rules":[]}"#).unwrap();
        assert!(condition.is_terminal());
        let condition = Condition::parse(r#"{"version":1}"#).unwrap();
        assert!(condition.is_terminal());
    }

    #[test]
    fn test_deterministic() {
        let condition = status_condition();
        let input = obj(json!({"status": "success"}));
        for _ in 0..10 {
            assert_eq!(condition.next_job_id(&input).unwrap(), 2);
        }
    }
}
