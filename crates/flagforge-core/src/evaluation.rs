//! Evaluation context/result types and the evaluation engine itself.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::bucketer::bucket;
use crate::condition::matches_all;
use crate::flag::{Flag, FlagEnvironmentConfig, LifecycleStatus};

/// A user identifier (possibly empty) plus an attribute map of arbitrary
/// JSON values, as presented by a client on each evaluation call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationContext {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl EvaluationContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), attributes: Map::new() }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationReason {
    Archived,
    Disabled,
    RuleMatch,
    Default,
    /// Produced only by the single-flag evaluation surface on a cache miss;
    /// the engine itself (`evaluate`) never returns this reason.
    Unknown,
}

impl EvaluationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationReason::Archived => "archived",
            EvaluationReason::Disabled => "disabled",
            EvaluationReason::RuleMatch => "rule_match",
            EvaluationReason::Default => "default",
            EvaluationReason::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub value: Value,
    pub variant: String,
    pub reason: EvaluationReason,
}

impl EvaluationResult {
    fn with_variant(value: Value, variant: impl Into<String>, reason: EvaluationReason) -> Self {
        Self { value, variant: variant.into(), reason }
    }

    fn no_variant(value: Value, reason: EvaluationReason) -> Self {
        Self { value, variant: String::new(), reason }
    }

    pub fn unknown() -> Self {
        Self { value: Value::Null, variant: String::new(), reason: EvaluationReason::Unknown }
    }
}

/// Walk a flag's targeting rules and resolve a value, variant, and reason.
///
/// Pure function of its inputs (plus the SHA-256-based bucket, which is
/// itself a pure function of `flag.key` and `ctx.user_id`) — never
/// suspends, never fails; degrades to `flag.default_value` in every
/// non-`rule_match` branch.
pub fn evaluate(flag: &Flag, config: &FlagEnvironmentConfig, ctx: &EvaluationContext) -> EvaluationResult {
    if flag.lifecycle_status == LifecycleStatus::Archived {
        return EvaluationResult::no_variant(flag.default_value.clone(), EvaluationReason::Archived);
    }

    if !config.enabled {
        return EvaluationResult::no_variant(flag.default_value.clone(), EvaluationReason::Disabled);
    }

    for rule in &config.targeting_rules {
        if !matches_all(&rule.conditions, &ctx.attributes) {
            continue;
        }

        if let Some(percentage) = rule.rollout {
            let b = bucket(&flag.key, &ctx.user_id);
            if b >= percentage {
                continue;
            }
        }

        return match config.find_variant(&rule.variant) {
            Some(variant) => EvaluationResult::with_variant(variant.value.clone(), &rule.variant, EvaluationReason::RuleMatch),
            None => EvaluationResult::with_variant(flag.default_value.clone(), &rule.variant, EvaluationReason::RuleMatch),
        };
    }

    match config.find_variant(&config.default_variant) {
        Some(variant) => EvaluationResult::with_variant(variant.value.clone(), &config.default_variant, EvaluationReason::Default),
        None => EvaluationResult::with_variant(flag.default_value.clone(), &config.default_variant, EvaluationReason::Default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Condition, Operator};
    use crate::flag::{FlagPurpose, TargetingRule, Variant, ValueType};
    use crate::ids::{EnvironmentId, FlagEnvironmentConfigId, FlagId, ProjectId};
    use chrono::Utc;
    use serde_json::json;

    fn base_flag(default_value: Value) -> Flag {
        Flag {
            id: FlagId::new(),
            project_id: ProjectId::new(),
            key: "rollout-flag".to_string(),
            name: "Rollout Flag".to_string(),
            description: None,
            value_type: ValueType::Boolean,
            purpose: FlagPurpose::Release,
            default_value,
            tags: vec![],
            lifecycle_status: LifecycleStatus::Active,
            lifecycle_status_changed_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn base_config(enabled: bool, default_variant: &str, variants: Vec<Variant>, rules: Vec<TargetingRule>) -> FlagEnvironmentConfig {
        FlagEnvironmentConfig {
            id: FlagEnvironmentConfigId::new(),
            flag_id: FlagId::new(),
            environment_id: EnvironmentId::new(),
            enabled,
            default_variant: default_variant.to_string(),
            variants,
            targeting_rules: rules,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn scenario_a_disabled() {
        let flag = base_flag(json!(false));
        let config = base_config(
            false,
            "off",
            vec![Variant { key: "off".into(), value: json!(false) }, Variant { key: "on".into(), value: json!(true) }],
            vec![],
        );
        let ctx = EvaluationContext::new("u1");
        let result = evaluate(&flag, &config, &ctx);
        assert_eq!(result, EvaluationResult { value: json!(false), variant: String::new(), reason: EvaluationReason::Disabled });
    }

    #[test]
    fn scenario_b_first_match_wins() {
        let flag = base_flag(json!("none"));
        let config = base_config(
            true,
            "default",
            vec![
                Variant { key: "default".into(), value: json!("none") },
                Variant { key: "beta".into(), value: json!("b") },
                Variant { key: "vip".into(), value: json!("v") },
            ],
            vec![
                TargetingRule {
                    conditions: vec![Condition { attribute: "plan".into(), operator: Operator::Equals, value: json!("enterprise") }],
                    variant: "vip".into(),
                    rollout: None,
                },
                TargetingRule {
                    conditions: vec![Condition { attribute: "beta".into(), operator: Operator::Equals, value: json!("true") }],
                    variant: "beta".into(),
                    rollout: None,
                },
            ],
        );
        let ctx = EvaluationContext::new("u1").with_attribute("plan", "enterprise").with_attribute("beta", "true");
        let result = evaluate(&flag, &config, &ctx);
        assert_eq!(result, EvaluationResult { value: json!("v"), variant: "vip".into(), reason: EvaluationReason::RuleMatch });
    }

    #[test]
    fn scenario_c_in_rollout() {
        let flag = base_flag(json!(false));
        let config = base_config(
            true,
            "off",
            vec![Variant { key: "off".into(), value: json!(false) }, Variant { key: "on".into(), value: json!(true) }],
            vec![TargetingRule {
                conditions: vec![Condition { attribute: "country".into(), operator: Operator::Equals, value: json!("US") }],
                variant: "on".into(),
                rollout: Some(50),
            }],
        );
        let ctx = EvaluationContext::new("user-xyz").with_attribute("country", "US");
        let result = evaluate(&flag, &config, &ctx);
        assert_eq!(result, EvaluationResult { value: json!(true), variant: "on".into(), reason: EvaluationReason::RuleMatch });
    }

    #[test]
    fn scenario_d_out_of_rollout() {
        let flag = base_flag(json!(false));
        let config = base_config(
            true,
            "off",
            vec![Variant { key: "off".into(), value: json!(false) }, Variant { key: "on".into(), value: json!(true) }],
            vec![TargetingRule {
                conditions: vec![Condition { attribute: "country".into(), operator: Operator::Equals, value: json!("US") }],
                variant: "on".into(),
                rollout: Some(50),
            }],
        );
        let ctx = EvaluationContext::new("user-abc").with_attribute("country", "US");
        let result = evaluate(&flag, &config, &ctx);
        assert_eq!(result, EvaluationResult { value: json!(false), variant: "off".into(), reason: EvaluationReason::Default });
    }

    #[test]
    fn scenario_e_attribute_exists() {
        let flag = base_flag(json!(false));
        let config = base_config(
            true,
            "off",
            vec![Variant { key: "off".into(), value: json!(false) }, Variant { key: "on".into(), value: json!(true) }],
            vec![TargetingRule {
                conditions: vec![Condition { attribute: "email".into(), operator: Operator::Exists, value: Value::Null }],
                variant: "on".into(),
                rollout: None,
            }],
        );

        let ctx_with_email = EvaluationContext::new("u").with_attribute("email", "x@y");
        assert_eq!(
            evaluate(&flag, &config, &ctx_with_email),
            EvaluationResult { value: json!(true), variant: "on".into(), reason: EvaluationReason::RuleMatch }
        );

        let ctx_without_email = EvaluationContext::new("u");
        assert_eq!(
            evaluate(&flag, &config, &ctx_without_email),
            EvaluationResult { value: json!(false), variant: "off".into(), reason: EvaluationReason::Default }
        );
    }

    #[test]
    fn archived_flag_short_circuits_everything() {
        let mut flag = base_flag(json!("fallback"));
        flag.lifecycle_status = LifecycleStatus::Archived;
        let config = base_config(true, "on", vec![Variant { key: "on".into(), value: json!("whatever") }], vec![]);
        let ctx = EvaluationContext::new("u1");
        assert_eq!(
            evaluate(&flag, &config, &ctx),
            EvaluationResult { value: json!("fallback"), variant: String::new(), reason: EvaluationReason::Archived }
        );
    }

    #[test]
    fn rollout_is_a_sub_condition_not_a_post_match_filter() {
        // Conditions match but rollout excludes -> must NOT block the second rule.
        let flag = base_flag(json!("default-value"));
        let config = base_config(
            true,
            "default",
            vec![
                Variant { key: "default".into(), value: json!("default-value") },
                Variant { key: "first".into(), value: json!("first-value") },
                Variant { key: "second".into(), value: json!("second-value") },
            ],
            vec![
                TargetingRule {
                    conditions: vec![Condition { attribute: "always".into(), operator: Operator::Equals, value: json!(true) }],
                    variant: "first".into(),
                    rollout: Some(0),
                },
                TargetingRule {
                    conditions: vec![Condition { attribute: "always".into(), operator: Operator::Equals, value: json!(true) }],
                    variant: "second".into(),
                    rollout: None,
                },
            ],
        );
        let ctx = EvaluationContext::new("anyone").with_attribute("always", true);
        let result = evaluate(&flag, &config, &ctx);
        assert_eq!(result, EvaluationResult { value: json!("second-value"), variant: "second".into(), reason: EvaluationReason::RuleMatch });
    }

    #[test]
    fn missing_variant_reference_falls_back_to_flag_default_value() {
        let flag = base_flag(json!("fallback"));
        let config = base_config(
            true,
            "ghost-variant",
            vec![],
            vec![],
        );
        let ctx = EvaluationContext::new("u1");
        let result = evaluate(&flag, &config, &ctx);
        assert_eq!(result.value, json!("fallback"));
        assert_eq!(result.reason, EvaluationReason::Default);
    }

    #[test]
    fn determinism_same_inputs_same_result() {
        let flag = base_flag(json!(false));
        let config = base_config(
            true,
            "off",
            vec![Variant { key: "off".into(), value: json!(false) }, Variant { key: "on".into(), value: json!(true) }],
            vec![TargetingRule {
                conditions: vec![],
                variant: "on".into(),
                rollout: Some(50),
            }],
        );
        let ctx = EvaluationContext::new("stable-user");
        assert_eq!(evaluate(&flag, &config, &ctx), evaluate(&flag, &config, &ctx));
    }
}
