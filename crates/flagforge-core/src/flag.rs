//! Flag, FlagEnvironmentConfig, Variant, TargetingRule.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::condition::Condition;
use crate::error::{FlagsError, Result};
use crate::ids::{EnvironmentId, FlagEnvironmentConfigId, FlagId, ProjectId};
use crate::project::validate_human_key;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Boolean,
    String,
    Number,
    Json,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Boolean => "boolean",
            ValueType::String => "string",
            ValueType::Number => "number",
            ValueType::Json => "json",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlagPurpose {
    Release,
    Experiment,
    Operational,
    KillSwitch,
    Permission,
}

impl fmt::Display for FlagPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlagPurpose::Release => "release",
            FlagPurpose::Experiment => "experiment",
            FlagPurpose::Operational => "operational",
            FlagPurpose::KillSwitch => "kill-switch",
            FlagPurpose::Permission => "permission",
        };
        write!(f, "{s}")
    }
}

impl FromStr for FlagPurpose {
    type Err = &'static str;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "release" => Ok(FlagPurpose::Release),
            "experiment" => Ok(FlagPurpose::Experiment),
            "operational" => Ok(FlagPurpose::Operational),
            "kill-switch" => Ok(FlagPurpose::KillSwitch),
            "permission" => Ok(FlagPurpose::Permission),
            _ => Err("unrecognized flag purpose"),
        }
    }
}

/// Coarse operational-age state. The enum is authoritative; a legacy
/// `archived` boolean (if ever encountered from older stored data) is
/// equivalent to `Archived` and is not otherwise represented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    Active,
    PotentiallyStale,
    Stale,
    Archived,
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleStatus::Active => "active",
            LifecycleStatus::PotentiallyStale => "potentially_stale",
            LifecycleStatus::Stale => "stale",
            LifecycleStatus::Archived => "archived",
        };
        write!(f, "{s}")
    }
}

impl FromStr for LifecycleStatus {
    type Err = &'static str;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(LifecycleStatus::Active),
            "potentially_stale" => Ok(LifecycleStatus::PotentiallyStale),
            "stale" => Ok(LifecycleStatus::Stale),
            "archived" => Ok(LifecycleStatus::Archived),
            _ => Err("unrecognized lifecycle status"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flag {
    pub id: FlagId,
    pub project_id: ProjectId,
    pub key: String,
    pub name: String,
    pub description: Option<String>,
    pub value_type: ValueType,
    pub purpose: FlagPurpose,
    pub default_value: Value,
    pub tags: Vec<String>,
    pub lifecycle_status: LifecycleStatus,
    pub lifecycle_status_changed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Flag {
    /// `2-100` chars, lowercase-start, `[a-z0-9_-]*`.
    pub fn validate_key(key: &str) -> bool {
        validate_human_key(key, 2, 100)
    }

    /// Derived from `lifecycle_status`; the enum remains the single source
    /// of truth (see DESIGN.md).
    pub fn is_archived(&self) -> bool {
        self.lifecycle_status == LifecycleStatus::Archived
    }

    /// Transition to a new lifecycle status, stamping `lifecycle_status_changed_at`.
    /// Every non-`active` status carries a non-null `lifecycle_status_changed_at`.
    pub fn transition_lifecycle(&mut self, status: LifecycleStatus, now: DateTime<Utc>) {
        self.lifecycle_status = status;
        self.lifecycle_status_changed_at = if status == LifecycleStatus::Active {
            None
        } else {
            Some(now)
        };
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetingRule {
    pub conditions: Vec<Condition>,
    pub variant: String,
    pub rollout: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagEnvironmentConfig {
    pub id: FlagEnvironmentConfigId,
    pub flag_id: FlagId,
    pub environment_id: EnvironmentId,
    pub enabled: bool,
    pub default_variant: String,
    pub variants: Vec<Variant>,
    pub targeting_rules: Vec<TargetingRule>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FlagEnvironmentConfig {
    pub fn find_variant(&self, key: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.key == key)
    }

    /// Validation required by the mutation orchestrator before persisting:
    /// variant keys unique, default variant exists, every rollout in range.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for variant in &self.variants {
            if !seen.insert(variant.key.as_str()) {
                return Err(FlagsError::DuplicateVariant(variant.key.clone()));
            }
        }

        if self.find_variant(&self.default_variant).is_none() {
            return Err(FlagsError::UnknownDefaultVariant(self.default_variant.clone()));
        }

        for rule in &self.targeting_rules {
            if let Some(p) = rule.rollout {
                if p > 100 {
                    return Err(FlagsError::RolloutOutOfRange(p));
                }
            }
        }

        Ok(())
    }
}
