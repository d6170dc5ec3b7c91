//! Core types, hash bucketer, condition evaluator, and evaluation engine for
//! a self-hosted feature-flag service.
//!
//! This crate has no I/O and no async: it is the deterministic, thread-safe
//! heart of flag evaluation. A server consumes it by pairing `Flag` and
//! `FlagEnvironmentConfig` values (however it loads and caches them) and
//! calling [`evaluation::evaluate`].
//!
//! # Example
//!
//! ```
//! use flagforge_core::{evaluate, EvaluationContext};
//! use flagforge_core::flag::{Flag, FlagEnvironmentConfig, FlagPurpose, LifecycleStatus, ValueType, Variant};
//! use flagforge_core::ids::{EnvironmentId, FlagEnvironmentConfigId, FlagId, ProjectId};
//! use chrono::Utc;
//! use serde_json::json;
//!
//! let flag = Flag {
//!     id: FlagId::new(),
//!     project_id: ProjectId::new(),
//!     key: "checkout-v2".to_string(),
//!     name: "Checkout V2".to_string(),
//!     description: None,
//!     value_type: ValueType::Boolean,
//!     purpose: FlagPurpose::Release,
//!     default_value: json!(false),
//!     tags: vec![],
//!     lifecycle_status: LifecycleStatus::Active,
//!     lifecycle_status_changed_at: None,
//!     created_at: Utc::now(),
//!     updated_at: Utc::now(),
//! };
//! let config = FlagEnvironmentConfig {
//!     id: FlagEnvironmentConfigId::new(),
//!     flag_id: flag.id,
//!     environment_id: EnvironmentId::new(),
//!     enabled: true,
//!     default_variant: "off".to_string(),
//!     variants: vec![
//!         Variant { key: "off".to_string(), value: json!(false) },
//!         Variant { key: "on".to_string(), value: json!(true) },
//!     ],
//!     targeting_rules: vec![],
//!     created_at: Utc::now(),
//!     updated_at: Utc::now(),
//! };
//!
//! let result = evaluate(&flag, &config, &EvaluationContext::new("user-1"));
//! assert_eq!(result.variant, "off");
//! ```

pub mod audit;
pub mod bucketer;
pub mod condition;
pub mod environment;
pub mod error;
pub mod evaluation;
pub mod flag;
pub mod ids;
pub mod project;
pub mod sdk_key;
pub mod sse;
pub mod unknown_flag;

pub use audit::{AuditEntry, EntityType};
pub use bucketer::bucket;
pub use condition::{matches, matches_all, Condition, Operator};
pub use environment::{Environment, DEFAULT_ENVIRONMENTS};
pub use error::{FlagsError, Result};
pub use evaluation::{evaluate, EvaluationContext, EvaluationReason, EvaluationResult};
pub use flag::{Flag, FlagEnvironmentConfig, FlagPurpose, LifecycleStatus, TargetingRule, ValueType, Variant};
pub use ids::{
    AuditEntryId, EnvironmentId, FlagEnvironmentConfigId, FlagId, ProjectId, SdkKeyId,
    UnknownFlagRecordId,
};
pub use project::{Project, ProjectSettings};
pub use sdk_key::{generate_key as generate_sdk_key, parse_key_type as parse_sdk_key_type, SdkKey, SdkKeyType};
pub use sse::{FlagDeletedData, FlagStreamEvent, FlagUpdatedData, HeartbeatData};
pub use unknown_flag::UnknownFlagRecord;
