//! AuditEntry: a record of one mutation or lifecycle transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{AuditEntryId, ProjectId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Flag,
    FlagEnvironmentConfig,
    Environment,
    SdkKey,
    ProjectSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditEntryId,
    pub project_id: ProjectId,
    pub user_id: Option<String>,
    pub action: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        project_id: ProjectId,
        user_id: Option<String>,
        action: impl Into<String>,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        old_value: Option<Value>,
        new_value: Option<Value>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AuditEntryId::new(),
            project_id,
            user_id,
            action: action.into(),
            entity_type,
            entity_id: entity_id.into(),
            old_value,
            new_value,
            created_at: now,
        }
    }

    /// The action name the staleness controller writes on every transition.
    pub const STALENESS_CHANGE_ACTION: &'static str = "staleness_change";
}
