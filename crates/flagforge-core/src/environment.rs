//! Environment: a named deployment target within a Project.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{EnvironmentId, ProjectId};
use crate::project::validate_human_key;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub id: EnvironmentId,
    pub project_id: ProjectId,
    pub key: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Environment {
    pub fn validate_key(key: &str) -> bool {
        validate_human_key(key, 2, 50)
    }
}

/// Environments new projects are seeded with, mirroring the reference
/// crate's `DEFAULT_ENVIRONMENTS` convenience table.
pub const DEFAULT_ENVIRONMENTS: &[&str] = &["development", "staging", "production"];
