//! Project: a tenant namespace owning environments, flags, and settings.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::flag::FlagPurpose;
use crate::ids::ProjectId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub key: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Project {
    /// `2-64` chars, lowercase-start, `[a-z0-9_-]*` — mirrors the
    /// environment/flag key validators so all human keys share one shape.
    pub fn validate_key(key: &str) -> bool {
        validate_human_key(key, 2, 64)
    }
}

/// Per-purpose lifetime overrides, in days; `None` means permanent.
///
/// Unset purposes fall back to the engine's built-in defaults (see
/// `flagforge_server::staleness::DEFAULT_LIFETIMES_DAYS`), which this crate
/// does not itself define since they're a controller-level policy, not a
/// core data-model constant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSettings {
    pub lifetimes_days: HashMap<FlagPurpose, Option<u32>>,
}

impl ProjectSettings {
    pub fn lifetime_for(&self, purpose: FlagPurpose) -> Option<Option<u32>> {
        self.lifetimes_days.get(&purpose).copied()
    }
}

pub(crate) fn validate_human_key(key: &str, min: usize, max: usize) -> bool {
    if key.len() < min || key.len() > max {
        return false;
    }
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_keys() {
        assert!(Project::validate_key("acme"));
        assert!(Project::validate_key("acme-corp_1"));
    }

    #[test]
    fn invalid_keys() {
        assert!(!Project::validate_key("A"));
        assert!(!Project::validate_key("1acme"));
        assert!(!Project::validate_key(""));
        assert!(!Project::validate_key("ab cd"));
    }
}
