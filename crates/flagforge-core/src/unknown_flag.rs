//! UnknownFlagRecord: tracking of client requests for absent flag keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{EnvironmentId, ProjectId, UnknownFlagRecordId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnknownFlagRecord {
    pub id: UnknownFlagRecordId,
    pub project_id: ProjectId,
    pub environment_id: EnvironmentId,
    pub flag_key: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub request_count: u64,
    pub dismissed_at: Option<DateTime<Utc>>,
}

impl UnknownFlagRecord {
    pub fn first_observation(
        project_id: ProjectId,
        environment_id: EnvironmentId,
        flag_key: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: UnknownFlagRecordId::new(),
            project_id,
            environment_id,
            flag_key: flag_key.into(),
            first_seen_at: now,
            last_seen_at: now,
            request_count: 1,
            dismissed_at: None,
        }
    }

    /// Re-observation upsert: increments the count, advances `last_seen_at`,
    /// and clears any prior dismissal — a dismissal is only effective until
    /// the key is observed again.
    pub fn observe_again(&mut self, now: DateTime<Utc>) {
        self.request_count += 1;
        self.last_seen_at = now;
        self.dismissed_at = None;
    }

    pub fn dismiss(&mut self, now: DateTime<Utc>) {
        self.dismissed_at = Some(now);
    }

    pub fn is_dismissed(&self) -> bool {
        self.dismissed_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_observation_sets_count_one() {
        let now = Utc::now();
        let record = UnknownFlagRecord::first_observation(ProjectId::new(), EnvironmentId::new(), "ghost-flag", now);
        assert_eq!(record.request_count, 1);
        assert_eq!(record.first_seen_at, now);
        assert_eq!(record.last_seen_at, now);
        assert!(!record.is_dismissed());
    }

    #[test]
    fn observe_again_increments_and_clears_dismissal() {
        let t0 = Utc::now();
        let mut record = UnknownFlagRecord::first_observation(ProjectId::new(), EnvironmentId::new(), "ghost-flag", t0);
        record.dismiss(t0);
        assert!(record.is_dismissed());

        let t1 = t0 + chrono::Duration::hours(1);
        record.observe_again(t1);
        assert_eq!(record.request_count, 2);
        assert_eq!(record.last_seen_at, t1);
        assert!(!record.is_dismissed());
    }
}
