//! Staleness lifecycle controller: advances flags through
//! `active -> potentially_stale -> stale` on a fixed tick, using an
//! injectable clock so transitions are deterministic in tests.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, instrument};

use flagforge_core::{AuditEntry, EntityType, Flag, FlagPurpose, LifecycleStatus};

use crate::cache::FlagCache;
use crate::error::Result;
use crate::repository::FlagsRepository;

/// Default per-purpose lifetimes (days) when a project has no override.
/// `None` means permanent. Resolved as an Open Question (see DESIGN.md):
/// only `release`/`operational`/`kill-switch`/`permission` are named by
/// the test suite this controller must satisfy; `experiment` is decided
/// here as permanent, matching kill-switch/permission, since there is no
/// safe organization-wide default for an owner-time-boxed experiment.
pub fn default_lifetime_days(purpose: FlagPurpose) -> Option<u32> {
    match purpose {
        FlagPurpose::Release => Some(40),
        FlagPurpose::Operational => Some(7),
        FlagPurpose::Experiment => None,
        FlagPurpose::KillSwitch => None,
        FlagPurpose::Permission => None,
    }
}

/// Grace period between `potentially_stale` and `stale`: 14 days since
/// the transition into `potentially_stale`.
pub const POTENTIALLY_STALE_GRACE: Duration = Duration::days(14);

/// Injectable clock so the controller's tick logic is testable without
/// waiting on real time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub struct StalenessController {
    repo: Arc<dyn FlagsRepository>,
    cache: Arc<FlagCache>,
    clock: Arc<dyn Clock>,
}

impl StalenessController {
    pub fn new(repo: Arc<dyn FlagsRepository>, cache: Arc<FlagCache>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, cache, clock }
    }

    /// Run one sweep over every project's flags. A transition failure for
    /// one flag is logged and does not abort the sweep; if anything
    /// transitioned, the whole cache is reloaded once at the end.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> Result<()> {
        let now = self.clock.now();
        let projects = self.repo.load_all_projects_with_flags().await?;

        let mut any_transitioned = false;

        for project in &projects {
            for flag in &project.flags {
                let lifetime_days = project
                    .settings
                    .lifetime_for(flag.purpose)
                    .unwrap_or_else(|| default_lifetime_days(flag.purpose));

                let Some(lifetime_days) = lifetime_days else {
                    continue;
                };

                match self.next_status(flag, lifetime_days, now) {
                    Some(next) => {
                        if let Err(err) = self.apply_transition(flag, next, now).await {
                            error!(error = %err, flag_key = flag.key.as_str(), "staleness transition failed, continuing sweep");
                            continue;
                        }
                        any_transitioned = true;
                    }
                    None => continue,
                }
            }
        }

        if any_transitioned {
            self.cache.load_all(self.repo.as_ref()).await?;
        }

        Ok(())
    }

    /// Pure decision function: given a flag, its resolved lifetime, and
    /// `now`, what lifecycle status (if any) should it move to?
    fn next_status(&self, flag: &Flag, lifetime_days: u32, now: DateTime<Utc>) -> Option<LifecycleStatus> {
        match flag.lifecycle_status {
            LifecycleStatus::Active => {
                if now > flag.created_at + Duration::days(lifetime_days as i64) {
                    Some(LifecycleStatus::PotentiallyStale)
                } else {
                    None
                }
            }
            LifecycleStatus::PotentiallyStale => {
                let changed_at = flag.lifecycle_status_changed_at?;
                if now > changed_at + POTENTIALLY_STALE_GRACE {
                    Some(LifecycleStatus::Stale)
                } else {
                    None
                }
            }
            LifecycleStatus::Stale | LifecycleStatus::Archived => None,
        }
    }

    async fn apply_transition(&self, flag: &Flag, next: LifecycleStatus, now: DateTime<Utc>) -> Result<()> {
        let old = serde_json::to_value(flag)?;
        let mut updated = flag.clone();
        updated.transition_lifecycle(next, now);
        self.repo.update_flag(&updated).await?;

        let new = serde_json::to_value(&updated)?;
        let entry = AuditEntry::new(
            flag.project_id,
            None,
            AuditEntry::STALENESS_CHANGE_ACTION,
            EntityType::Flag,
            flag.id.to_string(),
            Some(old),
            Some(new),
            now,
        );
        self.repo.append_audit_entry(&entry).await?;

        info!(flag_key = flag.key.as_str(), from = %flag.lifecycle_status, to = %next, "flag lifecycle transitioned");
        Ok(())
    }
}

/// Helper used by tests (and available to callers needing the pure
/// per-flag lifetime resolution without the I/O) to compute per-flag
/// lifetimes from settings plus defaults.
pub fn resolve_lifetimes(
    settings: &flagforge_core::ProjectSettings,
    purposes: &[FlagPurpose],
) -> HashMap<FlagPurpose, Option<u32>> {
    purposes
        .iter()
        .map(|p| (*p, settings.lifetime_for(*p).unwrap_or_else(|| default_lifetime_days(*p))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flagforge_core::{FlagId, ProjectId, ValueType};
    use serde_json::json;

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn flag_with(purpose: FlagPurpose, lifecycle_status: LifecycleStatus, created_at: DateTime<Utc>, changed_at: Option<DateTime<Utc>>) -> Flag {
        Flag {
            id: FlagId::new(),
            project_id: ProjectId::new(),
            key: "release-flag".to_string(),
            name: "Release Flag".to_string(),
            description: None,
            value_type: ValueType::Boolean,
            purpose,
            default_value: json!(false),
            tags: vec![],
            lifecycle_status,
            lifecycle_status_changed_at: changed_at,
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn default_lifetimes_match_resolved_constants() {
        assert_eq!(default_lifetime_days(FlagPurpose::Release), Some(40));
        assert_eq!(default_lifetime_days(FlagPurpose::Operational), Some(7));
        assert_eq!(default_lifetime_days(FlagPurpose::KillSwitch), None);
        assert_eq!(default_lifetime_days(FlagPurpose::Permission), None);
        assert_eq!(default_lifetime_days(FlagPurpose::Experiment), None);
    }

    #[test]
    fn scenario_f_active_to_potentially_stale_then_stale() {
        let created_at = "2026-01-10T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let first_tick = "2026-03-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();

        let controller = StalenessController {
            repo: Arc::new(crate::repository::SqliteFlagsRepository::new(
                sqlx::sqlite::SqlitePoolOptions::new().min_connections(0).connect_lazy("sqlite::memory:").unwrap(),
            )),
            cache: Arc::new(FlagCache::empty()),
            clock: Arc::new(FixedClock(first_tick)),
        };

        let flag = flag_with(FlagPurpose::Release, LifecycleStatus::Active, created_at, None);
        let next = controller.next_status(&flag, 40, first_tick);
        assert_eq!(next, Some(LifecycleStatus::PotentiallyStale));

        let mut transitioned = flag.clone();
        transitioned.transition_lifecycle(LifecycleStatus::PotentiallyStale, first_tick);

        let too_soon = first_tick + Duration::days(10);
        assert_eq!(controller.next_status(&transitioned, 40, too_soon), None);

        let fifteen_days_later = first_tick + Duration::days(15);
        assert_eq!(controller.next_status(&transitioned, 40, fifteen_days_later), Some(LifecycleStatus::Stale));
    }

    #[test]
    fn stale_flags_never_advance() {
        let now = Utc::now();
        let flag = flag_with(FlagPurpose::Release, LifecycleStatus::Stale, now - Duration::days(1000), Some(now - Duration::days(100)));
        let controller = StalenessController {
            repo: Arc::new(crate::repository::SqliteFlagsRepository::new(
                sqlx::sqlite::SqlitePoolOptions::new().min_connections(0).connect_lazy("sqlite::memory:").unwrap(),
            )),
            cache: Arc::new(FlagCache::empty()),
            clock: Arc::new(FixedClock(now)),
        };
        assert_eq!(controller.next_status(&flag, 40, now), None);
    }

    #[test]
    fn permanent_purpose_is_skipped_via_none_lifetime() {
        assert_eq!(default_lifetime_days(FlagPurpose::KillSwitch), None);
    }
}
