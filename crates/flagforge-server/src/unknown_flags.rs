//! Unknown-flag recorder: upsert/dismiss/list/cleanup over the repository's
//! unknown-flag-record table.

use chrono::{DateTime, Utc};
use tracing::instrument;

use flagforge_core::{EnvironmentId, ProjectId, UnknownFlagRecord};

use crate::error::Result;
use crate::repository::FlagsRepository;
use std::sync::Arc;

pub struct UnknownFlagRecorder {
    repo: Arc<dyn FlagsRepository>,
}

impl UnknownFlagRecorder {
    pub fn new(repo: Arc<dyn FlagsRepository>) -> Self {
        Self { repo }
    }

    /// Upsert semantics: first observation inserts with count 1;
    /// re-observation increments the count, advances `last_seen_at`, and
    /// clears any prior dismissal.
    #[instrument(skip(self))]
    pub async fn observe(&self, project_id: ProjectId, environment_id: EnvironmentId, flag_key: &str, now: DateTime<Utc>) -> Result<()> {
        let record = match self.repo.find_unknown_flag_record(project_id, environment_id, flag_key).await? {
            Some(mut existing) => {
                existing.observe_again(now);
                existing
            }
            None => UnknownFlagRecord::first_observation(project_id, environment_id, flag_key, now),
        };
        self.repo.upsert_unknown_flag_record(&record).await
    }

    #[instrument(skip(self))]
    pub async fn dismiss(&self, project_id: ProjectId, environment_id: EnvironmentId, flag_key: &str, now: DateTime<Utc>) -> Result<()> {
        if let Some(mut record) = self.repo.find_unknown_flag_record(project_id, environment_id, flag_key).await? {
            record.dismiss(now);
            self.repo.upsert_unknown_flag_record(&record).await?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn list(&self, project_id: ProjectId, environment_id: EnvironmentId) -> Result<Vec<UnknownFlagRecord>> {
        self.repo.list_unknown_flag_records(project_id, environment_id).await
    }

    /// Called by the mutation orchestrator's step 6: creating a real flag
    /// with a previously-unknown key drops its records across all
    /// environments in the project.
    #[instrument(skip(self))]
    pub async fn clear_for_key(&self, project_id: ProjectId, flag_key: &str) -> Result<()> {
        self.repo.delete_unknown_flag_records_for_key(project_id, flag_key).await
    }
}
