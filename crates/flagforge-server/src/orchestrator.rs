//! Mutation orchestrator: validate -> persist -> audit -> cache refresh ->
//! hub publish -> unknown-flag cleanup, invoked by the management API
//! (sketched, not built here) on admin writes.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, instrument, warn};

use flagforge_core::{
    evaluate, AuditEntry, EntityType, EvaluationContext, Flag, FlagEnvironmentConfig,
    FlagStreamEvent, LifecycleStatus, ProjectId,
};

use crate::cache::FlagCache;
use crate::error::Result;
use crate::hub::ChangeHub;
use crate::repository::FlagsRepository;
use crate::unknown_flags::UnknownFlagRecorder;

pub struct MutationOrchestrator {
    repo: Arc<dyn FlagsRepository>,
    cache: Arc<FlagCache>,
    hub: Arc<ChangeHub>,
    unknown_flags: Arc<UnknownFlagRecorder>,
}

impl MutationOrchestrator {
    pub fn new(repo: Arc<dyn FlagsRepository>, cache: Arc<FlagCache>, hub: Arc<ChangeHub>, unknown_flags: Arc<UnknownFlagRecorder>) -> Self {
        Self { repo, cache, hub, unknown_flags }
    }

    /// Create a flag plus its first environment config. Both persistence
    /// writes must succeed before anything else happens; the audit, cache
    /// refresh, hub publish, and unknown-flag cleanup that follow are
    /// best-effort once persistence has committed.
    #[instrument(skip(self, flag, config))]
    pub async fn create_flag(&self, flag: Flag, config: FlagEnvironmentConfig, project_key: &str, environment_key: &str, actor_user_id: Option<String>) -> Result<()> {
        config.validate()?;

        self.repo.create_flag(&flag).await?;
        self.repo.upsert_flag_environment_config(&config).await?;

        self.after_commit(&flag, &[(&config, project_key, environment_key)], None, Some(&flag), actor_user_id).await;

        if let Err(err) = self.unknown_flags.clear_for_key(flag.project_id, &flag.key).await {
            warn!(error = %err, flag_key = flag.key.as_str(), "failed to clear unknown-flag records after flag creation");
        }

        Ok(())
    }

    /// Create or update a flag's config for one environment.
    #[instrument(skip(self, flag, config, old_config))]
    pub async fn create_or_update_config(
        &self,
        flag: &Flag,
        config: FlagEnvironmentConfig,
        old_config: Option<FlagEnvironmentConfig>,
        project_key: &str,
        environment_key: &str,
        actor_user_id: Option<String>,
    ) -> Result<()> {
        config.validate()?;

        self.repo.upsert_flag_environment_config(&config).await?;

        let old_json = old_config.as_ref().map(|c| serde_json::to_value(c)).transpose()?;
        let new_json = serde_json::to_value(&config)?;
        let action = if old_json.is_some() { "update_config" } else { "create_config" };
        self.write_audit(flag.project_id, actor_user_id.clone(), action, EntityType::FlagEnvironmentConfig, config.id.to_string(), old_json, Some(new_json)).await;

        self.refresh_and_publish(flag, &config, project_key, environment_key).await;
        Ok(())
    }

    /// Update a flag's metadata (name, description, tags) without touching
    /// lifecycle status, which `archive_flag`/`unarchive_flag` own instead.
    /// Refreshes and republishes every scope the flag is configured in,
    /// since the cached `Flag` half of each scope's entry is now stale.
    #[instrument(skip(self, flag, old))]
    pub async fn update_flag(&self, flag: Flag, old: Flag, scopes: &[(&FlagEnvironmentConfig, &str, &str)], actor_user_id: Option<String>) -> Result<()> {
        self.repo.update_flag(&flag).await?;

        let old_json = serde_json::to_value(&old)?;
        let new_json = serde_json::to_value(&flag)?;
        self.write_audit(flag.project_id, actor_user_id, "update_flag", EntityType::Flag, flag.id.to_string(), Some(old_json), Some(new_json)).await;

        for (config, project_key, environment_key) in scopes {
            self.refresh_and_publish(&flag, config, project_key, environment_key).await;
        }
        Ok(())
    }

    /// Archive a flag: transitions lifecycle, refreshes every environment
    /// scope it appears in, and publishes `flag_deleted` everywhere.
    #[instrument(skip(self, flag))]
    pub async fn archive_flag(&self, mut flag: Flag, scopes: &[(&str, &str)], actor_user_id: Option<String>) -> Result<()> {
        let old = serde_json::to_value(&flag)?;
        let now = Utc::now();
        flag.transition_lifecycle(LifecycleStatus::Archived, now);
        self.repo.update_flag(&flag).await?;

        let new = serde_json::to_value(&flag)?;
        self.write_audit(flag.project_id, actor_user_id, "archive", EntityType::Flag, flag.id.to_string(), Some(old), Some(new)).await;

        for (project_key, environment_key) in scopes {
            if let Err(err) = self.cache.refresh(self.repo.as_ref(), project_key, environment_key).await {
                error!(error = %err, project = *project_key, environment = *environment_key, "cache refresh failed after archive");
                continue;
            }
            self.hub.publish(project_key, environment_key, FlagStreamEvent::flag_deleted(&flag.key)).await;
        }
        Ok(())
    }

    /// Unarchive a flag back to `active`. Unlike `archive_flag`, the flag is
    /// live and evaluable again, so each scope gets a `flag_update` (not a
    /// `flag_deleted`) once its cache entry is refreshed.
    #[instrument(skip(self, flag))]
    pub async fn unarchive_flag(&self, mut flag: Flag, scopes: &[(&FlagEnvironmentConfig, &str, &str)], actor_user_id: Option<String>) -> Result<()> {
        let old = serde_json::to_value(&flag)?;
        let now = Utc::now();
        flag.transition_lifecycle(LifecycleStatus::Active, now);
        self.repo.update_flag(&flag).await?;

        let new = serde_json::to_value(&flag)?;
        self.write_audit(flag.project_id, actor_user_id, "unarchive", EntityType::Flag, flag.id.to_string(), Some(old), Some(new)).await;

        for (config, project_key, environment_key) in scopes {
            self.refresh_and_publish(&flag, config, project_key, environment_key).await;
        }
        Ok(())
    }

    /// Hard delete of a flag (distinct from archiving): persists the
    /// delete, then treats every scope the same as an archive for refresh
    /// and publish purposes.
    #[instrument(skip(self))]
    pub async fn delete_flag(&self, project_id: ProjectId, flag_key: String, flag_id: flagforge_core::FlagId, scopes: &[(&str, &str)], actor_user_id: Option<String>) -> Result<()> {
        self.repo.delete_flag(flag_id).await?;

        self.write_audit(project_id, actor_user_id, "delete", EntityType::Flag, flag_id.to_string(), None, None).await;

        for (project_key, environment_key) in scopes {
            if let Err(err) = self.cache.refresh(self.repo.as_ref(), project_key, environment_key).await {
                error!(error = %err, project = *project_key, environment = *environment_key, "cache refresh failed after delete");
                continue;
            }
            self.hub.publish(project_key, environment_key, FlagStreamEvent::flag_deleted(&flag_key)).await;
        }
        Ok(())
    }

    async fn after_commit(
        &self,
        flag: &Flag,
        configs: &[(&FlagEnvironmentConfig, &str, &str)],
        old_config: Option<&FlagEnvironmentConfig>,
        new_flag_for_audit: Option<&Flag>,
        actor_user_id: Option<String>,
    ) {
        if let Some(flag_for_audit) = new_flag_for_audit {
            let new_json = serde_json::to_value(flag_for_audit).ok();
            self.write_audit(flag.project_id, actor_user_id.clone(), "create", EntityType::Flag, flag.id.to_string(), None, new_json).await;
        }

        for (config, project_key, environment_key) in configs {
            let old_json = old_config.map(|c| serde_json::to_value(c)).transpose().ok().flatten();
            let new_json = serde_json::to_value(*config).ok();
            self.write_audit(flag.project_id, actor_user_id.clone(), "create_config", EntityType::FlagEnvironmentConfig, config.id.to_string(), old_json, new_json).await;

            self.refresh_and_publish(flag, config, project_key, environment_key).await;
        }
    }

    async fn refresh_and_publish(&self, flag: &Flag, config: &FlagEnvironmentConfig, project_key: &str, environment_key: &str) {
        if let Err(err) = self.cache.refresh(self.repo.as_ref(), project_key, environment_key).await {
            error!(error = %err, project = project_key, environment = environment_key, "cache refresh failed after mutation");
            return;
        }

        let result = evaluate(flag, config, &EvaluationContext::new(""));
        self.hub.publish(project_key, environment_key, FlagStreamEvent::flag_update(&flag.key, result.value, result.variant)).await;
    }

    async fn write_audit(
        &self,
        project_id: ProjectId,
        user_id: Option<String>,
        action: &str,
        entity_type: EntityType,
        entity_id: String,
        old_value: Option<serde_json::Value>,
        new_value: Option<serde_json::Value>,
    ) {
        let entry = AuditEntry::new(project_id, user_id, action, entity_type, entity_id, old_value, new_value, Utc::now());
        if let Err(err) = self.repo.append_audit_entry(&entry).await {
            error!(error = %err, action, "failed to append audit entry; persistence already committed");
        }
    }
}
