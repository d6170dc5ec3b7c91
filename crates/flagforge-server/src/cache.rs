//! In-memory flag cache: a read-mostly snapshot fed by the persistence
//! port, swapped under a brief exclusive lock and never mutated in place.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use flagforge_core::{Flag, FlagEnvironmentConfig};

use crate::error::Result;
use crate::repository::FlagsRepository;

#[derive(Debug, Clone)]
pub struct CachedFlag {
    pub flag: Flag,
    pub config: FlagEnvironmentConfig,
}

type ScopeMap = HashMap<String, CachedFlag>;
type Snapshot = HashMap<(String, String), Arc<ScopeMap>>;

/// `Arc<RwLock<HashMap<...>>>` snapshot-swap cache: reads take the shared
/// lock only to clone an `Arc` out of the map, never to walk it; writes
/// build a fresh map off-lock and swap the whole thing (or one scope's
/// `Arc`) in under the exclusive lock.
pub struct FlagCache {
    snapshot: RwLock<Arc<Snapshot>>,
}

impl FlagCache {
    pub fn empty() -> Self {
        Self { snapshot: RwLock::new(Arc::new(HashMap::new())) }
    }

    /// Bulk reload from persistence; replaces the whole snapshot
    /// atomically. Excludes archived flags. A load failure propagates
    /// without touching the existing snapshot.
    #[instrument(skip(self, repo))]
    pub async fn load_all(&self, repo: &dyn FlagsRepository) -> Result<()> {
        let scoped = repo.load_all_scoped_flags().await?;

        let mut built: HashMap<(String, String), ScopeMap> = HashMap::new();
        for entry in scoped {
            built
                .entry((entry.project_key, entry.environment_key))
                .or_default()
                .insert(entry.flag.key.clone(), CachedFlag { flag: entry.flag, config: entry.config });
        }

        let new_snapshot: Snapshot = built.into_iter().map(|(scope, map)| (scope, Arc::new(map))).collect();
        let scope_count = new_snapshot.len();

        let mut guard = self.snapshot.write().await;
        *guard = Arc::new(new_snapshot);
        drop(guard);

        info!(scopes = scope_count, "flag cache reloaded");
        Ok(())
    }

    /// Re-read exactly one (project, environment) scope and swap only that
    /// scope's inner map, leaving every other scope's `Arc` untouched.
    #[instrument(skip(self, repo))]
    pub async fn refresh(&self, repo: &dyn FlagsRepository, project_key: &str, environment_key: &str) -> Result<()> {
        let scoped = repo.load_scoped_flags(project_key, environment_key).await?;

        let mut scope_map = ScopeMap::new();
        for entry in scoped {
            scope_map.insert(entry.flag.key.clone(), CachedFlag { flag: entry.flag, config: entry.config });
        }

        let key = (project_key.to_string(), environment_key.to_string());
        let mut guard = self.snapshot.write().await;
        let mut next = (**guard).clone();
        next.insert(key, Arc::new(scope_map));
        *guard = Arc::new(next);
        Ok(())
    }

    /// O(1) snapshot lookup of a whole scope.
    pub async fn get_flags(&self, project_key: &str, environment_key: &str) -> Option<Arc<ScopeMap>> {
        let guard = self.snapshot.read().await;
        guard.get(&(project_key.to_string(), environment_key.to_string())).cloned()
    }

    /// O(1) single lookup within a scope.
    pub async fn get_flag(&self, project_key: &str, environment_key: &str, flag_key: &str) -> Option<CachedFlag> {
        self.get_flags(project_key, environment_key).await.and_then(|scope| scope.get(flag_key).cloned())
    }

    /// Direct replacement used by tests and by the staleness controller's
    /// post-sweep reload path.
    pub async fn set(&self, project_key: &str, environment_key: &str, flags: HashMap<String, CachedFlag>) {
        let key = (project_key.to_string(), environment_key.to_string());
        let mut guard = self.snapshot.write().await;
        let mut next = (**guard).clone();
        next.insert(key, Arc::new(flags));
        *guard = Arc::new(next);
    }

    /// Runtime (non-startup) load failure handling: log and keep serving
    /// the existing snapshot.
    pub fn log_runtime_load_failure(err: &crate::error::FlagsServerError) {
        warn!(error = %err, "flag cache reload failed; continuing to serve the stale snapshot");
    }
}

impl Default for FlagCache {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use flagforge_core::{
        AuditEntry, Environment, EnvironmentId, FlagEnvironmentConfigId, FlagId, FlagPurpose,
        LifecycleStatus, Project, ProjectId, ProjectSettings, SdkKey, SdkKeyId, UnknownFlagRecord,
        ValueType, Variant,
    };
    use serde_json::json;
    use std::sync::Mutex;

    use crate::repository::{ProjectFlags, ScopedFlag};

    struct FakeRepo {
        scoped: Mutex<Vec<ScopedFlag>>,
    }

    fn sample_scoped(flag_key: &str, project_key: &str, env_key: &str) -> ScopedFlag {
        let flag = Flag {
            id: FlagId::new(),
            project_id: ProjectId::new(),
            key: flag_key.to_string(),
            name: flag_key.to_string(),
            description: None,
            value_type: ValueType::Boolean,
            purpose: FlagPurpose::Release,
            default_value: json!(false),
            tags: vec![],
            lifecycle_status: LifecycleStatus::Active,
            lifecycle_status_changed_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let config = FlagEnvironmentConfig {
            id: FlagEnvironmentConfigId::new(),
            flag_id: flag.id,
            environment_id: EnvironmentId::new(),
            enabled: true,
            default_variant: "off".to_string(),
            variants: vec![Variant { key: "off".to_string(), value: json!(false) }],
            targeting_rules: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        ScopedFlag { project_key: project_key.to_string(), environment_key: env_key.to_string(), flag, config }
    }

    #[async_trait]
    impl FlagsRepository for FakeRepo {
        async fn create_project(&self, _: &Project) -> Result<()> { Ok(()) }
        async fn get_project_by_key(&self, _: &str) -> Result<Option<Project>> { Ok(None) }
        async fn list_projects(&self) -> Result<Vec<Project>> { Ok(vec![]) }
        async fn delete_project(&self, _: ProjectId) -> Result<()> { Ok(()) }
        async fn create_environment(&self, _: &Environment) -> Result<()> { Ok(()) }
        async fn get_environment_by_key(&self, _: ProjectId, _: &str) -> Result<Option<Environment>> { Ok(None) }
        async fn list_environments(&self, _: ProjectId) -> Result<Vec<Environment>> { Ok(vec![]) }
        async fn create_sdk_key(&self, _: &SdkKey) -> Result<()> { Ok(()) }
        async fn list_sdk_keys(&self, _: EnvironmentId) -> Result<Vec<SdkKey>> { Ok(vec![]) }
        async fn revoke_sdk_key(&self, _: SdkKeyId, _: chrono::DateTime<Utc>) -> Result<()> { Ok(()) }
        async fn touch_sdk_key_last_used(&self, _: SdkKeyId, _: chrono::DateTime<Utc>) -> Result<()> { Ok(()) }
        async fn create_flag(&self, _: &Flag) -> Result<()> { Ok(()) }
        async fn get_flag(&self, _: FlagId) -> Result<Option<Flag>> { Ok(None) }
        async fn get_flag_by_key(&self, _: ProjectId, _: &str) -> Result<Option<Flag>> { Ok(None) }
        async fn list_flags(&self, _: ProjectId, _: bool) -> Result<Vec<Flag>> { Ok(vec![]) }
        async fn update_flag(&self, _: &Flag) -> Result<()> { Ok(()) }
        async fn delete_flag(&self, _: FlagId) -> Result<()> { Ok(()) }
        async fn upsert_flag_environment_config(&self, _: &FlagEnvironmentConfig) -> Result<()> { Ok(()) }
        async fn get_flag_environment_config(&self, _: FlagId, _: EnvironmentId) -> Result<Option<FlagEnvironmentConfig>> { Ok(None) }
        async fn get_project_settings(&self, _: ProjectId) -> Result<ProjectSettings> { Ok(ProjectSettings::default()) }
        async fn upsert_project_settings(&self, _: ProjectId, _: &ProjectSettings) -> Result<()> { Ok(()) }
        async fn append_audit_entry(&self, _: &AuditEntry) -> Result<()> { Ok(()) }
        async fn list_audit_entries(&self, _: ProjectId, _: i64) -> Result<Vec<AuditEntry>> { Ok(vec![]) }
        async fn upsert_unknown_flag_record(&self, _: &UnknownFlagRecord) -> Result<()> { Ok(()) }
        async fn find_unknown_flag_record(&self, _: ProjectId, _: EnvironmentId, _: &str) -> Result<Option<UnknownFlagRecord>> { Ok(None) }
        async fn list_unknown_flag_records(&self, _: ProjectId, _: EnvironmentId) -> Result<Vec<UnknownFlagRecord>> { Ok(vec![]) }
        async fn delete_unknown_flag_records_for_key(&self, _: ProjectId, _: &str) -> Result<()> { Ok(()) }

        async fn load_all_scoped_flags(&self) -> Result<Vec<ScopedFlag>> {
            Ok(self.scoped.lock().unwrap().clone())
        }

        async fn load_scoped_flags(&self, project_key: &str, environment_key: &str) -> Result<Vec<ScopedFlag>> {
            Ok(self
                .scoped
                .lock()
                .unwrap()
                .iter()
                .filter(|s| s.project_key == project_key && s.environment_key == environment_key)
                .cloned()
                .collect())
        }

        async fn load_all_projects_with_flags(&self) -> Result<Vec<ProjectFlags>> { Ok(vec![]) }
    }

    #[tokio::test]
    async fn load_all_populates_scopes() {
        let repo = FakeRepo { scoped: Mutex::new(vec![sample_scoped("f1", "acme", "prod")]) };
        let cache = FlagCache::empty();
        cache.load_all(&repo).await.unwrap();

        let scope = cache.get_flags("acme", "prod").await.unwrap();
        assert!(scope.contains_key("f1"));
        assert!(cache.get_flags("acme", "staging").await.is_none());
    }

    #[tokio::test]
    async fn refresh_only_touches_its_own_scope() {
        let repo = FakeRepo {
            scoped: Mutex::new(vec![sample_scoped("f1", "acme", "prod"), sample_scoped("f2", "acme", "staging")]),
        };
        let cache = FlagCache::empty();
        cache.load_all(&repo).await.unwrap();

        {
            let mut guard = repo.scoped.lock().unwrap();
            guard.push(sample_scoped("f1b", "acme", "prod"));
        }
        cache.refresh(&repo, "acme", "prod").await.unwrap();

        let prod = cache.get_flags("acme", "prod").await.unwrap();
        assert_eq!(prod.len(), 2);
        let staging = cache.get_flags("acme", "staging").await.unwrap();
        assert_eq!(staging.len(), 1);
    }

    #[tokio::test]
    async fn get_flag_is_none_for_missing_key() {
        let cache = FlagCache::empty();
        assert!(cache.get_flag("acme", "prod", "nope").await.is_none());
    }

    #[tokio::test]
    async fn set_replaces_one_scope_directly() {
        let cache = FlagCache::empty();
        let scoped = sample_scoped("f1", "acme", "prod");
        let mut map = HashMap::new();
        map.insert(scoped.flag.key.clone(), CachedFlag { flag: scoped.flag, config: scoped.config });
        cache.set("acme", "prod", map).await;

        assert!(cache.get_flag("acme", "prod", "f1").await.is_some());
    }
}
