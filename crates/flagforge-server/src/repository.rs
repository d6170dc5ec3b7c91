//! Persistence port and its SQLite implementation.
//!
//! Row structs mirror the reference repository's convention: UUID primary
//! keys as TEXT, timestamps as RFC3339 TEXT, nested structures as JSON
//! TEXT columns, one `#[derive(sqlx::FromRow)]` struct per table plus a
//! `TryFrom` conversion into the domain type.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tracing::instrument;

use flagforge_core::{
    AuditEntry, EntityType, Environment, EnvironmentId, Flag, FlagEnvironmentConfig,
    FlagEnvironmentConfigId, FlagId, FlagPurpose, LifecycleStatus, Project, ProjectId,
    ProjectSettings, SdkKey, SdkKeyId, SdkKeyType, TargetingRule, UnknownFlagRecord,
    UnknownFlagRecordId, ValueType, Variant,
};

use crate::error::{FlagsServerError, Result};

/// One loaded (flag, config) pair plus the scope it belongs to, as returned
/// by the bulk cache-loading queries.
#[derive(Debug, Clone)]
pub struct ScopedFlag {
    pub project_key: String,
    pub environment_key: String,
    pub flag: Flag,
    pub config: FlagEnvironmentConfig,
}

/// A project's non-archived flags plus its lifetime overrides, as consumed
/// by the staleness controller's per-tick sweep.
#[derive(Debug, Clone)]
pub struct ProjectFlags {
    pub project: Project,
    pub settings: ProjectSettings,
    pub flags: Vec<Flag>,
}

#[async_trait]
pub trait FlagsRepository: Send + Sync {
    async fn create_project(&self, project: &Project) -> Result<()>;
    async fn get_project_by_key(&self, key: &str) -> Result<Option<Project>>;
    async fn list_projects(&self) -> Result<Vec<Project>>;
    async fn delete_project(&self, project_id: ProjectId) -> Result<()>;

    async fn create_environment(&self, environment: &Environment) -> Result<()>;
    async fn get_environment_by_key(&self, project_id: ProjectId, key: &str) -> Result<Option<Environment>>;
    async fn list_environments(&self, project_id: ProjectId) -> Result<Vec<Environment>>;

    async fn create_sdk_key(&self, key: &SdkKey) -> Result<()>;
    async fn list_sdk_keys(&self, environment_id: EnvironmentId) -> Result<Vec<SdkKey>>;
    async fn revoke_sdk_key(&self, id: SdkKeyId, now: DateTime<Utc>) -> Result<()>;
    async fn touch_sdk_key_last_used(&self, id: SdkKeyId, now: DateTime<Utc>) -> Result<()>;

    async fn create_flag(&self, flag: &Flag) -> Result<()>;
    async fn get_flag(&self, id: FlagId) -> Result<Option<Flag>>;
    async fn get_flag_by_key(&self, project_id: ProjectId, key: &str) -> Result<Option<Flag>>;
    async fn list_flags(&self, project_id: ProjectId, include_archived: bool) -> Result<Vec<Flag>>;
    async fn update_flag(&self, flag: &Flag) -> Result<()>;
    async fn delete_flag(&self, id: FlagId) -> Result<()>;

    async fn upsert_flag_environment_config(&self, config: &FlagEnvironmentConfig) -> Result<()>;
    async fn get_flag_environment_config(&self, flag_id: FlagId, environment_id: EnvironmentId) -> Result<Option<FlagEnvironmentConfig>>;

    async fn get_project_settings(&self, project_id: ProjectId) -> Result<ProjectSettings>;
    async fn upsert_project_settings(&self, project_id: ProjectId, settings: &ProjectSettings) -> Result<()>;

    async fn append_audit_entry(&self, entry: &AuditEntry) -> Result<()>;
    async fn list_audit_entries(&self, project_id: ProjectId, limit: i64) -> Result<Vec<AuditEntry>>;

    async fn upsert_unknown_flag_record(&self, record: &UnknownFlagRecord) -> Result<()>;
    async fn find_unknown_flag_record(&self, project_id: ProjectId, environment_id: EnvironmentId, flag_key: &str) -> Result<Option<UnknownFlagRecord>>;
    async fn list_unknown_flag_records(&self, project_id: ProjectId, environment_id: EnvironmentId) -> Result<Vec<UnknownFlagRecord>>;
    async fn delete_unknown_flag_records_for_key(&self, project_id: ProjectId, flag_key: &str) -> Result<()>;

    /// Bulk read for a full cache reload: every non-archived flag across
    /// every project/environment, joined with its config.
    async fn load_all_scoped_flags(&self) -> Result<Vec<ScopedFlag>>;

    /// Narrow read for a single-scope cache refresh: one (project, environment) scope.
    async fn load_scoped_flags(&self, project_key: &str, environment_key: &str) -> Result<Vec<ScopedFlag>>;

    /// Grouped-by-project read for the staleness controller's sweep.
    async fn load_all_projects_with_flags(&self) -> Result<Vec<ProjectFlags>>;
}

pub struct SqliteFlagsRepository {
    pool: SqlitePool,
}

impl SqliteFlagsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| FlagsServerError::Internal(format!("invalid timestamp {s:?}: {e}")))
}

#[derive(Debug, sqlx::FromRow)]
struct ProjectRow {
    id: String,
    key: String,
    name: String,
    created_at: String,
}

impl TryFrom<ProjectRow> for Project {
    type Error = FlagsServerError;

    fn try_from(row: ProjectRow) -> Result<Self> {
        Ok(Project {
            id: row.id.parse().map_err(|_| FlagsServerError::Internal("invalid project id".into()))?,
            key: row.key,
            name: row.name,
            created_at: parse_rfc3339(&row.created_at)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EnvironmentRow {
    id: String,
    project_id: String,
    key: String,
    name: String,
    created_at: String,
}

impl TryFrom<EnvironmentRow> for Environment {
    type Error = FlagsServerError;

    fn try_from(row: EnvironmentRow) -> Result<Self> {
        Ok(Environment {
            id: row.id.parse().map_err(|_| FlagsServerError::Internal("invalid environment id".into()))?,
            project_id: row.project_id.parse().map_err(|_| FlagsServerError::Internal("invalid project id".into()))?,
            key: row.key,
            name: row.name,
            created_at: parse_rfc3339(&row.created_at)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct FlagRow {
    id: String,
    project_id: String,
    key: String,
    name: String,
    description: Option<String>,
    value_type: String,
    purpose: String,
    default_value: String,
    tags: String,
    lifecycle_status: String,
    lifecycle_status_changed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<FlagRow> for Flag {
    type Error = FlagsServerError;

    fn try_from(row: FlagRow) -> Result<Self> {
        let value_type = match row.value_type.as_str() {
            "boolean" => ValueType::Boolean,
            "string" => ValueType::String,
            "number" => ValueType::Number,
            "json" => ValueType::Json,
            other => return Err(FlagsServerError::Internal(format!("invalid value_type {other:?}"))),
        };
        let purpose: FlagPurpose = row.purpose.parse().map_err(|e: &str| FlagsServerError::Internal(e.to_string()))?;
        let lifecycle_status: LifecycleStatus = row
            .lifecycle_status
            .parse()
            .map_err(|e: &str| FlagsServerError::Internal(e.to_string()))?;

        Ok(Flag {
            id: row.id.parse().map_err(|_| FlagsServerError::Internal("invalid flag id".into()))?,
            project_id: row.project_id.parse().map_err(|_| FlagsServerError::Internal("invalid project id".into()))?,
            key: row.key,
            name: row.name,
            description: row.description,
            value_type,
            purpose,
            default_value: serde_json::from_str(&row.default_value)?,
            tags: serde_json::from_str(&row.tags)?,
            lifecycle_status,
            lifecycle_status_changed_at: row.lifecycle_status_changed_at.map(|s| parse_rfc3339(&s)).transpose()?,
            created_at: parse_rfc3339(&row.created_at)?,
            updated_at: parse_rfc3339(&row.updated_at)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct FlagEnvironmentConfigRow {
    id: String,
    flag_id: String,
    environment_id: String,
    enabled: i64,
    default_variant: String,
    variants: String,
    targeting_rules: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<FlagEnvironmentConfigRow> for FlagEnvironmentConfig {
    type Error = FlagsServerError;

    fn try_from(row: FlagEnvironmentConfigRow) -> Result<Self> {
        let variants: Vec<Variant> = serde_json::from_str(&row.variants)?;
        let targeting_rules: Vec<TargetingRule> = serde_json::from_str(&row.targeting_rules)?;
        Ok(FlagEnvironmentConfig {
            id: row.id.parse().map_err(|_| FlagsServerError::Internal("invalid config id".into()))?,
            flag_id: row.flag_id.parse().map_err(|_| FlagsServerError::Internal("invalid flag id".into()))?,
            environment_id: row.environment_id.parse().map_err(|_| FlagsServerError::Internal("invalid environment id".into()))?,
            enabled: row.enabled != 0,
            default_variant: row.default_variant,
            variants,
            targeting_rules,
            created_at: parse_rfc3339(&row.created_at)?,
            updated_at: parse_rfc3339(&row.updated_at)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SdkKeyRow {
    id: String,
    environment_id: String,
    key_type: String,
    name: String,
    key_hash: String,
    created_at: String,
    last_used_at: Option<String>,
    revoked_at: Option<String>,
}

impl TryFrom<SdkKeyRow> for SdkKey {
    type Error = FlagsServerError;

    fn try_from(row: SdkKeyRow) -> Result<Self> {
        let key_type = match row.key_type.as_str() {
            "client" => SdkKeyType::ClientSide,
            "server" => SdkKeyType::ServerSide,
            other => return Err(FlagsServerError::Internal(format!("invalid key_type {other:?}"))),
        };
        Ok(SdkKey {
            id: row.id.parse().map_err(|_| FlagsServerError::Internal("invalid sdk key id".into()))?,
            environment_id: row.environment_id.parse().map_err(|_| FlagsServerError::Internal("invalid environment id".into()))?,
            key_type,
            name: row.name,
            key_hash: row.key_hash,
            created_at: parse_rfc3339(&row.created_at)?,
            last_used_at: row.last_used_at.map(|s| parse_rfc3339(&s)).transpose()?,
            revoked_at: row.revoked_at.map(|s| parse_rfc3339(&s)).transpose()?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AuditEntryRow {
    id: String,
    project_id: String,
    user_id: Option<String>,
    action: String,
    entity_type: String,
    entity_id: String,
    old_value: Option<String>,
    new_value: Option<String>,
    created_at: String,
}

impl TryFrom<AuditEntryRow> for AuditEntry {
    type Error = FlagsServerError;

    fn try_from(row: AuditEntryRow) -> Result<Self> {
        let entity_type = match row.entity_type.as_str() {
            "flag" => EntityType::Flag,
            "flag_environment_config" => EntityType::FlagEnvironmentConfig,
            "environment" => EntityType::Environment,
            "sdk_key" => EntityType::SdkKey,
            "project_settings" => EntityType::ProjectSettings,
            other => return Err(FlagsServerError::Internal(format!("invalid entity_type {other:?}"))),
        };
        Ok(AuditEntry {
            id: row.id.parse().map_err(|_| FlagsServerError::Internal("invalid audit entry id".into()))?,
            project_id: row.project_id.parse().map_err(|_| FlagsServerError::Internal("invalid project id".into()))?,
            user_id: row.user_id,
            action: row.action,
            entity_type,
            entity_id: row.entity_id,
            old_value: row.old_value.map(|s| serde_json::from_str(&s)).transpose()?,
            new_value: row.new_value.map(|s| serde_json::from_str(&s)).transpose()?,
            created_at: parse_rfc3339(&row.created_at)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UnknownFlagRecordRow {
    id: String,
    project_id: String,
    environment_id: String,
    flag_key: String,
    first_seen_at: String,
    last_seen_at: String,
    request_count: i64,
    dismissed_at: Option<String>,
}

impl TryFrom<UnknownFlagRecordRow> for UnknownFlagRecord {
    type Error = FlagsServerError;

    fn try_from(row: UnknownFlagRecordRow) -> Result<Self> {
        Ok(UnknownFlagRecord {
            id: row.id.parse().map_err(|_| FlagsServerError::Internal("invalid unknown flag record id".into()))?,
            project_id: row.project_id.parse().map_err(|_| FlagsServerError::Internal("invalid project id".into()))?,
            environment_id: row.environment_id.parse().map_err(|_| FlagsServerError::Internal("invalid environment id".into()))?,
            flag_key: row.flag_key,
            first_seen_at: parse_rfc3339(&row.first_seen_at)?,
            last_seen_at: parse_rfc3339(&row.last_seen_at)?,
            request_count: row.request_count as u64,
            dismissed_at: row.dismissed_at.map(|s| parse_rfc3339(&s)).transpose()?,
        })
    }
}

#[async_trait]
impl FlagsRepository for SqliteFlagsRepository {
    #[instrument(skip(self, project))]
    async fn create_project(&self, project: &Project) -> Result<()> {
        sqlx::query("INSERT INTO projects (id, key, name, created_at) VALUES (?, ?, ?, ?)")
            .bind(project.id.to_string())
            .bind(&project.key)
            .bind(&project.name)
            .bind(project.created_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_project_by_key(&self, key: &str) -> Result<Option<Project>> {
        let row = sqlx::query_as::<_, ProjectRow>("SELECT id, key, name, created_at FROM projects WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Project::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn list_projects(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query_as::<_, ProjectRow>("SELECT id, key, name, created_at FROM projects ORDER BY key")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Project::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn delete_project(&self, project_id: ProjectId) -> Result<()> {
        // Cascades are declared via ON DELETE CASCADE in the migration
        // schema; a single delete here is sufficient.
        sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(project_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, environment))]
    async fn create_environment(&self, environment: &Environment) -> Result<()> {
        sqlx::query("INSERT INTO environments (id, project_id, key, name, created_at) VALUES (?, ?, ?, ?, ?)")
            .bind(environment.id.to_string())
            .bind(environment.project_id.to_string())
            .bind(&environment.key)
            .bind(&environment.name)
            .bind(environment.created_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_environment_by_key(&self, project_id: ProjectId, key: &str) -> Result<Option<Environment>> {
        let row = sqlx::query_as::<_, EnvironmentRow>(
            "SELECT id, project_id, key, name, created_at FROM environments WHERE project_id = ? AND key = ?",
        )
        .bind(project_id.to_string())
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Environment::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn list_environments(&self, project_id: ProjectId) -> Result<Vec<Environment>> {
        let rows = sqlx::query_as::<_, EnvironmentRow>(
            "SELECT id, project_id, key, name, created_at FROM environments WHERE project_id = ? ORDER BY key",
        )
        .bind(project_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Environment::try_from).collect()
    }

    #[instrument(skip(self, key))]
    async fn create_sdk_key(&self, key: &SdkKey) -> Result<()> {
        sqlx::query(
            "INSERT INTO sdk_keys (id, environment_id, key_type, name, key_hash, created_at, last_used_at, revoked_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(key.id.to_string())
        .bind(key.environment_id.to_string())
        .bind(key.key_type.as_str())
        .bind(&key.name)
        .bind(&key.key_hash)
        .bind(key.created_at.to_rfc3339())
        .bind(key.last_used_at.map(|t| t.to_rfc3339()))
        .bind(key.revoked_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_sdk_keys(&self, environment_id: EnvironmentId) -> Result<Vec<SdkKey>> {
        let rows = sqlx::query_as::<_, SdkKeyRow>(
            "SELECT id, environment_id, key_type, name, key_hash, created_at, last_used_at, revoked_at \
             FROM sdk_keys WHERE environment_id = ?",
        )
        .bind(environment_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SdkKey::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn revoke_sdk_key(&self, id: SdkKeyId, now: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE sdk_keys SET revoked_at = ? WHERE id = ?")
            .bind(now.to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn touch_sdk_key_last_used(&self, id: SdkKeyId, now: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE sdk_keys SET last_used_at = ? WHERE id = ?")
            .bind(now.to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, flag))]
    async fn create_flag(&self, flag: &Flag) -> Result<()> {
        sqlx::query(
            "INSERT INTO flags (id, project_id, key, name, description, value_type, purpose, default_value, \
             tags, lifecycle_status, lifecycle_status_changed_at, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(flag.id.to_string())
        .bind(flag.project_id.to_string())
        .bind(&flag.key)
        .bind(&flag.name)
        .bind(&flag.description)
        .bind(flag.value_type.as_str())
        .bind(flag.purpose.to_string())
        .bind(serde_json::to_string(&flag.default_value)?)
        .bind(serde_json::to_string(&flag.tags)?)
        .bind(flag.lifecycle_status.to_string())
        .bind(flag.lifecycle_status_changed_at.map(|t| t.to_rfc3339()))
        .bind(flag.created_at.to_rfc3339())
        .bind(flag.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_flag(&self, id: FlagId) -> Result<Option<Flag>> {
        let row = sqlx::query_as::<_, FlagRow>(
            "SELECT id, project_id, key, name, description, value_type, purpose, default_value, tags, \
             lifecycle_status, lifecycle_status_changed_at, created_at, updated_at FROM flags WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Flag::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn get_flag_by_key(&self, project_id: ProjectId, key: &str) -> Result<Option<Flag>> {
        let row = sqlx::query_as::<_, FlagRow>(
            "SELECT id, project_id, key, name, description, value_type, purpose, default_value, tags, \
             lifecycle_status, lifecycle_status_changed_at, created_at, updated_at \
             FROM flags WHERE project_id = ? AND key = ?",
        )
        .bind(project_id.to_string())
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Flag::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn list_flags(&self, project_id: ProjectId, include_archived: bool) -> Result<Vec<Flag>> {
        let sql = if include_archived {
            "SELECT id, project_id, key, name, description, value_type, purpose, default_value, tags, \
             lifecycle_status, lifecycle_status_changed_at, created_at, updated_at FROM flags WHERE project_id = ? ORDER BY key"
        } else {
            "SELECT id, project_id, key, name, description, value_type, purpose, default_value, tags, \
             lifecycle_status, lifecycle_status_changed_at, created_at, updated_at \
             FROM flags WHERE project_id = ? AND lifecycle_status != 'archived' ORDER BY key"
        };
        let rows = sqlx::query_as::<_, FlagRow>(sql)
            .bind(project_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Flag::try_from).collect()
    }

    #[instrument(skip(self, flag))]
    async fn update_flag(&self, flag: &Flag) -> Result<()> {
        sqlx::query(
            "UPDATE flags SET name = ?, description = ?, value_type = ?, purpose = ?, default_value = ?, \
             tags = ?, lifecycle_status = ?, lifecycle_status_changed_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&flag.name)
        .bind(&flag.description)
        .bind(flag.value_type.as_str())
        .bind(flag.purpose.to_string())
        .bind(serde_json::to_string(&flag.default_value)?)
        .bind(serde_json::to_string(&flag.tags)?)
        .bind(flag.lifecycle_status.to_string())
        .bind(flag.lifecycle_status_changed_at.map(|t| t.to_rfc3339()))
        .bind(flag.updated_at.to_rfc3339())
        .bind(flag.id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_flag(&self, id: FlagId) -> Result<()> {
        sqlx::query("DELETE FROM flags WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, config))]
    async fn upsert_flag_environment_config(&self, config: &FlagEnvironmentConfig) -> Result<()> {
        sqlx::query(
            "INSERT INTO flag_environment_configs \
             (id, flag_id, environment_id, enabled, default_variant, variants, targeting_rules, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(flag_id, environment_id) DO UPDATE SET \
               enabled = excluded.enabled, \
               default_variant = excluded.default_variant, \
               variants = excluded.variants, \
               targeting_rules = excluded.targeting_rules, \
               updated_at = excluded.updated_at",
        )
        .bind(config.id.to_string())
        .bind(config.flag_id.to_string())
        .bind(config.environment_id.to_string())
        .bind(config.enabled)
        .bind(&config.default_variant)
        .bind(serde_json::to_string(&config.variants)?)
        .bind(serde_json::to_string(&config.targeting_rules)?)
        .bind(config.created_at.to_rfc3339())
        .bind(config.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_flag_environment_config(&self, flag_id: FlagId, environment_id: EnvironmentId) -> Result<Option<FlagEnvironmentConfig>> {
        let row = sqlx::query_as::<_, FlagEnvironmentConfigRow>(
            "SELECT id, flag_id, environment_id, enabled, default_variant, variants, targeting_rules, created_at, updated_at \
             FROM flag_environment_configs WHERE flag_id = ? AND environment_id = ?",
        )
        .bind(flag_id.to_string())
        .bind(environment_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(FlagEnvironmentConfig::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn get_project_settings(&self, project_id: ProjectId) -> Result<ProjectSettings> {
        let row = sqlx::query("SELECT lifetimes_days FROM project_settings WHERE project_id = ?")
            .bind(project_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let raw: String = row.try_get("lifetimes_days")?;
                let lifetimes_days: HashMap<String, Option<u32>> = serde_json::from_str(&raw)?;
                let mut settings = ProjectSettings::default();
                for (purpose, lifetime) in lifetimes_days {
                    if let Ok(purpose) = purpose.parse::<FlagPurpose>() {
                        settings.lifetimes_days.insert(purpose, lifetime);
                    }
                }
                Ok(settings)
            }
            None => Ok(ProjectSettings::default()),
        }
    }

    #[instrument(skip(self, settings))]
    async fn upsert_project_settings(&self, project_id: ProjectId, settings: &ProjectSettings) -> Result<()> {
        let as_strings: HashMap<String, Option<u32>> = settings
            .lifetimes_days
            .iter()
            .map(|(purpose, lifetime)| (purpose.to_string(), *lifetime))
            .collect();
        sqlx::query(
            "INSERT INTO project_settings (project_id, lifetimes_days) VALUES (?, ?) \
             ON CONFLICT(project_id) DO UPDATE SET lifetimes_days = excluded.lifetimes_days",
        )
        .bind(project_id.to_string())
        .bind(serde_json::to_string(&as_strings)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, entry))]
    async fn append_audit_entry(&self, entry: &AuditEntry) -> Result<()> {
        let entity_type = match entry.entity_type {
            EntityType::Flag => "flag",
            EntityType::FlagEnvironmentConfig => "flag_environment_config",
            EntityType::Environment => "environment",
            EntityType::SdkKey => "sdk_key",
            EntityType::ProjectSettings => "project_settings",
        };
        sqlx::query(
            "INSERT INTO audit_entries (id, project_id, user_id, action, entity_type, entity_id, old_value, new_value, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.id.to_string())
        .bind(entry.project_id.to_string())
        .bind(&entry.user_id)
        .bind(&entry.action)
        .bind(entity_type)
        .bind(&entry.entity_id)
        .bind(entry.old_value.as_ref().map(serde_json::to_string).transpose()?)
        .bind(entry.new_value.as_ref().map(serde_json::to_string).transpose()?)
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_audit_entries(&self, project_id: ProjectId, limit: i64) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query_as::<_, AuditEntryRow>(
            "SELECT id, project_id, user_id, action, entity_type, entity_id, old_value, new_value, created_at \
             FROM audit_entries WHERE project_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(project_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AuditEntry::try_from).collect()
    }

    #[instrument(skip(self, record))]
    async fn upsert_unknown_flag_record(&self, record: &UnknownFlagRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO unknown_flag_records \
             (id, project_id, environment_id, flag_key, first_seen_at, last_seen_at, request_count, dismissed_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(project_id, environment_id, flag_key) DO UPDATE SET \
               last_seen_at = excluded.last_seen_at, \
               request_count = excluded.request_count, \
               dismissed_at = excluded.dismissed_at",
        )
        .bind(record.id.to_string())
        .bind(record.project_id.to_string())
        .bind(record.environment_id.to_string())
        .bind(&record.flag_key)
        .bind(record.first_seen_at.to_rfc3339())
        .bind(record.last_seen_at.to_rfc3339())
        .bind(record.request_count as i64)
        .bind(record.dismissed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_unknown_flag_record(&self, project_id: ProjectId, environment_id: EnvironmentId, flag_key: &str) -> Result<Option<UnknownFlagRecord>> {
        let row = sqlx::query_as::<_, UnknownFlagRecordRow>(
            "SELECT id, project_id, environment_id, flag_key, first_seen_at, last_seen_at, request_count, dismissed_at \
             FROM unknown_flag_records WHERE project_id = ? AND environment_id = ? AND flag_key = ?",
        )
        .bind(project_id.to_string())
        .bind(environment_id.to_string())
        .bind(flag_key)
        .fetch_optional(&self.pool)
        .await?;
        row.map(UnknownFlagRecord::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn list_unknown_flag_records(&self, project_id: ProjectId, environment_id: EnvironmentId) -> Result<Vec<UnknownFlagRecord>> {
        let rows = sqlx::query_as::<_, UnknownFlagRecordRow>(
            "SELECT id, project_id, environment_id, flag_key, first_seen_at, last_seen_at, request_count, dismissed_at \
             FROM unknown_flag_records WHERE project_id = ? AND environment_id = ? AND dismissed_at IS NULL \
             ORDER BY last_seen_at DESC",
        )
        .bind(project_id.to_string())
        .bind(environment_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(UnknownFlagRecord::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn delete_unknown_flag_records_for_key(&self, project_id: ProjectId, flag_key: &str) -> Result<()> {
        sqlx::query("DELETE FROM unknown_flag_records WHERE project_id = ? AND flag_key = ?")
            .bind(project_id.to_string())
            .bind(flag_key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load_all_scoped_flags(&self) -> Result<Vec<ScopedFlag>> {
        let rows = sqlx::query(SCOPED_FLAGS_SELECT)
            .fetch_all(&self.pool)
            .await?;

        rows_to_scoped_flags(rows)
    }

    #[instrument(skip(self))]
    async fn load_scoped_flags(&self, project_key: &str, environment_key: &str) -> Result<Vec<ScopedFlag>> {
        let sql = format!("{SCOPED_FLAGS_SELECT} AND p.key = ? AND e.key = ?");
        let rows = sqlx::query(&sql)
            .bind(project_key)
            .bind(environment_key)
            .fetch_all(&self.pool)
            .await?;

        rows_to_scoped_flags(rows)
    }

    #[instrument(skip(self))]
    async fn load_all_projects_with_flags(&self) -> Result<Vec<ProjectFlags>> {
        let projects = self.list_projects().await?;
        let mut out = Vec::with_capacity(projects.len());
        for project in projects {
            let settings = self.get_project_settings(project.id).await?;
            let flags = self.list_flags(project.id, false).await?;
            out.push(ProjectFlags { project, settings, flags });
        }
        Ok(out)
    }
}

/// Column aliases avoid ambiguity between `flags` and `flag_environment_configs`
/// sharing `id`/`created_at`/`updated_at` names.
const SCOPED_FLAGS_SELECT: &str = "SELECT \
    p.key AS project_key, e.key AS environment_key, \
    f.id AS flag_id_col, f.project_id AS flag_project_id, f.key AS flag_key, f.name AS flag_name, \
    f.description AS flag_description, f.value_type AS flag_value_type, f.purpose AS flag_purpose, \
    f.default_value AS flag_default_value, f.tags AS flag_tags, f.lifecycle_status AS flag_lifecycle_status, \
    f.lifecycle_status_changed_at AS flag_lifecycle_status_changed_at, \
    f.created_at AS flag_created_at, f.updated_at AS flag_updated_at, \
    c.id AS config_id, c.flag_id AS config_flag_id, c.environment_id AS config_environment_id, \
    c.enabled AS config_enabled, c.default_variant AS config_default_variant, \
    c.variants AS config_variants, c.targeting_rules AS config_targeting_rules, \
    c.created_at AS config_created_at, c.updated_at AS config_updated_at \
    FROM flags f \
    JOIN projects p ON p.id = f.project_id \
    JOIN flag_environment_configs c ON c.flag_id = f.id \
    JOIN environments e ON e.id = c.environment_id \
    WHERE f.lifecycle_status != 'archived'";

fn rows_to_scoped_flags(rows: Vec<sqlx::sqlite::SqliteRow>) -> Result<Vec<ScopedFlag>> {
    rows.into_iter()
        .map(|row| {
            let project_key: String = row.try_get("project_key")?;
            let environment_key: String = row.try_get("environment_key")?;

            let flag = Flag::try_from(FlagRow {
                id: row.try_get("flag_id_col")?,
                project_id: row.try_get("flag_project_id")?,
                key: row.try_get("flag_key")?,
                name: row.try_get("flag_name")?,
                description: row.try_get("flag_description")?,
                value_type: row.try_get("flag_value_type")?,
                purpose: row.try_get("flag_purpose")?,
                default_value: row.try_get("flag_default_value")?,
                tags: row.try_get("flag_tags")?,
                lifecycle_status: row.try_get("flag_lifecycle_status")?,
                lifecycle_status_changed_at: row.try_get("flag_lifecycle_status_changed_at")?,
                created_at: row.try_get("flag_created_at")?,
                updated_at: row.try_get("flag_updated_at")?,
            })?;

            let config = FlagEnvironmentConfig::try_from(FlagEnvironmentConfigRow {
                id: row.try_get("config_id")?,
                flag_id: row.try_get("config_flag_id")?,
                environment_id: row.try_get("config_environment_id")?,
                enabled: row.try_get("config_enabled")?,
                default_variant: row.try_get("config_default_variant")?,
                variants: row.try_get("config_variants")?,
                targeting_rules: row.try_get("config_targeting_rules")?,
                created_at: row.try_get("config_created_at")?,
                updated_at: row.try_get("config_updated_at")?,
            })?;

            Ok(ScopedFlag { project_key, environment_key, flag, config })
        })
        .collect()
}
