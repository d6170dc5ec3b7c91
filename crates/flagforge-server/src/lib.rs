//! Server-side pieces of the feature-flag service: a persistence port and
//! SQLite implementation, the in-memory flag cache, the change hub, the
//! mutation orchestrator, the staleness controller, the unknown-flag
//! recorder, SDK-key hashing, and layered configuration.
//!
//! Paired with `flagforge_core`, which owns the dependency-free data model
//! and evaluation engine this crate reads through.

pub mod cache;
pub mod config;
pub mod error;
pub mod evaluation_surface;
pub mod hub;
pub mod logging;
pub mod orchestrator;
pub mod repository;
pub mod sdk_auth;
pub mod staleness;
pub mod unknown_flags;

pub use cache::{CachedFlag, FlagCache};
pub use config::{load_config, load_config_with_file, ConfigError, DatabaseConfig, HttpConfig, LoggingConfig, ServerConfig, StalenessConfig};
pub use error::{FlagsServerError, Result};
pub use evaluation_surface::{evaluate_all, evaluate_single};
pub use hub::{ChangeHub, SubscriptionHandle, SUBSCRIBER_BUFFER};
pub use orchestrator::MutationOrchestrator;
pub use repository::{FlagsRepository, ProjectFlags, ScopedFlag, SqliteFlagsRepository};
pub use sdk_auth::{hash_sdk_key, verify_sdk_key};
pub use staleness::{Clock, StalenessController, SystemClock};
pub use unknown_flags::UnknownFlagRecorder;

pub use flagforge_core::*;

/// Run the embedded SQLite migrations against a freshly opened pool.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Open (and create if missing) a SQLite pool with WAL mode, following the
/// reference server crate's pool settings.
pub async fn create_pool(database_url: &str) -> Result<sqlx::SqlitePool> {
    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteSynchronous};
    use std::str::FromStr;

    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| FlagsServerError::Internal(format!("invalid database url: {e}")))?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .create_if_missing(true);

    let pool = SqlitePool::connect_with(options).await?;
    tracing::debug!("database pool created");
    Ok(pool)
}
