use thiserror::Error;

pub type Result<T> = std::result::Result<T, FlagsServerError>;

/// Error taxonomy for the server crate: not-found, conflict, invalid, and
/// transient-I/O are modeled explicitly; auth is out of scope (handled by
/// the transport) and data-integrity anomalies are logged and degraded to
/// defaults rather than surfaced as this type.
#[derive(Debug, Error)]
pub enum FlagsServerError {
    #[error("not found")]
    NotFound,

    #[error("conflict on field {field}")]
    Conflict { field: String },

    #[error("invalid {field}: {message}")]
    Invalid { field: String, message: String },

    #[error("database error: {0}")]
    Io(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<flagforge_core::FlagsError> for FlagsServerError {
    fn from(err: flagforge_core::FlagsError) -> Self {
        FlagsServerError::Invalid { field: "config".to_string(), message: err.to_string() }
    }
}
