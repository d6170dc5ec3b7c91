use thiserror::Error;

/// Result alias for fallible construction/validation in the core crate.
pub type Result<T> = std::result::Result<T, FlagsError>;

/// Errors produced by pure construction and validation helpers.
///
/// Evaluation itself never returns this type — the evaluation engine never
/// throws; these are for the types that back it.
#[derive(Debug, Error)]
pub enum FlagsError {
    #[error("invalid key {0:?}: {1}")]
    InvalidKey(String, &'static str),

    #[error("rollout percentage {0} out of range [0, 100]")]
    RolloutOutOfRange(u32),

    #[error("duplicate variant key {0:?} in config")]
    DuplicateVariant(String),

    #[error("default variant {0:?} does not exist in config")]
    UnknownDefaultVariant(String),
}
