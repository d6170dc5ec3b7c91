//! SDK-key hashing and verification. Password hashing itself is named as
//! an out-of-scope external collaborator, but the hub/cache/orchestrator
//! need somewhere to verify a presented key against a stored hash, so this
//! mirrors the reference server crate's own thin wrapper over `argon2`.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::rngs::OsRng;

use crate::error::{FlagsServerError, Result};

pub fn hash_sdk_key(key: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    argon2
        .hash_password(key.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| FlagsServerError::Internal("failed to hash SDK key".to_string()))
}

pub fn verify_sdk_key(key: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|_| FlagsServerError::Internal("invalid SDK key hash format".to_string()))?;
    Ok(Argon2::default().verify_password(key.as_bytes(), &parsed_hash).is_ok())
}
