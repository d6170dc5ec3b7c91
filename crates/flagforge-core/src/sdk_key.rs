//! SDKKey: an opaque bearer credential bound to exactly one Environment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{EnvironmentId, SdkKeyId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SdkKeyType {
    /// Exposed to browsers/mobile clients; read-only evaluation scope.
    ClientSide,
    /// Used by backend services; same evaluation scope, distinct prefix
    /// only to aid operators auditing which keys are safe to expose.
    ServerSide,
}

impl SdkKeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SdkKeyType::ClientSide => "client",
            SdkKeyType::ServerSide => "server",
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            SdkKeyType::ClientSide => "ffc",
            SdkKeyType::ServerSide => "ffs",
        }
    }
}

/// An SDK key record as stored; `key_hash` is the argon2 hash of the secret,
/// never the secret itself (hashing lives in `flagforge_server::sdk_auth`,
/// out of this crate's scope since it requires a randomized salt source).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdkKey {
    pub id: SdkKeyId,
    pub environment_id: EnvironmentId,
    pub key_type: SdkKeyType,
    pub name: String,
    pub key_hash: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl SdkKey {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

/// Generate a new bearer secret of the form `<prefix>_<random-hex>`.
///
/// Returns the plaintext secret; callers are responsible for hashing it
/// before persisting (see `flagforge_server::sdk_auth::hash_sdk_key`) — this
/// crate never touches plaintext key material once generated.
pub fn generate_key(key_type: SdkKeyType, random_hex: &str) -> String {
    format!("{}_{}", key_type.prefix(), random_hex)
}

/// Recover the `SdkKeyType` encoded in a key's prefix, for routing a
/// presented credential to the right verification path before the
/// hash comparison itself.
pub fn parse_key_type(key: &str) -> Option<SdkKeyType> {
    if key.starts_with("ffc_") {
        Some(SdkKeyType::ClientSide)
    } else if key.starts_with("ffs_") {
        Some(SdkKeyType::ServerSide)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_and_parse_prefix_roundtrip() {
        let key = generate_key(SdkKeyType::ClientSide, "deadbeef");
        assert_eq!(key, "ffc_deadbeef");
        assert_eq!(parse_key_type(&key), Some(SdkKeyType::ClientSide));

        let key = generate_key(SdkKeyType::ServerSide, "deadbeef");
        assert_eq!(parse_key_type(&key), Some(SdkKeyType::ServerSide));
    }

    #[test]
    fn parse_key_type_rejects_unknown_prefix() {
        assert_eq!(parse_key_type("bogus_123"), None);
    }
}
