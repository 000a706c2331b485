//! Client and Scope Types
//!
//! Registered client identities and permission scopes.

use constant_time_eq::constant_time_eq;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Named permission unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    /// Scope identifier, immutable once referenced by an issued token.
    pub id: String,
    /// Human readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Scope {
    /// Create a scope without description.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: None,
        }
    }

    /// Attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// RFC 6749 §3.3 scope-token: `1*( %x21 / %x23-5B / %x5D-7E )`.
pub fn is_valid_scope_token(scope: &str) -> bool {
    !scope.is_empty()
        && scope
            .bytes()
            .all(|b| b == 0x21 || (0x23..=0x5B).contains(&b) || (0x5D..=0x7E).contains(&b))
}

/// Registered OAuth2 client.
#[derive(Clone, Serialize, Deserialize)]
pub struct Client {
    /// Client identifier.
    pub id: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// SHA-256 of the client secret; `None` for public clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    secret_hash: Option<Vec<u8>>,
    /// Scopes this client may request.
    pub allowed_scopes: BTreeSet<String>,
}

impl Client {
    /// Create a public client (no secret).
    pub fn public(id: impl Into<String>, allowed_scopes: impl IntoIterator<Item = String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            secret_hash: None,
            allowed_scopes: allowed_scopes.into_iter().collect(),
        }
    }

    /// Create a confidential client. Only a hash of the secret is kept.
    pub fn confidential(
        id: impl Into<String>,
        secret: &SecretString,
        allowed_scopes: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: None,
            secret_hash: Some(hash_secret(secret.expose_secret())),
            allowed_scopes: allowed_scopes.into_iter().collect(),
        }
    }

    /// Rebuild a client from a persisted secret hash.
    pub(crate) fn from_stored(
        id: String,
        name: Option<String>,
        secret_hash: Option<Vec<u8>>,
        allowed_scopes: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            id,
            name,
            secret_hash,
            allowed_scopes: allowed_scopes.into_iter().collect(),
        }
    }

    pub(crate) fn secret_hash(&self) -> Option<&[u8]> {
        self.secret_hash.as_deref()
    }

    /// Set display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Whether the client must authenticate with a secret.
    pub fn is_confidential(&self) -> bool {
        self.secret_hash.is_some()
    }

    /// Whether the client may request `scope`.
    pub fn allows_scope(&self, scope: &str) -> bool {
        self.allowed_scopes.contains(scope)
    }

    /// Check a presented secret.
    ///
    /// Public clients accept only an absent secret.
    pub fn verify_secret(&self, presented: Option<&str>) -> bool {
        match (&self.secret_hash, presented) {
            (None, None) => true,
            (None, Some(_)) | (Some(_), None) => false,
            (Some(expected), Some(secret)) => constant_time_eq(expected, &hash_secret(secret)),
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("name", &self.name)
            .field(
                "secret_hash",
                &self.secret_hash.as_ref().map(|_| "[REDACTED]"),
            )
            .field("allowed_scopes", &self.allowed_scopes)
            .finish()
    }
}

fn hash_secret(secret: &str) -> Vec<u8> {
    Sha256::digest(secret.as_bytes()).to_vec()
}
