//! Token Types
//!
//! Access token, refresh token and rotation records as held by a token store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Capability contract shared by persisted token records.
///
/// Any storage technology maps its record type onto this interface; the
/// verifier and coordinator only depend on it.
pub trait TokenEntity {
    /// Opaque identifier.
    fn identifier(&self) -> &str;

    /// Client the token was issued to.
    fn client_id(&self) -> &str;

    /// Resource owner, if the grant had one.
    fn user_id(&self) -> Option<&str>;

    /// Associated scope identifiers.
    fn scopes(&self) -> &BTreeSet<String>;

    /// Expiry instant.
    fn expires_at(&self) -> DateTime<Utc>;

    /// Has the token expired at `now`?
    ///
    /// A token is still valid at the exact expiry instant.
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() < now
    }
}

/// Persisted access token record.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    token: String,
    client_id: String,
    user_id: Option<String>,
    scopes: BTreeSet<String>,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AccessToken {
    /// Create a new access token record. Expiry is fixed from here on.
    pub fn new(
        token: impl Into<String>,
        client_id: impl Into<String>,
        user_id: Option<String>,
        scopes: impl IntoIterator<Item = String>,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            token: token.into(),
            client_id: client_id.into(),
            user_id,
            scopes: scopes.into_iter().collect(),
            expires_at,
            created_at,
            updated_at: created_at,
        }
    }

    /// Creation instant.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last update instant.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Whether the token carries `scope`.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }

    /// Seconds left until expiry, zero once expired.
    pub fn expires_in(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }

    /// Space-delimited scope string (RFC 6749 §3.3).
    pub fn scope_string(&self) -> String {
        self.scopes.iter().cloned().collect::<Vec<_>>().join(" ")
    }
}

impl TokenEntity for AccessToken {
    fn identifier(&self) -> &str {
        &self.token
    }

    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    fn scopes(&self) -> &BTreeSet<String> {
        &self.scopes
    }

    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &token_prefix(&self.token))
            .field("client_id", &self.client_id)
            .field("user_id", &self.user_id)
            .field("scopes", &self.scopes)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Persisted refresh token record, owned one-to-one by an access token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshToken {
    token: String,
    access_token: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RefreshToken {
    /// Create a refresh token owned by `access_token`.
    pub fn new(
        token: impl Into<String>,
        access_token: impl Into<String>,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            token: token.into(),
            access_token: access_token.into(),
            expires_at,
            created_at,
            updated_at: created_at,
        }
    }

    /// Refresh token identifier.
    pub fn identifier(&self) -> &str {
        &self.token
    }

    /// Identifier of the owning access token.
    pub fn access_token_id(&self) -> &str {
        &self.access_token
    }

    /// Expiry instant.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Creation instant.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last update instant.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Has the refresh token expired at `now`?
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Seconds left until expiry, zero once expired.
    pub fn expires_in(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }
}

impl std::fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshToken")
            .field("token", &token_prefix(&self.token))
            .field("access_token", &token_prefix(&self.access_token))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Access token issued together with its refresh token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
}

impl TokenPair {
    /// Build a pair, checking the refresh token is owned by the access token.
    pub fn new(access_token: AccessToken, refresh_token: RefreshToken) -> Option<Self> {
        if refresh_token.access_token_id() != access_token.identifier() {
            return None;
        }
        Some(Self {
            access_token,
            refresh_token,
        })
    }
}

/// Tombstone kept after a refresh token has been rotated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationRecord {
    /// The consumed refresh token identifier.
    pub refresh_token: String,
    /// Access token of the pair that replaced it.
    pub successor_access_token: String,
    /// Refresh token of the pair that replaced it.
    pub successor_refresh_token: String,
    /// When the rotation happened.
    pub rotated_at: DateTime<Utc>,
}

/// Whose tokens to select for bulk revocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenOwner {
    Client(String),
    Subject(String),
}

/// Leading characters of a token identifier, safe to log.
pub fn token_prefix(token: &str) -> &str {
    match token.char_indices().nth(8) {
        Some((idx, _)) => &token[..idx],
        None => token,
    }
}
