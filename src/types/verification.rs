//! Verification and Response Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::token::{TokenEntity, TokenPair};

/// Outcome of a successful token verification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedToken {
    /// Access token identifier.
    pub token_id: String,
    /// Resource owner, if any.
    pub subject: Option<String>,
    /// Client the token was issued to.
    pub client_id: String,
    /// Granted scopes.
    pub scopes: BTreeSet<String>,
    /// Expiry instant.
    pub expires_at: DateTime<Utc>,
}

impl VerifiedToken {
    /// Build from a stored record.
    pub fn from_entity<T: TokenEntity>(entity: &T) -> Self {
        Self {
            token_id: entity.identifier().to_string(),
            subject: entity.user_id().map(String::from),
            client_id: entity.client_id().to_string(),
            scopes: entity.scopes().clone(),
            expires_at: entity.expires_at(),
        }
    }

    /// Whether the token carries `scope`.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }
}

/// Standard OAuth2 token endpoint response body (RFC 6749 §5.1).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Opaque token identifier or signed bearer assertion.
    pub access_token: String,
    /// Always "Bearer".
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    /// Refresh token identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Space-delimited granted scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Build a response for an issued pair using the opaque access token id.
    pub fn from_pair(pair: &TokenPair, now: DateTime<Utc>) -> Self {
        Self::with_access_token(pair, pair.access_token.identifier().to_string(), now)
    }

    /// Build a response carrying a caller-supplied access token value (e.g. an assertion).
    pub fn with_access_token(pair: &TokenPair, access_token: String, now: DateTime<Utc>) -> Self {
        let scope = pair.access_token.scope_string();
        Self {
            access_token,
            token_type: BEARER.to_string(),
            expires_in: pair.access_token.expires_in(now),
            refresh_token: Some(pair.refresh_token.identifier().to_string()),
            scope: if scope.is_empty() { None } else { Some(scope) },
        }
    }
}

/// Bearer token type.
pub const BEARER: &str = "Bearer";
