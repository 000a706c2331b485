//! Token Service Error Types
//!
//! Error hierarchy for token storage, issuance, verification and revocation.

use thiserror::Error;

/// Root error type for the token service.
#[derive(Error, Debug)]
pub enum OAuth2Error {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Grant error: {0}")]
    Grant(#[from] GrantError),

    #[error("Signing error: {0}")]
    Signing(#[from] SigningError),
}

impl OAuth2Error {
    /// Get error code for telemetry.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "OAUTH2_CONFIG",
            Self::Storage(_) => "OAUTH2_STORAGE",
            Self::Token(_) => "OAUTH2_TOKEN",
            Self::Grant(_) => "OAUTH2_GRANT",
            Self::Signing(_) => "OAUTH2_SIGNING",
        }
    }

    /// RFC 6749 / RFC 6750 error code for a token endpoint or resource server response.
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::Grant(GrantError::InvalidScope { .. }) => "invalid_scope",
            Self::Grant(GrantError::InvalidGrant { .. }) => "invalid_grant",
            Self::Grant(GrantError::InvalidClient { .. }) => "invalid_client",
            Self::Token(TokenError::InsufficientScope { .. }) => "insufficient_scope",
            Self::Token(_) => "invalid_token",
            Self::Configuration(_) | Self::Storage(_) | Self::Signing(_) => "server_error",
        }
    }

    /// Whether the error reports an unknown identifier.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Storage(StorageError::NotFound { .. }) | Self::Token(TokenError::NotFound)
        )
    }
}

/// Configuration error.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },
}

/// Token store error.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Record not found: {id}")]
    NotFound { id: String },

    #[error("Identifier already exists: {id}")]
    Conflict { id: String },

    #[error("Owning access token does not exist: {access_token}")]
    MissingParent { access_token: String },

    #[error("Storage backend failure: {message}")]
    Backend { message: String },
}

/// Verification rejection of a presented token.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Token not found")]
    NotFound,

    #[error("Token expired")]
    Expired,

    #[error("Token not yet valid")]
    NotYetValid,

    #[error("Malformed token: {message}")]
    Malformed { message: String },

    #[error("Token signature is invalid")]
    InvalidSignature,

    #[error("Token lacks required scope: {scope}")]
    InsufficientScope { scope: String },
}

/// Grant-level error raised by the issuer and the revocation coordinator.
#[derive(Error, Debug)]
pub enum GrantError {
    #[error("Invalid scope: {scope}")]
    InvalidScope { scope: String },

    #[error("Invalid grant: {message}")]
    InvalidGrant { message: String },

    #[error("Invalid client: {client_id}")]
    InvalidClient { client_id: String },
}

/// Key material or signature production error.
#[derive(Error, Debug)]
pub enum SigningError {
    #[error("Invalid key material: {message}")]
    InvalidKey { message: String },

    #[error("Key unavailable: {message}")]
    KeyUnavailable { message: String },

    #[error("Failed to encode assertion: {message}")]
    EncodeFailed { message: String },
}

/// Result type for token service operations.
pub type OAuth2Result<T> = Result<T, OAuth2Error>;

/// Shorthand for a poisoned-lock backend failure.
pub(crate) fn lock_poisoned(what: &str) -> OAuth2Error {
    OAuth2Error::Storage(StorageError::Backend {
        message: format!("{} lock poisoned", what),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let error = OAuth2Error::Grant(GrantError::InvalidGrant {
            message: "refresh token reused".to_string(),
        });
        assert_eq!(error.error_code(), "OAUTH2_GRANT");
        assert_eq!(error.oauth_error_code(), "invalid_grant");

        let error = OAuth2Error::Storage(StorageError::Backend {
            message: "connection reset".to_string(),
        });
        assert_eq!(error.oauth_error_code(), "server_error");
    }

    #[test]
    fn test_rejections() {
        assert_eq!(
            OAuth2Error::Token(TokenError::Expired).oauth_error_code(),
            "invalid_token"
        );
        assert_eq!(
            OAuth2Error::Token(TokenError::InsufficientScope {
                scope: "admin".to_string()
            })
            .oauth_error_code(),
            "insufficient_scope"
        );
        assert_eq!(
            OAuth2Error::Grant(GrantError::InvalidScope {
                scope: "admin".to_string()
            })
            .oauth_error_code(),
            "invalid_scope"
        );
    }

    #[test]
    fn test_is_not_found() {
        assert!(OAuth2Error::Token(TokenError::NotFound).is_not_found());
        assert!(OAuth2Error::Storage(StorageError::NotFound {
            id: "abc".to_string()
        })
        .is_not_found());
        assert!(!OAuth2Error::Token(TokenError::Expired).is_not_found());
    }

    #[test]
    fn test_expired_is_distinct_from_not_found() {
        assert_ne!(TokenError::Expired, TokenError::NotFound);
        assert_ne!(
            TokenError::Expired.to_string(),
            TokenError::NotFound.to_string()
        );
    }
}
