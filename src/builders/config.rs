//! Configuration Builder
//!
//! Fluent builder for token server configuration.

use std::time::Duration;

use crate::error::OAuth2Error;
use crate::types::TokenServerConfig;

/// Token server configuration builder.
#[derive(Default)]
pub struct TokenServerConfigBuilder {
    access_token_ttl: Option<Duration>,
    refresh_token_ttl: Option<Duration>,
    issuer: Option<String>,
    token_bytes: Option<usize>,
    revoke_family_on_reuse: bool,
    rotation_retention: Option<Duration>,
    max_token_length: Option<usize>,
}

impl TokenServerConfigBuilder {
    /// Create new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration, e.g. one read from the environment.
    pub fn from_config(config: TokenServerConfig) -> Self {
        Self {
            access_token_ttl: Some(config.access_token_ttl),
            refresh_token_ttl: Some(config.refresh_token_ttl),
            issuer: config.issuer,
            token_bytes: Some(config.token_bytes),
            revoke_family_on_reuse: config.revoke_family_on_reuse,
            rotation_retention: Some(config.rotation_retention),
            max_token_length: Some(config.max_token_length),
        }
    }

    /// Set default access token lifetime.
    pub fn access_token_ttl(mut self, ttl: Duration) -> Self {
        self.access_token_ttl = Some(ttl);
        self
    }

    /// Set refresh token lifetime.
    pub fn refresh_token_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_token_ttl = Some(ttl);
        self
    }

    /// Set `iss` claim for bearer assertions.
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Set random bytes per generated identifier.
    pub fn token_bytes(mut self, bytes: usize) -> Self {
        self.token_bytes = Some(bytes);
        self
    }

    /// Revoke the live pair of a token family when a rotated refresh token is replayed.
    pub fn revoke_family_on_reuse(mut self, enable: bool) -> Self {
        self.revoke_family_on_reuse = enable;
        self
    }

    /// Set how long rotation tombstones are retained.
    pub fn rotation_retention(mut self, retention: Duration) -> Self {
        self.rotation_retention = Some(retention);
        self
    }

    /// Set upper bound on presented token length.
    pub fn max_token_length(mut self, length: usize) -> Self {
        self.max_token_length = Some(length);
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<TokenServerConfig, OAuth2Error> {
        let defaults = TokenServerConfig::default();
        let refresh_token_ttl = self.refresh_token_ttl.unwrap_or(defaults.refresh_token_ttl);

        let config = TokenServerConfig {
            access_token_ttl: self.access_token_ttl.unwrap_or(defaults.access_token_ttl),
            refresh_token_ttl,
            issuer: self.issuer,
            token_bytes: self.token_bytes.unwrap_or(defaults.token_bytes),
            revoke_family_on_reuse: self.revoke_family_on_reuse,
            // tombstones must outlive the refresh tokens they stand for
            rotation_retention: self.rotation_retention.unwrap_or(refresh_token_ttl),
            max_token_length: self.max_token_length.unwrap_or(defaults.max_token_length),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Create a new configuration builder.
pub fn token_server_config() -> TokenServerConfigBuilder {
    TokenServerConfigBuilder::new()
}
