//! Configuration Types
//!
//! Token server configuration.

use std::time::Duration;

use crate::error::{ConfigurationError, OAuth2Error};

/// Token server configuration.
#[derive(Clone, Debug)]
pub struct TokenServerConfig {
    /// Default access token lifetime.
    pub access_token_ttl: Duration,
    /// Refresh token lifetime, independent of the access token TTL.
    pub refresh_token_ttl: Duration,
    /// `iss` claim for signed bearer assertions.
    pub issuer: Option<String>,
    /// Random bytes per generated identifier.
    pub token_bytes: usize,
    /// Revoke the successor pair when a rotated refresh token is replayed.
    pub revoke_family_on_reuse: bool,
    /// How long rotation tombstones are kept for reuse detection.
    pub rotation_retention: Duration,
    /// Upper bound on the length of a presented token.
    pub max_token_length: usize,
}

impl Default for TokenServerConfig {
    fn default() -> Self {
        Self {
            access_token_ttl: Duration::from_secs(DEFAULT_ACCESS_TOKEN_TTL_SECS),
            refresh_token_ttl: Duration::from_secs(DEFAULT_REFRESH_TOKEN_TTL_SECS),
            issuer: None,
            token_bytes: DEFAULT_TOKEN_BYTES,
            revoke_family_on_reuse: false,
            rotation_retention: Duration::from_secs(DEFAULT_REFRESH_TOKEN_TTL_SECS),
            max_token_length: DEFAULT_MAX_TOKEN_LENGTH,
        }
    }
}

impl TokenServerConfig {
    /// Read configuration from `OAUTH2_*` environment variables, falling back
    /// to defaults for anything unset.
    pub fn from_env() -> Result<Self, OAuth2Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, OAuth2Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let access_token_ttl = parse_secs(&lookup, ENV_ACCESS_TOKEN_TTL)?
            .unwrap_or(defaults.access_token_ttl);
        let refresh_token_ttl = parse_secs(&lookup, ENV_REFRESH_TOKEN_TTL)?
            .unwrap_or(defaults.refresh_token_ttl);
        let token_bytes = match lookup(ENV_TOKEN_BYTES) {
            Some(raw) => raw.trim().parse().map_err(|_| invalid(ENV_TOKEN_BYTES, &raw))?,
            None => defaults.token_bytes,
        };
        let revoke_family_on_reuse = match lookup(ENV_REVOKE_FAMILY_ON_REUSE) {
            Some(raw) => parse_bool(&raw).ok_or_else(|| invalid(ENV_REVOKE_FAMILY_ON_REUSE, &raw))?,
            None => defaults.revoke_family_on_reuse,
        };
        let issuer = lookup(ENV_ISSUER).filter(|s| !s.trim().is_empty());

        let config = Self {
            access_token_ttl,
            refresh_token_ttl,
            issuer,
            token_bytes,
            revoke_family_on_reuse,
            rotation_retention: refresh_token_ttl,
            max_token_length: defaults.max_token_length,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check invariants between fields.
    pub fn validate(&self) -> Result<(), OAuth2Error> {
        if self.access_token_ttl.is_zero() {
            return Err(invalid_config("access_token_ttl must be greater than zero"));
        }
        if self.refresh_token_ttl < self.access_token_ttl {
            return Err(invalid_config(
                "refresh_token_ttl must not be shorter than access_token_ttl",
            ));
        }
        if self.token_bytes < MIN_TOKEN_BYTES {
            return Err(invalid_config(&format!(
                "token_bytes must be at least {} ({} bits of entropy)",
                MIN_TOKEN_BYTES,
                MIN_TOKEN_BYTES * 8
            )));
        }
        if self.token_bytes > MAX_TOKEN_BYTES {
            return Err(invalid_config(&format!(
                "token_bytes must be at most {} ({} character identifiers)",
                MAX_TOKEN_BYTES,
                encoded_identifier_len(MAX_TOKEN_BYTES)
            )));
        }
        if self.max_token_length == 0 {
            return Err(invalid_config("max_token_length must be greater than zero"));
        }
        Ok(())
    }
}

fn parse_secs<F>(lookup: &F, key: &str) -> Result<Option<Duration>, OAuth2Error>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|_| invalid(key, &raw)),
        None => Ok(None),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Length of an unpadded base64url identifier for `bytes` random bytes.
pub fn encoded_identifier_len(bytes: usize) -> usize {
    (bytes * 4).div_ceil(3)
}

fn invalid(key: &str, raw: &str) -> OAuth2Error {
    invalid_config(&format!("{} has invalid value {:?}", key, raw))
}

fn invalid_config(message: &str) -> OAuth2Error {
    OAuth2Error::Configuration(ConfigurationError::InvalidConfig {
        message: message.to_string(),
    })
}

/// Default configuration values.
pub const DEFAULT_ACCESS_TOKEN_TTL_SECS: u64 = 3600;
pub const DEFAULT_REFRESH_TOKEN_TTL_SECS: u64 = 30 * 24 * 60 * 60;
pub const DEFAULT_TOKEN_BYTES: usize = 30;
pub const MIN_TOKEN_BYTES: usize = 20;
/// Largest entropy whose identifiers fit the 255 character token columns.
pub const MAX_TOKEN_BYTES: usize = 189;
pub const DEFAULT_MAX_TOKEN_LENGTH: usize = 4096;

/// Environment variable names.
pub const ENV_ACCESS_TOKEN_TTL: &str = "OAUTH2_ACCESS_TOKEN_TTL_SECS";
pub const ENV_REFRESH_TOKEN_TTL: &str = "OAUTH2_REFRESH_TOKEN_TTL_SECS";
pub const ENV_ISSUER: &str = "OAUTH2_ISSUER";
pub const ENV_TOKEN_BYTES: &str = "OAUTH2_TOKEN_BYTES";
pub const ENV_REVOKE_FAMILY_ON_REUSE: &str = "OAUTH2_REVOKE_FAMILY_ON_REUSE";
