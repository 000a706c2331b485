//! Token Verifier
//!
//! Validates presented bearer tokens against the token store. Verification is
//! read-only and takes `&self`, so any number of checks can run concurrently.

use std::sync::Arc;

use crate::core::{is_opaque_identifier, Clock, SystemClock};
use crate::error::{OAuth2Error, TokenError};
use crate::telemetry::{NoOpMetrics, TokenMetrics};
use crate::token::TokenStore;
use crate::types::{
    token_prefix, AccessToken, TokenEntity, VerifiedToken, DEFAULT_MAX_TOKEN_LENGTH,
};

#[cfg(feature = "jwt")]
use crate::token::assertion::{decode_assertion, KeyProvider};

/// Verifies opaque tokens and, when a key provider is set, bearer assertions.
pub struct TokenVerifier<S: TokenStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn TokenMetrics>,
    max_token_length: usize,
    #[cfg(feature = "jwt")]
    keys: Option<Arc<dyn KeyProvider>>,
}

impl<S: TokenStore> TokenVerifier<S> {
    /// Create new token verifier.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            metrics: Arc::new(NoOpMetrics),
            max_token_length: DEFAULT_MAX_TOKEN_LENGTH,
            #[cfg(feature = "jwt")]
            keys: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn TokenMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_max_token_length(mut self, max_token_length: usize) -> Self {
        self.max_token_length = max_token_length;
        self
    }

    /// Accept signed bearer assertions checked with these keys.
    #[cfg(feature = "jwt")]
    pub fn with_key_provider(mut self, keys: Arc<dyn KeyProvider>) -> Self {
        self.keys = Some(keys);
        self
    }

    /// Verify a presented token.
    ///
    /// Tokens containing a `.` are treated as bearer assertions; anything else
    /// is an opaque identifier.
    pub async fn verify(&self, presented: &str) -> Result<VerifiedToken, OAuth2Error> {
        let result = self.verify_presented(presented).await;

        match &result {
            Ok(verified) => {
                self.metrics.record_verification("valid");
                tracing::debug!(
                    access_token = token_prefix(&verified.token_id),
                    client_id = %verified.client_id,
                    "token verified"
                );
            }
            Err(OAuth2Error::Token(rejection)) => {
                self.metrics.record_verification(rejection_label(rejection));
                tracing::debug!(reason = rejection_label(rejection), "token rejected");
            }
            Err(e) => {
                self.metrics.record_verification("error");
                tracing::error!(error = %e, "token verification failed");
            }
        }

        result
    }

    /// Verify a token and require every scope in `required`.
    pub async fn verify_with_scopes(
        &self,
        presented: &str,
        required: &[&str],
    ) -> Result<VerifiedToken, OAuth2Error> {
        let verified = self.verify(presented).await?;
        if let Some(missing) = required.iter().find(|scope| !verified.has_scope(scope)) {
            return Err(OAuth2Error::Token(TokenError::InsufficientScope {
                scope: missing.to_string(),
            }));
        }
        Ok(verified)
    }

    async fn verify_presented(&self, presented: &str) -> Result<VerifiedToken, OAuth2Error> {
        check_shape(presented, self.max_token_length)?;

        if presented.contains('.') {
            return self.verify_assertion(presented).await;
        }
        if !is_opaque_identifier(presented) {
            return Err(malformed("token is not a base64url identifier"));
        }

        let record = self.lookup(presented).await?;
        if record.is_expired_at(self.clock.now()) {
            return Err(OAuth2Error::Token(TokenError::Expired));
        }
        Ok(VerifiedToken::from_entity(&record))
    }

    #[cfg(feature = "jwt")]
    async fn verify_assertion(&self, presented: &str) -> Result<VerifiedToken, OAuth2Error> {
        let keys = self.keys.as_ref().ok_or_else(|| {
            malformed("bearer assertions are not accepted by this verifier")
        })?;

        let key = keys.verification_key().await?;
        let claims = decode_assertion(presented, &key).map_err(|e| {
            if matches!(e, OAuth2Error::Token(TokenError::InvalidSignature)) {
                tracing::warn!(target: crate::telemetry::SECURITY_TARGET, "bearer assertion signature rejected");
            }
            e
        })?;

        // Time claims first: no store lookup for tokens that cannot be valid.
        let now = self.clock.now();
        if claims.nbf > now.timestamp() {
            return Err(OAuth2Error::Token(TokenError::NotYetValid));
        }
        if claims.exp < now.timestamp() {
            return Err(OAuth2Error::Token(TokenError::Expired));
        }

        let record = self.lookup(&claims.jti).await?;
        if record.client_id() != claims.aud || record.user_id() != claims.sub.as_deref() {
            tracing::warn!(
                target: crate::telemetry::SECURITY_TARGET,
                access_token = token_prefix(&claims.jti),
                "bearer assertion claims do not match the stored token"
            );
            return Err(malformed("assertion claims do not match the token record"));
        }
        if record.is_expired_at(now) {
            return Err(OAuth2Error::Token(TokenError::Expired));
        }
        Ok(VerifiedToken::from_entity(&record))
    }

    #[cfg(not(feature = "jwt"))]
    async fn verify_assertion(&self, _presented: &str) -> Result<VerifiedToken, OAuth2Error> {
        Err(malformed("bearer assertions are not supported"))
    }

    async fn lookup(&self, id: &str) -> Result<AccessToken, OAuth2Error> {
        self.store.get_access_token(id).await.map_err(|e| {
            if e.is_not_found() {
                OAuth2Error::Token(TokenError::NotFound)
            } else {
                e
            }
        })
    }
}

fn malformed(message: &str) -> OAuth2Error {
    OAuth2Error::Token(TokenError::Malformed {
        message: message.to_string(),
    })
}

fn check_shape(presented: &str, max_len: usize) -> Result<(), OAuth2Error> {
    if presented.is_empty() {
        return Err(malformed("empty token"));
    }
    if presented.len() > max_len {
        return Err(malformed("token too long"));
    }
    if presented
        .chars()
        .any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(malformed("token contains whitespace or control characters"));
    }
    Ok(())
}

/// Metric label for a rejection.
fn rejection_label(rejection: &TokenError) -> &'static str {
    match rejection {
        TokenError::NotFound => "not_found",
        TokenError::Expired => "expired",
        TokenError::NotYetValid => "not_yet_valid",
        TokenError::Malformed { .. } => "malformed",
        TokenError::InvalidSignature => "invalid_signature",
        TokenError::InsufficientScope { .. } => "insufficient_scope",
    }
}
