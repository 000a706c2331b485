//! Token Issuer
//!
//! Creates access/refresh token pairs for authenticated clients.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::core::{to_chrono, Clock, RandomTokenIdGenerator, SystemClock, TokenIdGenerator};
use crate::error::{ConfigurationError, GrantError, OAuth2Error};
use crate::registry::{authenticate_client, validate_scopes, ClientRegistry, ScopeRegistry};
use crate::telemetry::{NoOpMetrics, TokenMetrics};
use crate::token::TokenStore;
use crate::types::{
    token_prefix, AccessToken, Client, RefreshToken, TokenEntity, TokenPair, TokenServerConfig,
};

#[cfg(feature = "jwt")]
use crate::token::assertion::{encode_assertion, AssertionClaims, KeyProvider};

/// Issues token pairs and persists them through a [`TokenStore`].
pub struct TokenIssuer<S: TokenStore> {
    config: TokenServerConfig,
    store: Arc<S>,
    clients: Arc<dyn ClientRegistry>,
    scopes: Arc<dyn ScopeRegistry>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn TokenIdGenerator>,
    metrics: Arc<dyn TokenMetrics>,
    #[cfg(feature = "jwt")]
    keys: Option<Arc<dyn KeyProvider>>,
}

impl<S: TokenStore> TokenIssuer<S> {
    /// Create new token issuer. The configuration is validated here.
    pub fn new(
        config: TokenServerConfig,
        store: Arc<S>,
        clients: Arc<dyn ClientRegistry>,
        scopes: Arc<dyn ScopeRegistry>,
    ) -> Result<Self, OAuth2Error> {
        config.validate()?;
        let ids = Arc::new(RandomTokenIdGenerator::with_bytes(config.token_bytes));
        Ok(Self {
            config,
            store,
            clients,
            scopes,
            clock: Arc::new(SystemClock),
            ids,
            metrics: Arc::new(NoOpMetrics),
            #[cfg(feature = "jwt")]
            keys: None,
        })
    }

    /// Use a different time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use a different identifier generator.
    pub fn with_id_generator(mut self, ids: Arc<dyn TokenIdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Record metrics.
    pub fn with_metrics(mut self, metrics: Arc<dyn TokenMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Enable signed bearer assertions.
    #[cfg(feature = "jwt")]
    pub fn with_key_provider(mut self, keys: Arc<dyn KeyProvider>) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn config(&self) -> &TokenServerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn metrics(&self) -> &Arc<dyn TokenMetrics> {
        &self.metrics
    }

    /// Issue and persist a token pair for an already authenticated client.
    ///
    /// Every requested scope must be registered and allowed for the client;
    /// otherwise `InvalidScope` names the first offender and nothing is stored.
    /// Unregistered scopes are reported before disallowed ones.
    pub async fn issue(
        &self,
        client: &Client,
        subject: Option<&str>,
        requested_scopes: &[String],
        ttl: Option<Duration>,
    ) -> Result<TokenPair, OAuth2Error> {
        let scopes = validate_scopes(self.scopes.as_ref(), requested_scopes).await?;
        if let Some(denied) = requested_scopes.iter().find(|s| !client.allows_scope(s)) {
            tracing::debug!(client_id = %client.id, scope = %denied, "scope not allowed for client");
            return Err(OAuth2Error::Grant(GrantError::InvalidScope {
                scope: denied.clone(),
            }));
        }

        let pair = self.build_pair(&client.id, subject, scopes, ttl)?;
        self.store.put_pair(pair.clone()).await?;

        self.metrics.record_token_issued(&client.id);
        tracing::info!(
            client_id = %client.id,
            access_token = token_prefix(pair.access_token.identifier()),
            expires_at = %pair.access_token.expires_at(),
            "issued token pair"
        );
        Ok(pair)
    }

    /// Look up and authenticate a client, then [`issue`](Self::issue).
    pub async fn issue_for_client_id(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
        subject: Option<&str>,
        requested_scopes: &[String],
        ttl: Option<Duration>,
    ) -> Result<TokenPair, OAuth2Error> {
        let client = authenticate_client(self.clients.as_ref(), client_id, client_secret).await?;
        self.issue(&client, subject, requested_scopes, ttl).await
    }

    /// Build a pair with fresh identifiers without persisting it.
    ///
    /// Scopes are taken as already validated.
    pub fn build_pair(
        &self,
        client_id: &str,
        subject: Option<&str>,
        scopes: BTreeSet<String>,
        ttl: Option<Duration>,
    ) -> Result<TokenPair, OAuth2Error> {
        let now = self.clock.now();
        let access_expires_at =
            expiry(now, ttl.unwrap_or(self.config.access_token_ttl), "access_token_ttl")?;
        let refresh_expires_at =
            expiry(now, self.config.refresh_token_ttl, "refresh_token_ttl")?;

        let access_id = self.ids.generate();
        let refresh_id = self.ids.generate();

        let access_token = AccessToken::new(
            access_id.clone(),
            client_id,
            subject.map(String::from),
            scopes,
            now,
            access_expires_at,
        );
        let refresh_token = RefreshToken::new(refresh_id, access_id, now, refresh_expires_at);

        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Render an access token as a signed bearer assertion.
    #[cfg(feature = "jwt")]
    pub async fn encode_bearer_assertion(&self, token: &AccessToken) -> Result<String, OAuth2Error> {
        let keys = self.keys.as_ref().ok_or_else(|| {
            OAuth2Error::Configuration(ConfigurationError::MissingField {
                field: "key_provider".to_string(),
            })
        })?;

        let key = keys.signing_key().await?;
        let claims = AssertionClaims::for_token(
            token,
            self.clock.now().timestamp(),
            self.config.issuer.as_deref(),
        );
        encode_assertion(&claims, &key)
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration, field: &str) -> Result<DateTime<Utc>, OAuth2Error> {
    now.checked_add_signed(to_chrono(ttl)).ok_or_else(|| {
        OAuth2Error::Configuration(ConfigurationError::InvalidConfig {
            message: format!("{} overflows the representable time range", field),
        })
    })
}
