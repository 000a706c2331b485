//! Server Builder
//!
//! Wires a [`TokenServer`] from a store and optional collaborators.

use std::sync::Arc;

use crate::core::{Clock, SystemClock, TokenIdGenerator};
use crate::error::OAuth2Error;
use crate::registry::{ClientRegistry, InMemoryClientRegistry, InMemoryScopeRegistry, ScopeRegistry};
use crate::server::TokenServer;
use crate::telemetry::{NoOpMetrics, TokenMetrics};
use crate::token::{TokenIssuer, TokenStore, TokenVerifier};
use crate::types::TokenServerConfig;

#[cfg(feature = "jwt")]
use crate::token::KeyProvider;

/// Token server builder.
///
/// Registries default to empty in-memory ones, the clock to system time and
/// metrics to no-op.
pub struct TokenServerBuilder<S: TokenStore> {
    store: Arc<S>,
    config: TokenServerConfig,
    clients: Option<Arc<dyn ClientRegistry>>,
    scopes: Option<Arc<dyn ScopeRegistry>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn TokenIdGenerator>>,
    metrics: Option<Arc<dyn TokenMetrics>>,
    #[cfg(feature = "jwt")]
    keys: Option<Arc<dyn KeyProvider>>,
}

impl<S: TokenStore + 'static> TokenServerBuilder<S> {
    /// Create new builder over a token store.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            config: TokenServerConfig::default(),
            clients: None,
            scopes: None,
            clock: None,
            ids: None,
            metrics: None,
            #[cfg(feature = "jwt")]
            keys: None,
        }
    }

    pub fn config(mut self, config: TokenServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn client_registry(mut self, clients: Arc<dyn ClientRegistry>) -> Self {
        self.clients = Some(clients);
        self
    }

    pub fn scope_registry(mut self, scopes: Arc<dyn ScopeRegistry>) -> Self {
        self.scopes = Some(scopes);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn TokenIdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn TokenMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Enable signed bearer assertions for both issuing and verifying.
    #[cfg(feature = "jwt")]
    pub fn key_provider(mut self, keys: Arc<dyn KeyProvider>) -> Self {
        self.keys = Some(keys);
        self
    }

    /// Build the server. Fails if the configuration is invalid.
    pub fn build(self) -> Result<TokenServer<S>, OAuth2Error> {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let metrics = self.metrics.unwrap_or_else(|| Arc::new(NoOpMetrics));
        let max_token_length = self.config.max_token_length;

        let mut issuer = TokenIssuer::new(
            self.config,
            self.store.clone(),
            self.clients
                .unwrap_or_else(|| Arc::new(InMemoryClientRegistry::new())),
            self.scopes
                .unwrap_or_else(|| Arc::new(InMemoryScopeRegistry::new())),
        )?
        .with_clock(clock.clone())
        .with_metrics(metrics.clone());
        if let Some(ids) = self.ids {
            issuer = issuer.with_id_generator(ids);
        }

        let mut verifier = TokenVerifier::new(self.store)
            .with_clock(clock)
            .with_metrics(metrics)
            .with_max_token_length(max_token_length);

        #[cfg(feature = "jwt")]
        if let Some(keys) = self.keys {
            issuer = issuer.with_key_provider(keys.clone());
            verifier = verifier.with_key_provider(keys);
        }

        tracing::debug!("token server assembled");
        Ok(TokenServer::from_parts(Arc::new(issuer), verifier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MockTokenIdGenerator;
    use crate::token::InMemoryTokenStore;
    use crate::types::{Client, TokenEntity};

    #[tokio::test]
    async fn test_build_with_defaults() {
        let server = TokenServerBuilder::new(Arc::new(InMemoryTokenStore::new()))
            .build()
            .unwrap();
        // no scopes registered: only empty requests succeed
        let pair = server
            .issue(&Client::public("c", Vec::new()), None, &[], None)
            .await
            .unwrap();
        assert!(server.verify(pair.access_token.identifier()).await.is_ok());
    }

    #[tokio::test]
    async fn test_custom_id_generator_is_used() {
        let ids = Arc::new(MockTokenIdGenerator::new());
        ids.queue(["fixed-access-id", "fixed-refresh-id"]);
        let server = TokenServerBuilder::new(Arc::new(InMemoryTokenStore::new()))
            .id_generator(ids)
            .build()
            .unwrap();

        let pair = server
            .issue(&Client::public("c", Vec::new()), None, &[], None)
            .await
            .unwrap();
        assert_eq!(pair.refresh_token.identifier(), "fixed-refresh-id");
        assert!(server.verify("fixed-access-id").await.is_ok());
    }

    #[test]
    fn test_invalid_config_fails_build() {
        let config = TokenServerConfig {
            max_token_length: 0,
            ..Default::default()
        };
        let result = TokenServerBuilder::new(Arc::new(InMemoryTokenStore::new()))
            .config(config)
            .build();
        assert!(result.is_err());
    }
}
