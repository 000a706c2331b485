//! Token Server
//!
//! Facade over issuer, verifier and revocation coordinator sharing one store.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::error::OAuth2Error;
use crate::token::{PurgeReport, RevocationCoordinator, TokenIssuer, TokenStore, TokenVerifier};
use crate::types::{Client, TokenPair, TokenResponse, TokenServerConfig, VerifiedToken};

/// Token service combining issuance, verification and revocation.
pub struct TokenServer<S: TokenStore> {
    issuer: Arc<TokenIssuer<S>>,
    verifier: TokenVerifier<S>,
    coordinator: RevocationCoordinator<S>,
}

impl<S: TokenStore + 'static> TokenServer<S> {
    /// Assemble a server from its parts. Use
    /// [`TokenServerBuilder`](crate::builders::TokenServerBuilder) for the usual wiring.
    pub fn from_parts(issuer: Arc<TokenIssuer<S>>, verifier: TokenVerifier<S>) -> Self {
        let coordinator = RevocationCoordinator::new(issuer.clone());
        Self {
            issuer,
            verifier,
            coordinator,
        }
    }

    pub fn config(&self) -> &TokenServerConfig {
        self.issuer.config()
    }

    pub fn store(&self) -> &Arc<S> {
        self.issuer.store()
    }

    pub fn issuer(&self) -> &TokenIssuer<S> {
        &self.issuer
    }

    pub fn verifier(&self) -> &TokenVerifier<S> {
        &self.verifier
    }

    pub fn coordinator(&self) -> &RevocationCoordinator<S> {
        &self.coordinator
    }

    /// Issue a pair for an authenticated client.
    pub async fn issue(
        &self,
        client: &Client,
        subject: Option<&str>,
        scopes: &[String],
        ttl: Option<Duration>,
    ) -> Result<TokenPair, OAuth2Error> {
        self.issuer.issue(client, subject, scopes, ttl).await
    }

    /// Authenticate a client by id and secret, then issue a pair.
    pub async fn issue_for_client_id(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
        subject: Option<&str>,
        scopes: &[String],
        ttl: Option<Duration>,
    ) -> Result<TokenPair, OAuth2Error> {
        self.issuer
            .issue_for_client_id(client_id, client_secret, subject, scopes, ttl)
            .await
    }

    pub async fn verify(&self, presented: &str) -> Result<VerifiedToken, OAuth2Error> {
        self.verifier.verify(presented).await
    }

    pub async fn verify_with_scopes(
        &self,
        presented: &str,
        required: &[&str],
    ) -> Result<VerifiedToken, OAuth2Error> {
        self.verifier.verify_with_scopes(presented, required).await
    }

    pub async fn revoke_access_token(&self, id: &str) -> Result<(), OAuth2Error> {
        self.coordinator.revoke_access_token(id).await
    }

    pub async fn revoke_refresh_token(&self, id: &str) -> Result<(), OAuth2Error> {
        self.coordinator.revoke_refresh_token(id).await
    }

    /// Refresh grant: rotate the refresh token into a new pair.
    pub async fn refresh(&self, refresh_id: &str) -> Result<TokenPair, OAuth2Error> {
        self.coordinator.rotate_on_refresh(refresh_id).await
    }

    /// Refresh grant with a narrowed scope request.
    pub async fn refresh_with_scopes(
        &self,
        refresh_id: &str,
        scopes: &[String],
    ) -> Result<TokenPair, OAuth2Error> {
        self.coordinator
            .rotate_on_refresh_with_scopes(refresh_id, scopes)
            .await
    }

    pub async fn revoke_all_for_client(&self, client_id: &str) -> Result<usize, OAuth2Error> {
        self.coordinator.revoke_all_for_client(client_id).await
    }

    pub async fn revoke_all_for_subject(&self, user_id: &str) -> Result<usize, OAuth2Error> {
        self.coordinator.revoke_all_for_subject(user_id).await
    }

    pub async fn purge_expired(&self) -> Result<PurgeReport, OAuth2Error> {
        self.coordinator.purge_expired().await
    }

    /// Token endpoint response for a pair, with the opaque access token.
    pub fn token_response(&self, pair: &TokenPair) -> TokenResponse {
        TokenResponse::from_pair(pair, self.issuer.clock().now())
    }

    /// Token endpoint response carrying a signed bearer assertion.
    #[cfg(feature = "jwt")]
    pub async fn assertion_response(&self, pair: &TokenPair) -> Result<TokenResponse, OAuth2Error> {
        let assertion = self.issuer.encode_bearer_assertion(&pair.access_token).await?;
        Ok(TokenResponse::with_access_token(
            pair,
            assertion,
            self.issuer.clock().now(),
        ))
    }

    /// Run [`purge_expired`](Self::purge_expired) every `period` until the
    /// handle is aborted.
    pub fn spawn_purge_task(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(e) = self.purge_expired().await {
                    tracing::error!(error = %e, "token purge failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::TokenServerBuilder;
    use crate::core::MockClock;
    use crate::registry::{InMemoryScopeRegistry, ScopeRegistry};
    use crate::token::InMemoryTokenStore;
    use crate::types::{Scope, TokenEntity};
    use chrono::{TimeZone, Utc};

    async fn server(clock: Arc<MockClock>) -> TokenServer<InMemoryTokenStore> {
        let scopes = Arc::new(InMemoryScopeRegistry::new());
        scopes.register_scope(Scope::new("read")).await.unwrap();
        TokenServerBuilder::new(Arc::new(InMemoryTokenStore::new()))
            .scope_registry(scopes)
            .clock(clock)
            .build()
            .unwrap()
    }

    fn client() -> Client {
        Client::public("spa", vec!["read".to_string()])
    }

    #[tokio::test]
    async fn test_issue_verify_refresh() {
        let clock = Arc::new(MockClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()));
        let server = server(clock).await;

        let pair = server
            .issue(&client(), Some("alice"), &["read".to_string()], None)
            .await
            .unwrap();
        let verified = server.verify(pair.access_token.identifier()).await.unwrap();
        assert_eq!(verified.subject.as_deref(), Some("alice"));

        let next = server.refresh(pair.refresh_token.identifier()).await.unwrap();
        assert!(server.verify(pair.access_token.identifier()).await.is_err());
        assert!(server.verify(next.access_token.identifier()).await.is_ok());
    }

    #[tokio::test]
    async fn test_token_response() {
        let clock = Arc::new(MockClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()));
        let server = server(clock.clone()).await;
        let pair = server
            .issue(&client(), None, &["read".to_string()], None)
            .await
            .unwrap();

        clock.advance(chrono::Duration::seconds(600));
        let response = server.token_response(&pair);
        assert_eq!(response.token_type, "Bearer");
        assert_eq!(response.expires_in, 3000);
        assert_eq!(response.scope.as_deref(), Some("read"));
        assert_eq!(
            response.refresh_token.as_deref(),
            Some(pair.refresh_token.identifier())
        );
    }

    #[tokio::test]
    async fn test_purge_task_runs() {
        let clock = Arc::new(MockClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()));
        let server = Arc::new(server(clock.clone()).await);
        server
            .issue(&client(), None, &["read".to_string()], Some(Duration::from_secs(1)))
            .await
            .unwrap();
        clock.advance(chrono::Duration::days(31));

        let handle = server.clone().spawn_purge_task(Duration::from_millis(10));
        // the first tick fires immediately
        for _ in 0..50 {
            if server.store().count().await.unwrap().0 == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();

        assert_eq!(server.store().count().await.unwrap().0, 0);
    }
}
