//! End-to-end token lifecycle against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures::future::join_all;
use oauth2_token_core::{
    Client, GrantError, InMemoryMetrics, InMemoryScopeRegistry, InMemoryTokenStore, MockClock,
    MockTokenStore, OAuth2Error, StorageError, TokenEntity, TokenError, TokenServer,
    TokenServerBuilder, TokenStore,
};

fn scopes(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn client() -> Client {
    Client::public("web-app", scopes(&["read", "write"]))
}

fn clock() -> Arc<MockClock> {
    Arc::new(MockClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()))
}

fn server_with<S: TokenStore + 'static>(store: Arc<S>, clock: Arc<MockClock>) -> TokenServer<S> {
    let registry = InMemoryScopeRegistry::with_scopes(["read", "write", "admin"]).unwrap();
    TokenServerBuilder::new(store)
        .scope_registry(Arc::new(registry))
        .clock(clock)
        .build()
        .unwrap()
}

fn server(clock: Arc<MockClock>) -> TokenServer<InMemoryTokenStore> {
    server_with(Arc::new(InMemoryTokenStore::new()), clock)
}

#[tokio::test]
async fn deleting_access_token_removes_refresh_token() {
    let server = server(clock());
    let pair = server
        .issue(&client(), Some("alice"), &scopes(&["read"]), None)
        .await
        .unwrap();

    server
        .revoke_access_token(pair.access_token.identifier())
        .await
        .unwrap();

    let refresh = server
        .store()
        .get_refresh_token(pair.refresh_token.identifier())
        .await;
    assert!(matches!(
        refresh,
        Err(OAuth2Error::Storage(StorageError::NotFound { .. }))
    ));
}

#[tokio::test]
async fn deleting_refresh_token_keeps_access_token() {
    let server = server(clock());
    let pair = server
        .issue(&client(), Some("alice"), &scopes(&["read"]), None)
        .await
        .unwrap();

    server
        .revoke_refresh_token(pair.refresh_token.identifier())
        .await
        .unwrap();

    let verified = server.verify(pair.access_token.identifier()).await.unwrap();
    assert_eq!(verified.client_id, "web-app");
}

#[tokio::test]
async fn concurrent_rotation_has_exactly_one_winner() {
    let server = Arc::new(server(clock()));
    let pair = server
        .issue(&client(), Some("alice"), &scopes(&["read", "write"]), None)
        .await
        .unwrap();
    let refresh_id = pair.refresh_token.identifier().to_string();

    let attempts = (0..16).map(|_| {
        let server = server.clone();
        let refresh_id = refresh_id.clone();
        tokio::spawn(async move { server.refresh(&refresh_id).await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for result in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(
            result,
            Err(OAuth2Error::Grant(GrantError::InvalidGrant { .. }))
        ));
    }
    assert_eq!(server.store().count().await.unwrap(), (1, 1));
}

#[tokio::test]
async fn past_expiry_token_is_expired_not_missing() {
    let clock = clock();
    let server = server(clock.clone());
    let pair = server
        .issue(&client(), None, &scopes(&["read"]), Some(Duration::from_secs(60)))
        .await
        .unwrap();

    clock.advance(chrono::Duration::minutes(5));
    let result = server.verify(pair.access_token.identifier()).await;
    assert!(matches!(result, Err(OAuth2Error::Token(TokenError::Expired))));

    let unknown = server.verify("does-not-exist").await;
    assert!(matches!(unknown, Err(OAuth2Error::Token(TokenError::NotFound))));
}

#[tokio::test]
async fn out_of_scope_issue_persists_nothing() {
    let store = Arc::new(MockTokenStore::new());
    let server = server_with(store.clone(), clock());

    let result = server
        .issue(&client(), Some("alice"), &scopes(&["read", "admin"]), None)
        .await;

    match result {
        Err(OAuth2Error::Grant(GrantError::InvalidScope { scope })) => assert_eq!(scope, "admin"),
        other => panic!("expected InvalidScope, got {:?}", other),
    }
    assert!(store.get_mutation_history().is_empty());
    assert_eq!(store.count().await.unwrap(), (0, 0));
}

#[tokio::test]
async fn issue_then_verify_round_trip() {
    let server = server(clock());
    let pair = server
        .issue(&client(), Some("alice"), &scopes(&["write", "read"]), None)
        .await
        .unwrap();

    let verified = server
        .verify_with_scopes(pair.access_token.identifier(), &["read", "write"])
        .await
        .unwrap();

    assert_eq!(verified.subject.as_deref(), Some("alice"));
    assert_eq!(verified.client_id, "web-app");
    assert_eq!(
        verified.scopes.into_iter().collect::<Vec<_>>(),
        scopes(&["read", "write"])
    );
}

#[tokio::test]
async fn expiry_boundary_around_one_hour() {
    let clock = clock();
    let server = server(clock.clone());
    let pair = server
        .issue(&client(), None, &scopes(&["read"]), Some(Duration::from_secs(3600)))
        .await
        .unwrap();
    let id = pair.access_token.identifier().to_string();

    clock.advance(chrono::Duration::seconds(3599));
    assert!(server.verify(&id).await.is_ok());

    clock.advance(chrono::Duration::seconds(2));
    assert!(matches!(
        server.verify(&id).await,
        Err(OAuth2Error::Token(TokenError::Expired))
    ));
}

#[tokio::test]
async fn second_rotation_of_stale_refresh_token_fails() {
    let metrics = Arc::new(InMemoryMetrics::new());
    let registry = InMemoryScopeRegistry::with_scopes(["read"]).unwrap();
    let server = TokenServerBuilder::new(Arc::new(InMemoryTokenStore::new()))
        .scope_registry(Arc::new(registry))
        .metrics(metrics.clone())
        .build()
        .unwrap();

    let pair = server
        .issue(&client(), Some("alice"), &scopes(&["read"]), None)
        .await
        .unwrap();
    let rotated = server.refresh(pair.refresh_token.identifier()).await.unwrap();
    assert_eq!(rotated.access_token.user_id(), Some("alice"));

    let replay = server.refresh(pair.refresh_token.identifier()).await;
    assert!(matches!(
        replay,
        Err(OAuth2Error::Grant(GrantError::InvalidGrant { .. }))
    ));
    assert_eq!(metrics.total("oauth2_refresh_token_reuse_total"), 1.0);
}

#[cfg(feature = "jwt")]
mod assertions {
    use super::*;
    use jsonwebtoken::Algorithm;
    use oauth2_token_core::StaticKeyProvider;

    const PRIVATE_PEM: &[u8] = include_bytes!("fixtures/rsa_private.pem");
    const PUBLIC_PEM: &[u8] = include_bytes!("fixtures/rsa_public.pem");

    fn signing_server(clock: Arc<MockClock>) -> TokenServer<InMemoryTokenStore> {
        let keys = StaticKeyProvider::from_pem(Algorithm::RS256, PRIVATE_PEM, PUBLIC_PEM).unwrap();
        let registry = InMemoryScopeRegistry::with_scopes(["read"]).unwrap();
        TokenServerBuilder::new(Arc::new(InMemoryTokenStore::new()))
            .scope_registry(Arc::new(registry))
            .clock(clock)
            .key_provider(Arc::new(keys))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn signed_assertion_verifies_until_revoked() {
        let server = signing_server(clock());
        let pair = server
            .issue(&client(), Some("alice"), &scopes(&["read"]), None)
            .await
            .unwrap();

        let response = server.assertion_response(&pair).await.unwrap();
        assert_eq!(response.access_token.split('.').count(), 3);

        let verified = server.verify(&response.access_token).await.unwrap();
        assert_eq!(verified.token_id, pair.access_token.identifier());

        server
            .revoke_access_token(pair.access_token.identifier())
            .await
            .unwrap();
        assert!(matches!(
            server.verify(&response.access_token).await,
            Err(OAuth2Error::Token(TokenError::NotFound))
        ));
    }

    #[tokio::test]
    async fn forged_signature_is_rejected() {
        let server = signing_server(clock());
        let pair = server
            .issue(&client(), Some("alice"), &scopes(&["read"]), None)
            .await
            .unwrap();
        let assertion = server.assertion_response(&pair).await.unwrap().access_token;

        let (unsigned, signature) = assertion.rsplit_once('.').unwrap();
        let mut forged_sig: Vec<char> = signature.chars().collect();
        forged_sig[4] = if forged_sig[4] == 'A' { 'B' } else { 'A' };
        let forged = format!("{}.{}", unsigned, forged_sig.into_iter().collect::<String>());

        assert!(matches!(
            server.verify(&forged).await,
            Err(OAuth2Error::Token(TokenError::InvalidSignature))
        ));
    }

    #[tokio::test]
    async fn expired_assertion_is_rejected() {
        let clock = clock();
        let server = signing_server(clock.clone());
        let pair = server
            .issue(&client(), None, &scopes(&["read"]), Some(Duration::from_secs(30)))
            .await
            .unwrap();
        let assertion = server.assertion_response(&pair).await.unwrap().access_token;

        clock.advance(chrono::Duration::minutes(1));
        assert!(matches!(
            server.verify(&assertion).await,
            Err(OAuth2Error::Token(TokenError::Expired))
        ));
    }
}
