//! Token Revocation
//!
//! Revocation with access to refresh cascade, exactly-once refresh token
//! rotation and reuse detection for rotated refresh tokens.

use chrono::DateTime;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::core::to_chrono;
use crate::error::{GrantError, OAuth2Error};
use crate::token::{PurgeReport, TokenIssuer, TokenStore};
use crate::types::{token_prefix, RotationRecord, TokenEntity, TokenOwner, TokenPair};

/// Upper bound on rotation hops followed when revoking a token family.
const MAX_FAMILY_HOPS: usize = 64;

/// Coordinates revocation and refresh token rotation.
pub struct RevocationCoordinator<S: TokenStore> {
    issuer: Arc<TokenIssuer<S>>,
    store: Arc<S>,
}

impl<S: TokenStore> RevocationCoordinator<S> {
    /// Create new coordinator sharing the issuer's store.
    pub fn new(issuer: Arc<TokenIssuer<S>>) -> Self {
        let store = issuer.store().clone();
        Self { issuer, store }
    }

    /// Revoke an access token together with its refresh token.
    pub async fn revoke_access_token(&self, id: &str) -> Result<(), OAuth2Error> {
        let result = self.store.delete_access_token(id).await;
        self.issuer
            .metrics()
            .record_revocation("access_token", result.is_ok());
        if result.is_ok() {
            tracing::info!(access_token = token_prefix(id), "revoked access token");
        }
        result
    }

    /// Revoke a refresh token only. The access token stays valid until expiry.
    pub async fn revoke_refresh_token(&self, id: &str) -> Result<(), OAuth2Error> {
        let result = self.store.delete_refresh_token(id).await;
        self.issuer
            .metrics()
            .record_revocation("refresh_token", result.is_ok());
        if result.is_ok() {
            tracing::info!(refresh_token = token_prefix(id), "revoked refresh token");
        }
        result
    }

    /// Exchange a refresh token for a new pair carrying the same scopes.
    ///
    /// Among concurrent calls with the same refresh token exactly one succeeds;
    /// the rest fail with `InvalidGrant`.
    pub async fn rotate_on_refresh(&self, refresh_id: &str) -> Result<TokenPair, OAuth2Error> {
        self.rotate(refresh_id, None).await
    }

    /// Exchange a refresh token for a new pair with narrowed scopes.
    ///
    /// Requesting a scope the original token did not carry is `InvalidScope`.
    pub async fn rotate_on_refresh_with_scopes(
        &self,
        refresh_id: &str,
        requested_scopes: &[String],
    ) -> Result<TokenPair, OAuth2Error> {
        self.rotate(refresh_id, Some(requested_scopes)).await
    }

    async fn rotate(
        &self,
        refresh_id: &str,
        requested_scopes: Option<&[String]>,
    ) -> Result<TokenPair, OAuth2Error> {
        let refresh = match self.store.get_refresh_token(refresh_id).await {
            Ok(token) => token,
            Err(e) if e.is_not_found() => return self.reject_unknown_refresh(refresh_id).await,
            Err(e) => return Err(e),
        };

        let now = self.issuer.clock().now();
        if refresh.is_expired_at(now) {
            if let Err(e) = self.store.delete_refresh_token(refresh_id).await {
                if !e.is_not_found() {
                    return Err(e);
                }
            }
            tracing::debug!(refresh_token = token_prefix(refresh_id), "refresh token expired");
            return Err(invalid_grant("refresh token expired"));
        }

        let access = match self.store.get_access_token(refresh.access_token_id()).await {
            Ok(token) => token,
            // revoked between the two reads
            Err(e) if e.is_not_found() => return Err(invalid_grant("refresh token revoked")),
            Err(e) => return Err(e),
        };

        let scopes = match requested_scopes {
            None => access.scopes().clone(),
            Some(requested) => {
                if let Some(extra) = requested.iter().find(|s| !access.scopes().contains(*s)) {
                    return Err(OAuth2Error::Grant(GrantError::InvalidScope {
                        scope: extra.clone(),
                    }));
                }
                requested.iter().cloned().collect::<BTreeSet<_>>()
            }
        };

        let pair = self
            .issuer
            .build_pair(access.client_id(), access.user_id(), scopes, None)?;

        match self.store.rotate_pair(refresh_id, pair.clone(), now).await {
            Ok(_) => {
                self.issuer.metrics().record_rotation(access.client_id(), true);
                tracing::info!(
                    client_id = %access.client_id(),
                    refresh_token = token_prefix(refresh_id),
                    access_token = token_prefix(pair.access_token.identifier()),
                    "rotated refresh token"
                );
                Ok(pair)
            }
            // Another caller consumed the token between our read and the swap.
            // If it was rotated, this is a replay like any other.
            Err(e) if e.is_not_found() => {
                self.issuer.metrics().record_rotation(access.client_id(), false);
                tracing::debug!(
                    refresh_token = token_prefix(refresh_id),
                    "lost concurrent rotation"
                );
                self.reject_unknown_refresh(refresh_id).await
            }
            Err(e) => Err(e),
        }
    }

    /// Reject a refresh token the store no longer holds. One that was rotated
    /// is a replay and is reported as a security event.
    async fn reject_unknown_refresh(&self, refresh_id: &str) -> Result<TokenPair, OAuth2Error> {
        let Some(record) = self.store.find_rotation(refresh_id).await? else {
            return Err(invalid_grant("unknown refresh token"));
        };

        let client_id = match self.store.get_access_token(&record.successor_access_token).await {
            Ok(successor) => successor.client_id().to_string(),
            Err(_) => "unknown".to_string(),
        };

        tracing::warn!(
            target: crate::telemetry::SECURITY_TARGET,
            client_id = %client_id,
            refresh_token = token_prefix(refresh_id),
            rotated_at = %record.rotated_at,
            "rotated refresh token presented again"
        );
        self.issuer.metrics().record_refresh_reuse(&client_id);

        if self.issuer.config().revoke_family_on_reuse {
            self.revoke_family(record).await?;
        }

        Err(invalid_grant("refresh token reused"))
    }

    /// Follow the rotation chain from `record` and revoke the live pair.
    async fn revoke_family(&self, mut record: RotationRecord) -> Result<(), OAuth2Error> {
        for _ in 0..MAX_FAMILY_HOPS {
            match self.store.find_rotation(&record.successor_refresh_token).await? {
                Some(next) => record = next,
                None => {
                    match self.store.delete_access_token(&record.successor_access_token).await {
                        Ok(()) => {
                            tracing::warn!(
                                target: crate::telemetry::SECURITY_TARGET,
                                access_token = token_prefix(&record.successor_access_token),
                                "revoked token family after refresh token reuse"
                            );
                            self.issuer.metrics().record_revocation("family", true);
                        }
                        Err(e) if e.is_not_found() => {}
                        Err(e) => return Err(e),
                    }
                    return Ok(());
                }
            }
        }
        tracing::warn!(
            target: crate::telemetry::SECURITY_TARGET,
            "rotation chain too long, token family left in place"
        );
        Ok(())
    }

    /// Revoke every token issued to a client.
    pub async fn revoke_all_for_client(&self, client_id: &str) -> Result<usize, OAuth2Error> {
        self.revoke_all(TokenOwner::Client(client_id.to_string()), "client")
            .await
    }

    /// Revoke every token issued on behalf of a subject.
    pub async fn revoke_all_for_subject(&self, user_id: &str) -> Result<usize, OAuth2Error> {
        self.revoke_all(TokenOwner::Subject(user_id.to_string()), "subject")
            .await
    }

    async fn revoke_all(&self, owner: TokenOwner, kind: &str) -> Result<usize, OAuth2Error> {
        let ids = self.store.access_token_ids_for(&owner).await?;
        let mut revoked = 0;
        for id in &ids {
            match self.store.delete_access_token(id).await {
                Ok(()) => revoked += 1,
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        self.issuer.metrics().record_revocation(kind, true);
        tracing::info!(owner = ?owner, revoked, "bulk revocation");
        Ok(revoked)
    }

    /// Remove expired tokens and rotation tombstones past retention.
    pub async fn purge_expired(&self) -> Result<PurgeReport, OAuth2Error> {
        let now = self.issuer.clock().now();
        let retention = to_chrono(self.issuer.config().rotation_retention);
        let cutoff = now
            .checked_sub_signed(retention)
            .unwrap_or(DateTime::<chrono::Utc>::MIN_UTC);

        let report = self.store.purge_expired(now, cutoff).await?;
        self.issuer.metrics().record_purge(report.total());
        if report.total() > 0 {
            tracing::info!(
                access_tokens = report.access_tokens,
                refresh_tokens = report.refresh_tokens,
                rotation_records = report.rotation_records,
                "purged expired tokens"
            );
        }
        Ok(report)
    }
}

fn invalid_grant(message: &str) -> OAuth2Error {
    OAuth2Error::Grant(GrantError::InvalidGrant {
        message: message.to_string(),
    })
}
