//! Token Storage
//!
//! Persistence of access/refresh token records with explicit cascade rules.
//!
//! Stores are deliberately ignorant of expiry: expired records are returned
//! until purged, and callers decide what an expired record means.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::{lock_poisoned, OAuth2Error, StorageError};
use crate::types::{
    token_prefix, AccessToken, RefreshToken, RotationRecord, TokenEntity, TokenOwner, TokenPair,
};

/// Record counts removed by a garbage-collection sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub access_tokens: u64,
    pub refresh_tokens: u64,
    pub rotation_records: u64,
}

impl PurgeReport {
    /// Total records removed.
    pub fn total(&self) -> u64 {
        self.access_tokens + self.refresh_tokens + self.rotation_records
    }
}

/// Token store interface.
///
/// Every operation is atomic per record; pair operations are atomic per pair.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Insert an access token. Fails with `Conflict` if the identifier exists.
    async fn put_access_token(&self, token: AccessToken) -> Result<(), OAuth2Error>;

    /// Insert a refresh token for an existing access token.
    ///
    /// Fails with `MissingParent` if the owning access token is absent and with
    /// `Conflict` if the identifier exists or the owner already has one.
    async fn put_refresh_token(&self, token: RefreshToken) -> Result<(), OAuth2Error>;

    /// Insert an access token and its refresh token; both or neither.
    async fn put_pair(&self, pair: TokenPair) -> Result<(), OAuth2Error>;

    /// Fetch an access token. Expired records are returned as-is.
    async fn get_access_token(&self, id: &str) -> Result<AccessToken, OAuth2Error>;

    /// Fetch a refresh token. Expired records are returned as-is.
    async fn get_refresh_token(&self, id: &str) -> Result<RefreshToken, OAuth2Error>;

    /// Fetch the refresh token owned by an access token, if any.
    async fn get_refresh_token_for_access(
        &self,
        access_token_id: &str,
    ) -> Result<Option<RefreshToken>, OAuth2Error>;

    /// Delete an access token and, in the same step, its refresh token.
    async fn delete_access_token(&self, id: &str) -> Result<(), OAuth2Error>;

    /// Delete a refresh token only; the owning access token is untouched.
    async fn delete_refresh_token(&self, id: &str) -> Result<(), OAuth2Error>;

    /// Replace the pair owning `old_refresh_id` with `new_pair`.
    ///
    /// Compare-and-swap on the old refresh token's existence: if it is gone
    /// (never existed, or another caller rotated it first) this fails with
    /// `NotFound` and nothing changes. On success a [`RotationRecord`] is kept
    /// and the consumed refresh token is returned.
    async fn rotate_pair(
        &self,
        old_refresh_id: &str,
        new_pair: TokenPair,
        rotated_at: DateTime<Utc>,
    ) -> Result<RefreshToken, OAuth2Error>;

    /// Find the tombstone of a rotated refresh token.
    async fn find_rotation(&self, refresh_id: &str) -> Result<Option<RotationRecord>, OAuth2Error>;

    /// Identifiers of access tokens belonging to a client or subject.
    async fn access_token_ids_for(&self, owner: &TokenOwner) -> Result<Vec<String>, OAuth2Error>;

    /// Remove records expired at `now` and tombstones rotated before
    /// `rotations_before`. Expired access tokens whose refresh token is still
    /// live are kept.
    async fn purge_expired(
        &self,
        now: DateTime<Utc>,
        rotations_before: DateTime<Utc>,
    ) -> Result<PurgeReport, OAuth2Error>;

    /// Number of (access, refresh) records held.
    async fn count(&self) -> Result<(usize, usize), OAuth2Error>;
}

#[derive(Default)]
struct Tables {
    access_tokens: HashMap<String, AccessToken>,
    refresh_tokens: HashMap<String, RefreshToken>,
    // access token id -> refresh token id
    refresh_by_access: HashMap<String, String>,
    rotations: HashMap<String, RotationRecord>,
}

impl Tables {
    fn check_access_free(&self, id: &str) -> Result<(), OAuth2Error> {
        if self.access_tokens.contains_key(id) {
            return Err(conflict(id));
        }
        Ok(())
    }

    fn check_refresh_free(&self, token: &RefreshToken) -> Result<(), OAuth2Error> {
        if self.refresh_tokens.contains_key(token.identifier()) {
            return Err(conflict(token.identifier()));
        }
        if self.refresh_by_access.contains_key(token.access_token_id()) {
            return Err(conflict(token.access_token_id()));
        }
        Ok(())
    }

    fn insert_refresh(&mut self, token: RefreshToken) {
        self.refresh_by_access
            .insert(token.access_token_id().to_string(), token.identifier().to_string());
        self.refresh_tokens.insert(token.identifier().to_string(), token);
    }

    fn insert_pair(&mut self, pair: TokenPair) -> Result<(), OAuth2Error> {
        self.check_access_free(pair.access_token.identifier())?;
        self.check_refresh_free(&pair.refresh_token)?;

        self.access_tokens
            .insert(pair.access_token.identifier().to_string(), pair.access_token);
        self.insert_refresh(pair.refresh_token);
        Ok(())
    }

    fn remove_refresh(&mut self, id: &str) -> Option<RefreshToken> {
        let token = self.refresh_tokens.remove(id)?;
        self.refresh_by_access.remove(token.access_token_id());
        Some(token)
    }

    /// Cascade: removing an access token removes its refresh token.
    fn remove_access(&mut self, id: &str) -> Option<(AccessToken, Option<RefreshToken>)> {
        let access = self.access_tokens.remove(id)?;
        let refresh = self
            .refresh_by_access
            .remove(id)
            .and_then(|refresh_id| self.refresh_tokens.remove(&refresh_id));
        Some((access, refresh))
    }
}

fn conflict(id: &str) -> OAuth2Error {
    OAuth2Error::Storage(StorageError::Conflict { id: id.to_string() })
}

fn not_found(id: &str) -> OAuth2Error {
    OAuth2Error::Storage(StorageError::NotFound { id: id.to_string() })
}

/// In-memory token store.
///
/// A single mutex guards all tables so each operation, including pair inserts
/// and rotation, is one critical section. The guard is never held across an
/// `.await`.
pub struct InMemoryTokenStore {
    tables: Mutex<Tables>,
}

impl InMemoryTokenStore {
    /// Create new in-memory token store.
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, OAuth2Error> {
        self.tables.lock().map_err(|_| lock_poisoned("token store"))
    }
}

impl Default for InMemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn put_access_token(&self, token: AccessToken) -> Result<(), OAuth2Error> {
        let mut tables = self.lock()?;
        tables.check_access_free(token.identifier())?;
        tracing::debug!(access_token = token_prefix(token.identifier()), "stored access token");
        tables
            .access_tokens
            .insert(token.identifier().to_string(), token);
        Ok(())
    }

    async fn put_refresh_token(&self, token: RefreshToken) -> Result<(), OAuth2Error> {
        let mut tables = self.lock()?;
        if !tables.access_tokens.contains_key(token.access_token_id()) {
            return Err(OAuth2Error::Storage(StorageError::MissingParent {
                access_token: token.access_token_id().to_string(),
            }));
        }
        tables.check_refresh_free(&token)?;
        tracing::debug!(refresh_token = token_prefix(token.identifier()), "stored refresh token");
        tables.insert_refresh(token);
        Ok(())
    }

    async fn put_pair(&self, pair: TokenPair) -> Result<(), OAuth2Error> {
        let mut tables = self.lock()?;
        tracing::debug!(
            access_token = token_prefix(pair.access_token.identifier()),
            "stored token pair"
        );
        tables.insert_pair(pair)
    }

    async fn get_access_token(&self, id: &str) -> Result<AccessToken, OAuth2Error> {
        let tables = self.lock()?;
        tables
            .access_tokens
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    async fn get_refresh_token(&self, id: &str) -> Result<RefreshToken, OAuth2Error> {
        let tables = self.lock()?;
        tables
            .refresh_tokens
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    async fn get_refresh_token_for_access(
        &self,
        access_token_id: &str,
    ) -> Result<Option<RefreshToken>, OAuth2Error> {
        let tables = self.lock()?;
        Ok(tables
            .refresh_by_access
            .get(access_token_id)
            .and_then(|refresh_id| tables.refresh_tokens.get(refresh_id))
            .cloned())
    }

    async fn delete_access_token(&self, id: &str) -> Result<(), OAuth2Error> {
        let mut tables = self.lock()?;
        let (_, refresh) = tables.remove_access(id).ok_or_else(|| not_found(id))?;
        tracing::debug!(
            access_token = token_prefix(id),
            cascaded = refresh.is_some(),
            "deleted access token"
        );
        Ok(())
    }

    async fn delete_refresh_token(&self, id: &str) -> Result<(), OAuth2Error> {
        let mut tables = self.lock()?;
        tables.remove_refresh(id).ok_or_else(|| not_found(id))?;
        tracing::debug!(refresh_token = token_prefix(id), "deleted refresh token");
        Ok(())
    }

    async fn rotate_pair(
        &self,
        old_refresh_id: &str,
        new_pair: TokenPair,
        rotated_at: DateTime<Utc>,
    ) -> Result<RefreshToken, OAuth2Error> {
        let mut tables = self.lock()?;

        let old = tables
            .refresh_tokens
            .get(old_refresh_id)
            .cloned()
            .ok_or_else(|| not_found(old_refresh_id))?;

        // Validate the new pair before touching anything.
        if new_pair.access_token.identifier() != old.access_token_id() {
            tables.check_access_free(new_pair.access_token.identifier())?;
        }
        // Includes the old id itself: a refresh token is never reissued.
        if tables
            .refresh_tokens
            .contains_key(new_pair.refresh_token.identifier())
        {
            return Err(conflict(new_pair.refresh_token.identifier()));
        }

        tables.remove_access(old.access_token_id());
        tables.remove_refresh(old.identifier());

        let record = RotationRecord {
            refresh_token: old.identifier().to_string(),
            successor_access_token: new_pair.access_token.identifier().to_string(),
            successor_refresh_token: new_pair.refresh_token.identifier().to_string(),
            rotated_at,
        };
        tables.insert_pair(new_pair)?;
        tables.rotations.insert(record.refresh_token.clone(), record);

        tracing::debug!(refresh_token = token_prefix(old.identifier()), "rotated token pair");
        Ok(old)
    }

    async fn find_rotation(&self, refresh_id: &str) -> Result<Option<RotationRecord>, OAuth2Error> {
        let tables = self.lock()?;
        Ok(tables.rotations.get(refresh_id).cloned())
    }

    async fn access_token_ids_for(&self, owner: &TokenOwner) -> Result<Vec<String>, OAuth2Error> {
        let tables = self.lock()?;
        let mut ids: Vec<String> = tables
            .access_tokens
            .values()
            .filter(|token| match owner {
                TokenOwner::Client(client_id) => token.client_id() == client_id,
                TokenOwner::Subject(user_id) => token.user_id() == Some(user_id.as_str()),
            })
            .map(|token| token.identifier().to_string())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn purge_expired(
        &self,
        now: DateTime<Utc>,
        rotations_before: DateTime<Utc>,
    ) -> Result<PurgeReport, OAuth2Error> {
        let mut tables = self.lock()?;
        let mut report = PurgeReport::default();

        let expired_refresh: Vec<String> = tables
            .refresh_tokens
            .values()
            .filter(|token| token.is_expired_at(now))
            .map(|token| token.identifier().to_string())
            .collect();
        for id in expired_refresh {
            if tables.remove_refresh(&id).is_some() {
                report.refresh_tokens += 1;
            }
        }

        // an expired access token stays while its refresh token can still rotate
        let expired_access: Vec<String> = tables
            .access_tokens
            .values()
            .filter(|token| token.is_expired_at(now))
            .filter(|token| !tables.refresh_by_access.contains_key(token.identifier()))
            .map(|token| token.identifier().to_string())
            .collect();
        for id in expired_access {
            if tables.remove_access(&id).is_some() {
                report.access_tokens += 1;
            }
        }

        let before = tables.rotations.len();
        tables
            .rotations
            .retain(|_, record| record.rotated_at >= rotations_before);
        report.rotation_records = (before - tables.rotations.len()) as u64;

        Ok(report)
    }

    async fn count(&self) -> Result<(usize, usize), OAuth2Error> {
        let tables = self.lock()?;
        Ok((tables.access_tokens.len(), tables.refresh_tokens.len()))
    }
}

/// Mock token store for testing.
///
/// Delegates to an in-memory store, records mutations and can inject failures.
#[derive(Default)]
pub struct MockTokenStore {
    inner: InMemoryTokenStore,
    mutation_history: Mutex<Vec<String>>,
    read_history: Mutex<Vec<String>>,
    next_error: Mutex<Option<OAuth2Error>>,
    should_fail: Mutex<bool>,
}

impl MockTokenStore {
    /// Create new mock token store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set next error to return.
    pub fn set_next_error(&self, error: OAuth2Error) -> &Self {
        *self.next_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(error);
        self
    }

    /// Set store to fail all operations.
    pub fn set_should_fail(&self, should_fail: bool) -> &Self {
        *self.should_fail.lock().unwrap_or_else(|e| e.into_inner()) = should_fail;
        self
    }

    /// Names of mutating operations performed, in order.
    pub fn get_mutation_history(&self) -> Vec<String> {
        self.mutation_history
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    /// Names of read operations performed, in order.
    pub fn get_read_history(&self) -> Vec<String> {
        self.read_history
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    fn mutation(&self, op: &str) -> Result<(), OAuth2Error> {
        self.check_error()?;
        if let Ok(mut history) = self.mutation_history.lock() {
            history.push(op.to_string());
        }
        Ok(())
    }

    fn read(&self, op: &str) -> Result<(), OAuth2Error> {
        self.check_error()?;
        if let Ok(mut history) = self.read_history.lock() {
            history.push(op.to_string());
        }
        Ok(())
    }

    fn check_error(&self) -> Result<(), OAuth2Error> {
        if *self.should_fail.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(OAuth2Error::Storage(StorageError::Backend {
                message: "Mock storage failure".to_string(),
            }));
        }

        if let Some(error) = self
            .next_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            return Err(error);
        }

        Ok(())
    }
}

#[async_trait]
impl TokenStore for MockTokenStore {
    async fn put_access_token(&self, token: AccessToken) -> Result<(), OAuth2Error> {
        self.mutation("put_access_token")?;
        self.inner.put_access_token(token).await
    }

    async fn put_refresh_token(&self, token: RefreshToken) -> Result<(), OAuth2Error> {
        self.mutation("put_refresh_token")?;
        self.inner.put_refresh_token(token).await
    }

    async fn put_pair(&self, pair: TokenPair) -> Result<(), OAuth2Error> {
        self.mutation("put_pair")?;
        self.inner.put_pair(pair).await
    }

    async fn get_access_token(&self, id: &str) -> Result<AccessToken, OAuth2Error> {
        self.read("get_access_token")?;
        self.inner.get_access_token(id).await
    }

    async fn get_refresh_token(&self, id: &str) -> Result<RefreshToken, OAuth2Error> {
        self.read("get_refresh_token")?;
        self.inner.get_refresh_token(id).await
    }

    async fn get_refresh_token_for_access(
        &self,
        access_token_id: &str,
    ) -> Result<Option<RefreshToken>, OAuth2Error> {
        self.read("get_refresh_token_for_access")?;
        self.inner.get_refresh_token_for_access(access_token_id).await
    }

    async fn delete_access_token(&self, id: &str) -> Result<(), OAuth2Error> {
        self.mutation("delete_access_token")?;
        self.inner.delete_access_token(id).await
    }

    async fn delete_refresh_token(&self, id: &str) -> Result<(), OAuth2Error> {
        self.mutation("delete_refresh_token")?;
        self.inner.delete_refresh_token(id).await
    }

    async fn rotate_pair(
        &self,
        old_refresh_id: &str,
        new_pair: TokenPair,
        rotated_at: DateTime<Utc>,
    ) -> Result<RefreshToken, OAuth2Error> {
        self.mutation("rotate_pair")?;
        self.inner.rotate_pair(old_refresh_id, new_pair, rotated_at).await
    }

    async fn find_rotation(&self, refresh_id: &str) -> Result<Option<RotationRecord>, OAuth2Error> {
        self.read("find_rotation")?;
        self.inner.find_rotation(refresh_id).await
    }

    async fn access_token_ids_for(&self, owner: &TokenOwner) -> Result<Vec<String>, OAuth2Error> {
        self.read("access_token_ids_for")?;
        self.inner.access_token_ids_for(owner).await
    }

    async fn purge_expired(
        &self,
        now: DateTime<Utc>,
        rotations_before: DateTime<Utc>,
    ) -> Result<PurgeReport, OAuth2Error> {
        self.mutation("purge_expired")?;
        self.inner.purge_expired(now, rotations_before).await
    }

    async fn count(&self) -> Result<(usize, usize), OAuth2Error> {
        self.read("count")?;
        self.inner.count().await
    }
}

/// Create in-memory token store.
pub fn create_in_memory_token_store() -> InMemoryTokenStore {
    InMemoryTokenStore::new()
}

/// Create mock token store for testing.
pub fn create_mock_token_store() -> MockTokenStore {
    MockTokenStore::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn pair_at(access_id: &str, refresh_id: &str, now: DateTime<Utc>) -> TokenPair {
        let access = AccessToken::new(
            access_id,
            "client-a",
            Some("user-1".to_string()),
            vec!["read".to_string()],
            now,
            now + Duration::hours(1),
        );
        let refresh = RefreshToken::new(refresh_id, access_id, now, now + Duration::days(30));
        TokenPair::new(access, refresh).unwrap()
    }

    fn pair(access_id: &str, refresh_id: &str) -> TokenPair {
        pair_at(access_id, refresh_id, Utc::now())
    }

    fn is_not_found(result: &Result<impl std::fmt::Debug, OAuth2Error>) -> bool {
        matches!(result, Err(OAuth2Error::Storage(StorageError::NotFound { .. })))
    }

    #[tokio::test]
    async fn test_put_and_get_pair() {
        let store = InMemoryTokenStore::new();
        store.put_pair(pair("a1", "r1")).await.unwrap();

        let access = store.get_access_token("a1").await.unwrap();
        assert_eq!(access.client_id(), "client-a");
        let refresh = store.get_refresh_token("r1").await.unwrap();
        assert_eq!(refresh.access_token_id(), "a1");
        assert_eq!(
            store.get_refresh_token_for_access("a1").await.unwrap(),
            Some(refresh)
        );
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let store = InMemoryTokenStore::new();
        assert!(is_not_found(&store.get_access_token("nope").await));
        assert!(is_not_found(&store.get_refresh_token("nope").await));
    }

    #[tokio::test]
    async fn test_put_conflict() {
        let store = InMemoryTokenStore::new();
        store.put_pair(pair("a1", "r1")).await.unwrap();

        let result = store.put_pair(pair("a1", "r2")).await;
        assert!(matches!(
            result,
            Err(OAuth2Error::Storage(StorageError::Conflict { .. }))
        ));
        // the refresh token of the failed pair must not be visible
        assert!(is_not_found(&store.get_refresh_token("r2").await));
    }

    #[tokio::test]
    async fn test_pair_insert_is_all_or_nothing() {
        let store = InMemoryTokenStore::new();
        store.put_pair(pair("a1", "r1")).await.unwrap();

        // refresh id collides, access id is fresh
        let result = store.put_pair(pair("a2", "r1")).await;
        assert!(result.is_err());
        assert!(is_not_found(&store.get_access_token("a2").await));
        assert_eq!(store.count().await.unwrap(), (1, 1));
    }

    #[tokio::test]
    async fn test_refresh_requires_parent() {
        let store = InMemoryTokenStore::new();
        let now = Utc::now();
        let orphan = RefreshToken::new("r1", "missing", now, now + Duration::days(1));

        let result = store.put_refresh_token(orphan).await;
        assert!(matches!(
            result,
            Err(OAuth2Error::Storage(StorageError::MissingParent { .. }))
        ));
    }

    #[tokio::test]
    async fn test_refresh_is_one_to_one() {
        let store = InMemoryTokenStore::new();
        store.put_pair(pair("a1", "r1")).await.unwrap();
        let now = Utc::now();

        let second = RefreshToken::new("r2", "a1", now, now + Duration::days(1));
        let result = store.put_refresh_token(second).await;
        assert!(matches!(
            result,
            Err(OAuth2Error::Storage(StorageError::Conflict { .. }))
        ));
    }

    #[tokio::test]
    async fn test_delete_access_cascades() {
        let store = InMemoryTokenStore::new();
        store.put_pair(pair("a1", "r1")).await.unwrap();

        store.delete_access_token("a1").await.unwrap();

        assert!(is_not_found(&store.get_access_token("a1").await));
        assert!(is_not_found(&store.get_refresh_token("r1").await));
        assert_eq!(store.count().await.unwrap(), (0, 0));
    }

    #[tokio::test]
    async fn test_delete_refresh_does_not_cascade_upward() {
        let store = InMemoryTokenStore::new();
        store.put_pair(pair("a1", "r1")).await.unwrap();

        store.delete_refresh_token("r1").await.unwrap();

        assert!(store.get_access_token("a1").await.is_ok());
        assert!(store.get_refresh_token_for_access("a1").await.unwrap().is_none());
        assert!(is_not_found(&store.delete_refresh_token("r1").await));
    }

    #[tokio::test]
    async fn test_expired_records_are_returned() {
        let store = InMemoryTokenStore::new();
        let long_ago = Utc::now() - Duration::days(365);
        store.put_pair(pair_at("a1", "r1", long_ago)).await.unwrap();

        let access = store.get_access_token("a1").await.unwrap();
        assert!(access.is_expired_at(Utc::now()));
    }

    #[tokio::test]
    async fn test_rotate_pair_cas() {
        let store = InMemoryTokenStore::new();
        store.put_pair(pair("a1", "r1")).await.unwrap();
        let now = Utc::now();

        let consumed = store.rotate_pair("r1", pair("a2", "r2"), now).await.unwrap();
        assert_eq!(consumed.identifier(), "r1");
        assert!(is_not_found(&store.get_access_token("a1").await));
        assert!(store.get_access_token("a2").await.is_ok());

        let record = store.find_rotation("r1").await.unwrap().unwrap();
        assert_eq!(record.successor_access_token, "a2");
        assert_eq!(record.successor_refresh_token, "r2");

        // second swap on the same id loses
        let again = store.rotate_pair("r1", pair("a3", "r3"), now).await;
        assert!(is_not_found(&again));
        assert!(is_not_found(&store.get_access_token("a3").await));
    }

    #[tokio::test]
    async fn test_rotate_pair_conflict_leaves_old_pair() {
        let store = InMemoryTokenStore::new();
        store.put_pair(pair("a1", "r1")).await.unwrap();
        store.put_pair(pair("a9", "r9")).await.unwrap();

        let result = store.rotate_pair("r1", pair("a9", "r2"), Utc::now()).await;
        assert!(matches!(
            result,
            Err(OAuth2Error::Storage(StorageError::Conflict { .. }))
        ));
        assert!(store.get_refresh_token("r1").await.is_ok());
        assert!(store.find_rotation("r1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_access_token_ids_for_owner() {
        let store = InMemoryTokenStore::new();
        store.put_pair(pair("a1", "r1")).await.unwrap();
        store.put_pair(pair("a2", "r2")).await.unwrap();

        let by_client = store
            .access_token_ids_for(&TokenOwner::Client("client-a".to_string()))
            .await
            .unwrap();
        assert_eq!(by_client, vec!["a1".to_string(), "a2".to_string()]);

        let by_subject = store
            .access_token_ids_for(&TokenOwner::Subject("someone".to_string()))
            .await
            .unwrap();
        assert!(by_subject.is_empty());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = InMemoryTokenStore::new();
        let now = Utc::now();
        store
            .put_pair(pair_at("old", "old-r", now - Duration::days(60)))
            .await
            .unwrap();
        store.put_pair(pair_at("fresh", "fresh-r", now)).await.unwrap();
        store
            .rotate_pair("fresh-r", pair_at("next", "next-r", now), now - Duration::days(90))
            .await
            .unwrap();

        let report = store
            .purge_expired(now, now - Duration::days(30))
            .await
            .unwrap();

        assert_eq!(report.access_tokens, 1);
        assert_eq!(report.refresh_tokens, 1);
        assert_eq!(report.rotation_records, 1);
        assert_eq!(report.total(), 3);
        assert!(store.get_access_token("next").await.is_ok());
    }

    #[tokio::test]
    async fn test_purge_removes_expired_refresh_of_live_access() {
        let store = InMemoryTokenStore::new();
        let now = Utc::now();
        let access = AccessToken::new(
            "a1",
            "client-a",
            None,
            Vec::new(),
            now,
            now + Duration::hours(2),
        );
        let refresh = RefreshToken::new("r1", "a1", now, now - Duration::seconds(1));
        store.put_pair(TokenPair::new(access, refresh).unwrap()).await.unwrap();

        let report = store.purge_expired(now, now).await.unwrap();
        assert_eq!(report.refresh_tokens, 1);
        assert_eq!(report.access_tokens, 0);
        assert!(store.get_access_token("a1").await.is_ok());
    }

    #[tokio::test]
    async fn test_purge_keeps_expired_access_with_live_refresh() {
        let store = InMemoryTokenStore::new();
        let issued = Utc::now() - Duration::hours(3);
        store.put_pair(pair_at("a1", "r1", issued)).await.unwrap();

        let report = store.purge_expired(Utc::now(), issued).await.unwrap();
        assert_eq!(report.total(), 0);
        assert!(store.get_access_token("a1").await.is_ok());
        assert!(store.get_refresh_token("r1").await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_store_history_and_failure() {
        let store = MockTokenStore::new();
        store.put_pair(pair("a1", "r1")).await.unwrap();
        store.get_access_token("a1").await.unwrap();

        assert_eq!(store.get_mutation_history(), vec!["put_pair".to_string()]);
        assert_eq!(store.get_read_history(), vec!["get_access_token".to_string()]);

        store.set_should_fail(true);
        let result = store.get_access_token("a1").await;
        assert!(matches!(
            result,
            Err(OAuth2Error::Storage(StorageError::Backend { .. }))
        ));
    }
}
