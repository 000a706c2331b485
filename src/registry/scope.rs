//! Scope Registry
//!
//! Defines the set of valid permission scopes.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use crate::error::{lock_poisoned, ConfigurationError, GrantError, OAuth2Error, StorageError};
use crate::types::{is_valid_scope_token, Scope};

/// Scope registry interface.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScopeRegistry: Send + Sync {
    /// Look up a scope by identifier.
    async fn get_scope(&self, id: &str) -> Result<Option<Scope>, OAuth2Error>;

    /// Register a new scope. Existing identifiers are never overwritten.
    async fn register_scope(&self, scope: Scope) -> Result<(), OAuth2Error>;

    /// List all registered scopes.
    async fn list_scopes(&self) -> Result<Vec<Scope>, OAuth2Error>;
}

/// Validate a requested scope list against a registry.
///
/// Returns the de-duplicated scope set, or `InvalidScope` naming the first
/// unknown scope.
pub async fn validate_scopes<R>(registry: &R, requested: &[String]) -> Result<BTreeSet<String>, OAuth2Error>
where
    R: ScopeRegistry + ?Sized,
{
    let mut validated = BTreeSet::new();
    for scope in requested {
        if validated.contains(scope) {
            continue;
        }
        if registry.get_scope(scope).await?.is_none() {
            return Err(OAuth2Error::Grant(GrantError::InvalidScope {
                scope: scope.clone(),
            }));
        }
        validated.insert(scope.clone());
    }
    Ok(validated)
}

/// In-memory, append-only scope registry.
pub struct InMemoryScopeRegistry {
    scopes: RwLock<HashMap<String, Scope>>,
}

impl InMemoryScopeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            scopes: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry pre-populated with scope identifiers.
    pub fn with_scopes<I, S>(ids: I) -> Result<Self, OAuth2Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let registry = Self::new();
        {
            let mut scopes = registry.scopes.write().map_err(|_| lock_poisoned("scope registry"))?;
            for id in ids {
                let scope = Scope::new(id);
                check_scope_id(&scope.id)?;
                scopes.insert(scope.id.clone(), scope);
            }
        }
        Ok(registry)
    }
}

impl Default for InMemoryScopeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn check_scope_id(id: &str) -> Result<(), OAuth2Error> {
    if is_valid_scope_token(id) {
        Ok(())
    } else {
        Err(OAuth2Error::Configuration(ConfigurationError::InvalidConfig {
            message: format!("invalid scope identifier {:?}", id),
        }))
    }
}

#[async_trait]
impl ScopeRegistry for InMemoryScopeRegistry {
    async fn get_scope(&self, id: &str) -> Result<Option<Scope>, OAuth2Error> {
        let scopes = self.scopes.read().map_err(|_| lock_poisoned("scope registry"))?;
        Ok(scopes.get(id).cloned())
    }

    async fn register_scope(&self, scope: Scope) -> Result<(), OAuth2Error> {
        check_scope_id(&scope.id)?;

        let mut scopes = self.scopes.write().map_err(|_| lock_poisoned("scope registry"))?;
        if scopes.contains_key(&scope.id) {
            return Err(OAuth2Error::Storage(StorageError::Conflict { id: scope.id }));
        }
        tracing::debug!(scope = %scope.id, "registered scope");
        scopes.insert(scope.id.clone(), scope);
        Ok(())
    }

    async fn list_scopes(&self) -> Result<Vec<Scope>, OAuth2Error> {
        let scopes = self.scopes.read().map_err(|_| lock_poisoned("scope registry"))?;
        let mut list: Vec<Scope> = scopes.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = InMemoryScopeRegistry::new();
        registry
            .register_scope(Scope::new("read").with_description("Read access"))
            .await
            .unwrap();

        let scope = registry.get_scope("read").await.unwrap().unwrap();
        assert_eq!(scope.description.as_deref(), Some("Read access"));
        assert!(registry.get_scope("write").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scope_identifiers_are_immutable() {
        let registry = InMemoryScopeRegistry::with_scopes(["read"]).unwrap();

        let result = registry
            .register_scope(Scope::new("read").with_description("changed"))
            .await;
        assert!(matches!(
            result,
            Err(OAuth2Error::Storage(StorageError::Conflict { .. }))
        ));
        assert!(registry.get_scope("read").await.unwrap().unwrap().description.is_none());
    }

    #[tokio::test]
    async fn test_invalid_identifier_rejected() {
        let registry = InMemoryScopeRegistry::new();
        assert!(registry.register_scope(Scope::new("two words")).await.is_err());
        assert!(InMemoryScopeRegistry::with_scopes([""]).is_err());
    }

    #[tokio::test]
    async fn test_validate_scopes() {
        let registry = InMemoryScopeRegistry::with_scopes(["read", "write"]).unwrap();

        let validated = validate_scopes(&registry, &names(&["write", "read", "write"]))
            .await
            .unwrap();
        assert_eq!(validated.into_iter().collect::<Vec<_>>(), names(&["read", "write"]));

        let result = validate_scopes(&registry, &names(&["read", "admin"])).await;
        match result {
            Err(OAuth2Error::Grant(GrantError::InvalidScope { scope })) => assert_eq!(scope, "admin"),
            other => panic!("expected InvalidScope, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_validate_scopes_propagates_backend_errors() {
        let mut registry = MockScopeRegistry::new();
        registry.expect_get_scope().returning(|_| {
            Err(OAuth2Error::Storage(StorageError::Backend {
                message: "scope table unavailable".to_string(),
            }))
        });

        let result = validate_scopes(&registry, &names(&["read"])).await;
        assert!(matches!(
            result,
            Err(OAuth2Error::Storage(StorageError::Backend { .. }))
        ));
    }

    #[test]
    fn test_list_scopes_sorted() {
        let registry = InMemoryScopeRegistry::with_scopes(["write", "admin", "read"]).unwrap();
        let ids: Vec<String> = tokio_test::block_on(registry.list_scopes())
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, names(&["admin", "read", "write"]));
    }
}
