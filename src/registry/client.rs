//! Client Registry
//!
//! Stores registered client identities and their allowed scopes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{lock_poisoned, GrantError, OAuth2Error, StorageError};
use crate::types::Client;

/// Client registry interface.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClientRegistry: Send + Sync {
    /// Look up a client by identifier.
    async fn get_client(&self, client_id: &str) -> Result<Option<Client>, OAuth2Error>;

    /// Register a new client.
    async fn register_client(&self, client: Client) -> Result<(), OAuth2Error>;
}

/// Look up and authenticate a client.
///
/// Unknown clients and wrong secrets both yield `InvalidClient`.
pub async fn authenticate_client<R>(
    registry: &R,
    client_id: &str,
    secret: Option<&str>,
) -> Result<Client, OAuth2Error>
where
    R: ClientRegistry + ?Sized,
{
    let invalid = || {
        OAuth2Error::Grant(GrantError::InvalidClient {
            client_id: client_id.to_string(),
        })
    };

    let client = registry.get_client(client_id).await?.ok_or_else(invalid)?;
    if !client.verify_secret(secret) {
        tracing::warn!(
            target: crate::telemetry::SECURITY_TARGET,
            client_id = %client_id,
            "client authentication failed"
        );
        return Err(invalid());
    }
    Ok(client)
}

/// In-memory client registry.
pub struct InMemoryClientRegistry {
    clients: RwLock<HashMap<String, Client>>,
}

impl InMemoryClientRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClientRegistry for InMemoryClientRegistry {
    async fn get_client(&self, client_id: &str) -> Result<Option<Client>, OAuth2Error> {
        let clients = self.clients.read().map_err(|_| lock_poisoned("client registry"))?;
        Ok(clients.get(client_id).cloned())
    }

    async fn register_client(&self, client: Client) -> Result<(), OAuth2Error> {
        let mut clients = self.clients.write().map_err(|_| lock_poisoned("client registry"))?;
        if clients.contains_key(&client.id) {
            return Err(OAuth2Error::Storage(StorageError::Conflict { id: client.id }));
        }
        tracing::debug!(client_id = %client.id, confidential = client.is_confidential(), "registered client");
        clients.insert(client.id.clone(), client);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn confidential() -> Client {
        Client::confidential(
            "client-a",
            &SecretString::new("s3cr3t".to_string()),
            vec!["read".to_string()],
        )
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = InMemoryClientRegistry::new();
        registry.register_client(confidential()).await.unwrap();

        let client = registry.get_client("client-a").await.unwrap().unwrap();
        assert!(client.allows_scope("read"));
        assert!(registry.get_client("client-b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_registration_conflicts() {
        let registry = InMemoryClientRegistry::new();
        registry.register_client(confidential()).await.unwrap();

        let result = registry.register_client(confidential()).await;
        assert!(matches!(
            result,
            Err(OAuth2Error::Storage(StorageError::Conflict { .. }))
        ));
    }

    #[tokio::test]
    async fn test_authenticate_client() {
        let registry = InMemoryClientRegistry::new();
        registry.register_client(confidential()).await.unwrap();

        assert!(authenticate_client(&registry, "client-a", Some("s3cr3t")).await.is_ok());

        let wrong = authenticate_client(&registry, "client-a", Some("nope")).await;
        assert!(matches!(
            wrong,
            Err(OAuth2Error::Grant(GrantError::InvalidClient { .. }))
        ));

        let unknown = authenticate_client(&registry, "ghost", None).await;
        assert!(matches!(
            unknown,
            Err(OAuth2Error::Grant(GrantError::InvalidClient { .. }))
        ));
    }

    #[tokio::test]
    async fn test_authenticate_with_mock_registry() {
        let mut registry = MockClientRegistry::new();
        registry
            .expect_get_client()
            .times(1)
            .returning(|_| Ok(Some(Client::public("spa", vec!["read".to_string()]))));

        let client = authenticate_client(&registry, "spa", None).await.unwrap();
        assert_eq!(client.id, "spa");
    }
}
