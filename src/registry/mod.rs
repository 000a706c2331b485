//! Registries
//!
//! Client and scope registries consulted by the token issuer.

pub mod client;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod scope;

pub use client::{authenticate_client, ClientRegistry, InMemoryClientRegistry};
pub use scope::{validate_scopes, InMemoryScopeRegistry, ScopeRegistry};

#[cfg(feature = "postgres")]
pub use postgres::{PostgresClientRegistry, PostgresScopeRegistry};

#[cfg(test)]
pub use client::MockClientRegistry;
#[cfg(test)]
pub use scope::MockScopeRegistry;
