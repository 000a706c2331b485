//! OAuth2 Token Core
//!
//! Authorization-server side of OAuth2 bearer tokens: issuing access/refresh
//! token pairs, verifying presented tokens, revoking them and rotating refresh
//! tokens exactly once.
//!
//! # Features
//!
//! - Opaque 240-bit token identifiers from the OS-seeded CSPRNG
//! - Scope validation against a scope registry and per-client allow lists
//! - Access to refresh token cascade on revocation
//! - Compare-and-swap refresh token rotation with reuse detection
//! - Signed JWT bearer assertions (feature `jwt`, on by default)
//! - PostgreSQL token store and registries (feature `postgres`)
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use oauth2_token_core::{
//!     Client, InMemoryScopeRegistry, InMemoryTokenStore, TokenServerBuilder,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let scopes = Arc::new(InMemoryScopeRegistry::with_scopes(["read", "write"])?);
//!     let server = TokenServerBuilder::new(Arc::new(InMemoryTokenStore::new()))
//!         .scope_registry(scopes)
//!         .build()?;
//!
//!     let client = Client::public("my-app", vec!["read".to_string()]);
//!     let pair = server.issue(&client, Some("alice"), &["read".to_string()], None).await?;
//!
//!     let verified = server.verify(pair.access_token.identifier()).await?;
//!     println!("token for {:?} with scopes {:?}", verified.subject, verified.scopes);
//!
//!     let rotated = server.refresh(pair.refresh_token.identifier()).await?;
//!     println!("{}", serde_json::to_string(&server.token_response(&rotated))?);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - `types`: token records, clients, scopes, configuration
//! - `error`: error hierarchy with OAuth2 wire codes
//! - `core`: identifier generation and clock
//! - `registry`: client and scope registries
//! - `token`: store, issuer, verifier, revocation coordinator, assertions
//! - `telemetry`: metrics; logging goes through `tracing`
//! - `builders`: fluent builders for configuration and server wiring
//! - `server`: facade combining all of the above

pub mod builders;
pub mod core;
pub mod error;
pub mod registry;
pub mod server;
pub mod telemetry;
pub mod token;
pub mod types;

// Re-export server
pub use server::TokenServer;

// Re-export builders
pub use builders::{token_server_config, TokenServerBuilder, TokenServerConfigBuilder};

// Re-export error types
pub use error::{
    ConfigurationError, GrantError, OAuth2Error, OAuth2Result, SigningError, StorageError,
    TokenError,
};

// Re-export types
pub use types::{
    AccessToken, Client, RefreshToken, RotationRecord, Scope, TokenEntity, TokenOwner, TokenPair,
    TokenResponse, TokenServerConfig, VerifiedToken,
};

// Re-export core components
pub use crate::core::{
    Clock, MockClock, MockTokenIdGenerator, RandomTokenIdGenerator, SystemClock, TokenIdGenerator,
};

// Re-export registries
pub use registry::{
    authenticate_client, validate_scopes, ClientRegistry, InMemoryClientRegistry,
    InMemoryScopeRegistry, ScopeRegistry,
};

// Re-export token components
pub use token::{
    InMemoryTokenStore, MockTokenStore, PurgeReport, RevocationCoordinator, TokenIssuer,
    TokenStore, TokenVerifier,
};

#[cfg(feature = "jwt")]
pub use token::{AssertionClaims, KeyProvider, PemFileKeyProvider, StaticKeyProvider};

#[cfg(feature = "postgres")]
pub use registry::{PostgresClientRegistry, PostgresScopeRegistry};
#[cfg(feature = "postgres")]
pub use token::PostgresTokenStore;

// Re-export telemetry
pub use telemetry::{InMemoryMetrics, NoOpMetrics, TokenMetrics};
