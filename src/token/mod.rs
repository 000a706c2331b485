//! Token Management
//!
//! Token lifecycle on the authorization server side.
//!
//! This module provides:
//!
//! - **Token Storage**: persistence with access to refresh cascade
//! - **Token Issuer**: pair creation with scope checks
//! - **Token Verifier**: read-only validation of presented tokens
//! - **Token Revocation**: revocation, rotation and reuse detection
//! - **Bearer Assertions**: signed JWT rendering of access tokens (`jwt` feature)

#[cfg(feature = "jwt")]
pub mod assertion;
pub mod issuer;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod revocation;
pub mod storage;
pub mod verifier;

// Token Storage
pub use storage::{
    create_in_memory_token_store, create_mock_token_store, InMemoryTokenStore, MockTokenStore,
    PurgeReport, TokenStore,
};

#[cfg(feature = "postgres")]
pub use postgres::PostgresTokenStore;

// Token Issuer
pub use issuer::TokenIssuer;

// Token Verifier
pub use verifier::TokenVerifier;

// Token Revocation
pub use revocation::RevocationCoordinator;

// Bearer Assertions
#[cfg(feature = "jwt")]
pub use assertion::{
    decode_assertion, encode_assertion, AssertionClaims, KeyProvider, PemFileKeyProvider,
    SigningKey, StaticKeyProvider, VerificationKey,
};
