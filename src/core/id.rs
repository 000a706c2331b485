//! Token Identifier Generation
//!
//! Collision-resistant opaque identifiers for access and refresh tokens.

use base64::Engine;
use rand::RngCore;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::types::{DEFAULT_TOKEN_BYTES, MIN_TOKEN_BYTES};

/// Identifier generator interface (for dependency injection).
pub trait TokenIdGenerator: Send + Sync {
    /// Generate a new identifier.
    fn generate(&self) -> String;
}

/// CSPRNG-backed generator producing base64url identifiers.
///
/// 30 bytes encode to exactly 40 characters.
pub struct RandomTokenIdGenerator {
    byte_length: usize,
}

impl RandomTokenIdGenerator {
    /// Create generator with the default entropy (240 bits).
    pub fn new() -> Self {
        Self::with_bytes(DEFAULT_TOKEN_BYTES)
    }

    /// Create generator with custom entropy.
    ///
    /// # Panics
    /// Panics if fewer than 20 bytes (160 bits) are requested.
    pub fn with_bytes(byte_length: usize) -> Self {
        assert!(
            byte_length >= MIN_TOKEN_BYTES,
            "token identifiers need at least 160 bits of entropy"
        );
        Self { byte_length }
    }
}

impl Default for RandomTokenIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenIdGenerator for RandomTokenIdGenerator {
    fn generate(&self) -> String {
        let mut bytes = vec![0u8; self.byte_length];
        rand::thread_rng().fill_bytes(&mut bytes);
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&bytes)
    }
}

/// Mock generator for testing: hands out queued identifiers first.
#[derive(Default)]
pub struct MockTokenIdGenerator {
    queued: Mutex<VecDeque<String>>,
    counter: Mutex<u64>,
}

impl MockTokenIdGenerator {
    /// Create new mock generator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue identifiers to be returned in order.
    pub fn queue<I, S>(&self, ids: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Ok(mut queued) = self.queued.lock() {
            queued.extend(ids.into_iter().map(Into::into));
        }
        self
    }
}

impl TokenIdGenerator for MockTokenIdGenerator {
    fn generate(&self) -> String {
        if let Some(id) = self.queued.lock().ok().and_then(|mut q| q.pop_front()) {
            return id;
        }
        let mut counter = self.counter.lock().unwrap_or_else(|e| e.into_inner());
        *counter += 1;
        format!("mock-token-{:04}", *counter)
    }
}

/// Whether `token` looks like a generated identifier (base64url alphabet only).
pub fn is_opaque_identifier(token: &str) -> bool {
    !token.is_empty()
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_default_identifier_shape() {
        let generator = RandomTokenIdGenerator::new();
        let id = generator.generate();

        assert_eq!(id.len(), 40);
        assert!(is_opaque_identifier(&id));
    }

    #[test]
    fn test_identifiers_are_unique() {
        let generator = RandomTokenIdGenerator::new();
        let ids: HashSet<String> = (0..1000).map(|_| generator.generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_identifier_length_follows_entropy() {
        use crate::types::{encoded_identifier_len, MAX_TOKEN_BYTES};

        for bytes in [32, MAX_TOKEN_BYTES] {
            let id = RandomTokenIdGenerator::with_bytes(bytes).generate();
            assert_eq!(id.len(), encoded_identifier_len(bytes));
            assert!(id.len() <= 255);
        }
    }

    #[test]
    #[should_panic(expected = "at least 160 bits")]
    fn test_low_entropy_panics() {
        RandomTokenIdGenerator::with_bytes(16);
    }

    #[test]
    fn test_mock_generator_queue_then_counter() {
        let generator = MockTokenIdGenerator::new();
        generator.queue(["first", "second"]);

        assert_eq!(generator.generate(), "first");
        assert_eq!(generator.generate(), "second");
        assert_eq!(generator.generate(), "mock-token-0001");
    }

    #[test]
    fn test_opaque_identifier_check() {
        assert!(is_opaque_identifier("abc-DEF_123"));
        assert!(!is_opaque_identifier(""));
        assert!(!is_opaque_identifier("a.b.c"));
        assert!(!is_opaque_identifier("has space"));
    }
}
