//! Metrics
//!
//! Token service metrics collection interfaces and implementations.

use std::collections::HashMap;
use std::sync::Mutex;

/// Metric labels.
pub type MetricLabels = HashMap<String, String>;

/// Token service metrics interface.
pub trait TokenMetrics: Send + Sync {
    /// Record a newly issued token pair.
    fn record_token_issued(&self, client_id: &str);

    /// Record a verification outcome ("valid", "expired", "not_found", ...).
    fn record_verification(&self, outcome: &str);

    /// Record a revocation ("access_token", "refresh_token").
    fn record_revocation(&self, kind: &str, success: bool);

    /// Record a refresh rotation attempt.
    fn record_rotation(&self, client_id: &str, success: bool);

    /// Record replay of an already rotated refresh token.
    fn record_refresh_reuse(&self, client_id: &str);

    /// Record a garbage-collection sweep.
    fn record_purge(&self, removed: u64);
}

/// No-op metrics implementation.
pub struct NoOpMetrics;

impl TokenMetrics for NoOpMetrics {
    fn record_token_issued(&self, _client_id: &str) {}
    fn record_verification(&self, _outcome: &str) {}
    fn record_revocation(&self, _kind: &str, _success: bool) {}
    fn record_rotation(&self, _client_id: &str, _success: bool) {}
    fn record_refresh_reuse(&self, _client_id: &str) {}
    fn record_purge(&self, _removed: u64) {}
}

/// No-op metrics singleton.
pub fn no_op_metrics() -> NoOpMetrics {
    NoOpMetrics
}

/// Metric entry for in-memory storage.
#[derive(Debug, Clone)]
pub struct MetricEntry {
    pub name: String,
    pub value: f64,
    pub labels: MetricLabels,
    pub timestamp: u64,
}

/// In-memory metrics for testing.
pub struct InMemoryMetrics {
    entries: Mutex<Vec<MetricEntry>>,
}

impl InMemoryMetrics {
    /// Create new in-memory metrics.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Get all recorded entries.
    pub fn get_entries(&self) -> Vec<MetricEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Get entries by name.
    pub fn get_entries_by_name(&self, name: &str) -> Vec<MetricEntry> {
        self.get_entries()
            .into_iter()
            .filter(|e| e.name == name)
            .collect()
    }

    /// Sum of values recorded under `name`.
    pub fn total(&self, name: &str) -> f64 {
        self.get_entries_by_name(name).iter().map(|e| e.value).sum()
    }

    /// Clear all entries.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    fn record(&self, name: &str, value: f64, labels: MetricLabels) {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        if let Ok(mut entries) = self.entries.lock() {
            entries.push(MetricEntry {
                name: name.to_string(),
                value,
                labels,
                timestamp: now,
            });
        }
    }
}

impl Default for InMemoryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenMetrics for InMemoryMetrics {
    fn record_token_issued(&self, client_id: &str) {
        let mut labels = MetricLabels::new();
        labels.insert("client_id".to_string(), client_id.to_string());
        self.record("oauth2_tokens_issued_total", 1.0, labels);
    }

    fn record_verification(&self, outcome: &str) {
        let mut labels = MetricLabels::new();
        labels.insert("outcome".to_string(), outcome.to_string());
        self.record("oauth2_token_verifications_total", 1.0, labels);
    }

    fn record_revocation(&self, kind: &str, success: bool) {
        let mut labels = MetricLabels::new();
        labels.insert("kind".to_string(), kind.to_string());
        labels.insert("success".to_string(), success.to_string());
        self.record("oauth2_token_revocations_total", 1.0, labels);
    }

    fn record_rotation(&self, client_id: &str, success: bool) {
        let mut labels = MetricLabels::new();
        labels.insert("client_id".to_string(), client_id.to_string());
        labels.insert("success".to_string(), success.to_string());
        self.record("oauth2_token_rotations_total", 1.0, labels);
    }

    fn record_refresh_reuse(&self, client_id: &str) {
        let mut labels = MetricLabels::new();
        labels.insert("client_id".to_string(), client_id.to_string());
        self.record("oauth2_refresh_token_reuse_total", 1.0, labels);
    }

    fn record_purge(&self, removed: u64) {
        self.record("oauth2_tokens_purged_total", removed as f64, MetricLabels::new());
    }
}

/// Create in-memory metrics for testing.
pub fn create_in_memory_metrics() -> InMemoryMetrics {
    InMemoryMetrics::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_op_metrics() {
        let metrics = no_op_metrics();
        // Should not panic
        metrics.record_token_issued("client-a");
        metrics.record_verification("valid");
        metrics.record_refresh_reuse("client-a");
    }

    #[test]
    fn test_in_memory_metrics() {
        let metrics = InMemoryMetrics::new();

        metrics.record_token_issued("client-a");
        metrics.record_verification("expired");

        let entries = metrics.get_entries();
        assert_eq!(entries.len(), 2);

        let verifications = metrics.get_entries_by_name("oauth2_token_verifications_total");
        assert_eq!(verifications.len(), 1);
        assert_eq!(
            verifications[0].labels.get("outcome"),
            Some(&"expired".to_string())
        );
    }

    #[test]
    fn test_purge_total() {
        let metrics = InMemoryMetrics::new();
        metrics.record_purge(3);
        metrics.record_purge(4);
        assert_eq!(metrics.total("oauth2_tokens_purged_total"), 7.0);

        metrics.clear();
        assert!(metrics.get_entries().is_empty());
    }
}
