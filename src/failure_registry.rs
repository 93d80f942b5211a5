//! Lifetime occurrence counters per failure kind
//!
//! Counts are keyed by `category:code` and never decay or evict; they drive
//! the error-rate alert in the handler rather than a sliding window.

use crate::canonical::Category;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Occurrence counter keyed by (category, code)
#[derive(Debug, Default)]
pub struct FailureRegistry {
    counts: RwLock<HashMap<String, u64>>,
}

impl FailureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the counter for the pair and return the new total
    pub async fn record_occurrence(&self, category: Category, code: &str) -> u64 {
        let key = category.key_for(code);
        let mut counts = self.counts.write().await;
        let count = counts.entry(key).or_insert(0);
        *count += 1;

        debug!(category = %category, code = code, count = *count, "Recorded failure occurrence");
        *count
    }

    /// Current total for the pair, zero if never seen
    pub async fn count(&self, category: Category, code: &str) -> u64 {
        let counts = self.counts.read().await;
        counts.get(&category.key_for(code)).copied().unwrap_or(0)
    }

    /// Copy of every counter
    pub async fn snapshot(&self) -> HashMap<String, u64> {
        self.counts.read().await.clone()
    }

    /// Number of distinct failure kinds seen
    pub async fn len(&self) -> usize {
        self.counts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.counts.read().await.is_empty()
    }
}
