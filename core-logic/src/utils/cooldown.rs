//! # Core Logic - Cooldown Tracking
//!
//! Process-lifetime map of address to the next instant the remote service is
//! expected to accept a claim. Advisory only; never persisted.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct CooldownStore {
    records: Arc<Mutex<HashMap<String, DateTime<Utc>>>>,
}

impl CooldownStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        // A panicked writer leaves at most one stale entry behind.
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn key(address: &str) -> String {
        address.to_lowercase()
    }

    /// Last write wins.
    pub fn record_cooldown(&self, address: &str, next_eligible: DateTime<Utc>) {
        debug!("Cooldown for {} until {}", address, next_eligible);
        self.records().insert(Self::key(address), next_eligible);
    }

    /// False iff a record exists whose instant is still in the future.
    pub fn is_eligible(&self, address: &str, now: DateTime<Utc>) -> bool {
        match self.records().get(&Self::key(address)) {
            Some(next) => *next <= now,
            None => true,
        }
    }

    pub fn next_eligible(&self, address: &str) -> Option<DateTime<Utc>> {
        self.records().get(&Self::key(address)).copied()
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_unknown_address_is_eligible() {
        let store = CooldownStore::new();
        assert!(store.is_eligible("0xabc", Utc::now()));
    }

    #[test]
    fn test_future_record_blocks_until_expiry() {
        let store = CooldownStore::new();
        let now = Utc::now();
        store.record_cooldown("0xAbC", now + Duration::hours(24));

        assert!(!store.is_eligible("0xabc", now));
        assert!(!store.is_eligible("0xABC", now + Duration::hours(23)));
        assert!(store.is_eligible("0xabc", now + Duration::hours(24)));
        assert!(store.is_eligible("0xabc", now + Duration::hours(25)));
    }

    #[test]
    fn test_last_write_wins() {
        let store = CooldownStore::new();
        let now = Utc::now();
        store.record_cooldown("0x1", now + Duration::hours(24));
        store.record_cooldown("0x1", now - Duration::seconds(1));
        assert!(store.is_eligible("0x1", now));
        assert_eq!(store.len(), 1);
    }
}
