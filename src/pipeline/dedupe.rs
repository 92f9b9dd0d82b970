//! Dedupe cache: remembers which message ids were scanned recently.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Share of entries evicted when pruning expired entries is not enough.
const EVICT_FRACTION: f64 = 0.2;

/// TTL-bounded, size-bounded set of processed message ids.
///
/// Safe to share across tasks; every mutation goes through the inner mutex.
pub struct DedupeCache {
    ttl: Duration,
    max_entries: usize,
    entries: Mutex<HashMap<String, Instant>>,
}

impl DedupeCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// True if `id` was marked within the TTL. Stale entries are dropped here.
    pub fn is_processed(&self, id: &str) -> bool {
        let mut entries = self.lock();
        match entries.get(id) {
            None => false,
            Some(marked_at) if marked_at.elapsed() > self.ttl => {
                entries.remove(id);
                false
            }
            Some(_) => true,
        }
    }

    /// Record `id` as processed now, pruning first if at capacity.
    pub fn mark_processed(&self, id: &str) {
        let mut entries = self.lock();
        if entries.len() >= self.max_entries {
            self.prune(&mut entries);
        }
        entries.insert(id.to_string(), Instant::now());
    }

    /// Mark `id` unless it is already live. Returns false for a duplicate.
    ///
    /// Check and mark happen under one lock, so concurrent deliveries of the
    /// same id cannot both pass.
    pub fn try_mark(&self, id: &str) -> bool {
        let mut entries = self.lock();
        if let Some(marked_at) = entries.get(id)
            && marked_at.elapsed() <= self.ttl
        {
            return false;
        }
        entries.remove(id);
        if entries.len() >= self.max_entries {
            self.prune(&mut entries);
        }
        entries.insert(id.to_string(), Instant::now());
        true
    }

    /// Forget `id` (e.g. the message was edited and must be re-scanned).
    pub fn remove(&self, id: &str) {
        self.lock().remove(id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn prune(&self, entries: &mut HashMap<String, Instant>) {
        let before = entries.len();
        entries.retain(|_, marked_at| marked_at.elapsed() <= self.ttl);
        let expired = before - entries.len();

        let mut evicted = 0;
        if entries.len() >= self.max_entries {
            let to_evict = ((self.max_entries as f64 * EVICT_FRACTION) as usize).max(1);
            let mut by_age: Vec<(String, Instant)> =
                entries.iter().map(|(k, v)| (k.clone(), *v)).collect();
            by_age.sort_by_key(|(_, marked_at)| *marked_at);
            for (id, _) in by_age.into_iter().take(to_evict) {
                entries.remove(&id);
                evicted += 1;
            }
        }

        debug!(expired, evicted, remaining = entries.len(), "Pruned dedupe cache");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn processed_until_ttl_elapses() {
        let cache = DedupeCache::new(Duration::from_secs(60), 100);
        assert!(!cache.is_processed("m1"));

        cache.mark_processed("m1");
        assert!(cache.is_processed("m1"));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(cache.is_processed("m1"));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(!cache.is_processed("m1"));
        // Stale entry removed lazily on lookup.
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn remark_refreshes_timestamp() {
        let cache = DedupeCache::new(Duration::from_secs(10), 100);
        cache.mark_processed("m1");
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.remove("m1");
        cache.mark_processed("m1");
        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(cache.is_processed("m1"));
    }

    #[tokio::test(start_paused = true)]
    async fn try_mark_rejects_live_duplicate() {
        let cache = DedupeCache::new(Duration::from_secs(60), 100);
        assert!(cache.try_mark("m1"));
        assert!(!cache.try_mark("m1"));
        assert!(cache.is_processed("m1"));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.try_mark("m1"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn remove_forgets_id() {
        let cache = DedupeCache::new(Duration::from_secs(60), 100);
        cache.mark_processed("m1");
        cache.remove("m1");
        assert!(!cache.is_processed("m1"));
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn size_stays_bounded_under_load() {
        let cache = DedupeCache::new(Duration::from_secs(60), 10);
        for i in 0..100 {
            cache.mark_processed(&format!("m{i}"));
            tokio::time::advance(Duration::from_millis(1)).await;
            assert!(cache.len() <= 10);
        }
        // Newest id survives eviction.
        assert!(cache.is_processed("m99"));
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_eviction_drops_oldest() {
        let cache = DedupeCache::new(Duration::from_secs(60), 10);
        for i in 0..10 {
            cache.mark_processed(&format!("m{i}"));
            tokio::time::advance(Duration::from_millis(10)).await;
        }
        cache.mark_processed("new");
        assert_eq!(cache.len(), 9);
        assert!(!cache.is_processed("m0"));
        assert!(!cache.is_processed("m1"));
        assert!(cache.is_processed("m2"));
        assert!(cache.is_processed("new"));
    }

    #[tokio::test(start_paused = true)]
    async fn prune_prefers_expired_entries() {
        let cache = DedupeCache::new(Duration::from_secs(5), 10);
        for i in 0..5 {
            cache.mark_processed(&format!("old{i}"));
        }
        tokio::time::advance(Duration::from_secs(6)).await;
        for i in 0..5 {
            cache.mark_processed(&format!("fresh{i}"));
        }
        cache.mark_processed("trigger");
        // Only the expired entries were pruned; all fresh ones remain.
        assert_eq!(cache.len(), 6);
        for i in 0..5 {
            assert!(cache.is_processed(&format!("fresh{i}")));
        }
    }
}
