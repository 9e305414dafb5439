use std::collections::HashMap;
use std::time::{Duration, Instant};

use prospector_shared::{ResolvedEntity, RunStats};

/// Short-lived, bounded cache of finished runs keyed by
/// [`FilterSet::cache_key`](prospector_shared::FilterSet::cache_key).
///
/// Entries expire after `ttl`; when full, the oldest entry is evicted.
#[derive(Debug)]
pub struct ResultCache {
    ttl: Duration,
    capacity: usize,
    entries: HashMap<String, CachedRun>,
}

#[derive(Debug, Clone)]
struct CachedRun {
    matches: Vec<ResolvedEntity>,
    stats: RunStats,
    stored_at: Instant,
}

impl ResultCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            entries: HashMap::new(),
        }
    }

    /// Matches and stats for `key`, if stored less than `ttl` ago.
    pub fn get(&mut self, key: &str) -> Option<(Vec<ResolvedEntity>, RunStats)> {
        let expired = self.entries.get(key)?.stored_at.elapsed() >= self.ttl;
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries
            .get(key)
            .map(|run| (run.matches.clone(), run.stats))
    }

    pub fn insert(&mut self, key: String, matches: Vec<ResolvedEntity>, stats: RunStats) {
        if self.capacity == 0 {
            return;
        }
        let ttl = self.ttl;
        self.entries.retain(|_, run| run.stored_at.elapsed() < ttl);
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, run)| run.stored_at)
                .map(|(k, _)| k.clone())
            {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(
            key,
            CachedRun {
                matches,
                stats,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(matched: usize) -> RunStats {
        let mut stats = RunStats::default();
        stats.progress.matched = matched;
        stats
    }

    #[test]
    fn hit_then_expiry() {
        let mut cache = ResultCache::new(Duration::from_millis(30), 10);
        cache.insert("a".into(), vec![], stats(3));
        assert_eq!(cache.get("a").map(|(_, s)| s.progress.matched), Some(3));

        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get("a").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn oldest_entry_is_evicted_when_full() {
        let mut cache = ResultCache::new(Duration::from_secs(60), 2);
        cache.insert("a".into(), vec![], stats(1));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("b".into(), vec![], stats(2));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("c".into(), vec![], stats(3));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn overwriting_a_key_does_not_evict() {
        let mut cache = ResultCache::new(Duration::from_secs(60), 2);
        cache.insert("a".into(), vec![], stats(1));
        cache.insert("b".into(), vec![], stats(2));
        cache.insert("a".into(), vec![], stats(5));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a").map(|(_, s)| s.progress.matched), Some(5));
    }
}
