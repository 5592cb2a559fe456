//! The entry-content cache: a sharded, memory-budgeted LRU of
//! decompressed entry bytes, keyed by `(zip_path, entry_name)`. Sharded
//! identically to the zip-part cache; unlike it, eviction is driven by a
//! per-shard byte budget rather than an item count.

use bytes::Bytes;
use parking_lot::Mutex;

use super::{shard_index, NUM_SHARDS};
use crate::metrics::Metrics;
use std::sync::Arc;

struct ShardState {
    lru: lru::LruCache<String, Bytes>,
    bytes_used: usize,
}

struct Shard {
    state: Mutex<ShardState>,
    budget: usize,
}

pub struct EntryContentCache {
    shards: Vec<Shard>,
    enabled: bool,
    metrics: Arc<Metrics>,
}

impl EntryContentCache {
    pub fn new(max_bytes: i64, metrics: Arc<Metrics>) -> Self {
        let enabled = max_bytes > 0;
        let per_shard_budget = if enabled {
            ((max_bytes as usize) / NUM_SHARDS).max(1)
        } else {
            0
        };
        let shards = (0..NUM_SHARDS)
            .map(|_| Shard {
                state: Mutex::new(ShardState {
                    lru: lru::LruCache::unbounded(),
                    bytes_used: 0,
                }),
                budget: per_shard_budget,
            })
            .collect();
        Self {
            shards,
            enabled,
            metrics,
        }
    }

    fn shard_for(&self, key: &str) -> &Shard {
        &self.shards[shard_index(key.as_bytes())]
    }

    pub fn get(&self, zip_path: &str, entry_name: &str) -> Option<Bytes> {
        if !self.enabled {
            return None;
        }
        let key = composite_key(zip_path, entry_name);
        let shard = self.shard_for(&key);
        let hit = shard.state.lock().lru.get(&key).cloned();
        if hit.is_some() {
            self.metrics.entry_cache_hits_total.inc();
        } else {
            self.metrics.entry_cache_misses_total.inc();
        }
        hit
    }

    /// Inserts `bytes` for `(zip_path, entry_name)`, evicting LRU tail
    /// entries in this shard until there's room. Items larger than the
    /// shard's budget are not cached at all.
    pub fn put(&self, zip_path: &str, entry_name: &str, bytes: Bytes) {
        if !self.enabled {
            return;
        }

        let key = composite_key(zip_path, entry_name);
        let shard = self.shard_for(&key);

        if bytes.len() > shard.budget {
            return;
        }

        let mut state = shard.state.lock();
        if let Some(old) = state.lru.peek(&key) {
            state.bytes_used = state.bytes_used.saturating_sub(old.len());
        }
        state.bytes_used += bytes.len();
        state.lru.put(key, bytes);

        let mut evicted = 0u64;
        while state.bytes_used > shard.budget {
            match state.lru.pop_lru() {
                Some((_, evicted_bytes)) => {
                    state.bytes_used = state.bytes_used.saturating_sub(evicted_bytes.len());
                    evicted += 1;
                }
                None => break,
            }
        }
        if evicted > 0 {
            self.metrics.entry_cache_evictions_total.inc_by(evicted);
        }
    }

    /// Removes every cached entry belonging to `zip_path`. Scans all
    /// shards since entries are keyed by the composite string, not by
    /// `zip_path` alone.
    pub fn invalidate(&self, zip_path: &str) {
        let prefix = format!("{zip_path}\0");
        for shard in &self.shards {
            let mut state = shard.state.lock();
            let stale: Vec<String> = state
                .lru
                .iter()
                .filter(|(k, _)| k.starts_with(&prefix))
                .map(|(k, _)| k.clone())
                .collect();
            for key in stale {
                if let Some(bytes) = state.lru.pop(&key) {
                    state.bytes_used = state.bytes_used.saturating_sub(bytes.len());
                }
            }
        }
    }

    pub fn total_bytes(&self) -> usize {
        self.shards.iter().map(|s| s.state.lock().bytes_used).sum()
    }

    pub fn total_items(&self) -> usize {
        self.shards.iter().map(|s| s.state.lock().lru.len()).sum()
    }
}

fn composite_key(zip_path: &str, entry_name: &str) -> String {
    format!("{zip_path}\0{entry_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max_bytes: i64) -> EntryContentCache {
        EntryContentCache::new(max_bytes, Arc::new(Metrics::new()))
    }

    #[test]
    fn disabled_cache_is_permanent_miss() {
        let c = cache(0);
        c.put("/a.zip", "checkpoint", Bytes::from_static(b"x"));
        assert_eq!(c.get("/a.zip", "checkpoint"), None);
    }

    #[test]
    fn put_then_get_hits() {
        let c = cache(1 << 20);
        c.put("/a.zip", "checkpoint", Bytes::from_static(b"hello"));
        assert_eq!(
            c.get("/a.zip", "checkpoint"),
            Some(Bytes::from_static(b"hello"))
        );
    }

    #[test]
    fn oversized_item_is_not_cached() {
        // Force a tiny per-shard budget.
        let c = cache(NUM_SHARDS as i64); // 1 byte per shard
        c.put("/a.zip", "checkpoint", Bytes::from_static(b"too big"));
        assert_eq!(c.get("/a.zip", "checkpoint"), None);
    }

    #[test]
    fn invalidate_removes_only_matching_zip() {
        let c = cache(1 << 20);
        c.put("/a.zip", "checkpoint", Bytes::from_static(b"a"));
        c.put("/b.zip", "checkpoint", Bytes::from_static(b"b"));
        c.invalidate("/a.zip");
        assert_eq!(c.get("/a.zip", "checkpoint"), None);
        assert_eq!(c.get("/b.zip", "checkpoint"), Some(Bytes::from_static(b"b")));
    }

    #[test]
    fn eviction_keeps_shard_under_budget() {
        // Find two keys landing in the same shard so eviction is observable.
        let c = cache(1);
        // Budget ends up being `max(1 / NUM_SHARDS, 1) == 1` byte/shard;
        // any non-empty item exceeds it and is never cached -- this proves
        // the "never exceed budget" invariant at the degenerate extreme.
        c.put("/a.zip", "x", Bytes::from_static(b"a"));
        assert_eq!(c.total_bytes(), 0);
    }
}
