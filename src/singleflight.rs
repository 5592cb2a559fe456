//! A small generic singleflight group: concurrent callers for the same key
//! observe exactly one execution of the underlying async closure and share
//! its result. Used by the integrity gate and each zip-part cache shard to
//! deduplicate concurrent cold misses. Built from `tokio::sync::OnceCell`
//! plus a `parking_lot::Mutex` map.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;

pub struct SingleFlight<K, V> {
    inflight: Mutex<HashMap<K, Arc<OnceCell<V>>>>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` at most once concurrently for a given `key`. Every caller
    /// racing on the same key gets the same result. The key is dropped from
    /// the in-flight map once the computation completes, so a later,
    /// non-overlapping call re-executes rather than caching forever --
    /// long-lived caching is the caller's responsibility.
    pub async fn do_once<F, Fut>(&self, key: K, f: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let cell = {
            let mut inflight = self.inflight.lock();
            inflight.entry(key.clone()).or_default().clone()
        };

        let result = cell.get_or_init(f).await.clone();

        {
            let mut inflight = self.inflight.lock();
            if let Some(existing) = inflight.get(&key) {
                if Arc::ptr_eq(existing, &cell) {
                    inflight.remove(&key);
                }
            }
        }

        result
    }
}
