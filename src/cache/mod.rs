//! Keyed TTL caching of upstream lookups
//!
//! [`TtlCache`] caches the outcome of an asynchronous loader per key
//! with two independent windows: entries unread for
//! `expire_after_access` are dropped, and entries older than
//! `refresh_after_write` are reloaded in place so readers keep seeing a
//! warm value. The cached unit is a shared future, so concurrent
//! readers of a missing key trigger exactly one upstream call.

pub mod accessor;

pub use accessor::{AppsInSpaceCacheKey, CachedCloudController, ProcessCacheKey, SpaceCacheKey};

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use log::{debug, trace};
use tokio::time::Instant;

use crate::error::ApiResult;

type SharedLoad<V> = Shared<BoxFuture<'static, ApiResult<V>>>;

/// Loader invoked on cache misses and background refreshes.
pub type Loader<K, V> = Arc<dyn Fn(&K) -> BoxFuture<'static, ApiResult<V>> + Send + Sync>;

struct Entry<V> {
    load: SharedLoad<V>,
    written_at: Instant,
    last_access: Instant,
    /// A background reload is in flight; suppresses further refresh
    /// triggers for this entry until it completes.
    refreshing: bool,
}

/// Counters for cache observability; logged per maintenance pass.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub refreshes: AtomicU64,
    pub evictions: AtomicU64,
}

/// Single-flight TTL cache over an asynchronous loader.
///
/// The map stores shared futures rather than values: a `get` that
/// misses installs the pending load before awaiting it, so a second
/// `get` for the same key joins the in-flight call instead of issuing
/// its own. Failed loads stay cached (and replay their error to every
/// reader) until natural expiry, except timeouts, which evict the entry
/// immediately so the next reader gets a fresh attempt.
pub struct TtlCache<K, V> {
    name: &'static str,
    entries: Arc<Mutex<HashMap<K, Entry<V>>>>,
    loader: Loader<K, V>,
    expire_after_access: Duration,
    refresh_after_write: Duration,
    stats: CacheStats,
}

impl<K, V> TtlCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(
        name: &'static str,
        expire_after_access: Duration,
        refresh_after_write: Duration,
        loader: Loader<K, V>,
    ) -> Self {
        Self {
            name,
            entries: Arc::new(Mutex::new(HashMap::new())),
            loader,
            expire_after_access,
            refresh_after_write,
            stats: CacheStats::default(),
        }
    }

    /// Look up `key`, loading it if absent, expired or due for refresh.
    ///
    /// Concurrent callers for the same key share one loader invocation.
    pub async fn get(&self, key: &K) -> ApiResult<V> {
        let load = {
            let mut entries = self.entries.lock().expect("cache map poisoned");
            let now = Instant::now();

            let stale = match entries.get(key) {
                None => true,
                Some(entry) => now.duration_since(entry.last_access) >= self.expire_after_access,
            };

            if stale {
                if entries.remove(key).is_some() {
                    self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                }
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                let load = (self.loader)(key).shared();
                entries.insert(
                    key.clone(),
                    Entry {
                        load: load.clone(),
                        written_at: now,
                        last_access: now,
                        refreshing: false,
                    },
                );
                load
            } else {
                let entry = entries.get_mut(key).expect("entry checked above");
                entry.last_access = now;

                // The reader keeps the current (completed) value; the
                // reload runs in the background and replaces it only
                // once it has succeeded.
                if now.duration_since(entry.written_at) >= self.refresh_after_write
                    && !entry.refreshing
                    && entry.load.peek().is_some()
                {
                    entry.refreshing = true;
                    self.stats.refreshes.fetch_add(1, Ordering::Relaxed);
                    self.spawn_refresh(key.clone());
                }

                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                entry.load.clone()
            }
        };

        let result = load.clone().await;
        if matches!(&result, Err(err) if err.is_timeout()) {
            self.evict_if_current(key, &load);
        }
        result
    }

    /// Remove the entry for `key` only if it still holds `load`. A
    /// racing fresh write for the same key wins over the eviction.
    fn evict_if_current(&self, key: &K, load: &SharedLoad<V>) {
        let mut entries = self.entries.lock().expect("cache map poisoned");
        if let Some(entry) = entries.get(key) {
            if entry.load.ptr_eq(load) {
                entries.remove(key);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                trace!("cache '{}': evicted timed-out entry", self.name);
            }
        }
    }

    /// One maintenance pass: drop entries unread past the access window
    /// and reload entries written longer ago than the refresh window.
    ///
    /// Reloads run in the background; the stale value keeps serving
    /// readers until the reload succeeds.
    pub fn maintain(&self) {
        let now = Instant::now();
        let mut due: Vec<K> = Vec::new();

        {
            let mut entries = self.entries.lock().expect("cache map poisoned");
            let before = entries.len();
            entries.retain(|_, entry| {
                now.duration_since(entry.last_access) < self.expire_after_access
            });
            let swept = before - entries.len();
            if swept > 0 {
                self.stats.evictions.fetch_add(swept as u64, Ordering::Relaxed);
                debug!("cache '{}': swept {} expired entries", self.name, swept);
            }

            for (key, entry) in entries.iter_mut() {
                if now.duration_since(entry.written_at) >= self.refresh_after_write
                    && !entry.refreshing
                    && entry.load.peek().is_some()
                {
                    entry.refreshing = true;
                    self.stats.refreshes.fetch_add(1, Ordering::Relaxed);
                    due.push(key.clone());
                }
            }
        }

        for key in due {
            self.spawn_refresh(key);
        }
    }

    /// Reload `key` in the background. The new result is installed only
    /// on success; a failed reload keeps the previous value so a
    /// refresh hiccup never replaces a warm entry with an error.
    fn spawn_refresh(&self, key: K) {
        let reload = (self.loader)(&key).shared();
        let entries = Arc::clone(&self.entries);
        let name = self.name;
        tokio::spawn(async move {
            let result = reload.clone().await;
            let mut entries = entries.lock().expect("cache map poisoned");
            let Some(entry) = entries.get_mut(&key) else {
                return;
            };
            entry.refreshing = false;
            match result {
                Ok(_) => {
                    entry.load = reload;
                    entry.written_at = Instant::now();
                }
                Err(err) => {
                    debug!(
                        "cache '{name}': background refresh failed, keeping previous value: {err}"
                    );
                }
            }
        });
    }

    /// Drop every entry immediately.
    pub fn invalidate_all(&self) {
        let mut entries = self.entries.lock().expect("cache map poisoned");
        let dropped = entries.len();
        entries.clear();
        if dropped > 0 {
            self.stats
                .evictions
                .fetch_add(dropped as u64, Ordering::Relaxed);
            debug!("cache '{}': invalidated {} entries", self.name, dropped);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}
