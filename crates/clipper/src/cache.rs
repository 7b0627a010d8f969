//! Process-wide cache of master playlists keyed by playlist source.
//!
//! Each source key owns one slot guarded by an async mutex, so the resolver can
//! hold the slot across "check staleness, fetch, write back" without racing a
//! concurrent request for the same channel. Slots live in a bounded LRU map;
//! staleness is only checked lazily when an entry is read.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use moka::policy::EvictionPolicy;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::trace;

use crate::config::CacheConfig;
use crate::playlist::MasterPlaylist;

#[derive(Debug, Clone)]
pub struct PlaylistCacheEntry {
    pub source_key: String,
    pub expires_at: Instant,
    pub master: Arc<MasterPlaylist>,
}

impl PlaylistCacheEntry {
    pub fn new(source_key: impl Into<String>, master: MasterPlaylist, ttl: Duration) -> Self {
        Self {
            source_key: source_key.into(),
            expires_at: Instant::now() + ttl,
            master: Arc::new(master),
        }
    }

    /// An entry is stale once `now` reaches `expires_at`.
    pub fn is_stale(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

type Slot = Arc<Mutex<Option<PlaylistCacheEntry>>>;

#[derive(Clone)]
pub struct PlaylistCache {
    slots: Cache<String, Slot>,
}

impl PlaylistCache {
    pub fn new(config: &CacheConfig) -> Self {
        let slots = Cache::builder()
            .max_capacity(config.max_entries.max(1))
            .eviction_policy(EvictionPolicy::lru())
            .build();
        Self { slots }
    }

    async fn slot(&self, key: &str) -> Slot {
        self.slots
            .get_with(key.to_owned(), async { Arc::new(Mutex::new(None)) })
            .await
    }

    /// Snapshot of the entry for `key`, stale or not.
    pub async fn get(&self, key: &str) -> Option<PlaylistCacheEntry> {
        let slot = self.slots.get(key).await?;
        let entry = slot.lock().await.as_ref().cloned();
        entry
    }

    pub async fn put(&self, key: &str, entry: PlaylistCacheEntry) {
        let slot = self.slot(key).await;
        *slot.lock().await = Some(entry);
    }

    /// Force the entry for `key` to be stale on its next read.
    pub async fn invalidate(&self, key: &str) {
        if let Some(slot) = self.slots.get(key).await
            && let Some(entry) = slot.lock().await.as_mut()
        {
            entry.expires_at = Instant::now();
        }
    }

    /// Enter the critical section for `key`. Other callers locking the same
    /// key wait until the returned guard is dropped.
    pub async fn lock(&self, key: &str) -> CacheSlotGuard {
        let guard = self.slot(key).await.lock_owned().await;
        trace!(key, "Playlist cache slot locked");
        CacheSlotGuard {
            key: key.to_owned(),
            guard,
        }
    }

    /// Approximate number of cached keys; moka applies pending
    /// maintenance lazily, so recent inserts may not be counted yet.
    pub fn entry_count(&self) -> u64 {
        self.slots.entry_count()
    }

    pub fn len(&self) -> usize {
        usize::try_from(self.entry_count()).unwrap_or(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count() == 0
    }
}

impl Default for PlaylistCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

/// Exclusive access to one source key's cache entry.
pub struct CacheSlotGuard {
    key: String,
    guard: OwnedMutexGuard<Option<PlaylistCacheEntry>>,
}

impl CacheSlotGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn entry(&self) -> Option<&PlaylistCacheEntry> {
        self.guard.as_ref()
    }

    /// The cached master playlist if it is still fresh.
    pub fn fresh_master(&self, now: Instant) -> Option<Arc<MasterPlaylist>> {
        self.guard
            .as_ref()
            .filter(|entry| !entry.is_stale(now))
            .map(|entry| Arc::clone(&entry.master))
    }

    /// Store `master` with the given expiry, replacing any previous entry.
    pub fn store(&mut self, master: Arc<MasterPlaylist>, expires_at: Instant) {
        *self.guard = Some(PlaylistCacheEntry {
            source_key: self.key.clone(),
            expires_at,
            master,
        });
    }

    pub fn invalidate(&mut self) {
        if let Some(entry) = self.guard.as_mut() {
            entry.expires_at = Instant::now();
        }
    }
}
