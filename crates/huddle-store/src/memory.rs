//! In-process store with TTL expiry.
//!
//! Expired entries are dropped when touched, swept from the whole map once
//! it grows past a watermark on write, and swept periodically by
//! [`MemoryStore::spawn_sweeper`]. Expiry uses `tokio::time::Instant`, so
//! tests can run with a paused clock and `tokio::time::advance` past a TTL.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::errors::{Result, StoreError};
use crate::{CasOutcome, SessionStore, ttl_secs};

/// Map size below which writes never trigger a full sweep.
const SWEEP_FLOOR: usize = 256;

struct Entry {
    value: String,
    expires_at: Instant,
}

struct Entries {
    map: HashMap<String, Entry>,
    /// Map size at which the next write sweeps expired entries.
    sweep_at: usize,
}

impl Default for Entries {
    fn default() -> Self {
        Self {
            map: HashMap::new(),
            sweep_at: SWEEP_FLOOR,
        }
    }
}

impl Entries {
    /// Drop `key` if it has expired, then return the live entry.
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let now = Instant::now();
        if self.map.get(key).is_some_and(|e| e.expires_at <= now) {
            let _ = self.map.remove(key);
        }
        self.map.get_mut(key)
    }

    fn insert(&mut self, key: &str, value: &str, ttl: Duration) {
        if self.map.len() >= self.sweep_at {
            let _ = self.purge();
            self.sweep_at = (self.map.len() * 2).max(SWEEP_FLOOR);
        }
        let _ = self.map.insert(
            key.to_owned(),
            Entry {
                value: value.to_owned(),
                expires_at: expiry(ttl),
            },
        );
    }

    fn purge(&mut self) -> usize {
        let now = Instant::now();
        let before = self.map.len();
        self.map.retain(|_, e| e.expires_at > now);
        before - self.map.len()
    }
}

fn expiry(ttl: Duration) -> Instant {
    Instant::now() + Duration::from_secs(ttl_secs(ttl))
}

/// Map-backed [`SessionStore`]. Every operation holds the lock for its whole
/// duration, which makes set-if-absent and compare-and-swap atomic.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<Entries>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .map
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    /// Whether the store holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Time left before `key` expires.
    pub fn ttl_remaining(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .lock()
            .map
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.expires_at - now)
    }

    /// Remove every expired entry. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        self.entries.lock().purge()
    }

    /// Purge expired entries every `every` until the store is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let _ = tick.tick().await;
            loop {
                let _ = tick.tick().await;
                let Some(store) = store.upgrade() else {
                    return;
                };
                let purged = store.purge_expired();
                if purged > 0 {
                    debug!(purged, "swept expired sessions");
                }
            }
        })
    }

    #[cfg(test)]
    fn raw_len(&self) -> usize {
        self.entries.lock().map.len()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<String> {
        self.entries
            .lock()
            .live(key)
            .map(|e| e.value.clone())
            .ok_or_else(|| StoreError::NotFound { key: key.to_owned() })
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .lock()
            .map
            .get(key)
            .is_some_and(|e| e.expires_at > now))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries.lock().insert(key, value, ttl);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.lock();
        if entries.live(key).is_some() {
            return Ok(false);
        }
        entries.insert(key, value, ttl);
        Ok(true)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new: &str,
        ttl: Duration,
    ) -> Result<CasOutcome> {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.live(key) else {
            return Ok(CasOutcome::Missing);
        };
        if entry.value != expected {
            return Ok(CasOutcome::Mismatch);
        }
        new.clone_into(&mut entry.value);
        entry.expires_at = expiry(ttl);
        Ok(CasOutcome::Swapped)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
