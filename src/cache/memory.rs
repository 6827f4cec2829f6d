//! In-process cache adapter.
//!
//! Grounded on `backend/app/cache/adapters.py::InMemoryCacheAdapter`: a
//! single-lock-guarded map with lazily-checked expiry (entries are dropped
//! on the read that discovers them stale rather than via a background
//! sweep). Uses `parking_lot::Mutex` in place of the original's
//! `asyncio.Lock` — the guarded section never awaits, so a synchronous lock
//! is the idiomatic choice, matching how `DashMapCache`-style in-memory
//! adapters avoid holding any lock across an await point entirely.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::cache::CacheAdapter;
use crate::error::CacheResult;

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Process-local cache backend. Suitable for single-instance deployments or
/// as the fallback tier when no remote store is configured.
pub struct InMemoryCacheAdapter {
    data: Mutex<HashMap<String, Entry>>,
}

impl InMemoryCacheAdapter {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCacheAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheAdapter for InMemoryCacheAdapter {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut data = self.data.lock();
        match data.get(key) {
            None => Ok(None),
            Some(entry) if entry.is_expired() => {
                data.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl_seconds: u64) -> CacheResult<()> {
        let ttl = Duration::from_secs(ttl_seconds.max(1));
        let expires_at = Some(Instant::now() + ttl);
        self.data.lock().insert(key.to_string(), Entry { value, expires_at });
        debug!(key = %key, ttl_secs = ttl.as_secs(), "cached key in memory");
        Ok(())
    }

    async fn set_persistent(&self, key: &str, value: Vec<u8>) -> CacheResult<()> {
        self.data.lock().insert(
            key.to_string(),
            Entry {
                value,
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.data.lock().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut data = self.data.lock();
        match data.get(key) {
            None => Ok(false),
            Some(entry) if entry.is_expired() => {
                data.remove(key);
                Ok(false)
            }
            Some(_) => Ok(true),
        }
    }

    fn name(&self) -> &'static str {
        "InMemory"
    }
}
