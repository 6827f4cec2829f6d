//! Pluggable cache backend.
//!
//! Grounded on `backend/app/cache/adapters.py::BaseCacheAdapter` and its
//! three concrete subclasses, and on the shape of `traits::CacheBackend`
//! (`#[async_trait]`, byte-oriented, consumed as
//! `Arc<dyn Trait>`). Unlike that trait, ours exposes `set`,
//! `set_persistent`, `delete` and `exists` directly rather than a single
//! `set_with_ttl` plus separate `remove`/`health_check`, because the
//! orchestration core needs the persistent-write distinction between
//! TTL-bounded precomputed entries and TTL-less canonical entries (see
//! `response_cache.rs`).

pub mod memory;
#[cfg(feature = "redis-store")]
pub mod redis_store;
pub mod rest_kv;

use async_trait::async_trait;

use crate::error::CacheResult;

pub use memory::InMemoryCacheAdapter;
pub use rest_kv::RestKvCacheAdapter;

#[cfg(feature = "redis-store")]
pub use redis_store::RedisCacheAdapter;

/// A byte-oriented key/value cache backend.
///
/// Implementors are consumed as `Arc<dyn CacheAdapter>` so the orchestrator
/// can swap backends (in-memory, REST KV, Redis) without generic parameters
/// leaking through every caller.
#[async_trait]
pub trait CacheAdapter: Send + Sync {
    /// Fetch the raw bytes stored at `key`, or `None` on miss or expiry.
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Store `value` at `key` with a TTL, clamped to a minimum of one
    /// second (mirrors every adapter in `cache/adapters.py`).
    async fn set(&self, key: &str, value: Vec<u8>, ttl_seconds: u64) -> CacheResult<()>;

    /// Store `value` at `key` with no expiry. Used for the canonical index
    /// and canonical payload tiers, which are admin-curated rather than
    /// TTL-bounded.
    async fn set_persistent(&self, key: &str, value: Vec<u8>) -> CacheResult<()>;

    async fn delete(&self, key: &str) -> CacheResult<()>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Backend name for logging and health reporting.
    fn name(&self) -> &'static str;
}
