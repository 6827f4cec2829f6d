//! Multi-tier response cache.
//!
//! Grounded on the cache-shaped methods of
//! `backend/app/core/search_service.py::SearchService`
//! (`_get_cached_response`, `_store_cached_response`,
//! `get_precomputed_response`, `store_precomputed_response`,
//! `store_canonical_response`, `delete_precomputed_response`,
//! `list_precomputed_responses`, and the private index helpers).
//!
//! Operates on opaque `serde_json::Value` payloads — the codec round-trips
//! responses bit-identically without inspecting their shape, matching
//! `cache_utils.serialize_payload`/`deserialize_payload`'s contract. The
//! orchestrator is responsible for converting to/from the typed
//! `SearchResponse`.
//!
//! Canonical is checked before precomputed in [`ResponseCache::get_precomputed`],
//! and the two tiers are never collapsed (see `DESIGN.md` for the
//! precedence rationale).

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::CacheAdapter;
use crate::codec::{
    build_canonical_index_key, build_canonical_payload_key, build_canonical_query_key,
    build_precomputed_index_key, build_precomputed_payload_key, build_precomputed_query_key,
    canonicalize_query, deserialize_payload, serialize_payload,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexEntry {
    pub query: String,
    pub hash: String,
}

pub type Index = BTreeMap<String, IndexEntry>;

/// Wraps a [`CacheAdapter`] with the precomputed/canonical tier logic and
/// fail-open/fail-closed error handling driven by `cache_fail_open`.
pub struct ResponseCache {
    adapter: Arc<dyn CacheAdapter>,
    fail_open: bool,
    max_payload_bytes: usize,
    guest_cache_ttl: u64,
}

impl ResponseCache {
    pub fn new(adapter: Arc<dyn CacheAdapter>, fail_open: bool, max_payload_bytes: usize, guest_cache_ttl: u64) -> Self {
        Self {
            adapter,
            fail_open,
            max_payload_bytes: max_payload_bytes.max(1),
            guest_cache_ttl: guest_cache_ttl.max(1),
        }
    }

    /// Fetch and deserialize a per-request response cache entry.
    pub async fn get_response(&self, cache_key: &str) -> CacheOutcome<Value> {
        let blob = match self.adapter.get(cache_key).await {
            Ok(Some(blob)) => blob,
            Ok(None) => return CacheOutcome::Miss,
            Err(e) => {
                warn!(key = %cache_key, error = %e, "cache get failed");
                return self.miss_or_propagate(e.to_string());
            }
        };

        match deserialize_payload::<Value>(&blob) {
            Ok(value) => CacheOutcome::Hit(value),
            Err(e) => {
                warn!(key = %cache_key, error = %e, "failed to decode cached payload");
                self.miss_or_propagate(e.to_string())
            }
        }
    }

    /// Store a per-request response cache entry. Silently skips the write
    /// (returning `false`) if the serialized payload exceeds
    /// `max_payload_bytes`, matching the original's size guard.
    pub async fn store_response(&self, cache_key: &str, response: &Value, ttl_seconds: u64) -> bool {
        let Ok(blob) = serialize_payload(response) else {
            warn!(key = %cache_key, "failed to serialize response for caching");
            return false;
        };
        if blob.len() > self.max_payload_bytes {
            debug!(key = %cache_key, size = blob.len(), limit = self.max_payload_bytes, "skipping cache store, payload too large");
            return false;
        }
        match self.adapter.set(cache_key, blob, ttl_seconds).await {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %cache_key, error = %e, "cache set failed");
                false
            }
        }
    }

    /// Look up a precomputed (guest) response for `query`, checking the
    /// canonical tier first and falling back to the TTL-bounded precomputed
    /// tier. A backend error under fail-closed configuration propagates as
    /// [`CacheOutcome::Error`] instead of being swallowed as a miss.
    pub async fn get_precomputed(&self, query: &str) -> CacheOutcome<Value> {
        match self.lookup_canonical(query).await {
            CacheOutcome::Miss => self.lookup_precomputed(query).await,
            other => other,
        }
    }

    async fn lookup_canonical(&self, query: &str) -> CacheOutcome<Value> {
        let canonical_query = canonicalize_query(query);
        let slug_key = build_canonical_query_key(&canonical_query);
        let slug = match self.get_bytes_as_text(&slug_key).await {
            Ok(Some(slug)) if !slug.is_empty() => slug,
            Ok(_) => return CacheOutcome::Miss,
            Err(e) => return self.miss_or_propagate(e.to_string()),
        };

        let payload_key = build_canonical_payload_key(&slug);
        let blob = match self.adapter.get(&payload_key).await {
            Ok(Some(blob)) => blob,
            Ok(None) => return CacheOutcome::Miss,
            Err(e) => {
                warn!(key = %payload_key, error = %e, "cache get failed");
                return self.miss_or_propagate(e.to_string());
            }
        };
        match deserialize_payload::<Value>(&blob) {
            Ok(value) => CacheOutcome::Hit(value),
            Err(e) => {
                warn!(key = %payload_key, error = %e, "failed to decode canonical payload");
                self.miss_or_propagate(e.to_string())
            }
        }
    }

    async fn lookup_precomputed(&self, query: &str) -> CacheOutcome<Value> {
        let slug_key = build_precomputed_query_key(query);
        let slug = match self.get_bytes_as_text(&slug_key).await {
            Ok(Some(slug)) if !slug.is_empty() => slug,
            Ok(_) => return CacheOutcome::Miss,
            Err(e) => return self.miss_or_propagate(e.to_string()),
        };

        let payload_key = build_precomputed_payload_key(&slug);
        let blob = match self.adapter.get(&payload_key).await {
            Ok(Some(blob)) => blob,
            Ok(None) => return CacheOutcome::Miss,
            Err(e) => {
                warn!(key = %payload_key, error = %e, "cache get failed");
                return self.miss_or_propagate(e.to_string());
            }
        };
        match deserialize_payload::<Value>(&blob) {
            Ok(value) => CacheOutcome::Hit(value),
            Err(e) => {
                warn!(key = %payload_key, error = %e, "failed to decode precomputed payload");
                self.miss_or_propagate(e.to_string())
            }
        }
    }

    async fn get_bytes_as_text(&self, key: &str) -> crate::error::CacheResult<Option<String>> {
        match self.adapter.get(key).await {
            Ok(Some(bytes)) => Ok(String::from_utf8(bytes).ok().map(|s| s.trim().to_string())),
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(key = %key, error = %e, "cache get failed");
                Err(e)
            }
        }
    }

    /// Store a TTL-bounded precomputed response, updating the precomputed
    /// index.
    pub async fn store_precomputed(&self, slug: &str, query: &str, response: &Value, ttl_seconds: Option<u64>) -> crate::error::CacheResult<()> {
        let ttl = ttl_seconds.filter(|t| *t > 0).unwrap_or(self.guest_cache_ttl);
        let blob = serialize_payload(response).map_err(|e| crate::error::CacheError::Decode(e.to_string()))?;
        let payload_key = build_precomputed_payload_key(slug);
        self.adapter.set(&payload_key, blob, ttl).await?;

        let canonical_query = canonicalize_query(query);
        let slug_key = build_precomputed_query_key(&canonical_query);
        self.adapter.set(&slug_key, slug.as_bytes().to_vec(), ttl).await?;

        let mut index = self.load_precomputed_index().await;
        index.insert(slug.to_string(), IndexEntry { query: canonical_query, hash: slug_key });
        self.write_precomputed_index(&index, ttl).await?;
        Ok(())
    }

    /// Store a persistent canonical response, updating the canonical index.
    pub async fn store_canonical(&self, slug: &str, query: &str, response: &Value) -> crate::error::CacheResult<()> {
        let canonical_query = canonicalize_query(query);
        let payload_key = build_canonical_payload_key(slug);
        let blob = serialize_payload(response).map_err(|e| crate::error::CacheError::Decode(e.to_string()))?;
        self.adapter.set_persistent(&payload_key, blob).await?;

        let slug_key = build_canonical_query_key(&canonical_query);
        self.adapter.set_persistent(&slug_key, slug.as_bytes().to_vec()).await?;

        let mut index = self.load_canonical_index().await;
        index.insert(slug.to_string(), IndexEntry { query: canonical_query, hash: slug_key });
        self.write_canonical_index(&index).await?;
        Ok(())
    }

    /// Remove a precomputed/canonical entry by slug from both tiers and
    /// both indices.
    pub async fn delete_precomputed(&self, slug: &str, query: Option<&str>) -> bool {
        let mut index = self.load_precomputed_index().await;
        let mut canonical_index = self.load_canonical_index().await;

        let canonical_query = query
            .map(canonicalize_query)
            .or_else(|| canonical_index.get(slug).map(|e| e.query.clone()))
            .or_else(|| index.get(slug).map(|e| e.query.clone()));

        let _ = self.adapter.delete(&build_precomputed_payload_key(slug)).await;

        if let Some(ref canonical_query) = canonical_query {
            let _ = self.adapter.delete(&build_precomputed_query_key(canonical_query)).await;
            let _ = self.adapter.delete(&build_canonical_query_key(canonical_query)).await;
        }

        let _ = self.adapter.delete(&build_canonical_payload_key(slug)).await;

        if index.remove(slug).is_some() {
            let _ = self.write_precomputed_index(&index, self.guest_cache_ttl).await;
        }
        if canonical_index.remove(slug).is_some() {
            let _ = self.write_canonical_index(&canonical_index).await;
        }

        true
    }

    /// Combined view of both indices (canonical entries take precedence on
    /// slug collision, matching the original's `{**ttl_index, **canonical}`).
    pub async fn list_precomputed(&self) -> Index {
        let mut combined = self.load_precomputed_index().await;
        combined.extend(self.load_canonical_index().await);
        combined
    }

    async fn load_precomputed_index(&self) -> Index {
        self.load_index(&build_precomputed_index_key()).await
    }

    async fn load_canonical_index(&self) -> Index {
        self.load_index(&build_canonical_index_key()).await
    }

    async fn load_index(&self, key: &str) -> Index {
        let Ok(Some(blob)) = self.adapter.get(key).await else {
            return Index::new();
        };
        deserialize_payload::<Index>(&blob).unwrap_or_default()
    }

    async fn write_precomputed_index(&self, index: &Index, ttl: u64) -> crate::error::CacheResult<()> {
        let blob = serialize_payload(index).map_err(|e| crate::error::CacheError::Decode(e.to_string()))?;
        self.adapter.set(&build_precomputed_index_key(), blob, ttl.max(1)).await
    }

    async fn write_canonical_index(&self, index: &Index) -> crate::error::CacheResult<()> {
        let blob = serialize_payload(index).map_err(|e| crate::error::CacheError::Decode(e.to_string()))?;
        self.adapter.set_persistent(&build_canonical_index_key(), blob).await
    }

    /// Collapses a backend/decode failure to a clean miss when
    /// `fail_open`, otherwise propagates it as [`CacheOutcome::Error`].
    fn miss_or_propagate(&self, message: String) -> CacheOutcome<Value> {
        if self.fail_open {
            CacheOutcome::Miss
        } else {
            CacheOutcome::Error(message)
        }
    }
}

/// Result of a cache lookup that distinguishes a clean miss from an error
/// surfaced under fail-closed configuration.
#[derive(Debug, PartialEq)]
pub enum CacheOutcome<T> {
    Hit(T),
    Miss,
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::InMemoryCacheAdapter;
    use serde_json::json;

    fn response_cache(fail_open: bool) -> ResponseCache {
        ResponseCache::new(Arc::new(InMemoryCacheAdapter::new()), fail_open, 1_048_576, 86_400)
    }

    #[tokio::test]
    async fn store_then_get_response_round_trips() {
        let cache = response_cache(true);
        let response = json!({"query": "smart speaker", "count": 1, "results": []});
        assert!(cache.store_response("key1", &response, 60).await);
        match cache.get_response("key1").await {
            CacheOutcome::Hit(value) => assert_eq!(value, response),
            _ => panic!("expected hit"),
        }
    }

    #[tokio::test]
    async fn get_response_miss_on_unknown_key() {
        let cache = response_cache(true);
        assert!(matches!(cache.get_response("missing").await, CacheOutcome::Miss));
    }

    #[tokio::test]
    async fn oversized_payload_is_not_stored() {
        let cache = ResponseCache::new(Arc::new(InMemoryCacheAdapter::new()), true, 1, 86_400);
        let response = json!({"query": "smart speaker", "count": 1, "results": []});
        assert!(!cache.store_response("key1", &response, 60).await);
    }

    #[tokio::test]
    async fn precomputed_round_trips_and_is_listed() {
        let cache = response_cache(true);
        let response = json!({"query": "smart speaker", "count": 1, "results": []});
        cache.store_precomputed("slug1", "Smart Speaker", &response, None).await.unwrap();

        let found = cache.get_precomputed("smart speaker").await;
        assert_eq!(found, CacheOutcome::Hit(response));

        let index = cache.list_precomputed().await;
        assert!(index.contains_key("slug1"));
    }

    #[tokio::test]
    async fn canonical_takes_precedence_over_precomputed() {
        let cache = response_cache(true);
        let precomputed_response = json!({"query": "smart speaker", "count": 1, "results": []});
        let canonical_response = json!({"query": "smart speaker", "count": 2, "results": []});

        cache.store_precomputed("slug1", "smart speaker", &precomputed_response, None).await.unwrap();
        cache.store_canonical("slug1", "smart speaker", &canonical_response).await.unwrap();

        let found = cache.get_precomputed("smart speaker").await;
        assert_eq!(found, CacheOutcome::Hit(canonical_response));
    }

    #[tokio::test]
    async fn delete_precomputed_removes_entry_from_index() {
        let cache = response_cache(true);
        let response = json!({"query": "smart speaker", "count": 1, "results": []});
        cache.store_precomputed("slug1", "smart speaker", &response, None).await.unwrap();
        assert!(cache.delete_precomputed("slug1", Some("smart speaker")).await);

        let found = cache.get_precomputed("smart speaker").await;
        assert!(matches!(found, CacheOutcome::Miss));
        let index = cache.list_precomputed().await;
        assert!(!index.contains_key("slug1"));
    }

    /// A transport error that can't be confirmed as a real miss must not be
    /// silently swallowed when the deployment is configured fail-closed.
    #[tokio::test]
    async fn get_precomputed_propagates_error_when_fail_closed() {
        let cache = ResponseCache::new(Arc::new(FailingCacheAdapter), false, 1_048_576, 86_400);
        let outcome = cache.get_precomputed("smart speaker").await;
        assert!(matches!(outcome, CacheOutcome::Error(_)));
    }

    /// The same transport failure collapses to a clean miss under the
    /// fail-open default instead of bubbling up as an error.
    #[tokio::test]
    async fn get_precomputed_misses_when_fail_open() {
        let cache = ResponseCache::new(Arc::new(FailingCacheAdapter), true, 1_048_576, 86_400);
        let outcome = cache.get_precomputed("smart speaker").await;
        assert!(matches!(outcome, CacheOutcome::Miss));
    }

    struct FailingCacheAdapter;

    #[async_trait::async_trait]
    impl CacheAdapter for FailingCacheAdapter {
        async fn get(&self, _key: &str) -> crate::error::CacheResult<Option<Vec<u8>>> {
            Err(crate::error::CacheError::Backend("backend unavailable".into()))
        }

        async fn set(&self, _key: &str, _value: Vec<u8>, _ttl_seconds: u64) -> crate::error::CacheResult<()> {
            Err(crate::error::CacheError::Backend("backend unavailable".into()))
        }

        async fn set_persistent(&self, _key: &str, _value: Vec<u8>) -> crate::error::CacheResult<()> {
            Err(crate::error::CacheError::Backend("backend unavailable".into()))
        }

        async fn delete(&self, _key: &str) -> crate::error::CacheResult<()> {
            Err(crate::error::CacheError::Backend("backend unavailable".into()))
        }

        async fn exists(&self, _key: &str) -> crate::error::CacheResult<bool> {
            Err(crate::error::CacheError::Backend("backend unavailable".into()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }
}
