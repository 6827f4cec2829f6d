//! Search orchestrator.
//!
//! Grounded line-for-line on
//! `backend/app/core/search_service.py::SearchService.search_products`: a
//! single method that drives cache lookup, the search engine, the RAG
//! pipeline, and response caching, emitting one timeline event at each step.
//! `SearchEngine` and `RagPipeline` are external collaborators the
//! orchestrator depends on as traits — the search/RAG implementations
//! themselves are out of scope for this crate.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{error, info};

use crate::codec::build_response_cache_key;
use crate::error::OrchestratorResult;
use crate::response_cache::{CacheOutcome, ResponseCache};
use crate::scrubber::ScrubberSettings;
use crate::timeline::TimelineBus;

/// A single product review, carried opaquely end-to-end.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductReview {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_purchase: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_rating: Option<i32>,
}

/// Opaque per-product LLM analysis. Generating this is out of scope; the
/// orchestrator only threads it through from the RAG pipeline to the
/// response by matching `asin`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductAnalysis {
    pub asin: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductSearchResult {
    pub asin: String,
    pub product_title: String,
    pub cleaned_item_description: String,
    pub product_categories: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_rating: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub displayed_rating: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combined_score: Option<f64>,
    #[serde(default)]
    pub reviews: Vec<ProductReview>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<ProductAnalysis>,
}

/// The response object carried end-to-end: from the RAG pipeline, through
/// the cache, to the HTTP client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResponse {
    pub query: String,
    pub count: usize,
    pub results: Vec<ProductSearchResult>,
}

/// A candidate product as produced by the search engine, before RAG
/// analysis is attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchCandidate {
    pub asin: String,
    pub product_title: String,
    pub cleaned_item_description: String,
    pub product_categories: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_rating: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub displayed_rating: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combined_score: Option<f64>,
    #[serde(default)]
    pub reviews: Vec<ProductReview>,
}

/// Callback invoked once per timeline step with the step name and a
/// scrubbed JSON payload. Implemented by the orchestrator itself when
/// driving [`TimelineBus::publish`]; exposed to collaborators so the search
/// engine and RAG pipeline can emit their own intermediate events.
pub type TimelineEmit<'a> = dyn Fn(&str, Value) -> futures_util::future::BoxFuture<'a, ()> + Send + Sync + 'a;

/// The hybrid search engine collaborator. Implementations rank and fetch
/// candidate products; the algorithm itself is out of scope for this core.
/// `emit` lets the engine publish its own timeline substeps (e.g.
/// `search.bq.started`, `search.reviews.selected`) interleaved with the
/// orchestrator's own events, matching the original's "engine provides
/// payload shape; orchestrator is pass-through" step.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    async fn hybrid_search(
        &self,
        query: &str,
        products_k: u32,
        reviews_per_product: u32,
        emit: &TimelineEmit<'_>,
    ) -> OrchestratorResult<Vec<SearchCandidate>>;
}

/// The RAG explanation pipeline collaborator. `emit` lets the pipeline
/// publish per-product `rag.product.analysis` substeps as it goes.
#[async_trait]
pub trait RagPipeline: Send + Sync {
    fn batching_enabled(&self) -> bool;
    fn default_chunk_size(&self) -> u32;

    async fn generate_batch_explanations(
        &self,
        query: &str,
        candidates: &[SearchCandidate],
        emit: &TimelineEmit<'_>,
    ) -> OrchestratorResult<Vec<ProductAnalysis>>;
}

/// Scope of a search request, controlling which TTL and cache namespace
/// apply (mirrors `cache_scope` in the original).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheScope {
    Response,
    Guest,
}

impl CacheScope {
    fn as_str(self) -> &'static str {
        match self {
            CacheScope::Response => "response",
            CacheScope::Guest => "guest",
        }
    }
}

pub struct SearchRequestOptions {
    pub query_hash: Option<String>,
    pub products_k: u32,
    pub reviews_per_product: u32,
    pub cache_ttl: Option<u64>,
    pub fingerprint_extra: Option<serde_json::Map<String, Value>>,
    pub cache_scope: CacheScope,
    pub bypass_cache: bool,
}

impl Default for SearchRequestOptions {
    fn default() -> Self {
        Self {
            query_hash: None,
            products_k: 3,
            reviews_per_product: 3,
            cache_ttl: None,
            fingerprint_extra: None,
            cache_scope: CacheScope::Response,
            bypass_cache: false,
        }
    }
}

/// Drives the full search pipeline: cache lookup, search engine, RAG
/// pipeline, response caching, with a timeline event emitted at each step.
pub struct SearchOrchestrator {
    search_engine: Arc<dyn SearchEngine>,
    rag_pipeline: Option<Arc<dyn RagPipeline>>,
    response_cache: Option<Arc<ResponseCache>>,
    timeline: Arc<TimelineBus>,
    timeline_scrubber: ScrubberSettings,
    cache_enabled: bool,
    default_ttl: u64,
    schema_version: u32,
}

impl SearchOrchestrator {
    pub fn new(
        search_engine: Arc<dyn SearchEngine>,
        rag_pipeline: Option<Arc<dyn RagPipeline>>,
        response_cache: Option<Arc<ResponseCache>>,
        timeline: Arc<TimelineBus>,
        default_ttl: u64,
        schema_version: u32,
    ) -> Self {
        let cache_enabled = response_cache.is_some();
        Self {
            search_engine,
            rag_pipeline,
            response_cache,
            timeline,
            timeline_scrubber: crate::scrubber::default_timeline_scrubber(),
            cache_enabled,
            default_ttl: default_ttl.max(1),
            schema_version: schema_version.max(1),
        }
    }

    async fn emit(&self, query_hash: Option<&str>, step: &str, payload: Value) {
        let Some(query_hash) = query_hash else { return };
        self.timeline.publish(query_hash, step, &payload, &self.timeline_scrubber).await;
    }

    /// Run the full search pipeline. `on_before_response_completed` fires
    /// after the response is fully built (cache hit or fresh computation)
    /// but before the `response.completed` timeline event, so a caller
    /// (e.g. the job registry) can record the result before any client can
    /// observe completion via the timeline stream.
    pub async fn search_products<F>(
        &self,
        query: &str,
        options: SearchRequestOptions,
        on_before_response_completed: Option<F>,
    ) -> OrchestratorResult<SearchResponse>
    where
        F: Fn(&SearchResponse, &Value) -> futures_util::future::BoxFuture<'static, ()> + Send + Sync,
    {
        info!(query = %query, "starting search");
        let pipeline = self
            .rag_pipeline
            .as_ref()
            .ok_or(crate::error::OrchestratorError::PipelineNotConfigured)?
            .clone();

        let query_hash = options.query_hash.as_deref();
        let cache_key = build_response_cache_key(
            self.schema_version,
            query,
            options.products_k,
            options.reviews_per_product,
            options.fingerprint_extra.as_ref().map(|m| m.clone().into_iter().collect()).as_ref(),
        );

        let mut cache_event = serde_json::Map::new();
        cache_event.insert("cache_key".into(), json!(cache_key));
        cache_event.insert("scope".into(), json!(options.cache_scope.as_str()));
        cache_event.insert("bypass_cache".into(), json!(options.bypass_cache));
        cache_event.insert("cache_enabled".into(), json!(self.cache_enabled));

        let mut cache_step = "search.cache.miss";
        let mut cached: Option<SearchResponse> = None;

        if self.cache_enabled && !options.bypass_cache {
            if let Some(cache) = &self.response_cache {
                match cache.get_response(&cache_key).await {
                    CacheOutcome::Hit(value) => match serde_json::from_value::<SearchResponse>(value) {
                        Ok(response) => {
                            cached = Some(response);
                            cache_step = "search.cache.hit";
                        }
                        Err(_) => {
                            cache_event.insert("reason".into(), json!("not_found"));
                        }
                    },
                    CacheOutcome::Miss => {
                        cache_event.insert("reason".into(), json!("not_found"));
                    }
                    CacheOutcome::Error(e) => {
                        return Err(crate::error::OrchestratorError::Cache(crate::error::CacheError::Backend(e)));
                    }
                }
            }
        } else {
            let reason = if options.bypass_cache { "bypass" } else { "disabled" };
            cache_event.insert("reason".into(), json!(reason));
        }

        self.emit(query_hash, cache_step, Value::Object(cache_event)).await;

        if let Some(cached) = cached {
            let summary = self.summarize_response(&cached, "cache", options.cache_scope, &cache_key);
            if let Some(hook) = &on_before_response_completed {
                hook(&cached, &summary).await;
            }
            self.emit(query_hash, "response.completed", summary).await;
            return Ok(cached);
        }

        self.emit(
            query_hash,
            "search.engine.started",
            json!({
                "query": query,
                "products_k": options.products_k,
                "reviews_per_product": options.reviews_per_product,
                "fingerprint_extra": options.fingerprint_extra.clone().unwrap_or_default(),
                "cache_scope": options.cache_scope.as_str(),
            }),
        )
        .await;

        let engine_emit = |step: &str, payload: Value| -> futures_util::future::BoxFuture<'_, ()> {
            Box::pin(self.emit(query_hash, step, payload))
        };
        let candidates = self
            .search_engine
            .hybrid_search(query, options.products_k, options.reviews_per_product, &engine_emit)
            .await
            .map_err(|e| {
                error!(query = %query, error = %e, "search engine lookup failed");
                e
            })?;

        self.emit(
            query_hash,
            "search.engine.candidates",
            json!({
                "result_count": candidates.len(),
                "top_candidates": summarize_candidates(&candidates, 5),
            }),
        )
        .await;

        self.emit(
            query_hash,
            "rag.pipeline.started",
            json!({
                "product_count": candidates.len(),
                "batching_enabled": pipeline.batching_enabled(),
                "default_chunk_size": pipeline.default_chunk_size(),
            }),
        )
        .await;

        let pipeline_emit = |step: &str, payload: Value| -> futures_util::future::BoxFuture<'_, ()> {
            Box::pin(self.emit(query_hash, step, payload))
        };
        let analyses = pipeline
            .generate_batch_explanations(query, &candidates, &pipeline_emit)
            .await
            .map_err(|e| {
                error!(query = %query, error = %e, "rag pipeline execution failed");
                e
            })?;

        self.emit(
            query_hash,
            "rag.pipeline.completed",
            json!({
                "analysis_count": analyses.len(),
                "product_count": candidates.len(),
            }),
        )
        .await;

        let response = build_response(query, candidates, analyses);
        let ttl = options.cache_ttl.filter(|t| *t > 0).unwrap_or(self.default_ttl);

        let mut cached_stored = false;
        if let Some(cache) = &self.response_cache {
            if let Ok(value) = serde_json::to_value(&response) {
                cached_stored = cache.store_response(&cache_key, &value, ttl).await;
            }
        }
        if cached_stored {
            self.emit(
                query_hash,
                "response.cached",
                json!({"cache_key": cache_key, "ttl_seconds": ttl, "scope": options.cache_scope.as_str()}),
            )
            .await;
        }

        let summary = self.summarize_response(&response, "search", options.cache_scope, &cache_key);
        if let Some(hook) = &on_before_response_completed {
            hook(&response, &summary).await;
        }
        self.emit(query_hash, "response.completed", summary).await;

        info!(query = %query, count = response.count, "search completed");
        Ok(response)
    }

    /// Short-circuit the pipeline with an already-known response (the guest
    /// precomputed/canonical catalogue). Emits `response.cached` then
    /// `response.completed` around the same `on_before_response_completed`
    /// hook as [`Self::search_products`], so a caller can still record job
    /// completion before the timeline reports it done.
    pub async fn complete_precomputed<F>(
        &self,
        query_hash: Option<&str>,
        query: &str,
        options: &SearchRequestOptions,
        precomputed: Value,
        on_before_response_completed: Option<F>,
    ) -> OrchestratorResult<SearchResponse>
    where
        F: Fn(&SearchResponse, &Value) -> futures_util::future::BoxFuture<'static, ()> + Send + Sync,
    {
        let response: SearchResponse = serde_json::from_value(precomputed)
            .map_err(|e| crate::error::OrchestratorError::Cache(crate::error::CacheError::Decode(e.to_string())))?;

        let cache_key = build_response_cache_key(
            self.schema_version,
            query,
            options.products_k,
            options.reviews_per_product,
            options.fingerprint_extra.as_ref().map(|m| m.clone().into_iter().collect()).as_ref(),
        );

        self.emit(
            query_hash,
            "response.cached",
            json!({
                "source": "precomputed",
                "query": query,
                "products_k": options.products_k,
                "reviews_per_product": options.reviews_per_product,
            }),
        )
        .await;

        let summary = self.summarize_response(&response, "precomputed", options.cache_scope, &cache_key);
        if let Some(hook) = &on_before_response_completed {
            hook(&response, &summary).await;
        }
        self.emit(query_hash, "response.completed", summary).await;

        Ok(response)
    }

    fn summarize_response(&self, response: &SearchResponse, source: &str, scope: CacheScope, cache_key: &str) -> Value {
        let top_results: Vec<Value> = response
            .results
            .iter()
            .take(5)
            .map(|item| {
                json!({
                    "asin": item.asin,
                    "title": item.product_title,
                    "combined_score": item.combined_score,
                    "similarity": item.similarity,
                })
            })
            .collect();

        let response_summary: Vec<Value> = response
            .results
            .iter()
            .take(5)
            .map(|item| json!({"asin": item.asin, "analysis_present": item.analysis.is_some()}))
            .collect();

        let response_hash = serde_json::to_string(response)
            .map(|serialized| {
                let mut hasher = Sha256::new();
                hasher.update(serialized.as_bytes());
                hasher.finalize().iter().map(|b| format!("{b:02x}")).collect::<String>()
            })
            .unwrap_or_else(|_| "unknown".to_string());

        json!({
            "source": source,
            "cache_scope": scope.as_str(),
            "cache_key": cache_key,
            "result_count": response.count,
            "top_results": top_results,
            "response": {"count": response.count, "results": response_summary},
            "response_hash": response_hash,
        })
    }
}

fn summarize_candidates(candidates: &[SearchCandidate], limit: usize) -> Vec<Value> {
    candidates
        .iter()
        .take(limit)
        .map(|product| {
            json!({
                "asin": product.asin,
                "title": product.product_title,
                "similarity": product.similarity,
                "combined_score": product.combined_score,
                "avg_rating": product.avg_rating,
                "rating_count": product.rating_count,
                "review_count": product.reviews.len(),
            })
        })
        .collect()
}

fn build_response(query: &str, candidates: Vec<SearchCandidate>, analyses: Vec<ProductAnalysis>) -> SearchResponse {
    let mut analysis_by_asin: std::collections::HashMap<String, ProductAnalysis> =
        analyses.into_iter().map(|a| (a.asin.clone(), a)).collect();

    let results: Vec<ProductSearchResult> = candidates
        .into_iter()
        .map(|candidate| ProductSearchResult {
            analysis: analysis_by_asin.remove(&candidate.asin),
            asin: candidate.asin,
            product_title: candidate.product_title,
            cleaned_item_description: candidate.cleaned_item_description,
            product_categories: candidate.product_categories,
            similarity: candidate.similarity,
            avg_rating: candidate.avg_rating,
            rating_count: candidate.rating_count,
            displayed_rating: candidate.displayed_rating,
            combined_score: candidate.combined_score,
            reviews: candidate.reviews,
        })
        .collect();

    SearchResponse {
        query: query.to_string(),
        count: results.len(),
        results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::InMemoryCacheAdapter;
    use async_trait::async_trait;

    struct StubEngine;

    #[async_trait]
    impl SearchEngine for StubEngine {
        async fn hybrid_search(
            &self,
            _query: &str,
            _products_k: u32,
            _reviews_per_product: u32,
            emit: &TimelineEmit<'_>,
        ) -> OrchestratorResult<Vec<SearchCandidate>> {
            emit("search.bq.started", json!({})).await;
            emit("search.bq.completed", json!({"result_count": 1})).await;
            Ok(vec![SearchCandidate {
                asin: "B000000001".to_string(),
                product_title: "Smart Speaker".to_string(),
                cleaned_item_description: "A speaker".to_string(),
                product_categories: "Electronics".to_string(),
                similarity: Some(0.9),
                avg_rating: Some(4.5),
                rating_count: Some(100),
                displayed_rating: Some("4.5".to_string()),
                combined_score: Some(0.95),
                reviews: vec![],
            }])
        }
    }

    struct StubPipeline;

    #[async_trait]
    impl RagPipeline for StubPipeline {
        fn batching_enabled(&self) -> bool {
            true
        }
        fn default_chunk_size(&self) -> u32 {
            3
        }
        async fn generate_batch_explanations(
            &self,
            _query: &str,
            candidates: &[SearchCandidate],
            emit: &TimelineEmit<'_>,
        ) -> OrchestratorResult<Vec<ProductAnalysis>> {
            for c in candidates {
                emit("rag.product.analysis", json!({"asin": c.asin})).await;
            }
            Ok(candidates
                .iter()
                .map(|c| ProductAnalysis { asin: c.asin.clone(), extra: serde_json::Map::new() })
                .collect())
        }
    }

    fn orchestrator(with_cache: bool) -> SearchOrchestrator {
        let response_cache = if with_cache {
            Some(Arc::new(ResponseCache::new(Arc::new(InMemoryCacheAdapter::new()), true, 1_048_576, 86_400)))
        } else {
            None
        };
        SearchOrchestrator::new(
            Arc::new(StubEngine),
            Some(Arc::new(StubPipeline)),
            response_cache,
            Arc::new(TimelineBus::in_memory()),
            3600,
            1,
        )
    }

    #[tokio::test]
    async fn search_products_builds_response_from_engine_and_pipeline() {
        let orchestrator = orchestrator(false);
        let response = orchestrator
            .search_products::<fn(&SearchResponse, &Value) -> futures_util::future::BoxFuture<'static, ()>>(
                "smart speaker",
                SearchRequestOptions::default(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(response.count, 1);
        assert_eq!(response.results[0].asin, "B000000001");
        assert!(response.results[0].analysis.is_some());
    }

    #[tokio::test]
    async fn search_products_fails_without_pipeline_configured() {
        let orchestrator = SearchOrchestrator::new(
            Arc::new(StubEngine),
            None,
            None,
            Arc::new(TimelineBus::in_memory()),
            3600,
            1,
        );
        let result = orchestrator
            .search_products::<fn(&SearchResponse, &Value) -> futures_util::future::BoxFuture<'static, ()>>(
                "smart speaker",
                SearchRequestOptions::default(),
                None,
            )
            .await;
        assert!(matches!(result, Err(crate::error::OrchestratorError::PipelineNotConfigured)));
    }

    #[tokio::test]
    async fn second_search_is_served_from_cache() {
        let orchestrator = orchestrator(true);
        let options = SearchRequestOptions { query_hash: Some("hash1".to_string()), ..Default::default() };
        let first = orchestrator
            .search_products::<fn(&SearchResponse, &Value) -> futures_util::future::BoxFuture<'static, ()>>(
                "smart speaker",
                SearchRequestOptions { query_hash: Some("hash1".to_string()), ..Default::default() },
                None,
            )
            .await
            .unwrap();
        let _ = options;
        let events_after_first = orchestrator.timeline.read("hash1", None).await;
        assert!(events_after_first.iter().any(|e| e.step == "search.cache.miss"));

        let second = orchestrator
            .search_products::<fn(&SearchResponse, &Value) -> futures_util::future::BoxFuture<'static, ()>>(
                "smart speaker",
                SearchRequestOptions { query_hash: Some("hash1".to_string()), ..Default::default() },
                None,
            )
            .await
            .unwrap();
        assert_eq!(first, second);

        let events_after_second = orchestrator.timeline.read("hash1", None).await;
        assert!(events_after_second.iter().any(|e| e.step == "search.cache.hit"));
    }
}
