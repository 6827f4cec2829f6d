//! Shared integration-test fixtures.
//!
//! Shared setup/cleanup helpers for integration tests. This core's external
//! collaborators (search engine, RAG pipeline) are just traits rather than
//! a real backend, so the fixtures here are in-process stubs instead of a
//! live Redis connection.

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use search_orchestration_core::config::Config;
use search_orchestration_core::error::OrchestratorResult;
use search_orchestration_core::http::auth::AuthContext;
use search_orchestration_core::http::AppState;
use search_orchestration_core::jobs::JobRegistry;
use search_orchestration_core::orchestrator::{
    ProductAnalysis, RagPipeline, SearchCandidate, SearchEngine, SearchOrchestrator, TimelineEmit,
};
use search_orchestration_core::response_cache::ResponseCache;
use search_orchestration_core::timeline::TimelineBus;
use serde_json::json;

/// A single in-memory candidate, returned verbatim by [`StubEngine`].
pub fn sample_candidate(asin: &str) -> SearchCandidate {
    SearchCandidate {
        asin: asin.to_string(),
        product_title: "Smart Speaker".to_string(),
        cleaned_item_description: "A voice-controlled speaker".to_string(),
        product_categories: "Electronics > Audio".to_string(),
        similarity: Some(0.91),
        avg_rating: Some(4.5),
        rating_count: Some(1200),
        displayed_rating: Some("4.5".to_string()),
        combined_score: Some(0.88),
        reviews: vec![],
    }
}

/// Search engine stub that returns a fixed candidate list and emits its own
/// `search.bq.*` substeps, matching the original's engine-owned telemetry.
pub struct StubEngine {
    pub candidates: Vec<SearchCandidate>,
}

impl StubEngine {
    pub fn single(asin: &str) -> Self {
        Self { candidates: vec![sample_candidate(asin)] }
    }
}

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
        emit("search.bq.completed", json!({"result_count": self.candidates.len()})).await;
        emit("search.reviews.selected", json!({"reviews_per_product": 3})).await;
        Ok(self.candidates.clone())
    }
}

/// RAG pipeline stub that attaches an empty analysis to every candidate.
pub struct StubPipeline;

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
        let mut analyses = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            emit("rag.product.analysis", json!({"asin": candidate.asin})).await;
            analyses.push(ProductAnalysis { asin: candidate.asin.clone(), extra: serde_json::Map::new() });
        }
        Ok(analyses)
    }
}

/// A `Config` with cache disabled and every other field at its documented
/// default, for tests that don't exercise caching.
pub fn base_config() -> Config {
    Config {
        enable_cache: false,
        cache_ttl_default: 3600,
        guest_cache_ttl: 86_400,
        enable_guest_hashed_queries: false,
        cache_fail_open: true,
        cache_schema_version: 1,
        cache_max_payload_bytes: 1_048_576,
        cache_namespace: None,
        cache_redis_url: None,
        rag_batching_enabled: true,
        rag_batch_size: 3,
    }
}

/// Build a fully wired `AppState` over in-memory collaborators: a single
/// candidate search engine, a pass-through RAG pipeline, an in-memory
/// response cache (when `enable_cache`), and an in-memory timeline/job
/// registry.
pub fn build_app_state(config: Config, engine: Arc<dyn SearchEngine>) -> AppState {
    let config = Arc::new(config);
    let response_cache = if config.enable_cache {
        use search_orchestration_core::cache::InMemoryCacheAdapter;
        Some(Arc::new(ResponseCache::new(
            Arc::new(InMemoryCacheAdapter::new()),
            config.cache_fail_open,
            config.cache_max_payload_bytes,
            config.guest_cache_ttl,
        )))
    } else {
        None
    };

    let timeline = Arc::new(TimelineBus::in_memory());
    let jobs = Arc::new(JobRegistry::new());
    let orchestrator = Arc::new(SearchOrchestrator::new(
        engine,
        Some(Arc::new(StubPipeline)),
        response_cache.clone(),
        timeline.clone(),
        config.cache_ttl_default,
        config.cache_schema_version,
    ));

    AppState { config, orchestrator, jobs, timeline, response_cache }
}

pub fn router(state: AppState) -> Router {
    search_orchestration_core::http::build_router(state)
}

pub fn member_auth(subject: &str) -> AuthContext {
    AuthContext { subject: subject.to_string(), role: "member".to_string() }
}

pub fn guest_auth(subject: &str) -> AuthContext {
    AuthContext { subject: subject.to_string(), role: "guest".to_string() }
}

pub fn admin_auth(subject: &str) -> AuthContext {
    AuthContext { subject: subject.to_string(), role: "admin".to_string() }
}
