//! Verifies the full per-query timeline emission order, including the
//! engine/analysis-owned substeps that are collaborator-emitted but
//! orchestrator-routed.

mod common;

use std::sync::Arc;

use common::{base_config, build_app_state, StubEngine};
use search_orchestration_core::orchestrator::{SearchRequestOptions, SearchResponse};
use serde_json::Value;

#[tokio::test]
async fn fresh_search_emits_the_full_step_sequence_in_order() {
    let state = build_app_state(base_config(), Arc::new(StubEngine::single("ASIN-1")));

    let options = SearchRequestOptions {
        query_hash: Some("hash-order".to_string()),
        ..Default::default()
    };

    state
        .orchestrator
        .search_products::<fn(&SearchResponse, &Value) -> futures_util::future::BoxFuture<'static, ()>>(
            "smart speaker",
            options,
            None,
        )
        .await
        .unwrap();

    let events = state.timeline.read("hash-order", None).await;
    let steps: Vec<&str> = events.iter().map(|e| e.step.as_str()).collect();

    // Cache is disabled for this fixture, so no `response.cached` step; the
    // engine/pipeline substeps are interleaved between their bracketing
    // `*.started`/`*.completed` events.
    assert_eq!(
        steps,
        vec![
            "search.cache.miss",
            "search.engine.started",
            "search.bq.started",
            "search.bq.completed",
            "search.reviews.selected",
            "search.engine.candidates",
            "rag.pipeline.started",
            "rag.product.analysis",
            "rag.pipeline.completed",
            "response.completed",
        ]
    );
}

#[tokio::test]
async fn cache_hit_short_circuits_straight_to_completion() {
    let config = search_orchestration_core::config::Config { enable_cache: true, ..base_config() };
    let state = build_app_state(config, Arc::new(StubEngine::single("ASIN-1")));

    let options = || SearchRequestOptions { query_hash: Some("hash-cache".to_string()), ..Default::default() };

    state
        .orchestrator
        .search_products::<fn(&SearchResponse, &Value) -> futures_util::future::BoxFuture<'static, ()>>(
            "smart speaker",
            options(),
            None,
        )
        .await
        .unwrap();
    state.timeline.clear("hash-cache").await;

    state
        .orchestrator
        .search_products::<fn(&SearchResponse, &Value) -> futures_util::future::BoxFuture<'static, ()>>(
            "smart speaker",
            options(),
            None,
        )
        .await
        .unwrap();

    let events = state.timeline.read("hash-cache", None).await;
    let steps: Vec<&str> = events.iter().map(|e| e.step.as_str()).collect();
    assert_eq!(steps, vec!["search.cache.hit", "response.completed"]);
}
