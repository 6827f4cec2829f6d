//! Verifies the guest precomputed/canonical short-circuit (C6 lookup
//! precedence, exercised end-to-end through C8's submit/poll endpoints and
//! C7's `complete_precomputed` path) instead of only at the unit level.

mod common;

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use common::{build_app_state, guest_auth, router, StubEngine};
use search_orchestration_core::config::Config;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), 1_024 * 1_024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn guest_friendly_config() -> Config {
    Config {
        enable_cache: true,
        cache_ttl_default: 3600,
        guest_cache_ttl: 86_400,
        enable_guest_hashed_queries: true,
        cache_fail_open: true,
        cache_schema_version: 1,
        cache_max_payload_bytes: 1_048_576,
        cache_namespace: None,
        cache_redis_url: None,
        rag_batching_enabled: true,
        rag_batch_size: 3,
    }
}

#[tokio::test]
async fn precomputed_entry_is_served_without_touching_the_search_engine() {
    let state = build_app_state(guest_friendly_config(), Arc::new(StubEngine::single("ASIN-NEVER-CALLED")));

    // Seed the precomputed tier directly, bypassing the search engine
    // entirely — this is the guest catalogue an admin would have uploaded.
    let cache = state.response_cache.as_ref().unwrap();
    let canned = json!({"query": "smart speaker", "count": 1, "results": [{
        "asin": "ASIN-CANNED",
        "product_title": "Canned Speaker",
        "cleaned_item_description": "pre-baked",
        "product_categories": "Electronics",
    }]});
    cache.store_precomputed("guest-slug", "smart speaker", &canned, None).await.unwrap();

    let app = router(state);

    let mut submit = Request::builder()
        .method("POST")
        .uri("/search")
        .header("content-type", "application/json")
        .body(Body::from(json!({"query": "smart speaker"}).to_string()))
        .unwrap();
    submit.extensions_mut().insert(guest_auth("guest-1"));
    let response = app.clone().oneshot(submit).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let accepted = body_json(response).await;
    let query_hash = accepted["query_hash"].as_str().unwrap().to_string();

    let mut result = None;
    for _ in 0..50 {
        let mut poll = Request::builder().method("GET").uri(format!("/search/result/{query_hash}")).body(Body::empty()).unwrap();
        poll.extensions_mut().insert(guest_auth("guest-1"));
        let response = app.clone().oneshot(poll).await.unwrap();
        if response.status() == StatusCode::OK {
            result = Some(body_json(response).await);
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    let result = result.expect("precomputed search job did not complete in time");
    assert_eq!(result["result"]["results"][0]["asin"], json!("ASIN-CANNED"));
}
