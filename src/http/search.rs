//! Search endpoints.
//!
//! Grounded line-for-line on `backend/app/api/search_endpoints.py`:
//! fingerprinting (`/search/init`), async job submission (`/search`), SSE
//! timeline replay (`/timeline/{query_hash}`), and job/result polling
//! (`/search/result/{query_hash}`). `BackgroundTasks.add_task` becomes
//! `tokio::spawn`; the generator-based SSE body becomes an
//! `async_stream::stream!` fed into `axum::response::Sse`.

use std::convert::Infallible;
use std::time::Duration;

use async_stream::stream;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::codec::{build_query_hash, canonicalize_query};
use crate::http::auth::RequireAuthenticatedUser;
use crate::http::state::AppState;
use crate::orchestrator::{CacheScope, SearchOrchestrator, SearchRequestOptions, SearchResponse};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
pub struct SearchInitRequest {
    pub query: String,
    #[serde(default = "default_products_k")]
    pub products_k: u32,
    #[serde(default = "default_reviews_per_product")]
    pub reviews_per_product: u32,
}

fn default_products_k() -> u32 {
    3
}

fn default_reviews_per_product() -> u32 {
    3
}

const PRODUCTS_K_RANGE: std::ops::RangeInclusive<u32> = 1..=50;
const REVIEWS_PER_PRODUCT_RANGE: std::ops::RangeInclusive<u32> = 0..=25;

/// Rejects `products_k`/`reviews_per_product` outside `[1,50]`/`[0,25]`,
/// matching the `Field(ge=.., le=..)` schema bounds these fields carry.
fn validate_search_bounds(products_k: u32, reviews_per_product: u32) -> Result<(), (StatusCode, Json<ErrorBody>)> {
    if !PRODUCTS_K_RANGE.contains(&products_k) {
        return Err(error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("products_k must be between {} and {}", PRODUCTS_K_RANGE.start(), PRODUCTS_K_RANGE.end()),
        ));
    }
    if !REVIEWS_PER_PRODUCT_RANGE.contains(&reviews_per_product) {
        return Err(error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!(
                "reviews_per_product must be between {} and {}",
                REVIEWS_PER_PRODUCT_RANGE.start(),
                REVIEWS_PER_PRODUCT_RANGE.end()
            ),
        ));
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct SearchInitResponse {
    pub query_hash: String,
    pub canonical_query: String,
    pub products_k: u32,
    pub reviews_per_product: u32,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub query_hash: Option<String>,
    #[serde(default = "default_products_k")]
    pub products_k: u32,
    #[serde(default = "default_reviews_per_product")]
    pub reviews_per_product: u32,
    #[serde(default)]
    pub bypass_cache: bool,
}

#[derive(Debug, Serialize)]
pub struct SearchAcceptedResponse {
    pub query_hash: String,
    pub result_url: String,
    pub timeline_url: String,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct SearchResultEnvelope {
    pub query_hash: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SearchResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

fn error_response(status: StatusCode, detail: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (status, Json(ErrorBody { detail: detail.into() }))
}

fn fingerprint_extra(auth: &crate::http::auth::AuthContext) -> serde_json::Map<String, Value> {
    let is_guest = auth.is_guest();
    let mut extra = serde_json::Map::new();
    extra.insert("guest".to_string(), Value::Bool(is_guest));
    if !auth.subject.is_empty() {
        extra.insert("subject".to_string(), Value::String(auth.subject.clone()));
    }
    extra
}

/// `POST /search/init` — computes the `query_hash` a client will reuse in a
/// subsequent `/search` submission, without starting any work.
pub async fn initialize_search(
    State(state): State<AppState>,
    RequireAuthenticatedUser(auth): RequireAuthenticatedUser,
    Json(payload): Json<SearchInitRequest>,
) -> Result<Json<SearchInitResponse>, (StatusCode, Json<ErrorBody>)> {
    info!("initializing search fingerprint");

    if auth.is_guest() && !state.config.enable_guest_hashed_queries {
        info!("guest attempted search init while hashed queries disabled");
        return Err(error_response(StatusCode::FORBIDDEN, "guest queries must use precomputed catalogue"));
    }

    validate_search_bounds(payload.products_k, payload.reviews_per_product)?;

    let extra = fingerprint_extra(&auth);
    let query_hash = build_query_hash(&payload.query, payload.products_k, payload.reviews_per_product, Some(&extra.into_iter().collect()));
    let canonical_query = canonicalize_query(&payload.query);

    Ok(Json(SearchInitResponse {
        query_hash,
        canonical_query,
        products_k: payload.products_k,
        reviews_per_product: payload.reviews_per_product,
    }))
}

/// `POST /search` — accepts a search request, registers it as a pending job,
/// clears any stale timeline history, and hands execution to a background
/// task before returning `202 Accepted`.
pub async fn submit_search(
    State(state): State<AppState>,
    RequireAuthenticatedUser(auth): RequireAuthenticatedUser,
    Json(payload): Json<SearchRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorBody>)> {
    info!("submitting asynchronous search request");
    let is_guest = auth.is_guest();

    if is_guest && !state.config.enable_guest_hashed_queries {
        info!("guest query rejected: hashed queries disabled");
        return Err(error_response(StatusCode::FORBIDDEN, "guest queries must use precomputed catalogue"));
    }

    validate_search_bounds(payload.products_k, payload.reviews_per_product)?;

    let extra = fingerprint_extra(&auth);
    let computed_hash = build_query_hash(
        &payload.query,
        payload.products_k,
        payload.reviews_per_product,
        Some(&extra.clone().into_iter().collect()),
    );

    if let Some(provided) = &payload.query_hash {
        if provided != &computed_hash {
            info!(subject = %auth.subject, "provided query hash mismatch");
            return Err(error_response(StatusCode::BAD_REQUEST, "query_hash does not match canonical fingerprint"));
        }
    }

    let query_hash = payload.query_hash.clone().unwrap_or(computed_hash);
    let cache_scope = if is_guest { CacheScope::Guest } else { CacheScope::Response };
    let cache_ttl = if is_guest { state.config.guest_cache_ttl } else { state.config.cache_ttl_default };

    let mut metadata = serde_json::Map::new();
    metadata.insert("products_k".to_string(), Value::from(payload.products_k));
    metadata.insert("reviews_per_product".to_string(), Value::from(payload.reviews_per_product));
    metadata.insert("guest".to_string(), Value::Bool(is_guest));
    metadata.insert("subject".to_string(), Value::String(auth.subject.clone()));
    state.jobs.mark_pending(&query_hash, &payload.query, Some(metadata));

    // Clear timeline before spawning the background task so the SSE stream
    // never replays events from a prior run that reused this query_hash.
    state.timeline.clear(&query_hash).await;

    let options = SearchRequestOptions {
        query_hash: Some(query_hash.clone()),
        products_k: payload.products_k,
        reviews_per_product: payload.reviews_per_product,
        cache_ttl: Some(cache_ttl),
        fingerprint_extra: Some(extra),
        cache_scope,
        bypass_cache: payload.bypass_cache,
    };

    let background_state = state.clone();
    let background_query = payload.query.clone();
    let background_hash = query_hash.clone();
    tokio::spawn(async move {
        execute_search_job(background_state, background_query, background_hash, options).await;
    });

    let accepted = SearchAcceptedResponse {
        result_url: format!("/search/result/{query_hash}"),
        timeline_url: format!("/timeline/{query_hash}"),
        query_hash,
        status: "pending",
    };
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

/// Mirrors `_execute_search_job`: short-circuits through the precomputed
/// catalogue when available and not bypassed, otherwise drives the full
/// pipeline, marking the job registry completed/failed as it resolves.
async fn execute_search_job(state: AppState, query: String, query_hash: String, options: SearchRequestOptions) {
    let precomputed = match &state.response_cache {
        Some(cache) if !options.bypass_cache => match cache.get_precomputed(&query).await {
            crate::response_cache::CacheOutcome::Hit(value) => Some(value),
            crate::response_cache::CacheOutcome::Miss => None,
            crate::response_cache::CacheOutcome::Error(message) => {
                warn!(query_hash = %query_hash, error = %message, "precomputed lookup failed under fail-closed cache config");
                state.jobs.mark_failed(&query_hash, message);
                return;
            }
        },
        _ => None,
    };

    let jobs = state.jobs.clone();
    let hash_for_hook = query_hash.clone();
    let on_before_response_completed = move |response: &SearchResponse, _summary: &Value| {
        let jobs = jobs.clone();
        let query_hash = hash_for_hook.clone();
        let result = serde_json::to_value(response).unwrap_or(Value::Null);
        Box::pin(async move {
            jobs.mark_completed(&query_hash, result);
        }) as futures_util::future::BoxFuture<'static, ()>
    };

    if let Some(precomputed) = precomputed {
        let outcome = state
            .orchestrator
            .complete_precomputed(Some(&query_hash), &query, &options, precomputed, Some(on_before_response_completed))
            .await;
        match outcome {
            Ok(_) => info!(query_hash = %query_hash, "completed search via precomputed response"),
            Err(e) => {
                warn!(query_hash = %query_hash, error = %e, "precomputed response was invalid, failing job");
                state.jobs.mark_failed(&query_hash, e.to_string());
            }
        }
        return;
    }

    match state.orchestrator.search_products(&query, options, Some(on_before_response_completed)).await {
        Ok(_) => info!(query_hash = %query_hash, "completed search job"),
        Err(e) => {
            warn!(query_hash = %query_hash, error = %e, "search job failed");
            state.jobs.mark_failed(&query_hash, e.to_string());
        }
    }
}

/// `GET /timeline/{query_hash}` — replays timeline events as Server-Sent
/// Events, polling the bus until the client disconnects. `last-event-id`
/// (header or query parameter) resumes a stream from where a reconnecting
/// client left off.
pub async fn stream_timeline_events(
    State(state): State<AppState>,
    Path(query_hash): Path<String>,
    headers: HeaderMap,
    _auth: RequireAuthenticatedUser,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut last_id = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let event_stream = stream! {
        let mut last_heartbeat = tokio::time::Instant::now();
        loop {
            let events = state.timeline.read(&query_hash, last_id.as_deref()).await;

            if events.is_empty() {
                if last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL {
                    yield Ok(Event::default().comment("heartbeat"));
                    last_heartbeat = tokio::time::Instant::now();
                }
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }

            for event in events {
                if let Some(id) = &event.stream_id {
                    last_id = Some(id.clone());
                }
                let mut sse_event = Event::default().event(event.step.clone());
                if let Some(id) = &event.stream_id {
                    sse_event = sse_event.id(id.clone());
                }
                let payload = serde_json::to_string(&event).unwrap_or_default();
                yield Ok(sse_event.data(payload));
            }
            last_heartbeat = tokio::time::Instant::now();
        }
    };

    Sse::new(event_stream).keep_alive(KeepAlive::new().interval(HEARTBEAT_INTERVAL).text("heartbeat"))
}

/// `GET /search/result/{query_hash}` — polls job status, returning the cached
/// response body (`200`) once available, `202` while pending, or an error
/// envelope (`200`/`404`/`500`) for the failed/unknown/corrupt cases.
pub async fn get_search_result(
    State(state): State<AppState>,
    Path(query_hash): Path<String>,
    _auth: RequireAuthenticatedUser,
) -> Result<(StatusCode, Json<SearchResultEnvelope>), (StatusCode, Json<ErrorBody>)> {
    let Some(job) = state.jobs.get(&query_hash) else {
        return Err(error_response(StatusCode::NOT_FOUND, "query_hash not found"));
    };

    match job.status {
        crate::jobs::JobStatus::Pending => Ok((
            StatusCode::ACCEPTED,
            Json(SearchResultEnvelope {
                query_hash,
                status: "pending",
                result: None,
                error: None,
                updated_at: Some(job.updated_at),
            }),
        )),
        crate::jobs::JobStatus::Failed => Ok((
            StatusCode::OK,
            Json(SearchResultEnvelope {
                query_hash,
                status: "failed",
                result: None,
                error: job.error,
                updated_at: Some(job.updated_at),
            }),
        )),
        crate::jobs::JobStatus::Completed => {
            let response = job
                .result
                .clone()
                .and_then(|value| serde_json::from_value::<SearchResponse>(value).ok());

            let response = match response {
                Some(response) => Some(response),
                None => load_cached_response(&state, &job.query, &job.metadata).await,
            };

            match response {
                Some(response) => Ok((
                    StatusCode::OK,
                    Json(SearchResultEnvelope {
                        query_hash,
                        status: "completed",
                        result: Some(response),
                        error: None,
                        updated_at: Some(job.updated_at),
                    }),
                )),
                None => Ok((
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(SearchResultEnvelope {
                        query_hash,
                        status: "failed",
                        result: None,
                        error: Some("result unavailable".to_string()),
                        updated_at: Some(job.updated_at),
                    }),
                )),
            }
        }
    }
}

/// Fallback for a completed job whose stored result payload didn't
/// deserialize: re-derive the response cache key from job metadata and look
/// it up directly, mirroring `_load_cached_response`.
async fn load_cached_response(
    state: &AppState,
    query: &str,
    metadata: &serde_json::Map<String, Value>,
) -> Option<SearchResponse> {
    let cache = state.response_cache.as_ref()?;
    if query.is_empty() {
        return None;
    }

    let products_k = metadata.get("products_k").and_then(Value::as_u64).unwrap_or(3) as u32;
    let reviews_per_product = metadata.get("reviews_per_product").and_then(Value::as_u64).unwrap_or(3) as u32;

    let mut fingerprint_extra: crate::codec::FingerprintExtra = metadata.clone().into_iter().collect();
    fingerprint_extra.remove("products_k");
    fingerprint_extra.remove("reviews_per_product");

    let cache_key = crate::codec::build_response_cache_key(
        state.config.cache_schema_version.max(1),
        query,
        products_k,
        reviews_per_product,
        (!fingerprint_extra.is_empty()).then_some(&fingerprint_extra),
    );

    match cache.get_response(&cache_key).await {
        crate::response_cache::CacheOutcome::Hit(value) => serde_json::from_value(value).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::auth::AuthContext;

    #[test]
    fn fingerprint_extra_includes_subject_for_non_empty_subject() {
        let auth = AuthContext { subject: "user-1".to_string(), role: "member".to_string() };
        let extra = fingerprint_extra(&auth);
        assert_eq!(extra.get("subject"), Some(&Value::String("user-1".to_string())));
        assert_eq!(extra.get("guest"), Some(&Value::Bool(false)));
    }

    #[test]
    fn fingerprint_extra_omits_subject_when_blank() {
        let auth = AuthContext { subject: String::new(), role: "guest".to_string() };
        let extra = fingerprint_extra(&auth);
        assert!(!extra.contains_key("subject"));
        assert_eq!(extra.get("guest"), Some(&Value::Bool(true)));
    }
}
