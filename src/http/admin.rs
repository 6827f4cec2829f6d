//! Admin endpoints.
//!
//! Grounded on `backend/app/api/admin_endpoints.py`: an RBAC-gated health
//! check plus CRUD over the precomputed/canonical cache tiers. Every cache
//! route here 503s via [`ensure_cache_enabled`] when no response cache is
//! configured, matching `_ensure_cache_enabled`.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::codec::canonicalize_query;
use crate::http::auth::RequireAdminUser;
use crate::http::search::ErrorBody;
use crate::http::state::AppState;
use crate::orchestrator::SearchResponse;
use crate::response_cache::ResponseCache;

#[derive(Debug, Serialize)]
pub struct AdminStatus {
    pub status: &'static str,
    pub subject: String,
    pub role: String,
}

#[derive(Debug, Serialize)]
pub struct PrecomputedEntry {
    pub slug: String,
    pub query: String,
    pub hash: String,
}

#[derive(Debug, Serialize)]
pub struct PrecomputedIndexResponse {
    pub items: Vec<PrecomputedEntry>,
}

#[derive(Debug, Deserialize)]
pub struct PrecomputedUpsertRequest {
    pub slug: String,
    pub query: String,
    pub response: SearchResponse,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct PrecomputedDeleteResponse {
    pub slug: String,
    pub removed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteQueryParams {
    #[serde(default)]
    pub query: Option<String>,
}

fn error_response(status: StatusCode, detail: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (status, Json(ErrorBody { detail: detail.into() }))
}

fn ensure_cache_enabled(cache: &Option<std::sync::Arc<ResponseCache>>) -> Result<&ResponseCache, (StatusCode, Json<ErrorBody>)> {
    cache
        .as_deref()
        .ok_or_else(|| error_response(StatusCode::SERVICE_UNAVAILABLE, "response cache is disabled"))
}

/// `GET /admin/status` — simple role-gated health check.
pub async fn admin_status(RequireAdminUser(auth): RequireAdminUser) -> Json<AdminStatus> {
    Json(AdminStatus { status: "ok", subject: auth.subject, role: auth.role })
}

/// `GET /admin/cache/precomputed` — lists the combined precomputed/canonical
/// index, sorted by slug.
pub async fn list_precomputed_cache(
    State(state): State<AppState>,
    _auth: RequireAdminUser,
) -> Result<Json<PrecomputedIndexResponse>, (StatusCode, Json<ErrorBody>)> {
    let cache = ensure_cache_enabled(&state.response_cache)?;
    let index = cache.list_precomputed().await;
    let items = index
        .into_iter()
        .map(|(slug, entry)| PrecomputedEntry { slug, query: entry.query, hash: entry.hash })
        .collect();
    Ok(Json(PrecomputedIndexResponse { items }))
}

/// `PUT /admin/cache/precomputed` — writes both the TTL-bounded precomputed
/// tier and the persistent canonical tier, matching the original's
/// unconditional double-write.
pub async fn upsert_precomputed_cache(
    State(state): State<AppState>,
    _auth: RequireAdminUser,
    Json(payload): Json<PrecomputedUpsertRequest>,
) -> Result<StatusCode, (StatusCode, Json<ErrorBody>)> {
    let cache = ensure_cache_enabled(&state.response_cache)?;
    let response = serde_json::to_value(&payload.response)
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("failed to encode response: {e}")))?;

    cache
        .store_precomputed(&payload.slug, &payload.query, &response, payload.ttl_seconds)
        .await
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    cache
        .store_canonical(&payload.slug, &payload.query, &response)
        .await
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /admin/cache/precomputed/{slug}` — removes an entry from both
/// tiers, resolving the canonical query from the request param or, failing
/// that, from the existing index entry.
pub async fn delete_precomputed_cache(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(params): Query<DeleteQueryParams>,
    _auth: RequireAdminUser,
) -> Result<Json<PrecomputedDeleteResponse>, (StatusCode, Json<ErrorBody>)> {
    let cache = ensure_cache_enabled(&state.response_cache)?;
    let index = cache.list_precomputed().await;
    let entry = index.get(&slug).cloned();

    let canonical_query = params
        .query
        .as_deref()
        .map(canonicalize_query)
        .or_else(|| entry.map(|e| e.query));

    let removed = cache.delete_precomputed(&slug, canonical_query.as_deref()).await;

    Ok(Json(PrecomputedDeleteResponse { slug, removed, query: canonical_query }))
}
