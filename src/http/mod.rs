//! HTTP dispatch layer.
//!
//! Assembles the axum [`Router`] wiring `search`/`admin` handlers onto
//! [`AppState`], grounded on the router-building shape of
//! `fraiseql-server::server::Server::build_router`. Request
//! authentication/authorization is out of scope (see `auth.rs`); this router
//! assumes `AuthContext` has already been attached to request extensions by
//! an upstream layer.

pub mod admin;
pub mod auth;
pub mod search;
pub mod state;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Build the full router: search/timeline/job endpoints plus the
/// admin-gated precomputed cache management endpoints.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/search/init", post(search::initialize_search))
        .route("/search", post(search::submit_search))
        .route("/timeline/:query_hash", get(search::stream_timeline_events))
        .route("/search/result/:query_hash", get(search::get_search_result))
        .route("/admin/status", get(admin::admin_status))
        .route("/admin/cache/precomputed", get(admin::list_precomputed_cache))
        .route("/admin/cache/precomputed", axum::routing::put(admin::upsert_precomputed_cache))
        .route("/admin/cache/precomputed/:slug", delete(admin::delete_precomputed_cache))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
