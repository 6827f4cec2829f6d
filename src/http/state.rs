//! Shared application state (ambient).
//!
//! Grounded on the `CacheManager<C>{ inner: Arc<CacheManagerInner<C>> }`
//! pattern: one cheaply-`Clone`-able handle threaded through every axum
//! handler via `State`, wrapping the heavier collaborators in an `Arc` so
//! cloning the state per-request is just a pointer bump.

use std::sync::Arc;

use crate::config::Config;
use crate::jobs::JobRegistry;
use crate::orchestrator::SearchOrchestrator;
use crate::response_cache::ResponseCache;
use crate::timeline::TimelineBus;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub orchestrator: Arc<SearchOrchestrator>,
    pub jobs: Arc<JobRegistry>,
    pub timeline: Arc<TimelineBus>,
    pub response_cache: Option<Arc<ResponseCache>>,
}
