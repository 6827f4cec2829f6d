//! Asynchronous Search Orchestration Core
//!
//! Wires together the pieces of a RAG recommendation backend's search
//! surface: query fingerprinting and admission, an async job registry, a
//! replayable timeline event bus, and a multi-tier response cache, driven by
//! a search orchestrator and exposed over HTTP via axum.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use search_orchestration_core::{OrchestrationSystem, Config};
//! use search_orchestration_core::orchestrator::{SearchEngine, SearchCandidate, TimelineEmit};
//! use search_orchestration_core::error::OrchestratorResult;
//! use async_trait::async_trait;
//!
//! struct MyEngine;
//!
//! #[async_trait]
//! impl SearchEngine for MyEngine {
//!     async fn hybrid_search(
//!         &self,
//!         _query: &str,
//!         _products_k: u32,
//!         _reviews_per_product: u32,
//!         _emit: &TimelineEmit<'_>,
//!     ) -> OrchestratorResult<Vec<SearchCandidate>> {
//!         Ok(vec![])
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let system = OrchestrationSystem::new(config, Arc::new(MyEngine), None).await?;
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, system.router()).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! HTTP (http::search, http::admin)
//!   -> SearchOrchestrator (orchestrator)
//!        -> SearchEngine / RagPipeline (external collaborators)
//!        -> ResponseCache (response_cache) -> CacheAdapter (cache)
//!        -> TimelineBus (timeline) -> StreamingBackend (cache::redis_store)
//!   -> JobRegistry (jobs)
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod http;
pub mod jobs;
pub mod orchestrator;
pub mod response_cache;
pub mod scrubber;
pub mod timeline;

pub use config::Config;
pub use error::{CacheError, CacheResult, OrchestratorError, OrchestratorResult};
pub use http::AppState;
pub use jobs::JobRegistry;
pub use orchestrator::{RagPipeline, SearchEngine, SearchOrchestrator};
pub use response_cache::ResponseCache;
pub use timeline::TimelineBus;

use crate::cache::memory::InMemoryCacheAdapter;
use crate::cache::CacheAdapter;

#[cfg(feature = "redis-store")]
use crate::cache::redis_store::{RedisCacheAdapter, StreamingBackend};

/// Top-level facade assembling every collaborator behind one process-lifetime
/// handle: the configured [`CacheAdapter`] (Redis when `CACHE_REDIS_URL` is
/// set and the `redis-store` feature is enabled, in-memory otherwise), the
/// [`ResponseCache`]/[`TimelineBus`]/[`JobRegistry`], and the
/// [`SearchOrchestrator`] wired to the caller-supplied search engine and RAG
/// pipeline. Mirrors the `CacheSystem::new()` entry point.
pub struct OrchestrationSystem {
    pub config: Arc<Config>,
    pub orchestrator: Arc<SearchOrchestrator>,
    pub jobs: Arc<JobRegistry>,
    pub timeline: Arc<TimelineBus>,
    pub response_cache: Option<Arc<ResponseCache>>,
}

impl OrchestrationSystem {
    /// Build the system from a loaded [`Config`] and the external
    /// collaborators this core does not own (the retrieval engine and,
    /// optionally, the RAG explanation pipeline).
    pub async fn new(
        config: Config,
        search_engine: Arc<dyn SearchEngine>,
        rag_pipeline: Option<Arc<dyn RagPipeline>>,
    ) -> Result<Self> {
        let config = Arc::new(config);

        let cache_adapter: Option<Arc<dyn CacheAdapter>> = if config.enable_cache {
            Some(build_cache_adapter(&config).await?)
        } else {
            None
        };

        let response_cache = cache_adapter.as_ref().map(|adapter| {
            Arc::new(ResponseCache::new(
                adapter.clone(),
                config.cache_fail_open,
                config.cache_max_payload_bytes,
                config.guest_cache_ttl,
            ))
        });

        let timeline = Arc::new(TimelineBus::new(build_streaming_backend(&config).await?));
        let jobs = Arc::new(JobRegistry::new());

        let orchestrator = Arc::new(SearchOrchestrator::new(
            search_engine,
            rag_pipeline,
            response_cache.clone(),
            timeline.clone(),
            config.cache_ttl_default,
            config.cache_schema_version,
        ));

        Ok(Self { config, orchestrator, jobs, timeline, response_cache })
    }

    /// Build an [`OrchestrationSystem`] with a caller-supplied cache adapter,
    /// bypassing the `CACHE_REDIS_URL`-driven selection in [`Self::new`] —
    /// the seam a REST-KV deployment (`cache::rest_kv::RestKvCacheAdapter`)
    /// or a test double plugs into, mirroring `CacheSystemBuilder::with_l2`.
    pub fn with_cache_adapter(
        config: Config,
        search_engine: Arc<dyn SearchEngine>,
        rag_pipeline: Option<Arc<dyn RagPipeline>>,
        cache_adapter: Arc<dyn CacheAdapter>,
    ) -> Self {
        let config = Arc::new(config);
        let response_cache = Arc::new(ResponseCache::new(
            cache_adapter,
            config.cache_fail_open,
            config.cache_max_payload_bytes,
            config.guest_cache_ttl,
        ));
        let timeline = Arc::new(TimelineBus::in_memory());
        let jobs = Arc::new(JobRegistry::new());
        let orchestrator = Arc::new(SearchOrchestrator::new(
            search_engine,
            rag_pipeline,
            Some(response_cache.clone()),
            timeline.clone(),
            config.cache_ttl_default,
            config.cache_schema_version,
        ));
        Self { config, orchestrator, jobs, timeline, response_cache: Some(response_cache) }
    }

    /// Shared state handle for the HTTP layer.
    pub fn app_state(&self) -> AppState {
        AppState {
            config: self.config.clone(),
            orchestrator: self.orchestrator.clone(),
            jobs: self.jobs.clone(),
            timeline: self.timeline.clone(),
            response_cache: self.response_cache.clone(),
        }
    }

    /// Build the axum router for this system (see [`http::build_router`]).
    pub fn router(&self) -> axum::Router {
        http::build_router(self.app_state())
    }
}

async fn build_cache_adapter(config: &Config) -> Result<Arc<dyn CacheAdapter>> {
    #[cfg(feature = "redis-store")]
    if let Some(redis_url) = &config.cache_redis_url {
        info!("initializing redis cache adapter");
        let adapter = RedisCacheAdapter::with_url(redis_url)
            .await
            .with_context(|| "failed to connect to redis cache backend")?;
        return Ok(Arc::new(adapter));
    }

    info!("falling back to in-memory cache adapter");
    Ok(Arc::new(InMemoryCacheAdapter::new()))
}

#[cfg(feature = "redis-store")]
async fn build_streaming_backend(config: &Config) -> Result<Option<Box<dyn StreamingBackend>>> {
    let Some(redis_url) = &config.cache_redis_url else {
        return Ok(None);
    };
    let adapter = RedisCacheAdapter::with_url(redis_url)
        .await
        .with_context(|| "failed to connect to redis timeline stream backend")?;
    Ok(Some(Box::new(adapter) as Box<dyn StreamingBackend>))
}

#[cfg(not(feature = "redis-store"))]
async fn build_streaming_backend(_config: &Config) -> Result<Option<Box<dyn crate::timeline::StreamingBackend>>> {
    Ok(None)
}
