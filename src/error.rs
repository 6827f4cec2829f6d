//! Error types for the orchestration core.
//!
//! Splits library-boundary errors (`thiserror`) from application glue
//! (`anyhow`): every trait object and public API here returns a typed
//! `Result`, while test setup uses `anyhow::Result` for `?`-friendly
//! composition.

use thiserror::Error;

/// Errors raised by a [`crate::cache::CacheAdapter`] implementation.
///
/// Grounded on `CacheError(RuntimeError)` from the original `cache/adapters.py`:
/// one error type shared by all three backends, distinguishing transport
/// failure from a backend-reported error from a decode failure.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("cache backend responded with an error: {0}")]
    Backend(String),

    #[error("failed to decode cache value: {0}")]
    Decode(String),

    #[cfg(feature = "redis-store")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("cache backend is not configured for this operation")]
    NotConfigured,
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Errors raised while driving the search pipeline.
///
/// The orchestrator never panics on a pipeline failure; it converts it into
/// this type, logs it, and records the job as failed — see
/// `backend/app/core/search_service.py::search_products`'s
/// `except Exception` blocks around the engine and pipeline calls.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("rag pipeline is not configured")]
    PipelineNotConfigured,

    #[error("search engine lookup failed: {0}")]
    Engine(String),

    #[error("rag pipeline execution failed: {0}")]
    Pipeline(String),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
