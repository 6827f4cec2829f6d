//! Environment-sourced configuration.
//!
//! Collects the flat module-level constants of `backend/app/config.py` into
//! one struct read once at startup, the way a Rust service typically does.
//! Unlike the original's `_get_int_env`, a malformed numeric value here is a
//! startup error rather than a silent fallback to the default (see
//! `DESIGN.md` for the rationale).

use anyhow::{Context, Result};

/// Configuration options the orchestration core reads from the process
/// environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub enable_cache: bool,
    pub cache_ttl_default: u64,
    pub guest_cache_ttl: u64,
    pub enable_guest_hashed_queries: bool,
    pub cache_fail_open: bool,
    pub cache_schema_version: u32,
    pub cache_max_payload_bytes: usize,
    pub cache_namespace: Option<String>,
    pub cache_redis_url: Option<String>,
    pub rag_batching_enabled: bool,
    pub rag_batch_size: u32,
}

impl Config {
    /// Load configuration from the process environment, applying the same
    /// defaults as `backend/app/config.py`.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            enable_cache: bool_env("ENABLE_CACHE", false)?,
            cache_ttl_default: int_env("CACHE_TTL_DEFAULT", 3600)?,
            guest_cache_ttl: int_env("GUEST_CACHE_TTL", 86_400)?,
            enable_guest_hashed_queries: bool_env("ENABLE_GUEST_HASHED_QUERIES", false)?,
            cache_fail_open: bool_env("CACHE_FAIL_OPEN", true)?,
            cache_schema_version: int_env("CACHE_SCHEMA_VERSION", 1)?,
            cache_max_payload_bytes: int_env("CACHE_MAX_PAYLOAD_BYTES", 1_048_576)?,
            cache_namespace: std::env::var("CACHE_NAMESPACE").ok(),
            cache_redis_url: std::env::var("CACHE_REDIS_URL").ok(),
            rag_batching_enabled: bool_env("RAG_BATCHING_ENABLED", true)?,
            rag_batch_size: int_env("RAG_BATCH_SIZE", 3)?,
        })
    }
}

fn bool_env(name: &str, default: bool) -> Result<bool> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => {
            let normalized = raw.trim().to_lowercase();
            Ok(matches!(normalized.as_str(), "1" | "true" | "yes" | "on"))
        }
    }
}

fn int_env<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid value for {name}: {e}"))
            .with_context(|| format!("parsing env var {name}")),
    }
}
