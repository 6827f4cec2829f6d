//! REST KV cache adapter (Vercel KV / Upstash-style REST protocol).
//!
//! Grounded on `backend/app/cache/adapters.py::VercelKVCacheAdapter`: POST a
//! JSON command array to a single REST endpoint, authenticate with a bearer
//! token, base64-encode values (the REST protocol is text-only). Uses
//! `reqwest` in place of the original's `httpx.AsyncClient`.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

use crate::cache::CacheAdapter;
use crate::error::{CacheError, CacheResult};

const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Cache adapter for REST-protocol KV stores (Vercel KV, Upstash Redis REST).
pub struct RestKvCacheAdapter {
    client: reqwest::Client,
    rest_url: String,
    token: String,
    namespace: Option<String>,
}

impl RestKvCacheAdapter {
    pub fn new(rest_url: impl Into<String>, rest_token: impl Into<String>, namespace: Option<String>) -> CacheResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(CacheError::Transport)?;
        Ok(Self {
            client,
            rest_url: rest_url.into().trim_end_matches('/').to_string(),
            token: rest_token.into(),
            namespace: namespace.map(|ns| ns.trim().to_string()).filter(|ns| !ns.is_empty()),
        })
    }

    fn qualify(&self, key: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}:{key}"),
            None => key.to_string(),
        }
    }

    async fn execute(&self, command: Vec<Value>) -> CacheResult<Value> {
        let response = self
            .client
            .post(format!("{}/", self.rest_url))
            .bearer_auth(&self.token)
            .json(&command)
            .send()
            .await
            .map_err(CacheError::Transport)?;

        if response.status().as_u16() >= 400 {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CacheError::Backend(format!("HTTP {status}: {body}")));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| CacheError::Decode(e.to_string()))?;

        if let Some(error) = payload.get("error") {
            return Err(CacheError::Backend(error.to_string()));
        }

        Ok(payload.get("result").cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl CacheAdapter for RestKvCacheAdapter {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let qualified = self.qualify(key);
        let result = self
            .execute(vec![Value::String("GET".into()), Value::String(qualified.clone())])
            .await?;

        match result {
            Value::Null => Ok(None),
            Value::String(encoded) => match BASE64.decode(encoded.as_bytes()) {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) => {
                    warn!(key = %qualified, error = %e, "failed to decode cache value");
                    Ok(None)
                }
            },
            _ => {
                warn!(key = %qualified, "unexpected payload shape from REST KV backend");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl_seconds: u64) -> CacheResult<()> {
        let qualified = self.qualify(key);
        let encoded = BASE64.encode(&value);
        self.execute(vec![
            Value::String("SET".into()),
            Value::String(qualified),
            Value::String(encoded),
            Value::String("EX".into()),
            Value::String(ttl_seconds.max(1).to_string()),
        ])
        .await?;
        Ok(())
    }

    async fn set_persistent(&self, key: &str, value: Vec<u8>) -> CacheResult<()> {
        let qualified = self.qualify(key);
        let encoded = BASE64.encode(&value);
        self.execute(vec![
            Value::String("SET".into()),
            Value::String(qualified),
            Value::String(encoded),
        ])
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let qualified = self.qualify(key);
        self.execute(vec![Value::String("DEL".into()), Value::String(qualified)]).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let qualified = self.qualify(key);
        let result = self
            .execute(vec![Value::String("EXISTS".into()), Value::String(qualified)])
            .await?;
        Ok(result.as_i64().unwrap_or(0) != 0)
    }

    fn name(&self) -> &'static str {
        "RestKv"
    }
}
