//! Redis-backed cache adapter and timeline stream support.
//!
//! Grounded on `backend/app/cache/adapters.py::RedisCacheAdapter` for the
//! `CacheAdapter` half, and on `backends::redis_cache::RedisCache`'s
//! `ConnectionManager` idiom (automatic reconnection, cloned per
//! call since `ConnectionManager` is cheaply `Clone`) for the connection
//! handling. The streaming half (`StreamingBackend`) mirrors
//! `traits::StreamingBackend`'s shape and is consumed by `timeline.rs`,
//! grounded on `backend/app/utils/timeline.py`'s `xadd`/`xread`/`expire`/`delete`
//! calls.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::{debug, info};

use crate::cache::CacheAdapter;
use crate::error::{CacheError, CacheResult};

/// Redis-backed cache adapter using `ConnectionManager` for automatic
/// reconnection. Also implements [`StreamingBackend`] for the timeline bus.
pub struct RedisCacheAdapter {
    conn_manager: ConnectionManager,
}

impl RedisCacheAdapter {
    /// # Errors
    /// Returns an error if the client cannot be created or the initial
    /// connection/PING check fails.
    pub async fn with_url(redis_url: &str) -> CacheResult<Self> {
        info!(redis_url = %redis_url, "connecting to redis cache backend");

        let client = Client::open(redis_url)
            .map_err(|e| CacheError::Backend(format!("failed to create redis client: {e}")))?;

        let conn_manager = ConnectionManager::new(client)
            .await
            .map_err(CacheError::Redis)?;

        let mut conn = conn_manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await.map_err(CacheError::Redis)?;

        info!(redis_url = %redis_url, "redis cache backend connected");
        Ok(Self { conn_manager })
    }

    pub(crate) fn connection(&self) -> ConnectionManager {
        self.conn_manager.clone()
    }
}

#[async_trait]
impl CacheAdapter for RedisCacheAdapter {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.connection();
        let value: Option<Vec<u8>> = conn.get(key).await.map_err(CacheError::Redis)?;
        Ok(value.filter(|v| !v.is_empty()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl_seconds: u64) -> CacheResult<()> {
        let mut conn = self.connection();
        let _: () = conn.set_ex(key, value, ttl_seconds.max(1)).await.map_err(CacheError::Redis)?;
        debug!(key = %key, ttl_secs = ttl_seconds.max(1), "cached key in redis");
        Ok(())
    }

    async fn set_persistent(&self, key: &str, value: Vec<u8>) -> CacheResult<()> {
        let mut conn = self.connection();
        let _: () = conn.set(key, value).await.map_err(CacheError::Redis)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.connection();
        let _: () = conn.del(key).await.map_err(CacheError::Redis)?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.connection();
        let result: bool = conn.exists(key).await.map_err(CacheError::Redis)?;
        Ok(result)
    }

    fn name(&self) -> &'static str {
        "Redis"
    }
}

/// Redis-stream operations used by the timeline bus.
///
/// Mirrors `traits::StreamingBackend`'s shape; only the Redis
/// adapter implements it, since the in-memory and REST KV adapters have no
/// native streaming primitive.
#[async_trait]
pub trait StreamingBackend: Send + Sync {
    async fn stream_add(
        &self,
        stream_key: &str,
        field: &str,
        value: &str,
        maxlen: Option<usize>,
    ) -> CacheResult<String>;

    async fn stream_expire(&self, stream_key: &str, ttl: Duration) -> CacheResult<()>;

    async fn stream_read(
        &self,
        stream_key: &str,
        last_id: &str,
        count: usize,
    ) -> CacheResult<Vec<(String, Vec<(String, String)>)>>;

    async fn stream_delete(&self, stream_key: &str) -> CacheResult<()>;
}

#[async_trait]
impl StreamingBackend for RedisCacheAdapter {
    async fn stream_add(
        &self,
        stream_key: &str,
        field: &str,
        value: &str,
        maxlen: Option<usize>,
    ) -> CacheResult<String> {
        let mut conn = self.connection();
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream_key);
        if let Some(maxlen) = maxlen {
            cmd.arg("MAXLEN").arg("~").arg(maxlen);
        }
        cmd.arg("*").arg(field).arg(value);
        let entry_id: String = cmd.query_async(&mut conn).await.map_err(CacheError::Redis)?;
        Ok(entry_id)
    }

    async fn stream_expire(&self, stream_key: &str, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.connection();
        let _: bool = conn.expire(stream_key, ttl.as_secs() as i64).await.map_err(CacheError::Redis)?;
        Ok(())
    }

    async fn stream_read(
        &self,
        stream_key: &str,
        last_id: &str,
        count: usize,
    ) -> CacheResult<Vec<(String, Vec<(String, String)>)>> {
        let mut conn = self.connection();
        let response: redis::streams::StreamReadReply = redis::cmd("XREAD")
            .arg("COUNT")
            .arg(count)
            .arg("STREAMS")
            .arg(stream_key)
            .arg(last_id)
            .query_async(&mut conn)
            .await
            .map_err(CacheError::Redis)?;

        let mut out = Vec::new();
        for key_stream in response.keys {
            for entry in key_stream.ids {
                let fields = entry
                    .map
                    .into_iter()
                    .map(|(k, v)| {
                        let value_str = match v {
                            redis::Value::BulkString(bytes) => {
                                String::from_utf8_lossy(&bytes).into_owned()
                            }
                            redis::Value::SimpleString(s) => s,
                            other => format!("{other:?}"),
                        };
                        (k, value_str)
                    })
                    .collect();
                out.push((entry.id, fields));
            }
        }
        Ok(out)
    }

    async fn stream_delete(&self, stream_key: &str) -> CacheResult<()> {
        let mut conn = self.connection();
        let _: () = conn.del(stream_key).await.map_err(CacheError::Redis)?;
        Ok(())
    }
}
