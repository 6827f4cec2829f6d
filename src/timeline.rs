//! Replayable per-query event timeline.
//!
//! Grounded on `backend/app/utils/timeline.py`. Publishes scrubbed step
//! events to a Redis stream when a streaming backend is configured,
//! transparently falling back to an in-process store (also used directly
//! when no streaming backend exists at all). As with [`crate::jobs`], the
//! original's per-event-loop lazy lock is replaced with one
//! process-lifetime `TimelineBus` instance.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

#[cfg(feature = "redis-store")]
pub use crate::cache::redis_store::StreamingBackend;
use crate::scrubber::{scrub_payload, ScrubberSettings};

#[cfg(not(feature = "redis-store"))]
#[async_trait::async_trait]
pub trait StreamingBackend: Send + Sync {
    async fn stream_add(
        &self,
        stream_key: &str,
        field: &str,
        value: &str,
        maxlen: Option<usize>,
    ) -> crate::error::CacheResult<String>;
    async fn stream_expire(&self, stream_key: &str, ttl: std::time::Duration) -> crate::error::CacheResult<()>;
    async fn stream_read(
        &self,
        stream_key: &str,
        last_id: &str,
        count: usize,
    ) -> crate::error::CacheResult<Vec<(String, Vec<(String, String)>)>>;
    async fn stream_delete(&self, stream_key: &str) -> crate::error::CacheResult<()>;
}

const STREAM_PREFIX: &str = "timeline:";
const DEFAULT_STREAM_MAXLEN: usize = 1000;
const DEFAULT_STREAM_TTL_SECONDS: u64 = 3600;
const DEFAULT_READ_COUNT: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub event_id: String,
    pub query_hash: String,
    pub step: String,
    pub timestamp: String,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_timestamp: Option<i64>,
}

fn stream_key(query_hash: &str) -> String {
    format!("{STREAM_PREFIX}{query_hash}")
}

/// Parse a Redis stream id (`millis-sequence`) for ordering; malformed ids
/// sort before everything else, matching the original's `_parse_stream_id`.
fn parse_stream_id(stream_id: &str) -> (i64, i64) {
    stream_id
        .split_once('-')
        .and_then(|(millis, seq)| Some((millis.parse().ok()?, seq.parse().ok()?)))
        .unwrap_or((0, 0))
}

/// Publish-time event bus. In-memory storage is always available; a
/// streaming backend (Redis) is used when present and falls back to memory
/// transparently on any stream operation failure.
pub struct TimelineBus {
    streaming: Option<Box<dyn StreamingBackend>>,
    memory: Mutex<HashMap<String, Vec<TimelineEvent>>>,
}

impl TimelineBus {
    pub fn new(streaming: Option<Box<dyn StreamingBackend>>) -> Self {
        Self {
            streaming,
            memory: Mutex::new(HashMap::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(None)
    }

    /// Publish a timeline event, scrubbing `payload` with `scrubber` first.
    pub async fn publish(
        &self,
        query_hash: &str,
        step: &str,
        payload: &Value,
        scrubber: &ScrubberSettings,
    ) -> TimelineEvent {
        let safe_payload = scrub_payload(payload, scrubber, None);
        let mut event = TimelineEvent {
            event_id: Uuid::new_v4().to_string(),
            query_hash: query_hash.to_string(),
            step: step.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            payload: safe_payload,
            stream_id: None,
            sequence: None,
            stream_timestamp: None,
        };

        if let Some(backend) = &self.streaming {
            let key = stream_key(query_hash);
            let serialized = serde_json::to_string(&event).unwrap_or_default();
            match backend.stream_add(&key, "data", &serialized, Some(DEFAULT_STREAM_MAXLEN)).await {
                Ok(entry_id) => {
                    if let Err(e) = backend
                        .stream_expire(&key, std::time::Duration::from_secs(DEFAULT_STREAM_TTL_SECONDS))
                        .await
                    {
                        warn!(query_hash = %query_hash, error = %e, "failed to set timeline stream TTL");
                    }
                    let (millis, seq) = parse_stream_id(&entry_id);
                    event.stream_id = Some(entry_id);
                    event.sequence = Some(seq.max(0) as u64);
                    event.stream_timestamp = Some(millis);
                    return event;
                }
                Err(e) => {
                    warn!(query_hash = %query_hash, error = %e, "redis timeline publish failed, falling back to memory");
                }
            }
        }

        self.write_in_memory(event)
    }

    fn write_in_memory(&self, mut event: TimelineEvent) -> TimelineEvent {
        let mut memory = self.memory.lock();
        let events = memory.entry(event.query_hash.clone()).or_default();
        let sequence = events.len() as u64 + 1;
        let stream_id = format!("{}-{}", Utc::now().timestamp_millis(), sequence);
        if event.stream_id.is_none() {
            event.stream_id = Some(stream_id);
        }
        if event.sequence.is_none() {
            event.sequence = Some(sequence);
        }
        events.push(event.clone());
        event
    }

    /// Read events for `query_hash` newer than `last_id` (`None` reads from
    /// the start of the stream/history).
    pub async fn read(&self, query_hash: &str, last_id: Option<&str>) -> Vec<TimelineEvent> {
        if let Some(backend) = &self.streaming {
            let key = stream_key(query_hash);
            let start_id = last_id.unwrap_or("0-0");
            match backend.stream_read(&key, start_id, DEFAULT_READ_COUNT).await {
                Ok(entries) => {
                    let mut events = Vec::with_capacity(entries.len());
                    for (entry_id, fields) in entries {
                        let Some(raw) = fields.iter().find(|(k, _)| k == "data").map(|(_, v)| v.clone()) else {
                            continue;
                        };
                        let Ok(mut event) = serde_json::from_str::<TimelineEvent>(&raw) else {
                            warn!(query_hash = %query_hash, "failed to decode timeline event");
                            continue;
                        };
                        let (millis, seq) = parse_stream_id(&entry_id);
                        event.stream_id = Some(entry_id);
                        event.sequence = event.sequence.or(Some(seq.max(0) as u64));
                        event.stream_timestamp = event.stream_timestamp.or(Some(millis));
                        events.push(event);
                    }
                    return events;
                }
                Err(e) => {
                    warn!(query_hash = %query_hash, error = %e, "redis timeline read failed, falling back to memory");
                }
            }
        }

        let events = {
            let memory = self.memory.lock();
            memory.get(query_hash).cloned().unwrap_or_default()
        };

        match last_id {
            None => tail(events, DEFAULT_READ_COUNT),
            Some(last_id) => {
                let last_tuple = parse_stream_id(last_id);
                let filtered: Vec<_> = events
                    .into_iter()
                    .filter(|event| {
                        parse_stream_id(event.stream_id.as_deref().unwrap_or("0-0")) > last_tuple
                    })
                    .collect();
                tail(filtered, DEFAULT_READ_COUNT)
            }
        }
    }

    /// Clear timeline history for a single `query_hash`, both remotely and
    /// in-memory. Called before a fresh search run to avoid replaying stale
    /// events from a prior run that reused the same `query_hash`.
    pub async fn clear(&self, query_hash: &str) {
        if let Some(backend) = &self.streaming {
            let key = stream_key(query_hash);
            if let Err(e) = backend.stream_delete(&key).await {
                warn!(query_hash = %query_hash, error = %e, "failed to clear redis timeline stream");
            }
        }
        self.memory.lock().remove(query_hash);
    }
}

fn tail(mut events: Vec<TimelineEvent>, count: usize) -> Vec<TimelineEvent> {
    if events.len() > count {
        events = events.split_off(events.len() - count);
    }
    events
}
