//! Search job registry.
//!
//! Grounded on `backend/app/utils/search_jobs.py`. The original binds a
//! module-level `asyncio.Lock` lazily to whichever event loop happens to be
//! running when it's first touched, recreating it if the loop changes — a
//! pattern that only makes sense in a script repeatedly given fresh event
//! loops. A long-running Rust process has exactly one runtime, so
//! `JobRegistry` is instead an explicitly-constructed, process-lifetime
//! singleton (held in `http::state::AppState`) guarding a plain mutex.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub query: String,
    pub status: JobStatus,
    pub created_at: String,
    pub updated_at: String,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub metadata: serde_json::Map<String, Value>,
}

impl JobRecord {
    fn new(query: String, status: JobStatus, now: String) -> Self {
        Self {
            query,
            status,
            created_at: now.clone(),
            updated_at: now,
            result: None,
            error: None,
            metadata: serde_json::Map::new(),
        }
    }
}

/// In-process registry of search job state, keyed by `query_hash`.
pub struct JobRegistry {
    jobs: Mutex<HashMap<String, JobRecord>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Mark a job pending, creating it if it doesn't exist yet, or resetting
    /// an existing record's result/error if it does (a resubmission "wins"
    /// over a prior completed/failed state — see `DESIGN.md`).
    pub fn mark_pending(
        &self,
        query_hash: &str,
        query: &str,
        metadata: Option<serde_json::Map<String, Value>>,
    ) -> JobRecord {
        let now = now_iso();
        let mut jobs = self.jobs.lock();
        let record = match jobs.get_mut(query_hash) {
            Some(existing) => {
                if !query.is_empty() {
                    existing.query = query.to_string();
                }
                existing.status = JobStatus::Pending;
                existing.updated_at = now;
                existing.result = None;
                existing.error = None;
                if let Some(metadata) = metadata {
                    existing.metadata.extend(metadata);
                }
                existing.clone()
            }
            None => {
                let mut record = JobRecord::new(query.to_string(), JobStatus::Pending, now);
                if let Some(metadata) = metadata {
                    record.metadata = metadata;
                }
                record
            }
        };
        jobs.insert(query_hash.to_string(), record.clone());
        record
    }

    pub fn mark_completed(&self, query_hash: &str, result: Value) -> JobRecord {
        let now = now_iso();
        let mut jobs = self.jobs.lock();
        let mut record = jobs
            .get(query_hash)
            .cloned()
            .unwrap_or_else(|| JobRecord::new(String::new(), JobStatus::Completed, now.clone()));
        record.status = JobStatus::Completed;
        record.result = Some(result);
        record.error = None;
        record.updated_at = now;
        jobs.insert(query_hash.to_string(), record.clone());
        record
    }

    pub fn mark_failed(&self, query_hash: &str, error: String) -> JobRecord {
        let now = now_iso();
        let mut jobs = self.jobs.lock();
        let mut record = jobs
            .get(query_hash)
            .cloned()
            .unwrap_or_else(|| JobRecord::new(String::new(), JobStatus::Failed, now.clone()));
        record.status = JobStatus::Failed;
        record.error = Some(error);
        record.updated_at = now;
        jobs.insert(query_hash.to_string(), record.clone());
        record
    }

    pub fn get(&self, query_hash: &str) -> Option<JobRecord> {
        self.jobs.lock().get(query_hash).cloned()
    }

    pub fn clear(&self, query_hash: &str) {
        self.jobs.lock().remove(query_hash);
    }

    pub fn reset_all(&self) {
        self.jobs.lock().clear();
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mark_pending_creates_new_record() {
        let registry = JobRegistry::new();
        let record = registry.mark_pending("hash1", "smart speaker", None);
        assert_eq!(record.status, JobStatus::Pending);
        assert_eq!(record.query, "smart speaker");
        assert!(record.result.is_none());
    }

    #[test]
    fn mark_pending_resets_result_and_error_on_resubmission() {
        let registry = JobRegistry::new();
        registry.mark_pending("hash1", "smart speaker", None);
        registry.mark_completed("hash1", json!({"ok": true}));
        let resubmitted = registry.mark_pending("hash1", "smart speaker", None);
        assert_eq!(resubmitted.status, JobStatus::Pending);
        assert!(resubmitted.result.is_none());
        assert!(resubmitted.error.is_none());
    }

    #[test]
    fn mark_completed_creates_record_if_missing() {
        let registry = JobRegistry::new();
        let record = registry.mark_completed("hash-lost", json!({"ok": true}));
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.result, Some(json!({"ok": true})));
    }

    #[test]
    fn mark_failed_creates_record_if_missing() {
        let registry = JobRegistry::new();
        let record = registry.mark_failed("hash-lost", "boom".to_string());
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("boom"));
    }

    #[test]
    fn get_returns_none_for_unknown_hash() {
        let registry = JobRegistry::new();
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn clear_removes_single_job() {
        let registry = JobRegistry::new();
        registry.mark_pending("hash1", "q", None);
        registry.mark_pending("hash2", "q2", None);
        registry.clear("hash1");
        assert!(registry.get("hash1").is_none());
        assert!(registry.get("hash2").is_some());
    }

    #[test]
    fn reset_all_clears_every_job() {
        let registry = JobRegistry::new();
        registry.mark_pending("hash1", "q", None);
        registry.mark_pending("hash2", "q2", None);
        registry.reset_all();
        assert!(registry.get("hash1").is_none());
        assert!(registry.get("hash2").is_none());
    }

    #[test]
    fn metadata_merges_on_resubmission() {
        let registry = JobRegistry::new();
        let mut meta1 = serde_json::Map::new();
        meta1.insert("subject".to_string(), json!("user-1"));
        registry.mark_pending("hash1", "q", Some(meta1));

        let mut meta2 = serde_json::Map::new();
        meta2.insert("guest".to_string(), json!(true));
        let record = registry.mark_pending("hash1", "q", Some(meta2));

        assert_eq!(record.metadata.get("subject"), Some(&json!("user-1")));
        assert_eq!(record.metadata.get("guest"), Some(&json!(true)));
    }
}
