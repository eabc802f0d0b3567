//! Best-effort audit records, one per run id.
//!
//! The audit record is an observability artifact, not run state: the
//! orchestrator upserts it after every agent turn when audit logging is
//! enabled, and swallows every failure — run correctness never depends on
//! it. Timestamps are stamped *here*, inside the store implementations,
//! because the orchestrator's control logic must stay free of wall-clock
//! reads.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::AgentRole;
use crate::error::ActivityError;
use crate::run::RunId;

/// One appended agent response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub agent: AgentRole,
    pub response: Value,
    /// Stamped by the store at append time.
    pub timestamp: String,
}

/// The full per-run audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    /// The original trigger request, captured verbatim.
    pub request: Value,
    /// Ordered append log of agent responses.
    pub responses: Vec<AuditEntry>,
    /// The latest extract, updated when the Format turn lands.
    pub extract: Value,
}

impl AuditRecord {
    /// A fresh record for a run, before any agent turn.
    pub fn new(run_id: &RunId, request: Value) -> Self {
        Self {
            id: run_id.as_str().to_string(),
            request,
            responses: Vec::new(),
            extract: Value::Null,
        }
    }
}

fn timestamp_now() -> String {
    chrono::Utc::now().format("%m/%d/%Y, %H:%M:%S").to_string()
}

/// Durable store for audit records, keyed by run id.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Create (or overwrite) the run's record.
    async fn create(&self, record: AuditRecord) -> Result<(), ActivityError>;

    /// Append a response to the run's record; when `extract` is given, also
    /// update the record's latest extract. Upsert semantics: appending to a
    /// missing record creates it.
    async fn append(
        &self,
        run_id: &RunId,
        agent: AgentRole,
        response: &Value,
        extract: Option<&Value>,
    ) -> Result<(), ActivityError>;

    /// Load the run's record, if one exists.
    async fn load(&self, run_id: &RunId) -> Result<Option<AuditRecord>, ActivityError>;
}

// ── In-memory implementation ─────────────────────────────────────────────

/// In-memory audit store for tests and embedders.
#[derive(Default)]
pub struct MemoryAuditStore {
    records: RwLock<HashMap<String, AuditRecord>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn append_to(record: &mut AuditRecord, agent: AgentRole, response: &Value, extract: Option<&Value>) {
    record.responses.push(AuditEntry {
        agent,
        response: response.clone(),
        timestamp: timestamp_now(),
    });
    if let Some(extract) = extract {
        record.extract = extract.clone();
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn create(&self, record: AuditRecord) -> Result<(), ActivityError> {
        self.records
            .write()
            .expect("lock")
            .insert(record.id.clone(), record);
        Ok(())
    }

    async fn append(
        &self,
        run_id: &RunId,
        agent: AgentRole,
        response: &Value,
        extract: Option<&Value>,
    ) -> Result<(), ActivityError> {
        let mut records = self.records.write().expect("lock");
        let record = records
            .entry(run_id.as_str().to_string())
            .or_insert_with(|| AuditRecord::new(run_id, Value::Null));
        append_to(record, agent, response, extract);
        Ok(())
    }

    async fn load(&self, run_id: &RunId) -> Result<Option<AuditRecord>, ActivityError> {
        Ok(self
            .records
            .read()
            .expect("lock")
            .get(run_id.as_str())
            .cloned())
    }
}

// ── Filesystem implementation ────────────────────────────────────────────

/// One JSON file per run id under a directory.
pub struct FsAuditStore {
    dir: PathBuf,
}

impl FsAuditStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, run_id: &RunId) -> PathBuf {
        self.dir.join(format!("{}.json", run_id.as_str()))
    }

    async fn write_record(&self, record: &AuditRecord) -> Result<(), ActivityError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!("{}.json", record.id));
        let tmp = self.dir.join(format!("{}.json.tmp", record.id));
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(record)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl AuditStore for FsAuditStore {
    async fn create(&self, record: AuditRecord) -> Result<(), ActivityError> {
        self.write_record(&record).await
    }

    async fn append(
        &self,
        run_id: &RunId,
        agent: AgentRole,
        response: &Value,
        extract: Option<&Value>,
    ) -> Result<(), ActivityError> {
        let mut record = self
            .load(run_id)
            .await?
            .unwrap_or_else(|| AuditRecord::new(run_id, Value::Null));
        append_to(&mut record, agent, response, extract);
        self.write_record(&record).await
    }

    async fn load(&self, run_id: &RunId) -> Result<Option<AuditRecord>, ActivityError> {
        match tokio::fs::read(self.record_path(run_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_store_appends_in_order_and_updates_extract() {
        let store = MemoryAuditStore::new();
        let run_id = RunId::new("r1");
        store
            .create(AuditRecord::new(&run_id, json!({"container": "inbox"})))
            .await
            .unwrap();

        store
            .append(&run_id, AgentRole::Analyst, &json!({"total": 1}), None)
            .await
            .unwrap();
        store
            .append(
                &run_id,
                AgentRole::Formatter,
                &json!({"total": 2}),
                Some(&json!({"total": 2})),
            )
            .await
            .unwrap();

        let record = store.load(&run_id).await.unwrap().unwrap();
        assert_eq!(record.responses.len(), 2);
        assert_eq!(record.responses[0].agent, AgentRole::Analyst);
        assert_eq!(record.responses[1].agent, AgentRole::Formatter);
        assert!(!record.responses[0].timestamp.is_empty());
        assert_eq!(record.extract, json!({"total": 2}));
        assert_eq!(record.request, json!({"container": "inbox"}));
    }

    #[tokio::test]
    async fn append_upserts_missing_record() {
        let store = MemoryAuditStore::new();
        let run_id = RunId::new("r2");
        store
            .append(&run_id, AgentRole::Reviewer, &json!({"complete": true}), None)
            .await
            .unwrap();
        let record = store.load(&run_id).await.unwrap().unwrap();
        assert_eq!(record.responses.len(), 1);
    }

    #[tokio::test]
    async fn fs_store_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsAuditStore::new(dir.path());
        let run_id = RunId::new("r3");

        store
            .create(AuditRecord::new(&run_id, json!({"filename": "a.pdf"})))
            .await
            .unwrap();
        store
            .append(&run_id, AgentRole::Analyst, &json!("raw text"), None)
            .await
            .unwrap();

        let store2 = FsAuditStore::new(dir.path());
        let record = store2.load(&run_id).await.unwrap().unwrap();
        assert_eq!(record.request, json!({"filename": "a.pdf"}));
        assert_eq!(record.responses[0].response, json!("raw text"));
    }

    #[tokio::test]
    async fn fs_store_missing_record_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsAuditStore::new(dir.path());
        assert!(store.load(&RunId::new("ghost")).await.unwrap().is_none());
    }
}
