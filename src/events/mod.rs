//! Audit trail: fire-and-forget sink, background consumer, writers.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use tokio::sync::mpsc;

use crate::errors::AuditError;
pub use crate::models::rbac::AuditRecord;

/// Severity levels for audit entries.
/// Controls retention policies and log filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Outages and high-sensitivity actions: never auto-delete
    Critical,
    /// Policy denials (default)
    Important,
    /// Routine allow records
    Noise,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Important => "important",
            Severity::Noise => "noise",
        }
    }

    pub fn for_action(action_type: &str) -> Self {
        if action_type.ends_with("infrastructure_failure") {
            Severity::Critical
        } else if action_type.starts_with("authz.allowed") {
            Severity::Noise
        } else {
            Severity::Important
        }
    }
}

/// Receives audit records. Must never block the caller.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: AuditRecord) -> Result<(), AuditError>;
}

/// Hands records to a background consumer over a bounded channel.
///
/// When the channel is full the new record is dropped and reported to the caller.
#[derive(Debug, Clone)]
pub struct ChannelAuditSink {
    tx: mpsc::Sender<AuditRecord>,
}

impl ChannelAuditSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AuditRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl AuditSink for ChannelAuditSink {
    fn record(&self, record: AuditRecord) -> Result<(), AuditError> {
        self.tx.try_send(record).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => AuditError::ChannelFull,
            mpsc::error::TrySendError::Closed(_) => AuditError::ChannelClosed,
        })
    }
}

/// Keeps records in memory; handy for tests and local tooling.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: AuditRecord) -> Result<(), AuditError> {
        self.records
            .lock()
            .map_err(|_| AuditError::Write("audit buffer poisoned".to_string()))?
            .push(record);
        Ok(())
    }
}

/// Durable destination for audit records, driven by [`start_audit_listener`].
#[async_trait]
pub trait AuditWriter: Send + Sync {
    async fn write(&self, record: &AuditRecord) -> Result<(), AuditError>;
}

/// Writes records to the log as structured events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditWriter;

#[async_trait]
impl AuditWriter for TracingAuditWriter {
    async fn write(&self, record: &AuditRecord) -> Result<(), AuditError> {
        tracing::info!(
            target: "audit",
            event_id = %record.event_id,
            action = %record.action_type,
            actor_id = ?record.actor_id,
            tenant_id = ?record.tenant_id,
            resource_type = %record.resource_type,
            resource_id = %record.resource_id,
            metadata = %record.metadata,
            "audit record"
        );
        Ok(())
    }
}

/// Appends records to `audit_log`, chaining each row to the previous one with
/// SHA256(prev_hash || payload).
#[derive(Debug, Clone)]
pub struct SqliteAuditWriter {
    pool: SqlitePool,
}

impl SqliteAuditWriter {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn chain_hash(prev_hash: Option<&str>, payload: &str) -> String {
        let mut hasher = Sha256::new();
        if let Some(prev) = prev_hash {
            hasher.update(prev.as_bytes());
        }
        hasher.update(payload.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Recomputes the hash chain; returns the number of rows checked or the
    /// id of the first row that does not match.
    pub async fn verify_chain(&self) -> Result<Result<usize, String>, AuditError> {
        let rows = sqlx::query("SELECT id, payload, prev_hash, hash FROM audit_log ORDER BY seq ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AuditError::Write(e.to_string()))?;

        let mut expected_prev: Option<String> = None;
        for row in &rows {
            let decode = |e: sqlx::Error| AuditError::Write(format!("unreadable audit row: {e}"));
            let id: String = row.try_get("id").map_err(decode)?;
            let payload: String = row.try_get("payload").map_err(decode)?;
            let prev_hash: Option<String> = row.try_get("prev_hash").map_err(decode)?;
            let hash: String = row.try_get("hash").map_err(decode)?;

            if prev_hash != expected_prev || Self::chain_hash(prev_hash.as_deref(), &payload) != hash {
                return Ok(Err(id));
            }
            expected_prev = Some(hash);
        }
        Ok(Ok(rows.len()))
    }
}

#[async_trait]
impl AuditWriter for SqliteAuditWriter {
    async fn write(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let payload = serde_json::to_string(record).map_err(|e| AuditError::Write(e.to_string()))?;
        let metadata = record.metadata.to_string();
        let severity = Severity::for_action(&record.action_type);

        let prev_hash: Option<String> = sqlx::query_scalar("SELECT hash FROM audit_log ORDER BY seq DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AuditError::Write(e.to_string()))?;
        let hash = Self::chain_hash(prev_hash.as_deref(), &payload);

        sqlx::query(
            r#"
            INSERT INTO audit_log (id, occurred_at, tenant_id, actor_id, actor_ip, resource_type, resource_id, action_type, metadata, severity, payload, prev_hash, hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.event_id.to_string())
        .bind(record.timestamp)
        .bind(&record.tenant_id)
        .bind(record.actor_id.map(|id| id.to_string()))
        .bind(&record.actor_ip)
        .bind(&record.resource_type)
        .bind(&record.resource_id)
        .bind(&record.action_type)
        .bind(&metadata)
        .bind(severity.as_str())
        .bind(&payload)
        .bind(&prev_hash)
        .bind(&hash)
        .execute(&self.pool)
        .await
        .map_err(|e| AuditError::Write(e.to_string()))?;

        Ok(())
    }
}

/// Drains the audit channel until every sender is gone.
pub async fn start_audit_listener(mut rx: mpsc::Receiver<AuditRecord>, writer: Arc<dyn AuditWriter>) {
    tracing::info!("Audit listener started");
    while let Some(record) = rx.recv().await {
        if let Err(e) = writer.write(&record).await {
            tracing::error!(event_id = %record.event_id, action = %record.action_type, "Failed to save audit record: {}", e);
        }
    }
    tracing::info!("Audit listener stopped");
}
