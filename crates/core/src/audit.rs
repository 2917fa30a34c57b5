//! Audit log trait — durable record of every assembled context.
//!
//! Written once per assembly for audit and replay. Failures are reported to
//! the caller, which logs and ignores them: persistence is best-effort.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AuditError;
use crate::lineage::ContextLineage;

/// One persisted context assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextRecord {
    pub context_id: String,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineage: Option<ContextLineage>,
    /// Serialized metadata bag of the context.
    #[serde(default)]
    pub meta: Value,
    /// Format version of the record.
    pub version: String,
}

/// The core AuditLog trait.
///
/// Implementations: in-memory, JSON-lines file, no-op.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// The backend name (e.g., "memory", "file", "none").
    fn name(&self) -> &str;

    /// Persist one context record.
    async fn log_context(&self, record: ContextRecord) -> Result<(), AuditError>;

    /// Fetch a record by context id.
    async fn get_context(&self, context_id: &str) -> Result<Option<ContextRecord>, AuditError>;

    /// Most recent records first, at most `limit`.
    async fn recent(&self, limit: usize) -> Result<Vec<ContextRecord>, AuditError>;
}
