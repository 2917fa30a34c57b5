//! File-based audit log — append-only JSON-lines storage.
//!
//! Each line is a JSON-encoded `ContextRecord`. Records are loaded into
//! memory on creation; every new record is appended to the file so the log
//! survives restarts and stays human-inspectable.
//!
//! Storage location: `~/.strata/audit/contexts.jsonl`

use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strata_core::audit::{AuditLog, ContextRecord};
use strata_core::error::AuditError;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// A file-backed audit log using JSONL (one JSON object per line).
pub struct FileAuditLog {
    path: PathBuf,
    records: Arc<RwLock<Vec<ContextRecord>>>,
}

impl FileAuditLog {
    /// Open the log at the given path.
    ///
    /// Existing records are loaded; a missing file starts empty and is
    /// created on first write.
    pub fn new(path: PathBuf) -> Self {
        let records = Self::load_from_disk(&path);
        debug!(path = %path.display(), count = records.len(), "File audit log loaded");
        Self {
            path,
            records: Arc::new(RwLock::new(records)),
        }
    }

    /// Default path: `~/.strata/audit/contexts.jsonl`
    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home)
            .join(".strata")
            .join("audit")
            .join("contexts.jsonl")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_disk(path: &Path) -> Vec<ContextRecord> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<ContextRecord>(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted audit record");
                    None
                }
            })
            .collect()
    }

    fn append_line(&self, line: &str) -> Result<(), AuditError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AuditError::Storage(format!("Failed to create audit directory: {e}"))
            })?;
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| AuditError::Storage(format!("Failed to open audit file: {e}")))?;

        writeln!(file, "{line}")
            .map_err(|e| AuditError::Storage(format!("Failed to write audit file: {e}")))
    }
}

#[async_trait]
impl AuditLog for FileAuditLog {
    fn name(&self) -> &str {
        "file"
    }

    async fn log_context(&self, record: ContextRecord) -> Result<(), AuditError> {
        let line = serde_json::to_string(&record)?;
        // Hold the write lock across the append so lines never interleave.
        let mut records = self.records.write().await;
        self.append_line(&line)?;
        records.push(record);
        Ok(())
    }

    async fn get_context(&self, context_id: &str) -> Result<Option<ContextRecord>, AuditError> {
        let records = self.records.read().await;
        Ok(records.iter().rev().find(|r| r.context_id == context_id).cloned())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ContextRecord>, AuditError> {
        let records = self.records.read().await;
        Ok(records.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::NamedTempFile;

    fn record(id: &str) -> ContextRecord {
        ContextRecord {
            context_id: id.into(),
            timestamp: Utc::now(),
            content: format!("content for {id}"),
            lineage: None,
            meta: serde_json::json!({ "name": "chat" }),
            version: "v1".into(),
        }
    }

    #[tokio::test]
    async fn append_and_reload() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_path_buf();

        {
            let log = FileAuditLog::new(path.clone());
            log.log_context(record("a")).await.unwrap();
            log.log_context(record("b")).await.unwrap();
        }

        let reloaded = FileAuditLog::new(path);
        let found = reloaded.get_context("a").await.unwrap().unwrap();
        assert_eq!(found.content, "content for a");
        assert_eq!(reloaded.recent(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("audit.jsonl");
        let log = FileAuditLog::new(path.clone());
        log.log_context(record("x")).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn handles_corrupted_lines() {
        let tmp = NamedTempFile::new().unwrap();
        let good = serde_json::to_string(&record("good")).unwrap();
        std::fs::write(tmp.path(), format!("{good}\nnot json at all\n\n")).unwrap();

        let log = FileAuditLog::new(tmp.path().to_path_buf());
        let recent = log.recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].context_id, "good");
    }

    #[tokio::test]
    async fn missing_record_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileAuditLog::new(dir.path().join("audit.jsonl"));
        assert!(log.get_context("nope").await.unwrap().is_none());
    }
}
