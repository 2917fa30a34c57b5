//! In-memory backends for testing and single-process serving.
//!
//! [`InMemoryCache`] honours TTLs with tokio's clock (so paused-time tests
//! can advance past an expiry), supports sets for dependency tracking, and
//! can be switched into an "unavailable" mode to simulate an outage.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use strata_core::audit::{AuditLog, ContextRecord};
use strata_core::cache::{CacheBackend, Pipeline, PipelineOp};
use strata_core::error::{AuditError, CacheError};
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Stored {
    Bytes(Vec<u8>),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Stored,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// A TTL-aware key-value cache held in a `HashMap`.
pub struct InMemoryCache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    unavailable: AtomicBool,
    operations: AtomicU64,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            unavailable: AtomicBool::new(false),
            operations: AtomicU64::new(0),
        }
    }

    /// Simulate an outage: every operation fails with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of backend operations attempted so far (including failed ones).
    pub fn operations(&self) -> u64 {
        self.operations.load(Ordering::SeqCst)
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remaining time-to-live of a key, if it exists and has an expiry.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        let entry = entries.get(key).filter(|e| e.is_live(now))?;
        entry.expires_at.map(|at| at.saturating_duration_since(now))
    }

    fn begin(&self) -> Result<(), CacheError> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("in-memory cache marked unavailable".into()));
        }
        Ok(())
    }

    fn apply(entries: &mut HashMap<String, Entry>, op: PipelineOp, now: Instant) -> Result<(), CacheError> {
        match op {
            PipelineOp::Set { key, value, ttl } => {
                entries.insert(
                    key,
                    Entry {
                        value: Stored::Bytes(value),
                        expires_at: ttl.map(|t| now + t),
                    },
                );
            }
            PipelineOp::SAdd { key, member } => {
                Self::sadd_locked(entries, &key, member, now)?;
            }
            PipelineOp::Expire { key, ttl } => {
                if let Some(entry) = entries.get_mut(&key).filter(|e| e.is_live(now)) {
                    entry.expires_at = Some(now + ttl);
                }
            }
        }
        Ok(())
    }

    fn sadd_locked(
        entries: &mut HashMap<String, Entry>,
        key: &str,
        member: String,
        now: Instant,
    ) -> Result<bool, CacheError> {
        let live = entries.get(key).is_some_and(|e| e.is_live(now));
        if !live {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Stored::Set(BTreeSet::from([member])),
                    expires_at: None,
                },
            );
            return Ok(true);
        }
        match entries.get_mut(key).map(|e| &mut e.value) {
            Some(Stored::Set(members)) => Ok(members.insert(member)),
            _ => Err(CacheError::WrongType { key: key.to_string() }),
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.begin()?;
        let now = Instant::now();
        let entries = self.entries.read().await;
        match entries.get(key).filter(|e| e.is_live(now)) {
            None => Ok(None),
            Some(Entry {
                value: Stored::Bytes(bytes),
                ..
            }) => Ok(Some(bytes.clone())),
            Some(_) => Err(CacheError::WrongType { key: key.to_string() }),
        }
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, CacheError> {
        self.begin()?;
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(keys
            .iter()
            .map(|key| match entries.get(key).filter(|e| e.is_live(now)) {
                Some(Entry {
                    value: Stored::Bytes(bytes),
                    ..
                }) => Some(bytes.clone()),
                _ => None,
            })
            .collect())
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.begin()?;
        let now = Instant::now();
        self.entries.write().await.insert(
            key.to_string(),
            Entry {
                value: Stored::Bytes(value),
                expires_at: ttl.map(|t| now + t),
            },
        );
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<usize, CacheError> {
        self.begin()?;
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let mut removed = 0;
        for key in keys {
            if let Some(entry) = entries.remove(key) {
                if entry.is_live(now) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, CacheError> {
        self.begin()?;
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        Self::sadd_locked(&mut entries, key, member.to_string(), now)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, CacheError> {
        self.begin()?;
        let now = Instant::now();
        let entries = self.entries.read().await;
        match entries.get(key).filter(|e| e.is_live(now)) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Stored::Set(members),
                ..
            }) => Ok(members.iter().cloned().collect()),
            Some(_) => Err(CacheError::WrongType { key: key.to_string() }),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.begin()?;
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        match entries.get_mut(key).filter(|e| e.is_live(now)) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Applies the whole batch under one write lock, all or nothing.
    ///
    /// Ops run against copies of the keys they touch; the copies replace
    /// the live entries only if every op succeeded.
    async fn execute(&self, pipeline: Pipeline) -> Result<(), CacheError> {
        self.begin()?;
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        let ops = pipeline.into_ops();
        let touched: BTreeSet<String> = ops.iter().map(|op| op_key(op).to_string()).collect();
        let mut staged: HashMap<String, Entry> = touched
            .iter()
            .filter_map(|key| entries.get(key).map(|e| (key.clone(), e.clone())))
            .collect();
        for op in ops {
            Self::apply(&mut staged, op, now)?;
        }

        for key in touched {
            match staged.remove(&key) {
                Some(entry) => entries.insert(key, entry),
                None => entries.remove(&key),
            };
        }
        Ok(())
    }
}

fn op_key(op: &PipelineOp) -> &str {
    match op {
        PipelineOp::Set { key, .. } | PipelineOp::SAdd { key, .. } | PipelineOp::Expire { key, .. } => key,
    }
}

/// An audit log that keeps records in a `Vec`.
pub struct InMemoryAuditLog {
    records: Arc<RwLock<Vec<ContextRecord>>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    fn name(&self) -> &str {
        "memory"
    }

    async fn log_context(&self, record: ContextRecord) -> Result<(), AuditError> {
        self.records.write().await.push(record);
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
