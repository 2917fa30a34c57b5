//! No-op backends — caching and audit logging disabled entirely.

use async_trait::async_trait;
use std::time::Duration;
use strata_core::audit::{AuditLog, ContextRecord};
use strata_core::cache::{CacheBackend, Pipeline};
use strata_core::error::{AuditError, CacheError};

/// A cache that stores nothing. Every read misses.
pub struct NoopCache;

#[async_trait]
impl CacheBackend for NoopCache {
    fn name(&self) -> &str { "none" }

    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(None)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, CacheError> {
        Ok(vec![None; keys.len()])
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Option<Duration>) -> Result<(), CacheError> {
        Ok(())
    }

    async fn delete(&self, _keys: &[String]) -> Result<usize, CacheError> {
        Ok(0)
    }

    async fn sadd(&self, _key: &str, _member: &str) -> Result<bool, CacheError> {
        Ok(false)
    }

    async fn smembers(&self, _key: &str) -> Result<Vec<String>, CacheError> {
        Ok(Vec::new())
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool, CacheError> {
        Ok(false)
    }

    async fn execute(&self, _pipeline: Pipeline) -> Result<(), CacheError> {
        Ok(())
    }
}

/// An audit log that discards every record.
pub struct NoopAuditLog;

#[async_trait]
impl AuditLog for NoopAuditLog {
    fn name(&self) -> &str { "none" }

    async fn log_context(&self, _record: ContextRecord) -> Result<(), AuditError> {
        Ok(())
    }

    async fn get_context(&self, _context_id: &str) -> Result<Option<ContextRecord>, AuditError> {
        Ok(None)
    }

    async fn recent(&self, _limit: usize) -> Result<Vec<ContextRecord>, AuditError> {
        Ok(Vec::new())
    }
}
