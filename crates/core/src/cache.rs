//! Cache trait — the fast key-value store features and contexts are served from.
//!
//! Backends may be unavailable at any time; every method returns
//! `CacheError` and callers decide whether to degrade or propagate.
//! Batched writes go through a [`Pipeline`] that is queued locally and
//! handed to [`CacheBackend::execute`] in one call.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::CacheError;

/// One queued pipeline operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOp {
    Set {
        key: String,
        value: Vec<u8>,
        ttl: Option<Duration>,
    },
    SAdd {
        key: String,
        member: String,
    },
    Expire {
        key: String,
        ttl: Duration,
    },
}

/// A batch of writes executed together from the caller's point of view.
///
/// Atomicity on the server side is backend-specific and not guaranteed.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    ops: Vec<PipelineOp>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: Vec<u8>, ttl: Option<Duration>) -> &mut Self {
        self.ops.push(PipelineOp::Set {
            key: key.into(),
            value,
            ttl,
        });
        self
    }

    pub fn sadd(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.ops.push(PipelineOp::SAdd {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn expire(&mut self, key: impl Into<String>, ttl: Duration) -> &mut Self {
        self.ops.push(PipelineOp::Expire {
            key: key.into(),
            ttl,
        });
        self
    }

    pub fn ops(&self) -> &[PipelineOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<PipelineOp> {
        self.ops
    }
}

/// The core CacheBackend trait.
///
/// Implementations: in-memory (for tests and single-process serving),
/// no-op, or a network store supplied by the application.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// The backend name (e.g., "memory", "none").
    fn name(&self) -> &str;

    /// Fetch a value.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Fetch several values in one round trip. Output order matches `keys`.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, CacheError> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    /// Store a value, optionally expiring after `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Delete keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<usize, CacheError>;

    /// Add a member to a set. Returns true if it was not already present.
    async fn sadd(&self, key: &str, member: &str) -> Result<bool, CacheError>;

    /// All members of a set (empty if the key does not exist).
    async fn smembers(&self, key: &str) -> Result<Vec<String>, CacheError>;

    /// Set an expiry on an existing key. Returns false if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;

    /// Start a new write batch.
    fn pipeline(&self) -> Pipeline {
        Pipeline::new()
    }

    /// Execute a batch. The default runs operations in order and stops at
    /// the first failure.
    async fn execute(&self, pipeline: Pipeline) -> Result<(), CacheError> {
        for op in pipeline.into_ops() {
            match op {
                PipelineOp::Set { key, value, ttl } => self.set(&key, value, ttl).await?,
                PipelineOp::SAdd { key, member } => {
                    self.sadd(&key, &member).await?;
                }
                PipelineOp::Expire { key, ttl } => {
                    self.expire(&key, ttl).await?;
                }
            }
        }
        Ok(())
    }
}

/// Key naming conventions shared by every component.
pub mod keys {
    /// `context:{name}:{args_hash}`
    pub fn context(name: &str, args_hash: &str) -> String {
        format!("context:{name}:{args_hash}")
    }

    /// `trace:{context_id}`
    pub fn trace(context_id: &str) -> String {
        format!("trace:{context_id}")
    }

    /// `dependency:{source_id}`
    pub fn dependency(source_id: &str) -> String {
        format!("dependency:{source_id}")
    }

    /// `feature:{entity}:{entity_id}:{feature}`
    pub fn feature(entity_name: &str, entity_id: &str, feature: &str) -> String {
        format!("feature:{entity_name}:{entity_id}:{feature}")
    }

    /// `retriever:{name}:{query_hash}`
    pub fn retriever(name: &str, query_hash: &str) -> String {
        format!("retriever:{name}:{query_hash}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_queues_in_order() {
        let mut pipeline = Pipeline::new();
        pipeline
            .set("a", b"1".to_vec(), None)
            .sadd("dependency:x", "a")
            .expire("dependency:x", Duration::from_secs(10));

        assert_eq!(pipeline.len(), 3);
        assert!(matches!(pipeline.ops()[0], PipelineOp::Set { .. }));
        assert!(matches!(pipeline.ops()[1], PipelineOp::SAdd { .. }));
        assert!(matches!(pipeline.ops()[2], PipelineOp::Expire { .. }));
    }

    #[test]
    fn key_conventions() {
        assert_eq!(keys::context("chat", "abc"), "context:chat:abc");
        assert_eq!(keys::trace("id1"), "trace:id1");
        assert_eq!(keys::dependency("user_clicks"), "dependency:user_clicks");
        assert_eq!(keys::feature("User", "u1", "clicks"), "feature:User:u1:clicks");
    }
}
