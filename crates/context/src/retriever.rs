//! Retrievers: named search functions with optional result caching.
//!
//! Every call made inside a context assembly is recorded into the ambient
//! lineage tracker with its measured latency, whether or not the results
//! came from the cache. Queries may carry `{feature}` placeholders that are
//! filled from the online store for the entity being served.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strata_core::cache::{CacheBackend, keys};
use strata_core::error::BoxError;
use strata_core::lineage::current_tracker;
use tracing::{debug, info, warn};

use crate::error::ContextError;
use crate::template::DependencyResolver;

/// A search backend: query in, ranked documents out.
#[async_trait]
pub trait Search: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Value>, BoxError>;
}

struct FnSearch<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> Search for FnSearch<F, Fut>
where
    F: Fn(String, usize) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<Value>, BoxError>> + Send,
{
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Value>, BoxError> {
        (self.f)(query.to_string(), limit).await
    }
}

/// A named, optionally cached search function.
pub struct Retriever {
    name: String,
    search: Arc<dyn Search>,
    index_name: Option<String>,
    cache: Option<(Arc<dyn CacheBackend>, Duration)>,
    dependencies: Option<(Arc<DependencyResolver>, String)>,
}

impl Retriever {
    pub fn new(name: impl Into<String>, search: Arc<dyn Search>) -> Self {
        Self {
            name: name.into(),
            search,
            index_name: None,
            cache: None,
            dependencies: None,
        }
    }

    /// Build a retriever from an async `(query, limit) -> documents` function.
    pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(String, usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Value>, BoxError>> + Send + 'static,
    {
        Self::new(
            name,
            Arc::new(FnSearch {
                f,
                _marker: PhantomData,
            }),
        )
    }

    pub fn with_index(mut self, index_name: impl Into<String>) -> Self {
        self.index_name = Some(index_name.into());
        self
    }

    /// Cache results under `retriever:{name}:{sha256(query, limit)}` for `ttl`.
    pub fn with_cache(mut self, cache: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        self.cache = Some((cache, ttl));
        self
    }

    /// Fill `{feature}` placeholders in queries from `entity_name` features.
    pub fn with_dependencies(
        mut self,
        resolver: Arc<DependencyResolver>,
        entity_name: impl Into<String>,
    ) -> Self {
        self.dependencies = Some((resolver, entity_name.into()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve the query's placeholders for `entity_id`, then search.
    ///
    /// A query whose dependencies cannot be resolved is searched as written.
    pub async fn retrieve_for(
        &self,
        entity_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Value>, ContextError> {
        let Some((resolver, entity_name)) = &self.dependencies else {
            return self.retrieve(query, limit).await;
        };
        let query = match resolver.resolve(query, entity_name, entity_id).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(retriever = %self.name, entity_id = %entity_id, error = %e, "Query dependency resolution failed");
                query.to_string()
            }
        };
        self.retrieve(&query, limit).await
    }

    /// Run the search. Cache failures fall through to the backend.
    pub async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<Value>, ContextError> {
        let started = Instant::now();
        let key = self.cache.as_ref().map(|_| self.cache_key(query, limit));

        let mut results = None;
        if let (Some((cache, _)), Some(key)) = (&self.cache, &key) {
            match cache.get(key).await {
                Ok(Some(bytes)) => match serde_json::from_slice::<Vec<Value>>(&bytes) {
                    Ok(docs) => {
                        debug!(retriever = %self.name, "Retriever cache hit");
                        results = Some(docs);
                    }
                    Err(e) => warn!(retriever = %self.name, error = %e, "Undecodable cached retriever result"),
                },
                Ok(None) => {}
                Err(e) => warn!(retriever = %self.name, error = %e, "Retriever cache read failed"),
            }
        }

        let results = match results {
            Some(docs) => docs,
            None => {
                let docs = self
                    .search
                    .search(query, limit)
                    .await
                    .map_err(|source| ContextError::Retriever {
                        name: self.name.clone(),
                        source,
                    })?;
                if let (Some((cache, ttl)), Some(key)) = (&self.cache, &key) {
                    match serde_json::to_vec(&docs) {
                        Ok(bytes) => {
                            if let Err(e) = cache.set(key, bytes, Some(*ttl)).await {
                                warn!(retriever = %self.name, error = %e, "Retriever cache write failed");
                            }
                        }
                        Err(e) => warn!(retriever = %self.name, error = %e, "Retriever result not serializable"),
                    }
                }
                docs
            }
        };

        if let Some(tracker) = current_tracker() {
            tracker.record_retriever(
                &self.name,
                query,
                results.len(),
                started.elapsed().as_secs_f64() * 1000.0,
                self.index_name.clone(),
            );
        }
        Ok(results)
    }

    fn cache_key(&self, query: &str, limit: usize) -> String {
        let digest = Sha256::digest(format!("{query}\u{0}{limit}").as_bytes());
        keys::retriever(&self.name, &hex::encode(digest))
    }
}

/// Retrievers by name.
///
/// Re-registering a name replaces the previous retriever.
#[derive(Default)]
pub struct RetrieverRegistry {
    retrievers: RwLock<HashMap<String, Arc<Retriever>>>,
}

impl RetrieverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, retriever: Retriever) -> Arc<Retriever> {
        let retriever = Arc::new(retriever);
        let previous = self
            .retrievers
            .write()
            .insert(retriever.name.clone(), Arc::clone(&retriever));
        if previous.is_some() {
            warn!(retriever = %retriever.name, "Overwriting existing retriever");
        } else {
            info!(retriever = %retriever.name, "Registered retriever");
        }
        retriever
    }

    pub fn get(&self, name: &str) -> Option<Arc<Retriever>> {
        self.retrievers.read().get(name).cloned()
    }

    /// All registered retriever names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.retrievers.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use strata_core::lineage::{AssemblyTracker, with_tracker};
    use strata_store::InMemoryCache;

    fn counting_retriever(calls: Arc<AtomicUsize>) -> Retriever {
        Retriever::from_fn("docs", move |query: String, limit: usize| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<Vec<Value>, BoxError>((0..limit).map(|i| json!({ "q": query, "rank": i })).collect())
            }
        })
    }

    #[tokio::test]
    async fn records_lineage_inside_assembly() {
        let retriever = counting_retriever(Arc::new(AtomicUsize::new(0))).with_index("kb");
        let tracker = Arc::new(AssemblyTracker::new("ctx"));

        let docs = with_tracker(tracker.clone(), retriever.retrieve("rust", 3))
            .await
            .unwrap();
        assert_eq!(docs.len(), 3);

        let recorded = tracker.retrievers();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].retriever_name, "docs");
        assert_eq!(recorded[0].query, "rust");
        assert_eq!(recorded[0].results_count, 3);
        assert_eq!(recorded[0].index_name.as_deref(), Some("kb"));
    }

    #[tokio::test]
    async fn caches_results() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(InMemoryCache::new());
        let retriever = counting_retriever(calls.clone()).with_cache(cache, Duration::from_secs(60));

        let first = retriever.retrieve("rust", 2).await.unwrap();
        let second = retriever.retrieve("rust", 2).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        retriever.retrieve("go", 2).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unavailable_cache_falls_through() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(InMemoryCache::new());
        cache.set_unavailable(true);
        let retriever = counting_retriever(calls.clone()).with_cache(cache, Duration::from_secs(60));

        assert_eq!(retriever.retrieve("rust", 1).await.unwrap().len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn registry_replaces_by_name() {
        let registry = RetrieverRegistry::new();
        assert!(registry.get("docs").is_none());

        registry.register(counting_retriever(Arc::new(AtomicUsize::new(0))));
        registry.register(counting_retriever(Arc::new(AtomicUsize::new(0))).with_index("v2"));
        registry.register(Retriever::from_fn("web", |_: String, _: usize| async {
            Ok::<Vec<Value>, BoxError>(Vec::new())
        }));

        assert_eq!(registry.names(), vec!["docs", "web"]);
        assert_eq!(registry.get("docs").unwrap().index_name.as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn search_failure_propagates() {
        let retriever = Retriever::from_fn("broken", |_: String, _: usize| async {
            Err::<Vec<Value>, BoxError>("index offline".into())
        });
        let err = retriever.retrieve("q", 1).await.unwrap_err();
        assert!(matches!(err, ContextError::Retriever { .. }));
    }
}
