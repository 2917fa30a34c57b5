//! Lineage records and the ambient per-assembly tracker.
//!
//! One [`AssemblyTracker`] is bound for the dynamic extent of a context
//! assembly with [`with_tracker`]. Feature and retriever calls made anywhere
//! inside that future, however deeply nested, find it through
//! [`current_tracker`] without it being passed explicitly.
//!
//! The binding is a tokio task-local: concurrent assemblies on other tasks
//! see their own tracker (or none), and the previous binding is restored
//! when the scoped future completes, fails, panics, or is dropped.
//! Work moved onto a freshly spawned task does not inherit the binding.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Where a feature value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineageSource {
    Cache,
    Compute,
    Default,
}

impl std::fmt::Display for LineageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cache => write!(f, "cache"),
            Self::Compute => write!(f, "compute"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// Overall freshness of an assembled context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessStatus {
    Guaranteed,
    Degraded,
    #[default]
    Unknown,
}

impl std::fmt::Display for FreshnessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Guaranteed => write!(f, "guaranteed"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// One feature value used during an assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureLineage {
    pub feature_name: String,
    pub entity_id: String,
    pub value: Value,
    /// When the value was produced.
    pub timestamp: DateTime<Utc>,
    /// Age of the value at the time it was recorded.
    pub freshness_ms: u64,
    pub source: LineageSource,
}

/// One retriever call made during an assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrieverLineage {
    pub retriever_name: String,
    pub query: String,
    pub results_count: usize,
    pub latency_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_name: Option<String>,
}

/// A tracked feature whose age exceeded the freshness SLA.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessViolation {
    pub feature: String,
    pub age_ms: u64,
    pub sla_ms: u64,
}

/// Full provenance of one assembled context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextLineage {
    pub context_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub features_used: Vec<FeatureLineage>,
    #[serde(default)]
    pub retrievers_used: Vec<RetrieverLineage>,
    pub items_provided: usize,
    pub items_included: usize,
    pub items_dropped: usize,
    #[serde(default)]
    pub freshness_status: FreshnessStatus,
    pub stalest_feature_ms: u64,
    #[serde(default)]
    pub freshness_violations: Vec<FreshnessViolation>,
    pub token_usage: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    pub estimated_cost_usd: f64,
}

/// Mutable ledger of every feature/retriever call made during one assembly.
#[derive(Debug)]
pub struct AssemblyTracker {
    context_id: String,
    started_at: DateTime<Utc>,
    features: Mutex<Vec<FeatureLineage>>,
    retrievers: Mutex<Vec<RetrieverLineage>>,
}

impl AssemblyTracker {
    pub fn new(context_id: impl Into<String>) -> Self {
        Self {
            context_id: context_id.into(),
            started_at: Utc::now(),
            features: Mutex::new(Vec::new()),
            retrievers: Mutex::new(Vec::new()),
        }
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Record a feature value. `freshness_ms` is computed against now;
    /// timestamps in the future count as zero age.
    pub fn record_feature(
        &self,
        feature_name: impl Into<String>,
        entity_id: impl Into<String>,
        value: Value,
        timestamp: DateTime<Utc>,
        source: LineageSource,
    ) {
        let age = Utc::now().signed_duration_since(timestamp).num_milliseconds();
        self.features.lock().push(FeatureLineage {
            feature_name: feature_name.into(),
            entity_id: entity_id.into(),
            value,
            timestamp,
            freshness_ms: age.max(0) as u64,
            source,
        });
    }

    pub fn record_retriever(
        &self,
        retriever_name: impl Into<String>,
        query: impl Into<String>,
        results_count: usize,
        latency_ms: f64,
        index_name: Option<String>,
    ) {
        self.retrievers.lock().push(RetrieverLineage {
            retriever_name: retriever_name.into(),
            query: query.into(),
            results_count,
            latency_ms,
            index_name,
        });
    }

    /// Snapshot of recorded features, in call order.
    pub fn features(&self) -> Vec<FeatureLineage> {
        self.features.lock().clone()
    }

    /// Snapshot of recorded retriever calls, in call order.
    pub fn retrievers(&self) -> Vec<RetrieverLineage> {
        self.retrievers.lock().clone()
    }

    /// Maximum `freshness_ms` across recorded features, 0 if none.
    pub fn stalest_feature_ms(&self) -> u64 {
        self.features
            .lock()
            .iter()
            .map(|f| f.freshness_ms)
            .max()
            .unwrap_or(0)
    }
}

tokio::task_local! {
    static CURRENT_TRACKER: Arc<AssemblyTracker>;
}

/// Run `fut` with `tracker` bound as the current tracker.
pub async fn with_tracker<F>(tracker: Arc<AssemblyTracker>, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT_TRACKER.scope(tracker, fut).await
}

/// The tracker bound to the current task, if an assembly is in progress.
pub fn current_tracker() -> Option<Arc<AssemblyTracker>> {
    CURRENT_TRACKER.try_with(Arc::clone).ok()
}
