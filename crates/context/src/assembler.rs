//! Context assembly: cache check, execute, budget, freshness, persist.
//!
//! ```text
//! cache-check ──hit──▶ return cached context
//!      │miss
//!      ▼
//! execute (tracker bound) ─▶ budget ─▶ freshness ─▶ economics ─▶ persist ─▶ return
//! ```
//!
//! Failures of the user's assembly function and strict-mode violations
//! propagate. Cache reads and writes, traces, and the audit log are
//! best-effort: they are bounded by `io_timeout`, logged, and never fail an
//! assembly.

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strata_core::audit::{AuditLog, ContextRecord};
use strata_core::cache::{CacheBackend, keys};
use strata_core::error::BoxError;
use strata_core::lineage::{AssemblyTracker, ContextLineage, with_tracker};
use strata_telemetry::PricingTable;
use strata_telemetry::metrics::{
    CONTEXT_ASSEMBLY_SECONDS, CONTEXT_CACHE_HITS_TOTAL, CONTEXT_FRESHNESS_VIOLATIONS_TOTAL,
    CONTEXT_STALEST_FEATURE_MS, CONTEXT_TOKEN_USAGE,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::budget::{BudgetPolicy, render, trim_to_budget};
use crate::error::ContextError;
use crate::freshness::{evaluate, parse_duration, stale_items};
use crate::model::{AssemblyOutput, Context, ContextItem, ContextMeta, ContextTrace};
use crate::token::{EstimateCounter, TokenCounter};

/// Version tag written with every audit record.
pub const RECORD_VERSION: &str = "v1";

/// Declarative description of one context.
#[derive(Clone)]
pub struct ContextDefinition {
    pub name: String,
    pub max_tokens: Option<usize>,
    pub cache_ttl: Option<Duration>,
    /// Maximum age of a cached context, and of items carrying `last_updated`.
    pub max_staleness: Option<Duration>,
    /// Maximum age of any feature value used during assembly.
    pub freshness_sla: Option<Duration>,
    /// Fail instead of degrading when the SLA is violated.
    pub freshness_strict: bool,
    /// Overrides the assembler's default policy.
    pub budget_policy: Option<BudgetPolicy>,
    /// Overrides the assembler's default pricing model.
    pub model: Option<String>,
    /// Overrides the assembler's counter.
    pub token_counter: Option<Arc<dyn TokenCounter>>,
}

impl ContextDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_tokens: None,
            cache_ttl: None,
            max_staleness: None,
            freshness_sla: None,
            freshness_strict: false,
            budget_policy: None,
            model: None,
            token_counter: None,
        }
    }

    pub fn max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn max_staleness(mut self, max_staleness: Duration) -> Self {
        self.max_staleness = Some(max_staleness);
        self
    }

    pub fn freshness_sla(mut self, sla: Duration) -> Self {
        self.freshness_sla = Some(sla);
        self
    }

    /// Set the SLA from a compact string such as `"5m"`.
    pub fn parse_freshness_sla(self, sla: &str) -> Result<Self, ContextError> {
        Ok(self.freshness_sla(parse_duration(sla)?))
    }

    pub fn freshness_strict(mut self, strict: bool) -> Self {
        self.freshness_strict = strict;
        self
    }

    pub fn budget_policy(mut self, policy: BudgetPolicy) -> Self {
        self.budget_policy = Some(policy);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.token_counter = Some(counter);
        self
    }
}

impl std::fmt::Debug for ContextDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextDefinition")
            .field("name", &self.name)
            .field("max_tokens", &self.max_tokens)
            .field("cache_ttl", &self.cache_ttl)
            .field("max_staleness", &self.max_staleness)
            .field("freshness_sla", &self.freshness_sla)
            .field("freshness_strict", &self.freshness_strict)
            .field("budget_policy", &self.budget_policy)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// Assembler-wide settings.
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    /// Pricing model when a definition names none.
    pub default_model: String,
    /// Retention of `trace:{id}` entries.
    pub trace_ttl: Duration,
    /// Deadline for each cache, trace, and audit-log call.
    pub io_timeout: Duration,
    pub budget_policy: BudgetPolicy,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            default_model: "gpt-4o".into(),
            trace_ttl: Duration::from_secs(24 * 60 * 60),
            io_timeout: Duration::from_secs(1),
            budget_policy: BudgetPolicy::Graceful,
        }
    }
}

/// Builds contexts from user assembly functions.
pub struct ContextAssembler {
    cache: Option<Arc<dyn CacheBackend>>,
    audit: Option<Arc<dyn AuditLog>>,
    pricing: Arc<PricingTable>,
    counter: Arc<dyn TokenCounter>,
    config: AssemblerConfig,
}

impl ContextAssembler {
    /// An assembler with no cache and no audit log.
    pub fn new(config: AssemblerConfig) -> Self {
        Self {
            cache: None,
            audit: None,
            pricing: Arc::new(PricingTable::with_defaults()),
            counter: Arc::new(EstimateCounter),
            config,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_audit_log(mut self, audit: Arc<dyn AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_pricing(mut self, pricing: Arc<PricingTable>) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    /// Assemble a context by running `f(args)`.
    ///
    /// `args` identify the call for caching: with a cache and a `cache_ttl`
    /// the context is stored under `context:{name}:{sha256(json(args))}`.
    /// The future returned by `f` runs with a fresh lineage tracker bound,
    /// so feature and retriever calls anywhere inside it are recorded.
    ///
    /// Concurrent misses for the same key are not de-duplicated: both run
    /// and the last cache write wins.
    pub async fn assemble<A, F, Fut, O, E>(
        &self,
        definition: &ContextDefinition,
        args: A,
        f: F,
    ) -> Result<Context, ContextError>
    where
        A: Serialize,
        F: FnOnce(A) -> Fut,
        Fut: Future<Output = Result<O, E>>,
        O: Into<AssemblyOutput>,
        E: Into<BoxError>,
    {
        let started = Instant::now();
        let name = definition.name.as_str();

        let cache_key = match (&self.cache, definition.cache_ttl) {
            (Some(_), Some(_)) => Some(keys::context(name, &hash_args(&args)?)),
            _ => None,
        };

        if let Some(key) = &cache_key {
            if let Some(mut cached) = self.read_cached(definition, key).await {
                cached.meta.cached = true;
                metrics::counter!(CONTEXT_CACHE_HITS_TOTAL, "context" => name.to_string()).increment(1);
                info!(context = %name, context_id = %cached.id, "Context cache hit");
                return Ok(cached);
            }
        }

        let context_id = Uuid::now_v7().to_string();
        info!(context = %name, context_id = %context_id, "Context assembly started");

        let tracker = Arc::new(AssemblyTracker::new(&context_id));
        let output = match with_tracker(tracker.clone(), f(args)).await {
            Ok(output) => output.into(),
            Err(e) => {
                let source: BoxError = e.into();
                error!(context = %name, context_id = %context_id, error = %source, "Context assembly failed");
                return Err(ContextError::Assembly {
                    name: name.to_string(),
                    context_id,
                    source,
                });
            }
        };

        let context = self.finish(definition, &context_id, &tracker, output)?;
        let latency = started.elapsed();

        if let Some(key) = &cache_key {
            self.write_cached(definition, key, &context).await;
        }
        self.write_trace(&ContextTrace::from_context(&context, Some(latency.as_secs_f64() * 1000.0)))
            .await;
        self.write_audit(&context).await;

        metrics::histogram!(CONTEXT_ASSEMBLY_SECONDS, "context" => name.to_string())
            .record(latency.as_secs_f64());
        info!(
            context = %name,
            context_id = %context_id,
            tokens = context.meta.token_usage,
            dropped = context.meta.dropped_items,
            freshness = %context.meta.freshness_status,
            latency_ms = latency.as_millis() as u64,
            "Context assembly complete"
        );
        Ok(context)
    }

    /// Budget, freshness, and economics for a freshly executed assembly.
    fn finish(
        &self,
        definition: &ContextDefinition,
        context_id: &str,
        tracker: &AssemblyTracker,
        output: AssemblyOutput,
    ) -> Result<Context, ContextError> {
        let name = definition.name.as_str();
        let now = Utc::now();
        let counter = definition.token_counter.as_deref().unwrap_or(self.counter.as_ref());
        let policy = definition.budget_policy.unwrap_or(self.config.budget_policy);

        let mut meta = ContextMeta {
            timestamp: Some(now),
            name: name.to_string(),
            status: "assembled".into(),
            max_tokens: definition.max_tokens,
            ..ContextMeta::default()
        };

        let mut stale = Vec::new();
        let (content, items_provided, items_included, token_usage) = match output {
            AssemblyOutput::Items(items) => {
                meta.source_ids = source_ids(&items);
                if let Some(max_staleness) = definition.max_staleness {
                    stale = stale_items(&items, max_staleness, now);
                }
                let provided = items.len();
                match definition.max_tokens {
                    Some(max_tokens) => {
                        let outcome = trim_to_budget(items, max_tokens, counter, policy)?;
                        meta.dropped_items = outcome.dropped_items;
                        meta.budget_exceeded = outcome.budget_exceeded;
                        if outcome.budget_exceeded {
                            meta.warnings.push(format!(
                                "required items use {} tokens, over the budget of {max_tokens}",
                                outcome.token_usage
                            ));
                        }
                        (outcome.content, provided, outcome.items.len(), Some(outcome.token_usage))
                    }
                    None => (render(&items), provided, provided, None),
                }
            }
            AssemblyOutput::Text(text) => {
                let mut tokens = None;
                if let Some(max_tokens) = definition.max_tokens {
                    let count = counter.count(&text);
                    if count > max_tokens {
                        warn!(context = %name, context_id = %context_id, tokens = count, limit = max_tokens, "Raw text context exceeds token budget");
                        meta.warnings.push(format!(
                            "raw text uses {count} tokens, over the budget of {max_tokens}"
                        ));
                    }
                    tokens = Some(count);
                }
                (text, 1, 1, tokens)
            }
        };

        let features = tracker.features();
        let report = evaluate(stale, &features, definition.freshness_sla);
        for violation in &report.violations {
            warn!(
                context = %name,
                context_id = %context_id,
                feature = %violation.feature,
                age_ms = violation.age_ms,
                sla_ms = violation.sla_ms,
                "Freshness SLA violated"
            );
            metrics::counter!(
                CONTEXT_FRESHNESS_VIOLATIONS_TOTAL,
                "context" => name.to_string(),
                "feature" => violation.feature.clone()
            )
            .increment(1);
        }
        if definition.freshness_strict && !report.violations.is_empty() {
            return Err(ContextError::FreshnessViolation {
                violations: report.violations,
            });
        }

        let token_usage = token_usage.unwrap_or_else(|| counter.count(&content));
        let model = definition
            .model
            .clone()
            .unwrap_or_else(|| self.config.default_model.clone());
        let cost_usd = self.pricing.context_cost(&model, token_usage);
        let stalest_feature_ms = tracker.stalest_feature_ms();

        meta.freshness_status = report.status;
        meta.stale_sources = report.stale_sources;
        meta.freshness_violations = report.violations.clone();
        meta.token_usage = token_usage;
        meta.cost_usd = cost_usd;
        meta.model = Some(model);

        metrics::histogram!(CONTEXT_TOKEN_USAGE, "context" => name.to_string()).record(token_usage as f64);
        metrics::gauge!(CONTEXT_STALEST_FEATURE_MS, "context" => name.to_string())
            .set(stalest_feature_ms as f64);

        let lineage = ContextLineage {
            context_id: context_id.to_string(),
            timestamp: now,
            features_used: features,
            retrievers_used: tracker.retrievers(),
            items_provided,
            items_included,
            items_dropped: items_provided - items_included,
            freshness_status: report.status,
            stalest_feature_ms,
            freshness_violations: report.violations,
            token_usage,
            max_tokens: definition.max_tokens,
            estimated_cost_usd: cost_usd,
        };

        Ok(Context {
            id: context_id.to_string(),
            content,
            meta,
            lineage: Some(lineage),
        })
    }

    /// Fetch and validate a cached context. Every failure is a miss.
    async fn read_cached(&self, definition: &ContextDefinition, key: &str) -> Option<Context> {
        let cache = self.cache.as_ref()?;
        let bytes = match tokio::time::timeout(self.config.io_timeout, cache.get(key)).await {
            Ok(Ok(Some(bytes))) => bytes,
            Ok(Ok(None)) => return None,
            Ok(Err(e)) => {
                warn!(key = %key, error = %e, "Context cache read failed");
                return None;
            }
            Err(_) => {
                warn!(key = %key, timeout_ms = self.config.io_timeout.as_millis() as u64, "Context cache read timed out");
                return None;
            }
        };

        let cached: Context = match serde_json::from_slice(&bytes) {
            Ok(context) => context,
            Err(e) => {
                warn!(key = %key, error = %e, "Undecodable cached context");
                return None;
            }
        };

        if let Some(max_staleness) = definition.max_staleness {
            let Some(timestamp) = cached.meta.timestamp else {
                info!(key = %key, "Cached context has no timestamp, recomputing");
                return None;
            };
            let age = Utc::now().signed_duration_since(timestamp);
            if age.to_std().is_ok_and(|age| age > max_staleness) {
                info!(
                    key = %key,
                    age_ms = age.num_milliseconds(),
                    limit_ms = max_staleness.as_millis() as u64,
                    "Cached context is stale"
                );
                return None;
            }
        }
        Some(cached)
    }

    async fn write_cached(&self, definition: &ContextDefinition, key: &str, context: &Context) {
        let (Some(cache), Some(ttl)) = (&self.cache, definition.cache_ttl) else {
            return;
        };
        let bytes = match serde_json::to_vec(context) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to serialize context for cache");
                return;
            }
        };

        let mut pipeline = cache.pipeline();
        pipeline.set(key, bytes, Some(ttl));
        for source_id in &context.meta.source_ids {
            let dependency = keys::dependency(source_id);
            pipeline.sadd(dependency.clone(), key).expire(dependency, ttl * 2);
        }

        match tokio::time::timeout(self.config.io_timeout, cache.execute(pipeline)).await {
            Ok(Ok(())) => debug!(key = %key, "Context cached"),
            Ok(Err(e)) => warn!(key = %key, error = %e, "Context cache write failed"),
            Err(_) => warn!(key = %key, "Context cache write timed out"),
        }
    }

    async fn write_trace(&self, trace: &ContextTrace) {
        let Some(cache) = &self.cache else {
            return;
        };
        let key = keys::trace(&trace.context_id);
        let bytes = match serde_json::to_vec(trace) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(context_id = %trace.context_id, error = %e, "Failed to serialize trace");
                return;
            }
        };
        let write = cache.set(&key, bytes, Some(self.config.trace_ttl));
        match tokio::time::timeout(self.config.io_timeout, write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(context_id = %trace.context_id, error = %e, "Trace write failed"),
            Err(_) => warn!(context_id = %trace.context_id, "Trace write timed out"),
        }
    }

    async fn write_audit(&self, context: &Context) {
        let Some(audit) = &self.audit else {
            return;
        };
        let meta = match serde_json::to_value(&context.meta) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(context_id = %context.id, error = %e, "Failed to serialize context meta");
                return;
            }
        };
        let record = ContextRecord {
            context_id: context.id.clone(),
            timestamp: context.meta.timestamp.unwrap_or_else(Utc::now),
            content: context.content.clone(),
            lineage: context.lineage.clone(),
            meta,
            version: RECORD_VERSION.to_string(),
        };
        match tokio::time::timeout(self.config.io_timeout, audit.log_context(record)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(context_id = %context.id, backend = audit.name(), error = %e, "Audit log write failed"),
            Err(_) => warn!(context_id = %context.id, backend = audit.name(), "Audit log write timed out"),
        }
    }

    /// Look up how a context was assembled.
    ///
    /// Reads `trace:{id}` from the cache, falling back to the audit log once
    /// the trace has expired.
    pub async fn explain(&self, context_id: &str) -> Result<Option<ContextTrace>, ContextError> {
        if let Some(cache) = &self.cache {
            match cache.get(&keys::trace(context_id)).await {
                Ok(Some(bytes)) => match serde_json::from_slice::<ContextTrace>(&bytes) {
                    Ok(trace) => return Ok(Some(trace)),
                    Err(e) => warn!(context_id = %context_id, error = %e, "Undecodable trace"),
                },
                Ok(None) => {}
                Err(e) => warn!(context_id = %context_id, error = %e, "Trace read failed"),
            }
        }

        let Some(audit) = &self.audit else {
            return Ok(None);
        };
        let record = match audit.get_context(context_id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(context_id = %context_id, error = %e, "Audit log read failed");
                None
            }
        };
        Ok(record.map(|record| {
            let meta: ContextMeta = serde_json::from_value(record.meta).unwrap_or_default();
            let context = Context {
                id: record.context_id,
                content: record.content,
                meta,
                lineage: record.lineage,
            };
            ContextTrace::from_context(&context, None)
        }))
    }

    /// Drop every cached context that used `source_id`.
    ///
    /// Returns how many cached contexts were deleted.
    pub async fn invalidate_source(&self, source_id: &str) -> Result<usize, ContextError> {
        let Some(cache) = &self.cache else {
            return Ok(0);
        };
        let dependency = keys::dependency(source_id);
        let dependents = cache.smembers(&dependency).await?;
        let removed = if dependents.is_empty() {
            0
        } else {
            cache.delete(&dependents).await?
        };
        cache.delete(&[dependency]).await?;
        info!(source_id = %source_id, removed, "Invalidated cached contexts");
        Ok(removed)
    }
}

/// Hash of the canonical JSON form of `args`.
///
/// Going through `Value` sorts object keys, so maps with equal contents hash
/// the same regardless of iteration order.
fn hash_args<A: Serialize>(args: &A) -> Result<String, ContextError> {
    let canonical = serde_json::to_value(args)?;
    let encoded = serde_json::to_vec(&canonical)?;
    Ok(hex::encode(Sha256::digest(&encoded)))
}

/// Distinct source ids in first-seen order.
fn source_ids(items: &[ContextItem]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    items
        .iter()
        .filter_map(|item| item.source_id.clone())
        .filter(|id| seen.insert(id.clone()))
        .collect()
}
