//! Context items, assembled contexts, and persisted traces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_core::lineage::{ContextLineage, FreshnessStatus, FreshnessViolation};

/// One piece of content produced by an assembly function.
///
/// Items are required by default; optional items may be evicted to fit the
/// token budget, lowest `priority` first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextItem {
    pub content: String,
    #[serde(default = "default_required")]
    pub required: bool,
    /// 0 is evicted first.
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

fn default_required() -> bool {
    true
}

impl ContextItem {
    /// A required item with priority 0.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            required: true,
            priority: 0,
            source_id: None,
            last_updated: None,
        }
    }

    /// An optional item with the given priority.
    pub fn optional(content: impl Into<String>, priority: i32) -> Self {
        Self {
            required: false,
            priority,
            ..Self::new(content)
        }
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn last_updated(mut self, at: DateTime<Utc>) -> Self {
        self.last_updated = Some(at);
        self
    }
}

/// What an assembly function returns.
///
/// Items are budget-trimmed; raw text is never trimmed and only produces a
/// warning if it overflows the budget.
#[derive(Debug, Clone, PartialEq)]
pub enum AssemblyOutput {
    Items(Vec<ContextItem>),
    Text(String),
}

impl From<Vec<ContextItem>> for AssemblyOutput {
    fn from(items: Vec<ContextItem>) -> Self {
        Self::Items(items)
    }
}

impl From<String> for AssemblyOutput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for AssemblyOutput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// Metadata attached to an assembled context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextMeta {
    pub timestamp: Option<DateTime<Utc>>,
    pub name: String,
    pub status: String,
    pub dropped_items: usize,
    pub source_ids: Vec<String>,
    pub freshness_status: FreshnessStatus,
    pub stale_sources: Vec<String>,
    pub freshness_violations: Vec<FreshnessViolation>,
    pub budget_exceeded: bool,
    pub token_usage: usize,
    pub max_tokens: Option<usize>,
    pub model: Option<String>,
    pub cost_usd: f64,
    /// Set when the context was served from the cache.
    pub cached: bool,
    pub warnings: Vec<String>,
}

/// An assembled, token-budgeted context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    /// Time-sortable (UUIDv7) identifier.
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub meta: ContextMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineage: Option<ContextLineage>,
}

impl Context {
    pub fn is_fresh(&self) -> bool {
        self.meta.freshness_status == FreshnessStatus::Guaranteed
    }
}

/// Queryable record of one assembly, stored under `trace:{context_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextTrace {
    pub context_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// Wall time of the assembly; unknown when rebuilt from the audit log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    pub token_usage: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    pub freshness_status: FreshnessStatus,
    #[serde(default)]
    pub stale_sources: Vec<String>,
    pub stalest_feature_ms: u64,
    pub cost_usd: f64,
    pub cache_hit: bool,
    pub dropped_items: usize,
    #[serde(default)]
    pub source_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineage: Option<ContextLineage>,
}

impl ContextTrace {
    pub fn from_context(context: &Context, latency_ms: Option<f64>) -> Self {
        let meta = &context.meta;
        Self {
            context_id: context.id.clone(),
            name: meta.name.clone(),
            created_at: meta.timestamp.unwrap_or_else(Utc::now),
            latency_ms,
            token_usage: meta.token_usage,
            max_tokens: meta.max_tokens,
            freshness_status: meta.freshness_status,
            stale_sources: meta.stale_sources.clone(),
            stalest_feature_ms: context
                .lineage
                .as_ref()
                .map(|l| l.stalest_feature_ms)
                .unwrap_or(0),
            cost_usd: meta.cost_usd,
            cache_hit: meta.cached,
            dropped_items: meta.dropped_items,
            source_ids: meta.source_ids.clone(),
            lineage: context.lineage.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn items_default_to_required() {
        let item: ContextItem = serde_json::from_str(r#"{"content": "hi"}"#).unwrap();
        assert!(item.required);
        assert_eq!(item.priority, 0);

        let optional = ContextItem::optional("maybe", 3).source("docs");
        assert!(!optional.required);
        assert_eq!(optional.priority, 3);
        assert_eq!(optional.source_id.as_deref(), Some("docs"));
    }

    #[test]
    fn freshness_flag() {
        let mut context = Context {
            id: "id".into(),
            content: String::new(),
            meta: ContextMeta::default(),
            lineage: None,
        };
        assert!(!context.is_fresh());
        context.meta.freshness_status = FreshnessStatus::Guaranteed;
        assert!(context.is_fresh());
    }

    #[test]
    fn meta_tolerates_missing_fields() {
        let context: Context = serde_json::from_str(r#"{"id": "x", "content": "c"}"#).unwrap();
        assert!(context.meta.timestamp.is_none());
        assert_eq!(context.meta.freshness_status, FreshnessStatus::Unknown);
    }
}
