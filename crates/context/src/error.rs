use strata_core::error::{BoxError, CacheError};
use strata_core::lineage::FreshnessViolation;
use strata_online::ServingError;
use thiserror::Error;

/// Errors surfaced by context assembly.
///
/// Only domain failures propagate: the user's assembly function failing,
/// or a strict budget/freshness policy being violated. Cache, trace and
/// audit-log failures are logged inside the assembler and never appear here.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Context '{name}' assembly {context_id} failed: {source}")]
    Assembly {
        name: String,
        context_id: String,
        #[source]
        source: BoxError,
    },

    #[error("Token budget {max_tokens} exceeded ({actual}) with only required items")]
    BudgetExceeded { max_tokens: usize, actual: usize },

    #[error("Freshness SLA violated by {} feature(s)", violations.len())]
    FreshnessViolation { violations: Vec<FreshnessViolation> },

    #[error("Invalid duration '{0}': expected forms like 500ms, 30s, 5m, 2h, 1d")]
    InvalidDuration(String),

    #[error("Retriever '{name}' failed: {source}")]
    Retriever {
        name: String,
        #[source]
        source: BoxError,
    },

    #[error("Template '{template}' is missing values for {missing:?}")]
    MissingDependency { template: String, missing: Vec<String> },

    #[error("Failed to fetch template dependencies: {0}")]
    Dependency(#[from] ServingError),

    #[error("Failed to load tokenizer from {path}: {reason}")]
    Tokenizer { path: String, reason: String },

    #[error("Failed to encode context arguments: {0}")]
    Arguments(#[from] serde_json::Error),

    #[error(transparent)]
    Cache(#[from] CacheError),
}
