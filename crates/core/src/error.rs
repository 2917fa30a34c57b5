//! Error types for the Strata domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the top-level [`Error`]
//! wraps them for callers that do not care which layer failed.

use thiserror::Error;

/// Boxed error used at user-code seams (compute functions, assembly functions).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The top-level error type for Strata operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Compute error: {0}")]
    Compute(#[from] ComputeError),

    #[error("Audit log error: {0}")]
    Audit(#[from] AuditError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Entity not registered: {0}")]
    UnknownEntity(String),

    #[error("Feature '{feature}' references unregistered entity '{entity}'")]
    MissingEntity { feature: String, entity: String },

    #[error("Invalid name: {0}")]
    InvalidName(String),
}

#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("Cache operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Wrong value type at key {key}")]
    WrongType { key: String },

    #[error("Cache operation failed: {0}")]
    Operation(String),
}

#[derive(Debug, Clone, Error)]
pub enum ComputeError {
    #[error("Compute failed for feature '{feature}': {reason}")]
    Failed { feature: String, reason: String },

    #[error("Compute for feature '{feature}' timed out after {timeout_ms}ms")]
    Timeout { feature: String, timeout_ms: u64 },

    #[error("Compute for feature '{feature}' panicked")]
    Panicked { feature: String },
}

impl ComputeError {
    /// Build a `Failed` error from any displayable cause.
    pub fn failed(feature: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Failed {
            feature: feature.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Audit storage error: {0}")]
    Storage(String),

    #[error("Audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_error_displays_correctly() {
        let err = Error::Registry(RegistryError::MissingEntity {
            feature: "user_clicks".into(),
            entity: "User".into(),
        });
        assert!(err.to_string().contains("user_clicks"));
        assert!(err.to_string().contains("User"));
    }

    #[test]
    fn compute_error_helper() {
        let err = ComputeError::failed("score", "division by zero");
        assert!(err.to_string().contains("score"));
        assert!(err.to_string().contains("division by zero"));
    }
}
