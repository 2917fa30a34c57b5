use strata_core::error::RegistryError;
use thiserror::Error;

/// Errors surfaced by the online store.
///
/// Reads only fail for malformed requests; cache and compute failures
/// degrade inside the resolver instead. Writes report cache failures.
#[derive(Debug, Error)]
pub enum ServingError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Feature '{feature}' is not registered for entity '{entity}'")]
    UnknownFeature { feature: String, entity: String },

    #[error("Online cache write failed: {0}")]
    CacheWrite(String),

    #[error("Failed to encode value for feature '{feature}': {source}")]
    Encode {
        feature: String,
        #[source]
        source: serde_json::Error,
    },
}
