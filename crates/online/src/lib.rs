//! Online feature serving for Strata.
//!
//! [`OnlineFeatureStore`] resolves features through a three-tier chain
//! (cache, compute, default) with the cache behind a [`CircuitBreaker`].

pub mod breaker;
pub mod error;
pub mod store;

pub use breaker::{BreakerConfig, BreakerError, CircuitBreaker, CircuitState};
pub use error::ServingError;
pub use store::{
    AbsentReason, FeatureResolution, FeatureResponse, MaterializeReport, OnlineFeatureStore,
    StoredFeature,
};
