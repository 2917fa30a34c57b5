//! # Strata Core
//!
//! Domain types, traits, and error definitions for the Strata feature and
//! context store. This crate has **no storage or transport dependencies**:
//! it defines the model that every other crate implements against.
//!
//! ## Layout
//!
//! - [`feature`]: entities, features, and the registry
//! - [`compute`]: the trait user compute functions implement
//! - [`cache`]: the key-value cache seam and pipelines
//! - [`audit`]: the durable context log seam
//! - [`lineage`]: provenance records and the ambient assembly tracker

pub mod audit;
pub mod cache;
pub mod compute;
pub mod error;
pub mod feature;
pub mod lineage;

// Re-export key types at crate root for ergonomics
pub use audit::{AuditLog, ContextRecord};
pub use cache::{CacheBackend, Pipeline, PipelineOp};
pub use compute::{Compute, ComputeRequest, TriggerEvent};
pub use error::{AuditError, BoxError, CacheError, ComputeError, Error, RegistryError, Result};
pub use feature::{Entity, Feature, FeatureRegistry};
pub use lineage::{
    AssemblyTracker, ContextLineage, FeatureLineage, FreshnessStatus, FreshnessViolation,
    LineageSource, RetrieverLineage, current_tracker, with_tracker,
};
