//! Metrics, model pricing, and log initialisation for Strata.
//!
//! Library crates record through the `metrics` facade with the names in
//! [`metrics`]; binaries call [`init_tracing`] and install the Prometheus
//! recorder. [`PricingTable`] turns token counts into estimated cost.

pub mod logging;
pub mod metrics;
pub mod pricing;

pub use logging::init_tracing;
pub use pricing::{ModelPricing, PricingTable};

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("failed to install metrics recorder: {0}")]
    Recorder(String),

    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(String),
}
