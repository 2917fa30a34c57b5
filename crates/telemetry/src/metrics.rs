//! Prometheus recorder installation and metric names.
//!
//! Every crate records through the `metrics` facade using the constants
//! below; the gateway installs the Prometheus recorder once at startup and
//! renders it on `/metrics`. Without an installed recorder the macros are
//! no-ops, so library code never needs to check.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::TelemetryError;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render the `/metrics` endpoint. Fails if a
/// global recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, TelemetryError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| TelemetryError::Recorder(e.to_string()))?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

// Metric name constants shared across crates.

/// Feature requests (counter, labels: feature, status).
pub const FEATURE_REQUESTS_TOTAL: &str = "strata_feature_requests_total";
/// Feature resolution step latency (histogram, labels: feature, step).
pub const FEATURE_LATENCY_SECONDS: &str = "strata_feature_latency_seconds";
/// Context cache hits (counter, labels: context).
pub const CONTEXT_CACHE_HITS_TOTAL: &str = "strata_context_cache_hits_total";
/// Tokens in assembled contexts (histogram, labels: context).
pub const CONTEXT_TOKEN_USAGE: &str = "strata_context_token_usage";
/// Freshness SLA violations (counter, labels: context, feature).
pub const CONTEXT_FRESHNESS_VIOLATIONS_TOTAL: &str = "strata_context_freshness_violations_total";
/// Age of the stalest feature in the last assembly (gauge, labels: context).
pub const CONTEXT_STALEST_FEATURE_MS: &str = "strata_context_stalest_feature_ms";
/// End-to-end assembly duration (histogram, labels: context).
pub const CONTEXT_ASSEMBLY_SECONDS: &str = "strata_context_assembly_seconds";
/// Circuit breaker state (gauge, labels: breaker). 0 closed, 1 half-open, 2 open.
pub const CIRCUIT_BREAKER_STATE: &str = "strata_circuit_breaker_state";
/// HTTP requests served (counter, labels: method, path, status).
pub const HTTP_REQUESTS_TOTAL: &str = "strata_http_requests_total";

/// Status label values for [`FEATURE_REQUESTS_TOTAL`].
pub mod status {
    pub const HIT: &str = "hit";
    pub const MISS: &str = "miss";
    pub const COMPUTE_SUCCESS: &str = "compute_success";
    pub const COMPUTE_FAILURE: &str = "compute_failure";
    pub const DEFAULT: &str = "default";
    pub const ERROR: &str = "error";
    pub const UNKNOWN: &str = "unknown";
}

/// Step label values for [`FEATURE_LATENCY_SECONDS`].
pub mod step {
    pub const CACHE: &str = "cache";
    pub const COMPUTE: &str = "compute";
}

/// Count one feature request outcome.
pub fn record_feature_status(feature: &str, status: &'static str) {
    ::metrics::counter!(FEATURE_REQUESTS_TOTAL, "feature" => feature.to_string(), "status" => status)
        .increment(1);
}

/// Record how long one resolution step took for a feature.
pub fn record_feature_latency(feature: &str, step: &'static str, seconds: f64) {
    ::metrics::histogram!(FEATURE_LATENCY_SECONDS, "feature" => feature.to_string(), "step" => step)
        .record(seconds);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        ::metrics::with_local_recorder(&recorder, || {
            record_feature_status("user_clicks", status::HIT);
            record_feature_status("user_clicks", status::HIT);
            record_feature_latency("user_clicks", step::CACHE, 0.002);
        });

        let output = handle.render();
        assert!(output.contains(FEATURE_REQUESTS_TOTAL));
        assert!(output.contains("feature=\"user_clicks\""));
        assert!(output.contains("status=\"hit\""));
        assert!(output.contains(FEATURE_LATENCY_SECONDS));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            FEATURE_REQUESTS_TOTAL,
            FEATURE_LATENCY_SECONDS,
            CONTEXT_CACHE_HITS_TOTAL,
            CONTEXT_TOKEN_USAGE,
            CONTEXT_FRESHNESS_VIOLATIONS_TOTAL,
            CONTEXT_STALEST_FEATURE_MS,
            CONTEXT_ASSEMBLY_SECONDS,
            CIRCUIT_BREAKER_STATE,
            HTTP_REQUESTS_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
