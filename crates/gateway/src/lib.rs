//! HTTP serving API for Strata.
//!
//! Routes:
//! - `POST /features`: resolve online features for one entity
//! - `GET /context/{id}/explain`: how a context was assembled
//! - `GET /health`: liveness plus circuit-breaker state
//! - `GET /metrics`: Prometheus exposition
//!
//! When an API key is configured, `/features` and `/context/*` require a
//! matching `X-API-Key` header.

use axum::extract::{DefaultBodyLimit, MatchedPath, Path};
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use strata_config::StrataConfig;
use strata_context::{AssemblerConfig, BudgetPolicy, ContextAssembler, ContextTrace};
use strata_core::{AuditLog, CacheBackend, FeatureRegistry};
use strata_online::{BreakerConfig, CircuitBreaker, OnlineFeatureStore};
use strata_store::{FileAuditLog, InMemoryAuditLog, NoopAuditLog};
use strata_telemetry::metrics::HTTP_REQUESTS_TOTAL;
use tracing::{error, info, warn};

/// Header carrying the client API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared application state for the gateway.
pub struct GatewayState {
    pub features: Arc<OnlineFeatureStore>,
    pub assembler: Option<Arc<ContextAssembler>>,
    pub metrics: Option<PrometheusHandle>,
    pub api_key: Option<String>,
}

impl GatewayState {
    pub fn new(features: Arc<OnlineFeatureStore>) -> Self {
        Self {
            features,
            assembler: None,
            metrics: None,
            api_key: None,
        }
    }

    /// Wire the feature store and context assembler from configuration.
    ///
    /// The cache is shared by both; `registry` holds the application's
    /// entities and features.
    pub fn from_config(
        config: &StrataConfig,
        registry: Arc<FeatureRegistry>,
        cache: Arc<dyn CacheBackend>,
    ) -> Self {
        let breaker = CircuitBreaker::new(
            "online_cache",
            BreakerConfig {
                failure_threshold: config.breaker.failure_threshold,
                reset_timeout: config.breaker.reset_timeout(),
                call_timeout: config.breaker.call_timeout(),
            },
        );
        let features = OnlineFeatureStore::new(registry, cache.clone()).with_breaker(Arc::new(breaker));

        let budget_policy = config
            .context
            .budget_policy
            .parse::<BudgetPolicy>()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to graceful budget policy");
                BudgetPolicy::Graceful
            });
        let assembler = ContextAssembler::new(AssemblerConfig {
            default_model: config.context.default_model.clone(),
            trace_ttl: config.context.trace_ttl(),
            io_timeout: config.context.io_timeout(),
            budget_policy,
        })
        .with_cache(cache)
        .with_audit_log(audit_log(config));

        Self::new(Arc::new(features))
            .with_assembler(Arc::new(assembler))
            .with_api_key(config.serving.api_key.clone())
    }

    pub fn with_assembler(mut self, assembler: Arc<ContextAssembler>) -> Self {
        self.assembler = Some(assembler);
        self
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }
}

pub type SharedState = Arc<GatewayState>;

fn audit_log(config: &StrataConfig) -> Arc<dyn AuditLog> {
    match config.audit.backend.as_str() {
        "memory" => Arc::new(InMemoryAuditLog::new()),
        "none" => Arc::new(NoopAuditLog),
        _ => {
            let path = config
                .audit
                .path
                .clone()
                .unwrap_or_else(StrataConfig::default_audit_path);
            info!(path = %path.display(), "Recording contexts to file audit log");
            Arc::new(FileAuditLog::new(path))
        }
    }
}

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    let protected = Router::new()
        .route("/features", post(features_handler))
        .route("/context/{context_id}/explain", get(explain_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), api_key_middleware));

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .merge(protected)
        .route_layer(middleware::from_fn(http_metrics_middleware))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server on `addr` and serve until the process exits.
pub async fn serve(addr: &str, state: SharedState) -> Result<(), std::io::Error> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Serving API listening");
    axum::serve(listener, app).await
}

// --- Middleware ---

/// Rejects requests without the configured `X-API-Key` with 403.
async fn api_key_middleware(
    State(state): State<SharedState>,
    req: axum::extract::Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = state.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };

    let provided = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    if provided == Some(expected) {
        Ok(next.run(req).await)
    } else {
        warn!(path = %req.uri().path(), "Rejected request with missing or invalid API key");
        Err(StatusCode::FORBIDDEN)
    }
}

/// Counts requests by method, matched route, and status.
async fn http_metrics_middleware(req: axum::extract::Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let response = next.run(req).await;
    metrics::counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method,
        "path" => path,
        "status" => response.status().as_u16().to_string()
    )
    .increment(1);
    response
}

// --- Handlers ---

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    breaker: &'static str,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        breaker: state.features.breaker().state().as_str(),
    })
}

async fn metrics_handler(State(state): State<SharedState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => api_error(StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

/// Body of `POST /features`.
#[derive(Debug, Deserialize)]
pub struct FeatureRequest {
    pub entity_name: String,
    pub entity_id: String,
    pub features: Vec<String>,
}

async fn features_handler(
    State(state): State<SharedState>,
    Json(request): Json<FeatureRequest>,
) -> Result<Json<Map<String, Value>>, ApiError> {
    let response = state
        .features
        .get_online_features(&request.entity_name, &request.entity_id, &request.features)
        .await
        .map_err(|e| {
            error!(
                entity = %request.entity_name,
                entity_id = %request.entity_id,
                error = %e,
                "Feature request failed"
            );
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;
    Ok(Json(response.values()))
}

async fn explain_handler(
    State(state): State<SharedState>,
    Path(context_id): Path<String>,
) -> Result<Json<ContextTrace>, ApiError> {
    let assembler = state
        .assembler
        .as_ref()
        .ok_or_else(|| api_error(StatusCode::SERVICE_UNAVAILABLE, "context assembly is not configured"))?;

    match assembler.explain(&context_id).await {
        Ok(Some(trace)) => Ok(Json(trace)),
        Ok(None) => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("no trace for context '{context_id}'"),
        )),
        Err(e) => {
            error!(context_id = %context_id, error = %e, "Explain failed");
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use strata_store::InMemoryCache;
    use tower::ServiceExt;

    fn test_state() -> SharedState {
        let registry = Arc::new(strata_core::FeatureRegistry::new());
        let features = Arc::new(OnlineFeatureStore::new(registry, Arc::new(InMemoryCache::new())));
        Arc::new(GatewayState::new(features))
    }

    #[tokio::test]
    async fn health_endpoint() {
        let app = build_router(test_state());

        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn from_config_applies_settings() {
        let mut config = StrataConfig::default();
        config.audit.backend = "memory".into();
        config.serving.api_key = Some("k".into());
        config.breaker.failure_threshold = 2;

        let state = GatewayState::from_config(
            &config,
            Arc::new(strata_core::FeatureRegistry::new()),
            Arc::new(InMemoryCache::new()),
        );
        assert_eq!(state.api_key.as_deref(), Some("k"));
        assert_eq!(state.features.breaker().config().failure_threshold, 2);
        assert_eq!(
            state.assembler.as_ref().unwrap().config().default_model,
            "gpt-4o"
        );
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_not_found() {
        let app = build_router(test_state());
        let req = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
