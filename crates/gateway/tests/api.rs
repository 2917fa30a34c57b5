use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{Value, json};
use std::sync::Arc;
use strata_context::{AssemblerConfig, ContextAssembler, ContextDefinition, ContextItem};
use strata_core::compute::from_fn;
use strata_core::{BoxError, Entity, Feature, FeatureRegistry};
use strata_gateway::{API_KEY_HEADER, GatewayState, SharedState, build_router};
use strata_online::OnlineFeatureStore;
use strata_store::{InMemoryAuditLog, InMemoryCache};
use tower::ServiceExt;

fn feature_store(cache: Arc<InMemoryCache>) -> Arc<OnlineFeatureStore> {
    let registry = FeatureRegistry::new();
    registry.register_entity(Entity::new("User", "user_id")).unwrap();
    registry
        .register_feature(Feature::new(
            "name_length",
            "User",
            from_fn(|id: &str| Ok::<_, BoxError>(id.len())),
        ))
        .unwrap();
    registry
        .register_feature(
            Feature::new(
                "risk_score",
                "User",
                from_fn(|_: &str| Err::<f64, BoxError>("model offline".into())),
            )
            .default_value(0.5),
        )
        .unwrap();
    Arc::new(OnlineFeatureStore::new(Arc::new(registry), cache))
}

fn state() -> GatewayState {
    GatewayState::new(feature_store(Arc::new(InMemoryCache::new())))
}

fn features_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/features")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn resolves_features() {
    let app = build_router(Arc::new(state()));

    let response = app
        .oneshot(features_request(json!({
            "entity_name": "User",
            "entity_id": "alice",
            "features": ["name_length", "risk_score", "not_registered"]
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body, json!({ "name_length": 5, "risk_score": 0.5 }));
}

#[tokio::test]
async fn unknown_entity_is_a_server_error() {
    let app = build_router(Arc::new(state()));

    let response = app
        .oneshot(features_request(json!({
            "entity_name": "Merchant",
            "entity_id": "m1",
            "features": ["name_length"]
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains("Merchant"));
}

#[tokio::test]
async fn api_key_is_enforced() {
    let shared: SharedState = Arc::new(state().with_api_key(Some("s3cret".into())));
    let body = json!({ "entity_name": "User", "entity_id": "bob", "features": ["name_length"] });

    let response = build_router(shared.clone())
        .oneshot(features_request(body.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let mut request = features_request(body);
    request
        .headers_mut()
        .insert(API_KEY_HEADER, "s3cret".parse().unwrap());
    let response = build_router(shared.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let health = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = build_router(shared).oneshot(health).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn health_reports_breaker_state() {
    let app = build_router(Arc::new(state()));
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["breaker"], "closed");
}

#[tokio::test]
async fn explain_serves_traces() {
    let cache = Arc::new(InMemoryCache::new());
    let assembler = Arc::new(
        ContextAssembler::new(AssemblerConfig::default())
            .with_cache(cache.clone())
            .with_audit_log(Arc::new(InMemoryAuditLog::new())),
    );
    let context = assembler
        .assemble(&ContextDefinition::new("support"), (), |_| async {
            Ok::<_, BoxError>(vec![ContextItem::new("hello").source("faq")])
        })
        .await
        .unwrap();

    let shared: SharedState = Arc::new(
        GatewayState::new(feature_store(cache)).with_assembler(assembler),
    );

    let uri = format!("/context/{}/explain", context.id);
    let response = build_router(shared.clone())
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["context_id"], context.id.as_str());
    assert_eq!(body["name"], "support");
    assert_eq!(body["source_ids"], json!(["faq"]));

    let response = build_router(shared)
        .oneshot(
            Request::builder()
                .uri("/context/unknown/explain")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn explain_without_assembler_is_unavailable() {
    let app = build_router(Arc::new(state()));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/context/abc/explain")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn metrics_are_rendered() {
    let handle = PrometheusBuilder::new().build_recorder().handle();
    let app = build_router(Arc::new(state().with_metrics(handle)));

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
