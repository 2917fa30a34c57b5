//! Compute trait — how a feature value is produced for one entity.
//!
//! Compute functions are user code. They may be synchronous or async, may
//! fail with any error, and optionally receive the event that triggered a
//! recomputation (only set by event-driven materialization).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::BoxError;

/// An event that triggered recomputation of a feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Event type, e.g. `transaction`.
    pub event_type: String,
    /// Arbitrary event payload.
    #[serde(default)]
    pub payload: Value,
}

impl TriggerEvent {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }
}

/// Inputs handed to a compute function.
#[derive(Debug, Clone, Copy)]
pub struct ComputeRequest<'a> {
    /// Name of the feature being computed.
    pub feature: &'a str,
    /// Entity identifier the value is computed for.
    pub entity_id: &'a str,
    /// Triggering event, if any.
    pub trigger: Option<&'a TriggerEvent>,
}

/// The core Compute trait.
#[async_trait]
pub trait Compute: Send + Sync {
    /// Produce the feature value for `request.entity_id`.
    async fn compute(&self, request: ComputeRequest<'_>) -> Result<Value, BoxError>;
}

/// Wrap a synchronous `entity_id -> value` function.
pub fn from_fn<F, V, E>(f: F) -> Arc<dyn Compute>
where
    F: Fn(&str) -> Result<V, E> + Send + Sync + 'static,
    V: Serialize + 'static,
    E: Into<BoxError> + 'static,
{
    Arc::new(SyncCompute {
        f: move |id: &str, _event: Option<&TriggerEvent>| f(id),
        _marker: PhantomData,
    })
}

/// Wrap a synchronous function that also receives the triggering event.
pub fn from_event_fn<F, V, E>(f: F) -> Arc<dyn Compute>
where
    F: Fn(&str, Option<&TriggerEvent>) -> Result<V, E> + Send + Sync + 'static,
    V: Serialize + 'static,
    E: Into<BoxError> + 'static,
{
    Arc::new(SyncCompute {
        f,
        _marker: PhantomData,
    })
}

/// Wrap an async `entity_id -> value` function.
pub fn from_async_fn<F, Fut, V, E>(f: F) -> Arc<dyn Compute>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
    V: Serialize + Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    Arc::new(AsyncCompute {
        f,
        _marker: PhantomData,
    })
}

struct SyncCompute<F, V, E> {
    f: F,
    _marker: PhantomData<fn() -> (V, E)>,
}

#[async_trait]
impl<F, V, E> Compute for SyncCompute<F, V, E>
where
    F: Fn(&str, Option<&TriggerEvent>) -> Result<V, E> + Send + Sync,
    V: Serialize,
    E: Into<BoxError>,
{
    async fn compute(&self, request: ComputeRequest<'_>) -> Result<Value, BoxError> {
        let value = (self.f)(request.entity_id, request.trigger).map_err(Into::into)?;
        Ok(serde_json::to_value(value)?)
    }
}

struct AsyncCompute<F, V, E> {
    f: F,
    _marker: PhantomData<fn() -> (V, E)>,
}

#[async_trait]
impl<F, Fut, V, E> Compute for AsyncCompute<F, V, E>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<V, E>> + Send,
    V: Serialize + Send,
    E: Into<BoxError> + Send,
{
    async fn compute(&self, request: ComputeRequest<'_>) -> Result<Value, BoxError> {
        let value = (self.f)(request.entity_id.to_string())
            .await
            .map_err(Into::into)?;
        Ok(serde_json::to_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request<'a>(entity_id: &'a str, trigger: Option<&'a TriggerEvent>) -> ComputeRequest<'a> {
        ComputeRequest {
            feature: "f",
            entity_id,
            trigger,
        }
    }

    #[tokio::test]
    async fn sync_fn_receives_entity_id() {
        let compute = from_fn(|id: &str| Ok::<_, BoxError>(format!("hello {id}")));
        let value = compute.compute(request("u1", None)).await.unwrap();
        assert_eq!(value, json!("hello u1"));
    }

    #[tokio::test]
    async fn sync_fn_error_propagates() {
        let compute = from_fn(|_: &str| Err::<i64, _>("boom"));
        let err = compute.compute(request("u1", None)).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn event_fn_sees_payload() {
        let compute = from_event_fn(|_: &str, event: Option<&TriggerEvent>| {
            Ok::<_, BoxError>(event.map(|e| e.payload["amount"].clone()))
        });
        let event = TriggerEvent::new("transaction", json!({"amount": 12}));
        let value = compute.compute(request("u1", Some(&event))).await.unwrap();
        assert_eq!(value, json!(12));
    }

    #[tokio::test]
    async fn async_fn_is_awaited() {
        let compute = from_async_fn(|id: String| async move { Ok::<_, BoxError>(id.len()) });
        let value = compute.compute(request("user-42", None)).await.unwrap();
        assert_eq!(value, json!(7));
    }
}
