//! The online feature store: cache → compute → default.
//!
//! Reads try one batched cache fetch guarded by the circuit breaker. Any
//! cache failure (including an open breaker) is logged and treated as
//! "everything missed"; misses fall back to the feature's compute function,
//! then to its default value. Each requested name ends in exactly one
//! [`FeatureResolution`], so callers never see an error for a cache outage
//! or a failing compute function.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strata_core::cache::{CacheBackend, keys};
use strata_core::compute::{ComputeRequest, TriggerEvent};
use strata_core::error::{ComputeError, RegistryError};
use strata_core::feature::{Feature, FeatureRegistry};
use strata_core::lineage::{LineageSource, current_tracker};
use strata_telemetry::metrics::{record_feature_latency, record_feature_status, status, step};
use tracing::{debug, warn};

use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::error::ServingError;

/// Cached feature value with the time it was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFeature {
    pub value: Value,
    pub updated_at: DateTime<Utc>,
}

impl StoredFeature {
    pub fn now(value: Value) -> Self {
        Self {
            value,
            updated_at: Utc::now(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode a cached entry. A bare JSON value written by another producer
    /// is accepted and treated as produced just now.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let raw: Value = serde_json::from_slice(bytes)?;
        if let Value::Object(map) = &raw {
            if map.len() == 2 && map.contains_key("value") && map.contains_key("updated_at") {
                if let Ok(stored) = serde_json::from_value::<StoredFeature>(raw.clone()) {
                    return Ok(stored);
                }
            }
        }
        Ok(Self::now(raw))
    }
}

/// Why a requested feature produced no value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AbsentReason {
    /// Not registered, or registered for another entity.
    UnknownFeature,
    /// Compute failed and no default is configured.
    ComputeFailed(String),
}

/// How one requested feature was resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "resolution", rename_all = "snake_case")]
pub enum FeatureResolution {
    Cached {
        value: Value,
        updated_at: DateTime<Utc>,
    },
    Computed {
        value: Value,
    },
    Defaulted {
        value: Value,
        error: String,
    },
    Absent {
        reason: AbsentReason,
    },
}

impl FeatureResolution {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Cached { value, .. } | Self::Computed { value } | Self::Defaulted { value, .. } => {
                Some(value)
            }
            Self::Absent { .. } => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent { .. })
    }
}

/// Per-name outcome of one `get_online_features` call, in request order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureResponse {
    pub entity_name: String,
    pub entity_id: String,
    pub resolutions: Vec<(String, FeatureResolution)>,
}

impl FeatureResponse {
    /// The plain `name → value` mapping; absent features are omitted.
    pub fn values(&self) -> Map<String, Value> {
        self.resolutions
            .iter()
            .filter_map(|(name, r)| r.value().map(|v| (name.clone(), v.clone())))
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&FeatureResolution> {
        self.resolutions
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, r)| r)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.get(name).and_then(FeatureResolution::value)
    }
}

/// Result of a materialization run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MaterializeReport {
    /// Features computed and written to the cache.
    pub written: Vec<String>,
    /// Features whose compute failed, with the error.
    pub failed: Vec<(String, String)>,
}

/// Serves feature values for entities.
pub struct OnlineFeatureStore {
    registry: Arc<FeatureRegistry>,
    cache: Arc<dyn CacheBackend>,
    breaker: Arc<CircuitBreaker>,
    compute_timeout: Option<Duration>,
}

impl OnlineFeatureStore {
    /// Create a store with a default breaker named `online_cache`.
    pub fn new(registry: Arc<FeatureRegistry>, cache: Arc<dyn CacheBackend>) -> Self {
        Self {
            registry,
            cache,
            breaker: Arc::new(CircuitBreaker::new("online_cache", BreakerConfig::default())),
            compute_timeout: None,
        }
    }

    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    /// Bound every compute call. Expiry counts as a compute failure.
    pub fn with_compute_timeout(mut self, timeout: Duration) -> Self {
        self.compute_timeout = Some(timeout);
        self
    }

    pub fn registry(&self) -> &Arc<FeatureRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<dyn CacheBackend> {
        &self.cache
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Resolve `feature_names` for one entity.
    ///
    /// Fails only for an empty entity id or an unregistered entity. Duplicate
    /// names are resolved once. When called inside a context assembly each
    /// resolved value is recorded into the ambient lineage tracker.
    pub async fn get_online_features(
        &self,
        entity_name: &str,
        entity_id: &str,
        feature_names: &[impl AsRef<str>],
    ) -> Result<FeatureResponse, ServingError> {
        self.validate(entity_name, entity_id)?;

        let mut seen = HashSet::new();
        let mut requested: Vec<(String, Option<Arc<Feature>>)> = Vec::new();
        for name in feature_names {
            let name = name.as_ref();
            if !seen.insert(name.to_string()) {
                continue;
            }
            let feature = self
                .registry
                .feature(name)
                .filter(|f| f.entity_name == entity_name);
            requested.push((name.to_string(), feature));
        }

        let known: Vec<&Arc<Feature>> = requested.iter().filter_map(|(_, f)| f.as_ref()).collect();
        let cached = self.fetch_cached(entity_name, entity_id, &known).await;

        let tracker = current_tracker();
        let mut resolutions = Vec::with_capacity(requested.len());
        let mut cached = cached.into_iter();

        for (name, feature) in requested {
            let Some(feature) = feature else {
                record_feature_status(&name, status::UNKNOWN);
                debug!(feature = %name, entity = %entity_name, "Unknown feature requested");
                resolutions.push((
                    name,
                    FeatureResolution::Absent {
                        reason: AbsentReason::UnknownFeature,
                    },
                ));
                continue;
            };

            let resolution = match cached.next().flatten() {
                Some(stored) => {
                    record_feature_status(&name, status::HIT);
                    FeatureResolution::Cached {
                        value: stored.value,
                        updated_at: stored.updated_at,
                    }
                }
                None => {
                    record_feature_status(&name, status::MISS);
                    self.resolve_miss(&feature, entity_id).await
                }
            };

            if let Some(tracker) = &tracker {
                match &resolution {
                    FeatureResolution::Cached { value, updated_at } => {
                        tracker.record_feature(&name, entity_id, value.clone(), *updated_at, LineageSource::Cache)
                    }
                    FeatureResolution::Computed { value } => {
                        tracker.record_feature(&name, entity_id, value.clone(), Utc::now(), LineageSource::Compute)
                    }
                    FeatureResolution::Defaulted { value, .. } => {
                        tracker.record_feature(&name, entity_id, value.clone(), Utc::now(), LineageSource::Default)
                    }
                    FeatureResolution::Absent { .. } => {}
                }
            }

            resolutions.push((name, resolution));
        }

        Ok(FeatureResponse {
            entity_name: entity_name.to_string(),
            entity_id: entity_id.to_string(),
            resolutions,
        })
    }

    /// Resolve a single feature to its value, if any.
    pub async fn get_online_feature(
        &self,
        entity_name: &str,
        entity_id: &str,
        feature_name: &str,
    ) -> Result<Option<Value>, ServingError> {
        let response = self
            .get_online_features(entity_name, entity_id, &[feature_name])
            .await?;
        Ok(response.value(feature_name).cloned())
    }

    /// Write values to the online cache, applying each feature's TTL.
    pub async fn set_online_features(
        &self,
        entity_name: &str,
        entity_id: &str,
        values: impl IntoIterator<Item = (String, Value)>,
    ) -> Result<usize, ServingError> {
        self.validate(entity_name, entity_id)?;

        let mut pipeline = self.cache.pipeline();
        for (name, value) in values {
            let feature = self
                .registry
                .feature(&name)
                .filter(|f| f.entity_name == entity_name)
                .ok_or_else(|| ServingError::UnknownFeature {
                    feature: name.clone(),
                    entity: entity_name.to_string(),
                })?;
            let bytes = StoredFeature::now(value)
                .encode()
                .map_err(|source| ServingError::Encode {
                    feature: name.clone(),
                    source,
                })?;
            pipeline.set(keys::feature(entity_name, entity_id, &name), bytes, feature.ttl);
        }

        let written = pipeline.len();
        if written == 0 {
            return Ok(0);
        }

        self.breaker
            .call(|| self.cache.execute(pipeline))
            .await
            .map_err(|e| ServingError::CacheWrite(e.to_string()))?;
        debug!(entity = %entity_name, entity_id = %entity_id, count = written, "Wrote online features");
        Ok(written)
    }

    /// Compute `feature_names` for an entity and write the results.
    ///
    /// This is the entry point for event-driven and scheduled refresh: the
    /// optional `trigger` is passed through to compute functions. Failed
    /// computes are reported, not written; an empty `feature_names` means
    /// every feature of the entity.
    pub async fn materialize(
        &self,
        entity_name: &str,
        entity_id: &str,
        feature_names: &[impl AsRef<str>],
        trigger: Option<&TriggerEvent>,
    ) -> Result<MaterializeReport, ServingError> {
        self.validate(entity_name, entity_id)?;

        let features: Vec<Arc<Feature>> = if feature_names.is_empty() {
            self.registry.features_for_entity(entity_name)
        } else {
            feature_names
                .iter()
                .map(|name| {
                    self.registry
                        .feature(name.as_ref())
                        .filter(|f| f.entity_name == entity_name)
                        .ok_or_else(|| ServingError::UnknownFeature {
                            feature: name.as_ref().to_string(),
                            entity: entity_name.to_string(),
                        })
                })
                .collect::<Result<_, _>>()?
        };

        let mut report = MaterializeReport::default();
        let mut values = Vec::new();
        for feature in features {
            match self.compute(&feature, entity_id, trigger).await {
                Ok(value) => {
                    report.written.push(feature.name.clone());
                    values.push((feature.name.clone(), value));
                }
                Err(e) => {
                    warn!(feature = %feature.name, entity_id = %entity_id, error = %e, "Materialization compute failed");
                    report.failed.push((feature.name.clone(), e.to_string()));
                }
            }
        }

        self.set_online_features(entity_name, entity_id, values).await?;
        Ok(report)
    }

    fn validate(&self, entity_name: &str, entity_id: &str) -> Result<(), ServingError> {
        if entity_id.trim().is_empty() {
            return Err(ServingError::InvalidRequest("entity_id must not be empty".into()));
        }
        if self.registry.entity(entity_name).is_none() {
            return Err(RegistryError::UnknownEntity(entity_name.to_string()).into());
        }
        Ok(())
    }

    /// One breaker-guarded `mget` for every known feature. Never fails:
    /// errors are logged and every entry comes back `None`.
    async fn fetch_cached(
        &self,
        entity_name: &str,
        entity_id: &str,
        features: &[&Arc<Feature>],
    ) -> Vec<Option<StoredFeature>> {
        if features.is_empty() {
            return Vec::new();
        }

        let cache_keys: Vec<String> = features
            .iter()
            .map(|f| keys::feature(entity_name, entity_id, &f.name))
            .collect();

        let started = Instant::now();
        let fetched = self.breaker.call(|| self.cache.mget(&cache_keys)).await;
        let elapsed = started.elapsed().as_secs_f64();
        for feature in features {
            record_feature_latency(&feature.name, step::CACHE, elapsed);
        }

        match fetched {
            Ok(values) if values.len() == features.len() => values
                .into_iter()
                .zip(features)
                .map(|(raw, feature)| {
                    let bytes = raw?;
                    match StoredFeature::decode(&bytes) {
                        Ok(stored) => Some(stored),
                        Err(e) => {
                            warn!(feature = %feature.name, error = %e, "Undecodable cached feature, treating as miss");
                            None
                        }
                    }
                })
                .collect(),
            Ok(values) => {
                warn!(
                    expected = features.len(),
                    got = values.len(),
                    "Cache returned wrong number of values, treating all as missing"
                );
                vec![None; features.len()]
            }
            Err(e) => {
                warn!(entity = %entity_name, error = %e, "Online cache read failed, falling back to compute");
                vec![None; features.len()]
            }
        }
    }

    async fn resolve_miss(&self, feature: &Feature, entity_id: &str) -> FeatureResolution {
        match self.compute(feature, entity_id, None).await {
            Ok(value) => {
                record_feature_status(&feature.name, status::COMPUTE_SUCCESS);
                FeatureResolution::Computed { value }
            }
            Err(e) => {
                record_feature_status(&feature.name, status::COMPUTE_FAILURE);
                match &feature.default_value {
                    Some(default) => {
                        record_feature_status(&feature.name, status::DEFAULT);
                        warn!(feature = %feature.name, entity_id = %entity_id, error = %e, "Compute failed, using default value");
                        FeatureResolution::Defaulted {
                            value: default.clone(),
                            error: e.to_string(),
                        }
                    }
                    None => {
                        record_feature_status(&feature.name, status::ERROR);
                        warn!(feature = %feature.name, entity_id = %entity_id, error = %e, "Compute failed and no default configured");
                        FeatureResolution::Absent {
                            reason: AbsentReason::ComputeFailed(e.to_string()),
                        }
                    }
                }
            }
        }
    }

    /// Run a compute function with panic isolation and the optional deadline.
    async fn compute(
        &self,
        feature: &Feature,
        entity_id: &str,
        trigger: Option<&TriggerEvent>,
    ) -> Result<Value, ComputeError> {
        let request = ComputeRequest {
            feature: &feature.name,
            entity_id,
            trigger,
        };
        let started = Instant::now();
        let guarded = AssertUnwindSafe(feature.compute.compute(request)).catch_unwind();

        let outcome = match self.compute_timeout {
            Some(limit) => tokio::time::timeout(limit, guarded).await,
            None => Ok(guarded.await),
        };
        record_feature_latency(&feature.name, step::COMPUTE, started.elapsed().as_secs_f64());
        let outcome = outcome.map_err(|_| ComputeError::Timeout {
            feature: feature.name.clone(),
            timeout_ms: self.compute_timeout.map_or(0, |limit| limit.as_millis() as u64),
        })?;

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ComputeError::failed(&feature.name, e)),
            Err(_) => Err(ComputeError::Panicked {
                feature: feature.name.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_envelope() {
        let stored = StoredFeature::now(json!(42));
        let decoded = StoredFeature::decode(&stored.encode().unwrap()).unwrap();
        assert_eq!(decoded, stored);
    }

    #[test]
    fn decode_bare_value() {
        let decoded = StoredFeature::decode(b"42").unwrap();
        assert_eq!(decoded.value, json!(42));

        let decoded = StoredFeature::decode(br#"{"value": 1}"#).unwrap();
        assert_eq!(decoded.value, json!({"value": 1}));
    }

    #[test]
    fn decode_garbage_fails() {
        assert!(StoredFeature::decode(b"not json").is_err());
    }

    #[test]
    fn response_values_skip_absent() {
        let response = FeatureResponse {
            entity_name: "User".into(),
            entity_id: "u1".into(),
            resolutions: vec![
                ("a".into(), FeatureResolution::Computed { value: json!(1) }),
                (
                    "b".into(),
                    FeatureResolution::Absent {
                        reason: AbsentReason::UnknownFeature,
                    },
                ),
            ],
        };
        let values = response.values();
        assert_eq!(values.len(), 1);
        assert_eq!(values["a"], json!(1));
        assert!(response.get("b").unwrap().is_absent());
    }
}
