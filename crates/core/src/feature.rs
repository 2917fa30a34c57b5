//! Entities, features, and the registry that owns them.
//!
//! The registry is populated by the application at startup through an
//! explicit builder-style API and then read concurrently while serving.
//! Registration after serving has started is allowed: the maps sit behind a
//! `parking_lot::RwLock` and readers receive cheap `Arc` clones.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::compute::Compute;
use crate::error::RegistryError;

/// A named identity class features are attached to (e.g. `User`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique entity name.
    pub name: String,
    /// Name of the identifier column (e.g. `user_id`).
    pub id_column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Entity {
    pub fn new(name: impl Into<String>, id_column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id_column: id_column.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A named, entity-scoped unit of computation.
#[derive(Clone)]
pub struct Feature {
    /// Unique feature name.
    pub name: String,
    /// Owning entity name. Must already be registered.
    pub entity_name: String,
    /// Produces the value on a cache miss.
    pub compute: Arc<dyn Compute>,
    /// Materialization cadence.
    pub refresh: Option<Duration>,
    /// Expiry applied when the value is written to the online cache.
    pub ttl: Option<Duration>,
    /// Whether a background materializer should keep this feature warm.
    pub materialize: bool,
    /// Returned when the cache misses and compute fails.
    pub default_value: Option<Value>,
    /// How old a served value may be before it counts as stale.
    pub stale_tolerance: Option<Duration>,
    pub description: Option<String>,
}

impl Feature {
    /// Create a feature with no refresh policy and no default.
    pub fn new(
        name: impl Into<String>,
        entity_name: impl Into<String>,
        compute: Arc<dyn Compute>,
    ) -> Self {
        Self {
            name: name.into(),
            entity_name: entity_name.into(),
            compute,
            refresh: None,
            ttl: None,
            materialize: false,
            default_value: None,
            stale_tolerance: None,
            description: None,
        }
    }

    pub fn refresh(mut self, every: Duration) -> Self {
        self.refresh = Some(every);
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn materialize(mut self, materialize: bool) -> Self {
        self.materialize = materialize;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn stale_tolerance(mut self, tolerance: Duration) -> Self {
        self.stale_tolerance = Some(tolerance);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl std::fmt::Debug for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feature")
            .field("name", &self.name)
            .field("entity_name", &self.entity_name)
            .field("refresh", &self.refresh)
            .field("ttl", &self.ttl)
            .field("materialize", &self.materialize)
            .field("default_value", &self.default_value)
            .field("stale_tolerance", &self.stale_tolerance)
            .finish_non_exhaustive()
    }
}

/// Registry of entities and features.
///
/// Re-registering a name replaces the previous definition.
#[derive(Default)]
pub struct FeatureRegistry {
    entities: RwLock<HashMap<String, Arc<Entity>>>,
    features: RwLock<HashMap<String, Arc<Feature>>>,
}

impl FeatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity. Replaces any existing entity with the same name.
    pub fn register_entity(&self, entity: Entity) -> Result<Arc<Entity>, RegistryError> {
        validate_name(&entity.name)?;
        validate_name(&entity.id_column)?;
        let entity = Arc::new(entity);
        self.entities
            .write()
            .insert(entity.name.clone(), Arc::clone(&entity));
        tracing::debug!(entity = %entity.name, "Registered entity");
        Ok(entity)
    }

    /// Register a feature. Its entity must already be registered.
    pub fn register_feature(&self, feature: Feature) -> Result<Arc<Feature>, RegistryError> {
        validate_name(&feature.name)?;
        if !self.entities.read().contains_key(&feature.entity_name) {
            return Err(RegistryError::MissingEntity {
                feature: feature.name,
                entity: feature.entity_name,
            });
        }
        let feature = Arc::new(feature);
        let previous = self
            .features
            .write()
            .insert(feature.name.clone(), Arc::clone(&feature));
        if previous.is_some() {
            tracing::warn!(feature = %feature.name, "Overwriting existing feature");
        } else {
            tracing::debug!(feature = %feature.name, entity = %feature.entity_name, "Registered feature");
        }
        Ok(feature)
    }

    /// Get an entity by name.
    pub fn entity(&self, name: &str) -> Option<Arc<Entity>> {
        self.entities.read().get(name).cloned()
    }

    /// Get a feature by name.
    pub fn feature(&self, name: &str) -> Option<Arc<Feature>> {
        self.features.read().get(name).cloned()
    }

    /// All features attached to an entity, sorted by name.
    pub fn features_for_entity(&self, entity_name: &str) -> Vec<Arc<Feature>> {
        let mut found: Vec<Arc<Feature>> = self
            .features
            .read()
            .values()
            .filter(|f| f.entity_name == entity_name)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }

    /// All registered feature names, sorted.
    pub fn feature_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.features.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// All registered entity names, sorted.
    pub fn entity_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entities.read().keys().cloned().collect();
        names.sort();
        names
    }
}

fn validate_name(name: &str) -> Result<(), RegistryError> {
    if name.trim().is_empty() || name.contains(':') {
        return Err(RegistryError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::from_fn;
    use crate::error::BoxError;

    fn constant(value: i64) -> Arc<dyn Compute> {
        from_fn(move |_: &str| Ok::<_, BoxError>(value))
    }

    #[test]
    fn feature_requires_registered_entity() {
        let registry = FeatureRegistry::new();
        let err = registry
            .register_feature(Feature::new("clicks", "User", constant(1)))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::MissingEntity {
                feature: "clicks".into(),
                entity: "User".into()
            }
        );
    }

    #[test]
    fn register_and_lookup() {
        let registry = FeatureRegistry::new();
        registry.register_entity(Entity::new("User", "user_id")).unwrap();
        registry
            .register_feature(
                Feature::new("clicks", "User", constant(1))
                    .default_value(0)
                    .ttl(Duration::from_secs(60)),
            )
            .unwrap();

        let feature = registry.feature("clicks").unwrap();
        assert_eq!(feature.entity_name, "User");
        assert_eq!(feature.default_value, Some(Value::from(0)));
        assert_eq!(feature.ttl, Some(Duration::from_secs(60)));
        assert!(registry.feature("missing").is_none());
    }

    #[test]
    fn reregistration_overwrites() {
        let registry = FeatureRegistry::new();
        registry.register_entity(Entity::new("User", "user_id")).unwrap();
        registry
            .register_feature(Feature::new("score", "User", constant(1)))
            .unwrap();
        registry
            .register_feature(Feature::new("score", "User", constant(2)).default_value(7))
            .unwrap();

        assert_eq!(registry.feature_names(), vec!["score".to_string()]);
        assert_eq!(
            registry.feature("score").unwrap().default_value,
            Some(Value::from(7))
        );
    }

    #[test]
    fn features_for_entity_filters_and_sorts() {
        let registry = FeatureRegistry::new();
        registry.register_entity(Entity::new("User", "user_id")).unwrap();
        registry.register_entity(Entity::new("Item", "item_id")).unwrap();
        registry
            .register_feature(Feature::new("b_feature", "User", constant(1)))
            .unwrap();
        registry
            .register_feature(Feature::new("a_feature", "User", constant(1)))
            .unwrap();
        registry
            .register_feature(Feature::new("price", "Item", constant(1)))
            .unwrap();

        let names: Vec<String> = registry
            .features_for_entity("User")
            .iter()
            .map(|f| f.name.clone())
            .collect();
        assert_eq!(names, vec!["a_feature", "b_feature"]);
        assert_eq!(registry.entity_names(), vec!["Item", "User"]);
    }

    #[test]
    fn names_with_separator_rejected() {
        let registry = FeatureRegistry::new();
        assert!(registry.register_entity(Entity::new("a:b", "id")).is_err());
        assert!(registry.register_entity(Entity::new("  ", "id")).is_err());
    }
}
