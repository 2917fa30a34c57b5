//! Feature placeholders in query templates.
//!
//! A template such as `"articles about {favorite_topic}"` depends on the
//! `favorite_topic` feature. The [`DependencyResolver`] extracts those
//! dependencies, fetches them for one entity through the online store, and
//! renders the template with the served values.

use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};
use strata_online::OnlineFeatureStore;
use tracing::{debug, warn};

use crate::error::ContextError;

static PLACEHOLDER: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\{([\w.]+)\}").ok());

/// Feature names referenced by `{name}` placeholders, sorted and distinct.
pub fn parse_dependencies(template: &str) -> BTreeSet<String> {
    let Some(pattern) = PLACEHOLDER.as_ref() else {
        return BTreeSet::new();
    };
    pattern
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Substitute every placeholder from `values`.
///
/// String values are inserted verbatim, anything else as JSON. Fails with
/// the full list of placeholders that had no value.
pub fn render(template: &str, values: &Map<String, Value>) -> Result<String, ContextError> {
    let missing: Vec<String> = parse_dependencies(template)
        .into_iter()
        .filter(|name| !values.contains_key(name))
        .collect();
    if !missing.is_empty() {
        warn!(template = %template, missing = ?missing, "Template dependency missing");
        return Err(ContextError::MissingDependency {
            template: template.to_string(),
            missing,
        });
    }

    let Some(pattern) = PLACEHOLDER.as_ref() else {
        return Ok(template.to_string());
    };
    let rendered = pattern.replace_all(template, |caps: &Captures<'_>| match values.get(&caps[1]) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => caps[0].to_string(),
    });
    Ok(rendered.into_owned())
}

/// Resolves template dependencies against the online feature store.
pub struct DependencyResolver {
    store: Arc<OnlineFeatureStore>,
}

impl DependencyResolver {
    pub fn new(store: Arc<OnlineFeatureStore>) -> Self {
        Self { store }
    }

    /// Fetch the template's features for one entity and render it.
    ///
    /// Templates without placeholders are returned unchanged and touch
    /// nothing. Inside an assembly the fetched features are recorded in the
    /// context's lineage like any other feature read.
    pub async fn resolve(
        &self,
        template: &str,
        entity_name: &str,
        entity_id: &str,
    ) -> Result<String, ContextError> {
        let dependencies = parse_dependencies(template);
        if dependencies.is_empty() {
            return Ok(template.to_string());
        }
        debug!(entity_id = %entity_id, dependencies = ?dependencies, "Resolving template dependencies");

        let names: Vec<&str> = dependencies.iter().map(String::as_str).collect();
        let response = self
            .store
            .get_online_features(entity_name, entity_id, &names)
            .await?;
        render(template, &response.values())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dependencies_are_extracted() {
        let deps = parse_dependencies("Hi {user.first_name}, about {topic} and {topic} {not valid}");
        assert_eq!(
            deps.into_iter().collect::<Vec<_>>(),
            vec!["topic".to_string(), "user.first_name".to_string()]
        );
        assert!(parse_dependencies("no placeholders").is_empty());
    }

    #[test]
    fn render_substitutes_values() {
        let mut values = Map::new();
        values.insert("topic".into(), json!("rust"));
        values.insert("clicks".into(), json!(3));
        assert_eq!(
            render("{topic} x{clicks}", &values).unwrap(),
            "rust x3"
        );
    }

    #[test]
    fn render_reports_every_missing_placeholder() {
        let mut values = Map::new();
        values.insert("topic".into(), json!("rust"));
        match render("{topic} {a} {b}", &values) {
            Err(ContextError::MissingDependency { missing, .. }) => assert_eq!(missing, vec!["a", "b"]),
            other => panic!("expected missing dependency, got {other:?}"),
        }
    }
}
