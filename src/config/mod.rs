//! Config subsystem (§4.10): declared properties, YAML file layering,
//! pull-from-configurator, validation, and change callbacks.

mod validation;
mod yaml_layering;

pub use validation::Validation;
pub use yaml_layering::load_layered_yaml;

use crate::error::ConnectorError;
use arc_swap::ArcSwap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Clone)]
pub struct ConfigProperty {
    pub name: String,
    pub default_value: String,
    pub validation: Validation,
    pub secret: bool,
    pub value: String,
    pub set_explicitly: bool,
}

/// Declares config properties case-sensitively (§9 design note: pick one
/// case policy and document it — this crate is case-sensitive for
/// property names and case-insensitive only for ticker names).
///
/// `properties` is the source of truth, mutated under lock on the rare
/// `define`/`set`/`reset`/`apply_fetched` paths. `values` mirrors just the
/// current `{name: value}` pairs behind an `ArcSwap` so the hot `get` path
/// used on every inbound request never blocks on the mutex a concurrent
/// config refresh might be holding.
#[derive(Default)]
pub struct ConfigRegistry {
    properties: Mutex<HashMap<String, ConfigProperty>>,
    values: ArcSwap<HashMap<String, String>>,
}

pub struct DefineConfigOptions {
    pub default_value: Option<String>,
    pub validation: Validation,
    pub secret: bool,
}

impl Default for DefineConfigOptions {
    fn default() -> Self {
        Self {
            default_value: None,
            validation: Validation::Any,
            secret: false,
        }
    }
}

impl ConfigRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn define(&self, name: &str, options: DefineConfigOptions) -> Result<(), ConnectorError> {
        let default_value = options.default_value.unwrap_or_default();
        if !default_value.is_empty() && !options.validation.accepts(&default_value) {
            return Err(ConnectorError::Init(format!(
                "default value {default_value:?} for {name:?} fails its own validation"
            )));
        }
        let mut properties = self.properties.lock().await;
        properties.insert(
            name.to_string(),
            ConfigProperty {
                name: name.to_string(),
                default_value: default_value.clone(),
                validation: options.validation,
                secret: options.secret,
                value: default_value,
                set_explicitly: false,
            },
        );
        self.sync_values_cache(&properties);
        Ok(())
    }

    /// Lock-free read of the current value (falls back to the mutex-backed
    /// snapshot only if the property was declared after the last sync,
    /// which cannot happen once startup has finished declaring its set).
    pub async fn get(&self, name: &str) -> Option<String> {
        self.values.load().get(name).cloned()
    }

    fn sync_values_cache(&self, properties: &HashMap<String, ConfigProperty>) {
        let values: HashMap<String, String> = properties.iter().map(|(k, v)| (k.clone(), v.value.clone())).collect();
        self.values.store(Arc::new(values));
    }

    /// Succeeds only in TESTING deployment or before startup; the caller
    /// (the Connector) is responsible for enforcing that precondition
    /// since it owns the deployment/phase state.
    pub async fn set(&self, name: &str, value: &str) -> Result<(), ConnectorError> {
        let mut properties = self.properties.lock().await;
        let property = properties
            .get_mut(name)
            .ok_or_else(|| ConnectorError::Init(format!("undeclared config property {name:?}")))?;
        if !property.validation.accepts(value) {
            return Err(ConnectorError::ConfigValidation(format!(
                "{value:?} is invalid for {name:?}"
            )));
        }
        property.value = value.to_string();
        property.set_explicitly = true;
        self.sync_values_cache(&properties);
        Ok(())
    }

    pub async fn reset(&self, name: &str) -> Result<(), ConnectorError> {
        let mut properties = self.properties.lock().await;
        let property = properties
            .get_mut(name)
            .ok_or_else(|| ConnectorError::Init(format!("undeclared config property {name:?}")))?;
        property.value = property.default_value.clone();
        property.set_explicitly = false;
        self.sync_values_cache(&properties);
        Ok(())
    }

    /// Applies a freshly fetched `{name: value}` map, validating each
    /// entry and keeping the default on failure (§4.10 step 3). Returns
    /// the set of property names whose value actually changed.
    pub async fn apply_fetched(&self, fetched: &HashMap<String, String>) -> HashSet<String> {
        let mut properties = self.properties.lock().await;
        let mut changed = HashSet::new();
        for (name, property) in properties.iter_mut() {
            if let Some(candidate) = fetched.get(name) {
                if !property.validation.accepts(candidate) {
                    warn!(event = "config_validation_failed", name, candidate, "keeping default");
                    continue;
                }
                if &property.value != candidate {
                    property.value = candidate.clone();
                    property.set_explicitly = true;
                    changed.insert(name.clone());
                }
            }
        }
        self.sync_values_cache(&properties);
        changed
    }

    pub async fn snapshot(&self) -> HashMap<String, ConfigProperty> {
        self.properties
            .lock()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub async fn names(&self) -> Vec<String> {
        self.properties.lock().await.keys().cloned().collect()
    }
}

/// Partially masks a secret value for logging (§4.8 step 6): keeps the
/// first and last character, replaces the rest with `*`.
pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 2 {
        return "*".repeat(chars.len());
    }
    let mut masked = String::new();
    masked.push(chars[0]);
    masked.push_str(&"*".repeat(chars.len() - 2));
    masked.push(chars[chars.len() - 1]);
    masked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn define_then_get_returns_default() {
        let registry = ConfigRegistry::new();
        registry
            .define(
                "foo",
                DefineConfigOptions {
                    default_value: Some("bar".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(registry.get("foo").await, Some("bar".to_string()));
    }

    #[tokio::test]
    async fn apply_fetched_reports_only_actual_changes() {
        let registry = ConfigRegistry::new();
        registry
            .define(
                "foo",
                DefineConfigOptions {
                    default_value: Some("bar".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let mut fetched = HashMap::new();
        fetched.insert("foo".to_string(), "bar".to_string());
        let changed = registry.apply_fetched(&fetched).await;
        assert!(changed.is_empty());

        fetched.insert("foo".to_string(), "baz".to_string());
        let changed = registry.apply_fetched(&fetched).await;
        assert_eq!(changed, HashSet::from(["foo".to_string()]));
        assert_eq!(registry.get("foo").await, Some("baz".to_string()));
    }

    #[tokio::test]
    async fn invalid_fetched_value_keeps_default() {
        let registry = ConfigRegistry::new();
        registry
            .define(
                "port",
                DefineConfigOptions {
                    default_value: Some("8080".to_string()),
                    validation: Validation::parse("int [1,65535]").unwrap(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let mut fetched = HashMap::new();
        fetched.insert("port".to_string(), "not-a-number".to_string());
        registry.apply_fetched(&fetched).await;
        assert_eq!(registry.get("port").await, Some("8080".to_string()));
    }

    #[test]
    fn mask_secret_keeps_ends() {
        assert_eq!(mask_secret("abcdef"), "a****f");
        assert_eq!(mask_secret("ab"), "**");
    }
}
