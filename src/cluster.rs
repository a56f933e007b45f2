//! Values supplied through the cluster: the third and fourth value layers.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::Api;
use serde_json::{Map, Value};

use crate::values::{self, ValuesError};

/// Config map key holding the global cluster layer.
pub const GLOBAL_VALUES_KEY: &str = "values";
/// Suffix of config map keys holding a module's cluster layer.
pub const MODULE_VALUES_SUFFIX: &str = "-values";

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("cannot read cluster config: {0}")]
    Api(#[from] kube::Error),

    #[error(transparent)]
    Values(#[from] ValuesError),
}

/// Cluster-supplied layers as of one orchestration run.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterValues {
    pub global: Value,
    pub modules: BTreeMap<String, Value>,
}

impl Default for ClusterValues {
    fn default() -> Self {
        Self {
            global: Value::Object(Map::new()),
            modules: BTreeMap::new(),
        }
    }
}

impl ClusterValues {
    /// Build layers from config map data. Unrelated keys are ignored.
    pub fn from_data(data: &BTreeMap<String, String>) -> Result<Self, ValuesError> {
        let mut parsed = Self::default();
        for (key, text) in data {
            if key == GLOBAL_VALUES_KEY {
                parsed.global = values::parse_values(text, key)?;
            } else if let Some(module) = key.strip_suffix(MODULE_VALUES_SUFFIX) {
                if module.is_empty() {
                    continue;
                }
                parsed
                    .modules
                    .insert(module.to_owned(), values::parse_values(text, key)?);
            }
        }
        Ok(parsed)
    }
}

/// Source of the cluster value layers, re-read on every run.
#[async_trait]
pub trait ClusterConfigSource: Send + Sync {
    async fn load(&self) -> Result<ClusterValues, ClusterError>;
}

/// Reads cluster layers from a config map in the orchestrator's namespace.
pub struct ConfigMapConfigSource {
    api: Api<ConfigMap>,
    name: String,
}

impl ConfigMapConfigSource {
    pub fn new(client: kube::Client, namespace: &str, name: impl Into<String>) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            name: name.into(),
        }
    }
}

#[async_trait]
impl ClusterConfigSource for ConfigMapConfigSource {
    #[tracing::instrument(skip(self), fields(config_map = %self.name), err)]
    async fn load(&self) -> Result<ClusterValues, ClusterError> {
        match self.api.get(&self.name).await {
            Ok(cm) => Ok(ClusterValues::from_data(&cm.data.unwrap_or_default())?),
            Err(kube::Error::Api(err)) if err.code == 404 => {
                tracing::debug!("config map absent, cluster layers are empty");
                Ok(ClusterValues::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn data(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn splits_global_and_module_keys() {
        let parsed = ClusterValues::from_data(&data(&[
            ("values", "replicas: 2\n"),
            ("app-values", "image:\n  tag: v1\n"),
            ("ingress-nginx-values", "{}"),
            ("unrelated", "whatever: 1"),
        ]))
        .unwrap();

        assert_eq!(parsed.global, json!({"replicas": 2}));
        assert_eq!(parsed.modules["app"], json!({"image": {"tag": "v1"}}));
        assert_eq!(parsed.modules["ingress-nginx"], json!({}));
        assert_eq!(parsed.modules.len(), 2);
    }

    #[test]
    fn empty_data_is_empty_layers() {
        let parsed = ClusterValues::from_data(&BTreeMap::new()).unwrap();
        assert_eq!(parsed, ClusterValues::default());
    }

    #[test]
    fn bare_suffix_key_is_ignored() {
        let parsed = ClusterValues::from_data(&data(&[("-values", "a: 1")])).unwrap();
        assert!(parsed.modules.is_empty());
    }

    #[test]
    fn malformed_module_layer_names_the_key() {
        let err = ClusterValues::from_data(&data(&[("app-values", "a: [1")])).unwrap_err();
        assert!(matches!(err, ValuesError::Parse { ref origin, .. } if origin == "app-values"));
    }
}
