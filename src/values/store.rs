use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use super::error::ValuesError;
use super::merge;

// ---------------------------------------------------------------------------
// Layers and scopes
// ---------------------------------------------------------------------------

/// One of the six value layers, listed in merge order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LayerKind {
    /// Shared `values.yaml` at the root of the modules directory.
    GlobalStatic,
    /// The module's own `values.yaml`.
    ModuleStatic,
    /// Global values injected from the cluster config object.
    ClusterGlobal,
    /// Module values injected from the cluster config object.
    ClusterModule,
    /// Global values produced by hooks during the process lifetime.
    DynamicGlobal,
    /// Module values produced by hooks during the process lifetime.
    DynamicModule,
}

impl LayerKind {
    /// Merge order: later entries override earlier ones.
    pub const MERGE_ORDER: [Self; 6] = [
        Self::GlobalStatic,
        Self::ModuleStatic,
        Self::ClusterGlobal,
        Self::ClusterModule,
        Self::DynamicGlobal,
        Self::DynamicModule,
    ];

    pub fn is_module_scoped(self) -> bool {
        matches!(
            self,
            Self::ModuleStatic | Self::ClusterModule | Self::DynamicModule
        )
    }
}

/// Owner of a layer: every module sees the global scope plus its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope<'a> {
    Global,
    Module(&'a str),
}

impl fmt::Display for Scope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Module(name) => write!(f, "module '{name}'"),
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// In-memory layered values for the global scope and every module scope.
#[derive(Debug, Default, Clone)]
pub struct ValueStore {
    global: BTreeMap<LayerKind, Value>,
    modules: BTreeMap<String, BTreeMap<LayerKind, Value>>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace one layer. The tree must be a mapping and the layer
    /// kind must belong to the given scope.
    pub fn set_layer(
        &mut self,
        scope: Scope<'_>,
        kind: LayerKind,
        tree: Value,
    ) -> Result<(), ValuesError> {
        check_scope(scope, kind)?;
        if !tree.is_object() {
            return Err(ValuesError::NotAMapping {
                origin: format!("{kind:?} layer of {scope}"),
            });
        }
        self.layers_mut(scope).insert(kind, tree);
        Ok(())
    }

    pub fn layer(&self, scope: Scope<'_>, kind: LayerKind) -> Option<&Value> {
        match scope {
            Scope::Global => self.global.get(&kind),
            Scope::Module(name) => self.modules.get(name).and_then(|l| l.get(&kind)),
        }
    }

    /// Drop a layer kind from every scope.
    pub fn clear_layer_kind(&mut self, kind: LayerKind) {
        if kind.is_module_scoped() {
            for layers in self.modules.values_mut() {
                layers.remove(&kind);
            }
        } else {
            self.global.remove(&kind);
        }
    }

    /// Deep-merge a hook result into the dynamic layer of `scope`.
    pub fn merge_dynamic(&mut self, scope: Scope<'_>, tree: Value) -> Result<(), ValuesError> {
        if !tree.is_object() {
            return Err(ValuesError::NotAMapping {
                origin: format!("dynamic values for {scope}"),
            });
        }
        let kind = match scope {
            Scope::Global => LayerKind::DynamicGlobal,
            Scope::Module(_) => LayerKind::DynamicModule,
        };
        let layer = self
            .layers_mut(scope)
            .entry(kind)
            .or_insert_with(|| Value::Object(Map::new()));
        merge::deep_merge(layer, tree);
        Ok(())
    }

    /// Effective values of a module: the six layers merged in order.
    pub fn compose_effective(&self, module: &str) -> Value {
        let module_layers = self.modules.get(module);
        let layers = LayerKind::MERGE_ORDER.iter().filter_map(|kind| {
            if kind.is_module_scoped() {
                module_layers.and_then(|l| l.get(kind))
            } else {
                self.global.get(kind)
            }
        });
        merge::merge_layers(layers)
    }

    /// Compose the module's effective values and write them as YAML to `path`.
    #[tracing::instrument(skip(self, path), fields(path = %path.display()), err)]
    pub async fn materialize(&self, module: &str, path: &Path) -> Result<PathBuf, ValuesError> {
        let effective = self.compose_effective(module);
        let yaml = serde_yaml::to_string(&effective)?;
        write_file(path, yaml.as_bytes()).await?;
        Ok(path.to_path_buf())
    }

    fn layers_mut(&mut self, scope: Scope<'_>) -> &mut BTreeMap<LayerKind, Value> {
        match scope {
            Scope::Global => &mut self.global,
            Scope::Module(name) => self.modules.entry(name.to_owned()).or_default(),
        }
    }
}

fn check_scope(scope: Scope<'_>, kind: LayerKind) -> Result<(), ValuesError> {
    let module_scope = matches!(scope, Scope::Module(_));
    if module_scope == kind.is_module_scoped() {
        Ok(())
    } else {
        Err(ValuesError::ScopeMismatch {
            kind,
            scope: scope.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// Parse YAML (or JSON) text into a values mapping.
///
/// Blank or comment-only text is an empty mapping, as is an explicit `null`.
pub fn parse_values(text: &str, origin: &str) -> Result<Value, ValuesError> {
    let is_blank = text
        .lines()
        .all(|line| line.trim().is_empty() || line.trim().starts_with('#'));
    if is_blank {
        return Ok(Value::Object(Map::new()));
    }

    let value: Value = serde_yaml::from_str(text).map_err(|source| ValuesError::Parse {
        origin: origin.to_owned(),
        source,
    })?;

    match value {
        Value::Null => Ok(Value::Object(Map::new())),
        Value::Object(_) => Ok(value),
        _ => Err(ValuesError::NotAMapping {
            origin: origin.to_owned(),
        }),
    }
}

/// Load a values file. A missing file is an empty layer, not an error.
pub async fn load_values_file(path: &Path) -> Result<Value, ValuesError> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Value::Object(Map::new()));
        }
        Err(source) => {
            return Err(ValuesError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    parse_values(&text, &path.display().to_string())
}

pub(crate) async fn write_file(path: &Path, contents: &[u8]) -> Result<(), ValuesError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| ValuesError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    tokio::fs::write(path, contents)
        .await
        .map_err(|source| ValuesError::Write {
            path: path.to_path_buf(),
            source,
        })
}
