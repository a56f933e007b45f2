use std::path::{Path, PathBuf};

use crate::values::ValueStore;

/// State shared by every module during the process lifetime.
///
/// Owns all six value layers; nothing else holds mutable values. Files handed
/// to external processes live under `temp_dir`.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub values: ValueStore,
    temp_dir: PathBuf,
}

impl RunContext {
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            values: ValueStore::new(),
            temp_dir: temp_dir.into(),
        }
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Materialized effective values of a module.
    pub fn values_path(&self, module: &str) -> PathBuf {
        self.temp_dir.join(format!("{module}.yaml"))
    }

    /// Where a hook may write values for its own module.
    pub fn module_dynamic_values_path(&self, module: &str) -> PathBuf {
        self.temp_dir
            .join("dynamic-values")
            .join(module)
            .join("module.yaml")
    }

    /// Where a hook of `module` may write values shared by all modules.
    pub fn global_dynamic_values_path(&self, module: &str) -> PathBuf {
        self.temp_dir
            .join("dynamic-values")
            .join(module)
            .join("global.yaml")
    }

    /// Names of modules enabled so far, handed to an enablement predicate.
    pub fn enabled_modules_path(&self, module: &str) -> PathBuf {
        self.temp_dir
            .join("enabled-modules")
            .join(format!("{module}.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_live_under_temp_dir() {
        let ctx = RunContext::new("/tmp/orch");
        assert_eq!(ctx.values_path("app"), PathBuf::from("/tmp/orch/app.yaml"));
        assert_eq!(
            ctx.enabled_modules_path("app"),
            PathBuf::from("/tmp/orch/enabled-modules/app.json")
        );
        assert_ne!(
            ctx.module_dynamic_values_path("app"),
            ctx.global_dynamic_values_path("app")
        );
        assert!(ctx.global_dynamic_values_path("app").starts_with(ctx.temp_dir()));
    }
}
