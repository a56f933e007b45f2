//! Module discovery, ordering, static value seeding and enablement.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::context::RunContext;
use crate::hooks::{self, HookError, HookRunner, ModuleHooks};
use crate::module::{ENABLED_FILE, MODULE_DIR_PATTERN, Module, VALUES_FILE};
use crate::values::{self, LayerKind, Scope, ValueStore, ValuesError};

/// Environment variable pointing an enablement predicate at the JSON list of
/// modules enabled so far.
pub const ENABLED_MODULES_PATH_ENV: &str = "ENABLED_MODULES_PATH";

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(
        "bad module directory names, must match regex `{pattern}`: {} (valid: {})",
        join_paths(bad_dirs),
        valid_dirs.join(", ")
    )]
    Validation {
        pattern: &'static str,
        bad_dirs: Vec<PathBuf>,
        /// Directory names that did match, for context.
        valid_dirs: Vec<String>,
    },

    #[error("module name '{name}' is used by more than one directory: {}", join_paths(dirs))]
    DuplicateName { name: String, dirs: Vec<PathBuf> },

    #[error("cannot list modules directory {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Values(#[from] ValuesError),

    #[error(transparent)]
    Hooks(#[from] HookError),
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// All modules of a modules directory, in execution order, with their hooks.
#[derive(Debug, Clone)]
pub struct ModuleRegistry {
    modules_dir: PathBuf,
    modules: Vec<Module>,
    hooks: BTreeMap<String, ModuleHooks>,
}

impl ModuleRegistry {
    /// Discover modules, seed their static values into `store`, and find their hooks.
    #[tracing::instrument(skip_all, fields(modules_dir = %modules_dir.display()), err)]
    pub async fn build(modules_dir: &Path, store: &mut ValueStore) -> Result<Self, RegistryError> {
        let modules = Self::discover(modules_dir).await?;

        let mut hooks = BTreeMap::new();
        for module in &modules {
            hooks.insert(module.name.clone(), hooks::discover(&module.name, &module.path)?);
        }

        let registry = Self {
            modules_dir: modules_dir.to_path_buf(),
            modules,
            hooks,
        };
        registry.seed_static_values(store).await?;

        tracing::info!(
            modules = ?registry.modules.iter().map(|m| m.name.as_str()).collect::<Vec<_>>(),
            "modules discovered"
        );
        Ok(registry)
    }

    /// Immediate subdirectories of `modules_dir` as modules, sorted byte-wise
    /// by directory name. Plain files are ignored.
    ///
    /// Every directory without a valid `NNN-` prefix is reported at once.
    pub async fn discover(modules_dir: &Path) -> Result<Vec<Module>, RegistryError> {
        let io_err = |source| RegistryError::Io {
            path: modules_dir.to_path_buf(),
            source,
        };

        let mut dirs = Vec::new();
        let mut entries = tokio::fs::read_dir(modules_dir).await.map_err(io_err)?;
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let path = entry.path();
            if tokio::fs::metadata(&path).await.map_err(io_err)?.is_dir() {
                dirs.push(path);
            }
        }
        dirs.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        let mut modules = Vec::with_capacity(dirs.len());
        let mut bad_dirs = Vec::new();
        for dir in dirs {
            match Module::from_dir(&dir) {
                Some(module) => modules.push(module),
                None => bad_dirs.push(dir),
            }
        }

        if !bad_dirs.is_empty() {
            return Err(RegistryError::Validation {
                pattern: MODULE_DIR_PATTERN,
                bad_dirs,
                valid_dirs: modules.into_iter().map(|m| m.directory_name).collect(),
            });
        }
        check_unique_names(&modules)?;

        Ok(modules)
    }

    /// Load the global static layer and every module's static layer.
    pub async fn seed_static_values(&self, store: &mut ValueStore) -> Result<(), ValuesError> {
        let global = values::load_values_file(&self.global_values_path()).await?;
        store.set_layer(Scope::Global, LayerKind::GlobalStatic, global)?;

        for module in &self.modules {
            let tree = values::load_values_file(&module.values_path()).await?;
            store.set_layer(Scope::Module(&module.name), LayerKind::ModuleStatic, tree)?;
        }
        Ok(())
    }

    pub fn modules_dir(&self) -> &Path {
        &self.modules_dir
    }

    pub fn global_values_path(&self) -> PathBuf {
        self.modules_dir.join(VALUES_FILE)
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn get(&self, name: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.name == name)
    }

    pub fn hooks(&self, module: &str) -> Option<&ModuleHooks> {
        self.hooks.get(module)
    }

    /// Evaluate the module's `enabled` predicate.
    ///
    /// Without a predicate file the module is enabled. Otherwise the predicate
    /// runs in the module directory and sees the names in `enabled_so_far` as a
    /// JSON array through `ENABLED_MODULES_PATH`. Exit code zero means enabled;
    /// any other exit is an error, never a silent "disabled".
    ///
    /// `Ok(false)` is reserved for a future explicit "disabled" signal and is
    /// not returned today.
    #[tracing::instrument(skip_all, fields(module = %module.name), err)]
    pub async fn is_enabled(
        &self,
        module: &Module,
        enabled_so_far: &[String],
        ctx: &RunContext,
        runner: &dyn HookRunner,
        base_env: &[(String, String)],
    ) -> Result<bool, RegistryError> {
        let predicate = module.enabled_path();
        let present = tokio::fs::try_exists(&predicate)
            .await
            .map_err(|source| predicate_spawn_error(module, source))?;
        if !present {
            return Ok(true);
        }

        let list = serde_json::to_vec(enabled_so_far).map_err(|e| {
            predicate_spawn_error(module, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        let list_path = ctx.enabled_modules_path(&module.name);
        values::store::write_file(&list_path, &list).await?;

        let values_path = ctx
            .values
            .materialize(&module.name, &ctx.values_path(&module.name))
            .await?;

        let mut env = base_env.to_vec();
        env.extend([
            (
                ENABLED_MODULES_PATH_ENV.to_owned(),
                list_path.display().to_string(),
            ),
            (
                hooks::runner::VALUES_PATH_ENV.to_owned(),
                values_path.display().to_string(),
            ),
        ]);

        let out = runner
            .run(&predicate, &module.path, &env)
            .await
            .map_err(|source| predicate_spawn_error(module, source))?;
        if !out.success {
            tracing::error!(stdout = %out.stdout, stderr = %out.stderr, "enablement predicate failed");
            return Err(HookError::Failed {
                module: module.name.clone(),
                hook: ENABLED_FILE.to_owned(),
                code: out.code,
                stdout: out.stdout,
                stderr: out.stderr,
            }
            .into());
        }
        Ok(true)
    }
}

fn predicate_spawn_error(module: &Module, source: std::io::Error) -> RegistryError {
    HookError::Spawn {
        module: module.name.clone(),
        hook: ENABLED_FILE.to_owned(),
        source,
    }
    .into()
}

fn check_unique_names(modules: &[Module]) -> Result<(), RegistryError> {
    let mut by_name: BTreeMap<&str, Vec<PathBuf>> = BTreeMap::new();
    for module in modules {
        by_name
            .entry(module.name.as_str())
            .or_default()
            .push(module.path.clone());
    }
    match by_name.into_iter().find(|(_, dirs)| dirs.len() > 1) {
        Some((name, dirs)) => Err(RegistryError::DuplicateName {
            name: name.to_owned(),
            dirs,
        }),
        None => Ok(()),
    }
}
