//! A module: one numbered directory holding a chart, values and hooks.
//!
//! Every run drives the module through
//! `CheckChart -> Cleanup -> BeforeHelm hooks -> Upgrade -> AfterHelm hooks`,
//! stopping at the first error.

pub mod error;

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::context::RunContext;
use crate::hooks::{self, BindingType, HookRunner, ModuleHooks};
use crate::release::{ReleaseBackend, ReleaseError, ReleaseState, UpgradeParams};

pub use error::ModuleError;

/// Directory names must carry a three digit ordering prefix.
pub const MODULE_DIR_PATTERN: &str = "^[0-9]{3}-(.+)$";

static MODULE_DIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(MODULE_DIR_PATTERN).expect("valid module directory regex"));

/// File whose presence means the module manages a release.
pub const CHART_FILE: &str = "Chart.yaml";
/// Module static values.
pub const VALUES_FILE: &str = "values.yaml";
/// Optional enablement predicate.
pub const ENABLED_FILE: &str = "enabled";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    /// Directory name without the ordering prefix; also the release name.
    pub name: String,
    pub directory_name: String,
    pub path: PathBuf,
}

/// How a module run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleOutcome {
    /// No chart: nothing to release.
    Skipped,
    Reconciled,
}

/// What cleanup did to the module's release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupAction {
    NoRelease,
    /// A first revision that failed was purged with its history.
    Purged,
    /// The release exists and was left as is. Later FAILED revisions stay
    /// for the operator to inspect.
    Kept,
}

/// Module name encoded in a directory name, if the name is valid.
pub fn parse_module_name(directory_name: &str) -> Option<&str> {
    MODULE_DIR
        .captures(directory_name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

impl Module {
    /// Module for a directory, or `None` when the name lacks the ordering prefix.
    pub fn from_dir(path: &Path) -> Option<Self> {
        let directory_name = path.file_name()?.to_str()?;
        let name = parse_module_name(directory_name)?;
        Some(Self {
            name: name.to_owned(),
            directory_name: directory_name.to_owned(),
            path: path.to_path_buf(),
        })
    }

    pub fn release_name(&self) -> &str {
        &self.name
    }

    pub fn chart_path(&self) -> PathBuf {
        self.path.join(CHART_FILE)
    }

    pub fn values_path(&self) -> PathBuf {
        self.path.join(VALUES_FILE)
    }

    pub fn enabled_path(&self) -> PathBuf {
        self.path.join(ENABLED_FILE)
    }

    pub async fn has_chart(&self) -> Result<bool, ModuleError> {
        let path = self.chart_path();
        tokio::fs::try_exists(&path)
            .await
            .map_err(|source| ModuleError::Chart {
                module: self.name.clone(),
                path,
                source,
            })
    }

    /// Run the module once.
    #[tracing::instrument(skip_all, fields(module = %self.name), err)]
    pub async fn run(
        &self,
        ctx: &mut RunContext,
        backend: &dyn ReleaseBackend,
        runner: &dyn HookRunner,
        hooks: &ModuleHooks,
    ) -> Result<ModuleOutcome, ModuleError> {
        if !self.has_chart().await? {
            tracing::debug!(chart = %self.chart_path().display(), "chart file not found, module skipped");
            return Ok(ModuleOutcome::Skipped);
        }

        self.cleanup(backend)
            .await
            .map_err(|source| ModuleError::Cleanup {
                module: self.name.clone(),
                source,
            })?;

        let env = backend.command_env();
        self.run_hooks(ctx, runner, hooks, BindingType::BeforeHelm, &env)
            .await?;
        self.upgrade(ctx, backend).await?;
        self.run_hooks(ctx, runner, hooks, BindingType::AfterHelm, &env)
            .await?;

        tracing::info!("module reconciled");
        Ok(ModuleOutcome::Reconciled)
    }

    /// Remove what failed earlier attempts left behind. Safe to repeat.
    ///
    /// A release whose only revision failed cannot be upgraded, so it is purged.
    /// Any other existing release is not touched.
    pub async fn cleanup(&self, backend: &dyn ReleaseBackend) -> Result<CleanupAction, ReleaseError> {
        let release = self.release_name();
        let status = match backend.status(release).await {
            Ok(status) => status,
            Err(e) if e.is_not_found() => {
                tracing::debug!(release, "no release yet, cleanup not needed");
                return Ok(CleanupAction::NoRelease);
            }
            Err(e) => return Err(e),
        };

        if status.revision == 1 && status.state == ReleaseState::Failed {
            tracing::info!(release, "first revision failed, purging release");
            backend.delete_release(release).await?;
            return Ok(CleanupAction::Purged);
        }

        tracing::debug!(release, revision = status.revision, state = %status.state, "release needs no cleanup");
        Ok(CleanupAction::Kept)
    }

    async fn run_hooks(
        &self,
        ctx: &mut RunContext,
        runner: &dyn HookRunner,
        hooks: &ModuleHooks,
        binding: BindingType,
        env: &[(String, String)],
    ) -> Result<(), ModuleError> {
        hooks::run_hooks(runner, hooks.in_order(binding), &self.path, ctx, env)
            .await
            .map_err(|source| ModuleError::Hook {
                module: self.name.clone(),
                source,
            })
    }

    async fn upgrade(
        &self,
        ctx: &RunContext,
        backend: &dyn ReleaseBackend,
    ) -> Result<(), ModuleError> {
        let values_path = ctx
            .values
            .materialize(&self.name, &ctx.values_path(&self.name))
            .await
            .map_err(|source| ModuleError::Values {
                module: self.name.clone(),
                source,
            })?;

        let values_paths = [values_path];
        backend
            .upgrade(UpgradeParams {
                release: self.release_name(),
                chart: &self.path,
                values_paths: &values_paths,
                set_values: &[],
                namespace: backend.tiller_namespace(),
            })
            .await
            .map_err(|source| ModuleError::Upgrade {
                module: self.name.clone(),
                source,
            })
    }
}
