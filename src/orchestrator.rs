//! The orchestration run: cluster layers, enablement, then every module in order.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::cluster::{ClusterConfigSource, ClusterError, ClusterValues};
use crate::context::RunContext;
use crate::hooks::{HookRunner, ModuleHooks};
use crate::module::{ModuleError, ModuleOutcome};
use crate::registry::{ModuleRegistry, RegistryError};
use crate::release::ReleaseBackend;
use crate::values::{LayerKind, Scope, ValuesError};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("cannot install cluster values: {0}")]
    Values(#[from] ValuesError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Module(#[from] ModuleError),
}

/// Result of one pass over all modules.
#[derive(Debug, Default)]
pub struct RunReport {
    pub reconciled: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, OrchestratorError)>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_modules(&self) -> Vec<&str> {
        self.failed.iter().map(|(name, _)| name.as_str()).collect()
    }
}

/// Drives every discovered module through its lifecycle, sequentially.
pub struct Orchestrator {
    registry: ModuleRegistry,
    ctx: RunContext,
    backend: Box<dyn ReleaseBackend>,
    runner: Box<dyn HookRunner>,
    cluster: Box<dyn ClusterConfigSource>,
}

impl Orchestrator {
    pub fn new(
        registry: ModuleRegistry,
        ctx: RunContext,
        backend: Box<dyn ReleaseBackend>,
        runner: Box<dyn HookRunner>,
        cluster: Box<dyn ClusterConfigSource>,
    ) -> Self {
        Self {
            registry,
            ctx,
            backend,
            runner,
            cluster,
        }
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// One full pass. Only a failure to read cluster values aborts the pass;
    /// a failing module is recorded and its successors still run.
    #[tracing::instrument(skip(self), err)]
    pub async fn run_once(&mut self) -> Result<RunReport, OrchestratorError> {
        let cluster = self.cluster.load().await?;
        self.install_cluster_values(cluster)?;

        let env = self.backend.command_env();
        let no_hooks = ModuleHooks::default();
        let mut report = RunReport::default();
        let mut enabled: Vec<String> = Vec::new();

        for module in self.registry.modules() {
            let name = module.name.clone();

            match self
                .registry
                .is_enabled(module, &enabled, &self.ctx, self.runner.as_ref(), &env)
                .await
            {
                Ok(true) => enabled.push(name.clone()),
                // Reserved; `is_enabled` reports a failing predicate as an error.
                Ok(false) => {
                    tracing::info!(module = %name, "module disabled");
                    continue;
                }
                Err(e) => {
                    tracing::error!(module = %name, error = %e, "enablement check failed");
                    report.failed.push((name, e.into()));
                    continue;
                }
            }

            let hooks = self.registry.hooks(&name).unwrap_or(&no_hooks);
            match module
                .run(&mut self.ctx, self.backend.as_ref(), self.runner.as_ref(), hooks)
                .await
            {
                Ok(ModuleOutcome::Reconciled) => report.reconciled.push(name),
                Ok(ModuleOutcome::Skipped) => report.skipped.push(name),
                Err(e) => {
                    tracing::error!(module = %name, error = %e, "module run failed");
                    report.failed.push((name, e.into()));
                }
            }
        }

        self.warn_orphan_releases().await;

        tracing::info!(
            reconciled = report.reconciled.len(),
            skipped = report.skipped.len(),
            failed = ?report.failed_modules(),
            "orchestration run finished"
        );
        Ok(report)
    }

    /// Run immediately, then every `interval` until `shutdown` fires.
    pub async fn run(
        mut self,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<()>,
    ) {
        tracing::info!(interval_secs = interval.as_secs(), "orchestrator started");

        loop {
            if let Err(e) = self.run_once().await {
                tracing::error!(error = %e, "orchestration run aborted");
            }

            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("orchestrator shutting down");
                    break;
                }
                () = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// Replace both cluster layers with what the cluster currently holds.
    fn install_cluster_values(&mut self, cluster: ClusterValues) -> Result<(), ValuesError> {
        let store = &mut self.ctx.values;
        store.clear_layer_kind(LayerKind::ClusterGlobal);
        store.clear_layer_kind(LayerKind::ClusterModule);

        store.set_layer(Scope::Global, LayerKind::ClusterGlobal, cluster.global)?;
        for (module, tree) in cluster.modules {
            if self.registry.get(&module).is_none() {
                tracing::warn!(module = %module, "cluster values for unknown module ignored");
                continue;
            }
            store.set_layer(Scope::Module(&module), LayerKind::ClusterModule, tree)?;
        }
        Ok(())
    }

    /// Releases owned by our Tiller without a matching module are reported, never deleted.
    async fn warn_orphan_releases(&self) {
        let releases = match self.backend.list_release_names(&Default::default()).await {
            Ok(releases) => releases,
            Err(e) => {
                tracing::warn!(error = %e, "cannot list releases");
                return;
            }
        };
        let known: BTreeSet<&str> = self
            .registry
            .modules()
            .iter()
            .map(|m| m.release_name())
            .collect();
        for release in releases.iter().filter(|r| !known.contains(r.as_str())) {
            tracing::warn!(release = %release, "release has no matching module");
        }
    }
}
