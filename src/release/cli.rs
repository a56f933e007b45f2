use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;

use crate::exec::{self, CommandOutput};
use crate::values;

use super::error::ReleaseError;
use super::storage::{self, ReleaseStorage};
use super::tiller::{self, TillerPlacement};
use super::{ReleaseBackend, ReleaseStatus, TILLER_NAMESPACE_ENV, UpgradeParams, history};

/// Release backend driving the `helm` binary against a private Tiller.
pub struct HelmCli<S> {
    bin: PathBuf,
    tiller_namespace: String,
    storage: S,
}

impl<S: ReleaseStorage> HelmCli<S> {
    pub fn new(bin: impl Into<PathBuf>, tiller_namespace: impl Into<String>, storage: S) -> Self {
        Self {
            bin: bin.into(),
            tiller_namespace: tiller_namespace.into(),
            storage,
        }
    }

    /// Install or upgrade Tiller, then probe `helm version`.
    #[tracing::instrument(skip(self, placement), fields(tiller_namespace = %self.tiller_namespace), err)]
    pub async fn init(
        &self,
        service_account: &str,
        placement: &TillerPlacement,
    ) -> Result<(), ReleaseError> {
        tracing::info!("running helm init");
        let args = tiller::init_args(service_account, placement);
        let out = self.cmd(&args).await?;
        if !out.success {
            return Err(invocation_error("init", "tiller initialization failed", out));
        }
        tracing::info!(stdout = %out.stdout, stderr = %out.stderr, "tiller initialization done");

        let version = self.version().await?;
        tracing::info!(%version, "helm successfully initialized");
        Ok(())
    }

    /// `helm version` output; used as a health probe.
    pub async fn version(&self) -> Result<String, ReleaseError> {
        let out = self.cmd(&["version"]).await?;
        if !out.success {
            return Err(invocation_error("version", "unable to get helm version", out));
        }
        Ok(format!("{} {}", out.stdout, out.stderr).trim().to_owned())
    }

    async fn cmd<A: AsRef<str>>(&self, args: &[A]) -> Result<CommandOutput, ReleaseError> {
        let args: Vec<&str> = args.iter().map(|a| a.as_ref()).collect();
        let command = args.first().copied().unwrap_or_default().to_owned();
        let env = [(
            TILLER_NAMESPACE_ENV.to_owned(),
            self.tiller_namespace.clone(),
        )];
        exec::run(&self.bin, &args, &env, None)
            .await
            .map_err(|source| ReleaseError::Spawn { command, source })
    }
}

/// Arguments of `helm upgrade --install`.
pub fn upgrade_args(params: &UpgradeParams<'_>) -> Vec<String> {
    let mut args = vec![
        "upgrade".to_owned(),
        "--install".to_owned(),
        params.release.to_owned(),
        params.chart.display().to_string(),
    ];

    if !params.namespace.is_empty() {
        args.push("--namespace".to_owned());
        args.push(params.namespace.to_owned());
    }
    for path in params.values_paths {
        args.push("--values".to_owned());
        args.push(path.display().to_string());
    }
    for set in params.set_values {
        args.push("--set".to_owned());
        args.push(set.clone());
    }
    args
}

fn invocation_error(command: &str, message: &str, out: CommandOutput) -> ReleaseError {
    let message = match out.code {
        Some(code) => format!("{message} (exit code {code})"),
        None => format!("{message} (terminated by signal)"),
    };
    ReleaseError::Invocation {
        command: command.to_owned(),
        message,
        stdout: out.stdout,
        stderr: out.stderr,
    }
}

#[async_trait]
impl<S: ReleaseStorage> ReleaseBackend for HelmCli<S> {
    fn tiller_namespace(&self) -> &str {
        &self.tiller_namespace
    }

    #[tracing::instrument(skip(self), err)]
    async fn status(&self, release: &str) -> Result<ReleaseStatus, ReleaseError> {
        let out = self.cmd(&["history", release, "--max", "1"]).await?;

        if !out.success {
            if history::is_not_found(&out.stderr) {
                return Err(ReleaseError::NotFound {
                    release: release.to_owned(),
                    stdout: out.stdout,
                    stderr: out.stderr,
                });
            }
            return Err(invocation_error(
                "history",
                &format!("cannot get history for release '{release}'"),
                out,
            ));
        }

        history::parse_history(&out.stdout).map_err(|message| ReleaseError::Parse {
            command: "history".into(),
            message,
            output: out.stdout,
        })
    }

    #[tracing::instrument(skip(self, params), fields(release = %params.release, namespace = %params.namespace), err)]
    async fn upgrade(&self, params: UpgradeParams<'_>) -> Result<(), ReleaseError> {
        tracing::info!(chart = %params.chart.display(), "running helm upgrade");
        let out = self.cmd(&upgrade_args(&params)).await?;
        if !out.success {
            tracing::error!(stdout = %out.stdout, stderr = %out.stderr, "helm upgrade failed");
            return Err(invocation_error("upgrade", "helm upgrade failed", out));
        }
        tracing::info!(stdout = %out.stdout, stderr = %out.stderr, "helm upgrade successful");
        Ok(())
    }

    #[tracing::instrument(skip(self), err)]
    async fn release_values(&self, release: &str) -> Result<Value, ReleaseError> {
        let out = self.cmd(&["get", "values", release]).await?;
        if !out.success {
            if history::is_not_found(&out.stderr) {
                return Err(ReleaseError::NotFound {
                    release: release.to_owned(),
                    stdout: out.stdout,
                    stderr: out.stderr,
                });
            }
            return Err(invocation_error(
                "get",
                &format!("cannot get values of release '{release}'"),
                out,
            ));
        }
        Ok(values::parse_values(
            &out.stdout,
            &format!("helm get values {release}"),
        )?)
    }

    #[tracing::instrument(skip(self), err)]
    async fn delete_release(&self, release: &str) -> Result<(), ReleaseError> {
        tracing::debug!("running helm delete --purge");
        let out = self.cmd(&["delete", "--purge", release]).await?;
        if !out.success {
            return Err(invocation_error(
                "delete",
                &format!("helm delete --purge {release} invocation error"),
                out,
            ));
        }
        Ok(())
    }

    async fn delete_old_failed_revisions(&self, release: &str) -> Result<Vec<u32>, ReleaseError> {
        storage::delete_old_failed_revisions(&self.storage, release).await
    }

    async fn list_releases(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<String>, ReleaseError> {
        storage::list_releases(&self.storage, labels).await
    }

    async fn list_release_names(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> Result<BTreeSet<String>, ReleaseError> {
        storage::list_release_names(&self.storage, labels).await
    }
}
