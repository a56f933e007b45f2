//! Release backend: Helm 2 releases managed through Tiller.

pub mod cli;
pub mod error;
pub mod history;
pub mod storage;
pub mod tiller;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

pub use cli::HelmCli;
pub use error::ReleaseError;
pub use storage::{ConfigMapStorage, ReleaseStorage};

/// Revision reported for a release that does not exist.
pub const NO_REVISION: u32 = 0;

/// Environment variable pinning helm to our own Tiller.
pub const TILLER_NAMESPACE_ENV: &str = "TILLER_NAMESPACE";

// ---------------------------------------------------------------------------
// Observed release state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseState {
    Deployed,
    Failed,
    Superseded,
    Deleted,
    Deleting,
    PendingInstall,
    PendingUpgrade,
    PendingRollback,
    Unknown,
    Other(String),
}

impl ReleaseState {
    pub fn parse(s: &str) -> Self {
        match s {
            "DEPLOYED" => Self::Deployed,
            "FAILED" => Self::Failed,
            "SUPERSEDED" => Self::Superseded,
            "DELETED" => Self::Deleted,
            "DELETING" => Self::Deleting,
            "PENDING_INSTALL" => Self::PendingInstall,
            "PENDING_UPGRADE" => Self::PendingUpgrade,
            "PENDING_ROLLBACK" => Self::PendingRollback,
            "UNKNOWN" => Self::Unknown,
            other => Self::Other(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Deployed => "DEPLOYED",
            Self::Failed => "FAILED",
            Self::Superseded => "SUPERSEDED",
            Self::Deleted => "DELETED",
            Self::Deleting => "DELETING",
            Self::PendingInstall => "PENDING_INSTALL",
            Self::PendingUpgrade => "PENDING_UPGRADE",
            Self::PendingRollback => "PENDING_ROLLBACK",
            Self::Unknown => "UNKNOWN",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for ReleaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest history record of a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseStatus {
    pub revision: u32,
    pub state: ReleaseState,
}

/// Arguments of an install-or-upgrade.
#[derive(Debug, Clone, Copy)]
pub struct UpgradeParams<'a> {
    pub release: &'a str,
    pub chart: &'a Path,
    pub values_paths: &'a [PathBuf],
    pub set_values: &'a [String],
    pub namespace: &'a str,
}

// ---------------------------------------------------------------------------
// ReleaseBackend trait
// ---------------------------------------------------------------------------

/// Release lifecycle operations. `HelmCli` is the production implementation.
#[async_trait]
pub trait ReleaseBackend: Send + Sync {
    /// Namespace of the Tiller instance every call is pinned to.
    fn tiller_namespace(&self) -> &str;

    /// Environment passed to every external process that talks to helm.
    fn command_env(&self) -> Vec<(String, String)> {
        vec![(
            TILLER_NAMESPACE_ENV.to_owned(),
            self.tiller_namespace().to_owned(),
        )]
    }

    /// Latest revision and status. A missing release is `ReleaseError::NotFound`.
    async fn status(&self, release: &str) -> Result<ReleaseStatus, ReleaseError>;

    async fn upgrade(&self, params: UpgradeParams<'_>) -> Result<(), ReleaseError>;

    /// Values the release was last installed with. A missing release is
    /// `ReleaseError::NotFound`.
    async fn release_values(&self, release: &str) -> Result<Value, ReleaseError>;

    /// Delete a release together with all of its history.
    async fn delete_release(&self, release: &str) -> Result<(), ReleaseError>;

    /// Delete all FAILED history records but the newest. Returns deleted revisions.
    async fn delete_old_failed_revisions(&self, release: &str) -> Result<Vec<u32>, ReleaseError>;

    /// Sorted record names (`<release>.v<revision>`) matching `labels`.
    async fn list_releases(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<String>, ReleaseError>;

    /// Release names matching `labels`, without revision suffixes.
    async fn list_release_names(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> Result<BTreeSet<String>, ReleaseError>;

    async fn exists(&self, release: &str) -> Result<bool, ReleaseError> {
        match self.status(release).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}
