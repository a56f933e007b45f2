use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::Api;
use kube::api::{DeleteParams, ListParams};

use super::error::ReleaseError;
use super::history;

/// Label Tiller puts on every release record it owns.
pub const OWNER_LABEL: &str = "OWNER";
pub const OWNER_VALUE: &str = "TILLER";

/// Data key holding the encoded release inside a record.
const RELEASE_KEY: &str = "release";

/// Read/delete access to Tiller's release history records.
#[async_trait]
pub trait ReleaseStorage: Send + Sync {
    /// Names of records carrying a release payload and matching every label.
    async fn list_records(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<String>, ReleaseError>;

    async fn delete_record(&self, name: &str) -> Result<(), ReleaseError>;
}

/// Release records stored as config maps in Tiller's namespace.
#[derive(Clone)]
pub struct ConfigMapStorage {
    api: Api<ConfigMap>,
}

impl ConfigMapStorage {
    pub fn new(client: kube::Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl ReleaseStorage for ConfigMapStorage {
    async fn list_records(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<String>, ReleaseError> {
        let params = ListParams::default().labels(&label_selector(labels));
        let list = self.api.list(&params).await.inspect_err(|e| {
            tracing::debug!(error = %e, "listing release config maps failed");
        })?;

        Ok(list
            .items
            .into_iter()
            .filter(|cm| cm.data.as_ref().is_some_and(|d| d.contains_key(RELEASE_KEY)))
            .filter_map(|cm| cm.metadata.name)
            .collect())
    }

    async fn delete_record(&self, name: &str) -> Result<(), ReleaseError> {
        self.api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }
}

/// Render labels as a Kubernetes equality selector (`a=1,b=2`).
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// All release records matching `labels`, restricted to Tiller-owned records,
/// sorted by name.
pub async fn list_releases<S>(
    storage: &S,
    labels: &BTreeMap<String, String>,
) -> Result<Vec<String>, ReleaseError>
where
    S: ReleaseStorage + ?Sized,
{
    let mut labels = labels.clone();
    labels.insert(OWNER_LABEL.to_owned(), OWNER_VALUE.to_owned());

    let mut records = storage.list_records(&labels).await?;
    records.sort();
    Ok(records)
}

/// Release names (record names without the `.v<revision>` suffix).
pub async fn list_release_names<S>(
    storage: &S,
    labels: &BTreeMap<String, String>,
) -> Result<BTreeSet<String>, ReleaseError>
where
    S: ReleaseStorage + ?Sized,
{
    let records = list_releases(storage, labels).await?;
    Ok(records
        .iter()
        .filter_map(|name| history::parse_record_name(name))
        .map(|(release, _)| release.to_owned())
        .collect())
}

/// Delete every FAILED record of `release` except the newest one.
/// Returns the deleted revisions in ascending order.
#[tracing::instrument(skip(storage), err)]
pub async fn delete_old_failed_revisions<S>(
    storage: &S,
    release: &str,
) -> Result<Vec<u32>, ReleaseError>
where
    S: ReleaseStorage + ?Sized,
{
    let labels = BTreeMap::from([
        ("NAME".to_owned(), release.to_owned()),
        ("STATUS".to_owned(), "FAILED".to_owned()),
    ]);
    let records = list_releases(storage, &labels).await?;
    tracing::debug!(?records, "found failed release records");

    let mut revisions: Vec<u32> = records
        .iter()
        .filter_map(|name| history::parse_record_name(name))
        .filter(|(name, _)| *name == release)
        .map(|(_, revision)| revision)
        .collect();
    revisions.sort_unstable();
    revisions.dedup();

    // Keep the newest failed revision for inspection.
    revisions.pop();

    for revision in &revisions {
        let record = format!("{release}.v{revision}");
        tracing::info!(%record, "deleting old FAILED release record");
        storage.delete_record(&record).await?;
    }

    Ok(revisions)
}
