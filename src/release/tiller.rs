use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PodSpec, Toleration};
use kube::Api;

use super::error::ReleaseError;

/// Settings Tiller inherits from the orchestrator's own Deployment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TillerPlacement {
    pub node_selector: BTreeMap<String, String>,
    pub tolerations: Vec<Toleration>,
}

impl TillerPlacement {
    pub fn from_pod_spec(spec: &PodSpec) -> Self {
        Self {
            node_selector: spec.node_selector.clone().unwrap_or_default(),
            tolerations: spec.tolerations.clone().unwrap_or_default(),
        }
    }
}

/// Read node selectors and tolerations of our own Deployment so that Tiller
/// lands on the same nodes.
#[tracing::instrument(skip(client), err)]
pub async fn fetch_placement(
    client: &kube::Client,
    namespace: &str,
    deployment: &str,
) -> Result<TillerPlacement, ReleaseError> {
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let deploy = deployments
        .get(deployment)
        .await
        .map_err(|source| ReleaseError::Deployment {
            namespace: namespace.to_owned(),
            name: deployment.to_owned(),
            source,
        })?;

    Ok(deploy
        .spec
        .and_then(|spec| spec.template.spec)
        .map(|pod| TillerPlacement::from_pod_spec(&pod))
        .unwrap_or_default())
}

/// Arguments of `helm init` for our Tiller.
pub fn init_args(service_account: &str, placement: &TillerPlacement) -> Vec<String> {
    let mut args: Vec<String> = [
        "init",
        "--service-account",
        service_account,
        "--upgrade",
        "--wait",
        "--skip-refresh",
    ]
    .iter()
    .map(|s| (*s).to_owned())
    .collect();

    if !placement.node_selector.is_empty() {
        let selectors: Vec<String> = placement
            .node_selector
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        args.push(format!("--node-selectors={}", selectors.join(",")));
    }

    let overrides = toleration_overrides(&placement.tolerations);
    if !overrides.is_empty() {
        args.push(format!("--override={}", overrides.join(",")));
    }

    args
}

fn toleration_overrides(tolerations: &[Toleration]) -> Vec<String> {
    let mut overrides = Vec::new();
    for (i, t) in tolerations.iter().enumerate() {
        let prefix = format!("spec.template.spec.tolerations[{i}]");
        let field = |v: &Option<String>| v.clone().unwrap_or_default();
        overrides.push(format!("{prefix}.key={}", field(&t.key)));
        overrides.push(format!("{prefix}.operator={}", field(&t.operator)));
        overrides.push(format!("{prefix}.value={}", field(&t.value)));
        overrides.push(format!("{prefix}.effect={}", field(&t.effect)));
        if let Some(seconds) = t.toleration_seconds {
            overrides.push(format!("{prefix}.tolerationSeconds={seconds}"));
        }
    }
    overrides
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_args_without_placement() {
        let args = init_args("orchestrator", &TillerPlacement::default());
        assert_eq!(
            args,
            vec![
                "init",
                "--service-account",
                "orchestrator",
                "--upgrade",
                "--wait",
                "--skip-refresh"
            ]
        );
    }

    #[test]
    fn init_args_with_node_selectors() {
        let placement = TillerPlacement {
            node_selector: BTreeMap::from([
                ("node-role".to_owned(), "system".to_owned()),
                ("disk".to_owned(), "ssd".to_owned()),
            ]),
            tolerations: vec![],
        };
        let args = init_args("sa", &placement);
        assert_eq!(
            args.last().unwrap(),
            "--node-selectors=disk=ssd,node-role=system"
        );
    }

    #[test]
    fn init_args_with_tolerations() {
        let placement = TillerPlacement {
            node_selector: BTreeMap::new(),
            tolerations: vec![
                Toleration {
                    key: Some("dedicated".into()),
                    operator: Some("Equal".into()),
                    value: Some("system".into()),
                    effect: Some("NoSchedule".into()),
                    toleration_seconds: None,
                },
                Toleration {
                    key: Some("node.kubernetes.io/unreachable".into()),
                    operator: Some("Exists".into()),
                    value: None,
                    effect: Some("NoExecute".into()),
                    toleration_seconds: Some(300),
                },
            ],
        };
        let args = init_args("sa", &placement);
        let overrides = args.last().unwrap();
        assert_eq!(
            overrides,
            "--override=\
             spec.template.spec.tolerations[0].key=dedicated,\
             spec.template.spec.tolerations[0].operator=Equal,\
             spec.template.spec.tolerations[0].value=system,\
             spec.template.spec.tolerations[0].effect=NoSchedule,\
             spec.template.spec.tolerations[1].key=node.kubernetes.io/unreachable,\
             spec.template.spec.tolerations[1].operator=Exists,\
             spec.template.spec.tolerations[1].value=,\
             spec.template.spec.tolerations[1].effect=NoExecute,\
             spec.template.spec.tolerations[1].tolerationSeconds=300"
        );
    }

    #[test]
    fn placement_from_pod_spec_defaults_to_empty() {
        let placement = TillerPlacement::from_pod_spec(&PodSpec::default());
        assert_eq!(placement, TillerPlacement::default());
    }
}
