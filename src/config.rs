use std::env;
use std::path::PathBuf;

const DEFAULT_NAME: &str = "module-orchestrator";

#[derive(Debug, Clone)]
pub struct Config {
    /// Root holding the `modules` directory.
    pub working_dir: PathBuf,
    /// Values, predicate inputs and hook results are written here.
    pub temp_dir: PathBuf,
    pub tiller_namespace: String,
    /// Namespace the orchestrator itself runs in.
    pub namespace: String,
    pub deployment: String,
    pub service_account: String,
    pub config_map: String,
    pub helm_bin: PathBuf,
}

impl Config {
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let named = |key: &str| var(key).unwrap_or_else(|| DEFAULT_NAME.into());
        Self {
            working_dir: var("ORCHESTRATOR_WORKING_DIR").map_or_else(|| PathBuf::from("."), PathBuf::from),
            temp_dir: var("ORCHESTRATOR_TEMP_DIR")
                .map_or_else(|| env::temp_dir().join(DEFAULT_NAME), PathBuf::from),
            tiller_namespace: named("TILLER_NAMESPACE"),
            namespace: named("ORCHESTRATOR_NAMESPACE"),
            deployment: named("ORCHESTRATOR_DEPLOYMENT"),
            service_account: named("ORCHESTRATOR_SERVICE_ACCOUNT"),
            config_map: named("ORCHESTRATOR_CONFIG_MAP"),
            helm_bin: var("HELM_BIN").map_or_else(|| PathBuf::from("/usr/local/bin/helm"), PathBuf::from),
        }
    }

    pub fn modules_dir(&self) -> PathBuf {
        self.working_dir.join("modules")
    }
}
