#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use module_orchestrator::cluster::{ClusterConfigSource, ClusterError, ClusterValues};
use module_orchestrator::exec::CommandOutput;
use module_orchestrator::hooks::HookRunner;
use module_orchestrator::release::{
    ReleaseBackend, ReleaseError, ReleaseState, ReleaseStatus, UpgradeParams,
};

// ---------------------------------------------------------------------------
// Journal shared by the test doubles
// ---------------------------------------------------------------------------

/// Something a test double was asked to do, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Status(String),
    DeleteRelease(String),
    PruneFailed(String),
    /// Release name and the values file contents at upgrade time.
    Upgrade(String, Value),
    /// File name of the executed hook or predicate.
    Exec(String),
}

#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<Event>>>);

impl Journal {
    pub fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    /// Events other than status probes, which are noise for ordering checks.
    pub fn actions(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| !matches!(e, Event::Status(_) | Event::PruneFailed(_)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Release backend double
// ---------------------------------------------------------------------------

#[derive(Default)]
struct BackendState {
    /// Release name to its history, oldest first.
    history: BTreeMap<String, Vec<(u32, ReleaseState)>>,
    /// Values of the last successful upgrade per release.
    values: BTreeMap<String, Value>,
    failing_upgrades: BTreeSet<String>,
}

/// In-memory release backend that mimics helm's history bookkeeping.
#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<BackendState>>,
    pub journal: Journal,
}

impl FakeBackend {
    pub fn new(journal: Journal) -> Self {
        Self {
            state: Arc::default(),
            journal,
        }
    }

    pub fn with_history(self, release: &str, history: &[(u32, ReleaseState)]) -> Self {
        self.state
            .lock()
            .unwrap()
            .history
            .insert(release.to_owned(), history.to_vec());
        self
    }

    pub fn failing_upgrade(self, release: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_upgrades
            .insert(release.to_owned());
        self
    }

    pub fn history(&self, release: &str) -> Option<Vec<(u32, ReleaseState)>> {
        self.state.lock().unwrap().history.get(release).cloned()
    }
}

#[async_trait]
impl ReleaseBackend for FakeBackend {
    fn tiller_namespace(&self) -> &str {
        "test-tiller"
    }

    async fn status(&self, release: &str) -> Result<ReleaseStatus, ReleaseError> {
        self.journal.push(Event::Status(release.to_owned()));
        let state = self.state.lock().unwrap();
        match state.history.get(release).and_then(|h| h.last()) {
            Some((revision, status)) => Ok(ReleaseStatus {
                revision: *revision,
                state: status.clone(),
            }),
            None => Err(ReleaseError::NotFound {
                release: release.to_owned(),
                stdout: String::new(),
                stderr: format!("Error: release: \"{release}\" not found"),
            }),
        }
    }

    async fn upgrade(&self, params: UpgradeParams<'_>) -> Result<(), ReleaseError> {
        let text = std::fs::read_to_string(&params.values_paths[0]).unwrap();
        let values: Value = serde_yaml::from_str(&text).unwrap();
        self.journal
            .push(Event::Upgrade(params.release.to_owned(), values.clone()));

        let mut state = self.state.lock().unwrap();
        let failed = state.failing_upgrades.contains(params.release);
        let history = state.history.entry(params.release.to_owned()).or_default();
        if let Some(last) = history.last_mut() {
            if last.1 == ReleaseState::Deployed && !failed {
                last.1 = ReleaseState::Superseded;
            }
        }
        let revision = history.last().map_or(1, |(r, _)| r + 1);
        if failed {
            history.push((revision, ReleaseState::Failed));
            return Err(ReleaseError::Invocation {
                command: "upgrade".into(),
                message: "helm upgrade failed (exit code 1)".into(),
                stdout: String::new(),
                stderr: "Error: UPGRADE FAILED".into(),
            });
        }
        history.push((revision, ReleaseState::Deployed));
        state.values.insert(params.release.to_owned(), values);
        Ok(())
    }

    async fn release_values(&self, release: &str) -> Result<Value, ReleaseError> {
        let state = self.state.lock().unwrap();
        if !state.history.contains_key(release) {
            return Err(ReleaseError::NotFound {
                release: release.to_owned(),
                stdout: String::new(),
                stderr: format!("Error: release: \"{release}\" not found"),
            });
        }
        Ok(state
            .values
            .get(release)
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default())))
    }

    async fn delete_release(&self, release: &str) -> Result<(), ReleaseError> {
        self.journal.push(Event::DeleteRelease(release.to_owned()));
        let mut state = self.state.lock().unwrap();
        state.history.remove(release);
        state.values.remove(release);
        Ok(())
    }

    async fn delete_old_failed_revisions(&self, release: &str) -> Result<Vec<u32>, ReleaseError> {
        self.journal.push(Event::PruneFailed(release.to_owned()));
        let mut state = self.state.lock().unwrap();
        let Some(history) = state.history.get_mut(release) else {
            return Ok(Vec::new());
        };
        let mut failed: Vec<u32> = history
            .iter()
            .filter(|(_, s)| *s == ReleaseState::Failed)
            .map(|(r, _)| *r)
            .collect();
        failed.sort_unstable();
        failed.pop();
        history.retain(|(r, _)| !failed.contains(r));
        Ok(failed)
    }

    async fn list_releases(
        &self,
        _labels: &BTreeMap<String, String>,
    ) -> Result<Vec<String>, ReleaseError> {
        let state = self.state.lock().unwrap();
        let mut names: Vec<String> = state
            .history
            .iter()
            .flat_map(|(name, h)| h.iter().map(move |(r, _)| format!("{name}.v{r}")))
            .collect();
        names.sort();
        Ok(names)
    }

    async fn list_release_names(
        &self,
        _labels: &BTreeMap<String, String>,
    ) -> Result<BTreeSet<String>, ReleaseError> {
        Ok(self.state.lock().unwrap().history.keys().cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// Hook runner double
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Script {
    /// Write `contents` to the file named by env var `var`.
    Write { var: &'static str, contents: String },
    Fail { code: i32, stderr: &'static str },
}

/// Records executions in the journal and plays back scripts by file name.
#[derive(Clone, Default)]
pub struct FakeRunner {
    scripts: BTreeMap<String, Vec<Script>>,
    pub journal: Journal,
}

impl FakeRunner {
    pub fn new(journal: Journal) -> Self {
        Self {
            scripts: BTreeMap::new(),
            journal,
        }
    }

    pub fn script(mut self, file_name: &str, script: Script) -> Self {
        self.scripts
            .entry(file_name.to_owned())
            .or_default()
            .push(script);
        self
    }
}

#[async_trait]
impl HookRunner for FakeRunner {
    async fn run(
        &self,
        executable: &Path,
        _dir: &Path,
        env: &[(String, String)],
    ) -> io::Result<CommandOutput> {
        let name = executable
            .file_name()
            .unwrap()
            .to_string_lossy()
            .into_owned();
        self.journal.push(Event::Exec(name.clone()));

        for script in self.scripts.get(&name).into_iter().flatten() {
            match script {
                Script::Write { var, contents } => {
                    let path = env
                        .iter()
                        .find(|(k, _)| k == var)
                        .map(|(_, v)| PathBuf::from(v))
                        .unwrap();
                    std::fs::write(path, contents).unwrap();
                }
                Script::Fail { code, stderr } => {
                    return Ok(CommandOutput::failed(*code, *stderr));
                }
            }
        }
        Ok(CommandOutput::ok(""))
    }
}

// ---------------------------------------------------------------------------
// Cluster config double
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct StaticCluster(pub ClusterValues);

#[async_trait]
impl ClusterConfigSource for StaticCluster {
    async fn load(&self) -> Result<ClusterValues, ClusterError> {
        Ok(self.0.clone())
    }
}

// ---------------------------------------------------------------------------
// Module trees on disk
// ---------------------------------------------------------------------------

/// A `modules` directory inside a temp dir.
pub struct ModulesTree {
    pub root: tempfile::TempDir,
}

impl ModulesTree {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("modules")).unwrap();
        Self { root }
    }

    pub fn modules_dir(&self) -> PathBuf {
        self.root.path().join("modules")
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.path().join("tmp")
    }

    /// Create a module directory, optionally with a chart.
    pub fn module(&self, dir: &str, chart: bool) -> PathBuf {
        let path = self.modules_dir().join(dir);
        std::fs::create_dir_all(&path).unwrap();
        if chart {
            std::fs::write(path.join("Chart.yaml"), "name: test\nversion: 0.1.0\n").unwrap();
        }
        path
    }

    pub fn file(&self, relative: &str, contents: &str) {
        let path = self.modules_dir().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    /// Create an executable file under the modules directory.
    pub fn executable(&self, relative: &str) {
        self.file(relative, "#!/bin/sh\nexit 0\n");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let path = self.modules_dir().join(relative);
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
    }
}
