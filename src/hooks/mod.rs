//! Module lifecycle hooks: discovery and execution around the Helm release.

pub mod error;
pub mod runner;

use std::fmt;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

pub use error::HookError;
pub use runner::{HookRunner, ProcessRunner, run_hooks};

/// Directory inside a module that holds its hooks.
pub const HOOKS_DIR: &str = "hooks";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// When a hook runs relative to the Helm release operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BindingType {
    BeforeHelm,
    AfterHelm,
}

impl BindingType {
    pub const ALL: [Self; 2] = [Self::BeforeHelm, Self::AfterHelm];

    /// Subdirectory of `hooks/` holding hooks of this binding type.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::BeforeHelm => "before-helm",
            Self::AfterHelm => "after-helm",
        }
    }
}

impl fmt::Display for BindingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BeforeHelm => f.write_str("BeforeHelm"),
            Self::AfterHelm => f.write_str("AfterHelm"),
        }
    }
}

/// An executable bound to one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hook {
    pub module: String,
    /// Path relative to the module's `hooks/` directory, e.g. `before-helm/010-prepare`.
    pub name: String,
    pub path: PathBuf,
    pub binding: BindingType,
}

/// A module's hooks, each binding type in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleHooks {
    before_helm: Vec<Hook>,
    after_helm: Vec<Hook>,
}

impl ModuleHooks {
    pub fn in_order(&self, binding: BindingType) -> &[Hook] {
        match binding {
            BindingType::BeforeHelm => &self.before_helm,
            BindingType::AfterHelm => &self.after_helm,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.before_helm.is_empty() && self.after_helm.is_empty()
    }

    pub fn len(&self) -> usize {
        self.before_helm.len() + self.after_helm.len()
    }
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Find the hooks of a module under `<module_path>/hooks/{before-helm,after-helm}`.
///
/// Every executable regular file (searched recursively) is a hook. Order
/// within a binding type is a depth-first walk that sorts by file name at each
/// directory level, compared byte-wise, so `a/02` runs before `a.sh`.
/// Non-executable files are skipped with a warning.
pub fn discover(module: &str, module_path: &Path) -> Result<ModuleHooks, HookError> {
    let hooks_dir = module_path.join(HOOKS_DIR);
    let mut hooks = ModuleHooks::default();

    for binding in BindingType::ALL {
        let binding_dir = hooks_dir.join(binding.dir_name());
        if !binding_dir.is_dir() {
            continue;
        }

        let found = match binding {
            BindingType::BeforeHelm => &mut hooks.before_helm,
            BindingType::AfterHelm => &mut hooks.after_helm,
        };

        for entry in WalkDir::new(&binding_dir)
            .min_depth(1)
            .follow_links(true)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|source| HookError::Discovery {
                path: binding_dir.clone(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            if !is_executable(&entry) {
                tracing::warn!(path = %path.display(), "ignoring non-executable hook file");
                continue;
            }

            let name = path
                .strip_prefix(&hooks_dir)
                .unwrap_or(path)
                .to_string_lossy()
                .into_owned();
            found.push(Hook {
                module: module.to_owned(),
                name,
                path: path.to_path_buf(),
                binding,
            });
        }
    }

    tracing::debug!(module, hooks = hooks.len(), "module hooks discovered");
    Ok(hooks)
}

#[cfg(unix)]
fn is_executable(entry: &walkdir::DirEntry) -> bool {
    use std::os::unix::fs::PermissionsExt;

    entry
        .metadata()
        .is_ok_and(|m| m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(_entry: &walkdir::DirEntry) -> bool {
    true
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    fn write_hook(path: &Path, mode: u32) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).unwrap();
    }

    fn names(hooks: &[Hook]) -> Vec<&str> {
        hooks.iter().map(|h| h.name.as_str()).collect()
    }

    #[test]
    fn no_hooks_dir_means_no_hooks() {
        let dir = tempfile::tempdir().unwrap();
        let hooks = discover("app", dir.path()).unwrap();
        assert!(hooks.is_empty());
    }

    #[test]
    fn classifies_by_directory_and_sorts_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("hooks");
        write_hook(&root.join("before-helm/020-second"), 0o755);
        write_hook(&root.join("before-helm/010-first"), 0o755);
        write_hook(&root.join("before-helm/B-upper"), 0o755);
        write_hook(&root.join("after-helm/notify"), 0o700);

        let hooks = discover("app", dir.path()).unwrap();
        assert_eq!(
            names(hooks.in_order(BindingType::BeforeHelm)),
            vec!["before-helm/010-first", "before-helm/020-second", "before-helm/B-upper"]
        );
        assert_eq!(
            names(hooks.in_order(BindingType::AfterHelm)),
            vec!["after-helm/notify"]
        );
        assert!(
            hooks
                .in_order(BindingType::AfterHelm)
                .iter()
                .all(|h| h.binding == BindingType::AfterHelm && h.module == "app")
        );
    }

    #[test]
    fn skips_non_executable_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("hooks");
        write_hook(&root.join("before-helm/run"), 0o755);
        write_hook(&root.join("before-helm/README"), 0o644);

        let hooks = discover("app", dir.path()).unwrap();
        assert_eq!(names(hooks.in_order(BindingType::BeforeHelm)), vec!["before-helm/run"]);
    }

    #[test]
    fn searches_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("hooks");
        write_hook(&root.join("after-helm/b/01"), 0o755);
        write_hook(&root.join("after-helm/a/02"), 0o755);
        write_hook(&root.join("after-helm/c"), 0o755);

        let hooks = discover("app", dir.path()).unwrap();
        assert_eq!(
            names(hooks.in_order(BindingType::AfterHelm)),
            vec!["after-helm/a/02", "after-helm/b/01", "after-helm/c"]
        );
    }

    #[test]
    fn directory_contents_run_before_later_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("hooks");
        write_hook(&root.join("before-helm/a.sh"), 0o755);
        write_hook(&root.join("before-helm/a/02"), 0o755);

        let hooks = discover("app", dir.path()).unwrap();
        assert_eq!(
            names(hooks.in_order(BindingType::BeforeHelm)),
            vec!["before-helm/a/02", "before-helm/a.sh"]
        );
    }

    #[test]
    fn files_directly_in_hooks_dir_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write_hook(&dir.path().join("hooks/stray"), 0o755);
        let hooks = discover("app", dir.path()).unwrap();
        assert!(hooks.is_empty());
    }
}
