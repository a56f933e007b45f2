use std::path::PathBuf;

use crate::hooks::HookError;
use crate::release::ReleaseError;
use crate::values::ValuesError;

/// Failure of one module's run, tagged with the stage that failed.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("module '{module}': cannot check chart {}: {source}", path.display())]
    Chart {
        module: String,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("module '{module}': cleanup failed: {source}")]
    Cleanup {
        module: String,
        source: ReleaseError,
    },

    #[error("module '{module}': {source}")]
    Hook {
        module: String,
        source: HookError,
    },

    #[error("module '{module}': cannot prepare values: {source}")]
    Values {
        module: String,
        source: ValuesError,
    },

    #[error("module '{module}': helm upgrade failed: {source}")]
    Upgrade {
        module: String,
        source: ReleaseError,
    },
}

impl ModuleError {
    pub fn module(&self) -> &str {
        match self {
            Self::Chart { module, .. }
            | Self::Cleanup { module, .. }
            | Self::Hook { module, .. }
            | Self::Values { module, .. }
            | Self::Upgrade { module, .. } => module,
        }
    }
}
