use crate::values::ValuesError;

use super::NO_REVISION;

#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    /// The release has no history. Expected for modules that were never
    /// installed; callers treat it as "nothing to clean up".
    #[error("release '{release}' not found\n{stdout}\n{stderr}")]
    NotFound {
        release: String,
        stdout: String,
        stderr: String,
    },

    #[error("helm {command} failed: {message}\n{stdout}\n{stderr}")]
    Invocation {
        command: String,
        message: String,
        stdout: String,
        stderr: String,
    },

    #[error("cannot parse helm {command} output: {message}\n{output}")]
    Parse {
        command: String,
        message: String,
        output: String,
    },

    #[error("cannot execute helm {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("release storage error: {0}")]
    Storage(#[from] kube::Error),

    #[error("cannot read deployment {namespace}/{name} for tiller placement: {source}")]
    Deployment {
        namespace: String,
        name: String,
        source: kube::Error,
    },

    #[error(transparent)]
    Values(#[from] ValuesError),
}

impl ReleaseError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Revision observed alongside the error: the `0` sentinel for a missing
    /// release, nothing otherwise.
    pub fn revision(&self) -> Option<u32> {
        self.is_not_found().then_some(NO_REVISION)
    }
}
