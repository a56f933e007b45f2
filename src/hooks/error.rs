use std::path::PathBuf;

use crate::values::ValuesError;

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("hook '{hook}' of module '{module}' failed ({})\n{stdout}\n{stderr}", describe_exit(.code))]
    Failed {
        module: String,
        hook: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("cannot execute hook '{hook}' of module '{module}': {source}")]
    Spawn {
        module: String,
        hook: String,
        source: std::io::Error,
    },

    #[error("cannot discover hooks in {}: {source}", path.display())]
    Discovery {
        path: PathBuf,
        source: walkdir::Error,
    },

    #[error("hook '{hook}' of module '{module}': {source}")]
    Values {
        module: String,
        hook: String,
        source: ValuesError,
    },
}

#[allow(clippy::ref_option)]
fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_owned(),
    }
}
