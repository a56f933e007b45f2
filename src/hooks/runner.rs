use std::io;
use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::RunContext;
use crate::exec::{self, CommandOutput};
use crate::values::{self, Scope};

use super::{Hook, HookError};

/// Materialized effective values of the module.
pub const VALUES_PATH_ENV: &str = "VALUES_PATH";
/// File a hook may write to extend its module's dynamic values.
pub const MODULE_DYNAMIC_VALUES_PATH_ENV: &str = "MODULE_DYNAMIC_VALUES_PATH";
/// File a hook may write to extend the global dynamic values.
pub const GLOBAL_DYNAMIC_VALUES_PATH_ENV: &str = "GLOBAL_DYNAMIC_VALUES_PATH";

/// Executes hook and predicate files.
#[async_trait]
pub trait HookRunner: Send + Sync {
    async fn run(
        &self,
        executable: &Path,
        dir: &Path,
        env: &[(String, String)],
    ) -> io::Result<CommandOutput>;
}

/// Runs hooks as child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl HookRunner for ProcessRunner {
    async fn run(
        &self,
        executable: &Path,
        dir: &Path,
        env: &[(String, String)],
    ) -> io::Result<CommandOutput> {
        exec::run::<&str>(executable, &[], env, Some(dir)).await
    }
}

/// Run `hooks` one after another in `workdir`, stopping at the first failure.
///
/// Each hook gets freshly composed values, so it sees whatever earlier hooks
/// produced. Mappings a successful hook writes to its dynamic values files are
/// merged into the module and global dynamic layers.
pub async fn run_hooks(
    runner: &dyn HookRunner,
    hooks: &[Hook],
    workdir: &Path,
    ctx: &mut RunContext,
    base_env: &[(String, String)],
) -> Result<(), HookError> {
    for hook in hooks {
        run_hook(runner, hook, workdir, ctx, base_env).await?;
    }
    Ok(())
}

#[tracing::instrument(skip_all, fields(module = %hook.module, hook = %hook.name, binding = %hook.binding), err)]
async fn run_hook(
    runner: &dyn HookRunner,
    hook: &Hook,
    workdir: &Path,
    ctx: &mut RunContext,
    base_env: &[(String, String)],
) -> Result<(), HookError> {
    let module = hook.module.as_str();
    let values_err = |source| HookError::Values {
        module: hook.module.clone(),
        hook: hook.name.clone(),
        source,
    };

    let values_path = ctx
        .values
        .materialize(module, &ctx.values_path(module))
        .await
        .map_err(values_err)?;
    let module_result = ctx.module_dynamic_values_path(module);
    let global_result = ctx.global_dynamic_values_path(module);
    for result in [&module_result, &global_result] {
        prepare_result_file(result).await.map_err(values_err)?;
    }

    let mut env = base_env.to_vec();
    env.extend([
        (VALUES_PATH_ENV.to_owned(), values_path.display().to_string()),
        (
            MODULE_DYNAMIC_VALUES_PATH_ENV.to_owned(),
            module_result.display().to_string(),
        ),
        (
            GLOBAL_DYNAMIC_VALUES_PATH_ENV.to_owned(),
            global_result.display().to_string(),
        ),
    ]);

    tracing::info!("running hook");
    let out = runner
        .run(&hook.path, workdir, &env)
        .await
        .map_err(|source| HookError::Spawn {
            module: hook.module.clone(),
            hook: hook.name.clone(),
            source,
        })?;

    if !out.success {
        tracing::error!(stdout = %out.stdout, stderr = %out.stderr, "hook failed");
        return Err(HookError::Failed {
            module: hook.module.clone(),
            hook: hook.name.clone(),
            code: out.code,
            stdout: out.stdout,
            stderr: out.stderr,
        });
    }
    tracing::debug!(stdout = %out.stdout, stderr = %out.stderr, "hook done");

    let produced = values::load_values_file(&module_result)
        .await
        .map_err(values_err)?;
    if has_keys(&produced) {
        ctx.values
            .merge_dynamic(Scope::Module(module), produced)
            .map_err(values_err)?;
    }

    let produced = values::load_values_file(&global_result)
        .await
        .map_err(values_err)?;
    if has_keys(&produced) {
        ctx.values
            .merge_dynamic(Scope::Global, produced)
            .map_err(values_err)?;
    }

    Ok(())
}

fn has_keys(value: &Value) -> bool {
    value.as_object().is_some_and(|m| !m.is_empty())
}

/// Make sure a hook can create `path` and that nothing from a previous hook is left there.
async fn prepare_result_file(path: &Path) -> Result<(), values::ValuesError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| values::ValuesError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(values::ValuesError::Write {
            path: path.to_path_buf(),
            source: e,
        }),
        _ => Ok(()),
    }
}
