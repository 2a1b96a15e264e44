//! Post-completion hooks
//!
//! After every reference of a run is merged, an executable in the hook
//! directory (`.pila.hooks.d/multi-merge-completed.sh` by default) is invoked
//! with the target branch as its only argument. A missing hook is not an error.

use crate::error::{HookError, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Default hook directory, relative to the repository root
pub const HOOK_DIRECTORY: &str = ".pila.hooks.d";

/// Hook run once all references are merged
pub const HOOK_MULTI_MERGE_COMPLETED: &str = "multi-merge-completed.sh";

/// Something to run after a multi-merge completes
pub trait CompletionHook {
    /// Run the hook for `target`
    ///
    /// Returns the hook's trimmed stdout, or `None` when no hook is installed.
    fn run(&self, target: &str) -> Result<Option<String>>;
}

/// Executable hook script looked up in a directory
#[derive(Debug, Clone)]
pub struct ScriptHook {
    path: PathBuf,
}

impl ScriptHook {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The completion hook inside `hook_dir`, resolved against `repo_root` when relative
    pub fn multi_merge_completed(repo_root: &Path, hook_dir: &Path) -> Self {
        Self::new(repo_root.join(hook_dir).join(HOOK_MULTI_MERGE_COMPLETED))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CompletionHook for ScriptHook {
    fn run(&self, target: &str) -> Result<Option<String>> {
        if !self.path.is_file() {
            debug!("No hook at {}, skipping", self.path.display());
            return Ok(None);
        }

        info!("Running hook after all merges completed successfully");
        let output = Command::new(&self.path)
            .arg(target)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| HookError::Spawn {
                path: self.path.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(HookError::Failed {
                path: self.path.display().to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            }
            .into());
        }

        Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
    }
}
