//! Multi-merge engine
//!
//! Merges an ordered list of branches into a disposable target branch,
//! persisting progress after every step so a run interrupted by a conflict or
//! a killed process resumes where it stopped.
//!
//! - `orchestrator` drives the manifest through real merges
//! - `simulate` predicts the outcome on a detached HEAD without touching branches

mod orchestrator;
mod simulate;

pub use orchestrator::{
    abort, continue_run, local_only_branches, redo, start_run, start_run_with_labels,
};
pub use simulate::{test, BranchResult, BranchStatus, MergeType, TestResult};

use crate::error::{MultiMergeError, Result};
use crate::git::Vcs;
use crate::hooks::CompletionHook;
use crate::manifest::{Manifest, ManifestStore};

/// Everything a multi-merge operation works against
///
/// Passed explicitly to every operation; there is no process-wide repository handle.
pub struct MergeContext<'a> {
    pub vcs: &'a dyn Vcs,
    pub store: &'a ManifestStore,
    pub hook: &'a dyn CompletionHook,
}

impl<'a> MergeContext<'a> {
    pub fn new(vcs: &'a dyn Vcs, store: &'a ManifestStore, hook: &'a dyn CompletionHook) -> Self {
        Self { vcs, store, hook }
    }
}

/// What a single advancement call did
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Manifest as persisted at the end of the call
    pub manifest: Manifest,
    /// References merged by this call, in order
    pub merged: Vec<String>,
    /// References dropped because the branch no longer exists
    pub removed: Vec<String>,
    /// Set when this call ran the completion sequence
    pub completion: Option<Completion>,
}

impl RunSummary {
    /// Nothing happened: the manifest was already fully merged and completed
    pub fn is_noop(&self) -> bool {
        self.merged.is_empty() && self.removed.is_empty() && self.completion.is_none()
    }
}

/// Outcome of the completion sequence
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    /// Hook stdout, `None` when no hook is installed or it failed
    pub hook_output: Option<String>,
    /// Hook failure, reported without undoing the merges
    pub hook_error: Option<String>,
}

/// Refuse to start while a merge is paused mid-conflict
fn ensure_no_merge_in_progress(vcs: &dyn Vcs) -> Result<()> {
    if vcs.merge_state()?.is_in_progress() {
        return Err(MultiMergeError::MergeInProgress.into());
    }
    Ok(())
}

/// Fetch and log whatever git had to say
fn fetch(vcs: &dyn Vcs) -> Result<()> {
    tracing::info!("Make sure we have all changes");
    let output = vcs.fetch()?;
    if !output.is_empty() {
        tracing::info!("{}", output);
    }
    Ok(())
}
