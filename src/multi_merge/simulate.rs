//! Dry-run merge test
//!
//! Replays the manifest on a detached HEAD at the remote main branch. Branches
//! are stacked on top of each other while they merge cleanly; after the first
//! failure each remaining branch is tried alone against main, so a report
//! separates "conflicts with main" from "conflicts with an earlier branch".
//!
//! Nothing is committed to any branch, and the original HEAD is restored on
//! every exit path.

use super::{ensure_no_merge_in_progress, fetch, MergeContext};
use crate::error::{Error, Result};
use crate::git::{HeadState, MergeOutcome, Vcs};
use crate::manifest::Manifest;
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchStatus {
    Clean,
    Conflict,
    Missing,
    Error,
}

impl fmt::Display for BranchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BranchStatus::Clean => "clean",
            BranchStatus::Conflict => "conflict",
            BranchStatus::Missing => "missing",
            BranchStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// What a branch was merged onto during the test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeType {
    /// On top of every earlier branch
    Sequential,
    /// Alone against the main branch
    MainOnly,
}

impl fmt::Display for MergeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeType::Sequential => write!(f, "sequential"),
            MergeType::MainOnly => write!(f, "main-only"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchResult {
    pub name: String,
    pub status: BranchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge_type: Option<MergeType>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conflicting_files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BranchResult {
    fn new(name: &str, status: BranchStatus, merge_type: Option<MergeType>) -> Self {
        Self {
            name: name.to_string(),
            status,
            merge_type,
            conflicting_files: Vec::new(),
            error: None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, BranchStatus::Conflict | BranchStatus::Error)
    }
}

/// Report of a dry-run test
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestResult {
    /// No branch conflicted or errored; missing branches do not count
    pub ok: bool,
    /// Set when the test could not run at all
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "branches")]
    pub branch_results: Vec<BranchResult>,
}

impl TestResult {
    fn from_results(branch_results: Vec<BranchResult>) -> Self {
        Self {
            ok: !branch_results.iter().any(BranchResult::is_failure),
            error: None,
            branch_results,
        }
    }

    /// Report for a test that failed before producing branch results
    pub fn failed(err: &Error) -> Self {
        Self {
            ok: false,
            error: Some(err.to_string()),
            branch_results: Vec::new(),
        }
    }
}

/// Predict how the manifest's branches would merge onto the current remote main
pub fn test(ctx: &MergeContext<'_>) -> Result<TestResult> {
    let manifest = ctx.store.load()?;
    ensure_no_merge_in_progress(ctx.vcs)?;
    fetch(ctx.vcs)?;

    let main = ctx.vcs.main_branch()?;
    let remote_main = ctx.vcs.remote_ref(&main);

    let mut guard = HeadGuard::new(ctx.vcs, ctx.vcs.head()?);
    info!("Checkout detached HEAD at {}", remote_main);
    ctx.vcs.checkout_detached(&remote_main)?;

    let result = simulate(ctx.vcs, &manifest, &remote_main)?;
    guard.restore()?;
    Ok(result)
}

fn simulate(vcs: &dyn Vcs, manifest: &Manifest, remote_main: &str) -> Result<TestResult> {
    let mut sequential = true;
    let mut results = Vec::with_capacity(manifest.references.len());

    for name in manifest.branch_names() {
        let variants = vcs.ref_variants(&name)?;
        let Some(rev) = variants.preferred() else {
            warn!("Branch {} not found", name);
            results.push(BranchResult::new(&name, BranchStatus::Missing, None));
            continue;
        };

        let merge_type = if sequential {
            MergeType::Sequential
        } else {
            vcs.reset_hard(remote_main)?;
            MergeType::MainOnly
        };

        info!("Test merge {} ({})", rev, merge_type);
        match vcs.merge_no_commit(rev)? {
            MergeOutcome::Merged => {
                // "Already up to date" leaves no merge to commit or abort
                if vcs.merge_state()?.is_in_progress() {
                    if sequential {
                        vcs.commit(&format!("test merge {}", name))?;
                    } else {
                        vcs.abort_merge()?;
                    }
                }
                results.push(BranchResult::new(&name, BranchStatus::Clean, Some(merge_type)));
            }
            MergeOutcome::Conflict => {
                let mut result = BranchResult::new(&name, BranchStatus::Conflict, Some(merge_type));
                result.conflicting_files = vcs.conflicting_files()?;
                vcs.abort_merge()?;
                sequential = false;
                results.push(result);
            }
            MergeOutcome::Failed(stderr) => {
                let mut result = BranchResult::new(&name, BranchStatus::Error, Some(merge_type));
                result.error = Some(stderr);
                sequential = false;
                results.push(result);
            }
        }
    }

    Ok(TestResult::from_results(results))
}

/// Puts HEAD back where the test found it
///
/// Dropping an unrestored guard restores too, so an early `?` return
/// still leaves the work tree on the original branch.
struct HeadGuard<'a> {
    vcs: &'a dyn Vcs,
    original: HeadState,
    restored: bool,
}

impl<'a> HeadGuard<'a> {
    fn new(vcs: &'a dyn Vcs, original: HeadState) -> Self {
        Self {
            vcs,
            original,
            restored: false,
        }
    }

    fn restore(&mut self) -> Result<()> {
        self.restored = true;
        if self.vcs.merge_state()?.is_in_progress() {
            self.vcs.abort_merge()?;
        }
        info!("Restore original HEAD {}", self.original.as_rev());
        match &self.original {
            HeadState::Branch(branch) => self.vcs.checkout(branch),
            HeadState::Detached(sha) => self.vcs.checkout_detached(sha),
        }
    }
}

impl Drop for HeadGuard<'_> {
    fn drop(&mut self) {
        if !self.restored {
            if let Err(e) = self.restore() {
                warn!("Failed to restore {}: {}", self.original.as_rev(), e);
            }
        }
    }
}
