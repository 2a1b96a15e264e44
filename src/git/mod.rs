//! Version-control adapter used by the multi-merge engine
//!
//! The engine never inspects the repository directly. Everything it needs is
//! expressed through the [`Vcs`] trait so the same orchestration logic runs
//! against the real `git` binary ([`GitCli`]) or an in-memory fake in tests.

pub mod cli;

pub use cli::GitCli;

use crate::error::Result;

/// Result of attempting a merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Merge applied (and committed, unless a no-commit merge was requested)
    Merged,
    /// Merge stopped with unresolved conflicts; the repository is mid-merge
    Conflict,
    /// Merge failed for another reason; the repository is not mid-merge
    Failed(String),
}

/// Whether a merge is currently paused in the working tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeState {
    NoMerge,
    /// A merge is waiting to be committed or aborted
    InProgress {
        /// Branch being merged, as best the repository can name it
        branch: String,
        /// Pending commit message prepared by the merge
        message: String,
    },
}

impl MergeState {
    pub fn is_in_progress(&self) -> bool {
        matches!(self, MergeState::InProgress { .. })
    }
}

/// What HEAD points at, so it can be restored later
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadState {
    Branch(String),
    Detached(String),
}

impl HeadState {
    /// Revision to hand to checkout when restoring
    pub fn as_rev(&self) -> &str {
        match self {
            HeadState::Branch(name) | HeadState::Detached(name) => name,
        }
    }
}

/// Refs found for a branch name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefVariants {
    /// Local branch name, e.g. `feature`
    pub local: Option<String>,
    /// Remote-tracking name, e.g. `origin/feature`
    pub remote: Option<String>,
    /// Other refs that matched the name but are neither form above
    pub other: Vec<String>,
}

impl RefVariants {
    /// Nothing at all matched; the branch is gone
    pub fn is_missing(&self) -> bool {
        self.local.is_none() && self.remote.is_none() && self.other.is_empty()
    }

    /// Ref to merge: remote-tracking preferred over local
    pub fn preferred(&self) -> Option<&str> {
        self.remote.as_deref().or(self.local.as_deref())
    }

    pub fn is_local_only(&self) -> bool {
        self.local.is_some() && self.remote.is_none()
    }
}

/// Operations the multi-merge engine needs from version control
///
/// Every mutating call may fail with a generic git error, which callers treat
/// as fatal unless noted.
pub trait Vcs {
    /// Name of the remote used for fetching and for tracking refs
    fn remote(&self) -> &str;

    /// Remote-tracking name of a branch, e.g. `origin/main`
    fn remote_ref(&self, branch: &str) -> String {
        format!("{}/{}", self.remote(), branch)
    }

    /// Fetch the remote, returning any output worth showing
    fn fetch(&self) -> Result<String>;

    fn head(&self) -> Result<HeadState>;

    /// Default branch of the remote, without the remote prefix
    fn main_branch(&self) -> Result<String>;

    /// Commit id of a revision, `None` if it does not resolve
    fn resolve_commit(&self, rev: &str) -> Result<Option<String>>;

    fn checkout(&self, branch: &str) -> Result<()>;

    /// Create `branch` at `start_point` and switch to it
    fn checkout_new(&self, branch: &str, start_point: &str) -> Result<()>;

    fn checkout_detached(&self, rev: &str) -> Result<()>;

    fn reset_hard(&self, rev: &str) -> Result<()>;

    fn merge(&self, rev: &str) -> Result<MergeOutcome>;

    /// Merge without committing and without fast-forwarding
    fn merge_no_commit(&self, rev: &str) -> Result<MergeOutcome>;

    fn abort_merge(&self) -> Result<()>;

    fn stage(&self, path: &std::path::Path) -> Result<()>;

    fn commit(&self, message: &str) -> Result<()>;

    /// Paths currently unmerged in the index
    fn conflicting_files(&self) -> Result<Vec<String>>;

    fn merge_state(&self) -> Result<MergeState>;

    /// Which forms of a branch exist locally and on the remote
    fn ref_variants(&self, name: &str) -> Result<RefVariants>;
}
