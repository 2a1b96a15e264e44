//! Error types for pila
//!
//! Covers every failure mode of a multi-merge run:
//! - Manifest operations (loading, parsing, reference bookkeeping)
//! - Git operations (subprocess failures, repository inspection)
//! - Multi-merge orchestration (conflicts, local-only branches, bad input)
//! - Completion hooks
//! - Configuration files
//! - File I/O

use crate::manifest::Manifest;
use std::fmt;
use std::io;

/// Result type alias for pila operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for pila
#[derive(Debug)]
pub enum Error {
    /// Manifest-related errors
    Manifest(ManifestError),
    /// Git operation errors
    Git(GitError),
    /// Multi-merge orchestration errors
    MultiMerge(MultiMergeError),
    /// Completion hook errors
    Hook(HookError),
    /// Configuration file errors
    Config(ConfigError),
    /// I/O errors
    Io(IoError),
}

/// Manifest operation errors
#[derive(Debug)]
pub enum ManifestError {
    /// No manifest file exists at the given path
    NotFound(String),
    /// Manifest file exists but could not be parsed
    Parse { path: String, details: String },
    /// Manifest could not be serialized
    Serialize(String),
    /// Named branch is not part of the manifest
    ReferenceNotFound { name: String, suggestion: Option<String> },
    /// Operation requires a different selection kind
    KindMismatch { expected: String, actual: String },
}

/// Git operation errors
#[derive(Debug)]
pub enum GitError {
    /// Directory is not a git repository
    RepositoryNotFound(String),
    /// A git subprocess exited unsuccessfully
    CommandFailed { operation: String, stderr: String },
    /// Reading repository state through git2 failed
    Inspect { operation: String, source: String },
    /// The remote's default branch could not be determined
    MainBranchUnknown(String),
}

/// Multi-merge orchestration errors
#[derive(Debug)]
pub enum MultiMergeError {
    /// A merge stopped on conflicts; the manifest is left ready to resume
    Conflict {
        branch: String,
        conflicting_files: Vec<String>,
        manifest: Box<Manifest>,
    },
    /// Branches have no remote-tracking counterpart, so redo would lose them
    LocalOnlyBranches { branch_names: Vec<String> },
    /// Refs matching the name exist, but neither the local nor the remote form
    UnresolvedBranch(String),
    /// A merge is paused mid-conflict
    MergeInProgress,
    /// Label based branch selection
    LabelsNotImplemented,
    /// Branches or labels were given without a target branch
    MissingTarget,
}

/// Completion hook errors
#[derive(Debug)]
pub enum HookError {
    /// Hook could not be started
    Spawn { path: String, source: io::Error },
    /// Hook ran but exited unsuccessfully
    Failed { path: String, status: String, stderr: String },
}

/// Configuration file errors
#[derive(Debug)]
pub enum ConfigError {
    /// Config file exists but is not valid TOML for `Config`
    Parse { path: String, details: String },
}

/// File I/O errors
#[derive(Debug)]
pub enum IoError {
    /// Failed to read file
    ReadFailed { path: String, source: io::Error },
    /// Failed to write file
    WriteFailed { path: String, source: io::Error },
    /// Other I/O error
    Other(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Manifest(e) => write!(f, "Manifest error: {}", e),
            Error::Git(e) => write!(f, "Git error: {}", e),
            Error::MultiMerge(e) => write!(f, "Multi-merge error: {}", e),
            Error::Hook(e) => write!(f, "Hook error: {}", e),
            Error::Config(e) => write!(f, "Config error: {}", e),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl fmt::Display for ManifestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestError::NotFound(path) => {
                write!(f, "No multi-merge manifest found at {}", path)
            }
            ManifestError::Parse { path, details } => {
                write!(f, "Failed to parse {}: {}", path, details)
            }
            ManifestError::Serialize(details) => {
                write!(f, "Failed to serialize manifest: {}", details)
            }
            ManifestError::ReferenceNotFound { name, suggestion } => match suggestion {
                Some(close) => write!(
                    f,
                    "Branch {} not found in manifest (did you mean {}?)",
                    name, close
                ),
                None => write!(f, "Branch {} not found in manifest", name),
            },
            ManifestError::KindMismatch { expected, actual } => {
                write!(f, "Manifest is of type {}, expected {}", actual, expected)
            }
        }
    }
}

impl fmt::Display for GitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GitError::RepositoryNotFound(path) => {
                write!(f, "Not a git repository: {}", path)
            }
            GitError::CommandFailed { operation, stderr } => {
                write!(f, "git {} failed: {}", operation, stderr.trim())
            }
            GitError::Inspect { operation, source } => {
                write!(f, "Failed to {}: {}", operation, source)
            }
            GitError::MainBranchUnknown(details) => {
                write!(f, "Unable to determine main branch: {}", details)
            }
        }
    }
}

impl fmt::Display for MultiMergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MultiMergeError::Conflict { branch, .. } => {
                write!(f, "merge conflict occurred while merging branch '{}'", branch)
            }
            MultiMergeError::LocalOnlyBranches { branch_names } => {
                write!(f, "branches exist only locally: {}", branch_names.join(", "))
            }
            MultiMergeError::UnresolvedBranch(name) => {
                write!(f, "unable to find a branch named '{}'", name)
            }
            MultiMergeError::MergeInProgress => write!(
                f,
                "a merge is currently in progress, run 'pila multi-merge continue' or 'pila multi-merge abort' first"
            ),
            MultiMergeError::LabelsNotImplemented => {
                write!(f, "multi merge using PR labels not implemented yet")
            }
            MultiMergeError::MissingTarget => {
                write!(f, "target is required when specifying branches or labels")
            }
        }
    }
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookError::Spawn { path, source } => {
                write!(f, "Failed to run hook {}: {}", path, source)
            }
            HookError::Failed { path, status, stderr } => {
                write!(f, "Hook {} exited with {}: {}", path, status, stderr.trim())
            }
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse { path, details } => {
                write!(f, "Invalid config {}: {}", path, details)
            }
        }
    }
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoError::ReadFailed { path, source } => {
                write!(f, "Failed to read {}: {}", path, source)
            }
            IoError::WriteFailed { path, source } => {
                write!(f, "Failed to write {}: {}", path, source)
            }
            IoError::Other(source) => write!(f, "{}", source),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(IoError::ReadFailed { source, .. })
            | Error::Io(IoError::WriteFailed { source, .. })
            | Error::Io(IoError::Other(source))
            | Error::Hook(HookError::Spawn { source, .. }) => Some(source),
            _ => None,
        }
    }
}

impl std::error::Error for ManifestError {}
impl std::error::Error for GitError {}
impl std::error::Error for MultiMergeError {}
impl std::error::Error for HookError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for IoError {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(IoError::Other(err))
    }
}

impl From<ManifestError> for Error {
    fn from(err: ManifestError) -> Self {
        Error::Manifest(err)
    }
}

impl From<GitError> for Error {
    fn from(err: GitError) -> Self {
        Error::Git(err)
    }
}

impl From<MultiMergeError> for Error {
    fn from(err: MultiMergeError) -> Self {
        Error::MultiMerge(err)
    }
}

impl From<HookError> for Error {
    fn from(err: HookError) -> Self {
        Error::Hook(err)
    }
}

impl Error {
    /// Check if the user can fix the situation and re-run (conflicts, unpushed branches)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::MultiMerge(MultiMergeError::Conflict { .. })
                | Error::MultiMerge(MultiMergeError::LocalOnlyBranches { .. })
        )
    }

    /// Check if the error means the manifest file is absent
    pub fn is_manifest_missing(&self) -> bool {
        matches!(self, Error::Manifest(ManifestError::NotFound(_)))
    }
}
