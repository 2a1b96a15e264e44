pub mod commands;
pub mod config;
pub mod error;
pub mod git;
pub mod hooks;
pub mod manifest;
pub mod multi_merge;

pub use error::{Error, Result};
pub use git::{GitCli, Vcs};
pub use manifest::{Manifest, ManifestStore};
pub use multi_merge::MergeContext;
