pub mod multi_merge;
pub mod version;

use crate::config::Config;
use crate::git::GitCli;
use crate::hooks::ScriptHook;
use crate::manifest::ManifestStore;
use crate::multi_merge::MergeContext;
use anyhow::{Context, Result};
use std::env;

/// Repository, manifest and hook for the current working directory
pub struct Session {
    pub repo: GitCli,
    pub store: ManifestStore,
    pub hook: ScriptHook,
}

impl Session {
    pub fn open(config: &Config) -> Result<Self> {
        let cwd = env::current_dir().context("Failed to read current directory")?;
        let repo = GitCli::discover(&cwd, config.remote.as_str())?;
        let store = ManifestStore::in_repo(repo.root());
        let hook = ScriptHook::multi_merge_completed(repo.root(), &config.hooks.directory);

        Ok(Self { repo, store, hook })
    }

    pub fn context(&self) -> MergeContext<'_> {
        MergeContext::new(&self.repo, &self.store, &self.hook)
    }
}
