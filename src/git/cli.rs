//! `git` subprocess adapter
//!
//! Mutating operations (fetch, checkout, reset, merge, commit) shell out to the
//! `git` binary so hooks, config and merge drivers behave exactly as they do on
//! the command line. Read-only inspection goes through `git2`.

use super::{HeadState, MergeOutcome, MergeState, RefVariants, Vcs};
use crate::error::{Error, GitError, Result};
use git2::{BranchType, Oid, Repository, RepositoryState};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tracing::{debug, info};

/// Git repository driven through the `git` binary
#[derive(Debug, Clone)]
pub struct GitCli {
    root: PathBuf,
    remote: String,
}

impl GitCli {
    /// Open the repository containing `path`
    pub fn discover(path: &Path, remote: impl Into<String>) -> Result<Self> {
        let repo = Repository::discover(path)
            .map_err(|_| Error::Git(GitError::RepositoryNotFound(path.display().to_string())))?;
        let root = repo
            .workdir()
            .ok_or_else(|| Error::Git(GitError::RepositoryNotFound(path.display().to_string())))?
            .to_path_buf();

        Ok(Self {
            root,
            remote: remote.into(),
        })
    }

    /// Root of the working tree
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn open(&self) -> Result<Repository> {
        Repository::open(&self.root)
            .map_err(|_| Error::Git(GitError::RepositoryNotFound(self.root.display().to_string())))
    }

    fn output(&self, args: &[&str]) -> Result<Output> {
        debug!("Executing: git {}", args.join(" "));

        Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| {
                Error::Git(GitError::CommandFailed {
                    operation: args.join(" "),
                    stderr: format!("Failed to spawn git: {}", e),
                })
            })
    }

    /// Run a git command and return trimmed stdout, failing on non-zero exit
    fn run(&self, args: &[&str]) -> Result<String> {
        let output = self.output(args)?;

        if !output.status.success() {
            return Err(command_failed(args, &output));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn run_merge(&self, args: &[&str]) -> Result<MergeOutcome> {
        let output = self.output(args)?;

        // Echo git's own report, including the CONFLICT lines
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            if !line.trim().is_empty() {
                info!("{}", line);
            }
        }

        if output.status.success() {
            return Ok(MergeOutcome::Merged);
        }

        if self.merge_state()?.is_in_progress() {
            debug!("git {} left a conflicted merge", args.join(" "));
            return Ok(MergeOutcome::Conflict);
        }

        Ok(MergeOutcome::Failed(failure_text(&output)))
    }

    fn query_remote_default_branch(&self) -> Result<String> {
        let stdout = self.run(&["ls-remote", "--symref", &self.remote, "HEAD"])?;
        parse_remote_default_branch(&stdout)
            .ok_or_else(|| Error::Git(GitError::MainBranchUnknown(stdout.clone())))
    }
}

impl Vcs for GitCli {
    fn remote(&self) -> &str {
        &self.remote
    }

    fn fetch(&self) -> Result<String> {
        let output = self.output(&["fetch", &self.remote])?;
        if !output.status.success() {
            return Err(command_failed(&["fetch", &self.remote], &output));
        }

        // git reports fetch progress on stderr
        let mut text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(stderr.trim());
        }
        Ok(text)
    }

    fn head(&self) -> Result<HeadState> {
        let repo = self.open()?;
        let head = repo.head().map_err(inspect("read HEAD"))?;

        if repo.head_detached().map_err(inspect("read HEAD"))? {
            let oid = head
                .target()
                .ok_or_else(|| Error::Git(GitError::Inspect {
                    operation: "read HEAD".to_string(),
                    source: "detached HEAD without a target".to_string(),
                }))?;
            return Ok(HeadState::Detached(oid.to_string()));
        }

        head.shorthand()
            .map(|name| HeadState::Branch(name.to_string()))
            .ok_or_else(|| {
                Error::Git(GitError::Inspect {
                    operation: "read HEAD".to_string(),
                    source: "branch name is not valid UTF-8".to_string(),
                })
            })
    }

    fn main_branch(&self) -> Result<String> {
        let repo = self.open()?;
        let symbolic = format!("refs/remotes/{}/HEAD", self.remote);

        // Local cache (origin/HEAD) first, then ask the remote
        if let Ok(reference) = repo.find_reference(&symbolic) {
            let prefix = format!("refs/remotes/{}/", self.remote);
            if let Some(name) = reference
                .symbolic_target()
                .and_then(|target| target.strip_prefix(&prefix))
            {
                return Ok(name.to_string());
            }
        }

        self.query_remote_default_branch()
    }

    fn resolve_commit(&self, rev: &str) -> Result<Option<String>> {
        let repo = self.open()?;
        let commit = repo
            .revparse_single(rev)
            .and_then(|object| object.peel_to_commit());
        Ok(commit.ok().map(|commit| commit.id().to_string()))
    }

    fn checkout(&self, branch: &str) -> Result<()> {
        self.run(&["checkout", branch]).map(drop)
    }

    fn checkout_new(&self, branch: &str, start_point: &str) -> Result<()> {
        self.run(&["checkout", "-b", branch, start_point]).map(drop)
    }

    fn checkout_detached(&self, rev: &str) -> Result<()> {
        self.run(&["checkout", "--detach", rev]).map(drop)
    }

    fn reset_hard(&self, rev: &str) -> Result<()> {
        self.run(&["reset", "--hard", rev]).map(drop)
    }

    fn merge(&self, rev: &str) -> Result<MergeOutcome> {
        self.run_merge(&["merge", "--no-edit", rev])
    }

    fn merge_no_commit(&self, rev: &str) -> Result<MergeOutcome> {
        self.run_merge(&["merge", "--no-ff", "--no-commit", rev])
    }

    fn abort_merge(&self) -> Result<()> {
        self.run(&["merge", "--abort"]).map(drop)
    }

    fn stage(&self, path: &Path) -> Result<()> {
        let path = path.to_string_lossy();
        self.run(&["add", "--", &path]).map(drop)
    }

    fn commit(&self, message: &str) -> Result<()> {
        self.run(&["commit", "-m", message]).map(drop)
    }

    fn conflicting_files(&self) -> Result<Vec<String>> {
        let repo = self.open()?;
        let index = repo.index().map_err(inspect("read index"))?;
        let conflicts = index.conflicts().map_err(inspect("read index conflicts"))?;

        let mut paths = Vec::new();
        for conflict in conflicts {
            let conflict = conflict.map_err(inspect("read index conflicts"))?;
            let entry = conflict.our.or(conflict.their).or(conflict.ancestor);
            if let Some(entry) = entry {
                paths.push(String::from_utf8_lossy(&entry.path).to_string());
            }
        }
        paths.sort();
        paths.dedup();
        Ok(paths)
    }

    fn merge_state(&self) -> Result<MergeState> {
        let mut repo = self.open()?;
        if repo.state() != RepositoryState::Merge {
            return Ok(MergeState::NoMerge);
        }

        let mut merge_heads = Vec::new();
        repo.mergehead_foreach(|oid| {
            merge_heads.push(*oid);
            true
        })
        .map_err(inspect("read MERGE_HEAD"))?;

        let branch = match merge_heads.first() {
            Some(oid) => branch_name_for(&repo, *oid).unwrap_or_else(|| oid.to_string()),
            None => String::new(),
        };
        let message = repo.message().map_err(inspect("read MERGE_MSG"))?;

        Ok(MergeState::InProgress { branch, message })
    }

    fn ref_variants(&self, name: &str) -> Result<RefVariants> {
        let repo = self.open()?;
        let references = repo.references().map_err(inspect("list references"))?;
        Ok(classify_refs(
            references.filter_map(|reference| {
                reference
                    .ok()
                    .and_then(|reference| reference.name().map(str::to_string))
            }),
            name,
            &self.remote,
        ))
    }
}

/// Sort full ref names matching `name` into local, remote-tracking and other
fn classify_refs(refnames: impl Iterator<Item = String>, name: &str, remote: &str) -> RefVariants {
    let local = format!("refs/heads/{}", name);
    let tracking = format!("refs/remotes/{}/{}", remote, name);
    let suffix = format!("/{}", name);

    let mut variants = RefVariants::default();
    for refname in refnames {
        if refname == local {
            variants.local = Some(name.to_string());
        } else if refname == tracking {
            variants.remote = Some(format!("{}/{}", remote, name));
        } else if refname.ends_with(&suffix) {
            if let Some(short) = refname
                .strip_prefix("refs/heads/")
                .or_else(|| refname.strip_prefix("refs/remotes/"))
            {
                variants.other.push(short.to_string());
            }
        }
    }
    variants.other.sort();
    variants
}

fn branch_name_for(repo: &Repository, oid: Oid) -> Option<String> {
    let branches = repo.branches(None).ok()?;
    branches
        .filter_map(|branch| branch.ok())
        .find(|(branch, kind)| *kind == BranchType::Local && branch.get().target() == Some(oid))
        .or_else(|| {
            repo.branches(Some(BranchType::Remote))
                .ok()?
                .filter_map(|branch| branch.ok())
                .find(|(branch, _)| branch.get().target() == Some(oid))
        })
        .and_then(|(branch, _)| branch.name().ok().flatten().map(str::to_string))
}

/// Parse `git ls-remote --symref <remote> HEAD` output
fn parse_remote_default_branch(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        line.strip_prefix("ref: ")
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|target| target.strip_prefix("refs/heads/"))
            .map(str::to_string)
    })
}

fn failure_text(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    } else {
        stderr
    }
}

fn command_failed(args: &[&str], output: &Output) -> Error {
    Error::Git(GitError::CommandFailed {
        operation: args.join(" "),
        stderr: failure_text(output),
    })
}

fn inspect(operation: &'static str) -> impl Fn(git2::Error) -> Error {
    move |e| {
        Error::Git(GitError::Inspect {
            operation: operation.to_string(),
            source: e.message().to_string(),
        })
    }
}
