use super::{ensure_no_merge_in_progress, fetch, Completion, MergeContext, RunSummary};
use crate::error::{GitError, MultiMergeError, Result};
use crate::git::{MergeOutcome, MergeState, Vcs};
use crate::manifest::{Manifest, ManifestKind};
use chrono::Utc;
use tracing::{info, warn};

/// Commit message used when the manifest itself is committed to the target
pub const MANIFEST_COMMIT_MESSAGE: &str = "chore: Add Pila multi merge manifest";

/// Start a fresh run merging `branches` into `target`
///
/// The target is reset to the remote main branch (or created from it) and any
/// previous manifest is replaced.
pub fn start_run(ctx: &MergeContext<'_>, target: &str, branches: &[String]) -> Result<RunSummary> {
    ensure_no_merge_in_progress(ctx.vcs)?;
    fetch(ctx.vcs)?;

    let remote_main = remote_main(ctx.vcs)?;
    let main_sha = ctx.vcs.resolve_commit(&remote_main)?.ok_or_else(|| {
        GitError::MainBranchUnknown(format!("{} does not resolve to a commit", remote_main))
    })?;
    let manifest = Manifest::new(main_sha, target, ManifestKind::Branches, branches);

    // An old manifest would block checking out a target that tracks it
    ctx.store.remove()?;

    // Only a local branch counts: a tag or sha of the same name would detach HEAD
    if ctx.vcs.ref_variants(target)?.local.is_some() {
        info!("Checkout target branch {}", target);
        ctx.vcs.checkout(target)?;
        info!("Make target branch point to {}", remote_main);
        ctx.vcs.reset_hard(&remote_main)?;
    } else {
        info!("Create target branch {} from {}", target, remote_main);
        ctx.vcs.checkout_new(target, &remote_main)?;
    }

    ctx.store.save(&manifest)?;
    continue_run(ctx)
}

/// Label based selection is accepted by the CLI but not supported
pub fn start_run_with_labels(
    _ctx: &MergeContext<'_>,
    _target: &str,
    _labels: &[String],
) -> Result<RunSummary> {
    Err(MultiMergeError::LabelsNotImplemented.into())
}

/// Advance the persisted manifest until every reference is merged or a conflict stops it
///
/// A merge left in progress (conflicts resolved and staged by the user) is
/// committed first. Calling this on a completed manifest does nothing.
pub fn continue_run(ctx: &MergeContext<'_>) -> Result<RunSummary> {
    let mut manifest = ctx.store.load()?;
    let mut merged = Vec::new();
    let mut removed = Vec::new();

    while let Some(index) = manifest.next_pending() {
        let name = manifest.references[index].name.clone();

        if let MergeState::InProgress { branch, message } = ctx.vcs.merge_state()? {
            info!("Commit merge of {}", branch);
            ctx.vcs.commit(&commit_subject(&message, &name))?;
            manifest.references[index].merged = true;
            ctx.store.save(&manifest)?;
            merged.push(name);
            continue;
        }

        let variants = ctx.vcs.ref_variants(&name)?;
        if variants.is_missing() {
            warn!("Branch {} no longer exists, removing it from the manifest", name);
            manifest.references.remove(index);
            ctx.store.save(&manifest)?;
            removed.push(name);
            continue;
        }
        let rev = variants
            .preferred()
            .map(str::to_string)
            .ok_or_else(|| MultiMergeError::UnresolvedBranch(name.clone()))?;

        info!("Merge {} into {}", rev, manifest.target);
        match ctx.vcs.merge(&rev)? {
            MergeOutcome::Merged => {
                manifest.references[index].merged = true;
                ctx.store.save(&manifest)?;
                merged.push(name);
            }
            MergeOutcome::Conflict => {
                let conflicting_files = ctx.vcs.conflicting_files()?;
                return Err(MultiMergeError::Conflict {
                    branch: rev,
                    conflicting_files,
                    manifest: Box::new(manifest),
                }
                .into());
            }
            MergeOutcome::Failed(stderr) => {
                return Err(GitError::CommandFailed {
                    operation: format!("merge {}", rev),
                    stderr,
                }
                .into());
            }
        }
    }

    let completion = if manifest.is_completed() {
        None
    } else {
        Some(complete(ctx, &mut manifest)?)
    };

    Ok(RunSummary {
        manifest,
        merged,
        removed,
        completion,
    })
}

/// Throw away all merges: the target goes back to the remote main branch
///
/// The manifest survives with every reference pending again.
pub fn abort(ctx: &MergeContext<'_>) -> Result<Manifest> {
    let mut manifest = ctx.store.load()?;

    if ctx.vcs.merge_state()?.is_in_progress() {
        info!("Abort merge in progress");
        ctx.vcs.abort_merge()?;
    }

    reset_target(ctx.vcs, &manifest.target)?;

    manifest.reset();
    ctx.store.save(&manifest)?;
    Ok(manifest)
}

/// Rebuild the target from scratch with the current manifest
///
/// Refuses when a listed branch only exists locally: the reset would be the
/// only place its merged commits survive.
pub fn redo(ctx: &MergeContext<'_>) -> Result<RunSummary> {
    ensure_no_merge_in_progress(ctx.vcs)?;
    let mut manifest = ctx.store.load()?;
    fetch(ctx.vcs)?;

    let branch_names = local_only_branches(ctx.vcs, &manifest)?;
    if !branch_names.is_empty() {
        return Err(MultiMergeError::LocalOnlyBranches { branch_names }.into());
    }

    reset_target(ctx.vcs, &manifest.target)?;

    // The reset may have removed a committed manifest from the work tree
    manifest.reset();
    ctx.store.save(&manifest)?;
    continue_run(ctx)
}

/// Manifest branches with a local ref but no remote-tracking ref
pub fn local_only_branches(vcs: &dyn Vcs, manifest: &Manifest) -> Result<Vec<String>> {
    let mut local_only = Vec::new();
    for name in manifest.branch_names() {
        if vcs.ref_variants(&name)?.is_local_only() {
            local_only.push(name);
        }
    }
    Ok(local_only)
}

fn remote_main(vcs: &dyn Vcs) -> Result<String> {
    let main = vcs.main_branch()?;
    Ok(vcs.remote_ref(&main))
}

fn reset_target(vcs: &dyn Vcs, target: &str) -> Result<()> {
    info!("Checkout target branch {}", target);
    vcs.checkout(target)?;
    let remote_main = remote_main(vcs)?;
    info!("Make target branch point to {}", remote_main);
    vcs.reset_hard(&remote_main)
}

/// Record completion, commit the manifest and run the hook
///
/// `completed_at` is persisted before the hook runs so a later `continue`
/// never fires it again. A failed manifest commit clears the marker.
fn complete(ctx: &MergeContext<'_>, manifest: &mut Manifest) -> Result<Completion> {
    manifest.completed_at = Some(Utc::now());
    ctx.store.save(manifest)?;

    info!("Adding manifest to git");
    let committed = ctx
        .vcs
        .stage(ctx.store.path())
        .and_then(|_| ctx.vcs.commit(MANIFEST_COMMIT_MESSAGE));
    if let Err(e) = committed {
        manifest.completed_at = None;
        ctx.store.save(manifest)?;
        return Err(e);
    }

    Ok(match ctx.hook.run(&manifest.target) {
        Ok(hook_output) => Completion {
            hook_output,
            hook_error: None,
        },
        Err(e) => {
            warn!("Completion hook failed: {}", e);
            Completion {
                hook_output: None,
                hook_error: Some(e.to_string()),
            }
        }
    })
}

/// First line of the pending merge message, or git's default wording
fn commit_subject(message: &str, branch: &str) -> String {
    message
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Merge branch '{}'", branch))
}
