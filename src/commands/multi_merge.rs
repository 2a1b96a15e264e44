//! `pila multi-merge` subcommands
//!
//! Thin glue over `crate::multi_merge`: resolves the target, prints progress
//! and prints remediation steps for the errors a user can fix.

use super::Session;
use crate::error::{Error as PilaError, MultiMergeError};
use crate::git::Vcs;
use crate::manifest::{Manifest, ReferenceChanges};
use crate::multi_merge::{self, BranchStatus, RunSummary, TestResult};
use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Where `append`/`prepend` put new branches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Append,
    Prepend,
}

/// Start a new run from branch names or labels
pub fn run_command(
    session: &Session,
    target: Option<String>,
    branches: Vec<String>,
    labels: Vec<String>,
) -> Result<()> {
    let existing = load_existing(session)?;
    let target = resolve_target(target, existing.as_ref())?;
    let ctx = session.context();

    let summary = if !branches.is_empty() {
        note(&format!("Merge {} branches into {}", branches.len(), target));
        multi_merge::start_run(&ctx, &target, &branches)
    } else {
        multi_merge::start_run_with_labels(&ctx, &target, &labels)
    };
    let summary = remediate(summary, session)?;
    report(&summary);
    Ok(())
}

pub fn continue_command(session: &Session) -> Result<()> {
    let summary = remediate(multi_merge::continue_run(&session.context()), session)?;
    report(&summary);
    Ok(())
}

pub fn abort_command(session: &Session) -> Result<()> {
    let manifest = multi_merge::abort(&session.context())?;
    println!(
        "{} {} reset to main, {} branches pending",
        "Aborted:".yellow(),
        manifest.target.cyan(),
        manifest.references.len()
    );
    Ok(())
}

pub fn show_command(session: &Session) -> Result<()> {
    let manifest = session.store.load()?;

    println!("{} {}", "Target:".dimmed(), manifest.target.cyan());
    for reference in &manifest.references {
        let status = if reference.merged {
            "Merged".green()
        } else {
            "Not merged".red()
        };
        println!("{} {}", reference.name.cyan(), status);
    }
    if manifest.is_completed() {
        println!("{}", "Completed".green());
    }
    Ok(())
}

pub fn redo_command(session: &Session) -> Result<()> {
    let summary = remediate(multi_merge::redo(&session.context()), session)?;
    report(&summary);
    Ok(())
}

/// Add branches to the manifest and rebuild the target with the combined list
pub fn extend_command(
    session: &Session,
    target: Option<String>,
    branches: Vec<String>,
    placement: Placement,
) -> Result<()> {
    let mut manifest = session.store.load()?;
    let target = target.unwrap_or_else(|| manifest.target.clone());

    let changes = match placement {
        Placement::Append => manifest.append(&branches)?,
        Placement::Prepend => manifest.prepend(&branches)?,
    };
    if !print_changes(&changes) {
        return Ok(());
    }

    let summary = remediate(
        multi_merge::start_run(&session.context(), &target, &manifest.branch_names()),
        session,
    )?;
    report(&summary);
    Ok(())
}

/// Drop one branch from the manifest without touching the target branch
pub fn remove_command(session: &Session, branch: &str) -> Result<()> {
    let mut manifest = session.store.load()?;
    manifest.remove_reference(branch)?;
    session.store.save(&manifest)?;

    println!("Removed {} from manifest", branch.cyan());
    Ok(())
}

/// Dry-run the manifest; returns whether every branch merges cleanly
pub fn test_command(session: &Session, json: bool) -> Result<bool> {
    let pb = dry_run_spinner();
    let result = multi_merge::test(&session.context());
    pb.finish_and_clear();

    let result = match result {
        Ok(result) => result,
        Err(e) if json => TestResult::failed(&e),
        Err(e) => return Err(e.into()),
    };

    if json {
        let text =
            serde_json::to_string_pretty(&result).context("Failed to serialize test result")?;
        println!("{}", text);
    } else {
        print_test_result(&result);
    }
    Ok(result.ok)
}

fn load_existing(session: &Session) -> Result<Option<Manifest>> {
    match session.store.load() {
        Ok(manifest) => Ok(Some(manifest)),
        Err(e) if e.is_manifest_missing() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Explicit target, else the one recorded in the current manifest
fn resolve_target(explicit: Option<String>, existing: Option<&Manifest>) -> Result<String> {
    explicit
        .filter(|target| !target.is_empty())
        .or_else(|| existing.map(|manifest| manifest.target.clone()))
        .ok_or_else(|| PilaError::from(MultiMergeError::MissingTarget).into())
}

/// Print fix-up instructions for recoverable errors, then hand the error on
fn remediate<T>(result: crate::error::Result<T>, session: &Session) -> Result<T> {
    result.map_err(|e| {
        for line in remediation(&e, session.repo.remote()) {
            println!("{}", line);
        }
        anyhow::Error::from(e)
    })
}

/// Steps the user can take to fix `err`; empty when there is nothing to fix by hand
fn remediation(err: &PilaError, remote: &str) -> Vec<String> {
    if !err.is_recoverable() {
        return Vec::new();
    }

    match err {
        PilaError::MultiMerge(MultiMergeError::Conflict {
            branch,
            conflicting_files,
            ..
        }) => {
            let mut lines = vec![
                String::new(),
                "Merge conflict detected!".red().to_string(),
                String::new(),
                format!(
                    "A merge conflict occurred while merging branch {}",
                    branch.cyan()
                ),
                String::new(),
                "To resolve:".to_string(),
                "  1. Fix the conflicts in your working directory".to_string(),
            ];
            lines.extend(
                conflicting_files
                    .iter()
                    .map(|file| format!("       {}", file.red())),
            );
            lines.extend([
                format!("  2. Stage the resolved files with {}", "git add <files>".green()),
                format!(
                    "  3. Continue the multi-merge with {}",
                    "pila multi-merge continue".green()
                ),
                String::new(),
                format!(
                    "Or abort the multi-merge with {}",
                    "pila multi-merge abort".yellow()
                ),
                String::new(),
            ]);
            lines
        }
        PilaError::MultiMerge(MultiMergeError::LocalOnlyBranches { branch_names }) => {
            let mut lines = vec![
                String::new(),
                "Cannot redo: some branches only exist locally".red().to_string(),
                String::new(),
                "The following branches have no remote tracking branch:".to_string(),
            ];
            lines.extend(branch_names.iter().map(|name| format!("  - {}", name.cyan())));
            lines.extend([
                String::new(),
                "To resolve, either:".to_string(),
                "  1. Push the branch(es) to remote:".to_string(),
            ]);
            lines.extend(branch_names.iter().map(|name| {
                format!("     {}", format!("git push -u {} {}", remote, name).green())
            }));
            lines.extend([
                String::new(),
                "  2. Remove the branch(es) from the manifest:".to_string(),
            ]);
            lines.extend(branch_names.iter().map(|name| {
                format!(
                    "     {}",
                    format!("pila multi-merge remove {}", name).yellow()
                )
            }));
            lines.push(String::new());
            lines
        }
        _ => Vec::new(),
    }
}

fn report(summary: &RunSummary) {
    for name in &summary.removed {
        println!("{} {}", name.cyan(), "no longer exists, removed".yellow());
    }
    for name in &summary.merged {
        println!("{} {}", "Merged".green(), name.cyan());
    }

    if summary.is_noop() {
        note("Nothing to do, all branches are already merged");
        return;
    }

    if let Some(completion) = &summary.completion {
        println!(
            "{} {} branches merged into {}",
            "Done:".green().bold(),
            summary.manifest.references.len(),
            summary.manifest.target.cyan()
        );
        if let Some(output) = completion.hook_output.as_deref().filter(|o| !o.is_empty()) {
            println!("{}", output);
        }
        if let Some(err) = &completion.hook_error {
            eprintln!("{} {}", "Completion hook failed:".yellow(), err);
        }
    }
}

/// Returns whether anything new was added
fn print_changes(changes: &ReferenceChanges) -> bool {
    for name in &changes.duplicates {
        println!("{}", format!("{} is already in manifest, skipping", name).yellow());
    }
    if changes.added.is_empty() {
        println!("No new branches to add");
        return false;
    }
    true
}

fn print_test_result(result: &TestResult) {
    println!();
    for branch in &result.branch_results {
        let merge_type = branch
            .merge_type
            .map(|t| t.to_string())
            .unwrap_or_else(|| branch.status.to_string());
        let label = format!("({})", merge_type).dimmed();
        match branch.status {
            BranchStatus::Clean => println!("{} {}", branch.name.green(), label),
            BranchStatus::Conflict => {
                println!("{} {}", branch.name.red(), label);
                for file in &branch.conflicting_files {
                    println!("  {}", file);
                }
            }
            BranchStatus::Missing => println!("{} {}", branch.name.yellow(), label),
            BranchStatus::Error => {
                println!("{} {}", branch.name.red(), label);
                if let Some(err) = &branch.error {
                    println!("  {}", err.dimmed());
                }
            }
        }
    }
    println!();

    if result.ok {
        println!("{}", "All branches merge cleanly.".green());
    } else {
        println!("{}", "Some branches have conflicts.".red());
    }
}

fn note(message: &str) {
    println!("{}", format!("# {}", message).dimmed());
}

/// Log lines already show progress at `info`, and both would draw on stderr
fn dry_run_spinner() -> ProgressBar {
    if tracing::enabled!(tracing::Level::INFO) {
        return ProgressBar::hidden();
    }
    spinner("Testing merges...")
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
