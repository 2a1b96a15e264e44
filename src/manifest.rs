//! Multi-merge manifest: the persisted progress of a run
//!
//! The manifest lives in the repository root so that it survives restarts and
//! paused conflicts, and is committed onto the target branch once every
//! reference is merged.

use crate::error::{Error, IoError, ManifestError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// File name of the manifest, relative to the repository root
pub const MANIFEST_FILENAME: &str = ".pila_multi_merge.toml";

const MANIFEST_HEADER: &str =
    "# pila multi-merge manifest\n# Auto-generated - edit with 'pila multi-merge append|prepend|remove'\n\n";

/// Largest edit distance for which a "did you mean" suggestion is offered
const SUGGESTION_MAX_DISTANCE: usize = 3;

/// How the references of a manifest were selected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestKind {
    Branches,
    Labels,
}

impl fmt::Display for ManifestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestKind::Branches => write!(f, "branches"),
            ManifestKind::Labels => write!(f, "labels"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Commit the target branch was based on when the run started
    pub main_sha: String,
    /// Integration branch receiving the merges
    pub target: String,
    #[serde(rename = "type")]
    pub kind: ManifestKind,
    /// Set once the completion commit and hook have run for this generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Merge order is list order
    #[serde(default)]
    pub references: Vec<Reference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub name: String,
    #[serde(default)]
    pub merged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Reference {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            merged: false,
            note: None,
        }
    }
}

/// Outcome of adding branches to an existing manifest
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceChanges {
    /// Names that were added, in the order they now appear
    pub added: Vec<String>,
    /// Names skipped because the manifest already held them
    pub duplicates: Vec<String>,
}

impl Manifest {
    /// Create a manifest with every reference pending
    pub fn new(
        main_sha: impl Into<String>,
        target: impl Into<String>,
        kind: ManifestKind,
        names: &[String],
    ) -> Self {
        Self {
            main_sha: main_sha.into(),
            target: target.into(),
            kind,
            completed_at: None,
            references: names.iter().map(Reference::new).collect(),
        }
    }

    /// Are all references merged
    pub fn is_done(&self) -> bool {
        self.references.iter().all(|reference| reference.merged)
    }

    /// Has the completion sequence already run for this manifest
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Index of the first reference that still needs merging
    pub fn next_pending(&self) -> Option<usize> {
        self.references.iter().position(|reference| !reference.merged)
    }

    /// Names of references not merged yet, in merge order
    pub fn pending(&self) -> Vec<&str> {
        self.references
            .iter()
            .filter(|reference| !reference.merged)
            .map(|reference| reference.name.as_str())
            .collect()
    }

    pub fn branch_names(&self) -> Vec<String> {
        self.references
            .iter()
            .map(|reference| reference.name.clone())
            .collect()
    }

    /// Mark all references as un-merged and forget any completion
    pub fn reset(&mut self) {
        for reference in &mut self.references {
            reference.merged = false;
        }
        self.completed_at = None;
    }

    /// Add branches after the existing references
    pub fn append(&mut self, names: &[String]) -> Result<ReferenceChanges> {
        let changes = self.filter_new(names)?;
        self.references
            .extend(changes.added.iter().map(Reference::new));
        Ok(changes)
    }

    /// Add branches before the existing references
    pub fn prepend(&mut self, names: &[String]) -> Result<ReferenceChanges> {
        let changes = self.filter_new(names)?;
        let mut references: Vec<Reference> = changes.added.iter().map(Reference::new).collect();
        references.append(&mut self.references);
        self.references = references;
        Ok(changes)
    }

    /// Drop a single reference by name
    ///
    /// Fails without touching the manifest when the name is not present.
    pub fn remove_reference(&mut self, name: &str) -> Result<Reference> {
        match self.references.iter().position(|reference| reference.name == name) {
            Some(index) => Ok(self.references.remove(index)),
            None => Err(Error::Manifest(ManifestError::ReferenceNotFound {
                name: name.to_string(),
                suggestion: self.closest_name(name),
            })),
        }
    }

    fn filter_new(&self, names: &[String]) -> Result<ReferenceChanges> {
        if self.kind != ManifestKind::Branches {
            return Err(Error::Manifest(ManifestError::KindMismatch {
                expected: ManifestKind::Branches.to_string(),
                actual: self.kind.to_string(),
            }));
        }

        let mut changes = ReferenceChanges::default();
        for name in names {
            let known = self.references.iter().any(|reference| &reference.name == name)
                || changes.added.contains(name);
            if known {
                changes.duplicates.push(name.clone());
            } else {
                changes.added.push(name.clone());
            }
        }
        Ok(changes)
    }

    fn closest_name(&self, name: &str) -> Option<String> {
        self.references
            .iter()
            .map(|reference| {
                (
                    edit_distance::edit_distance(name, &reference.name),
                    &reference.name,
                )
            })
            .filter(|(distance, _)| *distance <= SUGGESTION_MAX_DISTANCE)
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, candidate)| candidate.clone())
    }
}

/// Reads and writes the manifest file
#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    /// Store backed by an explicit file path
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store for the manifest in the root of a working tree
    pub fn in_repo(repo_root: &Path) -> Self {
        Self::at(repo_root.join(MANIFEST_FILENAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the manifest, failing with `ManifestError::NotFound` when absent
    pub fn load(&self) -> Result<Manifest> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::Manifest(ManifestError::NotFound(
                    self.path.display().to_string(),
                )));
            }
            Err(source) => {
                return Err(Error::Io(IoError::ReadFailed {
                    path: self.path.display().to_string(),
                    source,
                }));
            }
        };

        toml::from_str(&contents).map_err(|e| {
            Error::Manifest(ManifestError::Parse {
                path: self.path.display().to_string(),
                details: e.to_string(),
            })
        })
    }

    /// Save manifest to file atomically, overwriting any previous version
    pub fn save(&self, manifest: &Manifest) -> Result<()> {
        let body = toml::to_string_pretty(manifest)
            .map_err(|e| Error::Manifest(ManifestError::Serialize(e.to_string())))?;

        // Write atomically: write to temp file, then rename
        let temp_path = self.path.with_extension("toml.tmp");
        fs::write(&temp_path, format!("{MANIFEST_HEADER}{body}")).map_err(|source| {
            Error::Io(IoError::WriteFailed {
                path: temp_path.display().to_string(),
                source,
            })
        })?;

        fs::rename(&temp_path, &self.path).map_err(|source| {
            Error::Io(IoError::WriteFailed {
                path: self.path.display().to_string(),
                source,
            })
        })?;

        Ok(())
    }

    /// Delete the manifest file; a missing file is not an error
    pub fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Error::Io(IoError::WriteFailed {
                path: self.path.display().to_string(),
                source,
            })),
        }
    }
}
