//! In-memory `Vcs` for exercising the orchestrator and simulator
//!
//! Branches point at snapshot commits (path -> contents maps). Merges are
//! three-way against the tree of the merge base, so a path changed differently
//! on both sides conflicts.

#![allow(dead_code)]

use pila::error::{GitError, Result};
use pila::git::{HeadState, MergeOutcome, MergeState, RefVariants, Vcs};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;

pub type Tree = BTreeMap<String, String>;

pub const REMOTE: &str = "origin";
pub const MAIN: &str = "main";

#[derive(Debug, Clone)]
struct Commit {
    tree: Tree,
    parents: Vec<String>,
    message: String,
}

#[derive(Debug, Clone)]
enum Head {
    Branch(String),
    Detached(String),
}

#[derive(Debug, Clone)]
struct PendingMerge {
    rev: String,
    theirs: String,
    tree: Tree,
    conflicts: Vec<String>,
}

#[derive(Debug)]
struct State {
    commits: HashMap<String, Commit>,
    next_id: u64,
    local: BTreeMap<String, String>,
    remote: BTreeMap<String, String>,
    other: BTreeMap<String, String>,
    head: Head,
    merge: Option<PendingMerge>,
    calls: Vec<String>,
    failures: HashMap<String, String>,
    merge_failures: HashMap<String, String>,
    fetch_output: String,
}

/// Fake repository with a single remote, `origin`, whose default branch is `main`
pub struct FakeVcs {
    state: Mutex<State>,
}

impl Default for FakeVcs {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeVcs {
    /// Repository with `main` and `origin/main` at a root commit holding README.md
    pub fn new() -> Self {
        let mut tree = Tree::new();
        tree.insert("README.md".to_string(), "hello\n".to_string());

        let mut state = State {
            commits: HashMap::new(),
            next_id: 0,
            local: BTreeMap::new(),
            remote: BTreeMap::new(),
            other: BTreeMap::new(),
            head: Head::Branch(MAIN.to_string()),
            merge: None,
            calls: Vec::new(),
            failures: HashMap::new(),
            merge_failures: HashMap::new(),
            fetch_output: String::new(),
        };
        let root = state.new_commit(tree, vec![], "initial");
        state.local.insert(MAIN.to_string(), root.clone());
        state.remote.insert(MAIN.to_string(), root);

        Self {
            state: Mutex::new(state),
        }
    }

    // === Setup ===

    /// Branch pushed to the remote, cut from `origin/main`
    pub fn add_remote_branch(&self, name: &str, changes: &[(&str, &str)]) {
        let mut state = self.state.lock().unwrap();
        let id = state.branch_off_main(name, changes);
        state.remote.insert(name.to_string(), id);
    }

    /// Branch that exists locally and on the remote at the same commit
    pub fn add_branch(&self, name: &str, changes: &[(&str, &str)]) {
        let mut state = self.state.lock().unwrap();
        let id = state.branch_off_main(name, changes);
        state.local.insert(name.to_string(), id.clone());
        state.remote.insert(name.to_string(), id);
    }

    /// Branch that was never pushed
    pub fn add_local_branch(&self, name: &str, changes: &[(&str, &str)]) {
        let mut state = self.state.lock().unwrap();
        let id = state.branch_off_main(name, changes);
        state.local.insert(name.to_string(), id);
    }

    /// Ref under another namespace, e.g. `upstream/feature`
    pub fn add_other_ref(&self, short_name: &str, changes: &[(&str, &str)]) {
        let mut state = self.state.lock().unwrap();
        let id = state.branch_off_main(short_name, changes);
        state.other.insert(short_name.to_string(), id);
    }

    /// Tag at `origin/main`; resolves as a revision but is no branch
    pub fn add_tag(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        let id = state.remote[MAIN].clone();
        state.other.insert(name.to_string(), id);
    }

    /// Remove every form of a branch
    pub fn delete_branch(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.local.remove(name);
        state.remote.remove(name);
    }

    /// Move `origin/main` forward with a new commit
    pub fn advance_remote_main(&self, changes: &[(&str, &str)]) {
        let mut state = self.state.lock().unwrap();
        let id = state.branch_off_main("main", changes);
        state.remote.insert(MAIN.to_string(), id);
    }

    /// Make the operation fail with a `CommandFailed` error
    ///
    /// `call` is either an operation name (`"fetch"`) or a full call as
    /// recorded by `calls()` (`"checkout integration"`).
    pub fn fail_on(&self, call: &str, stderr: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(call.to_string(), stderr.to_string());
    }

    /// Make merging `rev` fail without leaving a merge behind
    pub fn fail_merge_of(&self, rev: &str, stderr: &str) {
        self.state
            .lock()
            .unwrap()
            .merge_failures
            .insert(rev.to_string(), stderr.to_string());
    }

    pub fn set_fetch_output(&self, output: &str) {
        self.state.lock().unwrap().fetch_output = output.to_string();
    }

    /// Resolve every conflict by taking the incoming side, as a user would before `git add`
    pub fn resolve_conflicts_with_theirs(&self) {
        let mut state = self.state.lock().unwrap();
        let theirs = match &state.merge {
            Some(pending) => state.commits[&pending.theirs].tree.clone(),
            None => panic!("no merge in progress"),
        };
        if let Some(pending) = state.merge.as_mut() {
            for path in std::mem::take(&mut pending.conflicts) {
                match theirs.get(&path) {
                    Some(contents) => pending.tree.insert(path, contents.clone()),
                    None => pending.tree.remove(&path),
                };
            }
        }
    }

    // === Inspection ===

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Calls whose operation is `op`
    pub fn calls_to(&self, op: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call == op || call.starts_with(&format!("{} ", op)))
            .collect()
    }

    /// Tree of a branch, remote ref or commit id
    pub fn tree_of(&self, rev: &str) -> Tree {
        let state = self.state.lock().unwrap();
        let id = state.resolve(rev).expect("unknown revision");
        state.commits[&id].tree.clone()
    }

    /// First-parent commit messages of `rev`, newest first
    pub fn log(&self, rev: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut id = state.resolve(rev);
        let mut messages = Vec::new();
        while let Some(current) = id {
            let commit = &state.commits[&current];
            messages.push(commit.message.clone());
            id = commit.parents.first().cloned();
        }
        messages
    }

    pub fn branch_exists(&self, name: &str) -> bool {
        self.state.lock().unwrap().local.contains_key(name)
    }

    pub fn is_merging(&self) -> bool {
        self.state.lock().unwrap().merge.is_some()
    }

    pub fn current_head(&self) -> HeadState {
        self.head().expect("head")
    }

    // === Internals ===

    fn record(&self, call: String) -> Result<std::sync::MutexGuard<'_, State>> {
        let mut state = self.state.lock().unwrap();
        let op = call.split_whitespace().next().unwrap_or_default().to_string();
        state.calls.push(call.clone());
        if let Some(stderr) = state
            .failures
            .get(&call)
            .or_else(|| state.failures.get(&op))
            .cloned()
        {
            return Err(GitError::CommandFailed {
                operation: call,
                stderr,
            }
            .into());
        }
        Ok(state)
    }

    fn merge_into_head(&self, rev: &str, commit: bool) -> Result<MergeOutcome> {
        let op = if commit { "merge" } else { "merge-no-commit" };
        let mut state = self.record(format!("{} {}", op, rev))?;

        if let Some(stderr) = state.merge_failures.get(rev).cloned() {
            return Ok(MergeOutcome::Failed(stderr));
        }
        if state.merge.is_some() {
            return Ok(MergeOutcome::Failed(
                "You have not concluded your merge (MERGE_HEAD exists).".to_string(),
            ));
        }
        let Some(theirs) = state.resolve(rev) else {
            return Ok(MergeOutcome::Failed(format!(
                "merge: {} - not something we can merge",
                rev
            )));
        };

        let head = state.head_commit();
        if state.is_ancestor(&theirs, &head) {
            return Ok(MergeOutcome::Merged);
        }

        let base = state.merge_base(&head, &theirs);
        let base = state.commits[&base].tree.clone();
        let ours = state.commits[&head].tree.clone();
        let incoming = state.commits[&theirs].tree.clone();
        let (tree, conflicts) = three_way(&base, &ours, &incoming);

        let pending = PendingMerge {
            rev: rev.to_string(),
            theirs: theirs.clone(),
            tree,
            conflicts,
        };
        if !pending.conflicts.is_empty() {
            state.merge = Some(pending);
            return Ok(MergeOutcome::Conflict);
        }

        if commit {
            let message = format!("Merge branch '{}'", rev);
            let id = state.new_commit(pending.tree, vec![head, theirs], &message);
            state.move_head(id);
        } else {
            state.merge = Some(pending);
        }
        Ok(MergeOutcome::Merged)
    }
}

impl State {
    fn new_commit(&mut self, tree: Tree, parents: Vec<String>, message: &str) -> String {
        self.next_id += 1;
        let id = format!("c{:03}", self.next_id);
        self.commits.insert(
            id.clone(),
            Commit {
                tree,
                parents,
                message: message.to_string(),
            },
        );
        id
    }

    fn branch_off_main(&mut self, name: &str, changes: &[(&str, &str)]) -> String {
        let base = self.remote[MAIN].clone();
        let mut tree = self.commits[&base].tree.clone();
        for (path, contents) in changes {
            tree.insert(path.to_string(), contents.to_string());
        }
        self.new_commit(tree, vec![base], &format!("work on {}", name))
    }

    fn resolve(&self, rev: &str) -> Option<String> {
        if self.commits.contains_key(rev) {
            return Some(rev.to_string());
        }
        if let Some(id) = self.local.get(rev) {
            return Some(id.clone());
        }
        if let Some(id) = rev
            .strip_prefix(&format!("{}/", REMOTE))
            .and_then(|name| self.remote.get(name))
        {
            return Some(id.clone());
        }
        self.other.get(rev).cloned()
    }

    fn head_commit(&self) -> String {
        match &self.head {
            Head::Branch(name) => self.local[name].clone(),
            Head::Detached(id) => id.clone(),
        }
    }

    fn move_head(&mut self, id: String) {
        match &self.head {
            Head::Branch(name) => {
                let name = name.clone();
                self.local.insert(name, id);
            }
            Head::Detached(_) => self.head = Head::Detached(id),
        }
    }

    fn is_ancestor(&self, ancestor: &str, of: &str) -> bool {
        let mut stack = vec![of.to_string()];
        while let Some(id) = stack.pop() {
            if id == ancestor {
                return true;
            }
            stack.extend(self.commits[&id].parents.iter().cloned());
        }
        false
    }

    /// Nearest common ancestor; every fake history shares the root commit
    fn merge_base(&self, ours: &str, theirs: &str) -> String {
        let mut ancestors = HashSet::new();
        let mut stack = vec![ours.to_string()];
        while let Some(id) = stack.pop() {
            stack.extend(self.commits[&id].parents.iter().cloned());
            ancestors.insert(id);
        }

        let mut queue = VecDeque::from([theirs.to_string()]);
        while let Some(id) = queue.pop_front() {
            if ancestors.contains(&id) {
                return id;
            }
            queue.extend(self.commits[&id].parents.iter().cloned());
        }
        panic!("{} and {} share no history", ours, theirs)
    }

    fn fail(&self, operation: String, stderr: &str) -> pila::Error {
        GitError::CommandFailed {
            operation,
            stderr: stderr.to_string(),
        }
        .into()
    }
}

/// Merge `ours` and `theirs` against `base`; paths changed differently on both sides conflict
fn three_way(base: &Tree, ours: &Tree, theirs: &Tree) -> (Tree, Vec<String>) {
    let mut paths: Vec<&String> = base.keys().chain(ours.keys()).chain(theirs.keys()).collect();
    paths.sort();
    paths.dedup();

    let mut merged = Tree::new();
    let mut conflicts = Vec::new();
    for path in paths {
        let (b, o, t) = (base.get(path), ours.get(path), theirs.get(path));
        let result = if o == t || t == b {
            o
        } else if o == b {
            t
        } else {
            conflicts.push(path.clone());
            o
        };
        if let Some(contents) = result {
            merged.insert(path.clone(), contents.clone());
        }
    }
    (merged, conflicts)
}

impl Vcs for FakeVcs {
    fn remote(&self) -> &str {
        REMOTE
    }

    fn fetch(&self) -> Result<String> {
        let state = self.record("fetch".to_string())?;
        Ok(state.fetch_output.clone())
    }

    fn head(&self) -> Result<HeadState> {
        let state = self.state.lock().unwrap();
        Ok(match &state.head {
            Head::Branch(name) => HeadState::Branch(name.clone()),
            Head::Detached(id) => HeadState::Detached(id.clone()),
        })
    }

    fn main_branch(&self) -> Result<String> {
        Ok(MAIN.to_string())
    }

    fn resolve_commit(&self, rev: &str) -> Result<Option<String>> {
        Ok(self.state.lock().unwrap().resolve(rev))
    }

    fn checkout(&self, branch: &str) -> Result<()> {
        let mut state = self.record(format!("checkout {}", branch))?;
        if state.merge.is_some() {
            return Err(state.fail(format!("checkout {}", branch), "you need to resolve your current index first"));
        }
        if state.local.contains_key(branch) {
            state.head = Head::Branch(branch.to_string());
            return Ok(());
        }
        match state.resolve(branch) {
            Some(id) => {
                state.head = Head::Detached(id);
                Ok(())
            }
            None => Err(state.fail(
                format!("checkout {}", branch),
                &format!("pathspec '{}' did not match any file(s) known to git", branch),
            )),
        }
    }

    fn checkout_new(&self, branch: &str, start_point: &str) -> Result<()> {
        let mut state = self.record(format!("checkout-new {} {}", branch, start_point))?;
        if state.local.contains_key(branch) {
            return Err(state.fail(
                format!("checkout -b {}", branch),
                &format!("a branch named '{}' already exists", branch),
            ));
        }
        let Some(id) = state.resolve(start_point) else {
            return Err(state.fail(format!("checkout -b {}", branch), "invalid reference"));
        };
        state.local.insert(branch.to_string(), id);
        state.head = Head::Branch(branch.to_string());
        Ok(())
    }

    fn checkout_detached(&self, rev: &str) -> Result<()> {
        let mut state = self.record(format!("checkout-detached {}", rev))?;
        match state.resolve(rev) {
            Some(id) => {
                state.head = Head::Detached(id);
                Ok(())
            }
            None => Err(state.fail(format!("checkout --detach {}", rev), "invalid reference")),
        }
    }

    fn reset_hard(&self, rev: &str) -> Result<()> {
        let mut state = self.record(format!("reset-hard {}", rev))?;
        let Some(id) = state.resolve(rev) else {
            return Err(state.fail(format!("reset --hard {}", rev), "unknown revision"));
        };
        state.merge = None;
        state.move_head(id);
        Ok(())
    }

    fn merge(&self, rev: &str) -> Result<MergeOutcome> {
        self.merge_into_head(rev, true)
    }

    fn merge_no_commit(&self, rev: &str) -> Result<MergeOutcome> {
        self.merge_into_head(rev, false)
    }

    fn abort_merge(&self) -> Result<()> {
        let mut state = self.record("abort-merge".to_string())?;
        if state.merge.take().is_none() {
            return Err(state.fail("merge --abort".to_string(), "There is no merge to abort (MERGE_HEAD missing)."));
        }
        Ok(())
    }

    fn stage(&self, path: &Path) -> Result<()> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        self.record(format!("stage {}", name)).map(drop)
    }

    fn commit(&self, message: &str) -> Result<()> {
        let mut state = self.record(format!("commit {}", message))?;
        let head = state.head_commit();

        let id = match state.merge.take() {
            Some(pending) if !pending.conflicts.is_empty() => {
                let err = state.fail(
                    "commit".to_string(),
                    "Committing is not possible because you have unmerged files.",
                );
                state.merge = Some(pending);
                return Err(err);
            }
            Some(pending) => state.new_commit(pending.tree, vec![head, pending.theirs], message),
            None => {
                let tree = state.commits[&head].tree.clone();
                state.new_commit(tree, vec![head], message)
            }
        };
        state.move_head(id);
        Ok(())
    }

    fn conflicting_files(&self) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .merge
            .as_ref()
            .map(|pending| pending.conflicts.clone())
            .unwrap_or_default())
    }

    fn merge_state(&self) -> Result<MergeState> {
        let state = self.state.lock().unwrap();
        Ok(match &state.merge {
            Some(pending) => {
                let mut message = format!("Merge branch '{}'\n", pending.rev);
                if !pending.conflicts.is_empty() {
                    message.push_str("\n# Conflicts:\n");
                    for path in &pending.conflicts {
                        message.push_str(&format!("#\t{}\n", path));
                    }
                }
                MergeState::InProgress {
                    branch: pending.rev.clone(),
                    message,
                }
            }
            None => MergeState::NoMerge,
        })
    }

    fn ref_variants(&self, name: &str) -> Result<RefVariants> {
        let state = self.state.lock().unwrap();
        let suffix = format!("/{}", name);
        Ok(RefVariants {
            local: state.local.contains_key(name).then(|| name.to_string()),
            remote: state
                .remote
                .contains_key(name)
                .then(|| format!("{}/{}", REMOTE, name)),
            other: state
                .other
                .keys()
                .filter(|other| other.ends_with(&suffix))
                .cloned()
                .collect(),
        })
    }
}
