//! git::interface
//!
//! Git interface implementation using git2.
//!
//! This module provides the **single doorway** to all Git operations in the
//! engine. All repository reads, object writes and ref updates flow through
//! this interface, which provides structured results and normalizes errors
//! into typed failure categories.
//!
//! # Architecture
//!
//! The `Git` struct is the only way to interact with a Git repository.
//! No other module should import `git2` directly. This ensures:
//!
//! - Consistent error handling across all Git operations
//! - Strong type guarantees at the boundary
//! - CAS (compare-and-swap) semantics for all ref mutations
//!
//! # Object writes vs ref writes
//!
//! Merge, cherry-pick and gitlink operations only ever create new objects.
//! Objects that no ref ends up pointing at are harmless garbage, so
//! strategies may write freely while planning. Refs are only moved through
//! [`Git::lock_refs`], which verifies every expected old value under lock.
//!
//! # Error Handling
//!
//! Git errors are categorized into typed variants:
//! - [`GitError::NotARepo`]: No repository at the given path
//! - [`GitError::RefNotFound`]: Requested ref does not exist
//! - [`GitError::CasFailed`]: Compare-and-swap precondition failed
//! - [`GitError::Locked`]: Another writer holds a ref lock
//!
//! # Example
//!
//! ```ignore
//! use submit_engine::git::Git;
//! use std::path::Path;
//!
//! let git = Git::open(Path::new("/srv/git/platform/core.git"))?;
//! let oid = git.resolve_ref("refs/heads/main")?;
//! println!("main is at {}", oid.short(7));
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::core::types::{Oid, RefName, TypeError};

/// File mode git uses for submodule entries.
const GITLINK_MODE: i32 = 0o160000;

/// Errors from Git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// No repository at the given path.
    #[error("not a git repository: {path}")]
    NotARepo {
        /// The path that was opened
        path: PathBuf,
    },

    /// Requested ref does not exist.
    #[error("ref not found: {refname}")]
    RefNotFound {
        /// The ref that was not found
        refname: String,
    },

    /// Compare-and-swap precondition failed.
    ///
    /// The ref moved between planning and execution.
    #[error("CAS failed for {refname}: expected {expected}, found {actual}")]
    CasFailed {
        /// The ref being updated
        refname: String,
        /// The expected old value
        expected: String,
        /// The actual current value
        actual: String,
    },

    /// A ref lock is held by another writer.
    #[error("ref is locked: {refname}")]
    Locked {
        /// The ref that could not be locked
        refname: String,
    },

    /// Object not found in repository.
    #[error("object not found: {oid}")]
    ObjectNotFound {
        /// The OID that was not found
        oid: String,
    },

    /// Invalid object id format.
    #[error("invalid object id: {oid}")]
    InvalidOid {
        /// The invalid OID string
        oid: String,
    },

    /// Invalid ref name format.
    #[error("invalid ref name: {message}")]
    InvalidRefName {
        /// Description of the problem
        message: String,
    },

    /// Blob content is not valid UTF-8.
    #[error("blob is not valid UTF-8: {path}")]
    InvalidUtf8 {
        /// Path of the blob in its tree
        path: String,
    },

    /// Internal git2 error.
    #[error("git error: {message}")]
    Internal {
        /// The error message
        message: String,
    },
}

impl GitError {
    /// Create a GitError from a git2::Error with richer context.
    fn from_git2(err: git2::Error, context: &str) -> Self {
        match err.code() {
            git2::ErrorCode::NotFound => {
                if context.starts_with("refs/") {
                    GitError::RefNotFound {
                        refname: context.to_string(),
                    }
                } else {
                    GitError::ObjectNotFound {
                        oid: context.to_string(),
                    }
                }
            }
            git2::ErrorCode::InvalidSpec => GitError::InvalidOid {
                oid: context.to_string(),
            },
            git2::ErrorCode::Locked => GitError::Locked {
                refname: context.to_string(),
            },
            _ => GitError::Internal {
                message: format!("{}: {}", context, err.message()),
            },
        }
    }

    /// Whether retrying against fresh repository state may succeed.
    pub fn is_lock_failure(&self) -> bool {
        matches!(self, GitError::CasFailed { .. } | GitError::Locked { .. })
    }
}

impl From<git2::Error> for GitError {
    fn from(err: git2::Error) -> Self {
        match err.code() {
            git2::ErrorCode::Locked => GitError::Locked {
                refname: err.message().to_string(),
            },
            _ => GitError::Internal {
                message: err.message().to_string(),
            },
        }
    }
}

impl From<TypeError> for GitError {
    fn from(err: TypeError) -> Self {
        match err {
            TypeError::InvalidOid(msg) => GitError::InvalidOid { oid: msg },
            other => GitError::InvalidRefName {
                message: other.to_string(),
            },
        }
    }
}

/// A ref and the commit it points to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefEntry {
    pub name: RefName,
    pub oid: Oid,
}

/// Author or committer identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonIdent {
    pub name: String,
    pub email: String,
    pub when: DateTime<Utc>,
}

impl PersonIdent {
    pub fn new(name: impl Into<String>, email: impl Into<String>, when: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            when,
        }
    }

    /// Same person, different timestamp.
    pub fn at(&self, when: DateTime<Utc>) -> Self {
        Self {
            when,
            ..self.clone()
        }
    }

    /// Whether two identities name the same person, ignoring time.
    pub fn same_person(&self, other: &PersonIdent) -> bool {
        self.name == other.name && self.email == other.email
    }
}

/// Information about a commit.
#[derive(Debug, Clone)]
pub struct CommitInfo {
    /// The commit OID
    pub oid: Oid,
    /// Tree of the commit
    pub tree: Oid,
    /// Parents in order
    pub parents: Vec<Oid>,
    /// First line of the commit message
    pub summary: String,
    /// Full commit message
    pub message: String,
    pub author: PersonIdent,
    pub committer: PersonIdent,
}

/// Everything needed to write a commit object.
#[derive(Debug, Clone)]
pub struct NewCommit {
    pub tree: Oid,
    pub parents: Vec<Oid>,
    pub author: PersonIdent,
    pub committer: PersonIdent,
    pub message: String,
}

/// Outcome of a tree-level merge or cherry-pick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeMerge {
    /// Merge succeeded; the resulting tree.
    Clean(Oid),
    /// Paths that could not be merged automatically.
    Conflict(Vec<String>),
    /// The two commits share no history.
    NoMergeBase,
}

/// What a tree holds at a given path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathEntry {
    Missing,
    Gitlink(Oid),
    Other,
}

/// A single gitlink edit; `None` removes the entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitlinkEdit {
    pub path: String,
    pub target: Option<Oid>,
}

/// Traversal order for [`Git::rev_list`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkOrder {
    /// Children before parents.
    NewestFirst,
    /// Parents before children.
    OldestFirst,
}

/// A requested ref update with its CAS precondition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub refname: RefName,
    /// Expected current value; `None` means the ref must not exist.
    pub old: Option<Oid>,
    pub new: Oid,
    pub message: String,
}

/// Refs locked and verified, ready to be written.
///
/// Dropping the value without calling [`LockedRefs::commit`] releases
/// every lock and leaves the refs untouched.
pub struct LockedRefs<'repo> {
    tx: git2::Transaction<'repo>,
    count: usize,
}

impl LockedRefs<'_> {
    /// Number of refs held.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Write all staged updates and release the locks.
    pub fn commit(mut self) -> Result<(), GitError> {
        self.tx.commit().map_err(|e| GitError::from_git2(e, "ref transaction"))
    }
}

/// The Git interface.
///
/// This is the **single point of interaction** with Git. All repository
/// reads and writes flow through this interface.
///
/// # CAS Semantics
///
/// Ref mutations only succeed if each ref's current value matches the
/// expected value, checked while the ref is locked.
pub struct Git {
    /// The underlying git2 repository
    repo: git2::Repository,
}

impl std::fmt::Debug for Git {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Git")
            .field("path", &self.repo.path())
            .finish()
    }
}

fn to_git2(oid: &Oid) -> Result<git2::Oid, GitError> {
    git2::Oid::from_str(oid.as_str()).map_err(|e| GitError::from_git2(e, oid.as_str()))
}

fn from_git2(oid: git2::Oid) -> Result<Oid, GitError> {
    Oid::new(oid.to_string()).map_err(Into::into)
}

fn ident_from(sig: &git2::Signature<'_>) -> PersonIdent {
    let when = DateTime::from_timestamp(sig.when().seconds(), 0).unwrap_or(DateTime::UNIX_EPOCH);
    PersonIdent {
        name: sig.name().unwrap_or("").to_string(),
        email: sig.email().unwrap_or("").to_string(),
        when,
    }
}

fn signature(ident: &PersonIdent) -> Result<git2::Signature<'static>, GitError> {
    let time = git2::Time::new(ident.when.timestamp(), 0);
    git2::Signature::new(&ident.name, &ident.email, &time)
        .map_err(|e| GitError::from_git2(e, "signature"))
}

impl Git {
    // =========================================================================
    // Repository Opening
    // =========================================================================

    /// Open the repository at exactly `path`. Bare repositories are expected.
    ///
    /// # Errors
    ///
    /// - [`GitError::NotARepo`] if no repository is found
    pub fn open(path: &Path) -> Result<Self, GitError> {
        let repo = git2::Repository::open(path).map_err(|_| GitError::NotARepo {
            path: path.to_path_buf(),
        })?;
        Ok(Self { repo })
    }

    /// Create a new bare repository at `path`.
    pub fn init_bare(path: &Path) -> Result<Self, GitError> {
        let repo = git2::Repository::init_bare(path).map_err(|e| GitError::Internal {
            message: format!("{}: {}", path.display(), e.message()),
        })?;
        Ok(Self { repo })
    }

    /// Path of the git directory.
    pub fn path(&self) -> &Path {
        self.repo.path()
    }

    // =========================================================================
    // Ref Resolution
    // =========================================================================

    /// Resolve a ref to the commit it points at.
    ///
    /// # Errors
    ///
    /// - [`GitError::RefNotFound`] if the ref doesn't exist
    pub fn resolve_ref(&self, refname: &str) -> Result<Oid, GitError> {
        let reference = self
            .repo
            .find_reference(refname)
            .map_err(|e| GitError::from_git2(e, refname))?;
        let commit = reference
            .peel_to_commit()
            .map_err(|e| GitError::from_git2(e, refname))?;
        from_git2(commit.id())
    }

    /// Resolve a ref, returning None if it doesn't exist.
    pub fn try_resolve_ref(&self, refname: &str) -> Result<Option<Oid>, GitError> {
        match self.resolve_ref(refname) {
            Ok(oid) => Ok(Some(oid)),
            Err(GitError::RefNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// List all refs matching a prefix, skipping refs that do not peel to commits.
    pub fn list_refs_by_prefix(&self, prefix: &str) -> Result<Vec<RefEntry>, GitError> {
        let pattern = format!("{}*", prefix);
        let refs = self
            .repo
            .references_glob(&pattern)
            .map_err(|e| GitError::from_git2(e, prefix))?;

        let mut entries = Vec::new();
        for reference in refs {
            let reference = reference?;
            let Some(name) = reference.name() else {
                continue;
            };
            let Ok(name) = RefName::new(name) else {
                continue;
            };
            let Ok(commit) = reference.peel_to_commit() else {
                continue;
            };
            entries.push(RefEntry {
                name,
                oid: from_git2(commit.id())?,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// All branch tips of the repository.
    pub fn branch_tips(&self) -> Result<Vec<RefEntry>, GitError> {
        self.list_refs_by_prefix(RefName::HEADS)
    }

    // =========================================================================
    // CAS Ref Operations
    // =========================================================================

    /// Lock every ref in `updates` and verify its expected old value.
    ///
    /// No ref is modified until [`LockedRefs::commit`] is called.
    ///
    /// # Errors
    ///
    /// - [`GitError::Locked`] if another writer holds one of the refs
    /// - [`GitError::CasFailed`] if a ref no longer has its expected value
    pub fn lock_refs(&self, updates: &[RefUpdate]) -> Result<LockedRefs<'_>, GitError> {
        let mut tx = self.repo.transaction()?;
        for update in updates {
            let name = update.refname.as_str();
            tx.lock_ref(name).map_err(|e| match e.code() {
                git2::ErrorCode::Locked | git2::ErrorCode::Exists => GitError::Locked {
                    refname: name.to_string(),
                },
                _ => GitError::from_git2(e, name),
            })?;

            let current = self.try_resolve_raw(name)?;
            if current.as_ref() != update.old.as_ref() {
                return Err(GitError::CasFailed {
                    refname: name.to_string(),
                    expected: update
                        .old
                        .as_ref()
                        .map_or("<none>".to_string(), Oid::to_string),
                    actual: current.map_or("<none>".to_string(), |o| o.to_string()),
                });
            }
            tx.set_target(name, to_git2(&update.new)?, None, &update.message)
                .map_err(|e| GitError::from_git2(e, name))?;
        }
        Ok(LockedRefs {
            tx,
            count: updates.len(),
        })
    }

    /// Direct target of a ref without peeling.
    fn try_resolve_raw(&self, refname: &str) -> Result<Option<Oid>, GitError> {
        match self.repo.find_reference(refname) {
            Ok(reference) => {
                let resolved = reference.resolve().unwrap_or(reference);
                let oid = resolved.target().ok_or_else(|| GitError::Internal {
                    message: format!("ref {} has no target", refname),
                })?;
                Ok(Some(from_git2(oid)?))
            }
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(GitError::from_git2(e, refname)),
        }
    }

    // =========================================================================
    // Ancestry Queries
    // =========================================================================

    /// Find the merge base (common ancestor) of two commits.
    ///
    /// Returns `None` if there is no common ancestor.
    pub fn merge_base(&self, oid1: &Oid, oid2: &Oid) -> Result<Option<Oid>, GitError> {
        match self.repo.merge_base(to_git2(oid1)?, to_git2(oid2)?) {
            Ok(oid) => Ok(Some(from_git2(oid)?)),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Check if `ancestor` is an ancestor of `descendant`.
    ///
    /// Returns true if ancestor == descendant (a commit is its own ancestor).
    pub fn is_ancestor(&self, ancestor: &Oid, descendant: &Oid) -> Result<bool, GitError> {
        if ancestor == descendant {
            return Ok(true);
        }
        self.repo
            .graph_descendant_of(to_git2(descendant)?, to_git2(ancestor)?)
            .map_err(Into::into)
    }

    /// Commits reachable from `include` but not from `exclude`.
    pub fn rev_list(
        &self,
        include: &[Oid],
        exclude: &[Oid],
        order: WalkOrder,
    ) -> Result<Vec<Oid>, GitError> {
        let mut walk = self.repo.revwalk()?;
        let sorting = match order {
            WalkOrder::NewestFirst => git2::Sort::TOPOLOGICAL,
            WalkOrder::OldestFirst => git2::Sort::TOPOLOGICAL | git2::Sort::REVERSE,
        };
        walk.set_sorting(sorting)?;
        for oid in include {
            walk.push(to_git2(oid)?)
                .map_err(|e| GitError::from_git2(e, oid.as_str()))?;
        }
        for oid in exclude {
            walk.hide(to_git2(oid)?)
                .map_err(|e| GitError::from_git2(e, oid.as_str()))?;
        }
        walk.map(|r| r.map_err(GitError::from).and_then(from_git2))
            .collect()
    }

    // =========================================================================
    // Commit Information
    // =========================================================================

    /// Get information about a commit.
    ///
    /// # Errors
    ///
    /// - [`GitError::ObjectNotFound`] if the commit doesn't exist
    pub fn commit_info(&self, oid: &Oid) -> Result<CommitInfo, GitError> {
        let commit = self.find_commit(oid)?;
        let parents = commit
            .parent_ids()
            .map(from_git2)
            .collect::<Result<Vec<_>, _>>()?;
        let info = CommitInfo {
            oid: oid.clone(),
            tree: from_git2(commit.tree_id())?,
            parents,
            summary: commit.summary().unwrap_or("").to_string(),
            message: commit.message().unwrap_or("").to_string(),
            author: ident_from(&commit.author()),
            committer: ident_from(&commit.committer()),
        };
        Ok(info)
    }

    fn find_commit(&self, oid: &Oid) -> Result<git2::Commit<'_>, GitError> {
        self.repo
            .find_commit(to_git2(oid)?)
            .map_err(|e| GitError::from_git2(e, oid.as_str()))
    }

    /// Write a commit object without moving any ref.
    pub fn create_commit(&self, spec: &NewCommit) -> Result<Oid, GitError> {
        let tree = self
            .repo
            .find_tree(to_git2(&spec.tree)?)
            .map_err(|e| GitError::from_git2(e, spec.tree.as_str()))?;
        let parents = spec
            .parents
            .iter()
            .map(|p| self.find_commit(p))
            .collect::<Result<Vec<_>, _>>()?;
        let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();
        let oid = self.repo.commit(
            None,
            &signature(&spec.author)?,
            &signature(&spec.committer)?,
            &spec.message,
            &tree,
            &parent_refs,
        )?;
        from_git2(oid)
    }

    // =========================================================================
    // Merging
    // =========================================================================

    /// Three-way merge of two commits at the tree level.
    ///
    /// With `content_merge` disabled, any path modified on both sides is a
    /// conflict even if the edits would combine cleanly.
    pub fn merge_trees(
        &self,
        ours: &Oid,
        theirs: &Oid,
        content_merge: bool,
    ) -> Result<TreeMerge, GitError> {
        let Some(base) = self.merge_base(ours, theirs)? else {
            return Ok(TreeMerge::NoMergeBase);
        };
        if !content_merge {
            let overlap = self.paths_touched_by_both(&base, ours, theirs)?;
            if !overlap.is_empty() {
                return Ok(TreeMerge::Conflict(overlap));
            }
        }
        let ours_commit = self.find_commit(ours)?;
        let theirs_commit = self.find_commit(theirs)?;
        let index = self
            .repo
            .merge_commits(&ours_commit, &theirs_commit, None)?;
        self.finish_index(index)
    }

    /// Apply the change introduced by `commit` on top of `onto`.
    ///
    /// `commit` must have exactly one parent.
    pub fn cherry_pick(
        &self,
        commit: &Oid,
        onto: &Oid,
        content_merge: bool,
    ) -> Result<TreeMerge, GitError> {
        let pick = self.find_commit(commit)?;
        if !content_merge {
            let parent = from_git2(pick.parent_id(0)?)?;
            let overlap = self.paths_touched_by_both(&parent, onto, commit)?;
            if !overlap.is_empty() {
                return Ok(TreeMerge::Conflict(overlap));
            }
        }
        let ours = self.find_commit(onto)?;
        let index = self.repo.cherrypick_commit(&pick, &ours, 0, None)?;
        self.finish_index(index)
    }

    fn finish_index(&self, mut index: git2::Index) -> Result<TreeMerge, GitError> {
        if index.has_conflicts() {
            let mut paths = BTreeSet::new();
            for conflict in index.conflicts()? {
                let conflict = conflict?;
                let entry = conflict
                    .our
                    .or(conflict.their)
                    .or(conflict.ancestor);
                if let Some(entry) = entry {
                    paths.insert(String::from_utf8_lossy(&entry.path).into_owned());
                }
            }
            return Ok(TreeMerge::Conflict(paths.into_iter().collect()));
        }
        let tree = index.write_tree_to(&self.repo)?;
        Ok(TreeMerge::Clean(from_git2(tree)?))
    }

    /// Paths changed both between `base` and `ours` and between `base` and `theirs`.
    fn paths_touched_by_both(
        &self,
        base: &Oid,
        ours: &Oid,
        theirs: &Oid,
    ) -> Result<Vec<String>, GitError> {
        let ours = self.changed_paths(base, ours)?;
        let theirs = self.changed_paths(base, theirs)?;
        Ok(ours.intersection(&theirs).cloned().collect())
    }

    fn changed_paths(&self, from: &Oid, to: &Oid) -> Result<BTreeSet<String>, GitError> {
        let old = self.find_commit(from)?.tree()?;
        let new = self.find_commit(to)?.tree()?;
        let diff = self.repo.diff_tree_to_tree(Some(&old), Some(&new), None)?;
        let mut paths = BTreeSet::new();
        for delta in diff.deltas() {
            for file in [delta.old_file(), delta.new_file()] {
                if let Some(path) = file.path() {
                    paths.insert(path.to_string_lossy().into_owned());
                }
            }
        }
        Ok(paths)
    }

    // =========================================================================
    // Trees and Gitlinks
    // =========================================================================

    /// Inspect the entry at `path` in the tree of `commit`.
    pub fn path_entry(&self, commit: &Oid, path: &str) -> Result<PathEntry, GitError> {
        let tree = self.find_commit(commit)?.tree()?;
        let found = tree.get_path(Path::new(path));
        match found {
            Ok(entry) if entry.filemode() == GITLINK_MODE => {
                Ok(PathEntry::Gitlink(from_git2(entry.id())?))
            }
            Ok(_) => Ok(PathEntry::Other),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(PathEntry::Missing),
            Err(e) => Err(GitError::from_git2(e, path)),
        }
    }

    /// Apply gitlink edits to a tree and write the result.
    pub fn edit_gitlinks(&self, tree: &Oid, edits: &[GitlinkEdit]) -> Result<Oid, GitError> {
        let baseline = self
            .repo
            .find_tree(to_git2(tree)?)
            .map_err(|e| GitError::from_git2(e, tree.as_str()))?;
        let mut builder = git2::build::TreeUpdateBuilder::new();
        for edit in edits {
            match &edit.target {
                Some(target) => {
                    builder.upsert(edit.path.as_str(), to_git2(target)?, git2::FileMode::Commit);
                }
                None => {
                    builder.remove(edit.path.as_str());
                }
            }
        }
        let oid = builder.create_updated(&self.repo, &baseline)?;
        from_git2(oid)
    }

    /// Read a UTF-8 file from the tree of `commit`.
    ///
    /// Returns `None` if the path does not exist or is not a file.
    pub fn read_file(&self, commit: &Oid, path: &str) -> Result<Option<String>, GitError> {
        let tree = self.find_commit(commit)?.tree()?;
        let entry = match tree.get_path(Path::new(path)) {
            Ok(entry) => entry,
            Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(GitError::from_git2(e, path)),
        };
        if entry.kind() != Some(git2::ObjectType::Blob) {
            return Ok(None);
        }
        let blob = self.repo.find_blob(entry.id())?;
        String::from_utf8(blob.content().to_vec())
            .map(Some)
            .map_err(|_| GitError::InvalidUtf8 {
                path: path.to_string(),
            })
    }
}
