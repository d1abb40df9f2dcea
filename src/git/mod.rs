//! git
//!
//! Single interface for all Git operations.
//!
//! # Architecture
//!
//! This module is the **ONLY doorway** to Git. All repository reads and writes
//! flow through this interface. No other module should import `git2`.
//!
//! # Responsibilities
//!
//! - Opening hosted (bare) repositories
//! - Ref operations (read, locked multi-ref CAS update)
//! - Object operations (tree merge, cherry-pick, commit, gitlink edits)
//! - Ancestry queries (merge-base, is-ancestor, rev-list)
//!
//! # Invariants
//!
//! - All ref updates use CAS (compare-and-swap) semantics under ref locks
//! - No other module calls git2 directly
//! - All operations return strong types (Oid, RefName)
//!
//! # Example
//!
//! ```ignore
//! use submit_engine::git::{Git, RefUpdate};
//!
//! let git = Git::open(path)?;
//! let old = git.resolve_ref("refs/heads/main")?;
//! let locked = git.lock_refs(&[RefUpdate {
//!     refname: RefName::new("refs/heads/main")?,
//!     old: Some(old),
//!     new: merged,
//!     message: "submit".into(),
//! }])?;
//! locked.commit()?;
//! ```

mod interface;

use std::rc::Rc;

pub use interface::{
    CommitInfo, Git, GitError, GitlinkEdit, LockedRefs, NewCommit, PathEntry, PersonIdent,
    RefEntry, RefUpdate, TreeMerge, WalkOrder,
};

use crate::core::types::ProjectName;

/// Repositories of one submit attempt, by project.
pub trait RepoAccess {
    /// The repository of `project`, opened at most once per attempt.
    fn repo(&self, project: &ProjectName) -> anyhow::Result<Rc<Git>>;
}
