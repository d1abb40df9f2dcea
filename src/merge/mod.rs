//! merge
//!
//! Per-branch integration of submitted commits.
//!
//! # Architecture
//!
//! A branch run goes through three stages:
//!
//! 1. [`sorter`] orders the submitted commits and rejects those whose
//!    ancestry reaches commits that are not being submitted
//! 2. [`strategy`] walks the sorted commits according to the branch's
//!    submit type, advancing a [`tip::MergeTip`] and writing any new commit
//!    objects (merges, picks, rebases)
//! 3. The resulting [`op::CommitOp`] descriptors are collected into the
//!    attempt-wide [`commit_status::CommitStatus`] ledger
//!
//! Nothing in this module moves a ref. New objects written while planning
//! only become visible once the batch executor updates the refs.
//!
//! # Invariants
//!
//! - A per-commit failure is a value ([`MergeStatus`](crate::core::status::MergeStatus)),
//!   never an early return; sibling commits keep going
//! - The tip of a branch only moves to descendants of its previous value

pub mod commit;
pub mod commit_status;
pub mod message;
pub mod op;
pub mod sorter;
pub mod strategy;
pub mod tip;

use thiserror::Error;

use crate::git::GitError;
use crate::submodule::SubmoduleError;

pub use commit::{CodeReviewCommit, Origin};
pub use commit_status::CommitStatus;
pub use op::{BranchOutcome, CommitOp, NewPatchSet, OpKind};
pub use sorter::{ChangeLookup, Rejection, SortOutcome};
pub use tip::MergeTip;

/// Errors that abort a branch run.
///
/// Expected per-commit outcomes such as conflicts are not errors; they are
/// recorded as statuses on the commit's op.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Submodule(#[from] SubmoduleError),

    /// A collaborator lookup failed.
    #[error(transparent)]
    Lookup(#[from] anyhow::Error),

    #[error("internal error: {0}")]
    Internal(String),
}
