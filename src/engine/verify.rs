//! engine::verify
//!
//! Post-execution reachability verification.
//!
//! # Architecture
//!
//! Verification runs after the batch plan was executed, reading the
//! branches as they are now. Every change reported as merged must be
//! carried by a commit reachable from its branch tip. This is the final
//! gate before declaring success.
//!
//! # Invariants
//!
//! - Verify is read-only; it never mutates a repository
//! - If verify fails after execution, this indicates a bug

use std::fmt;

use thiserror::Error;

use crate::core::types::{BranchKey, ChangeId, Oid};
use crate::git::RepoAccess;

/// Errors from verification.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The destination branch disappeared.
    #[error("branch {branch} does not exist after merging change {change}")]
    BranchMissing { branch: BranchKey, change: ChangeId },

    /// The merged commit is not in the branch history.
    #[error("change {change} was merged into {branch} as {commit}, but {commit} is not reachable from {tip}")]
    NotReachable {
        change: ChangeId,
        branch: BranchKey,
        commit: Oid,
        tip: Oid,
    },

    /// Repository access failed during verification.
    #[error("cannot verify {branch}: {message}")]
    Access { branch: BranchKey, message: String },
}

/// A change and the commit that carries it on its branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedCommit {
    pub change: ChangeId,
    pub branch: BranchKey,
    pub commit: Oid,
}

impl fmt::Display for MergedCommit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} @ {}", self.change, self.branch, self.commit.short(7))
    }
}

/// Check that every merged commit is reachable from its branch tip.
pub fn verify_reachable(repos: &dyn RepoAccess, merged: &[MergedCommit]) -> Result<(), VerifyError> {
    for m in merged {
        let access = |message: String| VerifyError::Access {
            branch: m.branch.clone(),
            message,
        };
        let git = repos.repo(&m.branch.project).map_err(|e| access(format!("{e:#}")))?;
        let tip = git
            .try_resolve_ref(m.branch.branch.as_str())
            .map_err(|e| access(e.to_string()))?
            .ok_or_else(|| VerifyError::BranchMissing {
                branch: m.branch.clone(),
                change: m.change,
            })?;
        let reachable = git
            .is_ancestor(&m.commit, &tip)
            .map_err(|e| access(e.to_string()))?;
        if !reachable {
            return Err(VerifyError::NotReachable {
                change: m.change,
                branch: m.branch.clone(),
                commit: m.commit.clone(),
                tip,
            });
        }
    }
    Ok(())
}
