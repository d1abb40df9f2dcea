//! core::status
//!
//! Per-commit outcome codes produced by the submit strategies.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome of integrating one commit into its destination branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeStatus {
    CleanMerge,
    CleanPick,
    CleanRebase,
    AlreadyMerged,
    PathConflict,
    ManualRecursiveMerge,
    RebaseMergeConflict,
    MissingDependency,
    CannotCherryPickRoot,
    CannotRebaseRoot,
    NotFastForward,
    EmptyCommit,
    SkippedIdenticalTree,
}

impl MergeStatus {
    /// Whether the change counts as integrated.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            MergeStatus::CleanMerge
                | MergeStatus::CleanPick
                | MergeStatus::CleanRebase
                | MergeStatus::AlreadyMerged
                | MergeStatus::SkippedIdenticalTree
        )
    }

    /// Human readable description shown to the submitter.
    pub fn description(&self) -> &'static str {
        match self {
            MergeStatus::CleanMerge => "Change has been successfully merged",
            MergeStatus::CleanPick => "Change has been successfully cherry-picked",
            MergeStatus::CleanRebase => "Change has been successfully rebased and submitted",
            MergeStatus::AlreadyMerged => "Change is already merged",
            MergeStatus::PathConflict => {
                "Change could not be merged due to a path conflict. Please rebase the change \
                 locally and upload the rebased commit for review."
            }
            MergeStatus::ManualRecursiveMerge => {
                "The change requires a local merge to resolve. Please merge (or rebase) the \
                 change locally and upload the resolution for review."
            }
            MergeStatus::RebaseMergeConflict => {
                "Change could not be merged due to a conflict. Please rebase the change locally \
                 and upload the rebased commit for review."
            }
            MergeStatus::MissingDependency => "Depends on change that was not submitted.",
            MergeStatus::CannotCherryPickRoot => {
                "Cannot cherry-pick an initial commit onto an existing branch. Please merge the \
                 change locally and upload the merge commit for review."
            }
            MergeStatus::CannotRebaseRoot => {
                "Cannot rebase an initial commit onto an existing branch. Please merge the \
                 change locally and upload the merge commit for review."
            }
            MergeStatus::NotFastForward => {
                "Project policy requires all submissions to be a fast-forward. Please rebase the \
                 change locally and upload again for review."
            }
            MergeStatus::EmptyCommit => {
                "Change could not be merged because the commit is empty. Project policy requires \
                 all commits to contain modifications to at least one file."
            }
            MergeStatus::SkippedIdenticalTree => {
                "Marking change merged without cherry-picking to branch, as the resulting commit \
                 would be empty."
            }
        }
    }
}

impl fmt::Display for MergeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}
