//! merge::op
//!
//! Descriptors produced by a branch run, one per submitted commit.

use serde::{Deserialize, Serialize};

use super::tip::MergeTip;
use crate::core::status::MergeStatus;
use crate::core::types::{BranchKey, ChangeId, Oid, PatchSetId};

/// How a submitted commit was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    /// The branch moved to the commit itself.
    FastForward,
    /// The commit was merged into the tip with a merge commit.
    MergeOne,
    /// The commit was re-applied on the tip as a new patch set.
    CherryPick,
    /// The commit was rebased onto the tip, possibly as a new patch set.
    Rebase,
    /// The commit could not be fast-forwarded.
    NotFastForward,
    /// A root commit under a strategy that rewrites commits.
    Root,
    /// Brought in by a descendant head.
    Implicit,
    /// Already reachable from the branch before this attempt.
    AlreadyMerged,
}

/// A patch set created while integrating a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPatchSet {
    pub id: PatchSetId,
    pub commit: Oid,
}

/// Outcome for one submitted commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOp {
    pub change: ChangeId,
    /// The patch set that was submitted.
    pub patch_set: PatchSetId,
    pub source: Oid,
    pub kind: OpKind,
    /// `None` if no strategy step reached the commit.
    pub status: Option<MergeStatus>,
    pub status_message: Option<String>,
    /// The commit now on the branch that carries this change.
    pub result: Option<Oid>,
    pub new_patch_set: Option<NewPatchSet>,
}

impl CommitOp {
    pub fn is_success(&self) -> bool {
        self.status.is_some_and(|s| s.is_success())
    }

    /// Message explaining a failure, with newlines folded.
    pub fn problem(&self) -> String {
        let text = match (&self.status_message, self.status) {
            (Some(message), _) => message.clone(),
            (None, Some(status)) => status.description().to_string(),
            (None, None) => "internal error: change not processed by merge strategy".to_string(),
        };
        text.replace('\n', " ")
    }
}

/// Everything a branch run produced.
#[derive(Debug, Clone)]
pub struct BranchOutcome {
    pub branch: BranchKey,
    /// Ops in application order: implicit ones first.
    pub ops: Vec<CommitOp>,
    pub tip: MergeTip,
}

impl BranchOutcome {
    /// The new branch tip if it moved.
    pub fn new_tip(&self) -> Option<&Oid> {
        if self.tip.moved() {
            self.tip.current()
        } else {
            None
        }
    }
}
