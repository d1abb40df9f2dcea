//! core::change
//!
//! Review metadata consumed by the submit engine.
//!
//! The engine never owns change metadata. It reads [`Change`] snapshots from
//! the change store and describes mutations as plan steps.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{AccountId, BranchKey, ChangeId, Oid, PatchSetId, ProjectName, RefName, SubmissionId};

/// Lifecycle state of a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    New,
    Merged,
    Abandoned,
}

impl ChangeStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, ChangeStatus::New)
    }
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeStatus::New => "new",
            ChangeStatus::Merged => "merged",
            ChangeStatus::Abandoned => "abandoned",
        };
        write!(f, "{s}")
    }
}

/// Per-project merge policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubmitType {
    FastForwardOnly,
    #[default]
    MergeIfNecessary,
    MergeAlways,
    CherryPick,
    RebaseIfNecessary,
    RebaseAlways,
}

impl SubmitType {
    /// Whether submitting a change also submits its unmerged ancestors.
    pub fn closes_over_ancestors(&self) -> bool {
        !matches!(self, SubmitType::CherryPick)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubmitType::FastForwardOnly => "FAST_FORWARD_ONLY",
            SubmitType::MergeIfNecessary => "MERGE_IF_NECESSARY",
            SubmitType::MergeAlways => "MERGE_ALWAYS",
            SubmitType::CherryPick => "CHERRY_PICK",
            SubmitType::RebaseIfNecessary => "REBASE_IF_NECESSARY",
            SubmitType::RebaseAlways => "REBASE_ALWAYS",
        }
    }
}

impl fmt::Display for SubmitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One uploaded revision of a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSet {
    pub id: PatchSetId,
    pub commit: Oid,
    /// Related-change groups the revision belongs to.
    #[serde(default)]
    pub groups: Vec<String>,
    pub uploader: AccountId,
    pub created: DateTime<Utc>,
}

/// A vote on a patch set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub patch_set: PatchSetId,
    pub account: AccountId,
    pub label: String,
    pub value: i16,
    pub granted: DateTime<Utc>,
}

impl Approval {
    /// Label recorded for the account that submitted a change.
    pub const SUBMIT_LABEL: &'static str = "SUBM";

    /// Copy this vote onto another patch set of the same change.
    pub fn copied_to(&self, patch_set: PatchSetId) -> Self {
        Self {
            patch_set,
            ..self.clone()
        }
    }
}

/// Snapshot of a change as held by the change store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub id: ChangeId,
    /// The `Change-Id` footer value, if the change has one.
    pub key: Option<String>,
    pub project: ProjectName,
    pub dest: RefName,
    pub status: ChangeStatus,
    pub topic: Option<String>,
    pub owner: AccountId,
    pub subject: String,
    #[serde(default)]
    pub work_in_progress: bool,
    pub current_patch_set: PatchSetId,
    pub patch_sets: Vec<PatchSet>,
    #[serde(default)]
    pub approvals: Vec<Approval>,
    pub submission_id: Option<SubmissionId>,
    /// Change messages, oldest first.
    #[serde(default)]
    pub messages: Vec<String>,
}

impl Change {
    pub fn branch_key(&self) -> BranchKey {
        BranchKey::new(self.project.clone(), self.dest.clone())
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    /// Current patch set, if the store holds it.
    pub fn current_patch_set(&self) -> Option<&PatchSet> {
        self.patch_set(self.current_patch_set)
    }

    pub fn patch_set(&self, id: PatchSetId) -> Option<&PatchSet> {
        self.patch_sets.iter().find(|ps| ps.id == id)
    }

    /// Topic, treating an empty string as no topic.
    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref().filter(|t| !t.is_empty())
    }

    /// Votes recorded on the given patch set.
    pub fn approvals_on(&self, patch_set: PatchSetId) -> impl Iterator<Item = &Approval> {
        self.approvals.iter().filter(move |a| a.patch_set == patch_set)
    }

    /// Identifier of the next patch set to be created.
    pub fn next_patch_set_id(&self) -> PatchSetId {
        let max = self
            .patch_sets
            .iter()
            .map(|ps| ps.id.number)
            .max()
            .unwrap_or(0);
        PatchSetId::new(self.id, max.max(self.current_patch_set.number) + 1)
    }
}
