//! merge::commit
//!
//! Commits annotated with the review data they came from.

use std::cmp::Ordering;

use crate::core::types::{ChangeId, Oid, PatchSetId};
use crate::git::{Git, GitError, PersonIdent};

/// The change and patch set a submitted commit belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Origin {
    pub change: ChangeId,
    pub patch_set: PatchSetId,
}

/// A git commit being submitted, with review metadata attached.
///
/// Instances belong to exactly one branch run. Outcomes are tracked
/// separately so the commit itself stays immutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeReviewCommit {
    pub id: Oid,
    pub tree: Oid,
    pub parents: Vec<Oid>,
    pub subject: String,
    pub message: String,
    pub author: PersonIdent,
    pub origin: Origin,
}

impl CodeReviewCommit {
    /// Load a commit and attach its origin.
    pub fn load(git: &Git, id: &Oid, origin: Origin) -> Result<Self, GitError> {
        let info = git.commit_info(id)?;
        Ok(Self {
            id: info.oid,
            tree: info.tree,
            parents: info.parents,
            subject: info.summary,
            message: info.message,
            author: info.author,
            origin,
        })
    }

    pub fn change(&self) -> ChangeId {
        self.origin.change
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    /// Patch set order: change id first, then patch set number.
    pub fn order(a: &Self, b: &Self) -> Ordering {
        a.origin
            .patch_set
            .cmp(&b.origin.patch_set)
            .then_with(|| a.id.cmp(&b.id))
    }
}
