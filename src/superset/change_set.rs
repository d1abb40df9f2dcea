//! superset::change_set
//!
//! The changes that must be submitted together.

use std::collections::{BTreeMap, BTreeSet};

use crate::core::change::Change;
use crate::core::types::{BranchKey, ChangeId, ProjectName};

/// Visible and non-visible members of one submission.
///
/// The two maps never share a change id. A change seen as visible once
/// stays visible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    visible: BTreeMap<ChangeId, Change>,
    non_visible: BTreeMap<ChangeId, Change>,
}

impl ChangeSet {
    pub fn new(
        visible: impl IntoIterator<Item = Change>,
        non_visible: impl IntoIterator<Item = Change>,
    ) -> Self {
        let visible: BTreeMap<ChangeId, Change> = visible.into_iter().map(|c| (c.id, c)).collect();
        let non_visible = non_visible
            .into_iter()
            .filter(|c| !visible.contains_key(&c.id))
            .map(|c| (c.id, c))
            .collect();
        Self { visible, non_visible }
    }

    /// Every member id, visible or not.
    pub fn ids(&self) -> BTreeSet<ChangeId> {
        self.visible.keys().chain(self.non_visible.keys()).copied().collect()
    }

    pub fn contains(&self, id: ChangeId) -> bool {
        self.visible.contains_key(&id) || self.non_visible.contains_key(&id)
    }

    /// A visible member.
    pub fn get(&self, id: ChangeId) -> Option<&Change> {
        self.visible.get(&id)
    }

    pub fn changes(&self) -> impl Iterator<Item = &Change> {
        self.visible.values()
    }

    pub fn non_visible(&self) -> impl Iterator<Item = &Change> {
        self.non_visible.values()
    }

    /// Whether the caller can see every member.
    pub fn is_complete(&self) -> bool {
        self.non_visible.is_empty()
    }

    pub fn len(&self) -> usize {
        self.visible.len() + self.non_visible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visible members grouped by destination branch.
    pub fn by_branch(&self) -> BTreeMap<BranchKey, Vec<&Change>> {
        let mut out: BTreeMap<BranchKey, Vec<&Change>> = BTreeMap::new();
        for change in self.visible.values() {
            out.entry(change.branch_key()).or_default().push(change);
        }
        out
    }

    /// Destination branches of all members.
    pub fn branches(&self) -> BTreeSet<BranchKey> {
        self.all().map(Change::branch_key).collect()
    }

    /// Projects of all members.
    pub fn projects(&self) -> BTreeSet<ProjectName> {
        self.all().map(|c| c.project.clone()).collect()
    }

    fn all(&self) -> impl Iterator<Item = &Change> {
        self.visible.values().chain(self.non_visible.values())
    }
}
