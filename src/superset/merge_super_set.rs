//! superset::merge_super_set
//!
//! Expanding a requested change into everything that must go in with it.
//!
//! # Algorithm
//!
//! Starting from the requested change, two expansions repeat until neither
//! adds anything:
//!
//! - **Ancestors**: per destination branch, walk from the current revisions
//!   of the changes that close over their ancestors (every submit type but
//!   cherry-pick), hiding the branch tip, and add the open changes on that
//!   branch whose current revision was walked
//! - **Topics**: with whole-topic submission enabled, add every open change
//!   sharing a topic with a visible member
//!
//! Every discovered change is classified by the caller's read permission.
//! Non-visible changes are kept so the caller can be told about them, but
//! are not expanded further.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::debug;

use super::change_set::ChangeSet;
use crate::core::change::Change;
use crate::core::types::{BranchKey, ChangeId, Oid};
use crate::engine::ports::{ChangeStore, CurrentUser, PermissionBackend, ProjectConfigSource};
use crate::git::{GitError, RepoAccess, WalkOrder};

#[derive(Debug, Error)]
pub enum SupersetError {
    #[error(transparent)]
    Git(#[from] GitError),

    /// A collaborator failed.
    #[error(transparent)]
    Source(#[from] anyhow::Error),
}

pub struct MergeSuperSet<'a> {
    pub store: &'a dyn ChangeStore,
    pub permissions: &'a dyn PermissionBackend,
    pub projects: &'a dyn ProjectConfigSource,
    pub repos: &'a dyn RepoAccess,
    pub whole_topic: bool,
}

#[derive(Default)]
struct Closure {
    visible: BTreeMap<ChangeId, Change>,
    non_visible: BTreeMap<ChangeId, Change>,
    topics: BTreeSet<String>,
    branches: BTreeSet<BranchKey>,
}

impl Closure {
    fn len(&self) -> usize {
        self.visible.len() + self.non_visible.len()
    }

    fn seen(&self) -> usize {
        self.topics.len() + self.branches.len()
    }
}

impl MergeSuperSet<'_> {
    /// The complete set of changes to submit together with `change`.
    pub fn complete(&self, change: &Change, user: &CurrentUser) -> Result<ChangeSet, SupersetError> {
        let mut closure = Closure::default();
        self.classify(&mut closure, change.clone(), user)?;

        loop {
            let (size, seen) = (closure.len(), closure.seen());
            self.add_ancestors(&mut closure, user)?;
            if self.whole_topic {
                self.add_topics(&mut closure, user)?;
            }
            if closure.len() == size && closure.seen() == seen {
                break;
            }
        }

        debug!(
            change = %change.id,
            visible = closure.visible.len(),
            non_visible = closure.non_visible.len(),
            "completed change set"
        );
        Ok(ChangeSet::new(
            closure.visible.into_values(),
            closure.non_visible.into_values(),
        ))
    }

    fn classify(&self, closure: &mut Closure, change: Change, user: &CurrentUser) -> Result<(), SupersetError> {
        if closure.visible.contains_key(&change.id) || closure.non_visible.contains_key(&change.id) {
            return Ok(());
        }
        if self.permissions.can_read(user, &change)? {
            closure.visible.insert(change.id, change);
        } else {
            debug!(change = %change.id, "change is not visible");
            closure.non_visible.insert(change.id, change);
        }
        Ok(())
    }

    fn add_ancestors(&self, closure: &mut Closure, user: &CurrentUser) -> Result<(), SupersetError> {
        let mut heads: BTreeMap<BranchKey, Vec<Oid>> = BTreeMap::new();
        for change in closure.visible.values() {
            let branch = change.branch_key();
            let entry = heads.entry(branch).or_default();
            let settings = self.projects.project_settings(&change.project)?;
            if !settings.submit_type.closes_over_ancestors() {
                continue;
            }
            if let Some(ps) = change.current_patch_set() {
                entry.push(ps.commit.clone());
            }
        }

        for (branch, heads) in heads {
            closure.branches.insert(branch.clone());
            if heads.is_empty() {
                continue;
            }
            let git = self.repos.repo(&branch.project)?;
            let tip = git.try_resolve_ref(branch.branch.as_str())?;
            let hidden: Vec<Oid> = tip.into_iter().collect();
            let walked = git.rev_list(&heads, &hidden, WalkOrder::NewestFirst)?;
            for change in self.store.open_on_branch_by_commits(&branch, &walked)? {
                self.classify(closure, change, user)?;
            }
        }
        Ok(())
    }

    fn add_topics(&self, closure: &mut Closure, user: &CurrentUser) -> Result<(), SupersetError> {
        let topics: Vec<String> = closure
            .visible
            .values()
            .filter_map(|c| c.topic())
            .filter(|t| !closure.topics.contains(*t))
            .map(str::to_string)
            .collect();
        for topic in topics {
            if !closure.topics.insert(topic.clone()) {
                continue;
            }
            for change in self.store.open_by_topic(&topic)? {
                self.classify(closure, change, user)?;
            }
        }
        Ok(())
    }
}
