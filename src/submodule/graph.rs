//! submodule::graph
//!
//! Subscription graph reachable from the branches a submission updates.
//!
//! # Algorithm
//!
//! Starting from each updated branch, a depth-first search follows
//! subscriptions upward to superproject branches. A branch is appended to
//! the visit list only after all of its superprojects, so reversing the
//! list (restricted to branches that take part in a subscription) puts
//! every submodule branch before the superproject branches tracking it.
//!
//! A branch met again while still on the search stack is a cycle and
//! fails the whole submission.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::subscription::SubmoduleSubscription;
use super::{circular_path, SubmoduleConflict, SubmoduleError, SubscriptionSource};
use crate::core::types::{BranchKey, ProjectName};

#[derive(Debug, Clone, Default)]
pub struct SubscriptionGraph {
    updated: Vec<BranchKey>,
    /// Superproject branch -> its subscriptions to updated submodules.
    targets: BTreeMap<BranchKey, Vec<SubmoduleSubscription>>,
    sorted: Vec<BranchKey>,
}

impl SubscriptionGraph {
    /// Graph used when superproject subscriptions are disabled.
    pub fn without_subscriptions(updated: impl IntoIterator<Item = BranchKey>) -> Self {
        Self {
            updated: dedup(updated),
            ..Self::default()
        }
    }

    pub fn compute(
        updated: impl IntoIterator<Item = BranchKey>,
        source: &dyn SubscriptionSource,
    ) -> Result<Self, SubmoduleError> {
        let updated = dedup(updated);
        let mut search = Search {
            source,
            targets: BTreeMap::new(),
            affected: BTreeSet::new(),
            visited: Vec::new(),
        };
        for branch in &updated {
            search.superprojects_of(branch, &mut Vec::new())?;
        }

        let Search {
            targets,
            affected,
            visited,
            ..
        } = search;
        let sorted: Vec<BranchKey> = visited
            .into_iter()
            .rev()
            .filter(|b| affected.contains(b))
            .collect();
        debug!(
            updated = updated.len(),
            superprojects = targets.len(),
            "computed subscription graph"
        );
        Ok(Self {
            updated,
            targets,
            sorted,
        })
    }

    /// Subscriptions of a superproject branch, sorted by path.
    pub fn subscriptions(&self, branch: &BranchKey) -> &[SubmoduleSubscription] {
        self.targets.get(branch).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether `branch` tracks an updated submodule.
    pub fn has_subscription(&self, branch: &BranchKey) -> bool {
        self.targets.contains_key(branch)
    }

    /// Branches taking part in a subscription, submodules first.
    pub fn sorted_branches(&self) -> &[BranchKey] {
        &self.sorted
    }

    /// Superproject branches in update order.
    pub fn superproject_branches(&self) -> impl Iterator<Item = &BranchKey> {
        self.sorted.iter().filter(|b| self.targets.contains_key(*b))
    }

    /// Every branch to integrate: subscription order first, then the
    /// remaining updated branches.
    pub fn branches_in_order(&self) -> Vec<BranchKey> {
        let mut out = self.sorted.clone();
        for branch in &self.updated {
            if !out.contains(branch) {
                out.push(branch.clone());
            }
        }
        out
    }

    /// Projects in update order, submodule projects first.
    ///
    /// # Errors
    ///
    /// [`SubmoduleConflict::ProjectCycle`] when projects subscribe to each
    /// other through different branches.
    pub fn projects_in_order(&self) -> Result<Vec<ProjectName>, SubmoduleConflict> {
        let mut out = Vec::new();
        let supers: Vec<ProjectName> =
            dedup(self.superproject_branches().map(|b| b.project.clone()));
        for project in &supers {
            self.add_project(project, &mut Vec::new(), &mut out)?;
        }
        for branch in &self.updated {
            if !out.contains(&branch.project) {
                out.push(branch.project.clone());
            }
        }
        Ok(out)
    }

    fn add_project(
        &self,
        project: &ProjectName,
        stack: &mut Vec<ProjectName>,
        out: &mut Vec<ProjectName>,
    ) -> Result<(), SubmoduleConflict> {
        if stack.contains(project) {
            return Err(SubmoduleConflict::ProjectCycle {
                path: circular_path(stack, project),
            });
        }
        if out.contains(project) {
            return Ok(());
        }
        stack.push(project.clone());
        let subprojects: BTreeSet<&ProjectName> = self
            .targets
            .iter()
            .filter(|(b, _)| &b.project == project)
            .flat_map(|(_, subs)| subs.iter().map(|s| &s.submodule.project))
            .collect();
        for sub in subprojects {
            self.add_project(sub, stack, out)?;
        }
        stack.pop();
        out.push(project.clone());
        Ok(())
    }
}

struct Search<'a> {
    source: &'a dyn SubscriptionSource,
    targets: BTreeMap<BranchKey, Vec<SubmoduleSubscription>>,
    affected: BTreeSet<BranchKey>,
    visited: Vec<BranchKey>,
}

impl Search<'_> {
    fn superprojects_of(
        &mut self,
        current: &BranchKey,
        stack: &mut Vec<BranchKey>,
    ) -> Result<(), SubmoduleError> {
        if stack.contains(current) {
            return Err(SubmoduleConflict::BranchCycle {
                path: circular_path(stack, current),
            }
            .into());
        }
        if self.visited.contains(current) {
            return Ok(());
        }

        stack.push(current.clone());
        for sub in self.subscribers(current)? {
            let superproject = sub.superproject.clone();
            self.superprojects_of(&superproject, stack)?;
            self.affected.insert(superproject.clone());
            self.affected.insert(sub.submodule.clone());
            let subs = self.targets.entry(superproject).or_default();
            if !subs.contains(&sub) {
                subs.push(sub);
                subs.sort_by(|a, b| a.path.cmp(&b.path));
            }
        }
        stack.pop();
        self.visited.push(current.clone());
        Ok(())
    }

    /// Subscriptions of existing superproject branches to `branch`.
    fn subscribers(&self, branch: &BranchKey) -> Result<Vec<SubmoduleSubscription>, SubmoduleError> {
        if branch.branch.is_internal() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for section in self.source.subscribe_sections(&branch.project)? {
            debug!(%branch, %section, "checking subscribe section");
            let destinations = section.destination_branches(&branch.branch, || {
                self.source.branches(&section.superproject)
            })?;
            for target in destinations {
                if self.source.branch_tip(&target)?.is_none() {
                    debug!(%target, "superproject branch does not exist");
                    continue;
                }
                out.extend(self.source.gitmodules(&target)?.subscribed_to(branch));
            }
        }
        Ok(out)
    }
}

fn dedup<T: PartialEq>(items: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut out = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}
