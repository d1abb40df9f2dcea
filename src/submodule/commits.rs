//! submodule::commits
//!
//! Superproject commits that move gitlinks to new submodule tips.
//!
//! Two entry points:
//!
//! - [`SubmoduleCommits::compose`] writes a standalone "Update git
//!   submodules" commit on top of a superproject branch
//! - [`SubmoduleCommits::amend`] rewrites a commit produced by a merge
//!   strategy so that it carries the gitlink updates as well
//!
//! Submodule tips come from branches already advanced in this attempt
//! (see [`SubmoduleCommits::add_branch_tip`]) and fall back to the
//! submodule's ref.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::graph::SubscriptionGraph;
use super::subscription::SubmoduleSubscription;
use super::{SubmoduleConflict, SubmoduleError};
use crate::core::config::{SubmoduleConfig, VerboseSuperprojectUpdate};
use crate::core::types::{BranchKey, Oid};
use crate::git::{Git, GitlinkEdit, NewCommit, PathEntry, PersonIdent, RepoAccess, WalkOrder};

const SUBJECT: &str = "Update git submodules\n\n";
const TRUNCATED: &str = "\n\n[...]";

pub struct SubmoduleCommits<'a> {
    graph: &'a SubscriptionGraph,
    repos: &'a dyn RepoAccess,
    config: &'a SubmoduleConfig,
    server: PersonIdent,
    branch_tips: BTreeMap<BranchKey, Oid>,
}

/// Gitlink edits for one superproject commit, plus what to say about them.
#[derive(Debug, Default)]
struct GitlinkUpdate {
    edits: Vec<GitlinkEdit>,
    sections: Vec<String>,
    authors: Vec<PersonIdent>,
    log_size: usize,
}

impl<'a> SubmoduleCommits<'a> {
    pub fn new(
        graph: &'a SubscriptionGraph,
        repos: &'a dyn RepoAccess,
        config: &'a SubmoduleConfig,
        server: PersonIdent,
    ) -> Self {
        Self {
            graph,
            repos,
            config,
            server,
            branch_tips: BTreeMap::new(),
        }
    }

    /// Record the tip a branch reaches in this attempt.
    pub fn add_branch_tip(&mut self, branch: BranchKey, tip: Oid) {
        self.branch_tips.insert(branch, tip);
    }

    pub fn branch_tip(&self, branch: &BranchKey) -> Option<&Oid> {
        self.branch_tips.get(branch)
    }

    pub fn has_subscription(&self, branch: &BranchKey) -> bool {
        self.graph.has_subscription(branch)
    }

    /// Write a gitlink-only commit on top of `subscriber`.
    ///
    /// Returns `None` when every gitlink is already current.
    pub fn compose(&self, subscriber: &BranchKey) -> Result<Option<Oid>, SubmoduleError> {
        let git = self.repos.repo(&subscriber.project)?;
        let current = match self.branch_tips.get(subscriber) {
            Some(tip) => tip.clone(),
            None => git
                .try_resolve_ref(subscriber.branch.as_str())?
                .ok_or_else(|| SubmoduleConflict::SubscriberBranchMissing {
                    branch: subscriber.clone(),
                })?,
        };
        let info = git.commit_info(&current)?;
        let update = self.gitlink_update(&git, &current, self.graph.subscriptions(subscriber))?;
        if update.edits.is_empty() {
            return Ok(None);
        }
        let tree = git.edit_gitlinks(&info.tree, &update.edits)?;
        if tree == info.tree {
            return Ok(None);
        }

        let commit = git.create_commit(&NewCommit {
            tree,
            parents: vec![current],
            author: pick_author(&update.authors, &self.server),
            committer: self.server.clone(),
            message: compose_message(self.config.verbose_superproject_update, &update.sections),
        })?;
        debug!(%subscriber, %commit, "composed gitlink commit");
        Ok(Some(commit))
    }

    /// Rewrite `commit` so its tree carries the subscriber's gitlink updates.
    ///
    /// Returns `commit` itself when the branch has no subscriptions or the
    /// gitlinks are already current.
    pub fn amend(&self, subscriber: &BranchKey, commit: &Oid) -> Result<Oid, SubmoduleError> {
        if !self.graph.has_subscription(subscriber) {
            return Ok(commit.clone());
        }
        let git = self.repos.repo(&subscriber.project)?;
        let info = git.commit_info(commit)?;
        let update = self.gitlink_update(&git, commit, self.graph.subscriptions(subscriber))?;
        if update.edits.is_empty() {
            return Ok(commit.clone());
        }
        let tree = git.edit_gitlinks(&info.tree, &update.edits)?;
        if tree == info.tree {
            return Ok(commit.clone());
        }

        let amended = git.create_commit(&NewCommit {
            tree,
            parents: info.parents,
            author: info.author,
            committer: self.server.at(info.committer.when),
            message: amend_message(
                &info.message,
                self.config.verbose_superproject_update,
                &update.sections,
            ),
        })?;
        debug!(%subscriber, %commit, %amended, "amended gitlinks");
        Ok(amended)
    }

    fn gitlink_update(
        &self,
        git: &Git,
        commit: &Oid,
        subscriptions: &[SubmoduleSubscription],
    ) -> Result<GitlinkUpdate, SubmoduleError> {
        let mut update = GitlinkUpdate::default();
        for s in subscriptions {
            let project = &s.submodule.project;
            let sub_git = self.repos.repo(project).map_err(|e| {
                warn!(%project, error = %e, "cannot open submodule");
                SubmoduleConflict::Inaccessible {
                    project: project.clone(),
                }
            })?;

            let old = match git.path_entry(commit, &s.path)? {
                PathEntry::Missing => None,
                PathEntry::Other => {
                    return Err(SubmoduleConflict::NotAGitlink {
                        path: s.path.clone(),
                        project: project.clone(),
                    }
                    .into())
                }
                PathEntry::Gitlink(old) => {
                    // The old gitlink must exist in the submodule; otherwise
                    // leave this path alone.
                    if let Err(e) = sub_git.commit_info(&old) {
                        warn!(path = %s.path, %old, error = %e, "broken gitlink");
                        continue;
                    }
                    Some(old)
                }
            };

            let new = match self.branch_tips.get(&s.submodule) {
                Some(tip) => Some(tip.clone()),
                None => sub_git.try_resolve_ref(s.submodule.branch.as_str())?,
            };
            let Some(new) = new else {
                if old.is_some() {
                    update.edits.push(GitlinkEdit {
                        path: s.path.clone(),
                        target: None,
                    });
                }
                continue;
            };
            if old.as_ref() == Some(&new) {
                continue;
            }

            update.edits.push(GitlinkEdit {
                path: s.path.clone(),
                target: Some(new.clone()),
            });
            update.authors.push(sub_git.commit_info(&new)?.author);
            if self.config.verbose_superproject_update != VerboseSuperprojectUpdate::Off {
                let section = self.section(&sub_git, s, &new, old.as_ref(), update.log_size)?;
                update.log_size += section.len();
                update.sections.push(section);
            }
        }
        Ok(update)
    }

    /// `* Update <path> from branch '<b>'` followed by the new history.
    fn section(
        &self,
        sub_git: &Git,
        s: &SubmoduleSubscription,
        new: &Oid,
        old: Option<&Oid>,
        log_size: usize,
    ) -> Result<String, SubmoduleError> {
        let mut text = format!(
            "* Update {} from branch '{}'\n  to {}",
            s.path,
            s.submodule.branch.short_name(),
            new
        );
        // A new gitlink gets no history.
        let Some(old) = old else {
            return Ok(text);
        };

        let commits = sub_git.rev_list(&[new.clone()], &[old.clone()], WalkOrder::NewestFirst)?;
        for (i, c) in commits.iter().enumerate() {
            let info = sub_git.commit_info(c)?;
            let message = match self.config.verbose_superproject_update {
                VerboseSuperprojectUpdate::SubjectOnly => info.summary,
                _ => info.message.trim_end().replace('\n', "\n    "),
            };
            if i + 1 > self.config.max_commit_messages
                || log_size + text.len() + message.len()
                    > self.config.max_combined_commit_message_size
            {
                text.push_str(TRUNCATED);
                break;
            }
            text.push_str("\n  - ");
            text.push_str(&message);
        }
        Ok(text)
    }
}

fn compose_message(verbosity: VerboseSuperprojectUpdate, sections: &[String]) -> String {
    match verbosity {
        VerboseSuperprojectUpdate::Off => SUBJECT.to_string(),
        _ => format!("{SUBJECT}{}", sections.join("\n\n")),
    }
}

fn amend_message(original: &str, verbosity: VerboseSuperprojectUpdate, sections: &[String]) -> String {
    match verbosity {
        VerboseSuperprojectUpdate::Off => original.to_string(),
        _ => format!("{original}\n\n* submodules:\n{}", sections.join("\n\n")),
    }
}

/// The common author of the new submodule tips, or the server.
fn pick_author(authors: &[PersonIdent], server: &PersonIdent) -> PersonIdent {
    match authors.split_first() {
        Some((first, rest)) if rest.iter().all(|a| a.same_person(first)) => first.at(server.when),
        _ => server.clone(),
    }
}
