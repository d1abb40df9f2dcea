//! submodule
//!
//! Superproject subscriptions: superprojects whose gitlinks follow branches
//! of their submodules.
//!
//! # Architecture
//!
//! - [`subscription`]: who may subscribe to what (subscribe sections and
//!   their refspecs) and the resulting [`SubmoduleSubscription`] edges
//! - [`gitmodules`]: parsing a superproject's `.gitmodules`
//! - [`graph`]: the [`SubscriptionGraph`] reachable from a set of updated
//!   branches, with cycle detection and update order
//! - [`commits`]: writing superproject commits that move gitlinks
//!
//! The graph reads repositories only through [`SubscriptionSource`], so it
//! can be built without touching git.
//!
//! # Invariants
//!
//! - Submodule branches are ordered before the superproject branches that
//!   track them
//! - A circular subscription is an error before any repository is written

pub mod commits;
pub mod gitmodules;
pub mod graph;
pub mod subscription;

use std::sync::Arc;

use thiserror::Error;

use crate::core::types::{BranchKey, Oid, ProjectName, RefName};
use crate::git::GitError;

pub use commits::SubmoduleCommits;
pub use gitmodules::GitModules;
pub use graph::SubscriptionGraph;
pub use subscription::{RefSpec, SubmoduleSubscription, SubscribeSection};

/// Subscription states that make a submission impossible.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubmoduleConflict {
    #[error("Branch level circular subscriptions detected: {path}")]
    BranchCycle { path: String },

    #[error("Project level circular subscriptions detected: {path}")]
    ProjectCycle { path: String },

    #[error(
        "Requested to update gitlink {path} in {project} but entry doesn't have gitlink file mode."
    )]
    NotAGitlink { path: String, project: ProjectName },

    #[error("The branch was probably deleted from the subscriber repository")]
    SubscriberBranchMissing { branch: BranchKey },

    #[error("Cannot access submodule {project}")]
    Inaccessible { project: ProjectName },

    #[error("Could not read .gitmodules of {branch}: {message}")]
    InvalidGitModules { branch: BranchKey, message: String },
}

/// Errors from the submodule layer.
#[derive(Debug, Error)]
pub enum SubmoduleError {
    #[error(transparent)]
    Conflict(#[from] SubmoduleConflict),

    #[error(transparent)]
    Git(#[from] GitError),

    /// A repository or configuration lookup failed.
    #[error(transparent)]
    Source(#[from] anyhow::Error),
}

/// Everything the graph builder reads about projects.
pub trait SubscriptionSource {
    /// Subscribe sections declared by `project` for its superprojects.
    fn subscribe_sections(&self, project: &ProjectName) -> anyhow::Result<Vec<SubscribeSection>>;

    /// Tip of a branch, `None` if the branch or project does not exist.
    fn branch_tip(&self, branch: &BranchKey) -> anyhow::Result<Option<Oid>>;

    /// All branch refs of `project`.
    fn branches(&self, project: &ProjectName) -> anyhow::Result<Vec<RefName>>;

    /// Subscriptions declared by the `.gitmodules` of a superproject branch.
    fn gitmodules(&self, branch: &BranchKey) -> anyhow::Result<Arc<GitModules>>;
}

/// `a -> c -> b -> a` for a cycle that closes at `target`.
pub(crate) fn circular_path<T: std::fmt::Display + PartialEq>(stack: &[T], target: &T) -> String {
    let mut parts = vec![target.to_string()];
    for item in stack.iter().rev() {
        parts.push(item.to_string());
        if item == target {
            break;
        }
    }
    parts.join(" -> ")
}
