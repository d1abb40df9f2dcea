//! engine::exec
//!
//! The single transactional executor.
//!
//! # Architecture
//!
//! The executor is the ONLY component allowed to move refs or write change
//! metadata during a submit. Strategies and submodule composition only
//! create objects; this module makes them visible.
//!
//! # Executor Contract
//!
//! The executor MUST:
//! 1. Lock every ref named by the plan, in every repository, verifying the
//!    expected old values under lock
//! 2. If any lock or CAS check fails: release everything and report a
//!    [`BatchError::LockFailure`] without having written anything
//! 3. Commit the ref updates repository by repository
//! 4. Only then apply the change metadata steps, in plan order
//!
//! # Invariants
//!
//! - Nothing is written unless every ref could be locked
//! - Metadata never records a merge whose refs were not written
//!
//! Commits across repositories are not atomic as a whole: a failure after
//! the first repository committed is reported as [`BatchError::Git`] and
//! leaves earlier repositories updated. A retried attempt sees those refs
//! as already moved and skips the changes they carry.

use std::rc::Rc;

use thiserror::Error;
use tracing::{debug, error};

use super::plan::{BatchPlan, PlanStep};
use super::ports::ChangeStore;
use crate::core::types::ProjectName;
use crate::git::{Git, GitError, RefUpdate, RepoAccess};

/// Errors from execution.
#[derive(Debug, Error)]
pub enum BatchError {
    /// A ref was locked elsewhere or moved since planning. Retryable.
    #[error("lock failure in {project}: {source}")]
    LockFailure {
        project: ProjectName,
        source: GitError,
    },

    /// Git operation failed.
    #[error("git error in {project}: {source}")]
    Git {
        project: ProjectName,
        source: GitError,
    },

    /// A repository could not be opened.
    #[error("cannot open repository {project}: {message}")]
    Repo { project: ProjectName, message: String },

    /// Writing change metadata failed.
    #[error("change store update failed: {0:#}")]
    Store(anyhow::Error),
}

impl BatchError {
    /// Whether the whole attempt should be retried with fresh state.
    pub fn is_lock_failure(&self) -> bool {
        matches!(self, BatchError::LockFailure { .. })
    }
}

/// Applies a [`BatchPlan`].
pub trait BatchExecutor {
    fn execute(
        &self,
        plan: &BatchPlan,
        repos: &dyn RepoAccess,
        store: &dyn ChangeStore,
    ) -> Result<(), BatchError>;
}

/// Executes plans against git repositories with ref transactions.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitBatchExecutor;

impl GitBatchExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl BatchExecutor for GitBatchExecutor {
    fn execute(
        &self,
        plan: &BatchPlan,
        repos: &dyn RepoAccess,
        store: &dyn ChangeStore,
    ) -> Result<(), BatchError> {
        if plan.is_empty() {
            debug!("empty plan, nothing to execute");
            return Ok(());
        }

        let mut opened: Vec<(ProjectName, Rc<Git>, Vec<RefUpdate>)> = Vec::new();
        for (project, updates) in plan.ref_updates_by_project() {
            let git = repos.repo(&project).map_err(|e| BatchError::Repo {
                project: project.clone(),
                message: format!("{e:#}"),
            })?;
            opened.push((project, git, updates));
        }

        debug!(repositories = opened.len(), "locking refs");
        let mut locked = Vec::with_capacity(opened.len());
        for (project, git, updates) in &opened {
            let refs = git.lock_refs(updates).map_err(|source| classify(project, source))?;
            locked.push((project, refs));
        }

        for (i, (project, refs)) in locked.into_iter().enumerate() {
            let count = refs.len();
            refs.commit().map_err(|source| {
                if i > 0 {
                    error!(%project, error = %source, "ref commit failed after earlier repositories were updated");
                }
                classify(project, source)
            })?;
            debug!(%project, refs = count, "refs updated");
        }

        for step in plan.store_steps() {
            match step {
                PlanStep::InsertPatchSet {
                    change,
                    patch_set,
                    copy_from,
                } => store
                    .insert_patch_set(*change, patch_set.clone(), *copy_from)
                    .map_err(BatchError::Store)?,
                PlanStep::SetMerged { update } => store.set_merged(update).map_err(BatchError::Store)?,
                PlanStep::UpdateRef { .. } => {}
            }
        }
        Ok(())
    }
}

fn classify(project: &ProjectName, source: GitError) -> BatchError {
    if source.is_lock_failure() {
        BatchError::LockFailure {
            project: project.clone(),
            source,
        }
    } else {
        BatchError::Git {
            project: project.clone(),
            source,
        }
    }
}
