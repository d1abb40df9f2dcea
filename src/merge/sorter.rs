//! merge::sorter
//!
//! Orders the commits submitted to one branch and rejects commits whose
//! ancestry is incomplete.
//!
//! # Algorithms
//!
//! - [`merge_sort`]: reduces the candidates to the minimal set of heads
//!   whose ancestry brings in every other candidate. Used by the merge and
//!   fast-forward strategies.
//! - [`rebase_sort`]: produces a linear order with ancestors first. Used by
//!   the rebase strategies.
//!
//! Both walk each candidate's ancestry. A walk that reaches a commit which
//! is neither accepted (already on some branch) nor incoming (submitted in
//! this attempt) rejects the candidate with
//! [`MergeStatus::MissingDependency`].

use std::collections::BTreeSet;

use tracing::debug;

use super::commit::CodeReviewCommit;
use super::MergeError;
use crate::core::change::{Change, ChangeStatus};
use crate::core::status::MergeStatus;
use crate::core::types::{ChangeId, Oid, ProjectName, RefName};
use crate::git::{Git, WalkOrder};

/// Finds the changes that own a commit.
pub trait ChangeLookup {
    /// Changes of `project` with a patch set whose revision is `commit`.
    fn changes_by_commit(&self, project: &ProjectName, commit: &Oid)
        -> anyhow::Result<Vec<Change>>;
}

/// A candidate the sorter refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub commit: Oid,
    pub status: MergeStatus,
    pub message: String,
}

/// Result of sorting one branch's candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortOutcome {
    /// Commits to apply, in order.
    pub sorted: Vec<Oid>,
    pub rejected: Vec<Rejection>,
}

impl SortOutcome {
    pub fn is_rejected(&self, commit: &Oid) -> bool {
        self.rejected.iter().any(|r| &r.commit == commit)
    }
}

/// What the sorters need to know about the branch.
#[derive(Clone, Copy)]
pub struct SortContext<'a> {
    pub git: &'a Git,
    pub project: &'a ProjectName,
    pub dest: &'a RefName,
    /// Every commit submitted to this branch in the current attempt.
    pub incoming: &'a BTreeSet<Oid>,
    pub lookup: &'a dyn ChangeLookup,
}

/// Reduce `candidates` to merge heads.
///
/// Candidates are visited in the order given. A candidate reachable from a
/// later head is dropped from the heads; it is integrated implicitly.
pub fn merge_sort(
    ctx: SortContext<'_>,
    accepted: &BTreeSet<Oid>,
    candidates: &[CodeReviewCommit],
) -> Result<SortOutcome, MergeError> {
    let hide: Vec<Oid> = accepted.iter().cloned().collect();
    let mut remaining: Vec<&CodeReviewCommit> = candidates.iter().collect();
    let mut outcome = SortOutcome::default();

    while !remaining.is_empty() {
        let n = remaining.remove(0);
        let walked = ctx
            .git
            .rev_list(std::slice::from_ref(&n.id), &hide, WalkOrder::NewestFirst)?;

        if let Some(missing) = walked.iter().find(|c| !ctx.incoming.contains(*c)) {
            outcome.rejected.push(missing_dependency(ctx, &n.id, missing)?);
            continue;
        }

        let contents: BTreeSet<Oid> = walked.into_iter().collect();
        outcome.sorted.retain(|h| !contents.contains(h));
        remaining.retain(|c| !contents.contains(&c.id));
        outcome.sorted.push(n.id.clone());
    }

    debug!(
        branch = %ctx.dest,
        heads = outcome.sorted.len(),
        rejected = outcome.rejected.len(),
        "merge sort"
    );
    Ok(outcome)
}

/// Order `candidates` linearly, ancestors first.
///
/// Candidates are visited in patch set order. The walk hides only the
/// initial branch tip; a commit outside the submission is tolerated when it
/// is already integrated somewhere (see [`is_already_merged`]).
pub fn rebase_sort(
    ctx: SortContext<'_>,
    initial_tip: Option<&Oid>,
    accepted: &BTreeSet<Oid>,
    candidates: &[CodeReviewCommit],
) -> Result<SortOutcome, MergeError> {
    let mut remaining: Vec<&CodeReviewCommit> = candidates.iter().collect();
    remaining.sort_by(|a, b| CodeReviewCommit::order(a, b));
    let mut outcome = SortOutcome::default();

    while !remaining.is_empty() {
        let n = remaining.remove(0);
        let mut hide: Vec<Oid> = initial_tip.into_iter().cloned().collect();

        let walk = loop {
            let walked = ctx
                .git
                .rev_list(std::slice::from_ref(&n.id), &hide, WalkOrder::NewestFirst)?;
            let blocker = walked.iter().find(|c| !ctx.incoming.contains(*c)).cloned();
            match blocker {
                None => break Ok(walked),
                Some(c) if is_already_merged(ctx, accepted, &c)? => {
                    debug!(commit = %c, "tolerating already merged ancestor");
                    hide.push(c);
                }
                Some(c) => break Err(c),
            }
        };

        match walk {
            Err(missing) => {
                outcome.rejected.push(missing_dependency(ctx, &n.id, &missing)?);
            }
            Ok(mut contents) => {
                remaining.retain(|c| !contents.contains(&c.id));
                contents.reverse();
                outcome.sorted.retain(|s| !contents.contains(s));
                outcome.sorted.extend(contents);
            }
        }
    }

    debug!(
        branch = %ctx.dest,
        sorted = outcome.sorted.len(),
        rejected = outcome.rejected.len(),
        "rebase sort"
    );
    Ok(outcome)
}

/// Whether `commit` is integrated already: reachable from an accepted
/// commit, or the revision of a change merged into the same branch.
pub fn is_already_merged(
    ctx: SortContext<'_>,
    accepted: &BTreeSet<Oid>,
    commit: &Oid,
) -> Result<bool, MergeError> {
    for tip in accepted {
        if ctx.git.is_ancestor(commit, tip)? {
            return Ok(true);
        }
    }
    let owners = ctx.lookup.changes_by_commit(ctx.project, commit)?;
    Ok(owners
        .iter()
        .any(|c| c.status == ChangeStatus::Merged && &c.dest == ctx.dest))
}

fn missing_dependency(
    ctx: SortContext<'_>,
    commit: &Oid,
    missing: &Oid,
) -> Result<Rejection, MergeError> {
    let owner: Option<ChangeId> = ctx
        .lookup
        .changes_by_commit(ctx.project, missing)?
        .first()
        .map(|c| c.id);
    let message = match owner {
        Some(change) => format!(
            "Depends on change that was not submitted. Commit {commit} depends on commit \
             {missing}, of change {change} which cannot be merged."
        ),
        None => format!(
            "Depends on change that was not submitted. Commit {commit} depends on commit \
             {missing} which cannot be merged."
        ),
    };
    debug!(%commit, %missing, "missing dependency");
    Ok(Rejection {
        commit: commit.clone(),
        status: MergeStatus::MissingDependency,
        message,
    })
}
