//! merge::strategy
//!
//! Submit strategies, one free function per [`SubmitType`].
//!
//! # Architecture
//!
//! [`integrate`] creates a [`BranchRun`] for one branch and hands it to the
//! strategy selected by the branch's submit type. The run owns the moving
//! [`MergeTip`] and the per-commit outcomes; strategies only decide which
//! step applies to which commit. [`BranchRun::finish`] then marks commits
//! reachable from the new tip as clean merges and produces the
//! [`BranchOutcome`].
//!
//! Steps shared between strategies live on [`BranchRun`]:
//!
//! - [`BranchRun::fast_forward`]: move the tip to a submitted commit
//! - [`BranchRun::merge_one`]: merge a submitted commit into the tip
//! - [`BranchRun::merge_multi_parent`]: integrate a merge commit without
//!   rewriting it
//! - [`BranchRun::skip_if_already_merged`]: detect changes integrated by an
//!   earlier, partially applied attempt

mod cherry_pick;
mod fast_forward;
mod merge;
mod rebase;

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::commit::CodeReviewCommit;
use super::message::{merge_commit_message, MergedEntry};
use super::op::{BranchOutcome, CommitOp, NewPatchSet, OpKind};
use super::sorter::{self, ChangeLookup, SortContext, SortOutcome};
use super::tip::MergeTip;
use super::MergeError;
use crate::core::change::{Change, SubmitType};
use crate::core::status::MergeStatus;
use crate::core::types::{BranchKey, ChangeId, Oid, PatchSetId};
use crate::git::{Git, NewCommit, PersonIdent, TreeMerge, WalkOrder};

/// Rewrites a commit produced on this branch, e.g. to update gitlinks.
pub type AmendFn<'a> = dyn Fn(&Oid) -> Result<Oid, MergeError> + 'a;

/// Everything a strategy needs besides the commits themselves.
pub struct StrategyContext<'a> {
    pub git: &'a Git,
    pub branch: &'a BranchKey,
    pub submit_type: SubmitType,
    pub reject_empty_commit: bool,
    pub use_content_merge: bool,
    /// Identity of the submitter, stamped with the attempt time.
    pub caller: &'a PersonIdent,
    /// Identity of the server, stamped with the attempt time.
    pub server: &'a PersonIdent,
    pub canonical_web_url: Option<&'a str>,
    /// Changes being submitted, by id.
    pub changes: &'a BTreeMap<ChangeId, Change>,
    pub lookup: &'a dyn ChangeLookup,
    pub amend: &'a AmendFn<'a>,
    /// Whether this branch tracks submodules updated by the submission.
    pub has_subscriptions: bool,
}

/// The commits submitted to one branch.
#[derive(Debug, Clone)]
pub struct BranchInput {
    /// Branch tip before the attempt; `None` for an unborn branch.
    pub initial_tip: Option<Oid>,
    /// Commits already integrated: the tip plus other branch heads that
    /// are not being submitted.
    pub accepted: BTreeSet<Oid>,
    /// Commits to integrate, in patch set order.
    pub commits: Vec<CodeReviewCommit>,
}

/// Run the strategy selected by `ctx.submit_type`.
pub fn integrate(ctx: &StrategyContext<'_>, input: BranchInput) -> Result<BranchOutcome, MergeError> {
    debug!(
        branch = %ctx.branch,
        submit_type = ctx.submit_type.as_str(),
        commits = input.commits.len(),
        "integrating branch"
    );
    let mut run = BranchRun::new(ctx, input);
    let commits = run.input_commits();
    match ctx.submit_type {
        SubmitType::FastForwardOnly => fast_forward::run(&mut run, commits)?,
        SubmitType::MergeIfNecessary => merge::run(&mut run, commits, false)?,
        SubmitType::MergeAlways => merge::run(&mut run, commits, true)?,
        SubmitType::CherryPick => cherry_pick::run(&mut run, commits)?,
        SubmitType::RebaseIfNecessary => rebase::run(&mut run, commits, false)?,
        SubmitType::RebaseAlways => rebase::run(&mut run, commits, true)?,
    }
    run.finish()
}

#[derive(Debug, Clone)]
struct Outcome {
    kind: OpKind,
    status: Option<MergeStatus>,
    message: Option<String>,
    result: Option<Oid>,
    new_patch_set: Option<NewPatchSet>,
}

impl Default for Outcome {
    fn default() -> Self {
        Self {
            kind: OpKind::Implicit,
            status: None,
            message: None,
            result: None,
            new_patch_set: None,
        }
    }
}

/// State of one branch during one attempt.
pub struct BranchRun<'c, 'a> {
    ctx: &'c StrategyContext<'a>,
    commits: Vec<CodeReviewCommit>,
    incoming: BTreeSet<Oid>,
    initial_accepted: BTreeSet<Oid>,
    /// Grows as rebase steps accept new tips.
    accepted: BTreeSet<Oid>,
    tip: MergeTip,
    outcomes: BTreeMap<Oid, Outcome>,
    /// Commits with an explicit step, in step order.
    explicit: Vec<Oid>,
}

impl<'c, 'a> BranchRun<'c, 'a> {
    fn new(ctx: &'c StrategyContext<'a>, input: BranchInput) -> Self {
        let incoming: BTreeSet<Oid> = input.commits.iter().map(|c| c.id.clone()).collect();
        let mut accepted = input.accepted;
        accepted.extend(input.initial_tip.iter().cloned());
        Self {
            ctx,
            tip: MergeTip::new(input.initial_tip, &incoming),
            commits: input.commits,
            incoming,
            initial_accepted: accepted.clone(),
            accepted,
            outcomes: BTreeMap::new(),
            explicit: Vec::new(),
        }
    }

    fn input_commits(&self) -> Vec<CodeReviewCommit> {
        self.commits.clone()
    }

    fn git(&self) -> &'a Git {
        self.ctx.git
    }

    fn sort_context(&self) -> SortContext<'_> {
        SortContext {
            git: self.ctx.git,
            project: &self.ctx.branch.project,
            dest: &self.ctx.branch.branch,
            incoming: &self.incoming,
            lookup: self.ctx.lookup,
        }
    }

    fn initial_tip(&self) -> Option<Oid> {
        self.tip.initial().cloned()
    }

    fn current_tip(&self) -> Option<Oid> {
        self.tip.current().cloned()
    }

    fn commit(&self, id: &Oid) -> Option<&CodeReviewCommit> {
        self.commits.iter().find(|c| &c.id == id)
    }

    fn change(&self, commit: &CodeReviewCommit) -> Result<&'a Change, MergeError> {
        self.ctx.changes.get(&commit.change()).ok_or_else(|| {
            MergeError::Internal(format!("change {} is not part of the submission", commit.change()))
        })
    }

    fn outcome(&mut self, commit: &Oid) -> &mut Outcome {
        self.outcomes.entry(commit.clone()).or_default()
    }

    fn has_status(&self, commit: &Oid) -> bool {
        self.outcomes.get(commit).is_some_and(|o| o.status.is_some())
    }

    /// Register an explicit step for `commit`.
    fn step(&mut self, commit: &CodeReviewCommit, kind: OpKind) {
        self.outcome(&commit.id).kind = kind;
        if !self.explicit.contains(&commit.id) {
            self.explicit.push(commit.id.clone());
        }
    }

    fn set_status(&mut self, commit: &Oid, status: MergeStatus, message: Option<String>) {
        debug!(%commit, ?status, "commit status");
        let outcome = self.outcome(commit);
        outcome.status = Some(status);
        outcome.message = message;
    }

    fn record_rejections(&mut self, sorted: &SortOutcome) {
        for rejection in &sorted.rejected {
            self.set_status(
                &rejection.commit,
                rejection.status,
                Some(rejection.message.clone()),
            );
        }
    }

    fn accept_tip(&mut self) {
        if let Some(tip) = self.current_tip() {
            self.accepted.insert(tip);
        }
    }

    // =========================================================================
    // Sorting helpers
    // =========================================================================

    /// Merge heads of `candidates` in patch set order; rejections are recorded.
    fn reduce_to_minimal_merge(
        &mut self,
        candidates: &[CodeReviewCommit],
    ) -> Result<Vec<CodeReviewCommit>, MergeError> {
        let sorted = sorter::merge_sort(self.sort_context(), &self.accepted, candidates)?;
        self.record_rejections(&sorted);
        let mut heads: Vec<CodeReviewCommit> = sorted
            .sorted
            .iter()
            .filter_map(|id| self.commit(id).cloned())
            .collect();
        heads.sort_by(CodeReviewCommit::order);
        Ok(heads)
    }

    /// Whether sorting `commit` alone rejects it; the rejection is recorded.
    fn has_missing_dependencies(&mut self, commit: &CodeReviewCommit) -> Result<bool, MergeError> {
        let sorted = sorter::merge_sort(
            self.sort_context(),
            &self.accepted,
            std::slice::from_ref(commit),
        )?;
        self.record_rejections(&sorted);
        Ok(sorted.is_rejected(&commit.id))
    }

    /// First candidate descending from `tip` (any candidate if unborn), removed from the list.
    fn take_first_fast_forward(
        &self,
        sorted: &mut Vec<CodeReviewCommit>,
    ) -> Result<Option<CodeReviewCommit>, MergeError> {
        let tip = self.initial_tip();
        for (i, n) in sorted.iter().enumerate() {
            let descends = match &tip {
                None => true,
                Some(tip) => self.git().is_ancestor(tip, &n.id)?,
            };
            if descends {
                return Ok(Some(sorted.remove(i)));
            }
        }
        Ok(None)
    }

    fn can_fast_forward(&mut self, commit: &CodeReviewCommit) -> Result<bool, MergeError> {
        if self.has_missing_dependencies(commit)? {
            return Ok(false);
        }
        match self.current_tip() {
            None => Ok(true),
            Some(tip) => Ok(self.git().is_ancestor(&tip, &commit.id)?
                || self.git().is_ancestor(&commit.id, &tip)?),
        }
    }

    fn is_empty_commit(&self, commit: &CodeReviewCommit) -> Result<bool, MergeError> {
        match commit.parents.first() {
            None => Ok(false),
            Some(parent) => Ok(self.git().commit_info(parent)?.tree == commit.tree),
        }
    }

    fn tree_of(&self, commit: &Oid) -> Result<Oid, MergeError> {
        Ok(self.git().commit_info(commit)?.tree)
    }

    /// Next free patch set number, considering both the store and the refs.
    fn next_patch_set(&self, commit: &CodeReviewCommit) -> Result<PatchSetId, MergeError> {
        let change = self.change(commit)?;
        let from_store = change.next_patch_set_id();
        let from_refs = self
            .git()
            .list_refs_by_prefix(&change.id.refs_prefix())?
            .iter()
            .filter_map(|r| PatchSetId::from_ref(r.name.as_str()))
            .map(|ps| ps.next())
            .max();
        Ok(match from_refs {
            Some(ps) if ps.number > from_store.number => ps,
            _ => from_store,
        })
    }

    // =========================================================================
    // Shared steps
    // =========================================================================

    /// Record `AlreadyMerged` if a patch set of the change is reachable
    /// from the initial tip.
    fn skip_if_already_merged(&mut self, commit: &CodeReviewCommit) -> Result<bool, MergeError> {
        let Some(tip) = self.initial_tip() else {
            return Ok(false);
        };
        let mut matches = Vec::new();
        for entry in self.git().list_refs_by_prefix(&commit.change().refs_prefix())? {
            let Some(ps) = PatchSetId::from_ref(entry.name.as_str()) else {
                continue;
            };
            if self.git().is_ancestor(&entry.oid, &tip)? {
                matches.push((ps, entry.oid));
            }
        }
        let Some((ps, merged)) = matches.into_iter().max_by_key(|(ps, _)| ps.number) else {
            return Ok(false);
        };

        debug!(commit = %commit.id, patch_set = %ps, "already merged");
        self.step(commit, OpKind::AlreadyMerged);
        self.set_status(&commit.id, MergeStatus::AlreadyMerged, None);
        let outcome = self.outcome(&commit.id);
        outcome.result = Some(merged.clone());
        if ps != commit.origin.patch_set {
            outcome.new_patch_set = Some(NewPatchSet { id: ps, commit: merged });
        }
        Ok(true)
    }

    /// Move the tip to `commit` itself.
    fn fast_forward(&mut self, commit: &CodeReviewCommit) -> Result<(), MergeError> {
        self.step(commit, OpKind::FastForward);
        if self.skip_if_already_merged(commit)? {
            return Ok(());
        }
        if self.ctx.reject_empty_commit && self.is_empty_commit(commit)? {
            self.set_status(&commit.id, MergeStatus::EmptyCommit, None);
            return Ok(());
        }
        self.tip.move_to(commit.id.clone(), &commit.id);
        self.set_status(&commit.id, MergeStatus::CleanMerge, None);
        self.outcome(&commit.id).result = Some(commit.id.clone());
        Ok(())
    }

    /// Merge `commit` into the current tip with a two-parent merge commit.
    fn merge_one(
        &mut self,
        commit: &CodeReviewCommit,
        committer: &PersonIdent,
    ) -> Result<(), MergeError> {
        let Some(tip) = self.current_tip() else {
            return Err(MergeError::Internal(format!(
                "cannot merge commit {} onto a null tip; expected at least one fast-forward \
                 prior to this operation",
                commit.id
            )));
        };

        let tree = match self
            .git()
            .merge_trees(&tip, &commit.id, self.ctx.use_content_merge)?
        {
            TreeMerge::Clean(tree) => tree,
            TreeMerge::Conflict(paths) => {
                debug!(commit = %commit.id, ?paths, "merge conflict");
                return self.fail_walk(commit, MergeStatus::PathConflict, None);
            }
            TreeMerge::NoMergeBase => {
                return self.fail_walk(commit, MergeStatus::ManualRecursiveMerge, None);
            }
        };
        if self.ctx.reject_empty_commit && tree == self.tree_of(&tip)? {
            return self.fail_walk(commit, MergeStatus::EmptyCommit, None);
        }

        let mut merged = Vec::new();
        for id in self.git().rev_list(
            std::slice::from_ref(&commit.id),
            std::slice::from_ref(&tip),
            WalkOrder::NewestFirst,
        )? {
            if let Some(c) = self.commit(&id) {
                merged.push(MergedEntry::new(&c.subject, self.change(c)?));
            }
        }
        let message = merge_commit_message(&merged, &self.ctx.branch.branch);
        let merge = self.git().create_commit(&NewCommit {
            tree,
            parents: vec![tip, commit.id.clone()],
            author: self.ctx.caller.clone(),
            committer: committer.clone(),
            message,
        })?;
        let merge = (self.ctx.amend)(&merge)?;
        debug!(commit = %commit.id, %merge, "merged");
        self.tip.move_to(merge, &commit.id);
        Ok(())
    }

    /// Integrate a commit with several parents without rewriting it.
    fn merge_multi_parent(&mut self, commit: &CodeReviewCommit) -> Result<(), MergeError> {
        self.step(commit, OpKind::MergeOne);
        if self.skip_if_already_merged(commit)? {
            return Ok(());
        }
        if self.has_missing_dependencies(commit)? {
            return Ok(());
        }
        if self.can_fast_forward(commit)? {
            self.fast_forward_amended(commit)?;
        } else {
            let caller = self.ctx.caller.clone();
            self.merge_one(commit, &caller)?;
        }
        self.accept_tip();
        Ok(())
    }

    /// Fast-forward onto `commit`, rewritten by the amend hook.
    ///
    /// A commit already contained in the tip leaves the tip in place.
    fn fast_forward_amended(&mut self, commit: &CodeReviewCommit) -> Result<(), MergeError> {
        let contained = match self.current_tip() {
            Some(tip) => tip != commit.id && self.git().is_ancestor(&commit.id, &tip)?,
            None => false,
        };
        if contained {
            if let Some(tip) = self.current_tip() {
                self.tip.record(&commit.id, tip);
            }
        } else {
            let amended = (self.ctx.amend)(&commit.id)?;
            self.tip.move_to(amended, &commit.id);
        }
        self.set_status(&commit.id, MergeStatus::CleanMerge, None);
        Ok(())
    }

    /// Fail `commit` and every not yet integrated submitted commit it brings.
    fn fail_walk(
        &mut self,
        commit: &CodeReviewCommit,
        status: MergeStatus,
        message: Option<String>,
    ) -> Result<(), MergeError> {
        let hide: Vec<Oid> = self.current_tip().into_iter().collect();
        let walked = self.git().rev_list(
            std::slice::from_ref(&commit.id),
            &hide,
            WalkOrder::NewestFirst,
        )?;
        for id in walked {
            if id == commit.id || (self.incoming.contains(&id) && !self.has_status(&id)) {
                self.set_status(&id, status, message.clone());
            }
        }
        Ok(())
    }

    // =========================================================================
    // Completion
    // =========================================================================

    /// Mark submitted commits reachable from the new tip as clean merges.
    fn mark_clean_merges(&mut self) -> Result<(), MergeError> {
        let Some(tip) = self.current_tip() else {
            return Ok(());
        };
        let hide: Vec<Oid> = self.initial_accepted.iter().cloned().collect();
        for id in self
            .git()
            .rev_list(std::slice::from_ref(&tip), &hide, WalkOrder::NewestFirst)?
        {
            if self.incoming.contains(&id) && !self.has_status(&id) {
                self.set_status(&id, MergeStatus::CleanMerge, None);
            }
        }
        Ok(())
    }

    /// Give commits left behind by a failed head that head's status.
    fn inherit_failures(&mut self) -> Result<(), MergeError> {
        let failed: Vec<(Oid, MergeStatus, Option<String>)> = self
            .explicit
            .iter()
            .filter_map(|id| {
                let outcome = self.outcomes.get(id)?;
                let status = outcome.status?;
                (!status.is_success()).then(|| (id.clone(), status, outcome.message.clone()))
            })
            .collect();
        let mut hide: Vec<Oid> = self.accepted.iter().cloned().collect();
        hide.extend(self.current_tip());
        for (head, status, message) in failed {
            for id in self
                .git()
                .rev_list(std::slice::from_ref(&head), &hide, WalkOrder::NewestFirst)?
            {
                if self.incoming.contains(&id) && !self.has_status(&id) {
                    self.set_status(&id, status, message.clone());
                }
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Result<BranchOutcome, MergeError> {
        self.mark_clean_merges()?;
        self.inherit_failures()?;

        let mut order: Vec<Oid> = self
            .commits
            .iter()
            .rev()
            .map(|c| c.id.clone())
            .filter(|id| !self.explicit.contains(id))
            .collect();
        order.extend(self.explicit.iter().cloned());

        let mut ops = Vec::with_capacity(order.len());
        for id in order {
            let Some(commit) = self.commit(&id) else {
                continue;
            };
            let outcome = self.outcomes.get(&id).cloned().unwrap_or_default();
            let result = match (&outcome.result, outcome.status) {
                (Some(result), _) => Some(result.clone()),
                (None, Some(status)) if status.is_success() => {
                    self.tip.merge_results().get(&id).cloned()
                }
                _ => None,
            };
            ops.push(CommitOp {
                change: commit.change(),
                patch_set: commit.origin.patch_set,
                source: id.clone(),
                kind: outcome.kind,
                status: outcome.status,
                status_message: outcome.message,
                result,
                new_patch_set: outcome.new_patch_set,
            });
        }

        debug!(
            branch = %self.ctx.branch,
            tip = ?self.tip.current(),
            ops = ops.len(),
            "branch integrated"
        );
        Ok(BranchOutcome {
            branch: self.ctx.branch.clone(),
            ops,
            tip: self.tip,
        })
    }
}
