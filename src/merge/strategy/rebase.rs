//! Rebase if necessary / rebase always.

use tracing::debug;

use super::{BranchRun, MergeError};
use crate::core::status::MergeStatus;
use crate::git::{NewCommit, TreeMerge};
use crate::merge::commit::CodeReviewCommit;
use crate::merge::message::message_on_submit;
use crate::merge::op::{NewPatchSet, OpKind};
use crate::merge::sorter;

pub(super) fn run(
    run: &mut BranchRun<'_, '_>,
    commits: Vec<CodeReviewCommit>,
    always: bool,
) -> Result<(), MergeError> {
    let initial = run.initial_tip();
    let outcome = sorter::rebase_sort(
        run.sort_context(),
        initial.as_ref(),
        &run.accepted,
        &commits,
    )?;
    run.record_rejections(&outcome);
    let mut sorted: Vec<CodeReviewCommit> = outcome
        .sorted
        .iter()
        .filter_map(|id| run.commit(id).cloned())
        .collect();
    if sorted.iter().any(CodeReviewCommit::is_merge) {
        // Rebasing around merge commits would duplicate them.
        sorted = run.reduce_to_minimal_merge(&sorted)?;
    }

    for (i, n) in sorted.iter().enumerate() {
        if i == 0 && initial.is_none() {
            run.fast_forward(n)?;
            run.accept_tip();
        } else if n.is_root() {
            run.step(n, OpKind::Root);
            if !run.skip_if_already_merged(n)? {
                run.set_status(&n.id, MergeStatus::CannotRebaseRoot, None);
            }
        } else if n.is_merge() {
            run.merge_multi_parent(n)?;
        } else {
            rebase_one(run, n, always)?;
        }
    }
    Ok(())
}

fn rebase_one(run: &mut BranchRun<'_, '_>, n: &CodeReviewCommit, always: bool) -> Result<(), MergeError> {
    run.step(n, OpKind::Rebase);
    if run.skip_if_already_merged(n)? {
        return Ok(());
    }
    if !always && run.can_fast_forward(n)? {
        run.fast_forward_amended(n)?;
        run.accept_tip();
        return Ok(());
    }
    let Some(tip) = run.current_tip() else {
        return Err(MergeError::Internal(format!(
            "cannot rebase {} onto an unborn branch",
            n.id
        )));
    };

    // Rebasing always merges file content, whatever the project setting.
    let tree = match run.git().cherry_pick(&n.id, &tip, true)? {
        TreeMerge::Clean(tree) => tree,
        TreeMerge::Conflict(_) | TreeMerge::NoMergeBase => {
            let message = format!(
                "Cannot rebase {}: The change could not be rebased due to a conflict during merge.",
                n.id
            );
            run.set_status(&n.id, MergeStatus::RebaseMergeConflict, Some(message));
            return Ok(());
        }
    };
    if run.ctx.reject_empty_commit && tree == run.tree_of(&tip)? {
        run.set_status(&n.id, MergeStatus::EmptyCommit, None);
        return Ok(());
    }

    let message = if always {
        message_on_submit(&n.message, run.change(n)?, run.ctx.canonical_web_url)
    } else {
        n.message.clone()
    };
    let rebased = run.git().create_commit(&NewCommit {
        tree,
        parents: vec![tip],
        author: n.author.clone(),
        committer: run.ctx.caller.clone(),
        message,
    })?;
    let rebased = (run.ctx.amend)(&rebased)?;
    let patch_set = run.next_patch_set(n)?;
    debug!(commit = %n.id, %rebased, %patch_set, "rebased");

    run.tip.move_to(rebased.clone(), &n.id);
    run.set_status(&n.id, MergeStatus::CleanRebase, None);
    let outcome = run.outcome(&n.id);
    outcome.result = Some(rebased.clone());
    outcome.new_patch_set = Some(NewPatchSet {
        id: patch_set,
        commit: rebased,
    });
    run.accept_tip();
    Ok(())
}
