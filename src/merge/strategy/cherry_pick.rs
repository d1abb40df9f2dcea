//! Cherry-pick: each commit is re-applied on the tip as a new patch set.

use tracing::debug;

use super::{BranchRun, MergeError};
use crate::core::status::MergeStatus;
use crate::git::{NewCommit, TreeMerge};
use crate::merge::commit::CodeReviewCommit;
use crate::merge::message::message_on_submit;
use crate::merge::op::{NewPatchSet, OpKind};

pub(super) fn run(run: &mut BranchRun<'_, '_>, mut commits: Vec<CodeReviewCommit>) -> Result<(), MergeError> {
    commits.sort_by(CodeReviewCommit::order);
    for (i, n) in commits.iter().enumerate() {
        if i == 0 && run.initial_tip().is_none() {
            run.fast_forward(n)?;
        } else if n.is_root() {
            run.step(n, OpKind::Root);
            if !run.skip_if_already_merged(n)? {
                run.set_status(&n.id, MergeStatus::CannotCherryPickRoot, None);
            }
        } else if n.is_merge() {
            run.merge_multi_parent(n)?;
        } else {
            pick_one(run, n)?;
        }
    }
    Ok(())
}

fn pick_one(run: &mut BranchRun<'_, '_>, n: &CodeReviewCommit) -> Result<(), MergeError> {
    run.step(n, OpKind::CherryPick);
    if run.skip_if_already_merged(n)? {
        return Ok(());
    }
    let Some(tip) = run.current_tip() else {
        return Err(MergeError::Internal(format!(
            "cannot cherry-pick {} onto an unborn branch",
            n.id
        )));
    };

    let tree = match run.git().cherry_pick(&n.id, &tip, run.ctx.use_content_merge)? {
        TreeMerge::Clean(tree) => tree,
        TreeMerge::Conflict(paths) => {
            debug!(commit = %n.id, ?paths, "cherry-pick conflict");
            run.set_status(&n.id, MergeStatus::PathConflict, None);
            return Ok(());
        }
        TreeMerge::NoMergeBase => {
            run.set_status(&n.id, MergeStatus::PathConflict, None);
            return Ok(());
        }
    };

    if tree == run.tree_of(&tip)? {
        if run.ctx.reject_empty_commit {
            run.set_status(&n.id, MergeStatus::EmptyCommit, None);
        } else {
            run.set_status(&n.id, MergeStatus::SkippedIdenticalTree, None);
            run.outcome(&n.id).result = Some(tip);
        }
        return Ok(());
    }

    let change = run.change(n)?;
    let message = message_on_submit(&n.message, change, run.ctx.canonical_web_url);
    let picked = run.git().create_commit(&NewCommit {
        tree,
        parents: vec![tip],
        author: n.author.clone(),
        committer: run.ctx.caller.clone(),
        message,
    })?;
    let picked = (run.ctx.amend)(&picked)?;
    let patch_set = run.next_patch_set(n)?;
    debug!(commit = %n.id, %picked, %patch_set, "cherry-picked");

    run.tip.move_to(picked.clone(), &n.id);
    run.set_status(&n.id, MergeStatus::CleanPick, None);
    let outcome = run.outcome(&n.id);
    outcome.result = Some(picked.clone());
    outcome.new_patch_set = Some(NewPatchSet {
        id: patch_set,
        commit: picked,
    });
    Ok(())
}
