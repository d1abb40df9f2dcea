//! Merge always / merge if necessary.

use super::{BranchRun, MergeError};
use crate::merge::commit::CodeReviewCommit;
use crate::merge::op::OpKind;

/// With `always`, only an unborn branch is fast-forwarded. Otherwise the
/// first head descending from the tip is, unless the branch has
/// subscribers: their gitlinks are updated by amending merge commits.
pub(super) fn run(
    run: &mut BranchRun<'_, '_>,
    commits: Vec<CodeReviewCommit>,
    always: bool,
) -> Result<(), MergeError> {
    let mut heads = run.reduce_to_minimal_merge(&commits)?;
    let unborn = run.initial_tip().is_none();

    if always {
        if unborn && !heads.is_empty() {
            let first = heads.remove(0);
            run.fast_forward(&first)?;
        }
    } else if unborn || !run.ctx.has_subscriptions {
        if let Some(first) = run.take_first_fast_forward(&mut heads)? {
            run.fast_forward(&first)?;
        }
    }

    let server = run.ctx.server.clone();
    for n in heads {
        run.step(&n, OpKind::MergeOne);
        if run.skip_if_already_merged(&n)? {
            continue;
        }
        run.merge_one(&n, &server)?;
    }
    Ok(())
}
