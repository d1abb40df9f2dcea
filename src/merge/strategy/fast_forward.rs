//! Fast-forward only: the branch moves to one submitted commit or not at all.

use super::{BranchRun, MergeError};
use crate::core::status::MergeStatus;
use crate::merge::commit::CodeReviewCommit;
use crate::merge::op::OpKind;

pub(super) fn run(run: &mut BranchRun<'_, '_>, commits: Vec<CodeReviewCommit>) -> Result<(), MergeError> {
    let mut heads = run.reduce_to_minimal_merge(&commits)?;
    if let Some(first) = run.take_first_fast_forward(&mut heads)? {
        run.fast_forward(&first)?;
    }
    for n in heads {
        run.step(&n, OpKind::NotFastForward);
        if run.skip_if_already_merged(&n)? {
            continue;
        }
        run.set_status(&n.id, MergeStatus::NotFastForward, None);
    }
    Ok(())
}
