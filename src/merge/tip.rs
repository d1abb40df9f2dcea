//! merge::tip
//!
//! The moving tip of one branch during a submit attempt.

use std::collections::BTreeMap;

use crate::core::types::Oid;

/// Current tip of a branch plus what each submitted commit became.
///
/// # Invariants
///
/// - `current` only moves forward: every value it takes descends from the
///   previous one
/// - Every commit passed to [`MergeTip::new`] is a key of `merge_results`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeTip {
    initial: Option<Oid>,
    current: Option<Oid>,
    merge_results: BTreeMap<Oid, Oid>,
}

impl MergeTip {
    /// Start at `initial` (`None` for an unborn branch).
    ///
    /// Each commit in `to_merge` initially maps to itself.
    pub fn new<'a>(initial: Option<Oid>, to_merge: impl IntoIterator<Item = &'a Oid>) -> Self {
        Self {
            current: initial.clone(),
            initial,
            merge_results: to_merge.into_iter().map(|c| (c.clone(), c.clone())).collect(),
        }
    }

    pub fn initial(&self) -> Option<&Oid> {
        self.initial.as_ref()
    }

    pub fn current(&self) -> Option<&Oid> {
        self.current.as_ref()
    }

    /// Advance to `new_tip`, recording it as the integration of `for_commit`.
    pub fn move_to(&mut self, new_tip: Oid, for_commit: &Oid) {
        self.merge_results.insert(for_commit.clone(), new_tip.clone());
        self.current = Some(new_tip);
    }

    /// Record that `for_commit` is integrated as `result` without moving.
    pub fn record(&mut self, for_commit: &Oid, result: Oid) {
        self.merge_results.insert(for_commit.clone(), result);
    }

    /// Submitted commit to the commit that integrated it.
    pub fn merge_results(&self) -> &BTreeMap<Oid, Oid> {
        &self.merge_results
    }

    /// Whether the tip moved away from its initial value.
    pub fn moved(&self) -> bool {
        self.initial != self.current
    }
}
