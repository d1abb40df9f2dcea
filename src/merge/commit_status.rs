//! merge::commit_status
//!
//! Per-attempt ledger of what happened to each change.

use std::collections::BTreeMap;

use super::op::{BranchOutcome, CommitOp};
use crate::core::types::{BranchKey, ChangeId};

/// Problems and outcomes for every change of one submit attempt.
///
/// Created fresh for every attempt. [`CommitStatus::is_ok`] holds iff no
/// change has a recorded problem.
#[derive(Debug, Clone, Default)]
pub struct CommitStatus {
    expected: BTreeMap<ChangeId, BranchKey>,
    ops: BTreeMap<ChangeId, CommitOp>,
    problems: BTreeMap<ChangeId, Vec<String>>,
}

impl CommitStatus {
    /// Ledger for the given changes and their destination branches.
    pub fn new(changes: impl IntoIterator<Item = (ChangeId, BranchKey)>) -> Self {
        Self {
            expected: changes.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn problem(&mut self, change: ChangeId, problem: impl Into<String>) {
        self.problems.entry(change).or_default().push(problem.into());
    }

    /// Take the ops produced for one branch.
    pub fn record(&mut self, outcome: &BranchOutcome) {
        for op in &outcome.ops {
            self.ops.insert(op.change, op.clone());
        }
    }

    pub fn op(&self, change: ChangeId) -> Option<&CommitOp> {
        self.ops.get(&change)
    }

    pub fn ops(&self) -> impl Iterator<Item = &CommitOp> {
        self.ops.values()
    }

    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }

    pub fn problems(&self) -> &BTreeMap<ChangeId, Vec<String>> {
        &self.problems
    }

    /// Record a problem for every change that has no op or a failed one.
    ///
    /// Changes that already have a problem are left alone.
    pub fn check_all_processed(&mut self) {
        let ids: Vec<ChangeId> = self.expected.keys().copied().collect();
        for id in ids {
            if self.problems.contains_key(&id) {
                continue;
            }
            let problem = match self.ops.get(&id) {
                Some(op) if op.is_success() => continue,
                Some(op) => op.problem(),
                None => "internal error: change not processed by merge strategy".to_string(),
            };
            self.problem(id, problem);
        }
    }

    /// The aggregated failure report, or `None` if there are no problems.
    pub fn failure_message(&self) -> Option<String> {
        if self.is_ok() {
            return None;
        }
        let count = self.expected.len().max(self.problems.len());
        let lines: Vec<String> = self
            .problems
            .iter()
            .map(|(id, problems)| format!("Change {}: {}", id, problems.join("; ")))
            .collect();
        Some(format!(
            "Failed to submit {} change{} due to the following problems:\n{}",
            count,
            if count > 1 { "s" } else { "" },
            lines.join("\n")
        ))
    }
}
