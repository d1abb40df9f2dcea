//! engine::plan
//!
//! The batch plan of one submit attempt.
//!
//! # Architecture
//!
//! Plans are the sole intermediate representation between the strategy
//! results of an attempt and any mutation of refs or change metadata.
//!
//! Plans are:
//! - **Deterministic**: The same attempt state produces the same plan
//! - **Previewable**: Dry runs return the plan instead of executing it
//! - **Typed**: Ref steps carry their expected old value for CAS
//!
//! # Invariants
//!
//! - Building a plan performs no I/O
//! - Every ref step names the value it expects to replace
//! - Ref steps of one project are applied together or not at all
//!
//! # Example
//!
//! ```
//! use submit_engine::core::types::{ChangeId, Oid, ProjectName, RefName, SubmissionId};
//! use submit_engine::engine::plan::{BatchPlan, PlanStep};
//!
//! let id = SubmissionId::new(ChangeId::new(1), chrono::Utc::now());
//! let plan = BatchPlan::new(id).with_step(PlanStep::UpdateRef {
//!     project: ProjectName::new("p").unwrap(),
//!     refname: RefName::new("refs/heads/main").unwrap(),
//!     old: Some(Oid::new("a".repeat(40)).unwrap()),
//!     new: Oid::new("b".repeat(40)).unwrap(),
//!     reason: "submit".to_string(),
//! });
//!
//! assert_eq!(plan.step_count(), 1);
//! assert!(plan.digest().unwrap().starts_with("sha256:"));
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::ports::MergedUpdate;
use crate::core::change::PatchSet;
use crate::core::types::{ChangeId, Oid, PatchSetId, ProjectName, RefName, SubmissionId};
use crate::git::RefUpdate;

/// A typed plan step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanStep {
    /// Move a ref with CAS semantics.
    UpdateRef {
        project: ProjectName,
        refname: RefName,
        /// Expected current value, or `None` if creating.
        old: Option<Oid>,
        new: Oid,
        /// Human-readable reason, also used as reflog message.
        reason: String,
    },

    /// Record a patch set created by a cherry-pick or rebase.
    InsertPatchSet {
        change: ChangeId,
        patch_set: PatchSet,
        /// Patch set whose votes carry over.
        copy_from: PatchSetId,
    },

    /// Mark a change merged.
    SetMerged { update: MergedUpdate },
}

impl PlanStep {
    /// Check if this step moves a ref.
    pub fn is_ref_update(&self) -> bool {
        matches!(self, PlanStep::UpdateRef { .. })
    }

    /// Get a human-readable description of this step.
    pub fn description(&self) -> String {
        match self {
            PlanStep::UpdateRef {
                project,
                refname,
                old,
                new,
                reason,
            } => {
                let old = old.as_ref().map_or("(new)", |o| o.short(7));
                format!(
                    "Update {}:{} {}..{}: {}",
                    project,
                    refname,
                    old,
                    new.short(7),
                    reason
                )
            }
            PlanStep::InsertPatchSet { patch_set, .. } => {
                format!("Create patch set {} at {}", patch_set.id, patch_set.commit.short(7))
            }
            PlanStep::SetMerged { update } => {
                format!("Mark change {} merged at patch set {}", update.change, update.patch_set)
            }
        }
    }
}

/// A complete batch plan.
///
/// Ref steps are applied before metadata steps, in plan order within
/// each project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchPlan {
    pub submission_id: SubmissionId,
    pub steps: Vec<PlanStep>,
}

impl BatchPlan {
    pub fn new(submission_id: SubmissionId) -> Self {
        Self {
            submission_id,
            steps: Vec::new(),
        }
    }

    /// Add a step to the plan (builder pattern).
    pub fn with_step(mut self, step: PlanStep) -> Self {
        self.push(step);
        self
    }

    pub fn push(&mut self, step: PlanStep) {
        self.steps.push(step);
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Whether the plan already moves `refname` in `project`.
    pub fn updates_ref(&self, project: &ProjectName, refname: &RefName) -> bool {
        self.steps.iter().any(|s| {
            matches!(s, PlanStep::UpdateRef { project: p, refname: r, .. } if p == project && r == refname)
        })
    }

    /// Ref updates grouped by project.
    ///
    /// Projects appear in the order of their first ref step, so submodule
    /// projects planned first are also written first.
    pub fn ref_updates_by_project(&self) -> Vec<(ProjectName, Vec<RefUpdate>)> {
        let mut out: Vec<(ProjectName, Vec<RefUpdate>)> = Vec::new();
        for step in &self.steps {
            let PlanStep::UpdateRef {
                project,
                refname,
                old,
                new,
                reason,
            } = step
            else {
                continue;
            };
            let update = RefUpdate {
                refname: refname.clone(),
                old: old.clone(),
                new: new.clone(),
                message: reason.clone(),
            };
            match out.iter_mut().find(|(p, _)| p == project) {
                Some((_, updates)) => updates.push(update),
                None => out.push((project.clone(), vec![update])),
            }
        }
        out
    }

    /// Steps that write change metadata.
    pub fn store_steps(&self) -> impl Iterator<Item = &PlanStep> {
        self.steps.iter().filter(|s| !s.is_ref_update())
    }

    /// Compute a digest of the plan for integrity checking.
    ///
    /// The digest is a SHA-256 hash of the canonical JSON serialization.
    ///
    /// # Errors
    ///
    /// Returns the serialization error if the plan cannot be encoded.
    pub fn digest(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&json);
        let hash = hasher.finalize();
        Ok(format!("sha256:{}", hex::encode(hash)))
    }

    /// Generate a preview string for dry runs and logs.
    pub fn preview(&self) -> String {
        if self.is_empty() {
            return format!("submission {}: No changes needed", self.submission_id);
        }

        let mut lines = vec![format!("submission {}:", self.submission_id)];
        for (i, step) in self.steps.iter().enumerate() {
            lines.push(format!("  {}. {}", i + 1, step.description()));
        }
        lines.join("\n")
    }
}
