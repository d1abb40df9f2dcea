//! engine::metrics
//!
//! Process-wide submit counters. They survive retries and are shared by
//! every [`MergeOp`](super::MergeOp) built with the same collaborators.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct SubmitMetrics {
    topic_submissions: AtomicU64,
    topic_submissions_completed: AtomicU64,
}

impl SubmitMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a submission spanning more than one project.
    pub fn record_topic_submission(&self, projects: usize) {
        if projects > 1 {
            self.topic_submissions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_topic_submission_completed(&self, projects: usize) {
        if projects > 1 {
            self.topic_submissions_completed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn topic_submissions(&self) -> u64 {
        self.topic_submissions.load(Ordering::Relaxed)
    }

    pub fn topic_submissions_completed(&self) -> u64 {
        self.topic_submissions_completed.load(Ordering::Relaxed)
    }
}
