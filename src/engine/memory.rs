//! engine::memory
//!
//! In-memory collaborators for testing and embedding.
//!
//! # Design
//!
//! Each type keeps its state behind an internal `Arc<Mutex<...>>`, so
//! clones share state: a test keeps one handle for assertions and hands
//! another to the engine. The change store can be configured to fail a
//! specific operation and records every call it receives.
//!
//! # Example
//!
//! ```
//! use submit_engine::engine::memory::{FailOn, InMemoryChangeStore};
//! use submit_engine::engine::ports::ChangeStore;
//! use submit_engine::core::types::ChangeId;
//!
//! let store = InMemoryChangeStore::new().fail_on(FailOn::SetMerged("disk full".into()));
//! assert!(store.get(ChangeId::new(1)).unwrap().is_none());
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::anyhow;

use super::ports::{
    ChangeStore, CurrentUser, MergedEvent, MergedListener, MergedUpdate, PermissionBackend,
    SubmitRecord, SubmitRuleEvaluator,
};
use crate::core::change::{Approval, Change, ChangeStatus, PatchSet};
use crate::core::types::{BranchKey, ChangeId, Oid, PatchSetId, ProjectName};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Change store holding snapshots in memory.
///
/// Thread-safe via internal `Arc<Mutex<...>>` wrapping.
#[derive(Debug, Clone, Default)]
pub struct InMemoryChangeStore {
    inner: Arc<Mutex<StoreInner>>,
}

#[derive(Debug, Default)]
struct StoreInner {
    changes: BTreeMap<ChangeId, Change>,
    fail_on: Option<FailOn>,
    operations: Vec<StoreOperation>,
}

/// Which store operation should fail, with the error message to report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOn {
    Get(String),
    InsertPatchSet(String),
    SetMerged(String),
}

/// Recorded store call for test verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOperation {
    Get { change: ChangeId },
    OpenByTopic { topic: String },
    OpenOnBranchByCommits { branch: BranchKey, commits: usize },
    ByCommit { project: ProjectName, commit: Oid },
    InsertPatchSet { change: ChangeId, patch_set: PatchSetId },
    SetMerged { change: ChangeId, patch_set: PatchSetId },
}

impl StoreOperation {
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            StoreOperation::InsertPatchSet { .. } | StoreOperation::SetMerged { .. }
        )
    }
}

impl InMemoryChangeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with pre-existing changes.
    pub fn with_changes(changes: impl IntoIterator<Item = Change>) -> Self {
        let store = Self::new();
        for change in changes {
            store.insert(change);
        }
        store
    }

    /// Add or replace a change.
    pub fn insert(&self, change: Change) {
        lock(&self.inner).changes.insert(change.id, change);
    }

    /// Configure the store to fail on a specific operation.
    pub fn fail_on(self, fail_on: FailOn) -> Self {
        lock(&self.inner).fail_on = Some(fail_on);
        self
    }

    pub fn clear_fail_on(&self) {
        lock(&self.inner).fail_on = None;
    }

    /// Get all recorded operations.
    pub fn operations(&self) -> Vec<StoreOperation> {
        lock(&self.inner).operations.clone()
    }

    /// Recorded operations that wrote something.
    pub fn mutations(&self) -> Vec<StoreOperation> {
        self.operations().into_iter().filter(StoreOperation::is_mutation).collect()
    }

    pub fn clear_operations(&self) {
        lock(&self.inner).operations.clear();
    }

    /// Get a change (for test verification).
    pub fn change(&self, id: ChangeId) -> Option<Change> {
        lock(&self.inner).changes.get(&id).cloned()
    }

    fn record(&self, op: StoreOperation) {
        lock(&self.inner).operations.push(op);
    }

    fn check_fail(&self, expected: &str) -> anyhow::Result<()> {
        let inner = lock(&self.inner);
        match &inner.fail_on {
            Some(FailOn::Get(m)) if expected == "get" => Err(anyhow!("{m}")),
            Some(FailOn::InsertPatchSet(m)) if expected == "insert_patch_set" => Err(anyhow!("{m}")),
            Some(FailOn::SetMerged(m)) if expected == "set_merged" => Err(anyhow!("{m}")),
            _ => Ok(()),
        }
    }

    fn open_matching(&self, pred: impl Fn(&Change) -> bool) -> Vec<Change> {
        lock(&self.inner)
            .changes
            .values()
            .filter(|c| c.is_open() && pred(c))
            .cloned()
            .collect()
    }
}

impl ChangeStore for InMemoryChangeStore {
    fn get(&self, id: ChangeId) -> anyhow::Result<Option<Change>> {
        self.record(StoreOperation::Get { change: id });
        self.check_fail("get")?;
        Ok(self.change(id))
    }

    fn open_by_topic(&self, topic: &str) -> anyhow::Result<Vec<Change>> {
        self.record(StoreOperation::OpenByTopic {
            topic: topic.to_string(),
        });
        Ok(self.open_matching(|c| c.topic() == Some(topic)))
    }

    fn open_on_branch_by_commits(&self, branch: &BranchKey, commits: &[Oid]) -> anyhow::Result<Vec<Change>> {
        self.record(StoreOperation::OpenOnBranchByCommits {
            branch: branch.clone(),
            commits: commits.len(),
        });
        let commits: BTreeSet<&Oid> = commits.iter().collect();
        Ok(self.open_matching(|c| {
            &c.branch_key() == branch
                && c.current_patch_set().is_some_and(|ps| commits.contains(&ps.commit))
        }))
    }

    fn by_commit(&self, project: &ProjectName, commit: &Oid) -> anyhow::Result<Vec<Change>> {
        self.record(StoreOperation::ByCommit {
            project: project.clone(),
            commit: commit.clone(),
        });
        Ok(lock(&self.inner)
            .changes
            .values()
            .filter(|c| &c.project == project && c.patch_sets.iter().any(|ps| &ps.commit == commit))
            .cloned()
            .collect())
    }

    fn insert_patch_set(&self, change: ChangeId, patch_set: PatchSet, copy_from: PatchSetId) -> anyhow::Result<()> {
        self.record(StoreOperation::InsertPatchSet {
            change,
            patch_set: patch_set.id,
        });
        self.check_fail("insert_patch_set")?;

        let mut inner = lock(&self.inner);
        let c = inner
            .changes
            .get_mut(&change)
            .ok_or_else(|| anyhow!("change {change} not found"))?;
        if c.patch_set(patch_set.id).is_some() {
            return Err(anyhow!("patch set {} already exists", patch_set.id));
        }
        let copied: Vec<Approval> = c
            .approvals_on(copy_from)
            .map(|a| a.copied_to(patch_set.id))
            .collect();
        c.current_patch_set = patch_set.id;
        c.patch_sets.push(patch_set);
        c.approvals.extend(copied);
        Ok(())
    }

    fn set_merged(&self, update: &MergedUpdate) -> anyhow::Result<()> {
        self.record(StoreOperation::SetMerged {
            change: update.change,
            patch_set: update.patch_set,
        });
        self.check_fail("set_merged")?;

        let mut inner = lock(&self.inner);
        let c = inner
            .changes
            .get_mut(&update.change)
            .ok_or_else(|| anyhow!("change {} not found", update.change))?;
        c.status = ChangeStatus::Merged;
        c.current_patch_set = update.patch_set;
        c.submission_id = Some(update.submission_id.clone());
        c.approvals.push(Approval {
            patch_set: update.patch_set,
            account: update.submitter,
            label: Approval::SUBMIT_LABEL.to_string(),
            value: 1,
            granted: update.when,
        });
        c.messages.push(update.message.clone());
        Ok(())
    }
}

/// Permissions where every change is readable unless hidden.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPermissions {
    hidden: Arc<Mutex<BTreeSet<ChangeId>>>,
}

impl InMemoryPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hide(&self, change: ChangeId) {
        lock(&self.hidden).insert(change);
    }
}

impl PermissionBackend for InMemoryPermissions {
    fn can_read(&self, _user: &CurrentUser, change: &Change) -> anyhow::Result<bool> {
        Ok(!lock(&self.hidden).contains(&change.id))
    }
}

/// Submit rules that pass unless a record was set for the change.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRules {
    records: Arc<Mutex<BTreeMap<ChangeId, SubmitRecord>>>,
}

impl InMemoryRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, change: ChangeId, record: SubmitRecord) {
        lock(&self.records).insert(change, record);
    }
}

impl SubmitRuleEvaluator for InMemoryRules {
    fn evaluate(&self, change: &Change) -> anyhow::Result<SubmitRecord> {
        Ok(lock(&self.records)
            .get(&change.id)
            .cloned()
            .unwrap_or_else(SubmitRecord::ok))
    }
}

/// Listener that keeps every event it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingListener {
    events: Arc<Mutex<Vec<MergedEvent>>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MergedEvent> {
        lock(&self.events).clone()
    }
}

impl MergedListener for RecordingListener {
    fn on_merged(&self, event: &MergedEvent) -> anyhow::Result<()> {
        lock(&self.events).push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::core::types::{AccountId, RefName, SubmissionId};

    fn oid(c: char) -> Oid {
        Oid::new(c.to_string().repeat(40)).unwrap()
    }

    fn change(id: u32, commit: char, topic: Option<&str>) -> Change {
        let id = ChangeId::new(id);
        let ps = PatchSetId::new(id, 1);
        Change {
            id,
            key: None,
            project: ProjectName::new("p").unwrap(),
            dest: RefName::new("refs/heads/main").unwrap(),
            status: ChangeStatus::New,
            topic: topic.map(str::to_string),
            owner: AccountId::new(1),
            subject: format!("change {id}"),
            work_in_progress: false,
            current_patch_set: ps,
            patch_sets: vec![PatchSet {
                id: ps,
                commit: oid(commit),
                groups: vec![],
                uploader: AccountId::new(1),
                created: Utc::now(),
            }],
            approvals: vec![Approval {
                patch_set: ps,
                account: AccountId::new(2),
                label: "Code-Review".into(),
                value: 2,
                granted: Utc::now(),
            }],
            submission_id: None,
            messages: vec![],
        }
    }

    mod store {
        use super::*;

        #[test]
        fn queries_only_return_open_changes() {
            let mut merged = change(3, 'c', Some("t"));
            merged.status = ChangeStatus::Merged;
            let store = InMemoryChangeStore::with_changes([
                change(1, 'a', Some("t")),
                change(2, 'b', None),
                merged,
            ]);

            let topic: Vec<ChangeId> = store.open_by_topic("t").unwrap().iter().map(|c| c.id).collect();
            assert_eq!(topic, vec![ChangeId::new(1)]);

            let branch = change(1, 'a', None).branch_key();
            let found = store
                .open_on_branch_by_commits(&branch, &[oid('b'), oid('c')])
                .unwrap();
            assert_eq!(found.len(), 1);
            assert_eq!(found[0].id, ChangeId::new(2));

            let project = ProjectName::new("p").unwrap();
            assert_eq!(store.by_commit(&project, &oid('c')).unwrap().len(), 1);
        }

        #[test]
        fn insert_patch_set_copies_votes() {
            let store = InMemoryChangeStore::with_changes([change(1, 'a', None)]);
            let id = ChangeId::new(1);
            let ps2 = PatchSetId::new(id, 2);
            store
                .insert_patch_set(
                    id,
                    PatchSet {
                        id: ps2,
                        commit: oid('b'),
                        groups: vec![],
                        uploader: AccountId::new(9),
                        created: Utc::now(),
                    },
                    PatchSetId::new(id, 1),
                )
                .unwrap();

            let c = store.change(id).unwrap();
            assert_eq!(c.current_patch_set, ps2);
            assert_eq!(c.approvals_on(ps2).count(), 1);
            assert_eq!(store.mutations().len(), 1);
        }

        #[test]
        fn set_merged_records_submitter() {
            let store = InMemoryChangeStore::with_changes([change(1, 'a', None)]);
            let id = ChangeId::new(1);
            let now = Utc::now();
            store
                .set_merged(&MergedUpdate {
                    change: id,
                    patch_set: PatchSetId::new(id, 1),
                    submission_id: SubmissionId::new(id, now),
                    submitter: AccountId::new(7),
                    when: now,
                    message: "merged".into(),
                })
                .unwrap();

            let c = store.change(id).unwrap();
            assert_eq!(c.status, ChangeStatus::Merged);
            assert!(c.submission_id.is_some());
            assert!(c
                .approvals
                .iter()
                .any(|a| a.label == Approval::SUBMIT_LABEL && a.account == AccountId::new(7)));
            assert_eq!(c.messages, vec!["merged".to_string()]);
        }

        #[test]
        fn configured_failure() {
            let store = InMemoryChangeStore::with_changes([change(1, 'a', None)])
                .fail_on(FailOn::Get("unavailable".into()));
            let err = store.get(ChangeId::new(1)).unwrap_err();
            assert_eq!(err.to_string(), "unavailable");

            store.clear_fail_on();
            assert!(store.get(ChangeId::new(1)).unwrap().is_some());
            assert_eq!(store.operations().len(), 2);
        }
    }

    #[test]
    fn hidden_changes_are_not_readable() {
        let perms = InMemoryPermissions::new();
        let user = CurrentUser::new(AccountId::new(1), "u", "u@example.com");
        perms.hide(ChangeId::new(2));
        assert!(perms.can_read(&user, &change(1, 'a', None)).unwrap());
        assert!(!perms.can_read(&user, &change(2, 'b', None)).unwrap());
    }

    #[test]
    fn rules_default_to_ok() {
        let rules = InMemoryRules::new();
        rules.set(ChangeId::new(2), SubmitRecord::needs("Verified"));
        assert!(rules.evaluate(&change(1, 'a', None)).unwrap().ok);
        assert!(!rules.evaluate(&change(2, 'b', None)).unwrap().ok);
    }
}
