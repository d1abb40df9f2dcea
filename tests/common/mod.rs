//! Shared fixture for integration tests.
//!
//! A `TestServer` hosts bare repositories in a temporary directory and
//! keeps its changes in an in-memory store. Commits are written directly
//! with git2 so tests control every parent and tree.

#![allow(dead_code)]

use std::cell::Cell;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use submit_engine::core::change::{Approval, Change, ChangeStatus, PatchSet, SubmitType};
use submit_engine::core::config::Config;
use submit_engine::core::types::{AccountId, ChangeId, Oid, PatchSetId, ProjectName, RefName};
use submit_engine::engine::memory::{
    InMemoryChangeStore, InMemoryPermissions, InMemoryRules, RecordingListener,
};
use submit_engine::engine::{
    BatchExecutor, Collaborators, CurrentUser, LocalRepoManager, MergeOp, ProjectSettings,
    StaticProjectConfig,
};
use submit_engine::git::{Git, GitlinkEdit};

pub const MASTER: &str = "refs/heads/master";

pub struct TestServer {
    dir: TempDir,
    pub store: InMemoryChangeStore,
    pub permissions: InMemoryPermissions,
    pub rules: InMemoryRules,
    pub listener: RecordingListener,
    settings: BTreeMap<ProjectName, ProjectSettings>,
    next_change: Cell<u32>,
    clock: Cell<i64>,
}

impl TestServer {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("failed to create temp dir"),
            store: InMemoryChangeStore::new(),
            permissions: InMemoryPermissions::new(),
            rules: InMemoryRules::new(),
            listener: RecordingListener::new(),
            settings: BTreeMap::new(),
            next_change: Cell::new(1),
            clock: Cell::new(1_700_000_000),
        }
    }

    pub fn base(&self) -> &Path {
        self.dir.path()
    }

    fn manager(&self) -> LocalRepoManager {
        LocalRepoManager::new(self.dir.path())
    }

    /// Create a project whose master holds one commit with a README.
    pub fn create_project(&mut self, name: &str, submit_type: SubmitType) -> Oid {
        let project = ProjectName::new(name).unwrap();
        let path = self.manager().path_of(&project);
        Git::init_bare(&path).expect("failed to init repository");
        self.settings.insert(
            project,
            ProjectSettings {
                submit_type,
                ..ProjectSettings::default()
            },
        );
        let initial = self.commit(name, None, &[("README", "initial\n")], "Initial commit");
        self.set_branch(name, MASTER, &initial);
        initial
    }

    pub fn settings_mut(&mut self, name: &str) -> &mut ProjectSettings {
        self.settings
            .entry(ProjectName::new(name).unwrap())
            .or_default()
    }

    pub fn git(&self, name: &str) -> Git {
        Git::open(&self.manager().path_of(&ProjectName::new(name).unwrap())).unwrap()
    }

    fn repo(&self, name: &str) -> git2::Repository {
        git2::Repository::open_bare(self.manager().path_of(&ProjectName::new(name).unwrap())).unwrap()
    }

    fn signature(&self) -> git2::Signature<'static> {
        let now = self.clock.get();
        self.clock.set(now + 60);
        git2::Signature::new("Author", "author@example.com", &git2::Time::new(now, 0)).unwrap()
    }

    /// Write a commit adding or replacing top-level files on `parent`.
    pub fn commit(&self, name: &str, parent: Option<&Oid>, files: &[(&str, &str)], message: &str) -> Oid {
        let repo = self.repo(name);
        let base = parent.map(|p| repo.find_commit(to_git2(p)).unwrap().tree().unwrap());
        let mut builder = repo.treebuilder(base.as_ref()).unwrap();
        for (path, content) in files {
            let blob = repo.blob(content.as_bytes()).unwrap();
            builder.insert(*path, blob, 0o100644).unwrap();
        }
        let tree = from_git2(builder.write().unwrap());
        let parents: Vec<Oid> = parent.into_iter().cloned().collect();
        self.commit_tree(name, &parents, &tree, message)
    }

    /// Write a commit with the given tree and parents.
    pub fn commit_tree(&self, name: &str, parents: &[Oid], tree: &Oid, message: &str) -> Oid {
        let repo = self.repo(name);
        let tree = repo.find_tree(to_git2(tree)).unwrap();
        let parents: Vec<git2::Commit<'_>> = parents
            .iter()
            .map(|p| repo.find_commit(to_git2(p)).unwrap())
            .collect();
        let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();
        let sig = self.signature();
        let oid = repo
            .commit(None, &sig, &sig, message, &tree, &parent_refs)
            .unwrap();
        from_git2(oid)
    }

    /// Commit on `parent` that points gitlink `path` at `target`.
    pub fn commit_gitlink(&self, name: &str, parent: &Oid, path: &str, target: &Oid, message: &str) -> Oid {
        let git = self.git(name);
        let tree = git.commit_info(parent).unwrap().tree;
        let tree = git
            .edit_gitlinks(
                &tree,
                &[GitlinkEdit {
                    path: path.to_string(),
                    target: Some(target.clone()),
                }],
            )
            .unwrap();
        self.commit_tree(name, std::slice::from_ref(parent), &tree, message)
    }

    pub fn set_branch(&self, name: &str, branch: &str, oid: &Oid) {
        self.repo(name)
            .reference(branch, to_git2(oid), true, "test")
            .unwrap();
    }

    pub fn tip(&self, name: &str, branch: &str) -> Option<Oid> {
        self.git(name).try_resolve_ref(branch).unwrap()
    }

    pub fn master(&self, name: &str) -> Oid {
        self.tip(name, MASTER).expect("master exists")
    }

    pub fn parents(&self, name: &str, commit: &Oid) -> Vec<Oid> {
        self.git(name).commit_info(commit).unwrap().parents
    }

    /// Upload `commit` as patch set 1 of a new change on master.
    pub fn create_change(&self, name: &str, commit: &Oid) -> ChangeId {
        self.upload(name, MASTER, commit, None)
    }

    pub fn create_change_in_topic(&self, name: &str, commit: &Oid, topic: &str) -> ChangeId {
        self.upload(name, MASTER, commit, Some(topic))
    }

    pub fn upload(&self, name: &str, dest: &str, commit: &Oid, topic: Option<&str>) -> ChangeId {
        let id = ChangeId::new(self.next_change.get());
        self.next_change.set(id.get() + 1);
        let ps = PatchSetId::new(id, 1);
        self.repo(name)
            .reference(ps.refname().as_str(), to_git2(commit), false, "upload")
            .unwrap();

        let created = Utc.timestamp_opt(self.clock.get(), 0).unwrap();
        let subject = self.git(name).commit_info(commit).unwrap().summary;
        self.store.insert(Change {
            id,
            key: Some(format!("I{:040}", id.get())),
            project: ProjectName::new(name).unwrap(),
            dest: RefName::new(dest).unwrap(),
            status: ChangeStatus::New,
            topic: topic.map(str::to_string),
            owner: AccountId::new(1),
            subject,
            work_in_progress: false,
            current_patch_set: ps,
            patch_sets: vec![PatchSet {
                id: ps,
                commit: commit.clone(),
                groups: vec![commit.to_string()],
                uploader: AccountId::new(1),
                created,
            }],
            approvals: vec![Approval {
                patch_set: ps,
                account: AccountId::new(2),
                label: "Code-Review".to_string(),
                value: 2,
                granted: created,
            }],
            submission_id: None,
            messages: vec![],
        });
        id
    }

    pub fn change(&self, id: ChangeId) -> Change {
        self.store.change(id).expect("change exists")
    }

    pub fn update_change(&self, id: ChangeId, f: impl FnOnce(&mut Change)) {
        let mut change = self.change(id);
        f(&mut change);
        self.store.insert(change);
    }

    fn collaborators(&self) -> Collaborators {
        let mut projects = StaticProjectConfig::default();
        for (name, settings) in &self.settings {
            projects = projects.with_project(name.clone(), settings.clone());
        }
        Collaborators::new(
            Arc::new(self.store.clone()),
            Arc::new(self.permissions.clone()),
            Arc::new(self.rules.clone()),
            Arc::new(self.manager()),
            Arc::new(projects),
        )
        .with_listener(Arc::new(self.listener.clone()))
    }

    pub fn op(&self) -> MergeOp {
        self.op_with(config(""))
    }

    pub fn op_with(&self, config: Config) -> MergeOp {
        MergeOp::new(self.collaborators(), config)
    }

    pub fn op_with_executor(&self, config: Config, executor: Arc<dyn BatchExecutor + Send + Sync>) -> MergeOp {
        MergeOp::new(self.collaborators().with_executor(executor), config)
    }
}

/// Configuration with fast retries plus `extra` TOML.
pub fn config(extra: &str) -> Config {
    let text = format!("[retry]\ninitial_backoff_ms = 1\nmax_backoff_ms = 5\n\n{extra}");
    Config::from_toml_str(&text).expect("valid test config")
}

pub fn user() -> CurrentUser {
    CurrentUser::new(AccountId::new(7), "Submitter", "submitter@example.com")
}

pub fn to_git2(oid: &Oid) -> git2::Oid {
    git2::Oid::from_str(oid.as_str()).unwrap()
}

pub fn from_git2(oid: git2::Oid) -> Oid {
    Oid::new(oid.to_string()).unwrap()
}
