//! engine::ports
//!
//! Collaborators the engine talks to but does not implement.
//!
//! # Design
//!
//! Each collaborator is a small synchronous trait. Failures are
//! `anyhow::Error`: the engine cannot act on their cause and only reports
//! them, wrapped into [`SubmitError::Storage`](super::SubmitError::Storage).
//!
//! Built-in implementations:
//! - [`LocalRepoManager`] opens bare repositories below a base directory
//! - [`StaticProjectConfig`] serves project settings from the TOML config
//! - [`memory`](super::memory) holds in-memory stores for tests and embedding

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::change::{Change, PatchSet, SubmitType};
use crate::core::config::{ProjectConfig, SubmitConfig};
use crate::core::types::{AccountId, BranchKey, ChangeId, Oid, PatchSetId, ProjectName, SubmissionId};
use crate::git::{Git, PersonIdent};
use crate::merge::ChangeLookup;
use crate::submodule::SubscribeSection;

/// The account on whose behalf changes are submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub account: AccountId,
    pub name: String,
    pub email: String,
}

impl CurrentUser {
    pub fn new(account: AccountId, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            account,
            name: name.into(),
            email: email.into(),
        }
    }

    /// Committer identity for commits written on behalf of this user.
    pub fn ident(&self, when: DateTime<Utc>) -> PersonIdent {
        PersonIdent::new(self.name.as_str(), self.email.as_str(), when)
    }
}

pub trait PermissionBackend {
    fn can_read(&self, user: &CurrentUser, change: &Change) -> anyhow::Result<bool>;
}

/// Result of evaluating a change's submit requirements.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubmitRecord {
    pub ok: bool,
    /// Unmet requirements, e.g. `needs Code-Review`.
    pub reasons: Vec<String>,
    /// Submit type chosen by the rules, overriding the project default.
    pub submit_type: Option<SubmitType>,
}

impl SubmitRecord {
    pub fn ok() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    pub fn needs(label: &str) -> Self {
        Self {
            ok: false,
            reasons: vec![format!("needs {label}")],
            submit_type: None,
        }
    }

    pub fn blocked_by(label: &str) -> Self {
        Self {
            ok: false,
            reasons: vec![format!("blocked by {label}")],
            submit_type: None,
        }
    }

    pub fn with_submit_type(mut self, submit_type: SubmitType) -> Self {
        self.submit_type = Some(submit_type);
        self
    }

    /// Problem text for a record that is not ok.
    pub fn problem(&self) -> String {
        if self.reasons.is_empty() {
            "submit requirements not satisfied".to_string()
        } else {
            self.reasons.join("; ")
        }
    }
}

pub trait SubmitRuleEvaluator {
    fn evaluate(&self, change: &Change) -> anyhow::Result<SubmitRecord>;
}

pub trait RepoManager {
    fn open(&self, project: &ProjectName) -> anyhow::Result<Git>;
}

/// Hosted repositories stored as `<base>/<project>.git`.
#[derive(Debug, Clone)]
pub struct LocalRepoManager {
    base: PathBuf,
}

impl LocalRepoManager {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn path_of(&self, project: &ProjectName) -> PathBuf {
        self.base.join(format!("{project}.git"))
    }
}

impl RepoManager for LocalRepoManager {
    fn open(&self, project: &ProjectName) -> anyhow::Result<Git> {
        let path = self.path_of(project);
        Git::open(&path).with_context(|| format!("cannot open project {project} at {}", path.display()))
    }
}

/// Merge policy of one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSettings {
    pub submit_type: SubmitType,
    pub reject_empty_commit: bool,
    pub use_content_merge: bool,
    /// Superprojects allowed to subscribe to this project.
    pub subscribe: Vec<SubscribeSection>,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        let config = ProjectConfig::default();
        Self {
            submit_type: config.submit_type,
            reject_empty_commit: config.reject_empty_commit,
            use_content_merge: config.use_content_merge,
            subscribe: Vec::new(),
        }
    }
}

impl ProjectSettings {
    pub fn from_config(config: &ProjectConfig) -> anyhow::Result<Self> {
        let subscribe = config
            .subscribe
            .iter()
            .map(SubscribeSection::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            submit_type: config.submit_type,
            reject_empty_commit: config.reject_empty_commit,
            use_content_merge: config.use_content_merge,
            subscribe,
        })
    }
}

pub trait ProjectConfigSource {
    fn project_settings(&self, project: &ProjectName) -> anyhow::Result<ProjectSettings>;
}

/// Project settings from the `[projects]` tables; unknown projects get
/// the defaults.
#[derive(Debug, Clone, Default)]
pub struct StaticProjectConfig {
    projects: BTreeMap<ProjectName, ProjectSettings>,
}

impl StaticProjectConfig {
    pub fn from_config(config: &SubmitConfig) -> anyhow::Result<Self> {
        let mut projects = BTreeMap::new();
        for (name, project) in &config.projects {
            let name = ProjectName::new(name.as_str())?;
            let settings = ProjectSettings::from_config(project)
                .with_context(|| format!("project {name}"))?;
            projects.insert(name, settings);
        }
        Ok(Self { projects })
    }

    pub fn with_project(mut self, project: ProjectName, settings: ProjectSettings) -> Self {
        self.projects.insert(project, settings);
        self
    }
}

impl ProjectConfigSource for StaticProjectConfig {
    fn project_settings(&self, project: &ProjectName) -> anyhow::Result<ProjectSettings> {
        Ok(self.projects.get(project).cloned().unwrap_or_default())
    }
}

/// Change metadata storage.
pub trait ChangeStore {
    fn get(&self, id: ChangeId) -> anyhow::Result<Option<Change>>;

    fn open_by_topic(&self, topic: &str) -> anyhow::Result<Vec<Change>>;

    /// Open changes on `branch` whose current revision is one of `commits`.
    fn open_on_branch_by_commits(&self, branch: &BranchKey, commits: &[Oid]) -> anyhow::Result<Vec<Change>>;

    /// Changes of `project` with any patch set at `commit`.
    fn by_commit(&self, project: &ProjectName, commit: &Oid) -> anyhow::Result<Vec<Change>>;

    /// Add a patch set, make it current and copy the votes of `copy_from`.
    fn insert_patch_set(&self, change: ChangeId, patch_set: PatchSet, copy_from: PatchSetId) -> anyhow::Result<()>;

    fn set_merged(&self, update: &MergedUpdate) -> anyhow::Result<()>;
}

/// Metadata written when a change is merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedUpdate {
    pub change: ChangeId,
    pub patch_set: PatchSetId,
    pub submission_id: SubmissionId,
    pub submitter: AccountId,
    pub when: DateTime<Utc>,
    pub message: String,
}

/// [`ChangeLookup`] over a [`ChangeStore`].
pub struct StoreLookup<'a>(pub &'a dyn ChangeStore);

impl ChangeLookup for StoreLookup<'_> {
    fn changes_by_commit(&self, project: &ProjectName, commit: &Oid) -> anyhow::Result<Vec<Change>> {
        self.0.by_commit(project, commit)
    }
}

/// Who hears about a merged change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyHandling {
    None,
    Owner,
    #[default]
    All,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedEvent {
    pub change: Change,
    pub submitter: AccountId,
    /// Commit on the branch that carries the change.
    pub merged_commit: Oid,
    pub notify: NotifyHandling,
}

pub trait MergedListener {
    fn on_merged(&self, event: &MergedEvent) -> anyhow::Result<()>;
}
