//! engine::repo
//!
//! Per-attempt repository access.
//!
//! A [`RepoSession`] opens each project's repository at most once and is
//! dropped when the attempt ends, so a retry always starts from fresh
//! handles. [`SubscriptionReader`] answers the subscription graph's
//! questions from those repositories and the project configuration.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, warn};

use super::ports::{ProjectConfigSource, RepoManager};
use crate::core::cache::BoundedCache;
use crate::core::types::{BranchKey, Oid, ProjectName, RefName};
use crate::git::{Git, RepoAccess};
use crate::submodule::gitmodules::GITMODULES;
use crate::submodule::{GitModules, SubscribeSection, SubscriptionSource};

/// Parsed `.gitmodules` keyed by superproject branch and commit.
pub type GitModulesCache = BoundedCache<(BranchKey, Oid), Arc<GitModules>>;

/// Repositories opened during one attempt.
pub struct RepoSession<'a> {
    manager: &'a dyn RepoManager,
    open: RefCell<BTreeMap<ProjectName, Rc<Git>>>,
}

impl<'a> RepoSession<'a> {
    pub fn new(manager: &'a dyn RepoManager) -> Self {
        Self {
            manager,
            open: RefCell::new(BTreeMap::new()),
        }
    }
}

impl RepoAccess for RepoSession<'_> {
    fn repo(&self, project: &ProjectName) -> anyhow::Result<Rc<Git>> {
        if let Some(git) = self.open.borrow().get(project) {
            return Ok(Rc::clone(git));
        }
        let git = Rc::new(self.manager.open(project)?);
        debug!(%project, "opened repository");
        self.open.borrow_mut().insert(project.clone(), Rc::clone(&git));
        Ok(git)
    }
}

/// [`SubscriptionSource`] backed by repositories and project settings.
pub struct SubscriptionReader<'a> {
    pub repos: &'a dyn RepoAccess,
    pub projects: &'a dyn ProjectConfigSource,
    pub cache: &'a GitModulesCache,
    pub canonical_web_url: Option<&'a str>,
}

impl SubscriptionSource for SubscriptionReader<'_> {
    fn subscribe_sections(&self, project: &ProjectName) -> anyhow::Result<Vec<SubscribeSection>> {
        Ok(self.projects.project_settings(project)?.subscribe)
    }

    fn branch_tip(&self, branch: &BranchKey) -> anyhow::Result<Option<Oid>> {
        // Subscribe sections may name superprojects that are not hosted here.
        let git = match self.repos.repo(&branch.project) {
            Ok(git) => git,
            Err(e) => {
                warn!(project = %branch.project, error = %e, "superproject not accessible");
                return Ok(None);
            }
        };
        Ok(git.try_resolve_ref(branch.branch.as_str())?)
    }

    fn branches(&self, project: &ProjectName) -> anyhow::Result<Vec<RefName>> {
        let git = match self.repos.repo(project) {
            Ok(git) => git,
            Err(e) => {
                warn!(%project, error = %e, "superproject not accessible");
                return Ok(Vec::new());
            }
        };
        Ok(git.branch_tips()?.into_iter().map(|r| r.name).collect())
    }

    fn gitmodules(&self, branch: &BranchKey) -> anyhow::Result<Arc<GitModules>> {
        let Some(tip) = self.branch_tip(branch)? else {
            return Ok(Arc::new(GitModules::empty()));
        };
        self.cache.get_or_try_insert((branch.clone(), tip.clone()), || {
            let git = self.repos.repo(&branch.project)?;
            let modules = match git.read_file(&tip, GITMODULES)? {
                Some(text) => GitModules::parse(&text, branch, self.canonical_web_url)?,
                None => GitModules::empty(),
            };
            Ok(Arc::new(modules))
        })
    }
}
