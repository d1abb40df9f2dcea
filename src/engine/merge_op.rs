//! engine::merge_op
//!
//! Submission of a change together with everything it must merge with.
//!
//! # Architecture
//!
//! [`MergeOp::merge`] runs attempts under a [`RetryPolicy`]. Every attempt
//! starts from fresh repository and change store state:
//!
//! 1. Expand the change set (again, on a retry) and check its changes are
//!    submittable
//! 2. Validate patch set refs and pick one submit type per branch
//! 3. Compute the superproject subscription graph
//! 4. Integrate each branch, submodules before their superprojects
//! 5. Build a [`BatchPlan`] and hand it to the [`BatchExecutor`]
//! 6. Verify every merged commit is reachable from its branch
//!
//! Only a lock failure during execution retries. A retried attempt treats
//! changes merged by an earlier attempt as done.
//!
//! # Invariants
//!
//! - Nothing is written before every change of the set integrated cleanly
//! - All attempts of one submission share its submission id
//! - A dry run plans exactly what a real run would execute

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::exec::{BatchError, BatchExecutor, GitBatchExecutor};
use super::metrics::SubmitMetrics;
use super::plan::{BatchPlan, PlanStep};
use super::ports::{
    ChangeStore, CurrentUser, MergedEvent, MergedListener, MergedUpdate, NotifyHandling,
    PermissionBackend, ProjectConfigSource, ProjectSettings, RepoManager, StoreLookup,
    SubmitRuleEvaluator,
};
use super::repo::{GitModulesCache, RepoSession, SubscriptionReader};
use super::retry::RetryPolicy;
use super::verify::{verify_reachable, MergedCommit};
use crate::core::cache::BoundedCache;
use crate::core::change::{Change, ChangeStatus, PatchSet, SubmitType};
use crate::core::config::{CacheConfig, Config};
use crate::core::types::{BranchKey, ChangeId, Oid, ProjectName, SubmissionId};
use crate::git::{Git, GitError, PersonIdent, RepoAccess};
use crate::merge::message::merged_change_message;
use crate::merge::strategy::{integrate, BranchInput, StrategyContext};
use crate::merge::{CodeReviewCommit, CommitOp, CommitStatus, MergeError, NewPatchSet, Origin};
use crate::submodule::{SubmoduleCommits, SubmoduleError, SubscriptionGraph};
use crate::superset::{ChangeSet, MergeSuperSet, SupersetError};

/// Errors from a submission.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("change {0} not found")]
    NotFound(ChangeId),

    /// The submission was refused; nothing was written.
    #[error("{0}")]
    Conflict(String),

    #[error("A change to be submitted with {change} is not visible")]
    NotVisible { change: ChangeId },

    #[error(transparent)]
    Submodule(#[from] SubmoduleError),

    #[error("{0:#}")]
    Storage(anyhow::Error),

    #[error(transparent)]
    Git(#[from] GitError),

    /// Execution of one attempt failed.
    #[error(transparent)]
    Batch(#[from] BatchError),

    /// Execution failed for good, possibly after some projects were written.
    #[error("{message}")]
    Execution {
        message: String,
        #[source]
        source: BatchError,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl SubmitError {
    /// Whether a fresh attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SubmitError::Batch(e) if e.is_lock_failure())
    }
}

impl From<MergeError> for SubmitError {
    fn from(err: MergeError) -> Self {
        match err {
            MergeError::Git(e) => SubmitError::Git(e),
            MergeError::Submodule(e) => SubmitError::Submodule(e),
            MergeError::Lookup(e) => SubmitError::Storage(e),
            MergeError::Internal(message) => SubmitError::Internal(message),
        }
    }
}

impl From<SupersetError> for SubmitError {
    fn from(err: SupersetError) -> Self {
        match err {
            SupersetError::Git(e) => SubmitError::Git(e),
            SupersetError::Source(e) => SubmitError::Storage(e),
        }
    }
}

/// Options of one submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    /// Skip submit rule evaluation.
    pub bypass_rules: bool,
    /// Plan without writing anything.
    pub dry_run: bool,
    pub notify: NotifyHandling,
}

/// Outcome of a successful submission.
#[derive(Debug, Clone)]
pub struct SubmitResult {
    pub submission_id: SubmissionId,
    /// The submitted changes as stored after the submission.
    pub changes: Vec<Change>,
    pub dry_run: bool,
    /// The plan of the final attempt.
    pub plan: BatchPlan,
    pub attempts: u32,
}

impl SubmitResult {
    pub fn plan_digest(&self) -> Result<String, serde_json::Error> {
        self.plan.digest()
    }
}

/// Everything a [`MergeOp`] talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn ChangeStore + Send + Sync>,
    pub permissions: Arc<dyn PermissionBackend + Send + Sync>,
    pub rules: Arc<dyn SubmitRuleEvaluator + Send + Sync>,
    pub repos: Arc<dyn RepoManager + Send + Sync>,
    pub projects: Arc<dyn ProjectConfigSource + Send + Sync>,
    pub executor: Arc<dyn BatchExecutor + Send + Sync>,
    pub listener: Option<Arc<dyn MergedListener + Send + Sync>>,
    pub gitmodules_cache: Arc<GitModulesCache>,
    pub metrics: Arc<SubmitMetrics>,
}

impl Collaborators {
    pub fn new(
        store: Arc<dyn ChangeStore + Send + Sync>,
        permissions: Arc<dyn PermissionBackend + Send + Sync>,
        rules: Arc<dyn SubmitRuleEvaluator + Send + Sync>,
        repos: Arc<dyn RepoManager + Send + Sync>,
        projects: Arc<dyn ProjectConfigSource + Send + Sync>,
    ) -> Self {
        Self {
            store,
            permissions,
            rules,
            repos,
            projects,
            executor: Arc::new(GitBatchExecutor::new()),
            listener: None,
            gitmodules_cache: Arc::new(BoundedCache::new(CacheConfig::default().gitmodules_capacity)),
            metrics: Arc::new(SubmitMetrics::new()),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn BatchExecutor + Send + Sync>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn MergedListener + Send + Sync>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn with_gitmodules_cache(mut self, cache: Arc<GitModulesCache>) -> Self {
        self.gitmodules_cache = cache;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<SubmitMetrics>) -> Self {
        self.metrics = metrics;
        self
    }
}

/// Submits changes.
pub struct MergeOp {
    collab: Collaborators,
    config: Config,
    retry: RetryPolicy,
}

impl MergeOp {
    pub fn new(collaborators: Collaborators, config: Config) -> Self {
        let retry = RetryPolicy::from_config(config.retry());
        Self {
            collab: collaborators,
            config,
            retry,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &SubmitMetrics {
        &self.collab.metrics
    }

    /// The changes that would be submitted together with `change`.
    pub fn change_set(&self, change: &Change, caller: &CurrentUser) -> Result<ChangeSet, SubmitError> {
        let session = RepoSession::new(&*self.collab.repos);
        let superset = MergeSuperSet {
            store: &*self.collab.store,
            permissions: &*self.collab.permissions,
            projects: &*self.collab.projects,
            repos: &session,
            whole_topic: self.config.submit_whole_topic(),
        };
        Ok(superset.complete(change, caller)?)
    }

    /// Submit `change` and every change it must be merged with.
    pub fn merge(
        &self,
        change: ChangeId,
        caller: &CurrentUser,
        options: &SubmitOptions,
    ) -> Result<SubmitResult, SubmitError> {
        let requested = self.load(change)?;
        if !requested.is_open() {
            return Err(SubmitError::Conflict(format!(
                "Change {} is {}",
                requested.id, requested.status
            )));
        }

        let cs = self.change_set(&requested, caller)?;
        if let Some(hidden) = cs.non_visible().next() {
            debug!(%change, hidden = %hidden.id, "change set is incomplete");
            return Err(SubmitError::NotVisible { change });
        }

        let projects = cs.projects().len();
        self.collab.metrics.record_topic_submission(projects);
        let submission_id = SubmissionId::new(change, Utc::now());
        info!(
            %change,
            %submission_id,
            changes = cs.len(),
            projects,
            dry_run = options.dry_run,
            "submitting"
        );

        let policy = self.retry.scaled(projects);
        let (planned, attempts) = policy
            .run(
                |n| self.attempt(n, &requested, &cs, caller, options, &submission_id),
                SubmitError::is_retryable,
            )
            .map_err(|e| self.final_error(e, &cs))?;

        if options.dry_run {
            debug!(plan = %planned.plan.preview(), "dry run");
            return Ok(SubmitResult {
                submission_id,
                changes: planned.changes.into_values().collect(),
                dry_run: true,
                plan: planned.plan,
                attempts,
            });
        }

        let mut changes = Vec::with_capacity(planned.changes.len());
        for &id in planned.changes.keys() {
            changes.push(self.load(id)?);
        }
        self.notify(&changes, &planned.merged, caller, options.notify);
        self.collab.metrics.record_topic_submission_completed(projects);
        info!(%change, %submission_id, attempts, "submitted");

        Ok(SubmitResult {
            submission_id,
            changes,
            dry_run: false,
            plan: planned.plan,
            attempts,
        })
    }

    fn load(&self, change: ChangeId) -> Result<Change, SubmitError> {
        self.collab
            .store
            .get(change)
            .map_err(SubmitError::Storage)?
            .ok_or(SubmitError::NotFound(change))
    }

    fn settings(&self, project: &ProjectName) -> Result<ProjectSettings, SubmitError> {
        self.collab
            .projects
            .project_settings(project)
            .map_err(SubmitError::Storage)
    }

    fn server_ident(&self, when: DateTime<Utc>) -> PersonIdent {
        let server = self.config.server();
        PersonIdent::new(server.ident_name.clone(), server.ident_email.clone(), when)
    }

    fn canonical_web_url(&self) -> Option<&str> {
        self.config.server().canonical_web_url.as_deref()
    }

    fn attempt(
        &self,
        n: u32,
        requested: &Change,
        cs: &ChangeSet,
        caller: &CurrentUser,
        options: &SubmitOptions,
        submission_id: &SubmissionId,
    ) -> Result<Planned, SubmitError> {
        debug!(attempt = n, %submission_id, "starting attempt");
        let mut members = cs.ids();
        if n > 1 {
            // Members merged by an earlier attempt drop out of the fresh
            // closure but are still reported.
            let fresh = self.change_set(&self.load(requested.id)?, caller)?;
            if let Some(hidden) = fresh.non_visible().next() {
                debug!(change = %requested.id, hidden = %hidden.id, "change set is incomplete");
                return Err(SubmitError::NotVisible { change: requested.id });
            }
            members.extend(fresh.ids());
        }
        let mut attempt = Attempt::load(self, &members, caller, n > 1, submission_id)?;
        attempt.check_submittable(options)?;
        let batches = attempt.validate()?;
        let graph = attempt.subscription_graph(batches.keys().cloned())?;
        let projects = graph.projects_in_order().map_err(SubmoduleError::from)?;
        let tips = attempt.integrate(&graph, batches)?;
        attempt.plan_steps(&projects, &tips)?;

        let merged = attempt.merged_commits();
        if !options.dry_run {
            self.collab
                .executor
                .execute(&attempt.plan, &attempt.session, &*self.collab.store)?;
            verify_reachable(&attempt.session, &merged).map_err(|e| {
                error!(error = %e, "merged commit not reachable after execution");
                SubmitError::Internal(e.to_string())
            })?;
        }
        Ok(Planned {
            plan: attempt.plan,
            merged,
            changes: attempt.changes,
        })
    }

    fn final_error(&self, err: SubmitError, cs: &ChangeSet) -> SubmitError {
        match err {
            SubmitError::Batch(source) => {
                let message = generic_merge_error(cs);
                warn!(error = %source, %message, "submission failed during execution");
                SubmitError::Execution { message, source }
            }
            SubmitError::Storage(e) => SubmitError::Storage(e.context(generic_merge_error(cs))),
            other => other,
        }
    }

    fn notify(&self, changes: &[Change], merged: &[MergedCommit], caller: &CurrentUser, notify: NotifyHandling) {
        let Some(listener) = &self.collab.listener else {
            return;
        };
        for change in changes.iter().filter(|c| c.status == ChangeStatus::Merged) {
            let commit = merged
                .iter()
                .find(|m| m.change == change.id)
                .map(|m| m.commit.clone())
                .or_else(|| change.current_patch_set().map(|ps| ps.commit.clone()));
            let Some(merged_commit) = commit else {
                continue;
            };
            let event = MergedEvent {
                change: change.clone(),
                submitter: caller.account,
                merged_commit,
                notify,
            };
            if let Err(e) = listener.on_merged(&event) {
                warn!(change = %change.id, error = %e, "merged notification failed");
            }
        }
    }
}

/// Message for a submission that failed while writing.
fn generic_merge_error(cs: &ChangeSet) -> String {
    let changes = cs.len();
    let projects = cs.projects().len();
    if changes == 1 {
        "Error submitting change".to_string()
    } else if projects == 1 {
        format!("Error submitting {changes} changes")
    } else {
        format!(
            "Error submitting some of the {changes} changes to one or more of the {projects} projects involved; \
             some projects may have submitted successfully, but others may have failed"
        )
    }
}

/// Result of one attempt.
struct Planned {
    plan: BatchPlan,
    merged: Vec<MergedCommit>,
    /// Members as loaded by the attempt.
    changes: BTreeMap<ChangeId, Change>,
}

/// Commits to integrate into one branch.
struct Batch {
    submit_type: SubmitType,
    commits: Vec<CodeReviewCommit>,
}

/// Old and new value of a branch moved by an attempt.
struct BranchTip {
    old: Option<Oid>,
    new: Oid,
}

/// State of one attempt.
struct Attempt<'a> {
    op: &'a MergeOp,
    session: RepoSession<'a>,
    caller: &'a CurrentUser,
    when: DateTime<Utc>,
    changes: BTreeMap<ChangeId, Change>,
    /// Changes merged by an earlier attempt.
    done: BTreeSet<ChangeId>,
    submit_types: BTreeMap<ChangeId, SubmitType>,
    status: CommitStatus,
    plan: BatchPlan,
}

impl<'a> Attempt<'a> {
    fn load(
        op: &'a MergeOp,
        members: &BTreeSet<ChangeId>,
        caller: &'a CurrentUser,
        retrying: bool,
        submission_id: &SubmissionId,
    ) -> Result<Self, SubmitError> {
        let mut changes = BTreeMap::new();
        for &id in members {
            changes.insert(id, op.load(id)?);
        }
        let done: BTreeSet<ChangeId> = changes
            .values()
            .filter(|c| retrying && c.status == ChangeStatus::Merged)
            .map(|c| c.id)
            .collect();
        if !done.is_empty() {
            debug!(merged = done.len(), "skipping changes merged by an earlier attempt");
        }
        let status = CommitStatus::new(
            changes
                .values()
                .filter(|c| !done.contains(&c.id))
                .map(|c| (c.id, c.branch_key())),
        );

        Ok(Self {
            op,
            session: RepoSession::new(&*op.collab.repos),
            caller,
            when: Utc::now(),
            changes,
            done,
            submit_types: BTreeMap::new(),
            status,
            plan: BatchPlan::new(submission_id.clone()),
        })
    }

    fn fail_if_problems(&self) -> Result<(), SubmitError> {
        match self.status.failure_message() {
            Some(message) => Err(SubmitError::Conflict(message)),
            None => Ok(()),
        }
    }

    fn pending(&self) -> impl Iterator<Item = &Change> {
        self.changes.values().filter(|c| !self.done.contains(&c.id))
    }

    /// Status, work-in-progress and submit rule checks.
    fn check_submittable(&mut self, options: &SubmitOptions) -> Result<(), SubmitError> {
        let mut problems: Vec<(ChangeId, String)> = Vec::new();
        let mut submit_types = BTreeMap::new();

        for change in self.pending() {
            if !change.is_open() {
                problems.push((change.id, format!("Change {} is {}", change.id, change.status)));
                continue;
            }
            if change.work_in_progress {
                problems.push((change.id, format!("Change {} is work in progress", change.id)));
                continue;
            }

            let mut submit_type = self.op.settings(&change.project)?.submit_type;
            if !options.bypass_rules {
                match self.op.collab.rules.evaluate(change) {
                    Ok(record) if !record.ok => {
                        problems.push((change.id, record.problem()));
                        continue;
                    }
                    Ok(record) => {
                        if let Some(t) = record.submit_type {
                            submit_type = t;
                        }
                    }
                    Err(e) => {
                        warn!(change = %change.id, error = %e, "submit rule evaluation failed");
                        problems.push((change.id, "Error checking submit rules for change".to_string()));
                        continue;
                    }
                }
            }
            submit_types.insert(change.id, submit_type);
        }

        for (change, problem) in problems {
            self.status.problem(change, problem);
        }
        self.submit_types = submit_types;
        self.fail_if_problems()
    }

    /// Check patch set refs and load the commits of every branch.
    fn validate(&mut self) -> Result<BTreeMap<BranchKey, Batch>, SubmitError> {
        let mut batches: BTreeMap<BranchKey, Batch> = BTreeMap::new();
        let mut chosen: BTreeMap<BranchKey, (SubmitType, ChangeId)> = BTreeMap::new();

        for change in self.changes.values().filter(|c| !self.done.contains(&c.id)) {
            let branch = change.branch_key();
            let Some(&submit_type) = self.submit_types.get(&change.id) else {
                continue;
            };
            match chosen.get(&branch) {
                Some(&(previous, from)) if previous != submit_type => {
                    self.status.problem(
                        change.id,
                        format!(
                            "Change has submit type {submit_type}, but previously chose submit type {previous} from change {from} in the same batch"
                        ),
                    );
                    continue;
                }
                Some(_) => {}
                None => {
                    chosen.insert(branch.clone(), (submit_type, change.id));
                }
            }

            let Some(ps) = change.current_patch_set() else {
                error!(change = %change.id, "missing current patch set");
                self.status.problem(change.id, "Missing current patch set on change");
                continue;
            };
            let git = self.session.repo(&change.project).map_err(SubmitError::Storage)?;
            let refname = ps.id.refname();
            match git.try_resolve_ref(refname.as_str())? {
                Some(oid) if oid == ps.commit => {}
                Some(_) => {
                    self.status.problem(
                        change.id,
                        format!(
                            "Revision {} of patch set {} does not match the revision of the patch set ref {}",
                            ps.commit, ps.id.number, refname
                        ),
                    );
                    continue;
                }
                None => {
                    self.status.problem(
                        change.id,
                        format!(
                            "Patch set ref {} not found. Expected patch set ref of {} to point to revision {}",
                            refname, ps.id.number, ps.commit
                        ),
                    );
                    continue;
                }
            }

            let commit = CodeReviewCommit::load(
                &git,
                &ps.commit,
                Origin {
                    change: change.id,
                    patch_set: ps.id,
                },
            )?;
            batches
                .entry(branch)
                .or_insert_with(|| Batch {
                    submit_type,
                    commits: Vec::new(),
                })
                .commits
                .push(commit);
        }

        self.fail_if_problems()?;
        Ok(batches)
    }

    fn subscription_graph(
        &self,
        updated: impl IntoIterator<Item = BranchKey>,
    ) -> Result<SubscriptionGraph, SubmitError> {
        if !self.op.config.submodule().enable_superproject_subscriptions {
            return Ok(SubscriptionGraph::without_subscriptions(updated));
        }
        let reader = SubscriptionReader {
            repos: &self.session,
            projects: &*self.op.collab.projects,
            cache: &self.op.collab.gitmodules_cache,
            canonical_web_url: self.op.canonical_web_url(),
        };
        Ok(SubscriptionGraph::compute(updated, &reader)?)
    }

    /// Run the strategies branch by branch, submodules first.
    fn integrate(
        &mut self,
        graph: &SubscriptionGraph,
        mut batches: BTreeMap<BranchKey, Batch>,
    ) -> Result<BTreeMap<BranchKey, BranchTip>, SubmitError> {
        let caller_ident = self.caller.ident(self.when);
        let server_ident = self.op.server_ident(self.when);
        let canonical_web_url = self.op.canonical_web_url();
        let lookup = StoreLookup(&*self.op.collab.store);
        let mut submodules = SubmoduleCommits::new(
            graph,
            &self.session,
            self.op.config.submodule(),
            server_ident.clone(),
        );
        let mut tips = BTreeMap::new();

        for branch in graph.branches_in_order() {
            let git = self.session.repo(&branch.project).map_err(SubmitError::Storage)?;
            let initial_tip = git.try_resolve_ref(branch.branch.as_str())?;
            let has_subscriptions = graph.has_subscription(&branch);

            let Some(batch) = batches.remove(&branch) else {
                if has_subscriptions {
                    if let Some(new) = submodules.compose(&branch)? {
                        debug!(%branch, commit = %new.short(7), "gitlink-only superproject update");
                        submodules.add_branch_tip(branch.clone(), new.clone());
                        tips.insert(branch, BranchTip { old: initial_tip, new });
                    }
                }
                continue;
            };

            let settings = self.op.settings(&branch.project)?;
            let submitted: BTreeSet<Oid> = batch.commits.iter().map(|c| c.id.clone()).collect();
            let accepted = accepted_commits(&git, initial_tip.as_ref(), &submitted)?;
            let submit_type = batch.submit_type;

            let outcome = {
                let amend = |commit: &Oid| submodules.amend(&branch, commit).map_err(MergeError::from);
                let ctx = StrategyContext {
                    git: &git,
                    branch: &branch,
                    submit_type,
                    reject_empty_commit: settings.reject_empty_commit,
                    use_content_merge: settings.use_content_merge,
                    caller: &caller_ident,
                    server: &server_ident,
                    canonical_web_url,
                    changes: &self.changes,
                    lookup: &lookup,
                    amend: &amend,
                    has_subscriptions,
                };
                integrate(
                    &ctx,
                    BranchInput {
                        initial_tip: initial_tip.clone(),
                        accepted,
                        commits: batch.commits,
                    },
                )?
            };
            self.status.record(&outcome);

            let mut new_tip = outcome.new_tip().cloned();
            if submit_type == SubmitType::FastForwardOnly && has_subscriptions {
                // Fast-forwards cannot amend, so gitlinks go into a commit on top.
                if let Some(tip) = &new_tip {
                    submodules.add_branch_tip(branch.clone(), tip.clone());
                }
                if let Some(composed) = submodules.compose(&branch)? {
                    new_tip = Some(composed);
                }
            }
            if let Some(new) = new_tip {
                if initial_tip.as_ref() != Some(&new) {
                    debug!(%branch, commit = %new.short(7), "branch integrated");
                    submodules.add_branch_tip(branch.clone(), new.clone());
                    tips.insert(branch, BranchTip { old: initial_tip, new });
                }
            }
        }
        Ok(tips)
    }

    /// Append ref, patch set and merged steps for the integrated state.
    fn plan_steps(
        &mut self,
        projects: &[ProjectName],
        tips: &BTreeMap<BranchKey, BranchTip>,
    ) -> Result<(), SubmitError> {
        self.status.check_all_processed();
        self.fail_if_problems()?;

        let reason = format!("submit {}", self.plan.submission_id);
        for project in projects {
            for (branch, tip) in tips.iter().filter(|(b, _)| &b.project == project) {
                self.plan.push(PlanStep::UpdateRef {
                    project: project.clone(),
                    refname: branch.branch.clone(),
                    old: tip.old.clone(),
                    new: tip.new.clone(),
                    reason: reason.clone(),
                });
            }
        }

        let ops: Vec<CommitOp> = self.status.ops().filter(|op| op.is_success()).cloned().collect();
        for op in &ops {
            if let Some(new_patch_set) = &op.new_patch_set {
                self.add_patch_set(op, new_patch_set)?;
            }
        }

        for op in &ops {
            let (Some(status), Some(change)) = (op.status, self.changes.get(&op.change)) else {
                return Err(SubmitError::Internal(format!(
                    "no merge status for change {}",
                    op.change
                )));
            };
            let submit_type = self
                .submit_types
                .get(&op.change)
                .copied()
                .unwrap_or_default();
            let result = op.result.as_ref().unwrap_or(&op.source);
            let patch_set = op.new_patch_set.as_ref().map_or(op.patch_set, |ps| ps.id);
            self.plan.push(PlanStep::SetMerged {
                update: MergedUpdate {
                    change: change.id,
                    patch_set,
                    submission_id: self.plan.submission_id.clone(),
                    submitter: self.caller.account,
                    when: self.when,
                    message: merged_change_message(status, submit_type, result, &self.caller.name),
                },
            });
        }
        Ok(())
    }

    fn add_patch_set(&mut self, op: &CommitOp, new_patch_set: &NewPatchSet) -> Result<(), SubmitError> {
        let change = self.changes.get(&op.change).ok_or_else(|| {
            SubmitError::Internal(format!("change {} is not part of the submission", op.change))
        })?;

        if change.patch_set(new_patch_set.id).is_none() {
            let groups = change
                .patch_set(op.patch_set)
                .map(|ps| ps.groups.clone())
                .unwrap_or_default();
            self.plan.push(PlanStep::InsertPatchSet {
                change: change.id,
                patch_set: PatchSet {
                    id: new_patch_set.id,
                    commit: new_patch_set.commit.clone(),
                    groups,
                    uploader: self.caller.account,
                    created: self.when,
                },
                copy_from: op.patch_set,
            });
        }

        let git = self.session.repo(&change.project).map_err(SubmitError::Storage)?;
        let refname = new_patch_set.id.refname();
        if git.try_resolve_ref(refname.as_str())?.is_none() {
            self.plan.push(PlanStep::UpdateRef {
                project: change.project.clone(),
                refname,
                old: None,
                new: new_patch_set.commit.clone(),
                reason: format!("create patch set {}", new_patch_set.id),
            });
        }
        Ok(())
    }

    fn merged_commits(&self) -> Vec<MergedCommit> {
        self.status
            .ops()
            .filter(|op| op.is_success())
            .filter_map(|op| {
                let change = self.changes.get(&op.change)?;
                Some(MergedCommit {
                    change: op.change,
                    branch: change.branch_key(),
                    commit: op.result.clone().unwrap_or_else(|| op.source.clone()),
                })
            })
            .collect()
    }
}

/// Commits already accepted into a branch: its tip and every other branch
/// tip of the project that is not itself being submitted.
fn accepted_commits(git: &Git, tip: Option<&Oid>, submitted: &BTreeSet<Oid>) -> Result<BTreeSet<Oid>, GitError> {
    let mut accepted: BTreeSet<Oid> = tip.cloned().into_iter().collect();
    for entry in git.branch_tips()? {
        if !submitted.contains(&entry.oid) {
            accepted.insert(entry.oid);
        }
    }
    Ok(accepted)
}
