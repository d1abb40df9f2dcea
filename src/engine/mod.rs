//! engine
//!
//! Orchestrates the submit lifecycle: Closure -> Check -> Integrate -> Plan -> Execute -> Verify.
//!
//! # Architecture
//!
//! The engine is the central coordinator of a submission. It owns the
//! ports through which the host system is reached and drives the merge
//! layers over them:
//!
//! 1. **Closure**: Expand the requested change into its full change set
//! 2. **Check**: Reject changes that are closed, work in progress or fail
//!    their submit rules
//! 3. **Integrate**: Run the submit strategy of every branch, submodules
//!    before their superprojects
//! 4. **Plan**: Collect ref moves and change metadata writes into one plan
//! 5. **Execute**: Apply the plan through the single transactional executor
//! 6. **Verify**: Confirm every merged commit is reachable from its branch
//!
//! # Submit Lifecycle
//!
//! ```text
//! Closure -> [ Check -> Integrate -> Plan -> Execute -> Verify ]*
//! ```
//!
//! The bracketed part is one attempt. Attempts repeat while execution
//! reports lock failures and the retry budget lasts.
//!
//! # Invariants
//!
//! - The engine never moves a ref directly; all writes flow through the executor
//! - A refused submission writes nothing
//! - Verification failure after execution indicates a bug
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use submit_engine::core::config::Config;
//! use submit_engine::core::types::{AccountId, ChangeId};
//! use submit_engine::engine::memory::{InMemoryChangeStore, InMemoryPermissions, InMemoryRules};
//! use submit_engine::engine::{
//!     Collaborators, CurrentUser, LocalRepoManager, MergeOp, StaticProjectConfig, SubmitOptions,
//! };
//!
//! let config = Config::default();
//! let collaborators = Collaborators::new(
//!     Arc::new(InMemoryChangeStore::new()),
//!     Arc::new(InMemoryPermissions::new()),
//!     Arc::new(InMemoryRules::new()),
//!     Arc::new(LocalRepoManager::new("/srv/git")),
//!     Arc::new(StaticProjectConfig::from_config(&config.settings)?),
//! );
//! let op = MergeOp::new(collaborators, config);
//! let caller = CurrentUser::new(AccountId::new(1000), "Jane Doe", "jane@example.com");
//!
//! let result = op.merge(ChangeId::new(42), &caller, &SubmitOptions::default())?;
//! println!("{}", result.plan.preview());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod exec;
pub mod memory;
pub mod merge_op;
pub mod metrics;
pub mod plan;
pub mod ports;
pub mod repo;
pub mod retry;
pub mod verify;

// Re-exports for convenience
pub use exec::{BatchError, BatchExecutor, GitBatchExecutor};
pub use merge_op::{Collaborators, MergeOp, SubmitError, SubmitOptions, SubmitResult};
pub use metrics::SubmitMetrics;
pub use plan::{BatchPlan, PlanStep};
pub use ports::{
    ChangeStore, CurrentUser, LocalRepoManager, MergedEvent, MergedListener, MergedUpdate,
    NotifyHandling, PermissionBackend, ProjectConfigSource, ProjectSettings, RepoManager,
    StaticProjectConfig, StoreLookup, SubmitRecord, SubmitRuleEvaluator,
};
pub use repo::{GitModulesCache, RepoSession, SubscriptionReader};
pub use retry::RetryPolicy;
pub use verify::{verify_reachable, MergedCommit, VerifyError};
