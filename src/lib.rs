//! submit-engine - Submit and merge engine for code review servers
//!
//! Submitting a change merges it, and every change it depends on or shares
//! a topic with, into the destination branches of one or more
//! repositories. Each branch is integrated according to its project's
//! submit type, superprojects subscribed to the updated branches get
//! their gitlinks moved, and every ref of the submission is written in one
//! batch.
//!
//! # Architecture
//!
//! The codebase follows a strict layered architecture:
//!
//! - [`engine`] - Orchestrates Closure → Check → Integrate → Plan → Execute → Verify
//! - [`superset`] - Closure of a change over ancestors and topics
//! - [`merge`] - Per-branch sorting and submit strategies
//! - [`submodule`] - Superproject subscriptions and gitlink commits
//! - [`core`] - Domain types, configuration, and shared infrastructure
//! - [`git`] - Single interface for all Git operations
//!
//! # Correctness Invariants
//!
//! The engine maintains the following invariants:
//!
//! 1. A submission either merges every change of its set or writes nothing
//!    to the change store
//! 2. All ref writes flow through a single transactional executor
//! 3. A branch tip only moves to a descendant of its previous value
//! 4. Submodules are always updated before the superprojects that track them

pub mod core;
pub mod engine;
pub mod git;
pub mod merge;
pub mod submodule;
pub mod superset;
