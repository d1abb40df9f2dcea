//! core
//!
//! Core domain types, schemas, and shared infrastructure.
//!
//! # Modules
//!
//! - [`types`] - Strong types: Oid, RefName, ProjectName, ChangeId, etc.
//! - [`change`] - Change, patch set and approval snapshots
//! - [`status`] - Per-commit merge outcome codes
//! - [`cache`] - Bounded process-scoped cache
//! - [`config`] - Configuration schema and loading
//!
//! # Design Principles
//!
//! - Strong typing prevents invalid states at compile time
//! - Schemas are strict and self-describing
//! - Nothing in `core` performs repository I/O

pub mod cache;
pub mod change;
pub mod config;
pub mod status;
pub mod types;
