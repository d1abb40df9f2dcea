//! superset
//!
//! Change-set closure: which changes must be submitted together.
//!
//! [`MergeSuperSet::complete`] expands one change over unmerged ancestors
//! and, optionally, shared topics. The result is a [`ChangeSet`] that
//! separates members the caller may read from those they may not.

pub mod change_set;
pub mod merge_super_set;

pub use change_set::ChangeSet;
pub use merge_super_set::{MergeSuperSet, SupersetError};
