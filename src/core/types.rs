//! core::types
//!
//! Strong types for core domain concepts.
//!
//! # Types
//!
//! - [`Oid`] - Git object identifier (SHA)
//! - [`BranchName`] - Validated short branch name (`main`, `stable/1.2`)
//! - [`RefName`] - Validated full reference name (`refs/heads/main`)
//! - [`ProjectName`] - Hosted repository name (`platform/core`)
//! - [`BranchKey`] - A branch of a project, the unit of integration
//! - [`ChangeId`], [`PatchSetId`], [`AccountId`] - Review identifiers
//! - [`SubmissionId`] - Shared identifier of one submission
//!
//! # Validation
//!
//! These types enforce validity at construction time. Invalid values
//! cannot be represented, preventing entire classes of bugs.
//!
//! # Examples
//!
//! ```
//! use submit_engine::core::types::{BranchName, ChangeId, Oid, PatchSetId, RefName};
//!
//! let branch = BranchName::new("stable/1.2").unwrap();
//! let refname = RefName::for_branch(&branch);
//! assert_eq!(refname.as_str(), "refs/heads/stable/1.2");
//!
//! let ps = PatchSetId::new(ChangeId::new(1234), 3);
//! assert_eq!(ps.refname().as_str(), "refs/changes/34/1234/3");
//!
//! assert!(BranchName::new("invalid..name").is_err());
//! assert!(Oid::new("not-a-sha").is_err());
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid branch name: {0}")]
    InvalidBranchName(String),

    #[error("invalid object id: {0}")]
    InvalidOid(String),

    #[error("invalid ref name: {0}")]
    InvalidRefName(String),

    #[error("invalid project name: {0}")]
    InvalidProjectName(String),
}

/// Characters that may never appear in a ref or branch name.
const INVALID_REF_CHARS: [char; 8] = [' ', '~', '^', ':', '\\', '?', '*', '['];

/// Shared refname checks for branch and ref names.
fn check_refname_rules(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("name cannot be empty".into());
    }
    if name == "@" {
        return Err("name cannot be '@' (reserved)".into());
    }
    if name.starts_with('/') || name.ends_with('/') {
        return Err("name cannot start or end with '/'".into());
    }
    if name.starts_with('-') {
        return Err("name cannot start with '-'".into());
    }
    if name.ends_with(".lock") {
        return Err("name cannot end with '.lock'".into());
    }
    for bad in ["..", "@{", "//"] {
        if name.contains(bad) {
            return Err(format!("name cannot contain '{bad}'"));
        }
    }
    for c in INVALID_REF_CHARS {
        if name.contains(c) {
            return Err(format!("name cannot contain '{c}'"));
        }
    }
    if name.chars().any(|c| c.is_ascii_control()) {
        return Err("name cannot contain control characters".into());
    }
    for component in name.split('/') {
        if component.starts_with('.') {
            return Err("path component cannot start with '.'".into());
        }
        if component.ends_with(".lock") {
            return Err("path component cannot end with '.lock'".into());
        }
    }
    Ok(())
}

/// A validated short Git branch name (without `refs/heads/`).
///
/// # Example
///
/// ```
/// use submit_engine::core::types::BranchName;
///
/// let name = BranchName::new("feature/my-branch").unwrap();
/// assert_eq!(name.as_str(), "feature/my-branch");
///
/// assert!(BranchName::new("").is_err());
/// assert!(BranchName::new(".hidden").is_err());
/// assert!(BranchName::new("has space").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchName(String);

impl BranchName {
    /// Create a new validated branch name.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidBranchName` if the name violates Git's refname rules.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        check_refname_rules(&name).map_err(TypeError::InvalidBranchName)?;
        if name.starts_with("refs/") {
            return Err(TypeError::InvalidBranchName(
                "branch name must not include the 'refs/' prefix".into(),
            ));
        }
        Ok(Self(name))
    }

    /// Get the branch name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BranchName {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<BranchName> for String {
    fn from(name: BranchName) -> Self {
        name.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A Git object identifier (SHA-1 or SHA-256).
///
/// OIDs are normalized to lowercase for consistency.
///
/// # Example
///
/// ```
/// use submit_engine::core::types::Oid;
///
/// let oid = Oid::new("ABC123DEF4567890ABC123DEF4567890ABC12345").unwrap();
/// assert_eq!(oid.as_str(), "abc123def4567890abc123def4567890abc12345");
/// assert_eq!(oid.short(7), "abc123d");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Oid(String);

impl Oid {
    /// The zero OID (40 zeros for SHA-1).
    const ZERO_SHA1: &'static str = "0000000000000000000000000000000000000000";

    /// Create a new validated object id.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidOid` if the string is not a valid hex OID.
    pub fn new(oid: impl Into<String>) -> Result<Self, TypeError> {
        let oid = oid.into().to_ascii_lowercase();
        if oid.len() != 40 && oid.len() != 64 {
            return Err(TypeError::InvalidOid(format!(
                "expected 40 or 64 hex characters, got {}",
                oid.len()
            )));
        }
        if !oid.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TypeError::InvalidOid(
                "object id must be hexadecimal".into(),
            ));
        }
        Ok(Self(oid))
    }

    /// Create the zero/null OID (40 zeros).
    pub fn zero() -> Self {
        Self(Self::ZERO_SHA1.to_string())
    }

    /// Get an abbreviated form of the OID.
    pub fn short(&self, len: usize) -> &str {
        let end = len.min(self.0.len());
        &self.0[..end]
    }

    /// Get the object id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Oid {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Oid> for String {
    fn from(oid: Oid) -> Self {
        oid.0
    }
}

impl AsRef<str> for Oid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated full Git reference name.
///
/// # Example
///
/// ```
/// use submit_engine::core::types::{BranchName, RefName};
///
/// let branch = BranchName::new("feature/foo").unwrap();
/// let refname = RefName::for_branch(&branch);
/// assert_eq!(refname.as_str(), "refs/heads/feature/foo");
/// assert_eq!(refname.short_name(), "feature/foo");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RefName(String);

impl RefName {
    /// Prefix of all branch refs.
    pub const HEADS: &'static str = "refs/heads/";
    /// Prefix of all patch set refs.
    pub const CHANGES: &'static str = "refs/changes/";
    /// Prefix of server-internal refs.
    pub const META: &'static str = "refs/meta/";

    /// Create a new validated ref name.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidRefName` if the name violates Git's refname rules.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        check_refname_rules(&name).map_err(TypeError::InvalidRefName)?;
        if !name.starts_with("refs/") {
            return Err(TypeError::InvalidRefName(format!(
                "'{name}' must start with 'refs/'"
            )));
        }
        Ok(Self(name))
    }

    /// Create a ref name for a branch (`refs/heads/<branch>`).
    pub fn for_branch(branch: &BranchName) -> Self {
        Self(format!("{}{}", Self::HEADS, branch.as_str()))
    }

    /// Parse either a short branch name or a full ref name.
    ///
    /// Short names get the `refs/heads/` prefix.
    pub fn from_short_or_full(name: &str) -> Result<Self, TypeError> {
        if name.starts_with("refs/") {
            Self::new(name)
        } else {
            Ok(Self::for_branch(&BranchName::new(name)?))
        }
    }

    /// Branch name without `refs/heads/`, or the full name for other refs.
    pub fn short_name(&self) -> &str {
        self.0.strip_prefix(Self::HEADS).unwrap_or(&self.0)
    }

    /// Strip a prefix from the ref name and return the remainder.
    pub fn strip_prefix(&self, prefix: &str) -> Option<&str> {
        self.0.strip_prefix(prefix)
    }

    /// Check if this ref is a patch set or server-internal ref.
    pub fn is_internal(&self) -> bool {
        self.0.starts_with(Self::CHANGES) || self.0.starts_with(Self::META)
    }

    /// Get the ref name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RefName {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RefName> for String {
    fn from(name: RefName) -> Self {
        name.0
    }
}

impl AsRef<str> for RefName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of a hosted repository, e.g. `platform/core`.
///
/// Project names are slash-separated paths without a `.git` suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectName(String);

impl ProjectName {
    /// Create a new validated project name.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidProjectName` for empty names, absolute
    /// paths, `..` components, or a trailing `.git`.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        if name.is_empty() {
            return Err(TypeError::InvalidProjectName(
                "project name cannot be empty".into(),
            ));
        }
        if name.starts_with('/') || name.ends_with('/') {
            return Err(TypeError::InvalidProjectName(format!(
                "'{name}' cannot start or end with '/'"
            )));
        }
        if name.ends_with(".git") {
            return Err(TypeError::InvalidProjectName(format!(
                "'{name}' cannot end with '.git'"
            )));
        }
        if name
            .split('/')
            .any(|c| c.is_empty() || c == "." || c == "..")
        {
            return Err(TypeError::InvalidProjectName(format!(
                "'{name}' contains an empty or relative path component"
            )));
        }
        if name.chars().any(|c| c.is_ascii_control() || c == '\\') {
            return Err(TypeError::InvalidProjectName(format!(
                "'{name}' contains invalid characters"
            )));
        }
        Ok(Self(name))
    }

    /// Get the project name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ProjectName {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ProjectName> for String {
    fn from(name: ProjectName) -> Self {
        name.0
    }
}

impl fmt::Display for ProjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A branch of a project.
///
/// Ordering is by project then ref, which keeps per-branch iteration
/// deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BranchKey {
    pub project: ProjectName,
    pub branch: RefName,
}

impl BranchKey {
    pub fn new(project: ProjectName, branch: RefName) -> Self {
        Self { project, branch }
    }
}

impl fmt::Display for BranchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.project, self.branch)
    }
}

/// Numeric change identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeId(u32);

impl ChangeId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    /// Prefix shared by every patch set ref of this change.
    pub fn refs_prefix(&self) -> String {
        format!("{}{:02}/{}/", RefName::CHANGES, self.0 % 100, self.0)
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one patch set of a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PatchSetId {
    pub change: ChangeId,
    pub number: u32,
}

impl PatchSetId {
    pub fn new(change: ChangeId, number: u32) -> Self {
        Self { change, number }
    }

    /// The ref under which this patch set's commit is stored.
    pub fn refname(&self) -> RefName {
        RefName(format!("{}{}", self.change.refs_prefix(), self.number))
    }

    /// Parse a patch set ref such as `refs/changes/34/1234/3`.
    pub fn from_ref(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(RefName::CHANGES)?;
        let mut parts = rest.split('/');
        let shard = parts.next()?;
        let change: u32 = parts.next()?.parse().ok()?;
        let number: u32 = parts.next()?.parse().ok()?;
        if parts.next().is_some() || shard != format!("{:02}", change % 100) || number == 0 {
            return None;
        }
        Some(Self::new(ChangeId::new(change), number))
    }

    /// The next patch set number of the same change.
    pub fn next(&self) -> Self {
        Self::new(self.change, self.number + 1)
    }
}

impl fmt::Display for PatchSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.change, self.number)
    }
}

/// Numeric account identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(u32);

impl AccountId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier shared by every change merged in one submission.
///
/// Formatted as `<change>-<epoch millis>-<random hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionId(String);

impl SubmissionId {
    pub fn new(change: ChangeId, at: DateTime<Utc>) -> Self {
        let random = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}-{}", change, at.timestamp_millis(), &random[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
