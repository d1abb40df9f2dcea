//! core::config::schema
//!
//! Configuration schema types.
//!
//! # Validation
//!
//! Config values are validated after parsing to ensure they conform to
//! expected formats (e.g., project names must be valid, refspecs may hold
//! at most one wildcard per side).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::core::change::SubmitType;
use crate::core::types::ProjectName;

/// Root of the engine configuration file.
///
/// # Example
///
/// ```toml
/// [change]
/// submit_whole_topic = true
///
/// [submodule]
/// verbose_superproject_update = "subject-only"
///
/// [projects."platform/core"]
/// submit_type = "rebase-if-necessary"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SubmitConfig {
    pub change: ChangeConfig,
    pub submodule: SubmoduleConfig,
    pub retry: RetryConfig,
    pub server: ServerConfig,
    pub cache: CacheConfig,
    /// Per-project settings keyed by project name.
    pub projects: BTreeMap<String, ProjectConfig>,
}

impl SubmitConfig {
    /// Validate the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.submodule.validate()?;
        self.retry.validate()?;
        self.server.validate()?;
        for (name, project) in &self.projects {
            ProjectName::new(name.as_str()).map_err(|e| {
                ConfigError::InvalidValue(format!("invalid project name '{name}': {e}"))
            })?;
            project.validate(name)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ChangeConfig {
    /// Submit every open change sharing a topic together.
    pub submit_whole_topic: bool,
}

/// How much submodule history goes into superproject commit messages.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum VerboseSuperprojectUpdate {
    #[serde(rename = "false")]
    Off,
    #[serde(rename = "subject-only")]
    SubjectOnly,
    #[default]
    #[serde(rename = "full", alias = "true")]
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SubmoduleConfig {
    pub verbose_superproject_update: VerboseSuperprojectUpdate,
    /// Maximum number of submodule commit messages listed per superproject commit.
    pub max_commit_messages: usize,
    /// Maximum size in bytes of the combined submodule log.
    pub max_combined_commit_message_size: usize,
    pub enable_superproject_subscriptions: bool,
}

impl Default for SubmoduleConfig {
    fn default() -> Self {
        Self {
            verbose_superproject_update: VerboseSuperprojectUpdate::Full,
            max_commit_messages: 1000,
            max_combined_commit_message_size: 256 * 1024,
            enable_superproject_subscriptions: true,
        }
    }
}

impl SubmoduleConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_combined_commit_message_size == 0 {
            return Err(ConfigError::InvalidValue(
                "submodule.max_combined_commit_message_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Retry budget per involved project, in seconds.
    pub timeout_secs: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 20,
            initial_backoff_ms: 20,
            max_backoff_ms: 1000,
        }
    }
}

impl RetryConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "retry.timeout_secs must be positive".into(),
            ));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(ConfigError::InvalidValue(format!(
                "retry.max_backoff_ms ({}) is smaller than retry.initial_backoff_ms ({})",
                self.max_backoff_ms, self.initial_backoff_ms
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Base URL of the review server, used for `Reviewed-on` footers and
    /// for resolving absolute submodule URLs.
    pub canonical_web_url: Option<String>,
    pub ident_name: String,
    pub ident_email: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            canonical_web_url: None,
            ident_name: "Code Review".into(),
            ident_email: "review@localhost".into(),
        }
    }
}

impl ServerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.canonical_web_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidValue(format!(
                    "server.canonical_web_url must be an http(s) URL, got '{url}'"
                )));
            }
        }
        if self.ident_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "server.ident_name cannot be empty".into(),
            ));
        }
        if !self.ident_email.contains('@') {
            return Err(ConfigError::InvalidValue(format!(
                "server.ident_email '{}' is not an email address",
                self.ident_email
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Number of parsed `.gitmodules` files kept per process.
    pub gitmodules_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            gitmodules_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectConfig {
    pub submit_type: SubmitType,
    pub reject_empty_commit: bool,
    pub use_content_merge: bool,
    /// Superprojects allowed to subscribe to branches of this project.
    pub subscribe: Vec<SubscribeConfig>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            submit_type: SubmitType::default(),
            reject_empty_commit: false,
            use_content_merge: true,
            subscribe: Vec::new(),
        }
    }
}

impl ProjectConfig {
    fn validate(&self, project: &str) -> Result<(), ConfigError> {
        for section in &self.subscribe {
            ProjectName::new(section.superproject.as_str()).map_err(|e| {
                ConfigError::InvalidValue(format!(
                    "project '{project}': invalid superproject '{}': {e}",
                    section.superproject
                ))
            })?;
            let specs = section
                .matching
                .iter()
                .map(|s| (s, false))
                .chain(section.multi_match.iter().map(|s| (s, true)));
            for (spec, multi) in specs {
                validate_refspec(spec, multi).map_err(|msg| {
                    ConfigError::InvalidValue(format!(
                        "project '{project}': invalid refspec '{spec}': {msg}"
                    ))
                })?;
            }
        }
        Ok(())
    }
}

/// Permission for a superproject to track branches of this project.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SubscribeConfig {
    pub superproject: String,
    /// `src[:dst]` refspecs mapping one source branch to one superproject branch.
    pub matching: Vec<String>,
    /// `src:dst` refspecs allowing any superproject branch matching `dst`.
    pub multi_match: Vec<String>,
}

fn validate_refspec(spec: &str, multi_match: bool) -> Result<(), String> {
    let (src, dst) = match spec.split_once(':') {
        Some((s, d)) => (s, Some(d)),
        None => (spec, None),
    };
    if src.is_empty() {
        return Err("source is empty".into());
    }
    if dst.is_some_and(str::is_empty) {
        return Err("destination is empty".into());
    }
    let src_wild = src.matches('*').count();
    let dst_wild = dst.map_or(src_wild, |d| d.matches('*').count());
    if src_wild > 1 || dst_wild > 1 {
        return Err("at most one '*' per side".into());
    }
    if multi_match && dst.is_none() {
        return Err("multi-match refspecs need a destination".into());
    }
    if !multi_match && src_wild != dst_wild {
        return Err("wildcards must appear on both sides".into());
    }
    Ok(())
}
