//! core::config
//!
//! Configuration schema and loading.
//!
//! # Overview
//!
//! The engine has two configuration scopes:
//! - **Global**: Process-wide defaults for the serving host
//! - **Site**: An explicit file supplied by the embedding server
//!
//! # Precedence
//!
//! Configuration values are resolved in this order (later overrides earlier):
//! 1. Default values
//! 2. Global config file
//! 3. Site config file
//!
//! Tables are merged key by key, so a site file only needs the values it
//! changes.
//!
//! # Global Config Locations
//!
//! Searched in order:
//! 1. `$SUBMIT_ENGINE_CONFIG` if set
//! 2. `$XDG_CONFIG_HOME/submit-engine/config.toml`
//! 3. `~/.submit-engine/config.toml`
//!
//! # Example
//!
//! ```no_run
//! use submit_engine::core::config::Config;
//! use std::path::Path;
//!
//! let result = Config::load(Some(Path::new("/etc/review/submit.toml"))).unwrap();
//! for warning in &result.warnings {
//!     eprintln!("{}: {}", warning.path.display(), warning.message);
//! }
//! let config = result.config;
//! println!("whole topic: {}", config.submit_whole_topic());
//! ```

pub mod schema;

pub use schema::{
    CacheConfig, ChangeConfig, ProjectConfig, RetryConfig, ServerConfig, SubmitConfig,
    SubmoduleConfig, SubscribeConfig, VerboseSuperprojectUpdate,
};

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::core::types::ProjectName;

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// Warnings generated during config loading.
#[derive(Debug, Clone)]
pub struct ConfigWarning {
    /// The warning message.
    pub message: String,
    /// The path that triggered the warning.
    pub path: PathBuf,
}

/// Result of loading configuration.
#[derive(Debug)]
pub struct ConfigLoadResult {
    /// The loaded configuration.
    pub config: Config,
    /// Any warnings generated during loading.
    pub warnings: Vec<ConfigWarning>,
}

/// Merged configuration from all sources.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// The effective settings after merging.
    pub settings: SubmitConfig,
    /// Files that contributed, lowest precedence first.
    sources: Vec<PathBuf>,
}

impl Config {
    /// Load configuration from the global location and an optional site file.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or if
    /// the merged result fails validation. Missing global files are not an
    /// error; a missing site file is.
    pub fn load(site_path: Option<&Path>) -> Result<ConfigLoadResult, ConfigError> {
        let mut layers = Vec::new();
        if let Some(path) = Self::global_config_path() {
            layers.push((Self::read_table(&path)?, path));
        }
        if let Some(path) = site_path {
            layers.push((Self::read_table(path)?, path.to_path_buf()));
        }

        let mut merged = toml::Table::new();
        for (table, _) in &layers {
            merge_tables(&mut merged, table);
        }
        let origin = layers
            .last()
            .map(|(_, p)| p.clone())
            .unwrap_or_default();
        let settings: SubmitConfig =
            toml::Value::Table(merged)
                .try_into()
                .map_err(|e: toml::de::Error| ConfigError::ParseError {
                    path: origin.clone(),
                    message: e.to_string(),
                })?;
        settings.validate()?;

        let warnings = collect_warnings(&settings, &origin);
        Ok(ConfigLoadResult {
            config: Config {
                settings,
                sources: layers.into_iter().map(|(_, p)| p).collect(),
            },
            warnings,
        })
    }

    /// Parse configuration from a TOML string (no file lookup).
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let settings: SubmitConfig =
            toml::from_str(contents).map_err(|e| ConfigError::ParseError {
                path: PathBuf::from("<inline>"),
                message: e.to_string(),
            })?;
        settings.validate()?;
        Ok(Self {
            settings,
            sources: Vec::new(),
        })
    }

    /// Wrap already-built settings after validating them.
    pub fn from_settings(settings: SubmitConfig) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            settings,
            sources: Vec::new(),
        })
    }

    /// Locate the global config file, if one exists.
    fn global_config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("SUBMIT_ENGINE_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }
        if let Ok(xdg_home) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_home).join("submit-engine/config.toml");
            if path.exists() {
                return Some(path);
            }
        }
        let path = dirs::home_dir()?.join(".submit-engine/config.toml");
        path.exists().then_some(path)
    }

    fn read_table(path: &Path) -> Result<toml::Table, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;
        contents
            .parse::<toml::Table>()
            .map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
    }

    /// Files that contributed to this configuration.
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub fn submit_whole_topic(&self) -> bool {
        self.settings.change.submit_whole_topic
    }

    pub fn submodule(&self) -> &SubmoduleConfig {
        &self.settings.submodule
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.settings.retry
    }

    pub fn server(&self) -> &ServerConfig {
        &self.settings.server
    }

    /// Settings for a project, falling back to defaults.
    pub fn project(&self, project: &ProjectName) -> ProjectConfig {
        self.settings
            .projects
            .get(project.as_str())
            .cloned()
            .unwrap_or_default()
    }
}

/// Recursively merge `overlay` into `base`; tables merge, other values replace.
fn merge_tables(base: &mut toml::Table, overlay: &toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

fn collect_warnings(settings: &SubmitConfig, path: &Path) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();
    if !settings.submodule.enable_superproject_subscriptions {
        for (name, project) in &settings.projects {
            if !project.subscribe.is_empty() {
                warnings.push(ConfigWarning {
                    message: format!(
                        "project '{name}' declares subscribe sections but superproject \
                         subscriptions are disabled"
                    ),
                    path: path.to_path_buf(),
                });
            }
        }
    }
    warnings
}
