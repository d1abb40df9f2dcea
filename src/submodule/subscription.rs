//! submodule::subscription
//!
//! Subscribe sections and the subscription edges they permit.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::config::SubscribeConfig;
use crate::core::types::{BranchKey, ProjectName, RefName, TypeError};

/// A superproject branch tracking a submodule branch at `path`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubmoduleSubscription {
    pub superproject: BranchKey,
    pub submodule: BranchKey,
    pub path: String,
}

impl fmt::Display for SubmoduleSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} subscribes to {} at {}",
            self.superproject, self.submodule, self.path
        )
    }
}

/// A `src[:dst]` refspec with at most one `*` per side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefSpec {
    src: String,
    dst: Option<String>,
}

impl RefSpec {
    /// Parse a refspec. Validation of wildcard counts happens at config load.
    pub fn parse(spec: &str) -> Self {
        match spec.split_once(':') {
            Some((src, dst)) => Self {
                src: src.to_string(),
                dst: Some(dst.to_string()),
            },
            None => Self {
                src: spec.to_string(),
                dst: None,
            },
        }
    }

    pub fn source(&self) -> &str {
        &self.src
    }

    pub fn destination(&self) -> Option<&str> {
        self.dst.as_deref()
    }

    pub fn is_wildcard(&self) -> bool {
        self.src.contains('*')
    }

    pub fn matches_source(&self, name: &str) -> bool {
        wildcard_capture(&self.src, name).is_some()
    }

    pub fn matches_destination(&self, name: &str) -> bool {
        self.dst
            .as_deref()
            .is_some_and(|dst| wildcard_capture(dst, name).is_some())
    }

    /// Destination for `source`; the source itself when there is no
    /// destination side.
    pub fn expand(&self, source: &str) -> Option<String> {
        let captured = wildcard_capture(&self.src, source)?;
        let dst = self.dst.as_deref().unwrap_or(&self.src);
        Some(match dst.split_once('*') {
            Some((prefix, suffix)) => format!("{prefix}{captured}{suffix}"),
            None => dst.to_string(),
        })
    }
}

impl fmt::Display for RefSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.dst {
            Some(dst) => write!(f, "{}:{}", self.src, dst),
            None => write!(f, "{}", self.src),
        }
    }
}

/// What `*` matched in `name`, or the empty string for a literal match.
fn wildcard_capture<'a>(pattern: &str, name: &'a str) -> Option<&'a str> {
    match pattern.split_once('*') {
        None => (pattern == name).then_some(""),
        Some((prefix, suffix)) => {
            if name.len() < prefix.len() + suffix.len() {
                return None;
            }
            name.strip_prefix(prefix)?.strip_suffix(suffix)
        }
    }
}

/// Permission for `superproject` to subscribe to branches of the project
/// declaring the section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeSection {
    pub superproject: ProjectName,
    pub matching: Vec<RefSpec>,
    pub multi_match: Vec<RefSpec>,
}

impl SubscribeSection {
    pub fn from_config(config: &SubscribeConfig) -> Result<Self, TypeError> {
        Ok(Self {
            superproject: ProjectName::new(config.superproject.as_str())?,
            matching: config.matching.iter().map(|s| RefSpec::parse(s)).collect(),
            multi_match: config.multi_match.iter().map(|s| RefSpec::parse(s)).collect(),
        })
    }

    /// Superproject branches allowed to track `source`.
    ///
    /// `superproject_branches` lists the superproject's branch refs and is
    /// only consulted for multi-match refspecs.
    pub fn destination_branches<F>(
        &self,
        source: &RefName,
        superproject_branches: F,
    ) -> anyhow::Result<Vec<BranchKey>>
    where
        F: FnOnce() -> anyhow::Result<Vec<RefName>>,
    {
        let mut out: Vec<BranchKey> = Vec::new();
        let mut push = |out: &mut Vec<BranchKey>, branch: BranchKey| {
            if !out.contains(&branch) {
                out.push(branch);
            }
        };

        for spec in &self.matching {
            let Some(dst) = spec.expand(source.as_str()) else {
                continue;
            };
            let Ok(dst) = RefName::new(dst) else {
                continue;
            };
            push(&mut out, BranchKey::new(self.superproject.clone(), dst));
        }

        let multi: Vec<&RefSpec> = self
            .multi_match
            .iter()
            .filter(|s| s.matches_source(source.as_str()))
            .collect();
        if !multi.is_empty() {
            let branches = superproject_branches()?;
            for spec in multi {
                for refname in &branches {
                    if spec.destination().is_some() && !spec.matches_destination(refname.as_str()) {
                        continue;
                    }
                    push(&mut out, BranchKey::new(self.superproject.clone(), refname.clone()));
                }
            }
        }
        Ok(out)
    }
}

impl fmt::Display for SubscribeSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let specs: Vec<String> = self
            .matching
            .iter()
            .map(ToString::to_string)
            .chain(self.multi_match.iter().map(|s| format!("all:{s}")))
            .collect();
        write!(f, "{} [{}]", self.superproject, specs.join(", "))
    }
}
