//! submodule::gitmodules
//!
//! Parsing `.gitmodules` into subscriptions of one superproject branch.
//!
//! The file is read with `gix`'s git config parser, so continuation lines,
//! quoting, comments and keys on the section header line behave as they do
//! for `git config`. A `[submodule "<name>"]` section becomes a
//! subscription when it has `path`, `url` and `branch`. Sections missing
//! any of them, or whose URL points outside this server, are skipped.
//!
//! # URL resolution
//!
//! - `../x` climbs from the superproject's name, one component per `../`
//! - `./x` is resolved below the superproject's name
//! - Absolute URLs must share host and path prefix with the canonical web
//!   URL; the remainder is the project name
//!
//! A trailing `.git` and leading slashes are stripped from the result.

use std::collections::BTreeMap;

use gix::config::file::{init, Metadata};
use tracing::debug;

use super::subscription::SubmoduleSubscription;
use super::SubmoduleConflict;
use crate::core::types::{BranchKey, ProjectName, RefName};

pub const GITMODULES: &str = ".gitmodules";

const KEYS: [&str; 3] = ["path", "url", "branch"];

/// Subscriptions declared by one superproject branch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitModules {
    subscriptions: Vec<SubmoduleSubscription>,
}

impl GitModules {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse the `.gitmodules` text found on `superproject`.
    ///
    /// # Errors
    ///
    /// [`SubmoduleConflict::InvalidGitModules`] if the text is not valid
    /// git config.
    pub fn parse(
        text: &str,
        superproject: &BranchKey,
        canonical_web_url: Option<&str>,
    ) -> Result<Self, SubmoduleConflict> {
        let subscriptions = parse_sections(text)
            .map_err(|e| SubmoduleConflict::InvalidGitModules {
                branch: superproject.clone(),
                message: e.to_string(),
            })?
            .into_iter()
            .filter_map(|(name, keys)| {
                let sub = subscription(&keys, superproject, canonical_web_url);
                if sub.is_none() {
                    debug!(%superproject, submodule = %name, "skipping submodule section");
                }
                sub
            })
            .collect();
        Ok(Self { subscriptions })
    }

    pub fn subscriptions(&self) -> &[SubmoduleSubscription] {
        &self.subscriptions
    }

    /// Subscriptions that track `submodule`.
    pub fn subscribed_to(&self, submodule: &BranchKey) -> Vec<SubmoduleSubscription> {
        self.subscriptions
            .iter()
            .filter(|s| &s.submodule == submodule)
            .cloned()
            .collect()
    }
}

fn subscription(
    keys: &BTreeMap<&'static str, String>,
    superproject: &BranchKey,
    canonical_web_url: Option<&str>,
) -> Option<SubmoduleSubscription> {
    let path = keys.get("path").filter(|v| !v.is_empty())?;
    let url = keys.get("url").filter(|v| !v.is_empty())?;
    let branch = keys.get("branch").filter(|v| !v.is_empty())?;

    let branch = if branch == "." {
        superproject.branch.clone()
    } else {
        RefName::from_short_or_full(branch).ok()?
    };
    let project = resolve_project(url, &superproject.project, canonical_web_url)?;

    Some(SubmoduleSubscription {
        superproject: superproject.clone(),
        submodule: BranchKey::new(project, branch),
        path: path.clone(),
    })
}

fn resolve_project(
    url: &str,
    superproject: &ProjectName,
    canonical_web_url: Option<&str>,
) -> Option<ProjectName> {
    let name = if url.starts_with("../") {
        let mut base: Vec<&str> = superproject.as_str().split('/').collect();
        let mut rest = url;
        while let Some(stripped) = rest.strip_prefix("../") {
            base.pop()?;
            rest = stripped;
        }
        base.push(rest);
        base.join("/")
    } else if let Some(rest) = url.strip_prefix("./") {
        format!("{superproject}/{rest}")
    } else {
        let target = gix::url::parse(url.as_bytes().into()).ok()?;
        let this = gix::url::parse(canonical_web_url?.as_bytes().into()).ok()?;
        let (target_host, this_host) = (target.host()?, this.host()?);
        if !target_host.eq_ignore_ascii_case(this_host) {
            return None;
        }
        let (target_path, this_path) = (target.path.to_string(), this.path.to_string());
        target_path.strip_prefix(this_path.as_str())?.to_string()
    };

    let name = name.trim_start_matches('/');
    let name = name.strip_suffix(".git").unwrap_or(name);
    let name = name.trim_end_matches('/');
    ProjectName::new(name).ok()
}

/// `[submodule "name"]` sections in file order with the keys we read.
///
/// Repeated headers for one name are merged and the last value of a key
/// wins.
fn parse_sections(text: &str) -> Result<Vec<(String, BTreeMap<&'static str, String>)>, init::Error> {
    let file = gix::config::File::from_bytes_no_includes(
        text.as_bytes(),
        Metadata::api(),
        init::Options::default(),
    )?;
    let mut sections: Vec<(String, BTreeMap<&'static str, String>)> = Vec::new();
    let Some(found) = file.sections_by_name("submodule") else {
        return Ok(sections);
    };
    for section in found {
        let Some(name) = section.header().subsection_name() else {
            continue;
        };
        let name = name.to_string();
        let index = match sections.iter().position(|(n, _)| *n == name) {
            Some(i) => i,
            None => {
                sections.push((name, BTreeMap::new()));
                sections.len() - 1
            }
        };
        for key in KEYS {
            if let Some(value) = section.value(key) {
                sections[index].1.insert(key, value.to_string());
            }
        }
    }
    Ok(sections)
}
