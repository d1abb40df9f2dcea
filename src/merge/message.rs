//! merge::message
//!
//! Commit messages written by the strategies.

use crate::core::change::{Change, SubmitType};
use crate::core::status::MergeStatus;
use crate::core::types::{ChangeId, Oid, RefName};

/// Branch for which merge messages omit the `into <branch>` suffix.
const DEFAULT_BRANCH: &str = "refs/heads/master";

/// Most change keys listed in a merge subject.
const MAX_LISTED_KEYS: usize = 5;

/// A change brought in by a merge commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedEntry {
    pub subject: String,
    pub topic: Option<String>,
    /// Short form of the change key, or the change number.
    pub label: String,
}

impl MergedEntry {
    pub fn new(subject: &str, change: &Change) -> Self {
        Self {
            subject: subject.to_string(),
            topic: change.topic().map(str::to_string),
            label: abbreviate_key(change.key.as_deref(), change.id),
        }
    }
}

/// First nine characters of a `Change-Id` key.
pub fn abbreviate_key(key: Option<&str>, id: ChangeId) -> String {
    match key {
        Some(key) => key.chars().take(9).collect(),
        None => id.to_string(),
    }
}

/// Message of a merge commit bringing `merged` into `dest`, newest first.
pub fn merge_commit_message(merged: &[MergedEntry], dest: &RefName) -> String {
    let mut msg = summarize(merged);
    if dest.as_str() != DEFAULT_BRANCH {
        msg.push_str(" into ");
        msg.push_str(dest.short_name());
    }
    if merged.len() > 1 {
        msg.push_str("\n\n* changes:\n");
        for entry in merged {
            msg.push_str("  ");
            msg.push_str(&entry.subject);
            msg.push('\n');
        }
    }
    msg
}

fn summarize(merged: &[MergedEntry]) -> String {
    if let [only] = merged {
        return format!("Merge \"{}\"", only.subject);
    }

    let mut topics: Vec<&str> = Vec::new();
    for topic in merged.iter().filter_map(|e| e.topic.as_deref()) {
        if !topics.contains(&topic) {
            topics.push(topic);
        }
    }
    match topics.as_slice() {
        [topic] => format!("Merge changes from topic \"{topic}\""),
        [] => {
            let labels: Vec<&str> = merged
                .iter()
                .take(MAX_LISTED_KEYS)
                .map(|e| e.label.as_str())
                .collect();
            let more = if merged.len() > MAX_LISTED_KEYS { ", ..." } else { "" };
            format!("Merge changes {}{}", labels.join(","), more)
        }
        many => format!("Merge changes from topics \"{}\"", many.join("\", \"")),
    }
}

/// Message for a commit rewritten on submit (cherry-pick, forced rebase).
///
/// Appends a `Change-Id` footer when missing and a `Reviewed-on` link
/// when a canonical web URL is configured.
pub fn message_on_submit(original: &str, change: &Change, canonical_web_url: Option<&str>) -> String {
    let mut msg = original.trim_end().to_string();
    let mut footers = Vec::new();

    if let Some(key) = change.key.as_deref() {
        let line = format!("Change-Id: {key}");
        if !msg.lines().any(|l| l.trim() == line) {
            footers.push(line);
        }
    }
    if let Some(url) = canonical_web_url {
        let line = format!(
            "Reviewed-on: {}/c/{}/+/{}",
            url.trim_end_matches('/'),
            change.project,
            change.id
        );
        if !msg.lines().any(|l| l.trim() == line) {
            footers.push(line);
        }
    }

    if !footers.is_empty() {
        msg.push_str(if ends_with_footers(&msg) { "\n" } else { "\n\n" });
        msg.push_str(&footers.join("\n"));
    }
    msg.push('\n');
    msg
}

/// Change message recorded when a change is marked merged.
///
/// A change found already merged by an earlier attempt gets the message
/// its submit type would have produced.
pub fn merged_change_message(
    status: MergeStatus,
    submit_type: SubmitType,
    result: &Oid,
    submitter: &str,
) -> String {
    let status = match status {
        MergeStatus::AlreadyMerged => match submit_type {
            SubmitType::CherryPick => MergeStatus::CleanPick,
            SubmitType::RebaseIfNecessary | SubmitType::RebaseAlways => MergeStatus::CleanRebase,
            _ => MergeStatus::CleanMerge,
        },
        other => other,
    };
    let text = status.description();
    match status {
        MergeStatus::CleanPick | MergeStatus::CleanRebase => {
            format!("{text} as {result} by {submitter}")
        }
        _ => format!("{text} by {submitter}"),
    }
}

/// Whether the last paragraph (not the subject) is a block of `Key: value` lines.
fn ends_with_footers(msg: &str) -> bool {
    let Some((_, last)) = msg.rsplit_once("\n\n") else {
        return false;
    };
    let mut lines = last.lines().peekable();
    lines.peek().is_some() && lines.all(is_footer_line)
}

fn is_footer_line(line: &str) -> bool {
    match line.split_once(": ") {
        Some((key, _)) => {
            !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        }
        None => false,
    }
}
