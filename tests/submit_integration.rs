//! Integration tests for submitting changes.
//!
//! Every test runs the full merge operation against real bare
//! repositories created in a temporary directory.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::Utc;

use submit_engine::core::change::{ChangeStatus, SubmitType};
use submit_engine::core::status::MergeStatus;
use submit_engine::core::types::{AccountId, ChangeId, Oid, PatchSetId, ProjectName, RefName, SubmissionId};
use submit_engine::engine::memory::{FailOn, InMemoryChangeStore};
use submit_engine::engine::{
    BatchError, BatchExecutor, BatchPlan, ChangeStore, GitBatchExecutor, LocalRepoManager, PlanStep,
    RepoSession, SubmitError, SubmitOptions, SubmitRecord,
};
use submit_engine::git::{GitError, RepoAccess};

use common::{config, user, TestServer, MASTER};

const STABLE: &str = "refs/heads/stable";
const LINES: &str = "one\ntwo\nthree\n";

fn submit(server: &TestServer, change: ChangeId) -> Result<submit_engine::engine::SubmitResult, SubmitError> {
    server.op().merge(change, &user(), &SubmitOptions::default())
}

fn conflict(err: SubmitError) -> String {
    match err {
        SubmitError::Conflict(message) => message,
        other => panic!("expected a conflict, got {other:?}"),
    }
}

mod strategies {
    use super::*;

    #[test]
    fn merge_if_necessary_fast_forwards() {
        let mut server = TestServer::new();
        let initial = server.create_project("p", SubmitType::MergeIfNecessary);
        let c = server.commit("p", Some(&initial), &[("a.txt", "a\n")], "Add a");
        let id = server.create_change("p", &c);

        let result = submit(&server, id).unwrap();

        assert_eq!(server.master("p"), c);
        assert_eq!(result.attempts, 1);
        assert!(!result.dry_run);
        let change = server.change(id);
        assert_eq!(change.status, ChangeStatus::Merged);
        assert_eq!(change.submission_id, Some(result.submission_id.clone()));
        assert_eq!(
            change.messages.last().map(String::as_str),
            Some("Change has been successfully merged by Submitter")
        );
    }

    #[test]
    fn merge_if_necessary_merges_diverged_branch() {
        let mut server = TestServer::new();
        let initial = server.create_project("p", SubmitType::MergeIfNecessary);
        let other = server.commit("p", Some(&initial), &[("other.txt", "x\n")], "Direct push");
        server.set_branch("p", MASTER, &other);
        let c = server.commit("p", Some(&initial), &[("a.txt", "a\n")], "Add a");
        let id = server.create_change("p", &c);

        submit(&server, id).unwrap();

        let tip = server.master("p");
        assert_eq!(server.parents("p", &tip), vec![other, c]);
        assert_eq!(server.change(id).status, ChangeStatus::Merged);
    }

    #[test]
    fn fast_forward_only_refuses_diverged_branch() {
        let mut server = TestServer::new();
        let initial = server.create_project("p", SubmitType::FastForwardOnly);
        let other = server.commit("p", Some(&initial), &[("other.txt", "x\n")], "Direct push");
        server.set_branch("p", MASTER, &other);
        let c = server.commit("p", Some(&initial), &[("a.txt", "a\n")], "Add a");
        let id = server.create_change("p", &c);

        let message = conflict(submit(&server, id).unwrap_err());

        assert!(message.starts_with("Failed to submit 1 change due to the following problems:"));
        assert!(message.contains(MergeStatus::NotFastForward.description()));
        assert_eq!(server.master("p"), other);
        assert!(server.store.mutations().is_empty());
    }

    #[test]
    fn fast_forward_only_never_writes_commits() {
        let mut server = TestServer::new();
        let initial = server.create_project("p", SubmitType::FastForwardOnly);
        let a = server.commit("p", Some(&initial), &[("a.txt", "a\n")], "Add a");
        let b = server.commit("p", Some(&a), &[("b.txt", "b\n")], "Add b");
        server.create_change("p", &a);
        let id = server.create_change("p", &b);

        submit(&server, id).unwrap();

        assert_eq!(server.master("p"), b);
        let inserted = server
            .store
            .mutations()
            .into_iter()
            .filter(|op| matches!(op, submit_engine::engine::memory::StoreOperation::InsertPatchSet { .. }))
            .count();
        assert_eq!(inserted, 0);
    }

    #[test]
    fn cherry_pick_creates_patch_set() {
        let mut server = TestServer::new();
        let initial = server.create_project("p", SubmitType::CherryPick);
        let other = server.commit("p", Some(&initial), &[("other.txt", "x\n")], "Direct push");
        server.set_branch("p", MASTER, &other);
        let c = server.commit("p", Some(&initial), &[("a.txt", "a\n")], "Add a");
        let id = server.create_change("p", &c);

        submit(&server, id).unwrap();

        let tip = server.master("p");
        assert_ne!(tip, c);
        assert_eq!(server.parents("p", &tip), vec![other]);

        let change = server.change(id);
        let ps2 = PatchSetId::new(id, 2);
        assert_eq!(change.current_patch_set, ps2);
        assert_eq!(change.current_patch_set().map(|ps| ps.commit.clone()), Some(tip.clone()));
        assert!(change
            .approvals_on(ps2)
            .any(|a| a.label == "Code-Review" && a.value == 2));
        assert_eq!(server.tip("p", ps2.refname().as_str()), Some(tip.clone()));
        assert_eq!(
            change.messages.last().cloned(),
            Some(format!("Change has been successfully cherry-picked as {tip} by Submitter"))
        );
    }

    #[test]
    fn cherry_pick_rejects_root_commit() {
        let mut server = TestServer::new();
        let initial = server.create_project("p", SubmitType::CherryPick);
        let root = server.commit("p", None, &[("a.txt", "a\n")], "Unrelated root");
        let id = server.create_change("p", &root);

        let message = conflict(submit(&server, id).unwrap_err());

        assert!(message.contains(MergeStatus::CannotCherryPickRoot.description()));
        assert_eq!(server.master("p"), initial);
    }

    #[test]
    fn rebase_if_necessary_rebases_onto_tip() {
        let mut server = TestServer::new();
        let initial = server.create_project("p", SubmitType::RebaseIfNecessary);
        let other = server.commit("p", Some(&initial), &[("other.txt", "x\n")], "Direct push");
        server.set_branch("p", MASTER, &other);
        let c = server.commit("p", Some(&initial), &[("a.txt", "a\n")], "Add a");
        let id = server.create_change("p", &c);

        submit(&server, id).unwrap();

        let tip = server.master("p");
        assert_eq!(server.parents("p", &tip), vec![other]);
        assert_eq!(server.change(id).current_patch_set, PatchSetId::new(id, 2));
    }

    #[test]
    fn rebase_if_necessary_fast_forwards_when_possible() {
        let mut server = TestServer::new();
        let initial = server.create_project("p", SubmitType::RebaseIfNecessary);
        let c = server.commit("p", Some(&initial), &[("a.txt", "a\n")], "Add a");
        let id = server.create_change("p", &c);

        submit(&server, id).unwrap();

        assert_eq!(server.master("p"), c);
        assert_eq!(server.change(id).current_patch_set, PatchSetId::new(id, 1));
    }

    #[test]
    fn merge_always_writes_merge_commit_for_fast_forward() {
        let mut server = TestServer::new();
        let initial = server.create_project("p", SubmitType::MergeAlways);
        let c = server.commit("p", Some(&initial), &[("a.txt", "a\n")], "Add a");
        let id = server.create_change("p", &c);

        submit(&server, id).unwrap();

        let tip = server.master("p");
        assert_ne!(tip, c);
        assert_eq!(server.parents("p", &tip), vec![initial, c]);
        assert_eq!(server.change(id).status, ChangeStatus::Merged);
        assert_eq!(server.change(id).current_patch_set, PatchSetId::new(id, 1));
    }

    #[test]
    fn rebase_always_rewrites_fast_forward_with_footers() {
        let mut server = TestServer::new();
        let initial = server.create_project("p", SubmitType::RebaseAlways);
        let c = server.commit("p", Some(&initial), &[("a.txt", "a\n")], "Add a");
        let id = server.create_change("p", &c);

        let op = server.op_with(config("[server]\ncanonical_web_url = \"https://review.example.com\"\n"));
        op.merge(id, &user(), &SubmitOptions::default()).unwrap();

        let tip = server.master("p");
        assert_ne!(tip, c);
        assert_eq!(server.parents("p", &tip), vec![initial]);
        let change = server.change(id);
        assert_eq!(change.current_patch_set, PatchSetId::new(id, 2));
        assert_eq!(change.current_patch_set().map(|ps| ps.commit.clone()), Some(tip.clone()));

        let message = server.git("p").commit_info(&tip).unwrap().message;
        let key = change.key.clone().unwrap();
        assert_eq!(
            message,
            format!("Add a\n\nChange-Id: {key}\nReviewed-on: https://review.example.com/c/p/+/{id}\n")
        );
        assert_eq!(server.git("p").read_file(&tip, "a.txt").unwrap().as_deref(), Some("a\n"));
    }

    #[test]
    fn overlapping_paths_conflict_without_content_merge() {
        let mut server = TestServer::new();
        let initial = server.create_project("p", SubmitType::MergeIfNecessary);
        server.settings_mut("p").use_content_merge = false;
        let base = server.commit("p", Some(&initial), &[("f", LINES)], "Base");
        let other = server.commit("p", Some(&base), &[("f", "ONE\ntwo\nthree\n")], "Direct push");
        server.set_branch("p", MASTER, &other);
        let c = server.commit("p", Some(&base), &[("f", "one\ntwo\nTHREE\n")], "Edit f");
        let id = server.create_change("p", &c);

        let message = conflict(submit(&server, id).unwrap_err());

        assert!(message.contains(&format!("Change {id}: {}", MergeStatus::PathConflict.description())));
        assert_eq!(server.master("p"), other);
        assert!(server.store.mutations().is_empty());
    }

    #[test]
    fn unrelated_history_needs_manual_merge() {
        let mut server = TestServer::new();
        let initial = server.create_project("p", SubmitType::MergeIfNecessary);
        let root = server.commit("p", None, &[("a.txt", "a\n")], "Unrelated root");
        let id = server.create_change("p", &root);

        let message = conflict(submit(&server, id).unwrap_err());

        assert!(message.contains(MergeStatus::ManualRecursiveMerge.description()));
        assert_eq!(server.master("p"), initial);
    }

    #[test]
    fn rebase_conflict_is_reported() {
        let mut server = TestServer::new();
        let initial = server.create_project("p", SubmitType::RebaseIfNecessary);
        let base = server.commit("p", Some(&initial), &[("f", LINES)], "Base");
        let other = server.commit("p", Some(&base), &[("f", "uno\n")], "Direct push");
        server.set_branch("p", MASTER, &other);
        let c = server.commit("p", Some(&base), &[("f", "eins\n")], "Edit f");
        let id = server.create_change("p", &c);

        let message = conflict(submit(&server, id).unwrap_err());

        assert!(message.contains(&format!(
            "Cannot rebase {c}: The change could not be rebased due to a conflict during merge."
        )));
        assert_eq!(server.master("p"), other);
        assert_eq!(server.change(id).patch_sets.len(), 1);
    }

    #[test]
    fn rebase_rejects_root_commit() {
        let mut server = TestServer::new();
        let initial = server.create_project("p", SubmitType::RebaseIfNecessary);
        let root = server.commit("p", None, &[("a.txt", "a\n")], "Unrelated root");
        let id = server.create_change("p", &root);

        let message = conflict(submit(&server, id).unwrap_err());

        assert!(message.contains(MergeStatus::CannotRebaseRoot.description()));
        assert_eq!(server.master("p"), initial);
    }

    #[test]
    fn empty_commit_is_rejected_when_configured() {
        let mut server = TestServer::new();
        let initial = server.create_project("p", SubmitType::MergeIfNecessary);
        server.settings_mut("p").reject_empty_commit = true;
        let c = server.commit("p", Some(&initial), &[], "Nothing");
        let id = server.create_change("p", &c);

        let message = conflict(submit(&server, id).unwrap_err());

        assert!(message.contains(MergeStatus::EmptyCommit.description()));
        assert_eq!(server.master("p"), initial);
    }

    #[test]
    fn empty_commit_is_accepted_by_default() {
        let mut server = TestServer::new();
        let initial = server.create_project("p", SubmitType::MergeIfNecessary);
        let c = server.commit("p", Some(&initial), &[], "Nothing");
        let id = server.create_change("p", &c);

        submit(&server, id).unwrap();

        assert_eq!(server.master("p"), c);
    }
}

mod change_sets {
    use super::*;

    #[test]
    fn submitting_a_child_merges_its_open_parent() {
        let mut server = TestServer::new();
        let initial = server.create_project("p", SubmitType::MergeIfNecessary);
        let a = server.commit("p", Some(&initial), &[("a.txt", "a\n")], "Add a");
        let b = server.commit("p", Some(&a), &[("b.txt", "b\n")], "Add b");
        let parent = server.create_change("p", &a);
        let child = server.create_change("p", &b);

        let result = submit(&server, child).unwrap();

        assert_eq!(server.master("p"), b);
        assert_eq!(result.changes.len(), 2);
        for id in [parent, child] {
            let change = server.change(id);
            assert_eq!(change.status, ChangeStatus::Merged);
            assert_eq!(change.submission_id, Some(result.submission_id.clone()));
        }
    }

    #[test]
    fn hidden_parent_blocks_submission() {
        let mut server = TestServer::new();
        let initial = server.create_project("p", SubmitType::MergeIfNecessary);
        let a = server.commit("p", Some(&initial), &[("a.txt", "a\n")], "Add a");
        let b = server.commit("p", Some(&a), &[("b.txt", "b\n")], "Add b");
        let parent = server.create_change("p", &a);
        let child = server.create_change("p", &b);
        server.permissions.hide(parent);

        let err = submit(&server, child).unwrap_err();

        assert_eq!(
            err.to_string(),
            format!("A change to be submitted with {child} is not visible")
        );
        assert_eq!(server.master("p"), initial);
    }

    #[test]
    fn parent_without_change_is_a_missing_dependency() {
        let mut server = TestServer::new();
        let initial = server.create_project("p", SubmitType::MergeIfNecessary);
        let a = server.commit("p", Some(&initial), &[("a.txt", "a\n")], "Never uploaded");
        let b = server.commit("p", Some(&a), &[("b.txt", "b\n")], "Add b");
        let id = server.create_change("p", &b);

        let message = conflict(submit(&server, id).unwrap_err());

        assert!(message.contains("Depends on"));
        assert_eq!(server.master("p"), initial);
        assert!(server.store.mutations().is_empty());
    }

    #[test]
    fn whole_topic_spans_projects() {
        let mut server = TestServer::new();
        let a0 = server.create_project("a", SubmitType::MergeIfNecessary);
        let b0 = server.create_project("b", SubmitType::MergeIfNecessary);
        let a1 = server.commit("a", Some(&a0), &[("a.txt", "a\n")], "Topic part a");
        let b1 = server.commit("b", Some(&b0), &[("b.txt", "b\n")], "Topic part b");
        let ca = server.create_change_in_topic("a", &a1, "feature");
        let cb = server.create_change_in_topic("b", &b1, "feature");

        let op = server.op_with(config("[change]\nsubmit_whole_topic = true\n"));
        let result = op.merge(ca, &user(), &SubmitOptions::default()).unwrap();

        assert_eq!(server.master("a"), a1);
        assert_eq!(server.master("b"), b1);
        assert_eq!(server.change(cb).status, ChangeStatus::Merged);
        assert_eq!(result.changes.len(), 2);
        assert_eq!(op.metrics().topic_submissions(), 1);
        assert_eq!(op.metrics().topic_submissions_completed(), 1);
    }

    #[test]
    fn topics_are_ignored_without_whole_topic_submission() {
        let mut server = TestServer::new();
        let a0 = server.create_project("a", SubmitType::MergeIfNecessary);
        let b0 = server.create_project("b", SubmitType::MergeIfNecessary);
        let a1 = server.commit("a", Some(&a0), &[("a.txt", "a\n")], "Topic part a");
        let b1 = server.commit("b", Some(&b0), &[("b.txt", "b\n")], "Topic part b");
        let ca = server.create_change_in_topic("a", &a1, "feature");
        let cb = server.create_change_in_topic("b", &b1, "feature");

        submit(&server, ca).unwrap();

        assert_eq!(server.master("b"), b0);
        assert_eq!(server.change(cb).status, ChangeStatus::New);
    }

    #[test]
    fn hidden_topic_member_blocks_submission() {
        let mut server = TestServer::new();
        let a0 = server.create_project("a", SubmitType::MergeIfNecessary);
        let b0 = server.create_project("b", SubmitType::MergeIfNecessary);
        let a1 = server.commit("a", Some(&a0), &[("a.txt", "a\n")], "Topic part a");
        let b1 = server.commit("b", Some(&b0), &[("b.txt", "b\n")], "Topic part b");
        let ca = server.create_change_in_topic("a", &a1, "feature");
        let cb = server.create_change_in_topic("b", &b1, "feature");
        server.permissions.hide(cb);

        let op = server.op_with(config("[change]\nsubmit_whole_topic = true\n"));
        let err = op.merge(ca, &user(), &SubmitOptions::default()).unwrap_err();

        assert!(matches!(err, SubmitError::NotVisible { change } if change == ca));
        assert_eq!(server.master("a"), a0);
    }

    /// Topic "feature" on a:master, b:master and a:stable.
    fn three_branch_topic(server: &mut TestServer) -> ([ChangeId; 3], [Oid; 3]) {
        let a0 = server.create_project("a", SubmitType::MergeIfNecessary);
        let b0 = server.create_project("b", SubmitType::MergeIfNecessary);
        server.set_branch("a", STABLE, &a0);
        let a1 = server.commit("a", Some(&a0), &[("a.txt", "a\n")], "Topic part a");
        let b1 = server.commit("b", Some(&b0), &[("b.txt", "b\n")], "Topic part b");
        let s1 = server.commit("a", Some(&a0), &[("s.txt", "s\n")], "Topic part stable");
        let ids = [
            server.create_change_in_topic("a", &a1, "feature"),
            server.create_change_in_topic("b", &b1, "feature"),
            server.upload("a", STABLE, &s1, Some("feature")),
        ];
        (ids, [a1, b1, s1])
    }

    #[test]
    fn whole_topic_closure_spans_three_branches() {
        let mut server = TestServer::new();
        let (ids, [a1, b1, s1]) = three_branch_topic(&mut server);

        let op = server.op_with(config("[change]\nsubmit_whole_topic = true\n"));
        let result = op.merge(ids[1], &user(), &SubmitOptions::default()).unwrap();

        assert_eq!(result.changes.len(), 3);
        for id in ids {
            assert_eq!(server.change(id).status, ChangeStatus::Merged);
        }
        assert_eq!(server.master("a"), a1);
        assert_eq!(server.master("b"), b1);
        assert_eq!(server.tip("a", STABLE), Some(s1));
    }

    #[test]
    fn three_branch_topic_fails_when_one_member_is_hidden() {
        let mut server = TestServer::new();
        let (ids, _) = three_branch_topic(&mut server);
        let (a0, b0) = (server.master("a"), server.master("b"));
        let stable = server.tip("a", STABLE);
        server.permissions.hide(ids[2]);

        let op = server.op_with(config("[change]\nsubmit_whole_topic = true\n"));
        let err = op.merge(ids[0], &user(), &SubmitOptions::default()).unwrap_err();

        assert!(matches!(err, SubmitError::NotVisible { change } if change == ids[0]));
        assert_eq!(server.master("a"), a0);
        assert_eq!(server.master("b"), b0);
        assert_eq!(server.tip("a", STABLE), stable);
        assert!(server.store.mutations().is_empty());
    }

    #[test]
    fn rebase_chain_lands_child_on_rebased_parent() {
        let mut server = TestServer::new();
        let initial = server.create_project("p", SubmitType::RebaseIfNecessary);
        let other = server.commit("p", Some(&initial), &[("other.txt", "x\n")], "Direct push");
        server.set_branch("p", MASTER, &other);
        let b = server.commit("p", Some(&initial), &[("b.txt", "b\n")], "Add b");
        let a = server.commit("p", Some(&b), &[("a.txt", "a\n")], "Add a");
        let parent = server.create_change("p", &b);
        let child = server.create_change("p", &a);

        submit(&server, child).unwrap();

        let rebased = |id: ChangeId| {
            let change = server.change(id);
            assert_eq!(change.status, ChangeStatus::Merged);
            assert_eq!(change.current_patch_set, PatchSetId::new(id, 2));
            change.current_patch_set().map(|ps| ps.commit.clone()).unwrap()
        };
        let b2 = rebased(parent);
        let a2 = rebased(child);
        assert_eq!(server.master("p"), a2);
        assert_eq!(server.parents("p", &a2), vec![b2.clone()]);
        assert_eq!(server.parents("p", &b2), vec![other]);
    }

    #[test]
    fn rebase_child_of_abandoned_parent_is_missing_dependency() {
        let mut server = TestServer::new();
        let initial = server.create_project("p", SubmitType::RebaseIfNecessary);
        let b = server.commit("p", Some(&initial), &[("b.txt", "b\n")], "Add b");
        let a = server.commit("p", Some(&b), &[("a.txt", "a\n")], "Add a");
        let parent = server.create_change("p", &b);
        let child = server.create_change("p", &a);
        server.update_change(parent, |change| change.status = ChangeStatus::Abandoned);

        let message = conflict(submit(&server, child).unwrap_err());

        assert!(message.contains(&format!(
            "Change {child}: Depends on change that was not submitted. Commit {a} depends on \
             commit {b}, of change {parent} which cannot be merged."
        )));
        assert_eq!(server.master("p"), initial);
        assert!(server.store.mutations().is_empty());
    }
}

mod checks {
    use super::*;

    #[test]
    fn work_in_progress_is_refused() {
        let mut server = TestServer::new();
        let initial = server.create_project("p", SubmitType::MergeIfNecessary);
        let c = server.commit("p", Some(&initial), &[("a.txt", "a\n")], "Add a");
        let id = server.create_change("p", &c);
        server.update_change(id, |change| change.work_in_progress = true);

        let message = conflict(submit(&server, id).unwrap_err());

        assert!(message.contains(&format!("Change {id} is work in progress")));
    }

    #[test]
    fn merged_change_cannot_be_submitted_again() {
        let mut server = TestServer::new();
        let initial = server.create_project("p", SubmitType::MergeIfNecessary);
        let c = server.commit("p", Some(&initial), &[("a.txt", "a\n")], "Add a");
        let id = server.create_change("p", &c);
        submit(&server, id).unwrap();

        let message = conflict(submit(&server, id).unwrap_err());

        assert_eq!(message, format!("Change {id} is merged"));
    }

    #[test]
    fn moved_patch_set_ref_is_refused() {
        let mut server = TestServer::new();
        let initial = server.create_project("p", SubmitType::MergeIfNecessary);
        let c = server.commit("p", Some(&initial), &[("a.txt", "a\n")], "Add a");
        let d = server.commit("p", Some(&initial), &[("d.txt", "d\n")], "Add d");
        let id = server.create_change("p", &c);
        server.set_branch("p", PatchSetId::new(id, 1).refname().as_str(), &d);

        let message = conflict(submit(&server, id).unwrap_err());

        assert!(message.contains("does not match the revision of the patch set ref"));
        assert_eq!(server.master("p"), initial);
    }

    #[test]
    fn submit_rules_can_be_bypassed() {
        let mut server = TestServer::new();
        let initial = server.create_project("p", SubmitType::MergeIfNecessary);
        let c = server.commit("p", Some(&initial), &[("a.txt", "a\n")], "Add a");
        let id = server.create_change("p", &c);
        server.rules.set(id, SubmitRecord::needs("Verified"));

        let message = conflict(submit(&server, id).unwrap_err());
        assert!(message.contains("needs Verified"));

        let options = SubmitOptions {
            bypass_rules: true,
            ..SubmitOptions::default()
        };
        server.op().merge(id, &user(), &options).unwrap();
        assert_eq!(server.master("p"), c);
    }

    #[test]
    fn one_submit_type_per_branch() {
        let mut server = TestServer::new();
        let initial = server.create_project("p", SubmitType::MergeIfNecessary);
        let a = server.commit("p", Some(&initial), &[("a.txt", "a\n")], "Add a");
        let b = server.commit("p", Some(&a), &[("b.txt", "b\n")], "Add b");
        let parent = server.create_change("p", &a);
        let child = server.create_change("p", &b);
        server
            .rules
            .set(parent, SubmitRecord::ok().with_submit_type(SubmitType::CherryPick));

        let message = conflict(submit(&server, child).unwrap_err());

        assert!(message.contains(&format!(
            "Change has submit type MERGE_IF_NECESSARY, but previously chose submit type CHERRY_PICK from change {parent} in the same batch"
        )));
    }
}

mod execution {
    use super::*;

    /// Reports a lock failure for the first `failures` plans.
    struct FlakyExecutor {
        failures: AtomicU32,
        /// Apply the plan before failing, as if the failure came late.
        apply_first: bool,
    }

    impl FlakyExecutor {
        fn new(failures: u32, apply_first: bool) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                apply_first,
            }
        }
    }

    impl BatchExecutor for FlakyExecutor {
        fn execute(
            &self,
            plan: &BatchPlan,
            repos: &dyn RepoAccess,
            store: &dyn ChangeStore,
        ) -> Result<(), BatchError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining == 0 {
                return GitBatchExecutor::new().execute(plan, repos, store);
            }
            self.failures.store(remaining - 1, Ordering::SeqCst);
            if self.apply_first {
                GitBatchExecutor::new().execute(plan, repos, store)?;
            }
            Err(BatchError::LockFailure {
                project: ProjectName::new("p").unwrap(),
                source: GitError::Locked {
                    refname: MASTER.to_string(),
                },
            })
        }
    }

    #[test]
    fn lock_failures_are_retried() {
        let mut server = TestServer::new();
        let initial = server.create_project("p", SubmitType::MergeIfNecessary);
        let c = server.commit("p", Some(&initial), &[("a.txt", "a\n")], "Add a");
        let id = server.create_change("p", &c);

        let op = server.op_with_executor(config(""), Arc::new(FlakyExecutor::new(1, false)));
        let result = op.merge(id, &user(), &SubmitOptions::default()).unwrap();

        assert_eq!(result.attempts, 2);
        assert_eq!(server.master("p"), c);
        assert_eq!(server.change(id).status, ChangeStatus::Merged);
    }

    #[test]
    fn retry_after_applied_attempt_is_idempotent() {
        let mut server = TestServer::new();
        let initial = server.create_project("p", SubmitType::CherryPick);
        let other = server.commit("p", Some(&initial), &[("other.txt", "x\n")], "Direct push");
        server.set_branch("p", MASTER, &other);
        let c = server.commit("p", Some(&initial), &[("a.txt", "a\n")], "Add a");
        let id = server.create_change("p", &c);

        let op = server.op_with_executor(config(""), Arc::new(FlakyExecutor::new(1, true)));
        let result = op.merge(id, &user(), &SubmitOptions::default()).unwrap();

        assert_eq!(result.attempts, 2);
        let tip = server.master("p");
        assert_eq!(server.parents("p", &tip), vec![other]);
        let change = server.change(id);
        assert_eq!(change.status, ChangeStatus::Merged);
        assert_eq!(change.patch_sets.len(), 2);
        assert_eq!(server.listener.events().len(), 1);
    }

    #[test]
    fn dry_run_writes_nothing() {
        let mut server = TestServer::new();
        let initial = server.create_project("p", SubmitType::MergeIfNecessary);
        let c = server.commit("p", Some(&initial), &[("a.txt", "a\n")], "Add a");
        let id = server.create_change("p", &c);

        let options = SubmitOptions {
            dry_run: true,
            ..SubmitOptions::default()
        };
        let result = server.op().merge(id, &user(), &options).unwrap();

        assert!(result.dry_run);
        assert!(result.plan_digest().unwrap().starts_with("sha256:"));
        assert!(result
            .plan
            .updates_ref(&ProjectName::new("p").unwrap(), &RefName::new(MASTER).unwrap()));
        assert!(result
            .plan
            .steps
            .iter()
            .any(|s| matches!(s, PlanStep::SetMerged { update } if update.change == id)));
        assert_eq!(server.master("p"), initial);
        assert!(server.store.mutations().is_empty());
        assert!(server.listener.events().is_empty());
    }

    #[test]
    fn store_failure_reports_generic_error() {
        let mut server = TestServer::new();
        let initial = server.create_project("p", SubmitType::MergeIfNecessary);
        let c = server.commit("p", Some(&initial), &[("a.txt", "a\n")], "Add a");
        let id = server.create_change("p", &c);
        server.store = server.store.clone().fail_on(FailOn::SetMerged("disk full".into()));

        let err = submit(&server, id).unwrap_err();

        assert!(matches!(err, SubmitError::Execution { .. }));
        assert_eq!(err.to_string(), "Error submitting change");
        assert_eq!(server.change(id).status, ChangeStatus::New);
    }

    #[test]
    fn listener_hears_about_merged_changes() {
        let mut server = TestServer::new();
        let initial = server.create_project("p", SubmitType::MergeIfNecessary);
        let c = server.commit("p", Some(&initial), &[("a.txt", "a\n")], "Add a");
        let id = server.create_change("p", &c);

        submit(&server, id).unwrap();

        let events = server.listener.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].change.id, id);
        assert_eq!(events[0].merged_commit, c);
        assert_eq!(events[0].submitter, AccountId::new(7));
    }
}

mod executor {
    use super::*;

    fn plan() -> BatchPlan {
        BatchPlan::new(SubmissionId::new(ChangeId::new(1), Utc::now()))
    }

    #[test]
    fn nothing_moves_unless_every_ref_locks() {
        let mut server = TestServer::new();
        let a0 = server.create_project("a", SubmitType::MergeIfNecessary);
        let b0 = server.create_project("b", SubmitType::MergeIfNecessary);
        let a1 = server.commit("a", Some(&a0), &[("a.txt", "a\n")], "Add a");
        let b1 = server.commit("b", Some(&b0), &[("b.txt", "b\n")], "Add b");

        let plan = plan()
            .with_step(PlanStep::UpdateRef {
                project: ProjectName::new("a").unwrap(),
                refname: RefName::new(MASTER).unwrap(),
                old: Some(a0.clone()),
                new: a1,
                reason: "submit".into(),
            })
            .with_step(PlanStep::UpdateRef {
                project: ProjectName::new("b").unwrap(),
                refname: RefName::new(MASTER).unwrap(),
                old: Some(b1.clone()),
                new: b1,
                reason: "submit".into(),
            });

        let manager = LocalRepoManager::new(server.base());
        let session = RepoSession::new(&manager);
        let err = GitBatchExecutor::new()
            .execute(&plan, &session, &InMemoryChangeStore::new())
            .unwrap_err();

        assert!(err.is_lock_failure());
        assert_eq!(server.master("a"), a0);
        assert_eq!(server.master("b"), b0);
    }

    #[test]
    fn creates_refs_and_writes_store_after_refs() {
        let mut server = TestServer::new();
        let initial = server.create_project("p", SubmitType::MergeIfNecessary);
        let c = server.commit("p", Some(&initial), &[("a.txt", "a\n")], "Add a");

        let plan = plan().with_step(PlanStep::UpdateRef {
            project: ProjectName::new("p").unwrap(),
            refname: RefName::new("refs/heads/stable").unwrap(),
            old: None,
            new: c.clone(),
            reason: "create".into(),
        });

        let manager = LocalRepoManager::new(server.base());
        let session = RepoSession::new(&manager);
        GitBatchExecutor::new()
            .execute(&plan, &session, &InMemoryChangeStore::new())
            .unwrap();

        assert_eq!(server.tip("p", "refs/heads/stable"), Some(c));
        assert_eq!(server.master("p"), initial);
    }
}
