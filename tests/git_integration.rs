//! Integration tests for the Git interface.
//!
//! These tests run against real bare repositories created in a temporary
//! directory, with commits written through the shared fixture.

mod common;

use chrono::{TimeZone, Utc};

use submit_engine::core::change::SubmitType;
use submit_engine::core::types::{Oid, RefName};
use submit_engine::git::{
    Git, GitError, GitlinkEdit, NewCommit, PathEntry, PersonIdent, RefUpdate, TreeMerge, WalkOrder,
};

use common::{TestServer, MASTER};

const LINES: &str = "one\ntwo\nthree\nfour\nfive\n";

fn server() -> (TestServer, Oid) {
    let mut server = TestServer::new();
    let initial = server.create_project("p", SubmitType::MergeIfNecessary);
    (server, initial)
}

fn update(refname: &str, old: Option<&Oid>, new: &Oid) -> RefUpdate {
    RefUpdate {
        refname: RefName::new(refname).unwrap(),
        old: old.cloned(),
        new: new.clone(),
        message: "test".to_string(),
    }
}

/// Lock and write a single ref.
fn apply(git: &Git, update: RefUpdate) -> Result<(), GitError> {
    git.lock_refs(std::slice::from_ref(&update))?.commit()
}

mod refs {
    use super::*;

    #[test]
    fn missing_ref_resolves_to_none() {
        let (server, _) = server();
        let git = server.git("p");
        assert_eq!(git.try_resolve_ref("refs/heads/nope").unwrap(), None);
        assert!(matches!(
            git.resolve_ref("refs/heads/nope"),
            Err(GitError::RefNotFound { .. })
        ));
    }

    #[test]
    fn branch_tips_skip_patch_set_refs() {
        let (server, initial) = server();
        let c = server.commit("p", Some(&initial), &[("a", "a\n")], "A");
        server.create_change("p", &c);
        server.set_branch("p", "refs/heads/stable", &initial);

        let names: Vec<String> = server
            .git("p")
            .branch_tips()
            .unwrap()
            .into_iter()
            .map(|e| e.name.to_string())
            .collect();
        assert_eq!(names, vec!["refs/heads/master", "refs/heads/stable"]);
    }

    #[test]
    fn cas_update_moves_ref() {
        let (server, initial) = server();
        let c = server.commit("p", Some(&initial), &[("a", "a\n")], "A");
        apply(&server.git("p"), update(MASTER, Some(&initial), &c)).unwrap();
        assert_eq!(server.master("p"), c);
    }

    #[test]
    fn stale_expectation_fails_cas() {
        let (server, initial) = server();
        let c = server.commit("p", Some(&initial), &[("a", "a\n")], "A");
        let d = server.commit("p", Some(&initial), &[("b", "b\n")], "B");
        server.set_branch("p", MASTER, &d);

        let err = apply(&server.git("p"), update(MASTER, Some(&initial), &c)).unwrap_err();
        assert!(matches!(err, GitError::CasFailed { .. }));
        assert!(err.is_lock_failure());
        assert_eq!(server.master("p"), d);
    }

    #[test]
    fn creating_an_existing_ref_fails_cas() {
        let (server, initial) = server();
        let c = server.commit("p", Some(&initial), &[("a", "a\n")], "A");
        let err = apply(&server.git("p"), update(MASTER, None, &c)).unwrap_err();
        assert!(matches!(err, GitError::CasFailed { .. }));
    }

    #[test]
    fn dropped_lock_writes_nothing() {
        let (server, initial) = server();
        let c = server.commit("p", Some(&initial), &[("a", "a\n")], "A");
        let git = server.git("p");
        {
            let locked = git
                .lock_refs(&[
                    update(MASTER, Some(&initial), &c),
                    update("refs/heads/new", None, &c),
                ])
                .unwrap();
            assert_eq!(locked.len(), 2);
        }
        assert_eq!(server.master("p"), initial);
        assert_eq!(server.tip("p", "refs/heads/new"), None);
    }

    #[test]
    fn committed_lock_writes_every_ref() {
        let (server, initial) = server();
        let c = server.commit("p", Some(&initial), &[("a", "a\n")], "A");
        let git = server.git("p");
        git.lock_refs(&[
            update(MASTER, Some(&initial), &c),
            update("refs/heads/new", None, &c),
        ])
        .unwrap()
        .commit()
        .unwrap();
        assert_eq!(server.master("p"), c);
        assert_eq!(server.tip("p", "refs/heads/new"), Some(c));
    }
}

mod history {
    use super::*;

    #[test]
    fn ancestry_and_merge_base() {
        let (server, initial) = server();
        let a = server.commit("p", Some(&initial), &[("a", "a\n")], "A");
        let b = server.commit("p", Some(&initial), &[("b", "b\n")], "B");
        let git = server.git("p");

        assert!(git.is_ancestor(&initial, &a).unwrap());
        assert!(git.is_ancestor(&a, &a).unwrap());
        assert!(!git.is_ancestor(&a, &b).unwrap());
        assert_eq!(git.merge_base(&a, &b).unwrap(), Some(initial));
    }

    #[test]
    fn unrelated_histories_have_no_merge_base() {
        let (server, initial) = server();
        let root = server.commit("p", None, &[("x", "x\n")], "Root");
        let git = server.git("p");
        assert_eq!(git.merge_base(&initial, &root).unwrap(), None);
        assert_eq!(
            git.merge_trees(&initial, &root, true).unwrap(),
            TreeMerge::NoMergeBase
        );
    }

    #[test]
    fn rev_list_orders_and_excludes() {
        let (server, initial) = server();
        let a = server.commit("p", Some(&initial), &[("a", "a\n")], "A");
        let b = server.commit("p", Some(&a), &[("b", "b\n")], "B");
        let git = server.git("p");

        let oldest = git
            .rev_list(std::slice::from_ref(&b), std::slice::from_ref(&initial), WalkOrder::OldestFirst)
            .unwrap();
        assert_eq!(oldest, vec![a.clone(), b.clone()]);

        let newest = git
            .rev_list(std::slice::from_ref(&b), &[], WalkOrder::NewestFirst)
            .unwrap();
        assert_eq!(newest, vec![b, a, initial]);
    }

    #[test]
    fn commit_info_reports_message_and_parents() {
        let (server, initial) = server();
        let a = server.commit("p", Some(&initial), &[("a", "a\n")], "Add a\n\nBody text\n");
        let info = server.git("p").commit_info(&a).unwrap();
        assert_eq!(info.summary, "Add a");
        assert!(info.message.contains("Body text"));
        assert_eq!(info.parents, vec![initial]);
    }

    #[test]
    fn created_commit_keeps_identities() {
        let (server, initial) = server();
        let git = server.git("p");
        let tree = git.commit_info(&initial).unwrap().tree;
        let when = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let author = PersonIdent::new("Author", "author@example.com", when);
        let committer = PersonIdent::new("Server", "server@example.com", when);

        let oid = git
            .create_commit(&NewCommit {
                tree,
                parents: vec![initial.clone()],
                author: author.clone(),
                committer: committer.clone(),
                message: "Empty\n".to_string(),
            })
            .unwrap();

        let info = git.commit_info(&oid).unwrap();
        assert!(info.author.same_person(&author));
        assert!(info.committer.same_person(&committer));
        assert_eq!(info.parents, vec![initial]);
        assert_eq!(server.master("p"), info.parents[0]);
    }
}

mod merging {
    use super::*;

    fn diverged(server: &TestServer, base: &Oid) -> (Oid, Oid) {
        let ours = server.commit("p", Some(base), &[("f", "ONE\ntwo\nthree\nfour\nfive\n")], "Ours");
        let theirs = server.commit("p", Some(base), &[("f", "one\ntwo\nthree\nfour\nFIVE\n")], "Theirs");
        (ours, theirs)
    }

    #[test]
    fn content_merge_combines_edits_to_one_file() {
        let (server, initial) = server();
        let base = server.commit("p", Some(&initial), &[("f", LINES)], "Base");
        let (ours, theirs) = diverged(&server, &base);
        let git = server.git("p");

        let TreeMerge::Clean(tree) = git.merge_trees(&ours, &theirs, true).unwrap() else {
            panic!("expected clean merge");
        };
        let merged = server.commit_tree("p", &[ours, theirs], &tree, "Merge");
        assert_eq!(
            git.read_file(&merged, "f").unwrap().as_deref(),
            Some("ONE\ntwo\nthree\nfour\nFIVE\n")
        );
    }

    #[test]
    fn without_content_merge_shared_paths_conflict() {
        let (server, initial) = server();
        let base = server.commit("p", Some(&initial), &[("f", LINES)], "Base");
        let (ours, theirs) = diverged(&server, &base);

        let result = server.git("p").merge_trees(&ours, &theirs, false).unwrap();
        assert_eq!(result, TreeMerge::Conflict(vec!["f".to_string()]));
    }

    #[test]
    fn overlapping_edits_conflict() {
        let (server, initial) = server();
        let base = server.commit("p", Some(&initial), &[("f", LINES)], "Base");
        let ours = server.commit("p", Some(&base), &[("f", "uno\n")], "Ours");
        let theirs = server.commit("p", Some(&base), &[("f", "eins\n")], "Theirs");

        let result = server.git("p").merge_trees(&ours, &theirs, true).unwrap();
        assert_eq!(result, TreeMerge::Conflict(vec!["f".to_string()]));
    }

    #[test]
    fn cherry_pick_applies_only_the_commit_diff() {
        let (server, initial) = server();
        let a = server.commit("p", Some(&initial), &[("a", "a\n")], "A");
        let b = server.commit("p", Some(&a), &[("b", "b\n")], "B");
        let other = server.commit("p", Some(&initial), &[("c", "c\n")], "C");
        let git = server.git("p");

        let TreeMerge::Clean(tree) = git.cherry_pick(&b, &other, true).unwrap() else {
            panic!("expected clean pick");
        };
        let picked = server.commit_tree("p", std::slice::from_ref(&other), &tree, "B");
        assert_eq!(git.read_file(&picked, "b").unwrap().as_deref(), Some("b\n"));
        assert_eq!(git.read_file(&picked, "c").unwrap().as_deref(), Some("c\n"));
        assert_eq!(git.read_file(&picked, "a").unwrap(), None);
    }
}

mod trees {
    use super::*;

    #[test]
    fn gitlinks_can_be_added_and_removed() {
        let (server, initial) = server();
        let git = server.git("p");
        let target = server.commit("p", Some(&initial), &[("a", "a\n")], "A");

        let linked = server.commit_gitlink("p", &initial, "lib/sub", &target, "Link");
        assert_eq!(git.path_entry(&linked, "lib/sub").unwrap(), PathEntry::Gitlink(target));
        assert_eq!(git.path_entry(&linked, "README").unwrap(), PathEntry::Other);
        assert_eq!(git.path_entry(&linked, "lib/other").unwrap(), PathEntry::Missing);

        let tree = git.commit_info(&linked).unwrap().tree;
        let tree = git
            .edit_gitlinks(
                &tree,
                &[GitlinkEdit {
                    path: "lib/sub".to_string(),
                    target: None,
                }],
            )
            .unwrap();
        let unlinked = server.commit_tree("p", &[linked], &tree, "Unlink");
        assert_eq!(git.path_entry(&unlinked, "lib/sub").unwrap(), PathEntry::Missing);
    }

    #[test]
    fn read_file_skips_missing_paths() {
        let (server, initial) = server();
        let git = server.git("p");
        assert_eq!(git.read_file(&initial, "README").unwrap().as_deref(), Some("initial\n"));
        assert_eq!(git.read_file(&initial, ".gitmodules").unwrap(), None);
    }
}
