//! Promotion scenarios: full promotion and partial carry-forward.

use crate::harness::TestWorkspace;
use trail_core::{parse_trailer, CheckpointId, CHECKPOINT_TRAILER};

#[test]
fn single_file_single_commit_promotion() {
    let ws = TestWorkspace::with_files(&[("a.txt", "base a\n")]);
    let c0 = ws.head();

    // Agent modifies a.txt and reports the step
    ws.write_file("a.txt", "agent a\n");
    ws.record_step("2025-01-01-s1", &["a.txt"]);
    assert_eq!(ws.trail_refs().len(), 1, "one shadow ref after the step");

    // User stages the agent's work and commits
    ws.stage("a.txt");
    let (c1, message) = ws.commit_with_hooks("fix: a");

    let id_str = parse_trailer(&message, CHECKPOINT_TRAILER)
        .expect("trailer injected into the message")
        .to_string();
    assert!(message.starts_with("fix: a\n\nTrail-Checkpoint: "));
    let id = CheckpointId::parse(&id_str).unwrap();

    // The committed checkpoint exists and covers exactly a.txt
    let engine = ws.engine();
    let summary = engine.read_committed(id).unwrap().expect("checkpoint exists");
    assert_eq!(summary.files_touched, vec!["a.txt"]);
    assert_eq!(summary.strategy, "manual-commit");

    // The shadow ref anchored at C0 is gone
    let shadow_for_c0 = ws
        .trail_refs()
        .into_iter()
        .filter(|r| r.contains(&c0.to_string()[..7]))
        .count();
    assert_eq!(shadow_for_c0, 0, "old shadow ref deleted after full promotion");

    // The session carried over to the new base with nothing left to track
    let session = engine.sessions().load("2025-01-01-s1").unwrap().unwrap();
    assert_eq!(session.base_commit, c1.to_string());
    assert!(session.files_touched.is_empty());
    assert_eq!(session.step_count, 0);
    assert_eq!(session.last_checkpoint_id, Some(id));
}

#[test]
fn partial_promotion_carries_remainder_forward() {
    let ws = TestWorkspace::with_files(&[("a.txt", "base a\n"), ("b.txt", "base b\n")]);
    let c0 = ws.head();

    ws.write_file("a.txt", "agent a\n");
    ws.write_file("b.txt", "agent b\n");
    ws.record_step("2025-01-01-s1", &["a.txt", "b.txt"]);

    // User takes only a.txt
    ws.stage("a.txt");
    let (c1, message) = ws.commit_with_hooks("take a");
    let id = CheckpointId::parse(parse_trailer(&message, CHECKPOINT_TRAILER).unwrap()).unwrap();

    let engine = ws.engine();
    let summary = engine.read_committed(id).unwrap().unwrap();
    assert_eq!(summary.files_touched, vec!["a.txt"]);

    let session = engine.sessions().load("2025-01-01-s1").unwrap().unwrap();
    assert_eq!(session.base_commit, c1.to_string());
    assert_eq!(session.files_touched, vec!["b.txt"]);

    // Old shadow ref replaced by one anchored at C1 holding b.txt
    let refs = ws.trail_refs();
    let old_prefix = &c0.to_string()[..7];
    let new_prefix = &c1.to_string()[..7];
    assert!(refs.iter().all(|r| !r.contains(old_prefix)));
    let new_ref = refs
        .iter()
        .find(|r| r.contains(new_prefix))
        .expect("carry-forward shadow ref exists");

    let tip = ws.resolve(new_ref).unwrap();
    assert_eq!(ws.blob_at(tip, "b.txt").unwrap(), b"agent b\n");
    // a.txt in the carry-forward snapshot is the committed content
    assert_eq!(ws.blob_at(tip, "a.txt").unwrap(), b"agent a\n");
}

#[test]
fn no_promotion_when_user_commits_unrelated_change() {
    let ws = TestWorkspace::with_files(&[("a.txt", "base a\n")]);

    ws.write_file("a.txt", "agent a\n");
    ws.record_step("2025-01-01-s1", &["a.txt"]);

    // User overwrites the agent's edit with something else entirely
    ws.write_file("a.txt", "user rewrote this\n");
    ws.stage("a.txt");
    let message = ws.prepare_message("user edit");

    assert!(
        parse_trailer(&message, CHECKPOINT_TRAILER).is_none(),
        "no trailer when the staged content is not the agent's"
    );
}

#[test]
fn no_promotion_when_user_reverts_agent_work() {
    let ws = TestWorkspace::with_files(&[("a.txt", "base a\n")]);

    ws.write_file("a.txt", "agent a\n");
    ws.record_step("2025-01-01-s1", &["a.txt"]);

    ws.write_file("a.txt", "base a\n");
    ws.stage("a.txt");
    let message = ws.prepare_message("revert agent");

    assert!(parse_trailer(&message, CHECKPOINT_TRAILER).is_none());
}

#[test]
fn promoted_checkpoint_listed_newest_first() {
    let ws = TestWorkspace::with_files(&[("a.txt", "v0\n")]);

    for (round, content) in [("one", "v1\n"), ("two", "v2\n")] {
        ws.write_file("a.txt", content);
        ws.record_step("2025-01-01-s1", &["a.txt"]);
        ws.stage("a.txt");
        ws.commit_with_hooks(&format!("round {}", round));
    }

    let listed = ws.engine().list_committed(10).unwrap();
    assert_eq!(listed.len(), 2);
    // Newest first: the second round's checkpoint leads
    let session = ws.engine().sessions().load("2025-01-01-s1").unwrap().unwrap();
    assert_eq!(Some(listed[0].id), session.last_checkpoint_id);
}
