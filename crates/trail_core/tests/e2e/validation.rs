//! Commit-message hook behavior: injection, idempotence, empty-commit abort.

use crate::harness::TestWorkspace;
use std::fs;
use trail_core::{parse_trailer, CommitSource, MessageValidation, CHECKPOINT_TRAILER};

#[test]
fn prepare_is_idempotent() {
    let ws = TestWorkspace::with_files(&[("a.txt", "base a\n")]);

    ws.write_file("a.txt", "agent a\n");
    ws.record_step("2025-01-01-s1", &["a.txt"]);
    ws.stage("a.txt");

    let once = ws.prepare_message("fix: a");
    // Second prepare on the already-prepared file changes nothing
    ws.engine()
        .prepare_commit_message(&ws.message_file(), CommitSource::Message, None)
        .unwrap();
    let twice = fs::read_to_string(ws.message_file()).unwrap();

    assert_eq!(once, twice);
    assert_eq!(twice.matches(CHECKPOINT_TRAILER).count(), 1);
}

#[test]
fn prepare_reuses_id_across_aborted_attempts() {
    let ws = TestWorkspace::with_files(&[("a.txt", "base a\n")]);

    ws.write_file("a.txt", "agent a\n");
    ws.record_step("2025-01-01-s1", &["a.txt"]);
    ws.stage("a.txt");

    let first = ws.prepare_message("fix: a");
    // User aborts, then commits again later: a fresh message file
    let second = ws.prepare_message("fix: a, take two");

    let id1 = parse_trailer(&first, CHECKPOINT_TRAILER).unwrap();
    let id2 = parse_trailer(&second, CHECKPOINT_TRAILER).unwrap();
    assert_eq!(id1, id2);
}

#[test]
fn prepare_skips_merge_messages() {
    let ws = TestWorkspace::with_files(&[("a.txt", "base a\n")]);

    ws.write_file("a.txt", "agent a\n");
    ws.record_step("2025-01-01-s1", &["a.txt"]);
    ws.stage("a.txt");

    let msg_path = ws.message_file();
    fs::write(&msg_path, "Merge branch 'feature'\n").unwrap();
    ws.engine()
        .prepare_commit_message(&msg_path, CommitSource::Merge, None)
        .unwrap();

    let message = fs::read_to_string(&msg_path).unwrap();
    assert!(parse_trailer(&message, CHECKPOINT_TRAILER).is_none());
}

#[test]
fn validate_clears_trailer_only_message_and_aborts() {
    let ws = TestWorkspace::with_files(&[("a.txt", "base a\n")]);

    ws.write_file("a.txt", "agent a\n");
    ws.record_step("2025-01-01-s1", &["a.txt"]);
    ws.stage("a.txt");

    // The user opened the editor on an empty message; prepare injects the
    // trailer before the comment block
    let msg_path = ws.message_file();
    fs::write(&msg_path, "\n# Please enter the commit message\n").unwrap();
    ws.engine()
        .prepare_commit_message(&msg_path, CommitSource::Message, None)
        .unwrap();
    assert!(parse_trailer(&fs::read_to_string(&msg_path).unwrap(), CHECKPOINT_TRAILER).is_some());

    // The user closes the editor without writing anything
    let verdict = ws.validate_message();
    assert_eq!(verdict, MessageValidation::Cleared);

    let cleared = fs::read_to_string(&msg_path).unwrap();
    assert!(parse_trailer(&cleared, CHECKPOINT_TRAILER).is_none());
    assert!(cleared.contains("# Please enter the commit message"));

    // Host aborts, so no commit and no promotion ran; the shadow ref and
    // session survive untouched
    assert_eq!(ws.trail_refs().len(), 1);
    let session = ws.engine().sessions().load("2025-01-01-s1").unwrap().unwrap();
    assert_eq!(session.step_count, 1);
}

#[test]
fn validate_accepts_real_message_with_trailer() {
    let ws = TestWorkspace::with_files(&[("a.txt", "base a\n")]);

    ws.write_file("a.txt", "agent a\n");
    ws.record_step("2025-01-01-s1", &["a.txt"]);
    ws.stage("a.txt");

    ws.prepare_message("fix: a");
    assert_eq!(ws.validate_message(), MessageValidation::Accepted);

    let message = fs::read_to_string(ws.message_file()).unwrap();
    assert!(parse_trailer(&message, CHECKPOINT_TRAILER).is_some());
}

#[test]
fn amended_message_keeps_existing_trailer() {
    let ws = TestWorkspace::with_files(&[("a.txt", "base a\n")]);

    ws.write_file("a.txt", "agent a\n");
    ws.record_step("2025-01-01-s1", &["a.txt"]);
    ws.stage("a.txt");

    let msg_path = ws.message_file();
    fs::write(&msg_path, "fix: a\n\nTrail-Checkpoint: ab12cd34ef56\n").unwrap();
    ws.engine()
        .prepare_commit_message(&msg_path, CommitSource::Commit, Some("HEAD"))
        .unwrap();

    let message = fs::read_to_string(&msg_path).unwrap();
    assert_eq!(
        parse_trailer(&message, CHECKPOINT_TRAILER),
        Some("ab12cd34ef56")
    );
    assert_eq!(message.matches(CHECKPOINT_TRAILER).count(), 1);
}
