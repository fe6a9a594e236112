//! Session lifecycle: ending, stale sweep, orphan reporting, push safety.

use crate::harness::TestWorkspace;
use trail_core::SessionPhase;

#[test]
fn ended_session_is_marked_and_survives_until_stale() {
    let ws = TestWorkspace::with_files(&[("a.txt", "base a\n")]);

    ws.write_file("a.txt", "agent a\n");
    ws.record_step("2025-01-01-s1", &["a.txt"]);

    ws.engine().end_session("2025-01-01-s1").unwrap();

    let session = ws.engine().sessions().load("2025-01-01-s1").unwrap().unwrap();
    assert_eq!(session.phase, SessionPhase::Ended);
    assert!(session.ended_at.is_some());
}

#[test]
fn orphaned_shadow_refs_reported_after_session_deletion() {
    let ws = TestWorkspace::with_files(&[("a.txt", "base a\n")]);

    ws.write_file("a.txt", "agent a\n");
    ws.record_step("2025-01-01-s1", &["a.txt"]);

    // While the session lives, its shadow ref is not an orphan
    assert!(ws.engine().orphaned_shadow_refs().unwrap().is_empty());

    // The session record disappears; the ref becomes an orphan for clean
    ws.engine().sessions().delete("2025-01-01-s1").unwrap();
    let orphans = ws.engine().orphaned_shadow_refs().unwrap();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].session_id.as_deref(), Some("2025-01-01-s1"));
}

#[test]
fn stuck_sessions_reports_stepless_active_records() {
    let ws = TestWorkspace::with_files(&[("a.txt", "base a\n")]);

    // A session that recorded work is never stuck
    ws.write_file("a.txt", "agent a\n");
    ws.record_step("2025-01-01-s1", &["a.txt"]);

    // A record that never got a step, opened an hour ago, is
    let mut stalled =
        trail_core::SessionState::new("2025-01-01-s2", ws.head().to_string(), None, "/wt");
    stalled.started_at = chrono::Utc::now() - chrono::Duration::hours(1);
    ws.engine().sessions().save(&stalled).unwrap();

    let stuck = ws
        .engine()
        .stuck_sessions(chrono::Duration::minutes(30))
        .unwrap();
    assert_eq!(stuck.len(), 1);
    assert_eq!(stuck[0].session_id, "2025-01-01-s2");
}

#[test]
fn pre_push_without_metadata_ref_is_a_no_op() {
    let ws = TestWorkspace::with_files(&[("a.txt", "base a\n")]);
    // Nothing promoted yet: no metadata ref, nothing to push, no error
    ws.engine().pre_push("origin").unwrap();
}

#[test]
fn pre_push_failure_never_propagates() {
    let ws = TestWorkspace::with_files(&[("a.txt", "base a\n")]);

    ws.write_file("a.txt", "agent a\n");
    ws.record_step("2025-01-01-s1", &["a.txt"]);
    ws.stage("a.txt");
    ws.commit_with_hooks("take agent work");

    // The metadata ref exists now, but the remote does not; the push
    // failure is swallowed
    ws.engine().pre_push("no-such-remote").unwrap();
}

#[test]
fn list_temporary_feeds_cleanup_tooling() {
    let ws = TestWorkspace::with_files(&[("a.txt", "base a\n"), ("b.txt", "base b\n")]);
    let c0 = ws.head();

    ws.write_file("a.txt", "agent a\n");
    ws.record_step("2025-01-01-s1", &["a.txt"]);

    let entries = ws.engine().list_temporary().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].base_prefix, c0.to_string()[..7]);
    assert_eq!(entries[0].session_id.as_deref(), Some("2025-01-01-s1"));
}
