//! History-rewrite survival and step deduplication.

use crate::harness::TestWorkspace;
use trail_core::StepRecord;

#[test]
fn amend_migrates_shadow_ref_to_new_base() {
    let ws = TestWorkspace::with_files(&[("a.txt", "base a\n")]);
    let c0 = ws.head();

    ws.write_file("a.txt", "agent a\n");
    ws.record_step("2025-01-01-s1", &["a.txt"]);

    let refs_before = ws.trail_refs();
    assert_eq!(refs_before.len(), 1);
    let old_tip = ws.resolve(&refs_before[0]).unwrap();

    // User amends C0 into C0' (message-only amend moves the tip)
    let c0_prime = ws.amend_head("init, reworded");
    assert_ne!(c0_prime, c0);

    // Next step on the same session migrates the shadow ref
    ws.record_step("2025-01-01-s1", &["a.txt"]);

    let refs_after = ws.trail_refs();
    assert_eq!(refs_after.len(), 1);
    assert!(refs_after[0].contains(&c0_prime.to_string()[..7]));
    assert!(!refs_after[0].contains(&c0.to_string()[..7]));

    // No data loss: the migrated ref still points at the recorded snapshot
    assert_eq!(ws.resolve(&refs_after[0]), Some(old_tip));

    let session = ws.engine().sessions().load("2025-01-01-s1").unwrap().unwrap();
    assert_eq!(session.base_commit, c0_prime.to_string());
}

#[test]
fn identical_steps_dedup_without_advancing() {
    let ws = TestWorkspace::with_files(&[("a.txt", "base a\n")]);

    ws.write_file("a.txt", "agent a\n");
    let step = StepRecord {
        session_id: "2025-01-01-s1".to_string(),
        modified_files: vec!["a.txt".to_string()],
        ..Default::default()
    };

    let first = ws.engine().record_step(&step).unwrap();
    let second = ws.engine().record_step(&step).unwrap();

    assert!(!first.skipped);
    assert!(second.skipped);
    assert_eq!(second.commit_id, first.commit_id);
    assert_eq!(ws.resolve(&first.ref_name), Some(first.commit_id));

    // A skipped step does not increment the counter
    let session = ws.engine().sessions().load("2025-01-01-s1").unwrap().unwrap();
    assert_eq!(session.step_count, 1);
}

#[test]
fn changed_content_after_dedup_advances_again() {
    let ws = TestWorkspace::with_files(&[("a.txt", "base a\n")]);

    ws.write_file("a.txt", "step one\n");
    ws.record_step("2025-01-01-s1", &["a.txt"]);
    ws.record_step("2025-01-01-s1", &["a.txt"]);

    ws.write_file("a.txt", "step two\n");
    ws.record_step("2025-01-01-s1", &["a.txt"]);

    let session = ws.engine().sessions().load("2025-01-01-s1").unwrap().unwrap();
    assert_eq!(session.step_count, 2);
}

#[test]
fn two_sessions_in_one_worktree_share_a_shadow_ref_base() {
    // Distinct sessions with the same base and worktree target the same
    // ref name; the second session chains onto the first session's tip.
    let ws = TestWorkspace::with_files(&[("a.txt", "base a\n"), ("b.txt", "base b\n")]);

    ws.write_file("a.txt", "agent one\n");
    ws.record_step("2025-01-01-s1", &["a.txt"]);
    ws.write_file("b.txt", "agent two\n");
    ws.record_step("2025-01-02-s2", &["b.txt"]);

    assert_eq!(ws.trail_refs().len(), 1);
}
