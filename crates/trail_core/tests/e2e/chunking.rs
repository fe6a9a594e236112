//! Chunked transcript promotion and read-back.

use crate::harness::TestWorkspace;
use std::fs;
use trail_core::{parse_trailer, CheckpointId, StepRecord, TrailConfig, CHECKPOINT_TRAILER};

#[test]
fn chunked_transcript_survives_promotion_roundtrip() {
    let ws = TestWorkspace::with_files(&[("a.txt", "base a\n")]);

    // Cap chunks well below the transcript size for the test
    let state_dir = ws.path().join(".git/trail");
    fs::create_dir_all(&state_dir).unwrap();
    let mut config = TrailConfig::default();
    config.storage.chunk_max_bytes = 512;
    config.save(&state_dir).unwrap();

    // A transcript several chunks long
    let transcript_path = ws.path().join(".git/trail/session.jsonl");
    let mut transcript = Vec::new();
    for i in 0..500 {
        transcript.extend_from_slice(format!("{{\"turn\":{},\"ok\":true}}\n", i).as_bytes());
    }
    fs::write(&transcript_path, &transcript).unwrap();

    ws.write_file("a.txt", "agent a\n");
    let step = StepRecord {
        session_id: "2025-01-01-s1".to_string(),
        modified_files: vec!["a.txt".to_string()],
        transcript_path: Some(transcript_path.display().to_string()),
        ..Default::default()
    };
    ws.engine().record_step(&step).unwrap();

    ws.stage("a.txt");
    let (_c1, message) = ws.commit_with_hooks("take agent work");
    let id = CheckpointId::parse(parse_trailer(&message, CHECKPOINT_TRAILER).unwrap()).unwrap();

    let content = ws
        .engine()
        .read_session_content(id, 1)
        .unwrap()
        .expect("session content");
    assert_eq!(content.transcript, transcript);

    let lines = content.transcript.iter().filter(|&&b| b == b'\n').count();
    assert_eq!(lines, 500);
}

#[test]
fn small_transcript_stays_single_blob() {
    let ws = TestWorkspace::with_files(&[("a.txt", "base a\n")]);

    let transcript_path = ws.path().join(".git/trail/session.jsonl");
    fs::create_dir_all(transcript_path.parent().unwrap()).unwrap();
    fs::write(&transcript_path, b"{\"turn\":0}\n").unwrap();

    ws.write_file("a.txt", "agent a\n");
    let step = StepRecord {
        session_id: "2025-01-01-s1".to_string(),
        modified_files: vec!["a.txt".to_string()],
        transcript_path: Some(transcript_path.display().to_string()),
        ..Default::default()
    };
    ws.engine().record_step(&step).unwrap();

    ws.stage("a.txt");
    let (_c1, message) = ws.commit_with_hooks("take agent work");
    let id = CheckpointId::parse(parse_trailer(&message, CHECKPOINT_TRAILER).unwrap()).unwrap();

    let content = ws.engine().read_session_content(id, 1).unwrap().unwrap();
    assert_eq!(content.transcript, b"{\"turn\":0}\n");
}
