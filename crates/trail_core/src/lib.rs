//! Trail Core Library
//!
//! A checkpoint engine for AI coding-agent sessions, providing:
//! - Shadow-ref snapshots of mid-session agent work
//! - Overlap detection between user commits and tracked agent changes
//! - Durable, shard-addressed committed checkpoints on a metadata ref
//! - Carry-forward of uncommitted agent work across user commits and
//!   history rewrites
//!
//! Everything lives inside the user's own git repository: shadow refs and
//! the metadata ref are ordinary refs built from ordinary blobs, trees,
//! and commits, so the record travels with the repository and survives
//! clones. The engine never touches the user's active ref.
//!
//! # Quick Start
//!
//! ```no_run
//! use trail_core::{Engine, StepRecord};
//!
//! let engine = Engine::open(".").unwrap();
//!
//! // An agent adapter reports one turn of work
//! let step = StepRecord {
//!     session_id: trail_core::new_session_id(),
//!     modified_files: vec!["src/main.rs".into()],
//!     prompt: Some("add retry logic".into()),
//!     ..Default::default()
//! };
//! engine.record_step(&step).unwrap();
//! ```
//!
//! # Hook flow
//!
//! The host VCS hooks drive the state machine: `record_step` on each
//! agent turn, `prepare_commit_message` / `validate_commit_message`
//! while the user authors a commit, `post_commit` to promote overlapping
//! work into a committed checkpoint, and `pre_push` to replicate the
//! metadata ref.

mod checkpoint_store;
mod chunk;
mod config;
mod engine;
mod error;
mod git_store;
mod ids;
mod message;
mod overlap;
mod session_store;
mod types;

pub use checkpoint_store::{
    CheckpointStore, PromotionRequest, SessionContent, TempCheckpoint, TempCheckpointEntry,
    TempCheckpointRequest, TempCheckpointResult,
};
pub use chunk::{chunk_name, reassemble, LineSplitter, TranscriptSplitter};
pub use config::{
    RefConfig, SessionConfig, StorageConfig, TrailConfig, DEFAULT_METADATA_DIR,
    DEFAULT_REF_NAMESPACE,
};
pub use engine::{
    CommitSource, Engine, MessageValidation, STRATEGY_MANUAL_COMMIT,
};
pub use error::{Result, TrailError};
pub use git_store::{DiffEntry, DiffStatus, EntryKind, GitStore, TreeEntryInfo};
pub use ids::{
    is_shadow_ref, new_session_id, project_id, shadow_ref_base, shadow_ref_name, CheckpointId,
};
pub use message::{
    build_step_message, has_user_content, inject_trailer, parse_trailer, strip_engine_trailers,
    CHECKPOINT_TRAILER, METADATA_TRAILER, SESSION_TRAILER, STRATEGY_TRAILER,
};
pub use overlap::OverlapAnalyzer;
pub use session_store::{atomic_write, SessionStore};
pub use types::{
    CheckpointSummary, CommittedMetadata, PromptAttribution, SessionPhase, SessionState,
    ShadowCheckpoint, StepRecord, TaskStepRecord, TokenUsage,
};
