//! Core data types for the checkpoint engine.

use crate::ids::CheckpointId;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Session lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    /// Agent is actively producing steps.
    #[default]
    Active,
    /// Session exists but no agent turn is in flight.
    Idle,
    /// Session ended; record is swept after the stale threshold.
    Ended,
}

/// Accumulated token spend for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    /// Prompt tokens consumed.
    #[serde(default, alias = "input_tokens")]
    pub input_tokens: u64,
    /// Completion tokens produced.
    #[serde(default, alias = "output_tokens")]
    pub output_tokens: u64,
    /// Tokens served from prompt cache.
    #[serde(default, alias = "cache_read_tokens")]
    pub cache_read_tokens: u64,
    /// Tokens written to prompt cache.
    #[serde(default, alias = "cache_creation_tokens")]
    pub cache_creation_tokens: u64,
}

impl TokenUsage {
    /// Folds another usage sample into this accumulator.
    pub fn fold(&mut self, other: &TokenUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.cache_read_tokens = self.cache_read_tokens.saturating_add(other.cache_read_tokens);
        self.cache_creation_tokens = self
            .cache_creation_tokens
            .saturating_add(other.cache_creation_tokens);
    }

    /// True when every counter is zero.
    pub fn is_empty(&self) -> bool {
        *self == TokenUsage::default()
    }
}

/// One user prompt recorded during a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptAttribution {
    /// The prompt text as submitted.
    pub prompt: String,
    /// When the prompt was recorded.
    #[serde(default = "epoch", alias = "recorded_at")]
    pub recorded_at: DateTime<Utc>,
}

/// Durable per-session state record.
///
/// Persisted as `<sessionId>.json` in the per-worktree state directory.
/// Field names are camelCase on disk; snake_case is accepted on load so
/// records written by other implementations keep working.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    /// Date-prefixed session UUID.
    #[serde(alias = "session_id")]
    pub session_id: String,

    /// Current promotion base (full commit hex).
    #[serde(default, alias = "base_commit")]
    pub base_commit: String,

    /// The base commit when the session first started.
    #[serde(default, alias = "attribution_base_commit")]
    pub attribution_base_commit: String,

    /// Opaque identity of the physical working directory.
    #[serde(default, alias = "worktree_id")]
    pub worktree_id: Option<String>,

    /// Root path of the worktree when the session started.
    #[serde(default, alias = "worktree_path")]
    pub worktree_path: String,

    /// When the session started.
    #[serde(default = "epoch", alias = "started_at")]
    pub started_at: DateTime<Utc>,

    /// When the session ended, if it has.
    #[serde(default, alias = "ended_at")]
    pub ended_at: Option<DateTime<Utc>>,

    /// Lifecycle phase.
    #[serde(default)]
    pub phase: SessionPhase,

    /// Number of recorded (non-skipped) steps since the last promotion.
    #[serde(default, alias = "step_count")]
    pub step_count: u32,

    /// Sorted unique set of paths the agent has touched since the last
    /// promotion.
    #[serde(default, alias = "files_touched")]
    pub files_touched: Vec<String>,

    /// Untracked paths present when the session started.
    #[serde(default, alias = "untracked_files_at_start")]
    pub untracked_files_at_start: Vec<String>,

    /// Most recently issued checkpoint id for this session.
    #[serde(default, alias = "last_checkpoint_id")]
    pub last_checkpoint_id: Option<CheckpointId>,

    /// The first user prompt of the session.
    #[serde(default, alias = "first_prompt")]
    pub first_prompt: Option<String>,

    /// Prompts recorded since the last promotion.
    #[serde(default, alias = "prompt_attributions")]
    pub prompt_attributions: Vec<PromptAttribution>,

    /// Accumulated token spend.
    #[serde(default, alias = "token_usage")]
    pub token_usage: TokenUsage,

    /// Transcript identifier captured on the first step.
    #[serde(default, alias = "transcript_identifier_at_start")]
    pub transcript_identifier_at_start: Option<String>,

    /// Filesystem path of the live transcript, if the adapter supplied one.
    #[serde(default, alias = "transcript_path")]
    pub transcript_path: Option<String>,

    /// Agent name reported on the first step.
    #[serde(default)]
    pub agent: Option<String>,
}

impl SessionState {
    /// Creates a fresh session record anchored at `base_commit`.
    pub fn new(
        session_id: impl Into<String>,
        base_commit: impl Into<String>,
        worktree_id: Option<String>,
        worktree_path: impl Into<String>,
    ) -> Self {
        let base_commit = base_commit.into();
        Self {
            session_id: session_id.into(),
            attribution_base_commit: base_commit.clone(),
            base_commit,
            worktree_id,
            worktree_path: worktree_path.into(),
            started_at: Utc::now(),
            ended_at: None,
            phase: SessionPhase::Active,
            step_count: 0,
            files_touched: Vec::new(),
            untracked_files_at_start: Vec::new(),
            last_checkpoint_id: None,
            first_prompt: None,
            prompt_attributions: Vec::new(),
            token_usage: TokenUsage::default(),
            transcript_identifier_at_start: None,
            transcript_path: None,
            agent: None,
        }
    }

    /// Merges a step's file lists into `files_touched`, keeping the set
    /// sorted and unique.
    pub fn merge_files<'a>(&mut self, paths: impl IntoIterator<Item = &'a str>) {
        for p in paths {
            if let Err(pos) = self.files_touched.binary_search_by(|f| f.as_str().cmp(p)) {
                self.files_touched.insert(pos, p.to_string());
            }
        }
    }

    /// Resets per-promotion counters after a full or partial promotion.
    pub fn rebase(&mut self, new_base: impl Into<String>, remaining: Vec<String>) {
        self.base_commit = new_base.into();
        self.files_touched = remaining;
        self.step_count = 0;
        self.prompt_attributions.clear();
        self.token_usage = TokenUsage::default();
    }
}

/// One unit of agent work reported to the engine.
#[derive(Debug, Clone, Default)]
pub struct StepRecord {
    /// Session this step belongs to.
    pub session_id: String,
    /// Subject line for the shadow commit (e.g. a turn description).
    pub subject: Option<String>,
    /// Paths modified during the step.
    pub modified_files: Vec<String>,
    /// Paths created during the step.
    pub new_files: Vec<String>,
    /// Paths deleted during the step.
    pub deleted_files: Vec<String>,
    /// The user prompt that produced this step, if any.
    pub prompt: Option<String>,
    /// Token spend for this step.
    pub token_usage: Option<TokenUsage>,
    /// Filesystem path of the live transcript.
    pub transcript_path: Option<String>,
    /// Transcript identifier at the time of this step.
    pub transcript_identifier: Option<String>,
    /// Agent name (e.g. "claude-code").
    pub agent: Option<String>,
}

impl StepRecord {
    /// All paths this step touched, in list order.
    pub fn touched_paths(&self) -> impl Iterator<Item = &str> {
        self.modified_files
            .iter()
            .chain(self.new_files.iter())
            .chain(self.deleted_files.iter())
            .map(String::as_str)
    }
}

/// A step produced by a nested subagent/task tool invocation.
#[derive(Debug, Clone)]
pub struct TaskStepRecord {
    /// The underlying step.
    pub step: StepRecord,
    /// Tool-use id of the task invocation.
    pub tool_use_id: String,
    /// Human-readable task description, used in the commit subject.
    pub description: String,
}

/// Metadata blob written into a shadow-ref commit's grafted subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShadowCheckpoint {
    /// Session the checkpoint belongs to.
    #[serde(alias = "session_id")]
    pub session_id: String,
    /// Base commit at the time of the step.
    #[serde(alias = "base_commit")]
    pub base_commit: String,
    /// When the step was recorded.
    #[serde(default = "epoch")]
    pub timestamp: DateTime<Utc>,
    /// Paths modified during the step.
    #[serde(default, alias = "modified_files")]
    pub modified_files: Vec<String>,
    /// Paths created during the step.
    #[serde(default, alias = "new_files")]
    pub new_files: Vec<String>,
    /// Paths deleted during the step.
    #[serde(default, alias = "deleted_files")]
    pub deleted_files: Vec<String>,
}

/// Summary stored at `<shard>/<rest>/metadata.json` on the metadata ref.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointSummary {
    /// The checkpoint id.
    pub id: CheckpointId,
    /// When the checkpoint was promoted.
    #[serde(default = "epoch", alias = "created_at")]
    pub created_at: DateTime<Utc>,
    /// Strategy that produced the checkpoint.
    #[serde(default)]
    pub strategy: String,
    /// Branch the user committed on, if known.
    #[serde(default)]
    pub branch: Option<String>,
    /// Paths the promotion actually covered.
    #[serde(default, alias = "files_touched")]
    pub files_touched: Vec<String>,
    /// Number of temporary checkpoints that fed this promotion.
    #[serde(default, alias = "checkpoints_count")]
    pub checkpoints_count: u32,
    /// Number of participating sessions.
    #[serde(default)]
    pub sessions: u32,
}

/// Per-session metadata stored under `<shard>/<rest>/<index>/metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommittedMetadata {
    /// The session id.
    #[serde(alias = "session_id")]
    pub session_id: String,
    /// Agent name.
    #[serde(default)]
    pub agent: Option<String>,
    /// Tool-use id when the checkpoint came from a task step.
    #[serde(default, alias = "turn_id")]
    pub turn_id: Option<String>,
    /// Token spend covered by this checkpoint.
    #[serde(default, alias = "token_usage")]
    pub token_usage: TokenUsage,
    /// Transcript identifier at session start.
    #[serde(default, alias = "transcript_identifier_at_start")]
    pub transcript_identifier_at_start: Option<String>,
    /// Byte offset into the transcript where this checkpoint starts.
    #[serde(default, alias = "checkpoint_transcript_start")]
    pub checkpoint_transcript_start: u64,
    /// The session's original base commit.
    #[serde(default, alias = "initial_attribution")]
    pub initial_attribution: Option<String>,
    /// Optional prose summary.
    #[serde(default)]
    pub summary: Option<String>,
}

pub(crate) fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).unwrap()
}
