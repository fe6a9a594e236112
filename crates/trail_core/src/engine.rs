//! Strategy coordinator: the state machine behind the hook surface.
//!
//! Each hook invocation opens an `Engine`, which re-derives the session
//! directory, configuration, and worktree identity from the working
//! directory it is handed. There is no global state and no daemon; hook
//! calls run to completion sequentially.

use crate::checkpoint_store::{
    CheckpointStore, PromotionRequest, TempCheckpointEntry, TempCheckpoint, TempCheckpointRequest,
    TempCheckpointResult, SessionContent,
};
use crate::chunk::LineSplitter;
use crate::config::TrailConfig;
use crate::error::{Result, TrailError};
use crate::git_store::GitStore;
use crate::ids::{self, CheckpointId};
use crate::message::{self, CHECKPOINT_TRAILER};
use crate::overlap::OverlapAnalyzer;
use crate::session_store::{atomic_write, SessionStore};
use crate::types::{
    CheckpointSummary, PromptAttribution, SessionState, StepRecord, TaskStepRecord,
};
use chrono::Utc;
use git2::Oid;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Strategy used when the user commits manually and overlap promotes the
/// session's shadow work.
pub const STRATEGY_MANUAL_COMMIT: &str = "manual-commit";

/// Where the message being prepared came from, as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitSource {
    /// A plain `-m`/editor message.
    Message,
    /// A commit template.
    Template,
    /// A merge commit; the engine never touches these.
    Merge,
    /// A squash in progress.
    Squash,
    /// An amend of an existing commit.
    Commit,
}

impl CommitSource {
    /// Parses the source string the host hook passes through.
    pub fn parse(source: Option<&str>) -> Self {
        match source {
            Some("merge") => CommitSource::Merge,
            Some("squash") => CommitSource::Squash,
            Some("template") => CommitSource::Template,
            Some("commit") => CommitSource::Commit,
            _ => CommitSource::Message,
        }
    }
}

/// Verdict of `validate_commit_message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageValidation {
    /// The message has user content; the commit proceeds.
    Accepted,
    /// The message was only the engine's trailer; it was stripped and the
    /// host must abort the commit (non-zero hook exit).
    Cleared,
}

/// The checkpoint engine, bound to one worktree for one invocation.
pub struct Engine {
    store: GitStore,
    sessions: SessionStore,
    config: TrailConfig,
    worktree_id: Option<String>,
    worktree_path: String,
    project_suffix: Option<String>,
}

impl Engine {
    /// Opens the engine for the repository containing `path`.
    ///
    /// State (session records, configuration) lives under the per-worktree
    /// git directory, so concurrent checkouts of the same repository never
    /// share records.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let store = GitStore::open(path)?;
        let workdir = store.workdir()?.to_path_buf();
        let worktree_path = workdir.display().to_string();
        let worktree_id = workdir
            .canonicalize()
            .map(|p| p.display().to_string())
            .ok();

        let state_dir = store.git_dir().join("trail");
        let config = TrailConfig::load(&state_dir)?;
        let sessions = SessionStore::new(
            state_dir.join("sessions"),
            config.session.stale_after_days,
        );

        Ok(Self {
            store,
            sessions,
            config,
            worktree_id,
            worktree_path,
            project_suffix: None,
        })
    }

    /// Namespaces the metadata ref for a shared side repository.
    pub fn with_project_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.project_suffix = Some(suffix.into());
        self
    }

    /// Derives the project suffix for this worktree's root.
    pub fn derived_project_suffix(&self) -> Result<String> {
        Ok(ids::project_id(self.store.workdir()?))
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &TrailConfig {
        &self.config
    }

    /// Returns the session store.
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    fn checkpoints(&self) -> CheckpointStore<'_> {
        CheckpointStore::new(&self.store, &self.config, self.project_suffix.as_deref())
    }

    // --- step recording (§ session lifecycle) ---

    /// Records one unit of agent work onto the session's shadow ref.
    ///
    /// The first step of a session creates its record anchored at the
    /// current HEAD. A step after a history rewrite migrates the shadow
    /// ref to the new base before snapshotting.
    pub fn record_step(&self, step: &StepRecord) -> Result<TempCheckpointResult> {
        let subject = step
            .subject
            .clone()
            .unwrap_or_else(|| "Agent step".to_string());
        let path = vec!["sessions".to_string(), step.session_id.clone()];
        self.record_step_at(step, path, &subject)
    }

    /// Records a nested subagent/task step.
    ///
    /// Identical to [`record_step`](Self::record_step) but the metadata
    /// subtree nests under `…/tasks/<toolUseId>` and the subject carries
    /// the task description.
    pub fn record_task_step(&self, task: &TaskStepRecord) -> Result<TempCheckpointResult> {
        let subject = format!("Task step: {}", task.description);
        let path = vec![
            "sessions".to_string(),
            task.step.session_id.clone(),
            "tasks".to_string(),
            task.tool_use_id.clone(),
        ];
        self.record_step_at(&task.step, path, &subject)
    }

    fn record_step_at(
        &self,
        step: &StepRecord,
        metadata_path: Vec<String>,
        subject: &str,
    ) -> Result<TempCheckpointResult> {
        if step.session_id.is_empty() {
            return Err(TrailError::Invalid("step has no session id".into()));
        }
        let head = self.store.head_commit()?;

        let mut session = match self.sessions.load(&step.session_id)? {
            Some(s) => s,
            None => {
                let mut s = SessionState::new(
                    &step.session_id,
                    head.to_string(),
                    self.worktree_id.clone(),
                    &self.worktree_path,
                );
                s.untracked_files_at_start = self.store.untracked_files().unwrap_or_default();
                s
            }
        };

        if session.base_commit != head.to_string() {
            self.migrate_shadow_ref(&mut session, head);
        }

        let trailer_path = format!(
            "{}/{}",
            self.config.refs.metadata_dir,
            metadata_path.join("/")
        );
        let mut tracked: std::collections::BTreeSet<String> =
            session.files_touched.iter().cloned().collect();
        tracked.extend(step.modified_files.iter().cloned());
        tracked.extend(step.new_files.iter().cloned());
        let request = TempCheckpointRequest {
            session_id: &session.session_id,
            base_commit: head,
            worktree_id: session.worktree_id.as_deref(),
            modified_files: &step.modified_files,
            new_files: &step.new_files,
            deleted_files: &step.deleted_files,
            tracked_files: tracked.into_iter().collect(),
            metadata_path,
            message: message::build_step_message(
                subject,
                &trailer_path,
                &session.session_id,
                STRATEGY_MANUAL_COMMIT,
            ),
        };
        let result = self.checkpoints().write_temporary(&request)?;

        if !result.skipped {
            session.step_count += 1;
            session.merge_files(step.touched_paths());
            if let Some(usage) = &step.token_usage {
                session.token_usage.fold(usage);
            }
            if session.step_count == 1 {
                session.transcript_identifier_at_start = step.transcript_identifier.clone();
            }
            if session.first_prompt.is_none() {
                session.first_prompt = step.prompt.clone();
            }
            if let Some(prompt) = &step.prompt {
                session.prompt_attributions.push(PromptAttribution {
                    prompt: prompt.clone(),
                    recorded_at: Utc::now(),
                });
            }
            if step.transcript_path.is_some() {
                session.transcript_path = step.transcript_path.clone();
            }
            if session.agent.is_none() {
                session.agent = step.agent.clone();
            }
        }

        self.sessions.save(&session)?;
        Ok(result)
    }

    /// Re-homes the session's shadow ref after a history rewrite moved the
    /// active tip (rebase, amend, pull). Best-effort: a rename collision
    /// or an already-gone ref only updates the recorded base.
    fn migrate_shadow_ref(&self, session: &mut SessionState, head: Oid) {
        let namespace = &self.config.refs.namespace;
        let worktree = session.worktree_id.as_deref();
        if let Ok(old_base) = Oid::from_str(&session.base_commit) {
            let old_name = ids::shadow_ref_name(namespace, old_base, worktree);
            let new_name = ids::shadow_ref_name(namespace, head, worktree);
            if old_name != new_name {
                match self.store.resolve_ref(&old_name) {
                    Ok(Some(_)) => {
                        if let Err(e) = self.store.rename_ref(&old_name, &new_name) {
                            warn!(
                                session_id = %session.session_id,
                                error = %e,
                                "shadow ref migration failed, keeping new base only"
                            );
                        }
                    }
                    Ok(None) => {
                        debug!(session_id = %session.session_id, "no shadow ref to migrate");
                    }
                    Err(e) => {
                        warn!(session_id = %session.session_id, error = %e, "shadow ref lookup failed");
                    }
                }
            }
        }
        session.base_commit = head.to_string();
    }

    // --- commit-message hooks ---

    /// Injects a checkpoint trailer while the user authors a commit.
    ///
    /// No-op for merges, for messages that already carry a trailer (amend
    /// idempotence), and when no session's staged work overlaps. On an
    /// amend, `ref_hint` names the commit being amended; a trailer carried
    /// by that commit but missing from the message file is re-injected.
    /// Trailer injection failures are non-fatal to the host commit.
    pub fn prepare_commit_message(
        &self,
        message_file: &Path,
        source: CommitSource,
        ref_hint: Option<&str>,
    ) -> Result<()> {
        if source == CommitSource::Merge {
            return Ok(());
        }
        let original = fs::read_to_string(message_file)?;
        if message::parse_trailer(&original, CHECKPOINT_TRAILER).is_some() {
            return Ok(());
        }

        if source == CommitSource::Commit {
            if let Some(previous) = self.amended_trailer(ref_hint)? {
                let updated = message::inject_trailer(&original, CHECKPOINT_TRAILER, &previous);
                atomic_write(message_file, updated.as_bytes())?;
                return Ok(());
            }
        }

        let head = match self.store.head_commit() {
            Ok(h) => h,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        let checkpoints = self.checkpoints();
        let analyzer = OverlapAnalyzer::new(&self.store);
        for mut session in self.sessions.list()? {
            if session.base_commit != head.to_string()
                || session.step_count == 0
                || session.files_touched.is_empty()
            {
                continue;
            }
            let shadow_name =
                checkpoints.shadow_ref_for(head, session.worktree_id.as_deref());
            let Some(shadow_tip) = self.store.resolve_ref(&shadow_name)? else {
                continue;
            };
            if !analyzer.staged_overlap(&session.files_touched, shadow_tip)? {
                continue;
            }

            let id = self.reusable_checkpoint_id(&checkpoints, &session)?;
            let updated = message::inject_trailer(&original, CHECKPOINT_TRAILER, &id.as_hex());
            atomic_write(message_file, updated.as_bytes())?;

            if session.last_checkpoint_id != Some(id) {
                session.last_checkpoint_id = Some(id);
                self.sessions.save(&session)?;
            }
            break;
        }
        Ok(())
    }

    /// The checkpoint trailer of the commit being amended, if any.
    fn amended_trailer(&self, ref_hint: Option<&str>) -> Result<Option<String>> {
        let Some(hint) = ref_hint else {
            return Ok(None);
        };
        let Some(commit) = self.store.resolve_revspec(hint)? else {
            return Ok(None);
        };
        let msg = self.store.commit_message(commit)?;
        Ok(message::parse_trailer(&msg, CHECKPOINT_TRAILER).map(str::to_string))
    }

    /// A pending id from an aborted commit attempt is reused; an id that
    /// already names a committed checkpoint must not be, or the promotion
    /// would overwrite it.
    fn reusable_checkpoint_id(
        &self,
        checkpoints: &CheckpointStore<'_>,
        session: &SessionState,
    ) -> Result<CheckpointId> {
        if let Some(last) = session.last_checkpoint_id {
            if checkpoints.read_committed(last)?.is_none() {
                return Ok(last);
            }
        }
        Ok(CheckpointId::generate())
    }

    /// Strips the engine trailer from an otherwise-empty message.
    ///
    /// Returns [`MessageValidation::Cleared`] when it did; the host hook
    /// must then exit non-zero so the underlying VCS aborts the empty
    /// commit instead of committing a trailer-only message.
    pub fn validate_commit_message(&self, message_file: &Path) -> Result<MessageValidation> {
        let original = fs::read_to_string(message_file)?;
        if message::parse_trailer(&original, CHECKPOINT_TRAILER).is_none() {
            return Ok(MessageValidation::Accepted);
        }
        if message::has_user_content(&original) {
            return Ok(MessageValidation::Accepted);
        }
        let stripped = message::strip_engine_trailers(&original);
        atomic_write(message_file, stripped.as_bytes())?;
        Ok(MessageValidation::Cleared)
    }

    // --- post-commit promotion ---

    /// Promotes overlapping sessions after the user committed.
    ///
    /// For every session based on the new commit's parent whose shadow
    /// content was actually committed: write a committed checkpoint, then
    /// either delete the shadow ref (nothing left) or carry the remainder
    /// forward onto the new HEAD. A failed promotion still carries the
    /// remainder so no agent work is lost.
    pub fn post_commit(&self) -> Result<()> {
        let head = match self.store.head_commit() {
            Ok(h) => h,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        let head_message = self.store.commit_message(head)?;
        let Some(id_str) = message::parse_trailer(&head_message, CHECKPOINT_TRAILER) else {
            return Ok(());
        };
        let checkpoint_id = match CheckpointId::parse(id_str) {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "commit carries a malformed checkpoint trailer");
                return Ok(());
            }
        };
        let Some(parent) = self.store.commit_parent(head)? else {
            return Ok(());
        };
        let committed_files: Vec<String> = self
            .store
            .diff_name_status(Some(parent), head)?
            .into_iter()
            .map(|d| d.path)
            .collect();

        let checkpoints = self.checkpoints();
        let analyzer = OverlapAnalyzer::new(&self.store);

        for mut session in self.sessions.list()? {
            if session.base_commit != parent.to_string()
                || session.step_count == 0
                || session.files_touched.is_empty()
            {
                continue;
            }
            let shadow_name =
                checkpoints.shadow_ref_for(parent, session.worktree_id.as_deref());
            let Some(shadow_tip) = self.store.resolve_ref(&shadow_name)? else {
                continue;
            };
            let matching =
                analyzer.committed_overlap(head, Some(parent), &session.files_touched, shadow_tip)?;
            if matching.is_empty() {
                continue;
            }

            if let Err(e) =
                self.promote_session(&checkpoints, &session, checkpoint_id, &committed_files)
            {
                warn!(
                    session_id = %session.session_id,
                    checkpoint = %checkpoint_id,
                    error = %e,
                    "promotion failed, carrying forward anyway"
                );
            }

            let remaining =
                analyzer.remaining_work(&session.files_touched, shadow_tip, head)?;
            if remaining.is_empty() {
                if let Err(e) = self.store.delete_ref(&shadow_name) {
                    debug!(error = %e, "shadow ref delete failed, leaving orphan");
                }
                session.rebase(head.to_string(), Vec::new());
            } else {
                let carry_message = message::build_step_message(
                    "Carry forward agent work",
                    &format!(
                        "{}/sessions/{}",
                        self.config.refs.metadata_dir, session.session_id
                    ),
                    &session.session_id,
                    STRATEGY_MANUAL_COMMIT,
                );
                if let Err(e) = checkpoints.write_carry_forward(
                    &session.session_id,
                    &shadow_name,
                    shadow_tip,
                    head,
                    session.worktree_id.as_deref(),
                    &remaining,
                    &carry_message,
                ) {
                    warn!(
                        session_id = %session.session_id,
                        error = %e,
                        "carry-forward write failed"
                    );
                }
                session.rebase(head.to_string(), remaining);
            }
            session.last_checkpoint_id = Some(checkpoint_id);
            self.sessions.save(&session)?;
        }
        Ok(())
    }

    fn promote_session(
        &self,
        checkpoints: &CheckpointStore<'_>,
        session: &SessionState,
        checkpoint_id: CheckpointId,
        committed_files: &[String],
    ) -> Result<()> {
        let transcript = session
            .transcript_path
            .as_ref()
            .and_then(|p| fs::read(p).ok())
            .unwrap_or_default();
        let prompts: Vec<String> = session
            .prompt_attributions
            .iter()
            .map(|p| p.prompt.clone())
            .collect();
        let context = build_context(session);
        let files_touched: Vec<String> = session
            .files_touched
            .iter()
            .filter(|f| committed_files.contains(f))
            .cloned()
            .collect();

        let request = PromotionRequest {
            checkpoint_id,
            session_id: &session.session_id,
            strategy: STRATEGY_MANUAL_COMMIT,
            branch: self.store.head_branch(),
            transcript: &transcript,
            prompts: &prompts,
            context: context.as_bytes(),
            files_touched,
            checkpoints_count: session.step_count,
            agent: session.agent.clone(),
            turn_id: None,
            transcript_identifier_at_start: session.transcript_identifier_at_start.clone(),
            checkpoint_transcript_start: 0,
            token_usage: session.token_usage,
            summary: None,
            initial_attribution: Some(session.attribution_base_commit.clone()),
        };
        checkpoints.write_committed(&request, &LineSplitter)?;
        Ok(())
    }

    // --- push ---

    /// Pushes the metadata ref alongside the user's own push.
    ///
    /// Failure never blocks the user's push.
    pub fn pre_push(&self, remote: &str) -> Result<()> {
        let metadata_ref = self.checkpoints().metadata_ref().to_string();
        if self.store.resolve_ref(&metadata_ref)?.is_some() {
            if let Err(e) = self.store.push_ref(
                remote,
                &metadata_ref,
                self.config.storage.push_timeout_secs,
            ) {
                warn!(remote, error = %e, "metadata ref push failed");
            }
        }
        Ok(())
    }

    // --- readers ---

    /// Lists committed checkpoints, newest first.
    pub fn list_committed(&self, limit: usize) -> Result<Vec<CheckpointSummary>> {
        self.checkpoints().list_committed(limit)
    }

    /// Reads a committed checkpoint's summary.
    pub fn read_committed(&self, id: CheckpointId) -> Result<Option<CheckpointSummary>> {
        self.checkpoints().read_committed(id)
    }

    /// Reads the content of one session of a committed checkpoint.
    pub fn read_session_content(
        &self,
        id: CheckpointId,
        session_index: u32,
    ) -> Result<Option<SessionContent>> {
        self.checkpoints().read_session_content(id, session_index)
    }

    /// Enumerates all shadow refs.
    pub fn list_temporary(&self) -> Result<Vec<TempCheckpointEntry>> {
        self.checkpoints().list_temporary()
    }

    /// Resolves the temporary checkpoint for a (base, worktree) pair.
    pub fn read_temporary(
        &self,
        base_commit: Oid,
        worktree_id: Option<&str>,
    ) -> Result<Option<TempCheckpoint>> {
        self.checkpoints().read_temporary(base_commit, worktree_id)
    }

    /// Shadow refs whose base no live session references; the data the
    /// cleanup collaborator consumes.
    pub fn orphaned_shadow_refs(&self) -> Result<Vec<TempCheckpointEntry>> {
        let sessions = self.sessions.list()?;
        Ok(self
            .checkpoints()
            .list_temporary()?
            .into_iter()
            .filter(|entry| {
                !sessions
                    .iter()
                    .any(|s| s.base_commit.starts_with(&entry.base_prefix))
            })
            .collect())
    }

    /// Active sessions older than `threshold` that never recorded a step;
    /// the data the doctor collaborator reports.
    pub fn stuck_sessions(&self, threshold: chrono::Duration) -> Result<Vec<SessionState>> {
        let now = Utc::now();
        Ok(self
            .sessions
            .list()?
            .into_iter()
            .filter(|s| {
                s.phase == crate::types::SessionPhase::Active
                    && s.step_count == 0
                    && now - s.started_at > threshold
            })
            .collect())
    }

    /// Marks a session ended; its record is swept after the stale window.
    pub fn end_session(&self, session_id: &str) -> Result<()> {
        self.sessions.end_session(session_id)
    }
}

/// Derives the `context.md` prose stored with a promoted checkpoint.
fn build_context(session: &SessionState) -> String {
    let mut out = String::new();
    if let Some(prompt) = &session.first_prompt {
        let _ = writeln!(out, "Task: {}\n", prompt);
    }
    let _ = writeln!(out, "Steps recorded: {}", session.step_count);
    if !session.files_touched.is_empty() {
        let _ = writeln!(out, "\nFiles touched:");
        for path in &session.files_touched {
            let _ = writeln!(out, "- {}", path);
        }
    }
    if !session.token_usage.is_empty() {
        let usage = &session.token_usage;
        let _ = writeln!(
            out,
            "\nTokens: {} in / {} out ({} cached)",
            usage.input_tokens, usage.output_tokens, usage.cache_read_tokens
        );
    }
    out
}
