//! Temporary and committed checkpoint storage.
//!
//! Temporary checkpoints are commits on shadow refs: a snapshot of the
//! agent's working-tree state with a metadata subtree grafted in.
//! Committed checkpoints are immutable sharded subtrees appended to the
//! metadata ref when the user commits overlapping work.

use crate::chunk::{chunk_name, reassemble, TranscriptSplitter};
use crate::config::TrailConfig;
use crate::error::{Result, TrailError};
use crate::git_store::{EntryKind, GitStore, TreeEntryInfo};
use crate::ids::{self, CheckpointId};
use crate::message::{self, SESSION_TRAILER};
use crate::types::{CheckpointSummary, CommittedMetadata, ShadowCheckpoint, TokenUsage};
use chrono::Utc;
use git2::Oid;

/// Separator between prompts in `prompt.txt`.
const PROMPT_SEPARATOR: &str = "\n---\n";

/// Request to write a temporary checkpoint onto a shadow ref.
#[derive(Debug)]
pub struct TempCheckpointRequest<'a> {
    /// Session the step belongs to.
    pub session_id: &'a str,
    /// The session's current base commit.
    pub base_commit: Oid,
    /// Worktree identity, if known.
    pub worktree_id: Option<&'a str>,
    /// Paths modified during the step.
    pub modified_files: &'a [String],
    /// Paths created during the step.
    pub new_files: &'a [String],
    /// Paths deleted during the step.
    pub deleted_files: &'a [String],
    /// Every path the session tracks, including earlier steps' work.
    ///
    /// The snapshot reads these from the working tree so a step touching
    /// only one file never reverts the others to base content. A tracked
    /// path missing from disk is treated as deleted.
    pub tracked_files: Vec<String>,
    /// In-tree metadata path components below the metadata root, e.g.
    /// `["sessions", "<id>"]` or `["sessions", "<id>", "tasks", "<tool>"]`.
    pub metadata_path: Vec<String>,
    /// Full commit message (subject plus trailers), supplied by the caller.
    pub message: String,
}

/// Result of a temporary checkpoint write.
#[derive(Debug, Clone)]
pub struct TempCheckpointResult {
    /// The shadow tip after the call.
    pub commit_id: Oid,
    /// True when the candidate tree equaled the shadow tip (nothing written).
    pub skipped: bool,
    /// The shadow ref that was targeted.
    pub ref_name: String,
}

/// A resolved temporary checkpoint.
#[derive(Debug, Clone)]
pub struct TempCheckpoint {
    /// Full shadow ref name.
    pub ref_name: String,
    /// Tip commit of the shadow ref.
    pub commit_id: Oid,
    /// Tree of the tip commit.
    pub tree_id: Oid,
    /// Session id parsed from the tip's trailer, if present.
    pub session_id: Option<String>,
}

/// A shadow ref discovered by enumeration.
#[derive(Debug, Clone)]
pub struct TempCheckpointEntry {
    /// Full shadow ref name.
    pub ref_name: String,
    /// Abbreviated base-commit prefix parsed from the name.
    pub base_prefix: String,
    /// Tip commit of the shadow ref.
    pub commit_id: Oid,
    /// Session id parsed from the tip's trailer, if present.
    pub session_id: Option<String>,
}

/// Request to promote session data to a committed checkpoint.
#[derive(Debug)]
pub struct PromotionRequest<'a> {
    /// The id the checkpoint will live under forever.
    pub checkpoint_id: CheckpointId,
    /// Session being promoted.
    pub session_id: &'a str,
    /// Strategy that drove the promotion.
    pub strategy: &'a str,
    /// Branch the user committed on, if known.
    pub branch: Option<String>,
    /// Transcript bytes (chunked transparently above the cap).
    pub transcript: &'a [u8],
    /// User prompts, joined with `\n---\n` on storage.
    pub prompts: &'a [String],
    /// Derived context prose.
    pub context: &'a [u8],
    /// Paths the promotion covers.
    pub files_touched: Vec<String>,
    /// Number of temporary checkpoints that fed this promotion.
    pub checkpoints_count: u32,
    /// Agent name.
    pub agent: Option<String>,
    /// Tool-use id for task-step promotions.
    pub turn_id: Option<String>,
    /// Transcript identifier at session start.
    pub transcript_identifier_at_start: Option<String>,
    /// Byte offset into the transcript where this checkpoint starts.
    pub checkpoint_transcript_start: u64,
    /// Token spend covered by this checkpoint.
    pub token_usage: TokenUsage,
    /// Optional prose summary.
    pub summary: Option<String>,
    /// The session's original base commit.
    pub initial_attribution: Option<String>,
}

/// Content of one session subtree of a committed checkpoint.
#[derive(Debug, Clone)]
pub struct SessionContent {
    /// Per-session metadata.
    pub metadata: CommittedMetadata,
    /// Reassembled transcript bytes.
    pub transcript: Vec<u8>,
    /// Prompts as stored (joined with `\n---\n`).
    pub prompts: String,
    /// Derived context prose.
    pub context: Vec<u8>,
}

/// Checkpoint reader/writer bound to one repository.
pub struct CheckpointStore<'a> {
    store: &'a GitStore,
    namespace: String,
    metadata_ref: String,
    metadata_dir: String,
    chunk_max_bytes: usize,
    author_name: String,
    author_email: String,
}

impl<'a> CheckpointStore<'a> {
    /// Creates a checkpoint store from engine configuration.
    ///
    /// `project_suffix` namespaces the metadata ref when checkpoints live
    /// in a repository shared by several projects.
    pub fn new(store: &'a GitStore, config: &TrailConfig, project_suffix: Option<&str>) -> Self {
        Self {
            store,
            namespace: config.refs.namespace.clone(),
            metadata_ref: config.metadata_ref(project_suffix),
            metadata_dir: config.refs.metadata_dir.clone(),
            chunk_max_bytes: config.storage.chunk_max_bytes,
            author_name: config.storage.author_name.clone(),
            author_email: config.storage.author_email.clone(),
        }
    }

    /// The fully-qualified metadata ref this store appends to.
    pub fn metadata_ref(&self) -> &str {
        &self.metadata_ref
    }

    /// The shadow ref a step for (base, worktree) would target.
    pub fn shadow_ref_for(&self, base_commit: Oid, worktree_id: Option<&str>) -> String {
        ids::shadow_ref_name(&self.namespace, base_commit, worktree_id)
    }

    // --- temporary checkpoints ---

    /// Writes a temporary checkpoint, deduplicating against the shadow tip.
    pub fn write_temporary(&self, req: &TempCheckpointRequest<'_>) -> Result<TempCheckpointResult> {
        let ref_name = self.shadow_ref_for(req.base_commit, req.worktree_id);
        let tip = self.store.resolve_ref(&ref_name)?;

        let content_tree = self
            .store
            .snapshot_tree(&req.tracked_files, req.deleted_files)?;

        if let Some(tip) = tip {
            let tip_tree = self.store.commit_tree_id(tip)?;
            let tip_content = self.store.tree_without_entry(tip_tree, &self.metadata_dir)?;
            if tip_content == content_tree {
                return Ok(TempCheckpointResult {
                    commit_id: tip,
                    skipped: true,
                    ref_name,
                });
            }
        }

        let shadow = ShadowCheckpoint {
            session_id: req.session_id.to_string(),
            base_commit: req.base_commit.to_string(),
            timestamp: Utc::now(),
            modified_files: req.modified_files.to_vec(),
            new_files: req.new_files.to_vec(),
            deleted_files: req.deleted_files.to_vec(),
        };
        let metadata_tree = self.build_metadata_subtree(&req.metadata_path, &shadow)?;
        let grafted = self.store.tree_with_entry(
            Some(content_tree),
            &self.metadata_dir,
            metadata_tree,
            EntryKind::Tree,
        )?;

        let parent = tip.unwrap_or(req.base_commit);
        let commit_id = self.store.create_commit(
            grafted,
            &[parent],
            &req.message,
            &self.author_name,
            &self.author_email,
        )?;

        self.store.update_ref_cas(&ref_name, commit_id, tip)?;

        Ok(TempCheckpointResult {
            commit_id,
            skipped: false,
            ref_name,
        })
    }

    /// Resolves the temporary checkpoint for (base, worktree), if any.
    pub fn read_temporary(
        &self,
        base_commit: Oid,
        worktree_id: Option<&str>,
    ) -> Result<Option<TempCheckpoint>> {
        let ref_name = self.shadow_ref_for(base_commit, worktree_id);
        let Some(commit_id) = self.store.resolve_ref(&ref_name)? else {
            return Ok(None);
        };
        let tree_id = self.store.commit_tree_id(commit_id)?;
        let msg = self.store.commit_message(commit_id)?;
        Ok(Some(TempCheckpoint {
            ref_name,
            commit_id,
            tree_id,
            session_id: message::parse_trailer(&msg, SESSION_TRAILER).map(str::to_string),
        }))
    }

    /// Enumerates all shadow refs with the data the cleanup machinery needs.
    pub fn list_temporary(&self) -> Result<Vec<TempCheckpointEntry>> {
        let mut out = Vec::new();
        for (name, commit_id) in self.store.list_refs(&self.namespace)? {
            if !ids::is_shadow_ref(&name, &self.namespace, &self.metadata_ref) {
                continue;
            }
            let Some(base_prefix) = ids::shadow_ref_base(&name, &self.namespace) else {
                continue;
            };
            let session_id = self
                .store
                .commit_message(commit_id)
                .ok()
                .and_then(|m| message::parse_trailer(&m, SESSION_TRAILER).map(str::to_string));
            out.push(TempCheckpointEntry {
                ref_name: name,
                base_prefix,
                commit_id,
                session_id,
            });
        }
        Ok(out)
    }

    /// Re-anchors remaining agent work onto a new base after a partial
    /// promotion.
    ///
    /// Builds a snapshot of the new base overlaid with the old shadow
    /// tip's content at `remaining` paths (an absence in the old tip means
    /// the agent had deleted the path), grafts a fresh metadata subtree,
    /// commits it with the new base as parent, creates the new shadow ref,
    /// and deletes the old one. Failure to delete the old ref is ignored;
    /// cleanup tooling removes orphans later.
    pub fn write_carry_forward(
        &self,
        session_id: &str,
        old_ref: &str,
        old_tip: Oid,
        new_base: Oid,
        worktree_id: Option<&str>,
        remaining: &[String],
        message: &str,
    ) -> Result<TempCheckpointResult> {
        let old_tree = self.store.commit_tree_id(old_tip)?;
        let mut overlays = Vec::with_capacity(remaining.len());
        let mut kept = Vec::new();
        let mut dropped = Vec::new();
        for path in remaining {
            match self.store.entry_at_path(old_tree, path)? {
                Some((blob, EntryKind::Blob)) => {
                    overlays.push((path.clone(), Some(blob)));
                    kept.push(path.clone());
                }
                _ => {
                    overlays.push((path.clone(), None));
                    dropped.push(path.clone());
                }
            }
        }
        let content_tree = self.store.overlay_tree(new_base, &overlays)?;

        let shadow = ShadowCheckpoint {
            session_id: session_id.to_string(),
            base_commit: new_base.to_string(),
            timestamp: Utc::now(),
            modified_files: kept,
            new_files: Vec::new(),
            deleted_files: dropped,
        };
        let metadata_path = vec!["sessions".to_string(), session_id.to_string()];
        let metadata_tree = self.build_metadata_subtree(&metadata_path, &shadow)?;
        let grafted = self.store.tree_with_entry(
            Some(content_tree),
            &self.metadata_dir,
            metadata_tree,
            EntryKind::Tree,
        )?;

        let commit_id = self.store.create_commit(
            grafted,
            &[new_base],
            message,
            &self.author_name,
            &self.author_email,
        )?;

        let ref_name = self.shadow_ref_for(new_base, worktree_id);
        let existing = self.store.resolve_ref(&ref_name)?;
        self.store.update_ref_cas(&ref_name, commit_id, existing)?;

        if old_ref != ref_name {
            let _ = self.store.delete_ref(old_ref);
        }

        Ok(TempCheckpointResult {
            commit_id,
            skipped: false,
            ref_name,
        })
    }

    // --- committed checkpoints ---

    /// Promotes session data to a committed checkpoint on the metadata ref.
    pub fn write_committed(
        &self,
        req: &PromotionRequest<'_>,
        splitter: &dyn TranscriptSplitter,
    ) -> Result<Oid> {
        let tip = self.store.resolve_ref(&self.metadata_ref)?;
        let root_tree = match tip {
            Some(t) => Some(self.store.commit_tree_id(t)?),
            None => None,
        };

        let metadata = CommittedMetadata {
            session_id: req.session_id.to_string(),
            agent: req.agent.clone(),
            turn_id: req.turn_id.clone(),
            token_usage: req.token_usage,
            transcript_identifier_at_start: req.transcript_identifier_at_start.clone(),
            checkpoint_transcript_start: req.checkpoint_transcript_start,
            initial_attribution: req.initial_attribution.clone(),
            summary: req.summary.clone(),
        };
        let metadata_blob = self.store.write_blob(&serde_json::to_vec_pretty(&metadata)?)?;
        let (transcript_id, transcript_kind) = self.write_transcript(req.transcript, splitter)?;
        let prompt_blob = self
            .store
            .write_blob(req.prompts.join(PROMPT_SEPARATOR).as_bytes())?;
        let context_blob = self.store.write_blob(req.context)?;

        let session_tree = self.store.write_tree(&[
            entry("context.md", context_blob, EntryKind::Blob),
            entry("full.jsonl", transcript_id, transcript_kind),
            entry("metadata.json", metadata_blob, EntryKind::Blob),
            entry("prompt.txt", prompt_blob, EntryKind::Blob),
        ])?;

        let summary = CheckpointSummary {
            id: req.checkpoint_id,
            created_at: Utc::now(),
            strategy: req.strategy.to_string(),
            branch: req.branch.clone(),
            files_touched: req.files_touched.clone(),
            checkpoints_count: req.checkpoints_count,
            sessions: 1,
        };
        let summary_blob = self.store.write_blob(&serde_json::to_vec_pretty(&summary)?)?;
        let checkpoint_tree = self.store.write_tree(&[
            entry("1", session_tree, EntryKind::Tree),
            entry("metadata.json", summary_blob, EntryKind::Blob),
        ])?;

        let shard_name = req.checkpoint_id.shard();
        let rest = req.checkpoint_id.rest();
        let prev_shard = match root_tree {
            Some(root) => match self.store.tree_entry(root, &shard_name)? {
                Some((id, EntryKind::Tree)) => Some(id),
                _ => None,
            },
            None => None,
        };
        let shard_tree =
            self.store
                .tree_with_entry(prev_shard, &rest, checkpoint_tree, EntryKind::Tree)?;
        let new_root =
            self.store
                .tree_with_entry(root_tree, &shard_name, shard_tree, EntryKind::Tree)?;

        let msg = format!(
            "{}: {}\n\nSession: {}\n",
            message::CHECKPOINT_TRAILER,
            req.checkpoint_id,
            req.session_id
        );
        let parents: Vec<Oid> = tip.into_iter().collect();
        let commit_id = self.store.create_commit(
            new_root,
            &parents,
            &msg,
            &self.author_name,
            &self.author_email,
        )?;
        self.store.update_ref_cas(&self.metadata_ref, commit_id, tip)?;

        Ok(commit_id)
    }

    /// Reads a committed checkpoint's summary by id.
    pub fn read_committed(&self, id: CheckpointId) -> Result<Option<CheckpointSummary>> {
        let Some(tip) = self.store.resolve_ref(&self.metadata_ref)? else {
            return Ok(None);
        };
        let root = self.store.commit_tree_id(tip)?;
        let path = format!("{}/metadata.json", id.storage_path());
        match self.store.read_blob_in_tree(root, &path)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Reads the content of one session subtree of a committed checkpoint.
    pub fn read_session_content(
        &self,
        id: CheckpointId,
        session_index: u32,
    ) -> Result<Option<SessionContent>> {
        let Some(tip) = self.store.resolve_ref(&self.metadata_ref)? else {
            return Ok(None);
        };
        let root = self.store.commit_tree_id(tip)?;
        let base = format!("{}/{}", id.storage_path(), session_index);

        let Some(meta_bytes) = self
            .store
            .read_blob_in_tree(root, &format!("{}/metadata.json", base))?
        else {
            return Ok(None);
        };
        let metadata: CommittedMetadata = serde_json::from_slice(&meta_bytes)?;

        let transcript = self.read_transcript(root, &format!("{}/full.jsonl", base))?;
        let prompts = self
            .store
            .read_blob_in_tree(root, &format!("{}/prompt.txt", base))?
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default();
        let context = self
            .store
            .read_blob_in_tree(root, &format!("{}/context.md", base))?
            .unwrap_or_default();

        Ok(Some(SessionContent {
            metadata,
            transcript,
            prompts,
            context,
        }))
    }

    /// Lists committed checkpoints, newest first.
    pub fn list_committed(&self, limit: usize) -> Result<Vec<CheckpointSummary>> {
        let Some(tip) = self.store.resolve_ref(&self.metadata_ref)? else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        let prefix = format!("{}: ", message::CHECKPOINT_TRAILER);
        for commit in self.store.log(tip, limit.saturating_mul(2).max(limit))? {
            if out.len() >= limit {
                break;
            }
            let msg = self.store.commit_message(commit)?;
            let subject = msg.lines().next().unwrap_or_default();
            let Some(id_str) = subject.strip_prefix(&prefix) else {
                continue;
            };
            let Ok(id) = CheckpointId::parse(id_str.trim()) else {
                continue;
            };
            if let Some(summary) = self.read_committed(id)? {
                out.push(summary);
            }
        }
        Ok(out)
    }

    // --- internals ---

    /// Builds the nested metadata subtree holding `checkpoint.json`.
    ///
    /// `path` components nest below the metadata root, deepest directory
    /// holding the blob.
    fn build_metadata_subtree(&self, path: &[String], shadow: &ShadowCheckpoint) -> Result<Oid> {
        let blob = self.store.write_blob(&serde_json::to_vec_pretty(shadow)?)?;
        let mut tree = self
            .store
            .write_tree(&[entry("checkpoint.json", blob, EntryKind::Blob)])?;
        for component in path.iter().rev() {
            tree = self
                .store
                .write_tree(&[entry(component, tree, EntryKind::Tree)])?;
        }
        Ok(tree)
    }

    fn write_transcript(
        &self,
        transcript: &[u8],
        splitter: &dyn TranscriptSplitter,
    ) -> Result<(Oid, EntryKind)> {
        if transcript.len() <= self.chunk_max_bytes {
            return Ok((self.store.write_blob(transcript)?, EntryKind::Blob));
        }

        let chunks = splitter.split(transcript, self.chunk_max_bytes);
        let mut entries = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            let blob = self.store.write_blob(chunk)?;
            entries.push(entry(&chunk_name(i), blob, EntryKind::Blob));
        }
        Ok((self.store.write_tree(&entries)?, EntryKind::Tree))
    }

    fn read_transcript(&self, root: Oid, path: &str) -> Result<Vec<u8>> {
        match self.store.entry_at_path(root, path)? {
            None => Ok(Vec::new()),
            Some((_, EntryKind::Blob)) => Ok(self
                .store
                .read_blob_in_tree(root, path)?
                .unwrap_or_default()),
            Some((id, EntryKind::Tree)) => {
                let mut parts = self.store.tree_entries(id)?;
                parts.sort_by(|a, b| a.name.cmp(&b.name));
                let mut chunks = Vec::with_capacity(parts.len());
                for part in parts {
                    let bytes = self
                        .store
                        .read_blob_in_tree(root, &format!("{}/{}", path, part.name))?
                        .ok_or_else(|| {
                            TrailError::NotFound(format!("transcript chunk {} missing", part.name))
                        })?;
                    chunks.push(bytes);
                }
                Ok(reassemble(&chunks))
            }
        }
    }
}

fn entry(name: &str, id: Oid, kind: EntryKind) -> TreeEntryInfo {
    TreeEntryInfo {
        name: name.to_string(),
        id,
        mode: match kind {
            EntryKind::Blob => 0o100644,
            EntryKind::Tree => 0o040000,
        },
        kind,
    }
}
