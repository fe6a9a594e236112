//! Durable per-session state records.
//!
//! One `<sessionId>.json` document per session in a per-worktree state
//! directory. Writes are atomic (sibling temp file + rename) so a
//! concurrent reader can never observe a torn document.

use crate::error::{Result, TrailError};
use crate::types::{SessionPhase, SessionState};
use chrono::{Duration, Utc};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Filesystem-backed store of session state documents.
pub struct SessionStore {
    root: PathBuf,
    stale_after_days: u32,
}

impl SessionStore {
    /// Creates a store rooted at the given directory.
    ///
    /// The directory is created lazily on the first write.
    pub fn new(root: impl AsRef<Path>, stale_after_days: u32) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            stale_after_days,
        }
    }

    /// Returns the state directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Loads a session by id.
    ///
    /// A record in phase `ended` whose `endedAt` is older than the stale
    /// threshold is deleted and reported as absent. A malformed record is
    /// also treated as an absent session, but the parse error is logged.
    pub fn load(&self, session_id: &str) -> Result<Option<SessionState>> {
        let path = self.session_path(session_id);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let state: SessionState = match serde_json::from_slice(&bytes) {
            Ok(s) => s,
            Err(e) => {
                warn!(session_id, error = %e, "unreadable session record, treating as absent");
                return Ok(None);
            }
        };

        if self.is_stale(&state) {
            let _ = fs::remove_file(&path);
            return Ok(None);
        }

        Ok(Some(state))
    }

    /// Lists all live sessions, sorted by session id.
    ///
    /// Stale ended records encountered during the walk are deleted.
    pub fn list(&self) -> Result<Vec<SessionState>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut sessions = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(state) = self.load(stem)? {
                sessions.push(state);
            }
        }

        sessions.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        Ok(sessions)
    }

    /// Persists a session record atomically.
    pub fn save(&self, state: &SessionState) -> Result<()> {
        if state.session_id.is_empty() {
            return Err(TrailError::Invalid("session id must not be empty".into()));
        }
        fs::create_dir_all(&self.root)?;
        let bytes = serde_json::to_vec_pretty(state)?;
        atomic_write(&self.session_path(&state.session_id), &bytes)
    }

    /// Deletes a session record. Missing records are a no-op.
    pub fn delete(&self, session_id: &str) -> Result<()> {
        match fs::remove_file(self.session_path(session_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// True when a live record exists for the id.
    pub fn exists(&self, session_id: &str) -> bool {
        matches!(self.load(session_id), Ok(Some(_)))
    }

    /// Marks a session as ended; the record is swept after the stale
    /// threshold elapses.
    pub fn end_session(&self, session_id: &str) -> Result<()> {
        if let Some(mut state) = self.load(session_id)? {
            state.phase = SessionPhase::Ended;
            state.ended_at = Some(Utc::now());
            self.save(&state)?;
        }
        Ok(())
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.root.join(format!("{}.json", session_id))
    }

    fn is_stale(&self, state: &SessionState) -> bool {
        if state.phase != SessionPhase::Ended {
            return false;
        }
        let Some(ended_at) = state.ended_at else {
            return false;
        };
        Utc::now() - ended_at > Duration::days(i64::from(self.stale_after_days))
    }
}

/// Writes bytes to a path atomically: sibling `tmp.<pid>` file, fsync,
/// then rename.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| TrailError::Invalid(format!("no parent directory for {}", path.display())))?;
    let tmp_path = dir.join(format!("tmp.{}", std::process::id()));

    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    fs::rename(&tmp_path, path)?;

    // fsync parent directory (Unix-specific for crash safety)
    #[cfg(unix)]
    {
        if let Ok(dir_file) = File::open(dir) {
            let _ = dir_file.sync_all();
        }
    }

    Ok(())
}
