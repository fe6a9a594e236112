//! Identifier and path scheme: checkpoint ids, shadow-ref names, project ids.

use crate::error::{Result, TrailError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

/// A 48-bit random checkpoint identifier, rendered as 12 lowercase hex chars.
///
/// Generated once when a checkpoint is promoted; stable forever. The first
/// two hex chars shard the storage tree on the metadata ref:
/// `<id[0:2]>/<id[2:]>/`.
///
/// # Examples
///
/// ```
/// use trail_core::CheckpointId;
///
/// let id = CheckpointId::parse("ab12cd34ef56").unwrap();
/// assert_eq!(id.shard(), "ab");
/// assert_eq!(id.storage_path(), "ab/12cd34ef56");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CheckpointId([u8; 6]);

impl CheckpointId {
    /// The length of a checkpoint id as a hex string.
    pub const HEX_LEN: usize = 12;

    /// Generates a fresh random id.
    pub fn generate() -> Self {
        Self(rand::random())
    }

    /// Returns this id as a lowercase hex string, always 12 chars.
    pub fn as_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Returns the shard prefix (first 2 hex chars).
    pub fn shard(&self) -> String {
        hex::encode(&self.0[..1])
    }

    /// Returns the remainder of the id after the shard prefix.
    pub fn rest(&self) -> String {
        self.as_hex()[2..].to_string()
    }

    /// Returns the in-tree storage path `<shard>/<rest>`.
    pub fn storage_path(&self) -> String {
        format!("{}/{}", self.shard(), self.rest())
    }

    /// Parses an id from a hex string.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` unless the input matches `^[0-9a-f]{12}$`.
    pub fn parse(s: &str) -> Result<Self> {
        if s.len() != Self::HEX_LEN || !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(TrailError::Invalid(format!(
                "checkpoint id must be {} lowercase hex chars, got {:?}",
                Self::HEX_LEN,
                s
            )));
        }
        let bytes = hex::decode(s).map_err(|e| TrailError::Invalid(e.to_string()))?;
        let arr: [u8; 6] = bytes
            .try_into()
            .map_err(|_| TrailError::Invalid("invalid checkpoint id length".to_string()))?;
        Ok(Self(arr))
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_hex())
    }
}

impl fmt::Debug for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CheckpointId({})", self.as_hex())
    }
}

impl TryFrom<String> for CheckpointId {
    type Error = TrailError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<CheckpointId> for String {
    fn from(id: CheckpointId) -> String {
        id.as_hex()
    }
}

/// Computes the shadow ref name for a (base commit, worktree id) pair.
///
/// `<namespace><first7hex(base)>` when no worktree id is available,
/// `<namespace><first7hex(base)>-<first6hex(sha256(worktree_id))>` otherwise.
/// Pure: the same inputs always yield the same name.
pub fn shadow_ref_name(namespace: &str, base_commit: git2::Oid, worktree_id: Option<&str>) -> String {
    let base = &base_commit.to_string()[..7];
    match worktree_id {
        Some(wt) => format!("{}{}-{}", namespace, base, &sha256_hex(wt.as_bytes())[..6]),
        None => format!("{}{}", namespace, base),
    }
}

/// Classifies a ref name as a shadow ref.
///
/// Shadow refs match `^<namespace>[0-9a-f]{7,}(-[0-9a-f]{6,})?$`. The
/// metadata ref shares the namespace but is never a shadow ref.
pub fn is_shadow_ref(name: &str, namespace: &str, metadata_ref: &str) -> bool {
    if name == metadata_ref {
        return false;
    }
    let Some(rest) = name.strip_prefix(namespace) else {
        return false;
    };
    let (base, suffix) = match rest.split_once('-') {
        Some((b, s)) => (b, Some(s)),
        None => (rest, None),
    };
    let is_hex = |s: &str| s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    if base.len() < 7 || !is_hex(base) {
        return false;
    }
    match suffix {
        Some(s) => s.len() >= 6 && is_hex(s),
        None => true,
    }
}

/// Extracts the abbreviated base-commit prefix from a shadow ref name.
pub fn shadow_ref_base(name: &str, namespace: &str) -> Option<String> {
    let rest = name.strip_prefix(namespace)?;
    let base = rest.split_once('-').map(|(b, _)| b).unwrap_or(rest);
    Some(base.to_string())
}

/// Derives a deterministic project namespace for a repository root.
///
/// Used when committed checkpoints live in a side repository shared by
/// several projects: `sanitize(basename) + "-" + first8hex(sha256(abs))`.
pub fn project_id(root: &Path) -> String {
    let base = root
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("project");
    let sanitized: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    let abs = root
        .canonicalize()
        .unwrap_or_else(|_| root.to_path_buf())
        .to_string_lossy()
        .into_owned();
    format!("{}-{}", sanitized, &sha256_hex(abs.as_bytes())[..8])
}

/// Generates a date-prefixed session id, e.g. `2025-03-07-0f9a…`.
pub fn new_session_id() -> String {
    let date = chrono::Utc::now().format("%Y-%m-%d");
    format!("{}-{}", date, uuid::Uuid::new_v4())
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
