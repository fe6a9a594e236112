//! Overlap analysis between user commits and tracked agent work.
//!
//! All comparisons are byte-wise at the tracked paths. A filename
//! intersection alone is never enough: the user may have reverted the
//! agent's edits, or committed an unrelated change to the same file.

use crate::error::Result;
use crate::git_store::GitStore;
use git2::Oid;

/// Answers the three overlap questions the coordinator asks.
pub struct OverlapAnalyzer<'a> {
    store: &'a GitStore,
}

impl<'a> OverlapAnalyzer<'a> {
    /// Creates an analyzer over the given store.
    pub fn new(store: &'a GitStore) -> Self {
        Self { store }
    }

    /// Do the user's staged changes overlap the agent's tracked work?
    ///
    /// True when at least one staged path is in `files_touched` and its
    /// staged content byte-equals the shadow tip's content at that path
    /// (a staged deletion matching an agent deletion counts). A path the
    /// user reverted to base content compares unequal and does not
    /// overlap.
    pub fn staged_overlap(&self, files_touched: &[String], shadow_tip: Oid) -> Result<bool> {
        for path in self.store.staged_paths()? {
            if !files_touched.iter().any(|f| f == &path) {
                continue;
            }
            let staged = self.store.staged_blob(&path)?;
            let shadow = self.store.read_blob_at(shadow_tip, &path)?;
            if staged == shadow {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Which committed paths overlap the agent's tracked work?
    ///
    /// Diffs `head` against `parent` and returns the tracked paths whose
    /// committed content matches the shadow tip byte-for-byte. An empty
    /// result means the user committed unrelated changes to the same
    /// files, and nothing should be promoted.
    pub fn committed_overlap(
        &self,
        head: Oid,
        parent: Option<Oid>,
        files_touched: &[String],
        shadow_tip: Oid,
    ) -> Result<Vec<String>> {
        let mut matching = Vec::new();
        for delta in self.store.diff_name_status(parent, head)? {
            if !files_touched.iter().any(|f| f == &delta.path) {
                continue;
            }
            let committed = self.store.read_blob_at(head, &delta.path)?;
            let shadow = self.store.read_blob_at(shadow_tip, &delta.path)?;
            if committed == shadow {
                matching.push(delta.path);
            }
        }
        matching.sort();
        Ok(matching)
    }

    /// Which tracked paths still differ between the shadow tip and the
    /// new HEAD, and so must be carried forward to the next base?
    pub fn remaining_work(
        &self,
        files_touched: &[String],
        shadow_tip: Oid,
        new_head: Oid,
    ) -> Result<Vec<String>> {
        let mut remaining = Vec::new();
        for path in files_touched {
            let shadow = self.store.read_blob_at(shadow_tip, path)?;
            let head = self.store.read_blob_at(new_head, path)?;
            if shadow != head {
                remaining.push(path.clone());
            }
        }
        Ok(remaining)
    }
}
