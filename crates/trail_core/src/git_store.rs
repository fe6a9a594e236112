//! Object-store adapter over a git repository.
//!
//! Exposes the minimal surface the engine needs from the underlying
//! content-addressed history store: blobs, trees, commits, atomic ref
//! updates, diffs, staged and working-tree state, and a bounded push.
//! Every failure maps into the closed `TrailError` taxonomy; all ref
//! mutations are atomic at the ref level (compare-and-set).

use crate::error::{Result, TrailError};
use git2::Oid;
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Kind of a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file content.
    Blob,
    /// Subtree.
    Tree,
}

impl EntryKind {
    fn filemode(self) -> i32 {
        match self {
            EntryKind::Blob => 0o100644,
            EntryKind::Tree => 0o040000,
        }
    }
}

/// One entry of a tree object.
#[derive(Debug, Clone)]
pub struct TreeEntryInfo {
    /// Entry name (a single path component).
    pub name: String,
    /// Object id of the blob or subtree.
    pub id: Oid,
    /// Raw file mode.
    pub mode: i32,
    /// Blob or tree.
    pub kind: EntryKind,
}

/// Name-status classification of a diff entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffStatus {
    /// Path added in the newer commit.
    Added,
    /// Path changed between the commits.
    Modified,
    /// Path removed in the newer commit.
    Deleted,
}

/// One path in a name-status diff.
#[derive(Debug, Clone)]
pub struct DiffEntry {
    /// What happened to the path.
    pub status: DiffStatus,
    /// Repository-relative path.
    pub path: String,
}

/// Adapter over a single git repository.
pub struct GitStore {
    repo: git2::Repository,
}

impl GitStore {
    /// Opens the repository containing `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let repo = git2::Repository::discover(path.as_ref())?;
        Ok(Self { repo })
    }

    /// Returns the working-directory root.
    ///
    /// # Errors
    ///
    /// Returns `Unsupported` for bare repositories; the engine needs a
    /// working tree to observe.
    pub fn workdir(&self) -> Result<&Path> {
        self.repo
            .workdir()
            .ok_or_else(|| TrailError::Unsupported("bare repository has no working tree".into()))
    }

    /// Returns the per-worktree git directory (state lives under it).
    pub fn git_dir(&self) -> &Path {
        self.repo.path()
    }

    /// Resolves HEAD to a commit id.
    pub fn head_commit(&self) -> Result<Oid> {
        let head = self.repo.head()?;
        Ok(head.peel_to_commit()?.id())
    }

    /// Returns the short name of the currently checked-out branch.
    pub fn head_branch(&self) -> Option<String> {
        self.repo
            .head()
            .ok()
            .and_then(|h| h.shorthand().map(str::to_string))
    }

    // --- refs ---

    /// Resolves an arbitrary revspec (ref name, `HEAD`, abbreviated hash)
    /// to a commit id, or `None` when it does not resolve.
    pub fn resolve_revspec(&self, spec: &str) -> Result<Option<Oid>> {
        match self.repo.revparse_single(spec) {
            Ok(obj) => match obj.peel_to_commit() {
                Ok(commit) => Ok(Some(commit.id())),
                Err(_) => Ok(None),
            },
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolves a named ref to its target, or `None` if it does not exist.
    pub fn resolve_ref(&self, name: &str) -> Result<Option<Oid>> {
        match self.repo.find_reference(name) {
            Ok(r) => Ok(r.target()),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Creates a ref that must not already exist.
    pub fn create_ref(&self, name: &str, target: Oid) -> Result<()> {
        self.repo
            .reference(name, target, false, "trail: create ref")?;
        Ok(())
    }

    /// Updates a ref by compare-and-set.
    ///
    /// With `expected = Some(old)` the update fails with `Conflict` when
    /// the ref no longer points at `old`; with `None` it behaves like
    /// `create_ref`.
    pub fn update_ref_cas(&self, name: &str, target: Oid, expected: Option<Oid>) -> Result<()> {
        match expected {
            Some(old) => {
                self.repo
                    .reference_matching(name, target, true, old, "trail: update ref")?;
            }
            None => {
                self.repo
                    .reference(name, target, false, "trail: create ref")?;
            }
        }
        Ok(())
    }

    /// Deletes a ref. Deleting a ref that does not exist is a no-op.
    pub fn delete_ref(&self, name: &str) -> Result<()> {
        match self.repo.find_reference(name) {
            Ok(mut r) => {
                r.delete()?;
                Ok(())
            }
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Renames a ref; fails with `Conflict` when the target name exists.
    pub fn rename_ref(&self, old: &str, new: &str) -> Result<()> {
        let mut r = self.repo.find_reference(old)?;
        r.rename(new, false, "trail: migrate shadow ref")?;
        Ok(())
    }

    /// Lists refs whose full name starts with `prefix`, sorted by name.
    pub fn list_refs(&self, prefix: &str) -> Result<Vec<(String, Oid)>> {
        let glob = format!("{}*", prefix);
        let mut out = Vec::new();
        for r in self.repo.references_glob(&glob)? {
            let r = r?;
            if let (Some(name), Some(target)) = (r.name(), r.target()) {
                out.push((name.to_string(), target));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    // --- objects ---

    /// Returns the tree id of a commit.
    pub fn commit_tree_id(&self, commit: Oid) -> Result<Oid> {
        Ok(self.repo.find_commit(commit)?.tree_id())
    }

    /// Returns the first parent of a commit, if any.
    pub fn commit_parent(&self, commit: Oid) -> Result<Option<Oid>> {
        let c = self.repo.find_commit(commit)?;
        Ok(c.parent_ids().next())
    }

    /// Returns the full message of a commit.
    pub fn commit_message(&self, commit: Oid) -> Result<String> {
        let c = self.repo.find_commit(commit)?;
        Ok(String::from_utf8_lossy(c.message_bytes()).into_owned())
    }

    /// Reads a file's bytes out of a commit's tree.
    ///
    /// Returns `None` when the path does not exist in that tree.
    pub fn read_blob_at(&self, commit: Oid, path: &str) -> Result<Option<Vec<u8>>> {
        let tree_id = self.commit_tree_id(commit)?;
        self.read_blob_in_tree(tree_id, path)
    }

    /// Reads a file's bytes out of a tree.
    pub fn read_blob_in_tree(&self, tree: Oid, path: &str) -> Result<Option<Vec<u8>>> {
        let tree = self.repo.find_tree(tree)?;
        match tree.get_path(Path::new(path)) {
            Ok(entry) => {
                if entry.kind() != Some(git2::ObjectType::Blob) {
                    return Err(TrailError::Invalid(format!(
                        "expected blob at {}, found {:?}",
                        path,
                        entry.kind()
                    )));
                }
                Ok(Some(self.repo.find_blob(entry.id())?.content().to_vec()))
            }
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Lists the entries of a tree.
    pub fn tree_entries(&self, tree: Oid) -> Result<Vec<TreeEntryInfo>> {
        let tree = self.repo.find_tree(tree)?;
        let mut out = Vec::with_capacity(tree.len());
        for entry in tree.iter() {
            let kind = match entry.kind() {
                Some(git2::ObjectType::Tree) => EntryKind::Tree,
                _ => EntryKind::Blob,
            };
            out.push(TreeEntryInfo {
                name: entry.name().unwrap_or_default().to_string(),
                id: entry.id(),
                mode: entry.filemode(),
                kind,
            });
        }
        Ok(out)
    }

    /// Looks up a named entry at a tree's root level.
    pub fn tree_entry(&self, tree: Oid, name: &str) -> Result<Option<(Oid, EntryKind)>> {
        let tree = self.repo.find_tree(tree)?;
        let result = match tree.get_name(name) {
            Some(entry) => {
                let kind = match entry.kind() {
                    Some(git2::ObjectType::Tree) => EntryKind::Tree,
                    _ => EntryKind::Blob,
                };
                Ok(Some((entry.id(), kind)))
            }
            None => Ok(None),
        };
        result
    }

    /// Looks up an entry at an arbitrary path inside a tree.
    pub fn entry_at_path(&self, tree: Oid, path: &str) -> Result<Option<(Oid, EntryKind)>> {
        let tree = self.repo.find_tree(tree)?;
        match tree.get_path(Path::new(path)) {
            Ok(entry) => {
                let kind = match entry.kind() {
                    Some(git2::ObjectType::Tree) => EntryKind::Tree,
                    _ => EntryKind::Blob,
                };
                Ok(Some((entry.id(), kind)))
            }
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Walks first-parent history from a commit, newest first.
    pub fn log(&self, from: Oid, limit: usize) -> Result<Vec<Oid>> {
        let mut walk = self.repo.revwalk()?;
        walk.simplify_first_parent()?;
        walk.push(from)?;
        let mut out = Vec::new();
        for oid in walk {
            out.push(oid?);
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    /// Stores raw bytes as a blob and returns its id.
    pub fn write_blob(&self, data: &[u8]) -> Result<Oid> {
        Ok(self.repo.blob(data)?)
    }

    /// Composes a tree from entries and returns its id.
    pub fn write_tree(&self, entries: &[TreeEntryInfo]) -> Result<Oid> {
        let mut builder = self.repo.treebuilder(None)?;
        for e in entries {
            builder.insert(e.name.as_str(), e.id, e.kind.filemode())?;
        }
        Ok(builder.write()?)
    }

    /// Returns `base` with one root-level entry inserted or replaced.
    pub fn tree_with_entry(
        &self,
        base: Option<Oid>,
        name: &str,
        id: Oid,
        kind: EntryKind,
    ) -> Result<Oid> {
        let base_tree = match base {
            Some(t) => Some(self.repo.find_tree(t)?),
            None => None,
        };
        let mut builder = self.repo.treebuilder(base_tree.as_ref())?;
        builder.insert(name, id, kind.filemode())?;
        Ok(builder.write()?)
    }

    /// Returns `base` with one root-level entry removed (no-op if absent).
    pub fn tree_without_entry(&self, base: Oid, name: &str) -> Result<Oid> {
        let base_tree = self.repo.find_tree(base)?;
        let mut builder = self.repo.treebuilder(Some(&base_tree))?;
        if builder.get(name)?.is_some() {
            builder.remove(name)?;
        }
        Ok(builder.write()?)
    }

    /// Creates a commit object without moving any ref.
    ///
    /// The author/committer identity is always caller-supplied so engine
    /// commits never inherit the user's global configuration.
    pub fn create_commit(
        &self,
        tree: Oid,
        parents: &[Oid],
        message: &str,
        author_name: &str,
        author_email: &str,
    ) -> Result<Oid> {
        let sig = git2::Signature::now(author_name, author_email)?;
        let tree = self.repo.find_tree(tree)?;
        let parent_commits = parents
            .iter()
            .map(|p| self.repo.find_commit(*p))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let parent_refs: Vec<&git2::Commit> = parent_commits.iter().collect();
        Ok(self
            .repo
            .commit(None, &sig, &sig, message, &tree, &parent_refs)?)
    }

    // --- diffs, staging, working tree ---

    /// Computes the name-status diff between two commits.
    ///
    /// `old = None` diffs against the empty tree.
    pub fn diff_name_status(&self, old: Option<Oid>, new: Oid) -> Result<Vec<DiffEntry>> {
        let new_tree = self.repo.find_commit(new)?.tree()?;
        let old_tree = match old {
            Some(o) => Some(self.repo.find_commit(o)?.tree()?),
            None => None,
        };
        let diff = self
            .repo
            .diff_tree_to_tree(old_tree.as_ref(), Some(&new_tree), None)?;
        Ok(collect_deltas(&diff))
    }

    /// Lists the paths currently staged for commit.
    pub fn staged_paths(&self) -> Result<Vec<String>> {
        let head_tree = match self.head_commit() {
            Ok(h) => Some(self.repo.find_commit(h)?.tree()?),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        let index = self.repo.index()?;
        let diff = self
            .repo
            .diff_tree_to_index(head_tree.as_ref(), Some(&index), None)?;
        Ok(collect_deltas(&diff).into_iter().map(|d| d.path).collect())
    }

    /// Reads the staged content of a path, or `None` for a staged deletion
    /// (or a path not in the index).
    pub fn staged_blob(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let index = self.repo.index()?;
        match index.get_path(Path::new(path), 0) {
            Some(entry) => Ok(Some(self.repo.find_blob(entry.id)?.content().to_vec())),
            None => Ok(None),
        }
    }

    /// Lists untracked paths in the working tree.
    pub fn untracked_files(&self) -> Result<Vec<String>> {
        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = self.repo.statuses(Some(&mut opts))?;
        let mut out = Vec::new();
        for entry in statuses.iter() {
            if entry.status().contains(git2::Status::WT_NEW) {
                if let Some(p) = entry.path() {
                    out.push(p.to_string());
                }
            }
        }
        out.sort();
        Ok(out)
    }

    /// Builds a tree capturing the working-tree state of the given paths.
    ///
    /// Starts from HEAD's tree (empty for an unborn branch), overlays the
    /// on-disk contents of `changed` paths, and drops `deleted` paths. A
    /// changed path missing from disk is treated as deleted.
    pub fn snapshot_tree(&self, changed: &[String], deleted: &[String]) -> Result<Oid> {
        let workdir = self.workdir()?.to_path_buf();
        let mut index = git2::Index::new()?;
        if let Ok(head) = self.head_commit() {
            let tree = self.repo.find_commit(head)?.tree()?;
            index.read_tree(&tree)?;
        }

        for path in changed {
            let full = workdir.join(path);
            let bytes = match fs::read(&full) {
                Ok(b) => b,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    remove_index_path(&mut index, path)?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let blob = self.repo.blob(&bytes)?;
            let mode = file_mode(&full);
            index.add(&index_entry(path, blob, bytes.len(), mode))?;
        }
        for path in deleted {
            remove_index_path(&mut index, path)?;
        }

        Ok(index.write_tree_to(&self.repo)?)
    }

    /// Builds a tree from a base commit's tree with blob overlays applied.
    ///
    /// `Some(oid)` places that blob at the path; `None` removes the path.
    pub fn overlay_tree(&self, base: Oid, overlays: &[(String, Option<Oid>)]) -> Result<Oid> {
        let tree = self.repo.find_commit(base)?.tree()?;
        let mut index = git2::Index::new()?;
        index.read_tree(&tree)?;

        for (path, blob) in overlays {
            match blob {
                Some(oid) => {
                    let size = self.repo.find_blob(*oid)?.size();
                    index.add(&index_entry(path, *oid, size, 0o100644))?;
                }
                None => remove_index_path(&mut index, path)?,
            }
        }

        Ok(index.write_tree_to(&self.repo)?)
    }

    /// Pushes a ref to a remote, bounded by a timeout.
    ///
    /// Shells out to the `git` binary: a network push cannot be bounded
    /// in-process, and the host's credential helpers must apply.
    pub fn push_ref(&self, remote: &str, refname: &str, timeout_secs: u64) -> Result<()> {
        let workdir = self.workdir()?.to_path_buf();
        let refspec = format!("{}:{}", refname, refname);
        let mut child = Command::new("git")
            .arg("-C")
            .arg(&workdir)
            .args(["push", remote, &refspec])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let deadline = Instant::now() + Duration::from_secs(timeout_secs);
        let status = loop {
            match child.try_wait()? {
                Some(status) => break status,
                None if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(TrailError::Timeout {
                        operation: format!("git push {} {}", remote, refname),
                        seconds: timeout_secs,
                    });
                }
                None => std::thread::sleep(Duration::from_millis(50)),
            }
        };

        if status.success() {
            Ok(())
        } else {
            let mut err = String::new();
            if let Some(mut stderr) = child.stderr.take() {
                let _ = stderr.read_to_string(&mut err);
            }
            Err(TrailError::Unsupported(format!(
                "git push exited with {}: {}",
                status,
                err.trim()
            )))
        }
    }
}

fn collect_deltas(diff: &git2::Diff<'_>) -> Vec<DiffEntry> {
    let mut entries = Vec::new();
    for delta in diff.deltas() {
        let status = match delta.status() {
            git2::Delta::Added | git2::Delta::Copied => DiffStatus::Added,
            git2::Delta::Deleted => DiffStatus::Deleted,
            _ => DiffStatus::Modified,
        };
        let file = match status {
            DiffStatus::Deleted => delta.old_file(),
            _ => delta.new_file(),
        };
        if let Some(p) = file.path().and_then(|p| p.to_str()) {
            entries.push(DiffEntry {
                status,
                path: p.to_string(),
            });
        }
    }
    entries
}

fn index_entry(path: &str, id: Oid, size: usize, mode: i32) -> git2::IndexEntry {
    git2::IndexEntry {
        ctime: git2::IndexTime::new(0, 0),
        mtime: git2::IndexTime::new(0, 0),
        dev: 0,
        ino: 0,
        mode: mode as u32,
        uid: 0,
        gid: 0,
        file_size: size as u32,
        id,
        flags: 0,
        flags_extended: 0,
        path: path.as_bytes().to_vec(),
    }
}

fn remove_index_path(index: &mut git2::Index, path: &str) -> Result<()> {
    if index.get_path(Path::new(path), 0).is_some() {
        index.remove_path(Path::new(path))?;
    }
    Ok(())
}

#[cfg(unix)]
fn file_mode(path: &Path) -> i32 {
    use std::os::unix::fs::PermissionsExt;
    match fs::metadata(path) {
        Ok(meta) if meta.permissions().mode() & 0o111 != 0 => 0o100755,
        _ => 0o100644,
    }
}

#[cfg(not(unix))]
fn file_mode(_path: &Path) -> i32 {
    0o100644
}
