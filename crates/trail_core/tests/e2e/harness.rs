//! Test workspace: an isolated git repository plus host-hook simulation.

use git2::Oid;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use trail_core::{CommitSource, Engine, MessageValidation, StepRecord};

/// An isolated repository the scenarios drive like a user would.
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    /// Creates a workspace with an initialized repository and one initial
    /// commit containing the given files.
    pub fn with_files(files: &[(&str, &str)]) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let repo = git2::Repository::init(dir.path()).expect("git init");
        {
            let mut config = repo.config().unwrap();
            config.set_str("user.name", "Test User").unwrap();
            config.set_str("user.email", "test@example.com").unwrap();
        }

        let ws = Self { dir };
        for (path, content) in files {
            ws.write_file(path, content);
            ws.stage(path);
        }
        ws.commit_index("init");
        ws
    }

    /// The workspace root.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Opens a fresh engine, the way each hook invocation would.
    pub fn engine(&self) -> Engine {
        Engine::open(self.path()).expect("open engine")
    }

    /// Writes a file in the working tree.
    pub fn write_file(&self, path: &str, content: &str) {
        let full = self.path().join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(full, content).unwrap();
    }

    /// Stages one path.
    pub fn stage(&self, path: &str) {
        let repo = self.repo();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(path)).unwrap();
        index.write().unwrap();
    }

    /// The current HEAD commit.
    pub fn head(&self) -> Oid {
        self.repo()
            .head()
            .unwrap()
            .peel_to_commit()
            .unwrap()
            .id()
    }

    /// Records a plain agent step over the given modified paths.
    pub fn record_step(&self, session_id: &str, modified: &[&str]) {
        let step = StepRecord {
            session_id: session_id.to_string(),
            modified_files: modified.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        self.engine().record_step(&step).expect("record step");
    }

    /// Runs the full user-commit flow through the engine hooks: prepare
    /// the message, commit the staged index, fire post-commit. Returns
    /// the new commit and the final message.
    pub fn commit_with_hooks(&self, subject: &str) -> (Oid, String) {
        let message = self.prepare_message(subject);
        let commit = self.commit_index(&message);
        self.engine().post_commit().expect("post-commit");
        (commit, message)
    }

    /// Runs only the prepare-message hook and returns the resulting
    /// message content.
    pub fn prepare_message(&self, subject: &str) -> String {
        let msg_path = self.message_file();
        fs::write(&msg_path, format!("{}\n", subject)).unwrap();
        self.engine()
            .prepare_commit_message(&msg_path, CommitSource::Message, None)
            .expect("prepare message");
        fs::read_to_string(&msg_path).unwrap()
    }

    /// Runs the validate-message hook on the current message file.
    pub fn validate_message(&self) -> MessageValidation {
        self.engine()
            .validate_commit_message(&self.message_file())
            .expect("validate message")
    }

    /// The simulated COMMIT_EDITMSG path.
    pub fn message_file(&self) -> PathBuf {
        self.repo().path().join("COMMIT_EDITMSG")
    }

    /// Creates a commit from the staged index, like `git commit`.
    pub fn commit_index(&self, message: &str) -> Oid {
        let repo = self.repo();
        let mut index = repo.index().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = repo.signature().unwrap();
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap()
    }

    /// Amends HEAD with a new message, moving the tip like `commit --amend`.
    pub fn amend_head(&self, new_message: &str) -> Oid {
        let repo = self.repo();
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        head.amend(Some("HEAD"), None, None, None, Some(new_message), None)
            .unwrap()
    }

    /// Lists refs under the engine namespace.
    pub fn trail_refs(&self) -> Vec<String> {
        let repo = self.repo();
        let mut names = Vec::new();
        for r in repo.references_glob("refs/trail/*").unwrap() {
            if let Some(name) = r.unwrap().name() {
                names.push(name.to_string());
            }
        }
        names.sort();
        names
    }

    /// Resolves a ref to its target, if it exists.
    pub fn resolve(&self, name: &str) -> Option<Oid> {
        self.repo()
            .find_reference(name)
            .ok()
            .and_then(|r| r.target())
    }

    /// Reads a blob out of a commit's tree.
    pub fn blob_at(&self, commit: Oid, path: &str) -> Option<Vec<u8>> {
        let repo = self.repo();
        let tree = repo.find_commit(commit).unwrap().tree().unwrap();
        let entry = tree.get_path(Path::new(path)).ok()?;
        let content = repo.find_blob(entry.id()).unwrap().content().to_vec();
        Some(content)
    }

    fn repo(&self) -> git2::Repository {
        git2::Repository::open(self.path()).unwrap()
    }
}
