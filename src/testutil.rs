//! git fixtures shared by unit tests

use git2::{Repository, RepositoryInitOptions};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// helper to initialise a test git repository on `main`
pub fn init_repo(path: &Path) -> Repository {
    let mut opts = RepositoryInitOptions::new();
    opts.initial_head("main");
    let repo = Repository::init_opts(path, &opts).unwrap();
    configure_user(&repo);
    repo
}

/// configure git user for commits
pub fn configure_user(repo: &Repository) {
    let mut config = repo.config().unwrap();
    config.set_str("user.name", "Test User").unwrap();
    config.set_str("user.email", "test@example.com").unwrap();
}

/// helper to create a file (and its parent directories) with content
pub fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

/// helper to commit all changes, including deletions
pub fn commit_all(repo: &Repository, message: &str) {
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
        .unwrap();
    index.update_all(["*"].iter(), None).unwrap();
    index.write().unwrap();

    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let signature = repo.signature().unwrap();

    let parent_commit = repo.head().ok().and_then(|h| h.peel_to_commit().ok());

    if let Some(parent) = parent_commit {
        repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message,
            &tree,
            &[&parent],
        )
        .unwrap();
    } else {
        // first commit
        repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &[])
            .unwrap();
    }
}

/// an "origin" repository and a clone of it, both on `main`
pub struct Fixture {
    _dir: TempDir,
    pub origin_path: PathBuf,
    pub origin: Repository,
    pub local_path: PathBuf,
    pub local: Repository,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let origin_path = dir.path().join("origin");
        let local_path = dir.path().join("local");

        fs::create_dir_all(&origin_path).unwrap();
        let origin = init_repo(&origin_path);
        write_file(&origin_path, "README.md", "fixture\n");
        write_file(&origin_path, "config/base.yml", "name: base\n");
        commit_all(&origin, "initial commit");

        let local = Repository::clone(origin_path.to_str().unwrap(), &local_path).unwrap();
        configure_user(&local);

        Self {
            _dir: dir,
            origin_path,
            origin,
            local_path,
            local,
        }
    }

    /// write files in the clone and commit them
    pub fn commit_local(&self, files: &[(&str, &str)], message: &str) {
        for (rel, content) in files {
            write_file(&self.local_path, rel, content);
        }
        commit_all(&self.local, message);
    }

    /// write files in the origin and commit them (advancing origin/main)
    pub fn commit_origin(&self, files: &[(&str, &str)], message: &str) {
        for (rel, content) in files {
            write_file(&self.origin_path, rel, content);
        }
        commit_all(&self.origin, message);
    }
}
