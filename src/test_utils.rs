//! Shared test fixtures: throwaway git repositories and proptest generators.
//!
//! Fixtures drive the real `git` binary with system and global configuration
//! disabled, matching [`GitClient::isolated`], so results do not depend on the
//! machine running the tests.

use std::path::{Path, PathBuf};
use std::process::Command;

use proptest::prelude::*;
use tempfile::TempDir;

use crate::git::GitClient;
use crate::types::Sha;

/// Run git synchronously in `dir`, panicking on failure. Returns trimmed stdout.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(dir)
        .env("GIT_CONFIG_NOSYSTEM", "1")
        .env("GIT_CONFIG_GLOBAL", "/dev/null")
        .env("GIT_TERMINAL_PROMPT", "0")
        .args(args)
        .output()
        .expect("failed to launch git");
    assert!(
        output.status.success(),
        "git {} failed in {}: {}",
        args.join(" "),
        dir.display(),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A git repository in a temporary directory, deleted on drop.
pub struct TestRepo {
    _dir: TempDir,
    path: PathBuf,
}

impl TestRepo {
    /// Create an empty repository whose unborn branch is `main`.
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let path = std::fs::canonicalize(dir.path()).unwrap();
        git(&path, &["-c", "init.defaultBranch=main", "init", "-q"]);
        git(&path, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        configure_identity(&path);
        TestRepo { _dir: dir, path }
    }

    /// Create an origin repository with one commit on `main` and a clone of
    /// it whose `main` tracks `origin/main`.
    pub fn with_clone() -> (TestRepo, TestRepo) {
        let origin = TestRepo::new();
        origin.commit_file("README.md", "# fleet", "Initial commit");

        let dir = TempDir::new().unwrap();
        let parent = std::fs::canonicalize(dir.path()).unwrap();
        let origin_path = origin.path().to_str().unwrap().to_string();
        git(&parent, &["clone", "-q", &origin_path, "clone"]);
        let path = parent.join("clone");
        configure_identity(&path);

        (origin, TestRepo { _dir: dir, path })
    }

    /// Canonical path of the repository root.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A client configured like the fixture (no system/global config).
    pub fn client(&self) -> GitClient {
        GitClient::new().isolated()
    }

    /// Run git in this repository.
    pub fn git(&self, args: &[&str]) -> String {
        git(&self.path, args)
    }

    /// Write `name` and commit it, returning the new HEAD.
    pub fn commit_file(&self, name: &str, content: &str, message: &str) -> Sha {
        let file = self.path.join(name);
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&file, content).unwrap();
        self.git(&["add", name]);
        self.git(&["commit", "-q", "-m", message]);
        self.head()
    }

    /// Current HEAD commit.
    pub fn head(&self) -> Sha {
        Sha::new(self.git(&["rev-parse", "HEAD"]))
    }

    /// Create and switch to a new branch at the current HEAD.
    pub fn branch(&self, name: &str) {
        self.git(&["checkout", "-q", "-b", name]);
    }

    /// Switch to an existing branch.
    pub fn checkout(&self, name: &str) {
        self.git(&["checkout", "-q", name]);
    }
}

fn configure_identity(path: &Path) {
    git(path, &["config", "user.email", "test@test.com"]);
    git(path, &["config", "user.name", "Test"]);
}

pub fn arb_sha() -> impl Strategy<Value = Sha> {
    "[0-9a-f]{40}".prop_map(Sha::new)
}

/// Person names as git records them: words, an email in angle brackets.
pub fn arb_person() -> impl Strategy<Value = String> {
    ("[A-Z][a-z]{0,8}( [A-Z][a-z]{0,8}){0,2}", "[a-z]{1,8}@[a-z]{1,8}\\.com")
        .prop_map(|(name, email)| format!("{} <{}>", name, email))
}

pub fn arb_subject() -> impl Strategy<Value = String> {
    "[A-Za-z0-9][A-Za-z0-9 .,:()-]{0,60}".prop_map(|s| s.trim_end().to_string())
}

pub fn arb_body_lines() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[A-Za-z0-9][A-Za-z0-9 .,-]{0,40}", 0..5)
}

pub fn arb_tz_offset() -> impl Strategy<Value = String> {
    (prop_oneof![Just('+'), Just('-')], 0u32..14, prop_oneof![Just(0u32), Just(30), Just(45)])
        .prop_map(|(sign, h, m)| format!("{}{:02}{:02}", sign, h, m))
}
