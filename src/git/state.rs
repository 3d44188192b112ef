//! Point-in-time queries about a working copy.
//!
//! [`WorkTree`] is the entry point for fleet commands: it resolves any path
//! inside a repository to the repository's canonical root, which is the key
//! used to avoid processing the same repository twice when several configured
//! paths point into it.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::types::Sha;

use super::log::{self, LogEntry};
use super::{GitClient, GitResult};

/// The commit checked out in a repository, as seen when it was queried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Commit {
    pub sha: Sha,
    /// Local branch name; empty when detached and for derived commits.
    pub branch: String,
    /// Upstream tracking reference (e.g. `origin/main`), or empty if none.
    pub upstream: String,
    pub repo_root: PathBuf,
}

impl Commit {
    /// A bare commit with no branch information (merge bases, upstream tips).
    pub fn detached(sha: Sha, repo_root: impl Into<PathBuf>) -> Self {
        Commit {
            sha,
            branch: String::new(),
            upstream: String::new(),
            repo_root: repo_root.into(),
        }
    }

    /// Returns true if the commit has a tracking reference.
    pub fn has_upstream(&self) -> bool {
        !self.upstream.is_empty()
    }

    /// Returns true if HEAD is detached.
    pub fn is_detached(&self) -> bool {
        self.branch.is_empty()
    }
}

/// A repository's working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkTree {
    /// Canonical repository root, the same for every path inside the repository.
    pub repo_root: PathBuf,
    pub commit: Commit,
    /// Repo-relative paths that are modified, deleted, or untracked.
    /// Untracked directories are reported once, as the directory.
    pub dirty_paths: BTreeSet<String>,
}

impl WorkTree {
    /// Returns true if there are no uncommitted or untracked changes.
    pub fn is_clean(&self) -> bool {
        self.dirty_paths.is_empty()
    }
}

/// Exclude commits reachable from `rev` in a rev-list range.
pub fn not(rev: &str) -> String {
    format!("^{}", rev)
}

/// The first parent of `rev`.
pub fn first_parent(rev: &str) -> String {
    format!("{}^", rev)
}

/// Split `git branch` output into `(marker, name)` pairs.
///
/// The marker column is `*` for the current branch, `+` for a branch checked
/// out in another worktree, and empty otherwise.
fn branch_lines(output: &str) -> impl Iterator<Item = (&str, &str)> {
    output.lines().filter_map(|line| {
        let (marker, name) = line.split_at_checked(2)?;
        let name = name.trim();
        (!name.is_empty()).then_some((marker.trim(), name))
    })
}

/// Parse `git branch` output, dropping the current branch. Branches checked
/// out in other worktrees are kept.
pub(crate) fn parse_branch_list(output: &str) -> Vec<String> {
    branch_lines(output)
        .filter(|(marker, _)| *marker != "*")
        .map(|(_, name)| name.to_string())
        .collect()
}

/// Parse `git branch` output, keeping only branches no worktree has checked
/// out. `git branch -d` refuses the others.
pub(crate) fn parse_deletable_branches(output: &str) -> Vec<String> {
    branch_lines(output)
        .filter(|(marker, _)| marker.is_empty())
        .map(|(_, name)| name.to_string())
        .collect()
}

impl GitClient {
    /// Resolve the checked-out branch, its commit, and its upstream.
    ///
    /// No upstream is not an error; the commit's `upstream` is left empty.
    /// A detached HEAD has an empty `branch` and no upstream.
    pub async fn head(&self, repo_root: &Path) -> GitResult<Commit> {
        let branch = self
            .stdout(repo_root, &["rev-parse", "--abbrev-ref", "HEAD"])
            .await?;
        if branch == "HEAD" {
            let sha = self.rev_parse(repo_root, "HEAD").await?;
            return Ok(Commit::detached(sha, repo_root));
        }

        let sha = self.rev_parse(repo_root, &branch).await?;
        let upstream = self
            .upstream_of(repo_root, &branch)
            .await?
            .unwrap_or_default();

        Ok(Commit {
            sha,
            branch,
            upstream,
            repo_root: repo_root.to_path_buf(),
        })
    }

    /// Resolve the work tree containing `path`.
    ///
    /// `path` may be any directory inside the repository; the returned
    /// `repo_root` is canonicalized so that subdirectories and symlinked paths
    /// of the same repository compare equal.
    pub async fn work_tree(&self, path: &Path) -> GitResult<WorkTree> {
        let toplevel = self
            .stdout(path, &["rev-parse", "--show-toplevel"])
            .await?;
        let repo_root = std::fs::canonicalize(&toplevel)?;

        let dirty = self
            .output(
                &repo_root,
                &[
                    "ls-files",
                    "--exclude-standard",
                    "--others",
                    "--deleted",
                    "--modified",
                    "--directory",
                    "--no-empty-directory",
                    "-z",
                ],
            )
            .await?;
        let dirty_paths: BTreeSet<String> = dirty
            .stdout
            .split(|b| *b == 0)
            .filter(|name| !name.is_empty())
            .map(|name| String::from_utf8_lossy(name).into_owned())
            .collect();

        let commit = self.head(&repo_root).await?;

        debug!(
            repo = %repo_root.display(),
            branch = %commit.branch,
            dirty = dirty_paths.len(),
            "read work tree"
        );

        Ok(WorkTree {
            repo_root,
            commit,
            dirty_paths,
        })
    }

    /// Commits reachable from `include` but not from `exclude`, in git's
    /// default order (newest first). An empty range is not an error.
    pub async fn logs(
        &self,
        repo_root: &Path,
        include: &[&str],
        exclude: &[&str],
    ) -> GitResult<Vec<LogEntry>> {
        let excluded: Vec<String> = exclude.iter().map(|rev| not(rev)).collect();
        let mut args = vec!["rev-list", "--header"];
        args.extend_from_slice(include);
        args.extend(excluded.iter().map(String::as_str));
        // Revisions end here; keeps a ref named like a path from being misread.
        args.push("--");

        let output = self.output(repo_root, &args).await?;
        Ok(log::decode_all(&output.stdout)?)
    }

    /// Local branches not merged into `target`, excluding the current branch.
    pub async fn unmerged_branches(&self, repo_root: &Path, target: &str) -> GitResult<Vec<String>> {
        let out = self
            .stdout(repo_root, &["branch", "--no-merged", target])
            .await?;
        Ok(parse_branch_list(&out))
    }

    /// Local branches merged into `root` that no worktree has checked out.
    pub async fn merged_branches(&self, repo_root: &Path, root: &str) -> GitResult<Vec<String>> {
        let out = self
            .stdout(repo_root, &["branch", "--merged", root])
            .await?;
        Ok(parse_deletable_branches(&out))
    }
}
