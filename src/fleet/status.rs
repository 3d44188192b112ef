//! Per-repository status: dirty files and how HEAD relates to its upstream
//! and to the fleet's root branch.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::git::state::first_parent;
use crate::git::{Commit, GitResult, LogEntry, WorkTree};
use crate::output::{Color, Painter, time_ago};

use super::{Fleet, RepoError};

/// Everything `status` and `summary` report about one repository.
#[derive(Debug, Clone, Serialize)]
pub struct RepoStatus {
    pub repo: PathBuf,
    pub commit: Commit,
    pub dirty: bool,
    pub dirty_paths: Vec<String>,
    /// HEAD plus anything it merged (commits not reachable from its first parent).
    pub last: Vec<LogEntry>,
    /// On HEAD but not on the upstream.
    pub unpushed: Vec<LogEntry>,
    /// On the upstream but not on HEAD.
    pub unmerged: Vec<LogEntry>,
    /// On the remote root branch but not on HEAD, when HEAD tracks something else.
    pub missing: Vec<LogEntry>,
    /// Local branches not merged into the remote root branch.
    pub unmerged_branches: Vec<String>,
}

impl RepoStatus {
    /// Dirty, or behind its upstream.
    pub fn needs_attention(&self) -> bool {
        self.dirty || !self.unmerged.is_empty()
    }
}

impl Fleet {
    /// Status of every repository, sorted by path.
    ///
    /// `main_branches` name the root branches; the first one with an
    /// `origin/` counterpart is the comparison point for `missing` and
    /// `unmerged_branches`, and stands in for a missing upstream.
    #[instrument(skip_all, fields(paths = paths.len()))]
    pub async fn status(&self, paths: &[PathBuf], main_branches: &[String]) -> Vec<RepoStatus> {
        let trees = self.resolve(paths).await;
        let statuses = Arc::new(Mutex::new(Vec::new()));

        let fleet = self.clone();
        let roots: Arc<[String]> = main_branches.into();
        let sink = statuses.clone();
        let result = self
            .executor
            .run(trees, move |tree| {
                let (fleet, roots, sink) = (fleet.clone(), roots.clone(), sink.clone());
                async move {
                    let status = fleet.repo_status(tree, &roots).await;
                    sink.lock().unwrap_or_else(PoisonError::into_inner).push(status);
                    Ok::<_, RepoError>(())
                }
            })
            .await;

        if let Err(e) = result {
            warn!(error = %e, "status is incomplete");
        }

        let mut statuses =
            std::mem::take(&mut *statuses.lock().unwrap_or_else(PoisonError::into_inner));
        statuses.sort_by(|a, b| a.repo.cmp(&b.repo));
        statuses
    }

    /// Build one repository's status. Queries that fail leave their field empty.
    async fn repo_status(&self, tree: WorkTree, main_branches: &[String]) -> RepoStatus {
        let repo = tree.repo_root.as_path();
        let head = tree.commit.sha.as_str();

        let root = self.remote_root(repo, main_branches).await;
        let upstream = if tree.commit.has_upstream() {
            Some(tree.commit.upstream.clone())
        } else {
            root.clone()
        };

        let mut unpushed = Vec::new();
        let mut unmerged = Vec::new();
        if let Some(upstream) = &upstream {
            let upstream = upstream.as_str();
            unpushed = or_empty(repo, "unpushed", self.client.logs(repo, &[head], &[upstream])).await;
            unmerged = or_empty(repo, "unmerged", self.client.logs(repo, &[upstream], &[head])).await;
        }

        let mut missing = Vec::new();
        let mut unmerged_branches = Vec::new();
        if let Some(root) = &root {
            if upstream.as_ref() != Some(root) {
                missing =
                    or_empty(repo, "missing", self.client.logs(repo, &[root.as_str()], &[head])).await;
            }
            unmerged_branches =
                or_empty(repo, "unmerged branches", self.client.unmerged_branches(repo, root)).await;
        }

        let parent = first_parent(head);
        let last = match self.client.logs(repo, &[head], &[parent.as_str()]).await {
            Ok(last) => last,
            // Root commit: there is no first parent to exclude.
            Err(_) => {
                or_empty(repo, "last", self.client.logs(repo, &["--max-count=1", head], &[])).await
            }
        };

        RepoStatus {
            repo: tree.repo_root.clone(),
            dirty: !tree.is_clean(),
            dirty_paths: tree.dirty_paths.into_iter().collect(),
            commit: tree.commit,
            last,
            unpushed,
            unmerged,
            missing,
            unmerged_branches,
        }
    }

    /// `origin/<branch>` for the first of `main_branches` that exists.
    async fn remote_root(&self, repo: &Path, main_branches: &[String]) -> Option<String> {
        for branch in main_branches {
            let remote = format!("origin/{}", branch);
            if let Ok(true) = self.client.ref_exists(repo, &remote).await {
                return Some(remote);
            }
        }
        None
    }
}

async fn or_empty<T>(
    repo: &Path,
    what: &str,
    query: impl Future<Output = GitResult<Vec<T>>>,
) -> Vec<T> {
    query.await.unwrap_or_else(|e| {
        debug!(repo = %repo.display(), what, error = %e, "status query failed");
        Vec::new()
    })
}

fn write_logs(
    w: &mut impl Write,
    painter: Painter,
    now: DateTime<Utc>,
    heading: &str,
    logs: &[LogEntry],
    color: Color,
) -> std::io::Result<()> {
    if logs.is_empty() {
        return Ok(());
    }
    writeln!(w, "  {}", heading)?;
    for log in logs {
        writeln!(
            w,
            "    {} {} ({})",
            painter.paint(log.commit.short(), color),
            log.subject.trim(),
            time_ago(&log.author_time, now)
        )?;
    }
    Ok(())
}

/// Detailed, human-readable status.
pub fn render_pretty(
    w: &mut impl Write,
    statuses: &[RepoStatus],
    main_branches: &[String],
    painter: Painter,
    now: DateTime<Utc>,
) -> std::io::Result<()> {
    for status in statuses {
        let repo = painter.paint(&status.repo.display().to_string(), Color::Cyan);
        if main_branches.contains(&status.commit.branch) {
            writeln!(w, "{}", repo)?;
        } else {
            let branch = if status.commit.is_detached() {
                "(detached)".to_string()
            } else {
                format!("({})", status.commit.branch)
            };
            writeln!(w, "{} {}", repo, painter.paint(&branch, Color::Purple))?;
        }

        if status.dirty {
            writeln!(w, "  Dirty:")?;
            for path in &status.dirty_paths {
                writeln!(w, "     {}", painter.paint(path, Color::Red))?;
            }
        }
        write_logs(w, painter, now, "Unmerged:", &status.unmerged, Color::Blue)?;
        write_logs(w, painter, now, "Missing:", &status.missing, Color::Blue)?;
        write_logs(w, painter, now, "Unpushed:", &status.unpushed, Color::Yellow)?;

        if !status.unmerged_branches.is_empty() {
            writeln!(w, "  Unmerged Branches:")?;
            let branches: Vec<String> = status
                .unmerged_branches
                .iter()
                .map(|b| painter.paint(b, Color::Blue))
                .collect();
            writeln!(w, "    {}", branches.join(" "))?;
        }
    }
    Ok(())
}

/// Status as a JSON array.
pub fn render_json(w: &mut impl Write, statuses: &[RepoStatus]) -> serde_json::Result<()> {
    serde_json::to_writer_pretty(&mut *w, statuses)?;
    writeln!(w).map_err(serde_json::Error::io)
}

/// One line per repository, grouped by whether it needs attention.
pub fn render_summary(
    w: &mut impl Write,
    statuses: &[RepoStatus],
    main_branches: &[String],
    painter: Painter,
    now: DateTime<Utc>,
) -> std::io::Result<()> {
    let mut on_root = Vec::new();
    let mut elsewhere = Vec::new();
    let mut attention = Vec::new();

    for status in statuses {
        if status.needs_attention() {
            attention.push(status);
        } else if !status.unpushed.is_empty() || !main_branches.contains(&status.commit.branch) {
            elsewhere.push(status);
        } else {
            on_root.push(status);
        }
    }

    let groups = [
        ("on a main branch and up-to-date", on_root, Color::Green),
        ("on another branch or unpushed", elsewhere, Color::Yellow),
        ("dirty or out of date", attention, Color::Red),
    ];
    for (heading, group, color) in groups {
        if group.is_empty() {
            continue;
        }
        writeln!(w, "{}", heading)?;
        for status in group {
            let (sha, subject, when) = match status.last.first() {
                Some(last) => (
                    last.commit.short().to_string(),
                    last.subject.trim().to_string(),
                    time_ago(&last.author_time, now),
                ),
                None => ("None".to_string(), String::new(), String::new()),
            };
            writeln!(
                w,
                "    {} [{}] {} ({})",
                painter.paint(&sha, color),
                painter.paint(&short_repo(&status.repo), Color::Cyan),
                subject,
                when
            )?;
        }
    }
    Ok(())
}

/// Last two components of `repo` (`parent/name`).
fn short_repo(repo: &Path) -> String {
    let name = repo.file_name().map(|n| n.to_string_lossy());
    let parent = repo
        .parent()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy());
    match (parent, name) {
        (Some(parent), Some(name)) => format!("{}/{}", parent, name),
        (None, Some(name)) => name.into_owned(),
        _ => repo.display().to_string(),
    }
}
