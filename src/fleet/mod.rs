//! Fleet commands: the same git operation applied to every configured
//! repository, in parallel.
//!
//! Configured paths may point anywhere inside a repository, and several may
//! point into the same one. Commands that act on repositories (fetch, merge,
//! status) first resolve each path to its canonical root and process each root
//! once. `foreach` runs in the configured directories as given.
//!
//! Work is driven through the [`Executor`], so every repository runs under the
//! configured deadline and concurrency bound. Subprocess output goes through a
//! [`PrefixWriter`] labelled with the repository's directory name.

mod add_dir;
mod fetch;
mod foreach;
mod merge;
mod status;
mod wd;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tracing::warn;

use crate::config::ConfigError;
use crate::executor::{Executor, TaskError};
use crate::git::{GitClient, GitError, WorkTree};
use crate::output::{ColorAllocator, Painter, PrefixWriter, SharedSink};

pub use add_dir::AddDirOutcome;
pub use merge::{MergeAction, MergeOptions, MergeOutcome, MergeReport, SkipReason};
pub use status::{RepoStatus, render_json, render_pretty, render_summary};
pub use wd::{best_match, match_score};

/// A git failure in one repository.
#[derive(Debug, Error)]
#[error("{}: {source}", .repo.display())]
pub struct RepoError {
    pub repo: PathBuf,
    #[source]
    pub source: GitError,
}

impl RepoError {
    pub fn new(repo: &Path, source: impl Into<GitError>) -> Self {
        RepoError {
            repo: repo.to_path_buf(),
            source: source.into(),
        }
    }
}

/// Errors from fleet commands.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error(transparent)]
    Git(#[from] GitError),

    /// The first repository to fail, time out, or panic.
    #[error(transparent)]
    Run(#[from] TaskError<RepoError>),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to write output: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode output: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FleetError>;

/// Everything a fleet command needs. Cheap to clone; clones share the
/// output sink and label colours.
#[derive(Debug, Clone)]
pub struct Fleet {
    client: GitClient,
    executor: Executor,
    sink: SharedSink,
    colors: Arc<Mutex<ColorAllocator>>,
}

impl Fleet {
    pub fn new(client: GitClient, executor: Executor, sink: SharedSink, painter: Painter) -> Self {
        Fleet {
            client,
            executor,
            sink,
            colors: Arc::new(Mutex::new(ColorAllocator::new(painter))),
        }
    }

    pub fn client(&self) -> &GitClient {
        &self.client
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// A writer that labels each line with `dir`'s final component.
    fn writer_for(&self, dir: &Path) -> PrefixWriter<SharedSink> {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());
        let label = self
            .colors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .paint(&name);
        PrefixWriter::new(self.sink.clone(), label)
    }

    /// Resolve `paths` to work trees, one per repository, in first-seen order.
    ///
    /// Paths that are not inside a repository are logged and skipped.
    pub async fn resolve(&self, paths: &[PathBuf]) -> Vec<WorkTree> {
        let mut seen = HashSet::new();
        let mut trees = Vec::new();

        for path in paths {
            match self.client.work_tree(path).await {
                Ok(tree) => {
                    if seen.insert(tree.repo_root.clone()) {
                        trees.push(tree);
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable work tree");
                }
            }
        }

        trees
    }

    /// Canonical roots of the repositories containing `paths`.
    pub async fn repo_roots(&self, paths: &[PathBuf]) -> Vec<PathBuf> {
        self.resolve(paths)
            .await
            .into_iter()
            .map(|tree| tree.repo_root)
            .collect()
    }
}
