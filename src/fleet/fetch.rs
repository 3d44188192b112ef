use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use super::{Fleet, RepoError, Result};

impl Fleet {
    /// Fetch every remote of every repository, pruning deleted remote branches.
    #[instrument(skip_all, fields(paths = paths.len()))]
    pub async fn fetch(&self, paths: &[PathBuf], verbose: bool) -> Result<()> {
        let roots = self.repo_roots(paths).await;
        let fleet = self.clone();

        self.executor
            .run(roots, move |repo| {
                let fleet = fleet.clone();
                async move { fleet.fetch_repo(&repo, verbose).await }
            })
            .await?;
        Ok(())
    }

    async fn fetch_repo(&self, repo: &Path, verbose: bool) -> std::result::Result<(), RepoError> {
        let mut out = self.writer_for(repo);
        if verbose {
            writeln!(out, "fetching").map_err(|e| RepoError::new(repo, e))?;
        }
        debug!(repo = %repo.display(), "fetching");

        self.client
            .fetch_all_prune(repo, &mut out)
            .await
            .map_err(|e| RepoError::new(repo, e))
    }
}
