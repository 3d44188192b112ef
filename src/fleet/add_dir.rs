use std::path::PathBuf;

use tracing::{info, warn};

use crate::config::FleetConfig;

use super::Fleet;

/// What happened to one directory passed to [`Fleet::add_dirs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddDirOutcome {
    /// The repository root was appended to the configuration.
    Added(PathBuf),
    /// The repository root was already configured.
    AlreadyPresent(PathBuf),
    /// The directory is not inside a readable repository.
    Rejected { dir: PathBuf, reason: String },
}

impl Fleet {
    /// Add the repositories containing `dirs` to `config`.
    ///
    /// Each directory is resolved to its canonical repository root, so a
    /// subdirectory adds its repository and a repository is listed once.
    /// The caller saves `config`.
    pub async fn add_dirs(&self, config: &mut FleetConfig, dirs: &[PathBuf]) -> Vec<AddDirOutcome> {
        let mut outcomes = Vec::with_capacity(dirs.len());

        for dir in dirs {
            let tree = match self.client.work_tree(dir).await {
                Ok(tree) => tree,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "not adding directory");
                    outcomes.push(AddDirOutcome::Rejected {
                        dir: dir.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let root = tree.repo_root;
            if config.add_repo(root.clone()) {
                info!(repo = %root.display(), "added repository");
                outcomes.push(AddDirOutcome::Added(root));
            } else {
                outcomes.push(AddDirOutcome::AlreadyPresent(root));
            }
        }

        outcomes
    }
}
