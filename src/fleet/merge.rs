//! Fast-forward every repository to its upstream where that is safe.
//!
//! Per repository:
//!
//! ```text
//! [prune merged branches] -> clean check -> [return to root] -> decision
//!     FastForward -> merge --ff-only -> submodule update
//!     UpToDate    -> nothing to do
//!     otherwise   -> skipped
//! ```
//!
//! Dirty trees are skipped unless `ignore_dirty` is set. A branch without an
//! upstream is a skip, not a failure.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::executor::TaskError;
use crate::git::{Commit, GitError, MergeVerdict};
use crate::types::Sha;

use super::{Fleet, RepoError};

type RepoResult<T> = std::result::Result<T, RepoError>;

/// Options for [`Fleet::merge`].
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    /// Merge even when the work tree has uncommitted or untracked changes.
    pub ignore_dirty: bool,
    /// Delete local branches already merged into every root branch first.
    pub prune_local: bool,
    /// Root branches for pruning.
    pub main_branches: Vec<String>,
    /// Switch to this root branch when the current branch has already been
    /// merged into the root's upstream.
    pub return_to: Option<String>,
}

/// Why a repository was left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Dirty,
    NoUpstream,
    /// Local commits only; nothing to merge.
    Ahead,
    Diverged,
}

/// What happened to HEAD.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeAction {
    FastForwarded { from: Sha, to: Sha },
    UpToDate,
    Skipped(SkipReason),
}

/// Result of merging one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    pub repo: PathBuf,
    /// Branches deleted by pruning.
    pub pruned: Vec<String>,
    /// Root branch checked out before merging, if any.
    pub returned_to: Option<String>,
    pub action: MergeAction,
}

/// Outcomes of a merge run.
///
/// Repositories that failed, timed out, or were never reached have no
/// outcome; `error` holds the first failure.
#[derive(Debug, Default)]
pub struct MergeReport {
    pub outcomes: Vec<MergeOutcome>,
    pub error: Option<TaskError<RepoError>>,
}

impl MergeReport {
    pub fn into_result(self) -> super::Result<Vec<MergeOutcome>> {
        match self.error {
            Some(e) => Err(e.into()),
            None => Ok(self.outcomes),
        }
    }
}

impl Fleet {
    /// Fast-forward each repository's checked-out branch to its upstream.
    #[instrument(skip_all, fields(paths = paths.len(), prune = options.prune_local))]
    pub async fn merge(&self, paths: &[PathBuf], options: &MergeOptions) -> MergeReport {
        let roots = self.repo_roots(paths).await;
        let outcomes = Arc::new(Mutex::new(Vec::new()));

        let fleet = self.clone();
        let options = Arc::new(options.clone());
        let sink = outcomes.clone();
        let result = self
            .executor
            .run(roots, move |repo| {
                let (fleet, options, sink) = (fleet.clone(), options.clone(), sink.clone());
                async move {
                    let outcome = fleet.merge_repo(&repo, &options).await?;
                    sink.lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(outcome);
                    Ok::<_, RepoError>(())
                }
            })
            .await;

        let mut outcomes =
            std::mem::take(&mut *outcomes.lock().unwrap_or_else(PoisonError::into_inner));
        outcomes.sort_by(|a, b| a.repo.cmp(&b.repo));

        MergeReport {
            outcomes,
            error: result.err(),
        }
    }

    async fn merge_repo(&self, repo: &Path, options: &MergeOptions) -> RepoResult<MergeOutcome> {
        let at = |e: GitError| RepoError::new(repo, e);
        let mut out = self.writer_for(repo);

        let pruned = if options.prune_local {
            self.prune_local(repo, &options.main_branches, &mut out)
                .await
                .map_err(at)?
        } else {
            Vec::new()
        };

        let outcome = |returned_to: Option<String>, action: MergeAction| MergeOutcome {
            repo: repo.to_path_buf(),
            pruned: pruned.clone(),
            returned_to,
            action,
        };

        let tree = self.client.work_tree(repo).await.map_err(at)?;
        if !tree.is_clean() && !options.ignore_dirty {
            debug!(repo = %repo.display(), dirty = tree.dirty_paths.len(), "skipping dirty work tree");
            return Ok(outcome(None, MergeAction::Skipped(SkipReason::Dirty)));
        }

        let mut current = tree.commit;
        let mut returned_to = None;
        if let Some(root) = &options.return_to
            && self
                .should_return(&current, root)
                .await
                .map_err(at)?
        {
            writeln!(out, "{} is merged, returning to {}", current.branch, root)
                .map_err(|e| at(e.into()))?;
            self.client.checkout(repo, root).await.map_err(at)?;
            current = self.client.head(repo).await.map_err(at)?;
            returned_to = Some(root.clone());
        }

        let decision = match self.client.merge_decision(&current).await {
            Ok(decision) => decision,
            Err(GitError::NoUpstream { branch }) => {
                debug!(repo = %repo.display(), branch = %branch, "no upstream, skipping");
                return Ok(outcome(returned_to, MergeAction::Skipped(SkipReason::NoUpstream)));
            }
            Err(e) => return Err(at(e)),
        };

        let action = match decision.verdict() {
            MergeVerdict::FastForward => {
                writeln!(out, "merging {}", repo.display()).map_err(|e| at(e.into()))?;
                self.client.merge_ff_only(repo, &mut out).await.map_err(at)?;
                self.client
                    .submodule_update(repo, &mut out)
                    .await
                    .map_err(at)?;
                info!(
                    repo = %repo.display(),
                    from = %decision.current.sha.short(),
                    to = %decision.topic.sha.short(),
                    "fast-forwarded"
                );
                MergeAction::FastForwarded {
                    from: decision.current.sha.clone(),
                    to: decision.topic.sha.clone(),
                }
            }
            MergeVerdict::UpToDate => MergeAction::UpToDate,
            MergeVerdict::Ahead => MergeAction::Skipped(SkipReason::Ahead),
            MergeVerdict::Diverged => MergeAction::Skipped(SkipReason::Diverged),
        };

        Ok(outcome(returned_to, action))
    }

    /// Whether HEAD's branch is obsolete and `root` should be checked out.
    ///
    /// A root without an upstream never triggers a return.
    async fn should_return(&self, current: &Commit, root: &str) -> Result<bool, GitError> {
        if current.is_detached() {
            return Ok(false);
        }
        match self
            .client
            .return_target(&current.repo_root, &current.branch, root)
            .await
        {
            Err(GitError::NoUpstream { .. }) => {
                debug!(repo = %current.repo_root.display(), root, "root has no upstream");
                Ok(false)
            }
            other => other,
        }
    }

    /// Delete local branches merged into every resolvable root.
    async fn prune_local<W: Write + Send>(
        &self,
        repo: &Path,
        roots: &[String],
        out: &mut W,
    ) -> Result<Vec<String>, GitError> {
        let tally = self.client.prune_candidates(repo, roots).await?;
        let prunable: Vec<String> = tally.prunable().into_iter().map(str::to_string).collect();

        for branch in &prunable {
            self.client.delete_branch(repo, branch, out).await?;
        }
        if !prunable.is_empty() {
            info!(repo = %repo.display(), branches = ?prunable, "pruned merged branches");
        }
        Ok(prunable)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::fleet;
    use super::*;
    use crate::test_utils::TestRepo;

    fn options() -> MergeOptions {
        MergeOptions {
            main_branches: vec!["main".to_string(), "stable".to_string()],
            ..Default::default()
        }
    }

    async fn merge_one(repo: &TestRepo, options: &MergeOptions) -> MergeOutcome {
        let (fleet, _) = fleet();
        let mut outcomes = fleet
            .merge(&[repo.path().to_path_buf()], options)
            .await
            .into_result()
            .unwrap();
        assert_eq!(outcomes.len(), 1);
        outcomes.remove(0)
    }

    #[tokio::test]
    async fn fast_forwards_behind_repository() {
        let (origin, clone) = TestRepo::with_clone();
        let before = clone.head();
        let tip = origin.commit_file("b.txt", "2", "upstream work");
        clone.git(&["fetch", "-q", "origin"]);

        let outcome = merge_one(&clone, &options()).await;

        assert_eq!(
            outcome.action,
            MergeAction::FastForwarded {
                from: before,
                to: tip.clone()
            }
        );
        assert_eq!(clone.head(), tip);
    }

    #[tokio::test]
    async fn up_to_date_repository_is_untouched() {
        let (_origin, clone) = TestRepo::with_clone();
        let outcome = merge_one(&clone, &options()).await;
        assert_eq!(outcome.action, MergeAction::UpToDate);
    }

    #[tokio::test]
    async fn dirty_repository_is_skipped_unless_ignored() {
        let (origin, clone) = TestRepo::with_clone();
        let before = clone.head();
        let tip = origin.commit_file("b.txt", "2", "upstream work");
        clone.git(&["fetch", "-q", "origin"]);
        std::fs::write(clone.path().join("scratch.txt"), "wip").unwrap();

        let outcome = merge_one(&clone, &options()).await;
        assert_eq!(outcome.action, MergeAction::Skipped(SkipReason::Dirty));
        assert_eq!(clone.head(), before);

        let ignoring = MergeOptions {
            ignore_dirty: true,
            ..options()
        };
        let outcome = merge_one(&clone, &ignoring).await;
        assert!(matches!(outcome.action, MergeAction::FastForwarded { .. }));
        assert_eq!(clone.head(), tip);
    }

    #[tokio::test]
    async fn diverged_repository_is_skipped() {
        let (origin, clone) = TestRepo::with_clone();
        origin.commit_file("b.txt", "2", "upstream work");
        let local = clone.commit_file("c.txt", "3", "local work");
        clone.git(&["fetch", "-q", "origin"]);

        let outcome = merge_one(&clone, &options()).await;
        assert_eq!(outcome.action, MergeAction::Skipped(SkipReason::Diverged));
        assert_eq!(clone.head(), local);
    }

    #[tokio::test]
    async fn missing_upstream_is_a_skip() {
        let repo = TestRepo::new();
        repo.commit_file("a.txt", "1", "first");
        let outcome = merge_one(&repo, &options()).await;
        assert_eq!(outcome.action, MergeAction::Skipped(SkipReason::NoUpstream));
    }

    #[tokio::test]
    async fn detached_head_is_left_alone() {
        let (origin, clone) = TestRepo::with_clone();
        origin.commit_file("b.txt", "2", "upstream work");
        clone.git(&["fetch", "-q", "origin"]);
        let tip = clone.head();
        clone.git(&["checkout", "-q", "--detach"]);

        let options = MergeOptions {
            return_to: Some("main".to_string()),
            ..options()
        };
        let outcome = merge_one(&clone, &options).await;
        assert_eq!(outcome.action, MergeAction::Skipped(SkipReason::NoUpstream));
        assert_eq!(outcome.returned_to, None);
        assert_eq!(clone.head(), tip);
    }

    #[tokio::test]
    async fn prune_local_spares_branches_checked_out_elsewhere() {
        let (_origin, clone) = TestRepo::with_clone();
        clone.git(&["branch", "stable"]);
        clone.git(&["branch", "in-use"]);
        let other = tempfile::TempDir::new().unwrap();
        let wt = other.path().join("wt");
        clone.git(&["worktree", "add", "-q", wt.to_str().unwrap(), "in-use"]);

        let options = MergeOptions {
            prune_local: true,
            ..options()
        };
        let outcome = merge_one(&clone, &options).await;
        assert!(outcome.pruned.is_empty(), "pruned {:?}", outcome.pruned);
        assert_eq!(outcome.action, MergeAction::UpToDate);
        assert!(clone.git(&["branch", "--list", "in-use"]).contains("in-use"));
    }

    #[tokio::test]
    async fn prune_local_deletes_fully_merged_branches() {
        let (_origin, clone) = TestRepo::with_clone();
        clone.git(&["branch", "stable"]);
        clone.git(&["branch", "merged-everywhere"]);
        clone.branch("unmerged");
        clone.commit_file("u.txt", "u", "unmerged work");
        clone.checkout("main");

        let pruning = MergeOptions {
            prune_local: true,
            ..options()
        };
        let outcome = merge_one(&clone, &pruning).await;

        assert_eq!(outcome.pruned, vec!["merged-everywhere"]);
        let branches = clone.git(&["branch", "--format=%(refname:short)"]);
        assert!(!branches.contains("merged-everywhere"));
        assert!(branches.contains("unmerged"));
        assert!(branches.contains("stable"));
    }

    #[tokio::test]
    async fn return_to_root_then_fast_forward() {
        let (origin, clone) = TestRepo::with_clone();
        clone.branch("feature");
        let feature_tip = clone.commit_file("f.txt", "f", "feature work");

        // The feature lands upstream, followed by more work.
        origin.git(&["fetch", "-q", clone.path().to_str().unwrap(), "feature"]);
        origin.git(&["merge", "-q", "--ff-only", feature_tip.as_str()]);
        let tip = origin.commit_file("g.txt", "g", "more upstream work");
        clone.git(&["fetch", "-q", "origin"]);

        let returning = MergeOptions {
            return_to: Some("main".to_string()),
            ..options()
        };
        let outcome = merge_one(&clone, &returning).await;

        assert_eq!(outcome.returned_to.as_deref(), Some("main"));
        assert!(matches!(outcome.action, MergeAction::FastForwarded { .. }));
        assert_eq!(clone.git(&["rev-parse", "--abbrev-ref", "HEAD"]), "main");
        assert_eq!(clone.head(), tip);
    }

    #[tokio::test]
    async fn return_to_keeps_unmerged_branch() {
        let (_origin, clone) = TestRepo::with_clone();
        clone.branch("feature");
        clone.commit_file("f.txt", "f", "feature work");

        let returning = MergeOptions {
            return_to: Some("main".to_string()),
            ..options()
        };
        let outcome = merge_one(&clone, &returning).await;

        assert_eq!(outcome.returned_to, None);
        assert_eq!(outcome.action, MergeAction::Skipped(SkipReason::NoUpstream));
        assert_eq!(clone.git(&["rev-parse", "--abbrev-ref", "HEAD"]), "feature");
    }

    #[tokio::test]
    async fn outcomes_cover_every_repository_once() {
        let (_o1, a) = TestRepo::with_clone();
        let (_o2, b) = TestRepo::with_clone();
        let (fleet, _) = fleet();

        let report = fleet
            .merge(
                &[
                    a.path().to_path_buf(),
                    b.path().to_path_buf(),
                    a.path().to_path_buf(),
                ],
                &options(),
            )
            .await;

        assert!(report.error.is_none());
        let mut repos: Vec<&Path> = report.outcomes.iter().map(|o| o.repo.as_path()).collect();
        repos.sort();
        let mut expected = vec![a.path(), b.path()];
        expected.sort();
        assert_eq!(repos, expected);
    }
}
