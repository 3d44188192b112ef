//! Fast-forward decisions, ancestry checks, and branch pruning.
//!
//! The queries here never change a repository. They answer three questions
//! for the fleet layer:
//!
//! 1. **Can HEAD fast-forward to its upstream?** ([`GitClient::merge_decision`])
//!    Only a strict, non-divergent ancestor may advance; anything else is left
//!    for a human.
//!
//! 2. **Which local branches are safe to delete?** ([`GitClient::prune_candidates`])
//!    A branch qualifies only when it is merged into *every* root branch that
//!    exists in the repository.
//!
//! 3. **Is the current branch obsolete?** ([`GitClient::return_target`])
//!    True when its tip is already contained in the root branch's upstream.
//!
//! The mutating actions the fleet performs after deciding (checkout,
//! `merge --ff-only`, fetch, submodule update, branch deletion) live at the
//! bottom of this module so that every git invocation the fleet makes is
//! defined in one place.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use super::state::Commit;
use super::{GitClient, GitError, GitResult};

/// Outcome of comparing HEAD with its upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeVerdict {
    /// HEAD is a strict ancestor of the upstream tip.
    FastForward,
    /// HEAD already is the upstream tip.
    UpToDate,
    /// HEAD contains the upstream tip plus local commits (nothing to merge).
    Ahead,
    /// Both sides have commits the other lacks.
    Diverged,
}

/// The three commits involved in merging a branch's upstream into it.
///
/// Derived on demand; holds no live handle on the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeDecision {
    /// Merge base of `current` and `topic`.
    pub base: Commit,
    /// Upstream tip.
    pub topic: Commit,
    /// Checked-out commit.
    pub current: Commit,
}

impl MergeDecision {
    /// Can `current` fast-forward to `topic`? i.e. would `git merge --ff-only` move HEAD.
    pub fn can_fast_forward(&self) -> bool {
        self.topic.sha != self.current.sha && self.base.sha == self.current.sha
    }

    /// Classify the relationship between `current` and `topic`.
    pub fn verdict(&self) -> MergeVerdict {
        if self.topic.sha == self.current.sha {
            MergeVerdict::UpToDate
        } else if self.base.sha == self.current.sha {
            MergeVerdict::FastForward
        } else if self.base.sha == self.topic.sha {
            MergeVerdict::Ahead
        } else {
            MergeVerdict::Diverged
        }
    }
}

/// How many root branches each local branch is merged into.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneTally {
    /// Branch name to number of resolvable roots it is merged into.
    /// Root branches themselves are never counted.
    pub counts: BTreeMap<String, usize>,
    /// Roots that exist in the repository, in the order requested.
    pub resolvable_roots: Vec<String>,
}

impl PruneTally {
    /// Returns true if `branch` is merged into every resolvable root.
    ///
    /// With no resolvable roots nothing is prunable.
    pub fn is_prunable(&self, branch: &str) -> bool {
        !self.resolvable_roots.is_empty()
            && self.counts.get(branch) == Some(&self.resolvable_roots.len())
    }

    /// Branches merged into every resolvable root, sorted by name.
    pub fn prunable(&self) -> Vec<&str> {
        self.counts
            .keys()
            .map(String::as_str)
            .filter(|branch| self.is_prunable(branch))
            .collect()
    }
}

impl GitClient {
    /// Compute the merge base of `commit` and its upstream tip.
    ///
    /// Fails with [`GitError::NoUpstream`] when the branch does not track
    /// anything; callers treat that as "skip".
    pub async fn merge_decision(&self, commit: &Commit) -> GitResult<MergeDecision> {
        if !commit.has_upstream() {
            return Err(GitError::NoUpstream {
                branch: commit.branch.clone(),
            });
        }

        let repo = commit.repo_root.as_path();
        let topic_sha = self.rev_parse(repo, &commit.upstream).await?;
        let base_sha = self
            .stdout(
                repo,
                &["merge-base", commit.sha.as_str(), topic_sha.as_str()],
            )
            .await?;

        let decision = MergeDecision {
            base: Commit::detached(base_sha.into(), repo),
            topic: Commit {
                sha: topic_sha,
                branch: commit.upstream.clone(),
                upstream: String::new(),
                repo_root: repo.to_path_buf(),
            },
            current: commit.clone(),
        };

        debug!(
            repo = %repo.display(),
            current = %decision.current.sha.short(),
            topic = %decision.topic.sha.short(),
            base = %decision.base.sha.short(),
            verdict = ?decision.verdict(),
            "computed merge decision"
        );

        Ok(decision)
    }

    /// Check if `ancestor` is an ancestor of (or equal to) `descendant`.
    ///
    /// Exit 0 = is ancestor, exit 1 = not ancestor, anything else is an
    /// [`GitError::AncestorCheck`] error rather than `false`.
    pub async fn is_ancestor(
        &self,
        repo_root: &Path,
        ancestor: &str,
        descendant: &str,
    ) -> GitResult<bool> {
        let output = self
            .status(
                repo_root,
                &["merge-base", "--is-ancestor", ancestor, descendant],
            )
            .await?;

        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            status => Err(GitError::AncestorCheck {
                ancestor: ancestor.to_string(),
                descendant: descendant.to_string(),
                status,
                stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
            }),
        }
    }

    /// Tally which local branches are merged into each of `roots`.
    ///
    /// Roots that do not resolve in this repository are skipped; a branch is
    /// prunable when it is merged into all of the roots that do.
    pub async fn prune_candidates<S: AsRef<str>>(
        &self,
        repo_root: &Path,
        roots: &[S],
    ) -> GitResult<PruneTally> {
        let mut tally = PruneTally::default();

        for root in roots {
            let root = root.as_ref();
            if !self.ref_exists(repo_root, root).await? {
                debug!(repo = %repo_root.display(), root, "root does not resolve, skipping");
                continue;
            }
            tally.resolvable_roots.push(root.to_string());
        }

        for root in &tally.resolvable_roots {
            for branch in self.merged_branches(repo_root, root).await? {
                *tally.counts.entry(branch).or_default() += 1;
            }
        }

        for root in &tally.resolvable_roots {
            tally.counts.remove(root);
        }

        Ok(tally)
    }

    /// Should the caller switch from `current_branch` back to `root`?
    ///
    /// True when `current_branch` is not `root` and its tip is already
    /// contained in `root`'s upstream, meaning the branch has been merged and
    /// is obsolete. Fails with [`GitError::NoUpstream`] if `root` tracks
    /// nothing.
    pub async fn return_target(
        &self,
        repo_root: &Path,
        current_branch: &str,
        root: &str,
    ) -> GitResult<bool> {
        if current_branch == root {
            return Ok(false);
        }

        let Some(root_upstream) = self.upstream_of(repo_root, root).await? else {
            return Err(GitError::NoUpstream {
                branch: root.to_string(),
            });
        };

        self.is_ancestor(repo_root, current_branch, &root_upstream)
            .await
    }

    /// Check out `rev`.
    pub async fn checkout(&self, repo_root: &Path, rev: &str) -> GitResult<()> {
        self.output(repo_root, &["checkout", "--quiet", rev]).await?;
        Ok(())
    }

    /// Fast-forward HEAD to its upstream (`git merge --ff-only`).
    pub async fn merge_ff_only<W: Write + Send>(
        &self,
        repo_root: &Path,
        sink: &mut W,
    ) -> GitResult<()> {
        self.stream(repo_root, &["merge", "--ff-only"], sink).await
    }

    /// Fetch every remote, pruning deleted remote branches.
    pub async fn fetch_all_prune<W: Write + Send>(
        &self,
        repo_root: &Path,
        sink: &mut W,
    ) -> GitResult<()> {
        self.stream(repo_root, &["fetch", "--all", "--prune"], sink)
            .await
    }

    /// Bring submodules in line with the checked-out commit.
    pub async fn submodule_update<W: Write + Send>(
        &self,
        repo_root: &Path,
        sink: &mut W,
    ) -> GitResult<()> {
        self.stream(
            repo_root,
            &["submodule", "update", "--init", "--recursive"],
            sink,
        )
        .await
    }

    /// Delete a fully merged local branch (`git branch -d`).
    pub async fn delete_branch<W: Write + Send>(
        &self,
        repo_root: &Path,
        branch: &str,
        sink: &mut W,
    ) -> GitResult<()> {
        self.stream(repo_root, &["branch", "-d", branch], sink).await
    }
}
