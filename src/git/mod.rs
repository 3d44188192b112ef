//! Local git queries and actions for a fleet of working copies.
//!
//! Git is treated as an oracle: every question (what is HEAD, which paths are
//! dirty, is X an ancestor of Y) is answered by running the `git` binary and
//! parsing its output. Nothing is cached; each call reflects the repository as
//! it is on disk at that moment.
//!
//! - [`process`]: subprocess execution (capture or stream, killed on drop)
//! - [`log`]: decoder for `git rev-list --header` records
//! - [`state`]: HEAD, upstream, canonical root, dirty paths, commit ranges
//! - [`merge`]: fast-forward decisions, ancestry, branch pruning, and the
//!   mutating actions (checkout, fast-forward merge, fetch, ...)

pub mod log;
pub mod merge;
pub mod process;
pub mod state;


use std::io::Write;
use std::path::Path;
use std::process::Output;

use thiserror::Error;

use crate::types::Sha;

pub use log::{LogDecodeError, LogEntry};
pub use merge::{MergeDecision, MergeVerdict, PruneTally};
pub use state::{Commit, WorkTree};

/// Errors from git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The external tool exited with a non-zero status.
    #[error("command failed: {command} ({})\nstderr: {stderr}", describe_status(*status))]
    CommandFailed {
        command: String,
        /// Exit code, or `None` if the process was killed by a signal.
        status: Option<i32>,
        stderr: String,
    },

    /// The external tool could not be launched.
    #[error("failed to launch {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// `git rev-list --header` produced a record that could not be decoded.
    #[error(transparent)]
    LogDecode(#[from] LogDecodeError),

    /// A merge decision was requested for a branch with no tracking reference.
    #[error("branch {branch:?} has no upstream")]
    NoUpstream { branch: String },

    /// `git merge-base --is-ancestor` failed for a reason other than
    /// "not an ancestor" (unknown ref, corrupt repository, ...).
    #[error("ancestor check {ancestor} -> {descendant} failed ({})\nstderr: {stderr}", describe_status(*status))]
    AncestorCheck {
        ancestor: String,
        descendant: String,
        status: Option<i32>,
        stderr: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe_status(status: Option<i32>) -> String {
    match status {
        Some(code) => format!("exit {}", code),
        None => "killed by signal".to_string(),
    }
}

/// Result type for git operations.
pub type GitResult<T> = Result<T, GitError>;

/// Handle on the `git` binary.
///
/// The client holds no repository state; every method takes the working
/// directory it should run in. Cloning is cheap.
#[derive(Debug, Clone, Default)]
pub struct GitClient {
    isolated: bool,
}

const GIT: &str = "git";

impl GitClient {
    /// Creates a client that runs `git` from `PATH` with the user's configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ignores system and global git configuration.
    ///
    /// Fleet commands normally want the user's config (credential helpers,
    /// remotes over ssh), so this is off by default. Tests turn it on to get
    /// reproducible behaviour regardless of the machine.
    pub fn isolated(mut self) -> Self {
        self.isolated = true;
        self
    }

    /// Create a git command in `workdir` with this client's environment.
    pub(crate) fn command(&self, workdir: &Path) -> tokio::process::Command {
        let mut cmd = process::command(workdir, GIT);

        // Never block waiting for credentials on a terminal nobody is watching.
        cmd.env("GIT_TERMINAL_PROMPT", "0");

        if self.isolated {
            cmd.env("GIT_CONFIG_NOSYSTEM", "1");
            cmd.env("GIT_CONFIG_GLOBAL", "/dev/null");
        }

        cmd
    }

    fn describe(&self, args: &[&str]) -> String {
        process::describe(GIT, args)
    }

    /// Run a git command, failing on non-zero exit.
    pub async fn output(&self, workdir: &Path, args: &[&str]) -> GitResult<Output> {
        let mut cmd = self.command(workdir);
        cmd.args(args);
        process::checked(cmd, self.describe(args)).await
    }

    /// Run a git command and return its output whatever the exit status.
    ///
    /// For commands whose exit code is the answer (`merge-base --is-ancestor`,
    /// `rev-parse --verify`).
    pub async fn status(&self, workdir: &Path, args: &[&str]) -> GitResult<Output> {
        let mut cmd = self.command(workdir);
        cmd.args(args);
        process::unchecked(cmd, self.describe(args)).await
    }

    /// Run a git command and return stdout as a trimmed string.
    pub async fn stdout(&self, workdir: &Path, args: &[&str]) -> GitResult<String> {
        let output = self.output(workdir, args).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Run a git command, forwarding its output line by line to `sink`.
    pub async fn stream<W>(&self, workdir: &Path, args: &[&str], sink: &mut W) -> GitResult<()>
    where
        W: Write + Send,
    {
        let mut cmd = self.command(workdir);
        cmd.args(args);
        process::stream_command(cmd, self.describe(args), sink).await
    }

    /// Get the SHA of a revision.
    pub async fn rev_parse(&self, workdir: &Path, rev: &str) -> GitResult<Sha> {
        let sha = self.stdout(workdir, &["rev-parse", rev]).await?;
        Ok(Sha::new(sha))
    }

    /// Returns true if `rev` resolves to an object in the repository.
    pub async fn ref_exists(&self, workdir: &Path, rev: &str) -> GitResult<bool> {
        let output = self
            .status(workdir, &["rev-parse", "--verify", "--quiet", rev])
            .await?;
        Ok(output.status.success())
    }

    /// Get the upstream tracking reference of `branch`, if it has one.
    ///
    /// A missing upstream is reported by git as an error; it is not one here.
    pub async fn upstream_of(&self, workdir: &Path, branch: &str) -> GitResult<Option<String>> {
        let tracking = format!("{}@{{upstream}}", branch);
        let output = self
            .status(workdir, &["rev-parse", "--abbrev-ref", &tracking])
            .await?;
        if !output.status.success() {
            return Ok(None);
        }
        let upstream = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!upstream.is_empty()).then_some(upstream))
    }
}
