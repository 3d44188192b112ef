//! Subprocess execution for external tools.
//!
//! Every command the fleet runs goes through here. Commands are spawned with
//! `kill_on_drop(true)`: when an invocation's deadline expires the executor
//! drops its future, which kills the child and lets tokio reap it. Callers
//! decide concurrency; a single call simply awaits its child.

use std::ffi::OsStr;
use std::io::Write;
use std::path::Path;
use std::process::{Output, Stdio};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use super::{GitError, GitResult};

/// Create a command for `program` running in `workdir`.
///
/// stdin is closed so that tools which would otherwise prompt fail fast.
pub fn command(workdir: &Path, program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    cmd.current_dir(workdir)
        .stdin(Stdio::null())
        .kill_on_drop(true);
    cmd
}

/// Render a command line for error messages.
pub(crate) fn describe(program: impl AsRef<OsStr>, args: &[&str]) -> String {
    let mut s = program.as_ref().to_string_lossy().into_owned();
    for arg in args {
        s.push(' ');
        s.push_str(arg);
    }
    s
}

/// Run `program args...` in `workdir` and capture its output.
///
/// Fails with [`GitError::CommandFailed`] on a non-zero exit and
/// [`GitError::Spawn`] if the program cannot be launched.
pub async fn output(workdir: &Path, program: &str, args: &[&str]) -> GitResult<Output> {
    let mut cmd = command(workdir, program);
    cmd.args(args);
    checked(cmd, describe(program, args)).await
}

/// Run a prepared command, capturing stdout and stderr, without interpreting
/// the exit status.
pub(crate) async fn unchecked(mut cmd: Command, description: String) -> GitResult<Output> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    cmd.output().await.map_err(|source| GitError::Spawn {
        command: description,
        source,
    })
}

/// Run a prepared command and map a non-zero exit to [`GitError::CommandFailed`].
pub(crate) async fn checked(cmd: Command, description: String) -> GitResult<Output> {
    let output = unchecked(cmd, description.clone()).await?;

    if output.status.success() {
        Ok(output)
    } else {
        Err(GitError::CommandFailed {
            command: description,
            status: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
        })
    }
}

/// Run `program args...` in `workdir`, forwarding each line of stdout and
/// stderr to `sink` as it arrives.
pub async fn stream<W>(workdir: &Path, program: &str, args: &[&str], sink: &mut W) -> GitResult<()>
where
    W: Write + Send,
{
    let mut cmd = command(workdir, program);
    cmd.args(args);
    stream_command(cmd, describe(program, args), sink).await
}

/// Streaming counterpart of [`checked`] for a prepared command.
///
/// Lines are forwarded in arrival order; stdout and stderr are interleaved.
/// The captured stderr is kept for the error if the command fails.
pub(crate) async fn stream_command<W>(
    mut cmd: Command,
    description: String,
    sink: &mut W,
) -> GitResult<()>
where
    W: Write + Send,
{
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|source| GitError::Spawn {
        command: description.clone(),
        source,
    })?;

    // Both pipes were requested above, so they are always present.
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return Err(GitError::Io(std::io::Error::other("child pipes missing")));
    };

    let mut out = BufReader::new(stdout).split(b'\n');
    let mut err = BufReader::new(stderr).split(b'\n');
    let (mut out_done, mut err_done) = (false, false);
    let mut captured_stderr = String::new();

    while !(out_done && err_done) {
        tokio::select! {
            segment = out.next_segment(), if !out_done => match segment? {
                Some(line) => {
                    sink.write_all(&line)?;
                    sink.write_all(b"\n")?;
                }
                None => out_done = true,
            },
            segment = err.next_segment(), if !err_done => match segment? {
                Some(line) => {
                    sink.write_all(&line)?;
                    sink.write_all(b"\n")?;
                    captured_stderr.push_str(&String::from_utf8_lossy(&line));
                    captured_stderr.push('\n');
                }
                None => err_done = true,
            },
        }
    }

    let status = child.wait().await?;
    sink.flush()?;

    if status.success() {
        Ok(())
    } else {
        Err(GitError::CommandFailed {
            command: description,
            status: status.code(),
            stderr: captured_stderr.trim_end().to_string(),
        })
    }
}
