use std::path::PathBuf;

use tracing::{debug, instrument};

use crate::git::process;

use super::{Fleet, RepoError, Result};

impl Fleet {
    /// Run `command` in each configured directory.
    ///
    /// Directories are used as configured, without resolving them to
    /// repository roots. An empty command does nothing.
    #[instrument(skip_all, fields(dirs = dirs.len()))]
    pub async fn foreach(&self, dirs: &[PathBuf], command: &[String]) -> Result<()> {
        let Some((program, args)) = command.split_first() else {
            debug!("no command given");
            return Ok(());
        };

        let fleet = self.clone();
        let program = program.clone();
        let args = args.to_vec();
        self.executor
            .run(dirs.to_vec(), move |dir| {
                let (fleet, program, args) = (fleet.clone(), program.clone(), args.clone());
                async move {
                    let mut out = fleet.writer_for(&dir);
                    let args: Vec<&str> = args.iter().map(String::as_str).collect();
                    process::stream(&dir, &program, &args, &mut out)
                        .await
                        .map_err(|e| RepoError::new(&dir, e))
                }
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::super::test_support::fleet;
    use crate::executor::{Executor, ExecutorConfig, TaskError};
    use crate::fleet::{Fleet, FleetError};
    use crate::git::GitClient;
    use crate::output::{Painter, SharedSink};
    use tempfile::TempDir;

    fn cmd(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[tokio::test]
    async fn runs_in_every_directory_with_prefixed_output() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        std::fs::write(a.path().join("marker"), "alpha\n").unwrap();
        std::fs::write(b.path().join("marker"), "beta\n").unwrap();

        let (fleet, captured) = fleet();
        fleet
            .foreach(
                &[a.path().to_path_buf(), b.path().to_path_buf()],
                &cmd(&["cat", "marker"]),
            )
            .await
            .unwrap();

        let text = captured.text();
        let a_name = a.path().file_name().unwrap().to_string_lossy();
        let b_name = b.path().file_name().unwrap().to_string_lossy();
        assert!(text.contains(&format!("{} alpha\n", a_name)), "{}", text);
        assert!(text.contains(&format!("{} beta\n", b_name)), "{}", text);
    }

    #[tokio::test]
    async fn empty_command_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let (fleet, captured) = fleet();
        fleet
            .foreach(&[dir.path().to_path_buf()], &[])
            .await
            .unwrap();
        assert!(captured.text().is_empty());
    }

    #[tokio::test]
    async fn failing_command_is_reported() {
        let dir = TempDir::new().unwrap();
        let (fleet, _) = fleet();
        let err = fleet
            .foreach(&[dir.path().to_path_buf()], &cmd(&["sh", "-c", "exit 3"]))
            .await
            .unwrap_err();
        assert!(
            matches!(err, FleetError::Run(TaskError::Failed(_))),
            "got {:?}",
            err
        );
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let dir = TempDir::new().unwrap();
        let fleet = Fleet::new(
            GitClient::new().isolated(),
            Executor::new(ExecutorConfig::new(Some(Duration::from_millis(200)), 0)),
            SharedSink::new(std::io::sink()),
            Painter::plain(),
        );

        let start = std::time::Instant::now();
        let err = fleet
            .foreach(&[dir.path().to_path_buf()], &cmd(&["sleep", "30"]))
            .await
            .unwrap_err();

        assert!(
            matches!(err, FleetError::Run(TaskError::TimedOut { .. })),
            "got {:?}",
            err
        );
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
