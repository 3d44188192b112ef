//! Fleet configuration: which repositories to operate on, plus defaults.
//!
//! Stored as JSON, by default at `~/.repo-fleet/config.json`:
//!
//! ```json
//! {
//!   "repos": [{ "path": "/home/me/src/tool" }],
//!   "max_concurrent": 8,
//!   "timeout_secs": 300,
//!   "main_branches": ["master", "stable"]
//! }
//! ```
//!
//! Every field is optional. A missing file is an empty configuration.
//! Precedence, lowest first: built-in defaults, the file, environment
//! variables, command-line flags.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::executor::ExecutorConfig;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "REPO_FLEET_CONFIG";
pub const MAX_CONCURRENT_ENV: &str = "REPO_FLEET_MAX_CONCURRENT";
pub const TIMEOUT_ENV: &str = "REPO_FLEET_TIMEOUT_SECS";

pub const DEFAULT_MAX_CONCURRENT: usize = 8;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_MAIN_BRANCHES: [&str; 2] = ["master", "stable"];

/// Errors reading or writing the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value {value:?} for {name}: expected {expected}")]
    InvalidValue {
        name: String,
        value: String,
        expected: &'static str,
    },

    #[error("cannot locate config file: no home directory, set REPO_FLEET_CONFIG")]
    NoHome,
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// A repository in the fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoEntry {
    pub path: PathBuf,
}

/// Contents of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub repos: Vec<RepoEntry>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_branches: Option<Vec<String>>,
}

impl FleetConfig {
    /// Default location: `$REPO_FLEET_CONFIG`, else `.repo-fleet/config.json`
    /// in the user's home directory.
    pub fn default_path() -> Result<PathBuf> {
        default_path_with(
            std::env::var_os(CONFIG_ENV).map(PathBuf::from),
            dirs::home_dir(),
        )
    }

    /// Load the configuration at `path`. A missing file yields the default.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the configuration to `path` as pretty JSON.
    ///
    /// Writes a sibling temporary file and renames it over `path`, so a
    /// reader never sees a half-written file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }

        let mut json = serde_json::to_vec_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        json.push(b'\n');

        let tmp = path.with_extension("json.tmp");
        {
            let mut file = std::fs::File::create(&tmp).map_err(write_err)?;
            file.write_all(&json).map_err(write_err)?;
            file.sync_all().map_err(write_err)?;
        }
        std::fs::rename(&tmp, path).map_err(write_err)?;

        debug!(path = %path.display(), repos = self.repos.len(), "saved config");
        Ok(())
    }

    /// Configured repository paths, in file order.
    pub fn repo_paths(&self) -> Vec<PathBuf> {
        self.repos.iter().map(|r| r.path.clone()).collect()
    }

    /// Returns true if `path` is already listed.
    pub fn contains(&self, path: &Path) -> bool {
        self.repos.iter().any(|r| r.path == path)
    }

    /// Append `path` unless it is already listed. Returns true if added.
    pub fn add_repo(&mut self, path: PathBuf) -> bool {
        if self.contains(&path) {
            return false;
        }
        self.repos.push(RepoEntry { path });
        true
    }

    /// Apply `REPO_FLEET_MAX_CONCURRENT` and `REPO_FLEET_TIMEOUT_SECS`.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|name| std::env::var(name).ok())
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup(MAX_CONCURRENT_ENV) {
            self.max_concurrent = Some(parse_env(MAX_CONCURRENT_ENV, &value, "a count")?);
        }
        if let Some(value) = lookup(TIMEOUT_ENV) {
            self.timeout_secs = Some(parse_env(TIMEOUT_ENV, &value, "whole seconds")?);
        }
        Ok(())
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.unwrap_or(DEFAULT_MAX_CONCURRENT)
    }

    /// Per-repository deadline. Zero counts as unset.
    pub fn timeout(&self) -> Duration {
        self.timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    /// Root branches for pruning and status, most important first.
    pub fn main_branches(&self) -> Vec<String> {
        match &self.main_branches {
            Some(branches) if !branches.is_empty() => branches.clone(),
            _ => DEFAULT_MAIN_BRANCHES.iter().map(|b| b.to_string()).collect(),
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig::new(Some(self.timeout()), self.max_concurrent())
    }
}

fn default_path_with(explicit: Option<PathBuf>, home: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    let home = home.ok_or(ConfigError::NoHome)?;
    Ok(home.join(".repo-fleet").join("config.json"))
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str, expected: &'static str) -> Result<T> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
        expected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn missing_file_is_empty_config() {
        let dir = TempDir::new().unwrap();
        let config = FleetConfig::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, FleetConfig::default());
        assert_eq!(config.max_concurrent(), 8);
        assert_eq!(config.timeout(), Duration::from_secs(300));
        assert_eq!(config.main_branches(), vec!["master", "stable"]);
    }

    #[test]
    fn loads_repos_and_overrides() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"repos":[{"path":"/src/a"},{"path":"/src/b"}],"max_concurrent":2,"main_branches":["main"]}"#,
        )
        .unwrap();

        let config = FleetConfig::load(&path).unwrap();
        assert_eq!(
            config.repo_paths(),
            vec![PathBuf::from("/src/a"), PathBuf::from("/src/b")]
        );
        assert_eq!(config.max_concurrent(), 2);
        assert_eq!(config.timeout(), DEFAULT_TIMEOUT);
        assert_eq!(config.main_branches(), vec!["main"]);
    }

    #[test]
    fn file_with_only_repos_matches_legacy_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"repos":[{"path":"/x"}]}"#).unwrap();
        let config = FleetConfig::load(&path).unwrap();
        assert_eq!(config.repos.len(), 1);
        assert_eq!(config.max_concurrent, None);
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = FleetConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }), "got {:?}", err);
    }

    #[test]
    fn save_then_load_preserves_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = FleetConfig::default();
        assert!(config.add_repo(PathBuf::from("/src/a")));
        assert!(!config.add_repo(PathBuf::from("/src/a")));
        config.timeout_secs = Some(30);
        config.save(&path).unwrap();

        assert_eq!(FleetConfig::load(&path).unwrap(), config);
        assert!(!path.with_extension("json.tmp").exists());

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n  \"repos\""), "not pretty: {}", text);
        assert!(!text.contains("max_concurrent"));
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config = FleetConfig {
            max_concurrent: Some(2),
            ..Default::default()
        };
        config
            .apply_env_with(env(&[
                (MAX_CONCURRENT_ENV, "16"),
                (TIMEOUT_ENV, " 45 "),
            ]))
            .unwrap();
        assert_eq!(config.max_concurrent(), 16);
        assert_eq!(config.timeout(), Duration::from_secs(45));

        let exec = config.executor_config();
        assert_eq!(exec.workers(), 17);
        assert_eq!(exec.timeout(), Duration::from_secs(45));
    }

    #[test]
    fn invalid_environment_value_is_rejected() {
        let mut config = FleetConfig::default();
        let err = config
            .apply_env_with(env(&[(TIMEOUT_ENV, "5m")]))
            .unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref name, .. } if name == TIMEOUT_ENV),
            "got {:?}",
            err
        );
    }

    #[test]
    fn default_path_prefers_explicit_variable() {
        let explicit = default_path_with(
            Some(PathBuf::from("/etc/fleet.json")),
            Some(PathBuf::from("/home/me")),
        )
        .unwrap();
        assert_eq!(explicit, PathBuf::from("/etc/fleet.json"));

        let home = default_path_with(None, Some(PathBuf::from("/home/me"))).unwrap();
        assert_eq!(home, PathBuf::from("/home/me/.repo-fleet/config.json"));

        assert!(matches!(default_path_with(None, None), Err(ConfigError::NoHome)));
    }

    #[test]
    fn zero_timeout_counts_as_unset() {
        let mut config = FleetConfig::default();
        config
            .apply_env_with(env(&[(TIMEOUT_ENV, "0")]))
            .unwrap();
        assert_eq!(config.timeout(), DEFAULT_TIMEOUT);
        assert_eq!(config.executor_config().timeout(), DEFAULT_TIMEOUT);
    }

    #[tokio::test]
    async fn zero_timeout_config_still_runs_work() {
        let config = FleetConfig {
            timeout_secs: Some(0),
            ..Default::default()
        };
        let executor = Executor::new(config.executor_config());
        let result = executor
            .run(vec![1, 2], |_| async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<_, std::io::Error>(())
            })
            .await;
        assert!(result.is_ok(), "got {:?}", result);
    }

    #[test]
    fn empty_main_branches_fall_back_to_defaults() {
        let config = FleetConfig {
            main_branches: Some(Vec::new()),
            ..Default::default()
        };
        assert_eq!(config.main_branches(), vec!["master", "stable"]);
    }
}
