//! Harness configuration
//!
//! Load order:
//! 1. Explicit path (`--config`), errors are fatal
//! 2. `<config_dir>/procbench/config.json` if it exists
//! 3. Built-in defaults
//!
//! `PROCBENCH_METRICS_URL` overrides `metrics_url` in every case.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::ConfigError;
use crate::infra::workspace::RunWorkspace;
use crate::lifecycle::DEFAULT_PRODUCT;
use crate::metrics::sampler::DEFAULT_METRICS_URL;
use crate::metrics::series::SampleSeries;

pub const METRICS_URL_ENV: &str = "PROCBENCH_METRICS_URL";

/// 默认轮询间隔（毫秒）
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// 默认整体超时（秒）
pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 300;

/// 默认优雅停止等待（秒）
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 10;

/// 清理后等待进程退出确认（秒）
pub const DEFAULT_EXIT_WAIT_SECS: u64 = 10;

/// Smallest poll interval a run accepts; a zero period cannot drive a timer
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// File-backed settings shared by every run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub metrics_url: String,
    pub poll_interval_ms: u64,
    pub run_timeout_secs: u64,
    /// Per-request bound on the metrics call; `None` leaves it to the run timeout
    pub sample_timeout_ms: Option<u64>,
    /// Extra attempts per tick before a sampling failure aborts the run
    pub sample_retries: u32,
    pub grace_period_secs: u64,
    pub exit_wait_secs: u64,
    /// Product name embedded in the lifecycle markers
    pub product: String,
    /// Report a predicate timeout as a normal outcome instead of an error
    pub ignore_timeout: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            metrics_url: DEFAULT_METRICS_URL.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            run_timeout_secs: DEFAULT_RUN_TIMEOUT_SECS,
            sample_timeout_ms: None,
            sample_retries: 0,
            grace_period_secs: DEFAULT_GRACE_PERIOD_SECS,
            exit_wait_secs: DEFAULT_EXIT_WAIT_SECS,
            product: DEFAULT_PRODUCT.to_string(),
            ignore_timeout: false,
        }
    }
}

impl HarnessConfig {
    /// `<config_dir>/procbench/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("procbench").join("config.json"))
    }

    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.validate()?;

        if let Ok(url) = std::env::var(METRICS_URL_ENV) {
            if !url.is_empty() {
                debug!(url = %url, "Using metrics URL from environment");
                config.metrics_url = url;
            }
        }
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        debug!(path = %path.display(), "Loaded harness config");
        Ok(config)
    }

    /// Reject values no run can work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "poll_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn sample_timeout(&self) -> Option<Duration> {
        self.sample_timeout_ms.map(Duration::from_millis)
    }
}

/// Completion predicate, evaluated after every sample
pub type Predicate = Box<dyn FnMut(&SampleSeries) -> bool + Send>;

/// Everything needed for one supervised run
pub struct RunConfig {
    /// Executable followed by its arguments
    pub command: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: HashMap<String, String>,
    /// argv[0] seen by the child (Unix only)
    pub arg0: Option<String>,
    pub run_timeout: Duration,
    pub poll_interval: Duration,
    pub grace_period: Duration,
    pub exit_wait: Duration,
    pub sample_retries: u32,
    pub ignore_timeout: bool,
    pub(crate) predicate: Option<Predicate>,
    pub(crate) workspace: Option<RunWorkspace>,
}

impl RunConfig {
    pub fn new(command: Vec<String>) -> Self {
        Self::from_harness(&HarnessConfig::default(), command)
    }

    pub fn from_harness(harness: &HarnessConfig, command: Vec<String>) -> Self {
        Self {
            command,
            working_dir: None,
            env: HashMap::new(),
            arg0: None,
            run_timeout: harness.run_timeout(),
            poll_interval: harness.poll_interval().max(MIN_POLL_INTERVAL),
            grace_period: Duration::from_secs(harness.grace_period_secs),
            exit_wait: Duration::from_secs(harness.exit_wait_secs),
            sample_retries: harness.sample_retries,
            ignore_timeout: harness.ignore_timeout,
            predicate: None,
            workspace: None,
        }
    }

    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: FnMut(&SampleSeries) -> bool + Send + 'static,
    {
        self.predicate = Some(Box::new(predicate));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_arg0(mut self, arg0: impl Into<String>) -> Self {
        self.arg0 = Some(arg0.into());
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    /// Values below [`MIN_POLL_INTERVAL`] are raised to it
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Hand a workspace to the run. It becomes the working directory unless
    /// one was set explicitly, and is removed during cleanup.
    pub fn with_workspace(mut self, workspace: RunWorkspace) -> Self {
        self.workspace = Some(workspace);
        self
    }

    pub fn has_predicate(&self) -> bool {
        self.predicate.is_some()
    }

    pub fn workspace(&self) -> Option<&RunWorkspace> {
        self.workspace.as_ref()
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir
            .as_deref()
            .or_else(|| self.workspace.as_ref().map(|w| w.path()))
    }
}

impl fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("command", &self.command)
            .field("working_dir", &self.working_dir())
            .field("env", &self.env)
            .field("arg0", &self.arg0)
            .field("run_timeout", &self.run_timeout)
            .field("poll_interval", &self.poll_interval)
            .field("grace_period", &self.grace_period)
            .field("exit_wait", &self.exit_wait)
            .field("sample_retries", &self.sample_retries)
            .field("ignore_timeout", &self.ignore_timeout)
            .field("has_predicate", &self.has_predicate())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HarnessConfig::default();
        assert_eq!(config.metrics_url, "http://localhost:24220/api/plugins.json");
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.run_timeout(), Duration::from_secs(300));
        assert_eq!(config.sample_timeout(), None);
        assert_eq!(config.product, "fluentd");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"poll_interval_ms": 250, "sample_timeout_ms": 2000, "product": "td-agent"}"#).unwrap();

        let config = HarnessConfig::from_file(&path).unwrap();

        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.sample_timeout(), Some(Duration::from_secs(2)));
        assert_eq!(config.product, "td-agent");
        assert_eq!(config.run_timeout_secs, DEFAULT_RUN_TIMEOUT_SECS);
    }

    #[test]
    fn test_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();

        assert!(matches!(HarnessConfig::from_file(&path), Err(ConfigError::Parse { .. })));
        assert!(matches!(
            HarnessConfig::load(Some(&dir.path().join("missing.json"))),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"poll_interval_ms": 0}"#).unwrap();

        let err = HarnessConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "poll_interval_ms", .. }));
        assert!(matches!(HarnessConfig::from_file(&path), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_zero_poll_interval_clamped() {
        let harness = HarnessConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        let run = RunConfig::from_harness(&harness, vec!["true".to_string()]);
        assert_eq!(run.poll_interval, MIN_POLL_INTERVAL);

        let run = run.with_poll_interval(Duration::ZERO);
        assert_eq!(run.poll_interval, MIN_POLL_INTERVAL);
    }

    #[test]
    fn test_run_config_from_harness() {
        let harness = HarnessConfig {
            poll_interval_ms: 200,
            grace_period_secs: 3,
            sample_retries: 1,
            ..Default::default()
        };
        let run = RunConfig::from_harness(&harness, vec!["fluentd".to_string()])
            .with_env("BUNDLE_GEMFILE", "/src/Gemfile")
            .with_predicate(|series| series.len() >= 3);

        assert_eq!(run.poll_interval, Duration::from_millis(200));
        assert_eq!(run.grace_period, Duration::from_secs(3));
        assert_eq!(run.sample_retries, 1);
        assert_eq!(run.env.get("BUNDLE_GEMFILE").map(String::as_str), Some("/src/Gemfile"));
        assert!(run.has_predicate());
        assert!(run.working_dir().is_none());
    }

    #[test]
    fn test_workspace_is_working_dir() {
        let workspace = RunWorkspace::create().unwrap();
        let path = workspace.path().to_path_buf();
        let run = RunConfig::new(vec!["true".to_string()]).with_workspace(workspace);
        assert_eq!(run.working_dir(), Some(path.as_path()));

        let run = run.with_working_dir("/tmp");
        assert_eq!(run.working_dir(), Some(Path::new("/tmp")));
    }
}
