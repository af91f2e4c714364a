pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Environment variable naming the config file directly
pub const CONFIG_PATH_ENV: &str = "INFRAPROC_CONFIG_PATH";

const CANDIDATES: [&str; 2] = ["infraproc.yaml", ".infraproc.yaml"];

/// How a batch of independent commands is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// One after another, in submission order, fail-fast
    #[default]
    Sequential,
    /// One concurrent task per command
    Parallel,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Sequential => write!(f, "sequential"),
            StrategyKind::Parallel => write!(f, "parallel"),
        }
    }
}

impl FromStr for StrategyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sequential" => Ok(StrategyKind::Sequential),
            "parallel" => Ok(StrategyKind::Parallel),
            other => Err(ConfigError::InvalidValue(format!(
                "unknown strategy '{}' (expected sequential or parallel)",
                other
            ))),
        }
    }
}

/// Every option the infrastructure processor recognizes
///
/// Unknown keys are rejected when loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessorConfig {
    /// Batch execution strategy
    pub strategy: StrategyKind,

    /// Seconds to wait between readiness polls
    pub poll_interval_secs: u64,

    /// Upper bound on the readiness wait; unset means no bound
    pub ready_timeout_secs: Option<u64>,

    /// Drop nodes whose creation failed after they were provisioned
    pub rollback_failed_nodes: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Sequential,
            poll_interval_secs: 10,
            ready_timeout_secs: None,
            rollback_failed_nodes: false,
        }
    }
}

impl ProcessorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn ready_timeout(&self) -> Option<Duration> {
        self.ready_timeout_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.ready_timeout_secs == Some(0) {
            return Err(ConfigError::InvalidValue(
                "ready_timeout_secs must be at least 1 (omit it for no timeout)".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Self::parse(content, Path::new("<inline>"))
    }

    /// Load and validate a YAML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::ConfigFileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self> {
        // An empty document means "all defaults"
        let config: ProcessorConfig = if content.trim().is_empty() {
            ProcessorConfig::default()
        } else {
            serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        };
        config.validate()?;
        Ok(config)
    }
}

/// Locate the processor config file
///
/// Search order:
/// 1. `INFRAPROC_CONFIG_PATH` environment variable (must exist if set)
/// 2. Current directory: infraproc.yaml, .infraproc.yaml
/// 3. `~/.config/infraproc/infraproc.yaml`
///
/// Returns `Ok(None)` when no file exists anywhere.
pub fn find_config_file() -> Result<Option<PathBuf>> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(Some(path));
        }
        return Err(ConfigError::ConfigFileNotFound(path));
    }

    let current_dir = std::env::current_dir()?;
    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(Some(path));
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("infraproc").join(CANDIDATES[0]);
        if global_config.exists() {
            return Ok(Some(global_config));
        }
    }

    Ok(None)
}

/// Discover and load the config, falling back to defaults
pub fn load_config() -> Result<ProcessorConfig> {
    match find_config_file()? {
        Some(path) => ProcessorConfig::load(path),
        None => Ok(ProcessorConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    fn test_defaults() {
        let config = ProcessorConfig::default();
        assert_eq!(config.strategy, StrategyKind::Sequential);
        assert_eq!(config.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.ready_timeout(), None);
        assert!(!config.rollback_failed_nodes);
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config = ProcessorConfig::from_yaml_str("strategy: parallel\nready_timeout_secs: 300\n")
            .unwrap();
        assert_eq!(config.strategy, StrategyKind::Parallel);
        assert_eq!(config.poll_interval_secs, 10);
        assert_eq!(config.ready_timeout(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_empty_document_is_default() {
        let config = ProcessorConfig::from_yaml_str("   \n").unwrap();
        assert_eq!(config, ProcessorConfig::default());
    }

    #[test]
    fn test_unknown_option_rejected() {
        let result = ProcessorConfig::from_yaml_str("poll_delay: 5\n");
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let result = ProcessorConfig::from_yaml_str("poll_interval_secs: 0\n");
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("parallel".parse::<StrategyKind>().unwrap(), StrategyKind::Parallel);
        assert!("threads".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = ProcessorConfig::load(temp_dir.path().join("nope.yaml"));
        assert!(matches!(result, Err(ConfigError::ConfigFileNotFound(_))));
    }

    #[test]
    #[serial]
    fn test_find_config_file_env_var() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("custom.yaml");
        fs::write(&config_path, "poll_interval_secs: 2\n").unwrap();

        temp_env::with_var(CONFIG_PATH_ENV, Some(&config_path), || {
            assert_eq!(find_config_file().unwrap(), Some(config_path.clone()));
            assert_eq!(load_config().unwrap().poll_interval_secs, 2);
        });
    }

    #[test]
    #[serial]
    fn test_env_var_to_missing_file_is_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let missing = temp_dir.path().join("missing.yaml");

        temp_env::with_var(CONFIG_PATH_ENV, Some(&missing), || {
            assert!(matches!(
                find_config_file(),
                Err(ConfigError::ConfigFileNotFound(_))
            ));
        });
    }

    #[test]
    #[serial]
    fn test_find_config_file_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();
        fs::write(temp_dir.path().join(".infraproc.yaml"), "strategy: parallel\n").unwrap();

        std::env::set_current_dir(&temp_dir).unwrap();
        let result = temp_env::with_var_unset(CONFIG_PATH_ENV, find_config_file);
        std::env::set_current_dir(original_dir).unwrap();

        assert!(result.unwrap().unwrap().ends_with(".infraproc.yaml"));
    }
}
