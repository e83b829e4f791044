//! Configuration types for MetaKV
//!
//! All structures deserialize with defaults for missing fields, so a
//! configuration file only needs to name what it overrides.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default number of pairs fetched per scan batch
pub const DEFAULT_SCAN_BATCH_SIZE: usize = 256;

/// Default hard ceiling on the number of pairs one backend scan may return
pub const DEFAULT_MAX_SCAN_LIMIT: usize = 10_240;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "METAKV";

/// Metadata store client configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MetaKvConfig {
    /// Namespace prefix for every key this store touches
    pub root_path: String,
    /// Deadline for each backend transaction or snapshot (milliseconds)
    pub request_timeout_ms: u64,
    /// Operations slower than this are logged (milliseconds)
    pub slow_op_threshold_ms: u64,
    /// Batch size used by prefix scans when the caller gives none
    pub scan_batch_size: usize,
}

impl Default for MetaKvConfig {
    fn default() -> Self {
        Self {
            root_path: "/metakv".to_string(),
            request_timeout_ms: 10_000,
            slow_op_threshold_ms: 2_000,
            scan_batch_size: DEFAULT_SCAN_BATCH_SIZE,
        }
    }
}

impl MetaKvConfig {
    /// Create config rooted at the given path
    pub fn with_root(root_path: impl Into<String>) -> Self {
        Self {
            root_path: root_path.into(),
            ..Default::default()
        }
    }

    /// Load config from a file, with `METAKV__*` environment overrides
    ///
    /// The file format is chosen by extension (TOML, JSON, YAML).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_with_env(path.as_ref(), None)
    }

    /// Load config, reading overrides from `env` instead of the process
    /// environment when given.
    fn load_with_env(path: &Path, env: Option<config::Map<String, String>>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .map_err(|e| Error::configuration(e.to_string()))?;

        let config: Self = settings
            .try_deserialize()
            .map_err(|e| Error::configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no store can run with
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 {
            return Err(Error::configuration("request_timeout_ms must be positive"));
        }
        if self.scan_batch_size == 0 {
            return Err(Error::configuration("scan_batch_size must be positive"));
        }
        Ok(())
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub const fn slow_op_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_op_threshold_ms)
    }
}

/// In-process backend configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MemoryBackendConfig {
    /// Maximum pairs a single scan call may request
    pub max_scan_limit: usize,
}

impl Default for MemoryBackendConfig {
    fn default() -> Self {
        Self {
            max_scan_limit: DEFAULT_MAX_SCAN_LIMIT,
        }
    }
}

/// Redb backend configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RedbBackendConfig {
    /// Database file
    pub path: PathBuf,
    /// Maximum pairs a single scan call may request
    pub max_scan_limit: usize,
}

impl Default for RedbBackendConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/metakv/meta.redb"),
            max_scan_limit: DEFAULT_MAX_SCAN_LIMIT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = MetaKvConfig::default();
        assert_eq!(config.root_path, "/metakv");
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.slow_op_threshold(), Duration::from_secs(2));
        assert_eq!(config.scan_batch_size, DEFAULT_SCAN_BATCH_SIZE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: MetaKvConfig =
            serde_json::from_str(r#"{"root_path": "/by-dev/meta"}"#).unwrap();
        assert_eq!(config.root_path, "/by-dev/meta");
        assert_eq!(config.request_timeout_ms, 10_000);
    }

    #[test]
    fn test_load_from_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "root_path = \"/cluster/meta\"").unwrap();
        writeln!(file, "scan_batch_size = 64").unwrap();

        let config = MetaKvConfig::load(file.path()).unwrap();
        assert_eq!(config.root_path, "/cluster/meta");
        assert_eq!(config.scan_batch_size, 64);
        assert_eq!(config.slow_op_threshold_ms, 2_000);
    }

    #[test]
    fn test_load_env_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "root_path = \"/cluster/meta\"").unwrap();
        writeln!(file, "scan_batch_size = 64").unwrap();

        let env: config::Map<String, String> = [
            ("METAKV__ROOT_PATH", "/from/env"),
            ("METAKV__REQUEST_TIMEOUT_MS", "2500"),
            ("OTHER__SCAN_BATCH_SIZE", "7"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = MetaKvConfig::load_with_env(file.path(), Some(env)).unwrap();
        assert_eq!(config.root_path, "/from/env");
        assert_eq!(config.request_timeout(), Duration::from_millis(2500));
        assert_eq!(config.scan_batch_size, 64);
    }

    #[test]
    fn test_load_env_invalid_value() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "root_path = \"/cluster/meta\"").unwrap();

        let env: config::Map<String, String> =
            [("METAKV__SCAN_BATCH_SIZE".to_string(), "0".to_string())]
                .into_iter()
                .collect();
        let err = MetaKvConfig::load_with_env(file.path(), Some(env)).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_load_rejects_zero_timeout() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "request_timeout_ms = 0").unwrap();

        let err = MetaKvConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_backend_defaults() {
        assert_eq!(MemoryBackendConfig::default().max_scan_limit, DEFAULT_MAX_SCAN_LIMIT);
        assert_eq!(RedbBackendConfig::default().max_scan_limit, DEFAULT_MAX_SCAN_LIMIT);
    }
}
