use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::challenge::driver::DriverConfig;
use crate::log_reader::LogReaderConfig;

/// Top-level validator configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ValidatorConfig<ChainServiceConfig> {
    /// Storage for the aggregator store.
    pub storage: StorageConfig,
    /// Settlement-chain connection, adapter-specific.
    pub chain: ChainServiceConfig,
    /// Challenge driver tuning.
    pub challenge: ChallengeConfig,
    /// Log reader tuning.
    pub log_reader: LogReaderSettings,
}

/// Simple storage configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StorageConfig {
    /// Directory for the aggregator store.
    pub path: PathBuf,
}

/// Challenge driver tuning.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChallengeConfig {
    /// Attempts per transaction; only transient failures are retried.
    #[serde(default = "default_submission_attempts")]
    pub max_submission_attempts: u32,
    /// Milliseconds between attempts.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

const fn default_submission_attempts() -> u32 {
    3
}

const fn default_retry_backoff_ms() -> u64 {
    1_000
}

impl From<&ChallengeConfig> for DriverConfig {
    fn from(config: &ChallengeConfig) -> Self {
        DriverConfig {
            max_submission_attempts: config.max_submission_attempts,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

/// Log reader tuning.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LogReaderSettings {
    /// Upper bound on logs per request.
    #[serde(default = "default_max_count")]
    pub max_count: u64,
    /// Milliseconds to wait when the cursor is idle.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

const fn default_max_count() -> u64 {
    100
}

const fn default_poll_interval_ms() -> u64 {
    1_000
}

impl From<&LogReaderSettings> for LogReaderConfig {
    fn from(settings: &LogReaderSettings) -> Self {
        LogReaderConfig {
            max_count: settings.max_count,
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
        }
    }
}

/// Load a TOML config file into any deserializable type.
pub fn from_toml_path<P: AsRef<Path>, R: DeserializeOwned>(path: P) -> anyhow::Result<R> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)?;
    tracing::debug!(
        path = %path.display(),
        bytes = contents.len(),
        "loading validator config"
    );
    Ok(toml::from_str(&contents)?)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct FakeChainConfig {
        rpc_address: String,
        receipt_timeout_seconds: u64,
    }

    /// Round a config through a temp file and the loader.
    fn parse_config(content: &str) -> ValidatorConfig<FakeChainConfig> {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        from_toml_path(file.path()).unwrap()
    }

    #[test]
    fn full_config_parses() {
        let config = parse_config(
            r#"
            [storage]
            path = "/tmp"
            [chain]
            rpc_address = "http://localhost:8545/"
            receipt_timeout_seconds = 90
            [challenge]
            max_submission_attempts = 5
            retry_backoff_ms = 250
            [log_reader]
            max_count = 64
            poll_interval_ms = 500
        "#,
        );

        let expected = ValidatorConfig {
            storage: StorageConfig {
                path: PathBuf::from("/tmp"),
            },
            chain: FakeChainConfig {
                rpc_address: "http://localhost:8545/".to_string(),
                receipt_timeout_seconds: 90,
            },
            challenge: ChallengeConfig {
                max_submission_attempts: 5,
                retry_backoff_ms: 250,
            },
            log_reader: LogReaderSettings {
                max_count: 64,
                poll_interval_ms: 500,
            },
        };
        assert_eq!(config, expected);
    }

    #[test]
    fn omitted_tuning_falls_back_to_defaults() {
        let config = parse_config(
            r#"
            [storage]
            path = "/var/lib/ramp"
            [chain]
            rpc_address = "ws://localhost:8546/"
            receipt_timeout_seconds = 60
            [challenge]
            [log_reader]
        "#,
        );
        assert_eq!(config.challenge.max_submission_attempts, 3);
        assert_eq!(config.log_reader.poll_interval_ms, 1_000);

        let driver: DriverConfig = (&config.challenge).into();
        assert_eq!(driver.retry_backoff, Duration::from_secs(1));
    }
}
