use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use strings_worker_core::RetryPolicy;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub broker_address: String,
    pub worker_id: Option<String>,
    /// Tasks executed in parallel
    pub concurrency: usize,
    pub heartbeat_interval_secs: u64,
    pub graceful_shutdown_timeout_secs: u64,
    /// Pause between claims when the broker has nothing queued
    pub idle_poll_interval_ms: u64,
    pub extraction: ExtractionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// `strings` binary, looked up on PATH when relative
    pub tool_path: PathBuf,
    /// Wall-clock limit of one tool run unless the task sets its own
    pub timeout_secs: u64,
    pub max_output_bytes: usize,
    pub max_stderr_bytes: usize,
    pub progress_interval_ms: u64,
    /// Used when a task carries no `output_path`
    pub output_dir: PathBuf,
    /// Attempts granted to timeouts and artifact write failures
    pub max_transient_retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            broker_address: "127.0.0.1:6379".to_string(),
            worker_id: None,
            concurrency: 4,
            heartbeat_interval_secs: 15,
            graceful_shutdown_timeout_secs: 60,
            idle_poll_interval_ms: 500,
            extraction: ExtractionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        ExtractionConfig {
            tool_path: PathBuf::from("strings"),
            timeout_secs: 1800,
            max_output_bytes: 32 * 1024 * 1024,
            max_stderr_bytes: 64 * 1024,
            progress_interval_ms: 3000,
            output_dir: PathBuf::from("./output"),
            max_transient_retries: 3,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl ExtractionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_transient_retries)
    }
}

impl WorkerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: WorkerConfig = serde_yaml::from_str(contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker_address.is_empty() {
            return Err(ConfigError::Invalid("broker_address is empty".to_string()));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".to_string()));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.extraction.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "extraction.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.extraction.max_output_bytes == 0 || self.extraction.max_stderr_bytes == 0 {
            return Err(ConfigError::Invalid(
                "extraction output limits must be non-zero".to_string(),
            ));
        }
        if self.extraction.progress_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "extraction.progress_interval_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn generate_worker_id(&self) -> String {
        use std::process;
        use uuid::Uuid;

        if let Some(id) = &self.worker_id {
            return id.clone();
        }

        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());

        let pid = process::id();
        let random = Uuid::new_v4().simple().to_string();

        format!("{}-{}-{}", hostname, pid, &random[..8])
    }
}
