use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::uploader::CloudUploader;

/// Environment variable marking the process as running on a simulated/development host.
pub const SIMULATED_HOST_ENV: &str = "LOGSHIP_SIMULATED_HOST";
/// Environment variable marking the process as a test run of the host application.
pub const TESTING_ENV: &str = "LOGSHIP_TESTING";

pub const DEFAULT_SIZE_THRESHOLD_BYTES: u64 = 1024 * 1024;
pub const DEFAULT_WRITE_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_MIN_FREE_SPACE_BYTES: u64 = 200 * 1024 * 1024;
pub const DEFAULT_LOG_DIRECTORY_NAME: &str = "logs";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Platform facts resolved once, when the configuration is built.
///
/// The engine never reads the process environment itself; it only sees these values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostEnvironment {
    pub running_on_simulator: bool,
    pub is_testing: bool,
}

impl HostEnvironment {
    pub fn detect() -> Self {
        let env = Self {
            running_on_simulator: env_flag(SIMULATED_HOST_ENV),
            is_testing: env_flag(TESTING_ENV),
        };
        debug!(
            target = "config",
            running_on_simulator = env.running_on_simulator,
            is_testing = env.is_testing,
            "host environment detected"
        );
        env
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

pub(crate) fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

/// Retry and concurrency knobs for the upload coordinator.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    /// Total attempts per file before it is marked abandoned.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_concurrent_uploads: usize,
    /// How often the coordinator re-examines pending uploads.
    pub tick_interval: Duration,
    /// How long shutdown waits for in-flight uploads.
    pub shutdown_timeout: Duration,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            max_concurrent_uploads: 4,
            tick_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl UploadPolicy {
    /// Delay before the next attempt after `failed_attempts` failures (1-based), doubling
    /// from `initial_backoff` and capped at `max_backoff`.
    pub fn backoff_for(&self, failed_attempts: u32) -> Duration {
        let exp = failed_attempts.saturating_sub(1).min(31);
        let delay = self.initial_backoff.saturating_mul(1u32 << exp);
        delay.min(self.max_backoff)
    }
}

/// Local cleanup of files that are already durable in the remote store.
///
/// With the default policy files are kept indefinitely.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub delete_after_upload: bool,
    pub max_age: Option<Duration>,
    pub max_total_bytes: Option<u64>,
    pub check_interval: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            delete_after_upload: false,
            max_age: None,
            max_total_bytes: None,
            check_interval: Duration::from_secs(5 * 60),
        }
    }
}

impl RetentionPolicy {
    pub fn is_enabled(&self) -> bool {
        self.max_age.is_some() || self.max_total_bytes.is_some()
    }
}

/// Per-session policy read by every engine component.
#[derive(Debug, Clone)]
pub struct LogShipConfig {
    pub log_to_cloud: bool,
    /// Accumulated bytes after which the active file is rotated and pushed.
    pub local_file_size_threshold_to_push_to_cloud: u64,
    /// Maximum time a file stays open before it is rotated.
    pub local_file_buffer_write_interval: Duration,
    pub unique_id: Option<String>,
    pub min_file_system_free_space: u64,
    pub log_directory_name: String,
    pub log_to_cloud_on_simulator: bool,
    pub is_testing: bool,
    /// Borrowed uploader; a released reference means uploads are unavailable.
    pub cloud_uploader: Option<Weak<dyn CloudUploader>>,
    /// Parent directory of `log_directory_name`.
    pub log_root: PathBuf,
    pub running_on_simulator: bool,
    /// Buffered bytes that force a write to the active file (no rotation).
    pub buffer_flush_bytes: usize,
    /// Maximum age of a cached free-space reading; zero reads the filesystem on every check.
    pub space_check_interval: Duration,
    pub upload: UploadPolicy,
    pub retention: RetentionPolicy,
}

impl Default for LogShipConfig {
    fn default() -> Self {
        Self::for_host(HostEnvironment::detect())
    }
}

impl LogShipConfig {
    /// Default configuration for an explicitly provided host environment.
    pub fn for_host(host: HostEnvironment) -> Self {
        Self {
            log_to_cloud: true,
            local_file_size_threshold_to_push_to_cloud: DEFAULT_SIZE_THRESHOLD_BYTES,
            local_file_buffer_write_interval: DEFAULT_WRITE_INTERVAL,
            unique_id: None,
            min_file_system_free_space: DEFAULT_MIN_FREE_SPACE_BYTES,
            log_directory_name: DEFAULT_LOG_DIRECTORY_NAME.to_string(),
            log_to_cloud_on_simulator: false,
            is_testing: host.is_testing,
            cloud_uploader: None,
            log_root: std::env::temp_dir(),
            running_on_simulator: host.running_on_simulator,
            buffer_flush_bytes: 64 * 1024,
            space_check_interval: Duration::from_secs(1),
            upload: UploadPolicy::default(),
            retention: RetentionPolicy::default(),
        }
    }

    /// Directory holding the local log files.
    pub fn log_dir(&self) -> PathBuf {
        self.log_root.join(&self.log_directory_name)
    }

    /// Keep a non-owning reference to `uploader`.
    pub fn with_cloud_uploader(mut self, uploader: &Arc<dyn CloudUploader>) -> Self {
        self.cloud_uploader = Some(Arc::downgrade(uploader));
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.local_file_size_threshold_to_push_to_cloud == 0 {
            return Err(ConfigError::Invalid(
                "local_file_size_threshold_to_push_to_cloud must be > 0".into(),
            ));
        }
        if self.local_file_buffer_write_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "local_file_buffer_write_interval must be > 0".into(),
            ));
        }
        if self.log_directory_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "log_directory_name must not be empty".into(),
            ));
        }
        if self.upload.max_attempts == 0 {
            return Err(ConfigError::Invalid("upload.max_attempts must be > 0".into()));
        }
        if self.upload.max_concurrent_uploads == 0 {
            return Err(ConfigError::Invalid(
                "upload.max_concurrent_uploads must be > 0".into(),
            ));
        }
        if self.upload.tick_interval.is_zero() {
            return Err(ConfigError::Invalid("upload.tick_interval must be > 0".into()));
        }
        if self.retention.check_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "retention.check_interval must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration as loaded from a YAML file. Absent fields keep their defaults.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfiguration {
    pub log_root: Option<String>,
    pub log_directory_name: Option<String>,
    pub log_to_cloud: Option<bool>,
    pub local_file_size_threshold_to_push_to_cloud: Option<u64>,
    pub local_file_buffer_write_interval_ms: Option<u64>,
    pub unique_id: Option<String>,
    pub min_file_system_free_space: Option<u64>,
    pub log_to_cloud_on_simulator: Option<bool>,
    pub buffer_flush_bytes: Option<usize>,
    pub space_check_interval_ms: Option<u64>,
    pub upload: Option<UploadSection>,
    pub retention: Option<RetentionSection>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSection {
    pub max_attempts: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub max_concurrent_uploads: Option<usize>,
    pub tick_interval_ms: Option<u64>,
    pub shutdown_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionSection {
    pub delete_after_upload: Option<bool>,
    pub max_age_seconds: Option<u64>,
    pub max_total_bytes: Option<u64>,
    pub check_interval_seconds: Option<u64>,
}

/// Implementing the TryFrom trait to transform LoadConfiguration into LogShipConfig
impl TryFrom<LoadConfiguration> for LogShipConfig {
    type Error = ConfigError;

    fn try_from(load: LoadConfiguration) -> Result<Self, Self::Error> {
        let mut cfg = LogShipConfig::default();

        if let Some(root) = load.log_root {
            cfg.log_root = PathBuf::from(root);
        }
        if let Some(name) = load.log_directory_name {
            cfg.log_directory_name = name;
        }
        if let Some(v) = load.log_to_cloud {
            cfg.log_to_cloud = v;
        }
        if let Some(v) = load.local_file_size_threshold_to_push_to_cloud {
            cfg.local_file_size_threshold_to_push_to_cloud = v;
        }
        if let Some(ms) = load.local_file_buffer_write_interval_ms {
            cfg.local_file_buffer_write_interval = Duration::from_millis(ms);
        }
        cfg.unique_id = load.unique_id.filter(|id| !id.trim().is_empty());
        if let Some(v) = load.min_file_system_free_space {
            cfg.min_file_system_free_space = v;
        }
        if let Some(v) = load.log_to_cloud_on_simulator {
            cfg.log_to_cloud_on_simulator = v;
        }
        if let Some(v) = load.buffer_flush_bytes {
            cfg.buffer_flush_bytes = v;
        }
        if let Some(ms) = load.space_check_interval_ms {
            cfg.space_check_interval = Duration::from_millis(ms);
        }

        if let Some(up) = load.upload {
            if let Some(v) = up.max_attempts {
                cfg.upload.max_attempts = v;
            }
            if let Some(ms) = up.initial_backoff_ms {
                cfg.upload.initial_backoff = Duration::from_millis(ms);
            }
            if let Some(ms) = up.max_backoff_ms {
                cfg.upload.max_backoff = Duration::from_millis(ms);
            }
            if let Some(v) = up.max_concurrent_uploads {
                cfg.upload.max_concurrent_uploads = v;
            }
            if let Some(ms) = up.tick_interval_ms {
                cfg.upload.tick_interval = Duration::from_millis(ms);
            }
            if let Some(ms) = up.shutdown_timeout_ms {
                cfg.upload.shutdown_timeout = Duration::from_millis(ms);
            }
        }

        if let Some(ret) = load.retention {
            if let Some(v) = ret.delete_after_upload {
                cfg.retention.delete_after_upload = v;
            }
            cfg.retention.max_age = ret.max_age_seconds.map(Duration::from_secs);
            cfg.retention.max_total_bytes = ret.max_total_bytes;
            if let Some(secs) = ret.check_interval_seconds {
                cfg.retention.check_interval = Duration::from_secs(secs);
            }
        }

        cfg.validate()?;
        Ok(cfg)
    }
}
