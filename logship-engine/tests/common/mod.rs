use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use logship_engine::{
    CloudUploader, FreeSpaceProbe, HostEnvironment, LogShipConfig, LogShipEngine, UploadError,
    UploadPolicy,
};

pub const MIN_FREE: u64 = 1_000;
pub const DEVICE_ID: &str = "test-device";

/// Uploader double: fails the first `fail_first` calls, records successful uploads.
/// With `delay` set every call takes that long before it completes.
#[derive(Default)]
pub struct MockUploader {
    pub fail_first: usize,
    pub delay: Option<Duration>,
    pub calls: AtomicUsize,
    pub uploaded: Mutex<Vec<(String, String)>>,
}

#[allow(dead_code)]
impl MockUploader {
    pub fn failing(fail_first: usize) -> Arc<Self> {
        Arc::new(Self {
            fail_first,
            ..Default::default()
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Default::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn uploaded_names(&self) -> Vec<String> {
        self.uploaded
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }
}

#[async_trait]
impl CloudUploader for MockUploader {
    async fn upload(&self, local_file: &Path, remote_directory: &str) -> Result<(), UploadError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if n < self.fail_first {
            return Err(UploadError::Transport(format!("mock failure {}", n + 1)));
        }
        let name = local_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.uploaded
            .lock()
            .unwrap()
            .push((name, remote_directory.to_string()));
        Ok(())
    }
}

/// Free-space probe returning an adjustable value.
pub struct MockProbe(pub AtomicU64);

#[allow(dead_code)]
impl MockProbe {
    pub fn plenty() -> Arc<Self> {
        Arc::new(Self(AtomicU64::new(MIN_FREE * 1_000)))
    }

    pub fn set(&self, available: u64) {
        self.0.store(available, Ordering::SeqCst);
    }
}

impl FreeSpaceProbe for MockProbe {
    fn available_space(&self, _path: &Path) -> io::Result<u64> {
        Ok(self.0.load(Ordering::SeqCst))
    }
}

/// Test configuration: 1 KiB threshold, 60s interval, fast retries, live free-space reads.
pub fn test_config(root: &Path) -> LogShipConfig {
    let mut cfg = LogShipConfig::for_host(HostEnvironment {
        running_on_simulator: false,
        is_testing: true,
    });
    cfg.log_root = root.to_path_buf();
    cfg.log_directory_name = "logs".to_string();
    cfg.unique_id = Some(DEVICE_ID.to_string());
    cfg.local_file_size_threshold_to_push_to_cloud = 1024;
    cfg.local_file_buffer_write_interval = Duration::from_secs(60);
    cfg.min_file_system_free_space = MIN_FREE;
    cfg.space_check_interval = Duration::ZERO;
    cfg.buffer_flush_bytes = 512;
    cfg.upload = UploadPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
        max_concurrent_uploads: 4,
        tick_interval: Duration::from_millis(10),
        shutdown_timeout: Duration::from_secs(2),
    };
    cfg
}

#[allow(dead_code)]
pub async fn start_engine(cfg: LogShipConfig, probe: Arc<MockProbe>) -> LogShipEngine {
    LogShipEngine::with_config_and_probe(cfg, probe)
        .await
        .expect("engine start")
}

/// Names of the log files currently in `dir`, sorted.
#[allow(dead_code)]
pub fn log_files(dir: &Path) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = std::fs::read_dir(dir)
        .expect("read log dir")
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|x| x == "log").unwrap_or(false))
        .collect();
    out.sort();
    out
}

/// Waits for a condition to be true with timeout
#[allow(dead_code)]
pub async fn wait_for_condition<F>(mut condition: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> bool,
{
    let mut waited = 0u64;
    while waited <= timeout_ms {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += 10;
    }
    false
}
