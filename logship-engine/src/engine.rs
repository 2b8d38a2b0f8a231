use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use logship_core::{CloudUploader, LogShipConfig, UploaderSlot};
use metrics::counter;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::disk_guard::{DiskSpaceGuard, FreeSpaceProbe, SysinfoProbe};
use crate::engine_metrics::LOG_APPEND_REJECTED_TOTAL;
use crate::errors::{LogShipError, Result};
use crate::events::{EngineEvent, EventBus};
use crate::identity::resolve_unique_id;
use crate::log_file::SealedLogFile;
use crate::retention::RetentionDeleter;
use crate::rotation::FileRotationManager;
use crate::upload::coordinator::CoordinatorInit;
use crate::upload::ledger::{LedgerStore, LEDGER_FILE};
use crate::upload::{UploadCoordinator, UploadState};
use crate::writer::{self, LogCommand, WriterInit, COMMAND_CHANNEL_CAPACITY};

/// Buffers log records into local files, rotates them by size or time and ships sealed files
/// through the attached uploader.
///
/// Cloning is cheap; all clones share one engine. Dropping the last clone without calling
/// [`LogShipEngine::shutdown`] stops background tasks without waiting for uploads.
#[derive(Debug, Clone)]
pub struct LogShipEngine {
    inner: Arc<EngineInner>,
}

#[derive(Debug)]
struct EngineInner {
    log_dir: PathBuf,
    unique_id: String,
    guard: Arc<DiskSpaceGuard>,
    coordinator: Arc<UploadCoordinator>,
    events: EventBus,
    rotations: Arc<AtomicU64>,
    cmd_tx: mpsc::Sender<LogCommand>,
    cancel: CancellationToken,
    // None once shutdown has run
    tasks: Mutex<Option<EngineTasks>>,
}

#[derive(Debug)]
struct EngineTasks {
    writer: JoinHandle<()>,
    uploader: JoinHandle<()>,
    retention: Option<JoinHandle<()>>,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl LogShipEngine {
    /// Start an engine measuring free space with the host's disk list.
    pub async fn with_config(cfg: LogShipConfig) -> Result<Self> {
        Self::with_config_and_probe(cfg, Arc::new(SysinfoProbe)).await
    }

    /// Start an engine with a custom free-space source.
    pub async fn with_config_and_probe(
        cfg: LogShipConfig,
        probe: Arc<dyn FreeSpaceProbe>,
    ) -> Result<Self> {
        cfg.validate()?;
        let log_dir = cfg.log_dir();
        tokio::fs::create_dir_all(&log_dir).await?;

        let unique_id = resolve_unique_id(cfg.unique_id.as_deref(), &log_dir, cfg.is_testing).await?;
        let remote_directory = format!(
            "{}/{}",
            cfg.log_directory_name.trim_matches('/'),
            unique_id
        );
        let events = EventBus::new();

        let (rotation, recovered) = FileRotationManager::open(&log_dir, &unique_id).await?;
        let rotation = Arc::new(rotation);

        let ledger = Arc::new(LedgerStore::load(log_dir.join(LEDGER_FILE)).await);
        let on_disk: HashSet<String> = recovered.iter().map(|f| f.file_name()).collect();
        if let Err(e) = ledger.retain_existing(&on_disk).await {
            warn!(target = "engine", error = %e, "failed to prune upload ledger");
        }

        let coordinator = Arc::new(UploadCoordinator::new(
            CoordinatorInit {
                log_to_cloud: cfg.log_to_cloud,
                running_on_simulator: cfg.running_on_simulator,
                log_to_cloud_on_simulator: cfg.log_to_cloud_on_simulator,
                remote_directory: remote_directory.clone(),
                delete_after_upload: cfg.retention.delete_after_upload,
                policy: cfg.upload.clone(),
            },
            UploaderSlot::new(cfg.cloud_uploader.clone()),
            ledger.clone(),
            events.clone(),
        ));
        coordinator.restore(&ledger.snapshot().await);

        let mut resubmitted = 0usize;
        for file in recovered.into_iter().filter(|f| !f.is_empty()) {
            if coordinator.submit(file) == crate::upload::SubmitOutcome::Queued {
                resubmitted += 1;
            }
        }

        let guard = Arc::new(DiskSpaceGuard::new(
            log_dir.clone(),
            cfg.min_file_system_free_space,
            probe,
            cfg.space_check_interval,
            events.clone(),
        ));

        let cancel = CancellationToken::new();
        let uploader_task = coordinator.clone().start_with_cancel(cancel.child_token());
        let retention_task = if cfg.retention.is_enabled() {
            let deleter = Arc::new(RetentionDeleter::new(
                log_dir.clone(),
                cfg.retention.clone(),
                coordinator.clone(),
                events.clone(),
            ));
            Some(deleter.start_with_cancel(cancel.child_token()))
        } else {
            None
        };

        let rotations = Arc::new(AtomicU64::new(0));
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let init = WriterInit {
            size_threshold: cfg.local_file_size_threshold_to_push_to_cloud,
            write_interval: cfg.local_file_buffer_write_interval,
            buffer_flush_bytes: cfg.buffer_flush_bytes,
            rotation,
            guard: guard.clone(),
            coordinator: coordinator.clone(),
            events: events.clone(),
            rotations: rotations.clone(),
        };
        let writer_task = tokio::spawn(async move {
            writer::run(init, cmd_rx).await;
        });

        info!(
            target = "engine",
            log_dir = %log_dir.display(),
            unique_id = %unique_id,
            remote_dir = %remote_directory,
            size_threshold = cfg.local_file_size_threshold_to_push_to_cloud,
            write_interval_ms = cfg.local_file_buffer_write_interval.as_millis() as u64,
            min_free_space = cfg.min_file_system_free_space,
            log_to_cloud = cfg.log_to_cloud,
            simulator = cfg.running_on_simulator,
            log_to_cloud_on_simulator = cfg.log_to_cloud_on_simulator,
            is_testing = cfg.is_testing,
            resubmitted,
            "logship engine configuration applied"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                log_dir,
                unique_id,
                guard,
                coordinator,
                events,
                rotations,
                cmd_tx,
                cancel,
                tasks: Mutex::new(Some(EngineTasks {
                    writer: writer_task,
                    uploader: uploader_task,
                    retention: retention_task,
                })),
            }),
        })
    }

    /// Append one serialized record to the active file.
    ///
    /// Fails with [`LogShipError::StorageExhausted`] when free space is below the configured
    /// minimum; the record is not written and the caller decides whether to drop it.
    pub async fn append(&self, record: &[u8]) -> Result<()> {
        if let Err(e) = self.inner.guard.check() {
            counter!(LOG_APPEND_REJECTED_TOTAL.name).increment(1);
            return Err(e);
        }
        let (ack, rx) = oneshot::channel();
        self.inner
            .cmd_tx
            .send(LogCommand::Append {
                bytes: record.to_vec(),
                ack,
            })
            .await
            .map_err(|_| LogShipError::WriterClosed)?;
        let res = rx.await?;
        if matches!(res, Err(LogShipError::StorageExhausted { .. })) {
            counter!(LOG_APPEND_REJECTED_TOTAL.name).increment(1);
        }
        res
    }

    /// Write buffered bytes to the active file without rotating it.
    pub async fn flush(&self) -> Result<()> {
        let (ack, rx) = oneshot::channel();
        self.inner
            .cmd_tx
            .send(LogCommand::Flush(ack))
            .await
            .map_err(|_| LogShipError::WriterClosed)?;
        rx.await?
    }

    /// Seal the active file now. Returns the sealed file, or `None` while logging is suspended.
    pub async fn rotate(&self) -> Result<Option<SealedLogFile>> {
        let (ack, rx) = oneshot::channel();
        self.inner
            .cmd_tx
            .send(LogCommand::Rotate(ack))
            .await
            .map_err(|_| LogShipError::WriterClosed)?;
        rx.await?
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    pub fn upload_state(&self, file_name: &str) -> Option<UploadState> {
        self.inner.coordinator.state(file_name)
    }

    pub fn pending_uploads(&self) -> Vec<(String, UploadState)> {
        self.inner.coordinator.pending()
    }

    /// Attach (or replace) the uploader. Only a weak reference is kept.
    pub fn attach_uploader(&self, uploader: &Arc<dyn CloudUploader>) {
        self.inner.coordinator.attach_uploader(uploader);
    }

    pub fn detach_uploader(&self) {
        self.inner.coordinator.detach_uploader();
    }

    pub fn is_logging_suspended(&self) -> bool {
        self.inner.guard.is_suspended()
    }

    /// Number of rotations performed in this session.
    pub fn rotation_count(&self) -> u64 {
        self.inner.rotations.load(Ordering::Acquire)
    }

    pub fn log_dir(&self) -> &Path {
        &self.inner.log_dir
    }

    pub fn unique_id(&self) -> &str {
        &self.inner.unique_id
    }

    pub fn remote_directory(&self) -> &str {
        self.inner.coordinator.remote_directory()
    }

    /// Seal the open file, submit it for upload and stop background tasks.
    ///
    /// In-flight uploads get `upload.shutdown_timeout` to finish; the rest stay on disk and are
    /// picked up on the next start. Calling this again is a no-op returning `None`.
    pub async fn shutdown(&self) -> Result<Option<SealedLogFile>> {
        let mut tasks = self.inner.tasks.lock().await;
        let Some(tasks) = tasks.take() else {
            return Ok(None);
        };

        let (ack, rx) = oneshot::channel();
        let sealed = match self.inner.cmd_tx.send(LogCommand::Shutdown(ack)).await {
            Ok(()) => rx.await.ok().flatten(),
            Err(_) => None,
        };
        if let Err(e) = tasks.writer.await {
            warn!(target = "engine", error = %e, "writer task ended abnormally");
        }

        self.inner.cancel.cancel();
        if let Err(e) = tasks.uploader.await {
            warn!(target = "engine", error = %e, "upload task ended abnormally");
        }
        if let Some(retention) = tasks.retention {
            if let Err(e) = retention.await {
                warn!(target = "engine", error = %e, "retention task ended abnormally");
            }
        }

        info!(
            target = "engine",
            rotations = self.rotation_count(),
            pending = self.inner.coordinator.pending().len(),
            "logship engine stopped"
        );
        Ok(sealed)
    }
}
