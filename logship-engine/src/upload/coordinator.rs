use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use logship_core::{CloudUploader, UploadError, UploadPolicy, UploaderSlot};
use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine_metrics::{
    UPLOAD_BYTES_TOTAL, UPLOAD_FILES_TOTAL, UPLOAD_LATENCY_MS, UPLOAD_SKIPPED_TOTAL,
};
use crate::events::{EngineEvent, EventBus, UploadGate};
use crate::log_file::SealedLogFile;
use crate::upload::ledger::{LedgerStore, UploadLedger};

const UPLOADER_UNAVAILABLE: &str = "uploader unavailable";

/// Upload status of one sealed file.
///
/// `Closed -> Pending -> {Uploaded | Abandoned}`; `Pending` loops through retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadState {
    /// Kept local by the gating policy; never uploaded.
    LocalOnly(UploadGate),
    Pending {
        attempts: u32,
        last_error: Option<String>,
    },
    Uploaded,
    /// Terminal; the local file is kept.
    Abandoned { attempts: u32, reason: String },
}

/// Result of handing a sealed file to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    LocalOnly(UploadGate),
    /// Already uploaded or abandoned in this or an earlier session.
    AlreadySettled,
}

/// A closed file waiting for upload, with its retry bookkeeping.
#[derive(Debug, Clone)]
pub struct PendingUpload {
    pub file: SealedLogFile,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub(crate) next_attempt_at: Instant,
}

impl PendingUpload {
    fn new(file: SealedLogFile) -> Self {
        Self {
            file,
            attempts: 0,
            last_error: None,
            next_attempt_at: Instant::now(),
        }
    }
}

/// Values the coordinator reads from the configuration at construction.
#[derive(Debug, Clone)]
pub(crate) struct CoordinatorInit {
    pub log_to_cloud: bool,
    pub running_on_simulator: bool,
    pub log_to_cloud_on_simulator: bool,
    pub remote_directory: String,
    pub delete_after_upload: bool,
    pub policy: UploadPolicy,
}

type AttemptOutcome = (PendingUpload, Result<(), UploadError>, Duration);

/// Consumes sealed files and drives them through the injected uploader.
///
/// Gating happens synchronously in [`UploadCoordinator::submit`]; all network work runs in the
/// background task started by [`UploadCoordinator::start_with_cancel`]. At most one attempt per
/// file is in flight, so a file's retries are strictly ordered.
#[derive(Debug)]
pub struct UploadCoordinator {
    cfg: CoordinatorInit,
    uploader: UploaderSlot,
    states: DashMap<String, UploadState>,
    ledger: Arc<LedgerStore>,
    events: EventBus,
    queue_tx: mpsc::UnboundedSender<PendingUpload>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<PendingUpload>>>,
}

impl UploadCoordinator {
    pub(crate) fn new(
        cfg: CoordinatorInit,
        uploader: UploaderSlot,
        ledger: Arc<LedgerStore>,
        events: EventBus,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            cfg,
            uploader,
            states: DashMap::new(),
            ledger,
            events,
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
        }
    }

    /// Seed terminal states from a ledger loaded at startup.
    pub(crate) fn restore(&self, ledger: &UploadLedger) {
        for name in &ledger.uploaded {
            self.states.insert(name.clone(), UploadState::Uploaded);
        }
        for (name, reason) in &ledger.abandoned {
            self.states.insert(
                name.clone(),
                UploadState::Abandoned {
                    attempts: self.cfg.policy.max_attempts,
                    reason: reason.clone(),
                },
            );
        }
    }

    pub fn attach_uploader(&self, uploader: &Arc<dyn CloudUploader>) {
        self.uploader.attach(uploader);
        info!(target = "uploader", "cloud uploader attached");
    }

    pub fn detach_uploader(&self) {
        self.uploader.detach();
        info!(target = "uploader", "cloud uploader detached");
    }

    pub fn remote_directory(&self) -> &str {
        &self.cfg.remote_directory
    }

    pub fn state(&self, file_name: &str) -> Option<UploadState> {
        self.states.get(file_name).map(|s| s.value().clone())
    }

    /// File names with their state, for every file still waiting for upload.
    pub fn pending(&self) -> Vec<(String, UploadState)> {
        let mut out: Vec<(String, UploadState)> = self
            .states
            .iter()
            .filter(|e| matches!(e.value(), UploadState::Pending { .. }))
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub(crate) fn uploaded_files(&self) -> Vec<String> {
        self.states
            .iter()
            .filter(|e| matches!(e.value(), UploadState::Uploaded))
            .map(|e| e.key().clone())
            .collect()
    }

    /// Drop state and ledger entries of files removed from the log directory.
    pub(crate) async fn forget(&self, file_names: &[String]) {
        if let Err(e) = self.ledger.forget(file_names).await {
            warn!(target = "uploader", files = file_names.len(), error = %e, "failed to prune upload ledger");
        }
        for name in file_names {
            self.states.remove(name);
        }
    }

    /// Apply the upload gate to `file` and queue it when uploads are allowed.
    pub fn submit(&self, file: SealedLogFile) -> SubmitOutcome {
        let name = file.file_name();
        if let Some(existing) = self.states.get(&name) {
            if matches!(
                existing.value(),
                UploadState::Uploaded | UploadState::Abandoned { .. }
            ) {
                debug!(target = "uploader", file = %name, "file already settled, not re-queued");
                return SubmitOutcome::AlreadySettled;
            }
        }

        if let Some(gate) = self.gate() {
            let gate_label = match gate {
                UploadGate::CloudDisabled => "cloud_disabled",
                UploadGate::SimulatorDisabled => "simulator",
            };
            counter!(UPLOAD_SKIPPED_TOTAL.name, "gate" => gate_label).increment(1);
            debug!(target = "uploader", file = %name, gate = gate_label, "upload gated, file stays local");
            self.states.insert(name.clone(), UploadState::LocalOnly(gate));
            self.events.publish(EngineEvent::UploadSkipped {
                file_name: name,
                gate,
            });
            return SubmitOutcome::LocalOnly(gate);
        }

        self.states.insert(
            name.clone(),
            UploadState::Pending {
                attempts: 0,
                last_error: None,
            },
        );
        if self.queue_tx.send(PendingUpload::new(file)).is_err() {
            warn!(target = "uploader", file = %name, "upload queue closed; file stays pending until next start");
        }
        SubmitOutcome::Queued
    }

    fn gate(&self) -> Option<UploadGate> {
        if !self.cfg.log_to_cloud {
            return Some(UploadGate::CloudDisabled);
        }
        if self.cfg.running_on_simulator && !self.cfg.log_to_cloud_on_simulator {
            return Some(UploadGate::SimulatorDisabled);
        }
        None
    }

    /// Start the background upload loop. Cancelling `cancel` drains the queue, waits for
    /// in-flight uploads up to `shutdown_timeout`, then aborts what is left.
    pub(crate) fn start_with_cancel(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let rx = self
            .queue_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        tokio::spawn(async move {
            let Some(mut rx) = rx else {
                warn!(target = "uploader", "upload loop already started");
                return;
            };
            info!(
                target = "uploader",
                remote_dir = %self.cfg.remote_directory,
                max_attempts = self.cfg.policy.max_attempts,
                max_concurrent = self.cfg.policy.max_concurrent_uploads,
                "upload coordinator started"
            );

            let mut pending: Vec<PendingUpload> = Vec::new();
            let mut inflight: JoinSet<AttemptOutcome> = JoinSet::new();
            let mut ticker = tokio::time::interval(self.cfg.policy.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    Some(p) = rx.recv() => pending.push(p),
                    Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                        self.handle_joined(joined, &mut pending).await;
                    }
                    _ = ticker.tick() => {}
                }
                self.dispatch_ready(&mut pending, &mut inflight);
            }

            self.drain_on_shutdown(&mut rx, pending, inflight).await;
        })
    }

    /// Start attempts for every ready file, up to the concurrency limit, oldest first.
    fn dispatch_ready(&self, pending: &mut Vec<PendingUpload>, inflight: &mut JoinSet<AttemptOutcome>) {
        if pending.is_empty() {
            return;
        }
        let now = Instant::now();

        let Some(uploader) = self.uploader.get() else {
            for p in pending.iter_mut().filter(|p| p.next_attempt_at <= now) {
                if p.last_error.as_deref() != Some(UPLOADER_UNAVAILABLE) {
                    let name = p.file.file_name();
                    debug!(target = "uploader", file = %name, "no uploader attached, upload stays pending");
                    p.last_error = Some(UPLOADER_UNAVAILABLE.to_string());
                    self.states.insert(
                        name.clone(),
                        UploadState::Pending {
                            attempts: p.attempts,
                            last_error: p.last_error.clone(),
                        },
                    );
                    self.events
                        .publish(EngineEvent::UploaderUnavailable { file_name: name });
                }
            }
            return;
        };

        let mut i = 0;
        while i < pending.len() && inflight.len() < self.cfg.policy.max_concurrent_uploads {
            if pending[i].next_attempt_at > now {
                i += 1;
                continue;
            }
            let p = pending.remove(i);
            let uploader = uploader.clone();
            let remote = self.cfg.remote_directory.clone();
            debug!(target = "uploader", file = %p.file.file_name(), attempt = p.attempts + 1, "starting upload attempt");
            inflight.spawn(async move {
                let started = Instant::now();
                let res = uploader.upload(&p.file.path, &remote).await;
                (p, res, started.elapsed())
            });
        }
    }

    async fn handle_joined(
        &self,
        joined: Result<AttemptOutcome, JoinError>,
        pending: &mut Vec<PendingUpload>,
    ) {
        let (mut p, res, elapsed) = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(target = "uploader", error = %e, "upload task failed to complete");
                return;
            }
        };
        histogram!(UPLOAD_LATENCY_MS.name).record(elapsed.as_secs_f64() * 1000.0);
        p.attempts += 1;
        let name = p.file.file_name();

        match res {
            Ok(()) => {
                counter!(UPLOAD_FILES_TOTAL.name, "result" => "ok").increment(1);
                counter!(UPLOAD_BYTES_TOTAL.name).increment(p.file.size_bytes);
                info!(target = "uploader", file = %name, attempts = p.attempts, size = p.file.size_bytes, "uploaded log file");
                self.states.insert(name.clone(), UploadState::Uploaded);
                if let Err(e) = self.ledger.record_uploaded(&name).await {
                    warn!(target = "uploader", file = %name, error = %e, "failed to persist upload ledger");
                }
                self.events.publish(EngineEvent::UploadSucceeded {
                    file_name: name.clone(),
                    attempts: p.attempts,
                });
                if self.cfg.delete_after_upload {
                    match tokio::fs::remove_file(&p.file.path).await {
                        Ok(()) => {
                            debug!(target = "uploader", file = %name, "deleted local copy after upload");
                            self.forget(std::slice::from_ref(&name)).await;
                            self.events
                                .publish(EngineEvent::FileDeleted { file_name: name });
                        }
                        Err(e) => {
                            warn!(target = "uploader", file = %name, error = %e, "failed to delete local copy after upload");
                        }
                    }
                }
            }
            Err(e) => {
                let reason = e.to_string();
                if p.attempts >= self.cfg.policy.max_attempts {
                    counter!(UPLOAD_FILES_TOTAL.name, "result" => "abandoned").increment(1);
                    error!(target = "uploader", file = %name, attempts = p.attempts, error = %reason, "upload abandoned; local file kept");
                    self.states.insert(
                        name.clone(),
                        UploadState::Abandoned {
                            attempts: p.attempts,
                            reason: reason.clone(),
                        },
                    );
                    if let Err(e) = self.ledger.record_abandoned(&name, &reason).await {
                        warn!(target = "uploader", file = %name, error = %e, "failed to persist upload ledger");
                    }
                    self.events.publish(EngineEvent::UploadAbandoned {
                        file_name: name,
                        attempts: p.attempts,
                        reason,
                    });
                } else {
                    counter!(UPLOAD_FILES_TOTAL.name, "result" => "error").increment(1);
                    let backoff = self.cfg.policy.backoff_for(p.attempts);
                    warn!(target = "uploader", file = %name, attempt = p.attempts, backoff_ms = backoff.as_millis() as u64, error = %reason, "upload failed, will retry");
                    p.next_attempt_at = Instant::now() + backoff;
                    p.last_error = Some(reason.clone());
                    self.states.insert(
                        name.clone(),
                        UploadState::Pending {
                            attempts: p.attempts,
                            last_error: Some(reason.clone()),
                        },
                    );
                    self.events.publish(EngineEvent::UploadFailed {
                        file_name: name,
                        attempt: p.attempts,
                        reason,
                    });
                    pending.push(p);
                }
            }
        }
    }

    async fn drain_on_shutdown(
        &self,
        rx: &mut mpsc::UnboundedReceiver<PendingUpload>,
        mut pending: Vec<PendingUpload>,
        mut inflight: JoinSet<AttemptOutcome>,
    ) {
        while let Ok(p) = rx.try_recv() {
            pending.push(p);
        }
        self.dispatch_ready(&mut pending, &mut inflight);

        let deadline = Instant::now() + self.cfg.policy.shutdown_timeout;
        while !inflight.is_empty() {
            match tokio::time::timeout_at(deadline, inflight.join_next()).await {
                Ok(Some(joined)) => {
                    self.handle_joined(joined, &mut pending).await;
                    self.dispatch_ready(&mut pending, &mut inflight);
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        target = "uploader",
                        in_flight = inflight.len(),
                        "shutdown deadline reached; aborting in-flight uploads"
                    );
                    inflight.abort_all();
                    break;
                }
            }
        }
        info!(
            target = "uploader",
            remaining = pending.len(),
            "upload coordinator stopped; remaining files stay local until next start"
        );
    }
}
