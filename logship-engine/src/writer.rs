use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::disk_guard::DiskSpaceGuard;
use crate::engine_metrics::{
    LOG_APPEND_BYTES_TOTAL, LOG_APPEND_TOTAL, LOG_FILE_ROTATE_TOTAL, LOG_FLUSH_LATENCY_MS,
    LOG_WRITE_ERROR_TOTAL,
};
use crate::errors::Result;
use crate::events::{EngineEvent, EventBus, RotationReason};
use crate::log_file::{ActiveLogFile, SealedLogFile};
use crate::rotation::FileRotationManager;
use crate::upload::UploadCoordinator;

pub(crate) const COMMAND_CHANNEL_CAPACITY: usize = 8192;

/// Commands sent from `LogShipEngine` to the background writer task.
///
/// The writer task is the only owner of the active file, so appends, size rotations, timer
/// rotations and manual rotations are serialized through this one channel.
#[derive(Debug)]
pub(crate) enum LogCommand {
    Append {
        bytes: Vec<u8>,
        ack: oneshot::Sender<Result<()>>,
    },
    Flush(oneshot::Sender<Result<()>>),
    Rotate(oneshot::Sender<Result<Option<SealedLogFile>>>),
    Shutdown(oneshot::Sender<Option<SealedLogFile>>),
}

/// Init parameters for the writer task, fixed for its lifetime.
pub(crate) struct WriterInit {
    pub size_threshold: u64,
    pub write_interval: Duration,
    pub buffer_flush_bytes: usize,
    pub rotation: Arc<FileRotationManager>,
    pub guard: Arc<DiskSpaceGuard>,
    pub coordinator: Arc<UploadCoordinator>,
    pub events: EventBus,
    pub rotations: Arc<AtomicU64>,
}

/// Writer-owned state (no locking). Lives entirely inside the writer task.
///
/// `active` is `None` while logging is suspended: the guard denied space when a new file was due.
struct WriterState {
    active: Option<ActiveLogFile>,
    write_buf: Vec<u8>,
    /// Bytes of the active file, written plus buffered.
    bytes_in_file: u64,
    size_threshold: u64,
    buffer_flush_bytes: usize,
    rotation: Arc<FileRotationManager>,
    guard: Arc<DiskSpaceGuard>,
    coordinator: Arc<UploadCoordinator>,
    events: EventBus,
    rotations: Arc<AtomicU64>,
}

impl WriterState {
    fn new(init: &WriterInit) -> Self {
        let active = match init.guard.check() {
            Ok(_) => Some(init.rotation.open_next()),
            Err(e) => {
                warn!(target = "writer", error = %e, "no log file opened at startup");
                None
            }
        };
        Self {
            active,
            write_buf: Vec::with_capacity(init.buffer_flush_bytes),
            bytes_in_file: 0,
            size_threshold: init.size_threshold,
            buffer_flush_bytes: init.buffer_flush_bytes,
            rotation: init.rotation.clone(),
            guard: init.guard.clone(),
            coordinator: init.coordinator.clone(),
            events: init.events.clone(),
            rotations: init.rotations.clone(),
        }
    }

    /// Buffer one record and apply the size trigger.
    ///
    /// Returns `true` when the interval timer must restart: the append rotated the file, or it
    /// opened a new one after a suspension. A record that cannot be written out is taken back
    /// out of the buffer and the error is returned, so the buffer never holds more than
    /// `buffer_flush_bytes` between appends.
    async fn process_append(&mut self, bytes: &[u8]) -> Result<bool> {
        let mut reopened = false;
        if self.active.is_none() {
            self.guard.check()?;
            self.active = Some(self.rotation.open_next());
            self.bytes_in_file = 0;
            reopened = true;
            info!(target = "writer", "log file reopened after suspension");
        }

        let mark = self.write_buf.len();
        self.write_buf.extend_from_slice(bytes);
        self.bytes_in_file += bytes.len() as u64;
        let size_reached = self.bytes_in_file >= self.size_threshold;

        if size_reached || self.write_buf.len() >= self.buffer_flush_bytes {
            if let Err(e) = self.flush_buffer().await {
                self.write_buf.truncate(mark);
                self.bytes_in_file -= bytes.len() as u64;
                counter!(LOG_WRITE_ERROR_TOTAL.name).increment(1);
                error!(target = "writer", error = %e, size = bytes.len(), "record not written to the log file");
                return Err(e);
            }
        }
        counter!(LOG_APPEND_TOTAL.name).increment(1);
        counter!(LOG_APPEND_BYTES_TOTAL.name).increment(bytes.len() as u64);

        if size_reached {
            // The record is on disk already; a failed rotation is reported and retried on the
            // next trigger.
            return match self.rotate(RotationReason::Size).await {
                Ok(_) => Ok(true),
                Err(e) => {
                    error!(target = "writer", error = %e, "size rotation failed");
                    Ok(reopened)
                }
            };
        }
        Ok(reopened)
    }

    /// Write buffered bytes to the active file.
    async fn flush_buffer(&mut self) -> Result<()> {
        if self.write_buf.is_empty() {
            return Ok(());
        }
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        let started = std::time::Instant::now();
        active.write_all(&self.write_buf).await?;
        histogram!(LOG_FLUSH_LATENCY_MS.name).record(started.elapsed().as_secs_f64() * 1000.0);
        debug!(target = "writer", bytes = self.write_buf.len(), file = %active.id.file_name(), "flushed buffer");
        self.write_buf.clear();
        Ok(())
    }

    /// Seal the active file and, unless shutting down or out of space, open its successor.
    ///
    /// Returns `None` when there was no file to seal, or on shutdown with an empty file. When
    /// buffered bytes cannot be written the active file is kept and the error returned, except
    /// at shutdown where the file is sealed with what already reached the disk.
    async fn rotate(&mut self, reason: RotationReason) -> Result<Option<SealedLogFile>> {
        if self.active.is_none() {
            return Ok(None);
        }
        if let Err(e) = self.flush_buffer().await {
            counter!(LOG_WRITE_ERROR_TOTAL.name).increment(1);
            self.events.publish(EngineEvent::RotationFailed {
                reason,
                error: e.to_string(),
            });
            if reason != RotationReason::Shutdown {
                return Err(e);
            }
            error!(
                target = "writer",
                error = %e,
                lost_bytes = self.write_buf.len(),
                "buffered bytes could not be written before shutdown"
            );
            self.write_buf.clear();
        }
        let Some(active) = self.active.take() else {
            return Ok(None);
        };
        self.bytes_in_file = 0;

        if reason == RotationReason::Shutdown && active.bytes_written == 0 {
            debug!(target = "writer", file = %active.id.file_name(), "empty log file dropped at shutdown");
            return Ok(None);
        }

        let open_next = match reason {
            RotationReason::Shutdown => false,
            _ => match self.guard.check() {
                Ok(_) => true,
                Err(e) => {
                    warn!(target = "writer", error = %e, "rotation without a successor; logging suspended");
                    false
                }
            },
        };

        let rotated = self.rotation.rotate(active, open_next).await;
        self.active = rotated.next;
        let sealed = rotated.sealed;
        if let Some(e) = rotated.sync_error {
            counter!(LOG_WRITE_ERROR_TOTAL.name).increment(1);
            self.events.publish(EngineEvent::WriteFailed {
                file_name: sealed.file_name(),
                error: e.to_string(),
            });
        }

        self.rotations.fetch_add(1, Ordering::AcqRel);
        counter!(LOG_FILE_ROTATE_TOTAL.name, "reason" => reason.as_str()).increment(1);
        info!(
            target = "writer",
            reason = reason.as_str(),
            file = %sealed.file_name(),
            size = sealed.size_bytes,
            "rotated log file"
        );
        self.events.publish(EngineEvent::Rotated {
            file: sealed.clone(),
            reason,
        });

        if !sealed.is_empty() {
            self.coordinator.submit(sealed.clone());
        }
        Ok(Some(sealed))
    }

    /// Interval trigger: resume a suspended writer, otherwise rotate.
    async fn on_tick(&mut self) {
        if self.active.is_none() {
            if self.guard.recheck().is_ok() {
                self.active = Some(self.rotation.open_next());
                self.bytes_in_file = 0;
                info!(target = "writer", "log file reopened after suspension");
            }
            return;
        }
        if self.guard.is_suspended() {
            let _ = self.guard.recheck();
        }
        if let Err(e) = self.rotate(RotationReason::Interval).await {
            error!(target = "writer", error = %e, "interval rotation failed");
        }
    }

    async fn shutdown(&mut self) -> Option<SealedLogFile> {
        match self.rotate(RotationReason::Shutdown).await {
            Ok(sealed) => sealed,
            Err(e) => {
                error!(target = "writer", error = %e, "failed to seal log file on shutdown");
                None
            }
        }
    }
}

/// Background writer task entrypoint.
///
/// One `select!` loop serves both the command channel and the interval timer. The timer is reset
/// on every rotation, so a size rotation and a timer rotation never both fire for one file.
pub(crate) async fn run(init: WriterInit, mut rx: mpsc::Receiver<LogCommand>) {
    let period = init.write_interval;
    let mut state = WriterState::new(&init);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(
        target = "writer",
        threshold = init.size_threshold,
        interval_ms = period.as_millis() as u64,
        buffer_bytes = init.buffer_flush_bytes,
        "writer task started"
    );
    loop {
        tokio::select! {
            cmd = rx.recv() => {
                let Some(cmd) = cmd else {
                    state.shutdown().await;
                    debug!(target = "writer", "command channel closed; writer task exiting");
                    break;
                };
                match cmd {
                    LogCommand::Append { bytes, ack } => {
                        let res = state.process_append(&bytes).await;
                        // rotated, or a new file opened after a suspension
                        if matches!(res, Ok(true)) {
                            ticker.reset();
                        }
                        let _ = ack.send(res.map(|_| ()));
                    }
                    LogCommand::Flush(ack) => {
                        let _ = ack.send(state.flush_buffer().await);
                    }
                    LogCommand::Rotate(ack) => {
                        let res = state.rotate(RotationReason::Manual).await;
                        if matches!(res, Ok(Some(_))) {
                            ticker.reset();
                        }
                        let _ = ack.send(res);
                    }
                    LogCommand::Shutdown(ack) => {
                        let sealed = state.shutdown().await;
                        let _ = ack.send(sealed);
                        debug!(target = "writer", "writer task shutting down");
                        break;
                    }
                }
            }
            _ = ticker.tick() => state.on_tick().await,
        }
    }
}
