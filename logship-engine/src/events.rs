use crate::log_file::SealedLogFile;
use tokio::sync::broadcast;

pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Why the active file was rotated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationReason {
    Size,
    Interval,
    Manual,
    Shutdown,
}

impl RotationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RotationReason::Size => "size",
            RotationReason::Interval => "interval",
            RotationReason::Manual => "manual",
            RotationReason::Shutdown => "shutdown",
        }
    }
}

/// Why a sealed file is kept local only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadGate {
    /// `log_to_cloud` is off.
    CloudDisabled,
    /// Simulated host and `log_to_cloud_on_simulator` is off.
    SimulatorDisabled,
}

/// Status notifications from the background paths of the engine.
///
/// Background failures are never returned to producers; they are published here.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Rotated {
        file: SealedLogFile,
        reason: RotationReason,
    },
    /// Buffered bytes could not be written, so the rotation did not happen. The active file
    /// is kept and the next trigger tries again (at shutdown the file is sealed regardless).
    RotationFailed {
        reason: RotationReason,
        error: String,
    },
    /// A sealed file's final flush or fsync failed; it is still submitted for upload.
    WriteFailed {
        file_name: String,
        error: String,
    },
    LoggingSuspended {
        available: u64,
        required: u64,
    },
    LoggingResumed {
        available: u64,
    },
    UploadSkipped {
        file_name: String,
        gate: UploadGate,
    },
    UploaderUnavailable {
        file_name: String,
    },
    UploadSucceeded {
        file_name: String,
        attempts: u32,
    },
    UploadFailed {
        file_name: String,
        attempt: u32,
        reason: String,
    },
    UploadAbandoned {
        file_name: String,
        attempts: u32,
        reason: String,
    },
    FileDeleted {
        file_name: String,
    },
}

/// Cloneable publisher; sending with no subscribers is not an error.
#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub(crate) fn publish(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}
