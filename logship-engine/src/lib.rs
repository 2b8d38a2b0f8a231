mod errors;
pub use errors::{LogShipError, Result};

// Status events published by background paths
pub mod events;
pub use events::{EngineEvent, RotationReason, UploadGate};

pub mod disk_guard;
pub use disk_guard::{DiskSpaceGuard, FreeSpaceProbe, SysinfoProbe};

mod identity;

pub mod log_file;
pub use log_file::{FileState, LogFileId, SealedLogFile};

pub mod rotation;
pub use rotation::FileRotationManager;

// Background writer task: buffering, size/interval triggers, rotation handoff
mod writer;

pub mod upload;
pub use upload::{PendingUpload, SubmitOutcome, UploadCoordinator, UploadLedger, UploadState};

pub mod retention;
pub use retention::RetentionDeleter;

pub mod cloud;
pub use cloud::{BackendConfig, CloudBackend, LocalBackend, ObjectStoreUploader};

// LogShipEngine: facade wiring guard, writer, rotation, uploads and retention
mod engine;
pub use engine::LogShipEngine;

mod engine_metrics;

pub use logship_core::{
    CloudUploader, ConfigError, HostEnvironment, LoadConfiguration, LogShipConfig,
    RetentionPolicy, UploadError, UploadPolicy,
};

#[cfg(test)]
mod log_file_test;
#[cfg(test)]
mod retention_test;
#[cfg(test)]
mod writer_test;
