use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, RwLock, Weak};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("failed to read local file: {0}")]
    LocalRead(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("upload rejected: {0}")]
    Rejected(String),
}

/// Capability that moves one finalized local file into remote object storage.
///
/// The engine depends only on this surface. Implementations must not modify or delete the
/// local file; a failed or interrupted upload leaves it exactly as it was.
#[async_trait]
pub trait CloudUploader: Send + Sync {
    async fn upload(&self, local_file: &Path, remote_directory: &str) -> Result<(), UploadError>;
}

/// Optional, non-owning reference to the uploader.
///
/// The owner of the uploader may drop it at any time; a released reference reads as absent.
#[derive(Debug, Default)]
pub struct UploaderSlot {
    inner: RwLock<Option<Weak<dyn CloudUploader>>>,
}

impl UploaderSlot {
    pub fn new(initial: Option<Weak<dyn CloudUploader>>) -> Self {
        Self {
            inner: RwLock::new(initial),
        }
    }

    pub fn attach(&self, uploader: &Arc<dyn CloudUploader>) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(Arc::downgrade(uploader));
    }

    pub fn detach(&self) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }

    /// Upgrade the borrowed reference for the duration of one upload attempt.
    pub fn get(&self) -> Option<Arc<dyn CloudUploader>> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        guard.as_ref().and_then(Weak::upgrade)
    }

    pub fn is_available(&self) -> bool {
        self.get().is_some()
    }
}
