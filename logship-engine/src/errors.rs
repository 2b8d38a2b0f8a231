use logship_core::ConfigError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LogShipError>;

#[derive(Debug, Error)]
pub enum LogShipError {
    /// The disk space guard denied the write; logging is suspended until space recovers.
    #[error("storage exhausted: {available} bytes free, {required} required")]
    StorageExhausted { available: u64, required: u64 },

    #[error("log writer is shut down")]
    WriterClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("cloud store error: {0}")]
    Cloud(String),
}

impl LogShipError {
    pub fn is_storage_exhausted(&self) -> bool {
        matches!(self, LogShipError::StorageExhausted { .. })
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for LogShipError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        LogShipError::WriterClosed
    }
}
