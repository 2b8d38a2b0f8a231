use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::errors::LogShipError;

pub(crate) const LEDGER_FILE: &str = "upload.ledger";

/// Durable record of upload outcomes, so a restart neither re-uploads nor retries terminal files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadLedger {
    pub uploaded: BTreeSet<String>,
    /// file name -> last failure reason
    pub abandoned: BTreeMap<String, String>,
    pub updated_at: u64,
}

impl UploadLedger {
    /// Atomically write the ledger with `bincode` via tmp+rename.
    pub async fn write_to_path(&self, path: &Path) -> Result<(), LogShipError> {
        let bytes = bincode::serialize(self)
            .map_err(|e| LogShipError::Ledger(format!("ledger serialize failed: {}", e)))?;
        let tmp = path.with_extension("ledger.tmp");
        let mut f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)
            .await
            .map_err(|e| LogShipError::Ledger(format!("open ledger tmp failed: {}", e)))?;
        f.write_all(&bytes)
            .await
            .map_err(|e| LogShipError::Ledger(format!("write ledger failed: {}", e)))?;
        f.flush()
            .await
            .map_err(|e| LogShipError::Ledger(format!("flush ledger failed: {}", e)))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| LogShipError::Ledger(format!("rename ledger failed: {}", e)))?;
        debug!(target = "ledger", path = %path.display(), size = bytes.len(), "wrote upload ledger");
        Ok(())
    }

    pub async fn read_from_path(path: &Path) -> Result<Option<Self>, LogShipError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let ledger: UploadLedger = bincode::deserialize(&bytes)
                    .map_err(|e| LogShipError::Ledger(format!("ledger parse failed: {}", e)))?;
                Ok(Some(ledger))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LogShipError::Ledger(format!("read ledger failed: {}", e))),
        }
    }
}

/// In-memory ledger with write-through persistence. Writes are serialized by the mutex.
#[derive(Debug)]
pub(crate) struct LedgerStore {
    path: PathBuf,
    state: Mutex<UploadLedger>,
}

impl LedgerStore {
    /// Load the ledger at `path`; an unreadable ledger is replaced by an empty one.
    pub(crate) async fn load(path: PathBuf) -> Self {
        let ledger = match UploadLedger::read_from_path(&path).await {
            Ok(Some(l)) => l,
            Ok(None) => UploadLedger::default(),
            Err(e) => {
                warn!(target = "ledger", path = %path.display(), error = %e, "discarding unreadable upload ledger");
                UploadLedger::default()
            }
        };
        Self {
            path,
            state: Mutex::new(ledger),
        }
    }

    pub(crate) async fn snapshot(&self) -> UploadLedger {
        self.state.lock().await.clone()
    }

    pub(crate) async fn record_uploaded(&self, file_name: &str) -> Result<(), LogShipError> {
        let mut state = self.state.lock().await;
        state.abandoned.remove(file_name);
        state.uploaded.insert(file_name.to_string());
        state.updated_at = crate::log_file::now_ms();
        state.write_to_path(&self.path).await
    }

    pub(crate) async fn record_abandoned(
        &self,
        file_name: &str,
        reason: &str,
    ) -> Result<(), LogShipError> {
        let mut state = self.state.lock().await;
        state
            .abandoned
            .insert(file_name.to_string(), reason.to_string());
        state.updated_at = crate::log_file::now_ms();
        state.write_to_path(&self.path).await
    }

    /// Drop entries for files deleted from the log directory.
    pub(crate) async fn forget(&self, file_names: &[String]) -> Result<(), LogShipError> {
        let mut state = self.state.lock().await;
        let before = state.uploaded.len() + state.abandoned.len();
        for name in file_names {
            state.uploaded.remove(name);
            state.abandoned.remove(name);
        }
        if state.uploaded.len() + state.abandoned.len() == before {
            return Ok(());
        }
        state.updated_at = crate::log_file::now_ms();
        state.write_to_path(&self.path).await
    }

    /// Drop entries for files that no longer exist locally.
    pub(crate) async fn retain_existing(
        &self,
        existing: &HashSet<String>,
    ) -> Result<(), LogShipError> {
        let mut state = self.state.lock().await;
        let before = state.uploaded.len() + state.abandoned.len();
        state.uploaded.retain(|name| existing.contains(name));
        state.abandoned.retain(|name, _| existing.contains(name));
        let after = state.uploaded.len() + state.abandoned.len();
        if after != before {
            state.updated_at = crate::log_file::now_ms();
            state.write_to_path(&self.path).await?;
            debug!(target = "ledger", pruned = before - after, "pruned ledger entries for missing files");
        }
        Ok(())
    }
}
