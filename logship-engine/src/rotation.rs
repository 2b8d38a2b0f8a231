use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info, warn};

use crate::errors::LogShipError;
use crate::log_file::{now_ms, ActiveLogFile, FileState, LogFileId, SealedLogFile};

/// Maps flush events to concrete file identities and performs the close/open handoff.
///
/// Sequence numbers come from a single atomic counter seeded past every file already in the
/// directory, so identities never collide, even across restarts.
#[derive(Debug)]
pub struct FileRotationManager {
    dir: PathBuf,
    unique_id: String,
    next_seq: AtomicU64,
}

impl FileRotationManager {
    /// Prepare `dir` and return the manager together with files left by earlier sessions,
    /// oldest first. A file that was still open when the process died is treated as sealed.
    pub(crate) async fn open(
        dir: &Path,
        unique_id: &str,
    ) -> Result<(Self, Vec<SealedLogFile>), LogShipError> {
        tokio::fs::create_dir_all(dir).await?;
        let recovered = scan_dir(dir, unique_id).await?;
        let next_seq = recovered.last().map(|f| f.id.seq + 1).unwrap_or(1);
        if !recovered.is_empty() {
            info!(
                target = "rotation",
                dir = %dir.display(),
                recovered = recovered.len(),
                next_seq,
                "recovered log files from previous sessions"
            );
        }
        Ok((
            Self {
                dir: dir.to_path_buf(),
                unique_id: unique_id.to_string(),
                next_seq: AtomicU64::new(next_seq),
            },
            recovered,
        ))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    /// Allocate the next identity and return it as an open file.
    pub(crate) fn open_next(&self) -> ActiveLogFile {
        let seq = self.next_seq.fetch_add(1, Ordering::AcqRel);
        let id = LogFileId {
            unique_id: self.unique_id.clone(),
            seq,
            created_at_ms: now_ms(),
        };
        debug!(target = "rotation", seq, file = %id.file_name(), "opened log file");
        ActiveLogFile::new(id, &self.dir)
    }

    /// Finalize `active`: Open -> Closing -> Closed. The caller has already written out any
    /// buffered bytes.
    ///
    /// The file is Closed even when the final flush or fsync fails: every byte counted in
    /// `bytes_written` was already handed to the OS by `write_all`. The error is returned
    /// alongside for the caller to report.
    pub(crate) async fn seal(&self, mut active: ActiveLogFile) -> (SealedLogFile, Option<io::Error>) {
        active.state = FileState::Closing;
        let sync_error = active.finish().await.err();
        active.state = FileState::Closed;
        let sealed = active.into_sealed();
        match &sync_error {
            None => {
                debug!(target = "rotation", seq = sealed.id.seq, size = sealed.size_bytes, "sealed log file");
            }
            Some(e) => {
                warn!(target = "rotation", file = %sealed.file_name(), error = %e, "log file sealed without a successful sync");
            }
        }
        (sealed, sync_error)
    }

    /// Seal `active` and, when `open_next` is set, hand back the file that replaces it.
    pub(crate) async fn rotate(&self, active: ActiveLogFile, open_next: bool) -> Rotated {
        let (sealed, sync_error) = self.seal(active).await;
        let next = if open_next { Some(self.open_next()) } else { None };
        Rotated {
            next,
            sealed,
            sync_error,
        }
    }
}

/// Outcome of one seal/open handoff.
#[derive(Debug)]
pub(crate) struct Rotated {
    pub next: Option<ActiveLogFile>,
    pub sealed: SealedLogFile,
    pub sync_error: Option<io::Error>,
}

async fn scan_dir(dir: &Path, unique_id: &str) -> Result<Vec<SealedLogFile>, LogShipError> {
    let mut out = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(id) = name.to_str().and_then(LogFileId::parse) else {
            continue;
        };
        if id.unique_id != unique_id {
            continue;
        }
        let meta = match entry.metadata().await {
            Ok(m) if m.is_file() => m,
            _ => continue,
        };
        let sealed_at_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(id.created_at_ms);
        out.push(SealedLogFile {
            path: entry.path(),
            size_bytes: meta.len(),
            sealed_at_ms,
            id,
        });
    }
    out.sort_by_key(|f| f.id.seq);
    Ok(out)
}
