use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::warn;

pub(crate) const LOG_FILE_EXTENSION: &str = "log";

/// Lifecycle of one rotation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// Accepting appends.
    Open,
    /// Rotation in progress; buffered bytes are being written out.
    Closing,
    /// Sealed; never written, reused or renamed again.
    Closed,
}

/// Identity of a log file: `<unique_id>-<seq:010>-<created_at_ms>.log`.
///
/// `seq` is strictly increasing per unique id within a directory, so names are distinct
/// and sort in creation order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogFileId {
    pub unique_id: String,
    pub seq: u64,
    pub created_at_ms: u64,
}

impl LogFileId {
    pub fn file_name(&self) -> String {
        format!(
            "{}-{:010}-{}.{}",
            self.unique_id, self.seq, self.created_at_ms, LOG_FILE_EXTENSION
        )
    }

    /// Parse a file name produced by [`LogFileId::file_name`].
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(&format!(".{}", LOG_FILE_EXTENSION))?;
        let mut parts = stem.rsplitn(3, '-');
        let created_at_ms = parts.next()?.parse().ok()?;
        let seq_str = parts.next()?;
        if seq_str.len() < 10 {
            return None;
        }
        let seq = seq_str.parse().ok()?;
        let unique_id = parts.next()?;
        if unique_id.is_empty() {
            return None;
        }
        Some(Self {
            unique_id: unique_id.to_string(),
            seq,
            created_at_ms,
        })
    }
}

/// The file currently receiving records. The OS file is created on the first write.
#[derive(Debug)]
pub(crate) struct ActiveLogFile {
    pub(crate) id: LogFileId,
    pub(crate) path: PathBuf,
    pub(crate) state: FileState,
    /// Bytes already handed to the OS file.
    pub(crate) bytes_written: u64,
    pub(crate) last_write_ms: Option<u64>,
    writer: Option<BufWriter<tokio::fs::File>>,
}

impl ActiveLogFile {
    pub(crate) fn new(id: LogFileId, dir: &Path) -> Self {
        let path = dir.join(id.file_name());
        Self {
            id,
            path,
            state: FileState::Open,
            bytes_written: 0,
            last_write_ms: None,
            writer: None,
        }
    }

    pub(crate) async fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        if self.writer.is_none() {
            self.writer = Some(self.open_for_append().await?);
        }
        if let Some(writer) = self.writer.as_mut() {
            let res = async {
                writer.write_all(bytes).await?;
                writer.flush().await
            }
            .await;
            if let Err(e) = res {
                // reopened on the next write
                self.writer = None;
                return Err(e);
            }
        }
        self.bytes_written += bytes.len() as u64;
        self.last_write_ms = Some(now_ms());
        Ok(())
    }

    /// Open (or reopen) the OS file, recreating the log directory if it was removed.
    async fn open_for_append(&mut self) -> std::io::Result<BufWriter<tokio::fs::File>> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if self.bytes_written > 0 && !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            warn!(
                target = "log_file",
                file = %self.id.file_name(),
                lost_bytes = self.bytes_written,
                "log file vanished while open; starting it over"
            );
            self.bytes_written = 0;
        }
        let f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        Ok(BufWriter::new(f))
    }

    /// Flush and fsync the OS file (if one was created) and close it.
    pub(crate) async fn finish(&mut self) -> std::io::Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().await?;
            writer.get_ref().sync_all().await?;
        }
        Ok(())
    }

    pub(crate) fn into_sealed(self) -> SealedLogFile {
        SealedLogFile {
            id: self.id,
            path: self.path,
            size_bytes: self.bytes_written,
            sealed_at_ms: now_ms(),
        }
    }
}

/// A closed log file, immutable from here on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedLogFile {
    pub id: LogFileId,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub sealed_at_ms: u64,
}

impl SealedLogFile {
    pub fn file_name(&self) -> String {
        self.id.file_name()
    }

    pub fn is_empty(&self) -> bool {
        self.size_bytes == 0
    }
}

pub(crate) fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
