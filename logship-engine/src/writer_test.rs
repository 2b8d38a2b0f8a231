use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use logship_core::{UploadPolicy, UploaderSlot};
use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::disk_guard::{DiskSpaceGuard, FreeSpaceProbe};
use crate::errors::Result;
use crate::events::{EngineEvent, EventBus, RotationReason};
use crate::log_file::SealedLogFile;
use crate::rotation::FileRotationManager;
use crate::upload::coordinator::CoordinatorInit;
use crate::upload::ledger::{LedgerStore, LEDGER_FILE};
use crate::upload::UploadCoordinator;
use crate::writer::{run, LogCommand, WriterInit};

const MIN_FREE: u64 = 1_000;

struct AdjustableProbe(AtomicU64);

impl FreeSpaceProbe for AdjustableProbe {
    fn available_space(&self, _path: &Path) -> io::Result<u64> {
        Ok(self.0.load(Ordering::SeqCst))
    }
}

struct Harness {
    tx: mpsc::Sender<LogCommand>,
    events: broadcast::Receiver<EngineEvent>,
    rotations: Arc<AtomicU64>,
    probe: Arc<AdjustableProbe>,
    handle: JoinHandle<()>,
    tmp: TempDir,
}

impl Harness {
    async fn start(threshold: u64, interval: Duration) -> Self {
        let tmp = TempDir::new().expect("temp dir");
        let events = EventBus::new();
        let rx_events = events.subscribe();
        let probe = Arc::new(AdjustableProbe(AtomicU64::new(MIN_FREE * 10)));
        let guard = Arc::new(DiskSpaceGuard::new(
            tmp.path().to_path_buf(),
            MIN_FREE,
            probe.clone(),
            Duration::ZERO,
            events.clone(),
        ));
        let (rotation, _) = FileRotationManager::open(tmp.path(), "dev")
            .await
            .expect("rotation manager");
        let ledger = Arc::new(LedgerStore::load(tmp.path().join(LEDGER_FILE)).await);
        let coordinator = Arc::new(UploadCoordinator::new(
            CoordinatorInit {
                log_to_cloud: false,
                running_on_simulator: false,
                log_to_cloud_on_simulator: false,
                remote_directory: "logs/dev".to_string(),
                delete_after_upload: false,
                policy: UploadPolicy::default(),
            },
            UploaderSlot::default(),
            ledger,
            events.clone(),
        ));
        let rotations = Arc::new(AtomicU64::new(0));
        let init = WriterInit {
            size_threshold: threshold,
            write_interval: interval,
            buffer_flush_bytes: 256,
            rotation: Arc::new(rotation),
            guard,
            coordinator,
            events,
            rotations: rotations.clone(),
        };
        let (tx, rx) = mpsc::channel(64);
        let handle = tokio::spawn(run(init, rx));
        Self {
            tx,
            events: rx_events,
            rotations,
            probe,
            handle,
            tmp,
        }
    }

    async fn append(&self, bytes: &[u8]) -> Result<()> {
        let (ack, rx) = oneshot::channel();
        self.tx
            .send(LogCommand::Append {
                bytes: bytes.to_vec(),
                ack,
            })
            .await
            .expect("writer alive");
        rx.await.expect("ack")
    }

    async fn rotate(&self) -> Result<Option<SealedLogFile>> {
        let (ack, rx) = oneshot::channel();
        self.tx.send(LogCommand::Rotate(ack)).await.expect("writer alive");
        rx.await.expect("ack")
    }

    async fn flush(&self) -> Result<()> {
        let (ack, rx) = oneshot::channel();
        self.tx.send(LogCommand::Flush(ack)).await.expect("writer alive");
        rx.await.expect("ack")
    }

    async fn shutdown(self) -> (Option<SealedLogFile>, TempDir) {
        let (ack, rx) = oneshot::channel();
        self.tx.send(LogCommand::Shutdown(ack)).await.expect("writer alive");
        let sealed = rx.await.expect("ack");
        self.handle.await.expect("writer task");
        (sealed, self.tmp)
    }

    fn rotated_events(&mut self) -> Vec<(SealedLogFile, RotationReason)> {
        let mut out = Vec::new();
        while let Ok(ev) = self.events.try_recv() {
            if let EngineEvent::Rotated { file, reason } = ev {
                out.push((file, reason));
            }
        }
        out
    }

    fn log_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.tmp.path())
            .expect("read dir")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".log"))
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test: A burst crossing the size threshold rotates exactly once
    ///
    /// Purpose
    /// - Size trigger fires at the crossing point and only once; records are neither lost nor
    ///   duplicated across the rotation boundary
    ///
    /// Flow
    /// - threshold = 1024 bytes, interval = 60s
    /// - Append 20 records of 100 bytes (2000 bytes), then shut down
    ///
    /// Expected
    /// - Exactly one size rotation, sealing 1100 bytes (11 records)
    /// - The shutdown file holds the remaining 900 bytes; the concatenation equals the input
    #[tokio::test]
    async fn test_size_trigger_rotates_once_for_burst() {
        let mut h = Harness::start(1024, Duration::from_secs(60)).await;
        let mut expected = Vec::new();
        for i in 0..20u8 {
            let rec = vec![b'a' + i; 100];
            expected.extend_from_slice(&rec);
            h.append(&rec).await.expect("append");
        }
        assert_eq!(h.rotations.load(Ordering::SeqCst), 1);
        let rotated = h.rotated_events();
        assert_eq!(rotated.len(), 1);
        assert_eq!(rotated[0].1, RotationReason::Size);
        assert_eq!(rotated[0].0.size_bytes, 1100);

        let first = rotated[0].0.path.clone();
        let (last, _tmp) = h.shutdown().await;
        let last = last.expect("final file sealed");
        assert_eq!(last.size_bytes, 900);

        let mut content = tokio::fs::read(&first).await.expect("read first");
        content.extend(tokio::fs::read(&last.path).await.expect("read last"));
        assert_eq!(content, expected);
    }

    /// Test: One oversized append rotates once, not twice
    #[tokio::test]
    async fn test_single_large_append_rotates_once() {
        let mut h = Harness::start(1024, Duration::from_secs(60)).await;
        h.append(&[7u8; 2000]).await.expect("append");
        assert_eq!(h.rotations.load(Ordering::SeqCst), 1);
        let rotated = h.rotated_events();
        assert_eq!(rotated.len(), 1);
        assert_eq!(rotated[0].0.size_bytes, 2000);
        let (last, _tmp) = h.shutdown().await;
        assert!(last.is_none(), "successor is empty");
    }

    /// Test: Interval trigger rotates under zero ingestion
    ///
    /// Purpose
    /// - The timer fires once per interval boundary even when nothing is appended
    ///
    /// Flow
    /// - interval = 300ms, no appends, wait 450ms
    ///
    /// Expected
    /// - Exactly one interval rotation of an empty file; no OS file is created for it
    #[tokio::test]
    async fn test_interval_rotation_without_ingestion() {
        let mut h = Harness::start(1024, Duration::from_millis(300)).await;
        tokio::time::sleep(Duration::from_millis(450)).await;
        assert_eq!(h.rotations.load(Ordering::SeqCst), 1);
        let rotated = h.rotated_events();
        assert_eq!(rotated.len(), 1);
        assert_eq!(rotated[0].1, RotationReason::Interval);
        assert!(rotated[0].0.is_empty());
        assert!(h.log_files().is_empty());
        let _ = h.shutdown().await;
    }

    /// Test: Interval rotation seals buffered data
    #[tokio::test]
    async fn test_interval_rotation_seals_buffered_bytes() {
        let mut h = Harness::start(1024 * 1024, Duration::from_millis(200)).await;
        h.append(b"short line\n").await.expect("append");
        tokio::time::sleep(Duration::from_millis(300)).await;
        let rotated = h.rotated_events();
        assert_eq!(rotated.len(), 1);
        assert_eq!(rotated[0].1, RotationReason::Interval);
        let content = tokio::fs::read(&rotated[0].0.path).await.expect("read");
        assert_eq!(content, b"short line\n");
        let _ = h.shutdown().await;
    }

    /// Test: No new file is opened while storage is exhausted
    ///
    /// Purpose
    /// - The guard is a hard gate before opening a file; appends are rejected, not dropped
    ///
    /// Flow
    /// - Append, drop free space below the minimum, rotate manually, append again
    /// - Restore free space and append once more
    ///
    /// Expected
    /// - Rotation seals the file without a successor; the next append fails with
    ///   StorageExhausted and no file appears on disk
    /// - After recovery the append succeeds into a new file
    #[tokio::test]
    async fn test_exhausted_storage_opens_no_file() {
        let h = Harness::start(1024 * 1024, Duration::from_secs(60)).await;
        h.append(b"before\n").await.expect("append");
        h.probe.0.store(MIN_FREE - 1, Ordering::SeqCst);

        let sealed = h.rotate().await.expect("rotate").expect("sealed");
        assert_eq!(sealed.size_bytes, 7);
        assert_eq!(h.log_files().len(), 1);

        let err = h.append(b"during\n").await.expect_err("must be rejected");
        assert!(err.is_storage_exhausted());
        assert_eq!(h.log_files().len(), 1);
        assert!(h.rotate().await.expect("rotate").is_none());

        h.probe.0.store(MIN_FREE * 10, Ordering::SeqCst);
        h.append(b"after\n").await.expect("append after recovery");
        h.flush().await.expect("flush");
        assert_eq!(h.log_files().len(), 2);
        let _ = h.shutdown().await;
    }

    /// Test: Reopening after a suspension restarts the interval timer
    ///
    /// Purpose
    /// - A file opened by an append after suspension gets a full interval before the timer
    ///   seals it
    ///
    /// Flow
    /// - interval = 400ms; append, exhaust storage, rotate manually (suspends the writer)
    /// - At ~300ms restore free space and append (opens a new file)
    ///
    /// Expected
    /// - No interval rotation at ~550ms; exactly one at ~850ms, sealing the reopened file
    #[tokio::test]
    async fn test_reopen_after_suspension_resets_interval() {
        let mut h = Harness::start(1024 * 1024, Duration::from_millis(400)).await;
        h.append(b"before\n").await.expect("append");
        h.probe.0.store(MIN_FREE - 1, Ordering::SeqCst);
        h.rotate().await.expect("rotate").expect("sealed");

        tokio::time::sleep(Duration::from_millis(300)).await;
        h.probe.0.store(MIN_FREE * 10, Ordering::SeqCst);
        h.append(b"after\n").await.expect("append after recovery");

        tokio::time::sleep(Duration::from_millis(250)).await;
        let interval = |events: &[(SealedLogFile, RotationReason)]| {
            events
                .iter()
                .filter(|(_, r)| *r == RotationReason::Interval)
                .map(|(f, _)| f.size_bytes)
                .collect::<Vec<_>>()
        };
        assert!(interval(&h.rotated_events()).is_empty());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(interval(&h.rotated_events()), vec![6]);
        let _ = h.shutdown().await;
    }

    /// Test: Flush writes buffered bytes without rotating
    #[tokio::test]
    async fn test_flush_writes_without_rotation() {
        let h = Harness::start(1024 * 1024, Duration::from_secs(60)).await;
        h.append(b"abc").await.expect("append");
        assert!(h.log_files().is_empty(), "still buffered");
        h.flush().await.expect("flush");
        let files = h.log_files();
        assert_eq!(files.len(), 1);
        let content = tokio::fs::read(h.tmp.path().join(&files[0])).await.expect("read");
        assert_eq!(content, b"abc");
        assert_eq!(h.rotations.load(Ordering::SeqCst), 0);
        let _ = h.shutdown().await;
    }

    /// Test: Shutdown drops an empty file and seals a written one
    #[tokio::test]
    async fn test_shutdown_sealing() {
        let idle = Harness::start(1024, Duration::from_secs(60)).await;
        let (sealed, _tmp) = idle.shutdown().await;
        assert!(sealed.is_none());

        let h = Harness::start(1024, Duration::from_secs(60)).await;
        h.append(b"tail").await.expect("append");
        let (sealed, _tmp) = h.shutdown().await;
        let sealed = sealed.expect("sealed at shutdown");
        assert_eq!(sealed.size_bytes, 4);
        assert!(sealed.path.exists());
    }
}
