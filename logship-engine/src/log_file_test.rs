#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::log_file::{ActiveLogFile, FileState, LogFileId};

    fn id(seq: u64) -> LogFileId {
        LogFileId {
            unique_id: "device-7".to_string(),
            seq,
            created_at_ms: 1_700_000_000_000,
        }
    }

    /// Test: File names are zero padded and parse back
    ///
    /// Purpose
    /// - Names must sort in sequence order and be recoverable from a directory scan
    ///
    /// Expected
    /// - `device-7-0000000042-1700000000000.log` and an identical id after parsing
    #[test]
    fn test_file_name_format_and_parse() {
        let name = id(42).file_name();
        assert_eq!(name, "device-7-0000000042-1700000000000.log");
        assert_eq!(LogFileId::parse(&name), Some(id(42)));
        assert!(id(9).file_name() < id(10).file_name());
    }

    /// Test: Foreign files in the log directory are ignored
    #[test]
    fn test_parse_rejects_foreign_names() {
        for name in [
            "upload.ledger",
            ".installation_id",
            "device-7-42-1700000000000.log",
            "device-7-0000000042-abc.log",
            "-0000000042-1700000000000.log",
            "device-7-0000000042-1700000000000.txt",
        ] {
            assert_eq!(LogFileId::parse(name), None, "{} must not parse", name);
        }
    }

    /// Test: The OS file is created on first write only
    ///
    /// Flow
    /// - Create an active file, finish it without writes; create another and write twice
    ///
    /// Expected
    /// - No file for the empty one; the written one holds both writes in order
    #[tokio::test]
    async fn test_active_file_lazy_create_and_append() {
        let tmp = TempDir::new().expect("temp dir");

        let mut empty = ActiveLogFile::new(id(1), tmp.path());
        empty.finish().await.expect("finish empty");
        assert!(!empty.path.exists());
        assert_eq!(empty.state, FileState::Open);

        let mut active = ActiveLogFile::new(id(2), tmp.path());
        active.write_all(b"first\n").await.expect("write");
        active.write_all(b"second\n").await.expect("write");
        active.finish().await.expect("finish");
        assert_eq!(active.bytes_written, 13);
        assert!(active.last_write_ms.is_some());

        let path = active.path.clone();
        let sealed = active.into_sealed();
        assert_eq!(sealed.size_bytes, 13);
        assert!(!sealed.is_empty());
        let content = tokio::fs::read(&path).await.expect("read");
        assert_eq!(content, b"first\nsecond\n");
    }
}
