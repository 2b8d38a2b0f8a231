use std::path::Path;

use async_trait::async_trait;
use logship_core::{CloudUploader, UploadError};
use opendal::Operator;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::cloud::storage_config::BackendConfig;
use crate::errors::LogShipError;

pub(crate) const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// `CloudUploader` writing each sealed file to `<remote_directory>/<file_name>` in an object store.
#[derive(Debug, Clone)]
pub struct ObjectStoreUploader {
    /// Extra prefix for key joining (used by the memory backend)
    root_prefix: String,
    op: Operator,
    chunk_size: usize,
}

impl ObjectStoreUploader {
    pub fn new(cfg: BackendConfig) -> Result<Self, LogShipError> {
        let (op, root_prefix) = cfg.build_operator()?;
        Ok(Self {
            root_prefix,
            op,
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    /// Size of the chunks read from the local file and handed to the object writer.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Read back an uploaded object; `path` is relative to the backend root.
    pub async fn get_object(&self, path: &str) -> Result<Vec<u8>, LogShipError> {
        let key = self.join(path);
        let data = self
            .op
            .read(&key)
            .await
            .map_err(|e| LogShipError::Cloud(format!("cloud get_object {}: {}", key, e)))?;
        Ok(data.to_vec())
    }

    #[inline]
    pub(crate) fn join(&self, path: &str) -> String {
        let p = path.trim_matches('/');
        if self.root_prefix.is_empty() {
            p.to_string()
        } else {
            format!("{}/{}", self.root_prefix.trim_matches('/'), p)
        }
    }
}

#[async_trait]
impl CloudUploader for ObjectStoreUploader {
    async fn upload(&self, local_file: &Path, remote_directory: &str) -> Result<(), UploadError> {
        let file_name = local_file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                UploadError::LocalRead(format!("invalid file name: {}", local_file.display()))
            })?;
        let key = self.join(&format!(
            "{}/{}",
            remote_directory.trim_matches('/'),
            file_name
        ));

        let mut file = tokio::fs::File::open(local_file)
            .await
            .map_err(|e| UploadError::LocalRead(format!("{}: {}", local_file.display(), e)))?;
        let mut writer = self
            .op
            .writer_with(&key)
            .chunk(self.chunk_size)
            .await
            .map_err(|e| UploadError::Transport(format!("cloud writer {}: {}", key, e)))?;

        let mut total = 0u64;
        let mut buf = vec![0u8; self.chunk_size];
        loop {
            let n = file
                .read(&mut buf)
                .await
                .map_err(|e| UploadError::LocalRead(format!("{}: {}", local_file.display(), e)))?;
            if n == 0 {
                break;
            }
            if let Err(e) = writer.write(opendal::Buffer::from(buf[..n].to_vec())).await {
                let _ = writer.abort().await;
                return Err(UploadError::Transport(format!("cloud write {}: {}", key, e)));
            }
            total += n as u64;
        }
        writer
            .close()
            .await
            .map_err(|e| UploadError::Transport(format!("cloud close {}: {}", key, e)))?;
        debug!(target = "cloud_store", key = %key, size = total, "uploaded object");
        Ok(())
    }
}
