use std::path::Path;

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::errors::LogShipError;

pub(crate) const INSTALLATION_ID_FILE: &str = ".installation_id";

/// Resolve the identity used in file names and the remote directory.
///
/// An explicit id wins. Otherwise a per-installation UUID is read from `<dir>/.installation_id`,
/// created on first use. Test runs get a fresh id that is not persisted.
pub(crate) async fn resolve_unique_id(
    explicit: Option<&str>,
    dir: &Path,
    is_testing: bool,
) -> Result<String, LogShipError> {
    if let Some(id) = explicit.map(sanitize).filter(|id| !id.is_empty()) {
        return Ok(id);
    }

    let path = dir.join(INSTALLATION_ID_FILE);
    match tokio::fs::read_to_string(&path).await {
        Ok(existing) => {
            let id = sanitize(existing.trim());
            if !id.is_empty() {
                debug!(target = "identity", id = %id, "using persisted installation id");
                return Ok(id);
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let id = uuid::Uuid::new_v4().to_string();
    if is_testing {
        debug!(target = "identity", id = %id, "testing run: installation id not persisted");
        return Ok(id);
    }

    let tmp = path.with_extension("tmp");
    let mut f = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)
        .await?;
    f.write_all(id.as_bytes()).await?;
    f.flush().await?;
    f.sync_all().await?;
    tokio::fs::rename(&tmp, &path).await?;
    info!(target = "identity", id = %id, path = %path.display(), "created installation id");
    Ok(id)
}

/// Keep only characters that are safe in file names and object keys.
pub(crate) fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}
