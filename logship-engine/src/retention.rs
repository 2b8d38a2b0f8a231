use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use logship_core::RetentionPolicy;
use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine_metrics::LOCAL_DELETE_TOTAL;
use crate::errors::Result;
use crate::events::{EngineEvent, EventBus};
use crate::upload::UploadCoordinator;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Candidate {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// Periodically deletes local files that are already uploaded, oldest first.
///
/// Only files in the `Uploaded` state are candidates; pending, abandoned, gated and the active
/// file are never touched.
#[derive(Debug)]
pub struct RetentionDeleter {
    dir: PathBuf,
    policy: RetentionPolicy,
    coordinator: Arc<UploadCoordinator>,
    events: EventBus,
}

impl RetentionDeleter {
    pub(crate) fn new(
        dir: PathBuf,
        policy: RetentionPolicy,
        coordinator: Arc<UploadCoordinator>,
        events: EventBus,
    ) -> Self {
        Self {
            dir,
            policy,
            coordinator,
            events,
        }
    }

    pub(crate) fn start_with_cancel(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.policy.check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_cycle().await {
                            warn!(target = "retention", dir = %self.dir.display(), error = %e, "retention cycle failed");
                        }
                    }
                }
            }
            debug!(target = "retention", "retention task stopped");
        })
    }

    /// Run one cycle and return the number of deleted files.
    pub(crate) async fn run_cycle(&self) -> Result<usize> {
        let candidates = self.collect_candidates().await?;
        if candidates.is_empty() {
            debug!(target = "retention", "no uploaded files eligible for retention");
            return Ok(0);
        }

        let to_delete = select_for_deletion(&self.policy, &candidates, SystemTime::now());
        if to_delete.is_empty() {
            return Ok(0);
        }

        let mut deleted_bytes = 0u64;
        let mut deleted_count = 0usize;
        let mut removed: Vec<String> = Vec::with_capacity(to_delete.len());
        for cand in to_delete {
            match tokio::fs::remove_file(&cand.path).await {
                Ok(()) => {
                    deleted_bytes += cand.size;
                    deleted_count += 1;
                    removed.push(cand.name.clone());
                    counter!(LOCAL_DELETE_TOTAL.name).increment(1);
                    info!(target = "retention", file = %cand.name, size = cand.size, "deleted uploaded log file");
                    self.events.publish(EngineEvent::FileDeleted {
                        file_name: cand.name.clone(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => removed.push(cand.name),
                Err(e) => {
                    warn!(target = "retention", file = %cand.name, error = %e, "failed to delete log file");
                }
            }
        }
        self.coordinator.forget(&removed).await;
        info!(target = "retention", deleted_count, deleted_bytes, "retention cycle completed");
        Ok(deleted_count)
    }

    async fn collect_candidates(&self) -> Result<Vec<Candidate>> {
        let mut out = Vec::new();
        for name in self.coordinator.uploaded_files() {
            let path = self.dir.join(&name);
            let meta = match tokio::fs::metadata(&path).await {
                Ok(m) => m,
                Err(_) => continue,
            };
            out.push(Candidate {
                name,
                path,
                size: meta.len(),
                modified: meta.modified().ok(),
            });
        }
        // names embed a zero-padded sequence after the shared unique id
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }
}

/// Apply the age rule, then the total size rule over what is left, oldest first.
pub(crate) fn select_for_deletion(
    policy: &RetentionPolicy,
    candidates: &[Candidate],
    now: SystemTime,
) -> Vec<Candidate> {
    let mut to_delete: Vec<Candidate> = Vec::new();

    if let Some(max_age) = policy.max_age {
        for cand in candidates {
            if let Some(modified) = cand.modified {
                if now.duration_since(modified).unwrap_or(Duration::ZERO) > max_age {
                    to_delete.push(cand.clone());
                }
            }
        }
    }

    if let Some(limit) = policy.max_total_bytes {
        let remaining: u64 = candidates
            .iter()
            .filter(|c| !to_delete.contains(c))
            .map(|c| c.size)
            .sum();
        if remaining > limit {
            let excess = remaining - limit;
            let mut freed = 0u64;
            for cand in candidates {
                if freed >= excess {
                    break;
                }
                if !to_delete.contains(cand) {
                    to_delete.push(cand.clone());
                    freed += cand.size;
                }
            }
        }
    }

    to_delete
}
