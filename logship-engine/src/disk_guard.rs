use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sysinfo::Disks;
use tracing::{info, warn};

use crate::errors::LogShipError;
use crate::events::{EngineEvent, EventBus};

/// Source of free-space readings for the volume holding a directory.
pub trait FreeSpaceProbe: Send + Sync {
    fn available_space(&self, path: &Path) -> io::Result<u64>;
}

/// Reads free space from the mounted disk whose mount point is the longest prefix of `path`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoProbe;

impl FreeSpaceProbe for SysinfoProbe {
    fn available_space(&self, path: &Path) -> io::Result<u64> {
        let target = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|d| target.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .map(|d| d.available_space())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no mounted disk found for {}", target.display()),
                )
            })
    }
}

#[derive(Debug, Clone, Copy)]
struct Reading {
    at: Instant,
    available: u64,
}

/// Hard gate in front of every buffered write and every new file.
///
/// A reading is reused for at most `cache_ttl`. A probe error is treated as zero bytes free.
pub struct DiskSpaceGuard {
    dir: PathBuf,
    min_free: u64,
    probe: Arc<dyn FreeSpaceProbe>,
    cache_ttl: Duration,
    last: Mutex<Option<Reading>>,
    suspended: AtomicBool,
    events: EventBus,
}

impl std::fmt::Debug for DiskSpaceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskSpaceGuard")
            .field("dir", &self.dir)
            .field("min_free", &self.min_free)
            .field("suspended", &self.is_suspended())
            .finish()
    }
}

impl DiskSpaceGuard {
    pub(crate) fn new(
        dir: PathBuf,
        min_free: u64,
        probe: Arc<dyn FreeSpaceProbe>,
        cache_ttl: Duration,
        events: EventBus,
    ) -> Self {
        Self {
            dir,
            min_free,
            probe,
            cache_ttl,
            last: Mutex::new(None),
            suspended: AtomicBool::new(false),
            events,
        }
    }

    pub fn has_sufficient_space(&self) -> bool {
        self.check().is_ok()
    }

    /// Check using a cached reading when it is fresh enough.
    pub fn check(&self) -> Result<u64, LogShipError> {
        let available = self.available(false);
        self.evaluate(available)
    }

    /// Check with a live reading, ignoring the cache.
    pub fn recheck(&self) -> Result<u64, LogShipError> {
        let available = self.available(true);
        self.evaluate(available)
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    fn available(&self, force: bool) -> u64 {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if !force {
            if let Some(r) = *last {
                if r.at.elapsed() < self.cache_ttl {
                    return r.available;
                }
            }
        }
        let available = match self.probe.available_space(&self.dir) {
            Ok(v) => v,
            Err(e) => {
                warn!(target = "disk_guard", dir = %self.dir.display(), error = %e, "free space probe failed");
                0
            }
        };
        *last = Some(Reading {
            at: Instant::now(),
            available,
        });
        available
    }

    fn evaluate(&self, available: u64) -> Result<u64, LogShipError> {
        if available >= self.min_free {
            if self.suspended.swap(false, Ordering::AcqRel) {
                info!(target = "disk_guard", available, required = self.min_free, "free space recovered, logging resumed");
                self.events.publish(EngineEvent::LoggingResumed { available });
            }
            Ok(available)
        } else {
            if !self.suspended.swap(true, Ordering::AcqRel) {
                warn!(target = "disk_guard", available, required = self.min_free, "insufficient free space, logging suspended");
                self.events.publish(EngineEvent::LoggingSuspended {
                    available,
                    required: self.min_free,
                });
            }
            Err(LogShipError::StorageExhausted {
                available,
                required: self.min_free,
            })
        }
    }
}
