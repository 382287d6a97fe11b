//! Advisory lock marker guarding the refresh critical section
//!
//! The lock is a marker file identified by existence and age:
//!
//! | Marker | Action |
//! |--------|--------|
//! | absent | create it and proceed |
//! | younger than `stale_after` | sleep until it turns stale, then take it over |
//! | older than `stale_after` | delete it as abandoned, then create ours |
//!
//! Markers are created with create-exclusive semantics, so two instances
//! cannot both create one in the same instant. Exclusivity is still only
//! best-effort: an instance that slept out the window takes over whatever
//! marker it then finds, even one whose holder is still working. That
//! holder's release finds a foreign marker and leaves it alone.

use crate::error::{CertcacheError, CertcacheResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Passes over the marker before it is overwritten
const MAX_CONTENTION_ROUNDS: u32 = 3;

/// How the lock was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// No marker was present
    Free,
    /// Slept this long for a live marker to go stale, then took it over
    Waited(Duration),
    /// An abandoned marker of this age was deleted
    Reclaimed(Duration),
    /// Create races kept failing; the marker was overwritten
    Forced,
}

#[derive(Debug, Serialize, Deserialize)]
struct MarkerContents {
    holder: String,
    pid: u32,
    created_at: String,
}

/// File-based advisory lock
#[derive(Debug, Clone)]
pub struct LockCoordinator {
    path: PathBuf,
    stale_after: Duration,
}

impl LockCoordinator {
    pub fn new(path: impl Into<PathBuf>, stale_after: Duration) -> Self {
        Self {
            path: path.into(),
            stale_after,
        }
    }

    /// Marker file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Age of the current marker, or `None` if there is none
    pub async fn marker_age(&self) -> CertcacheResult<Option<Duration>> {
        match fs::metadata(&self.path).await {
            Ok(meta) => {
                let modified = meta
                    .modified()
                    .map_err(|e| CertcacheError::io("reading lock marker mtime", e))?;
                Ok(Some(
                    SystemTime::now()
                        .duration_since(modified)
                        .unwrap_or(Duration::ZERO),
                ))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CertcacheError::io(
                format!("checking lock marker {}", self.path.display()),
                e,
            )),
        }
    }

    /// Acquire the lock, waiting out or reclaiming an existing marker
    ///
    /// A young marker is waited out once, for at most `stale_after` minus its
    /// age. Whatever marker is present after that wait is taken over.
    pub async fn acquire(&self) -> CertcacheResult<LockGuard> {
        let holder = Uuid::new_v4().to_string();
        let mut outcome = LockOutcome::Free;

        debug!("Check lock marker {}", self.path.display());
        for _ in 0..MAX_CONTENTION_ROUNDS {
            match self.marker_age().await? {
                None => {}
                Some(_) if matches!(outcome, LockOutcome::Waited(_)) => {
                    debug!("Wait window elapsed, taking over lock marker");
                    self.remove_marker().await?;
                }
                Some(age) if age < self.stale_after => {
                    let wait = self.stale_after - age;
                    debug!("Update in progress, sleeping {:?}", wait);
                    tokio::time::sleep(wait).await;
                    outcome = LockOutcome::Waited(wait);
                    continue;
                }
                Some(age) => {
                    warn!(
                        "Stale lock marker {} ({:?} old), removing",
                        self.path.display(),
                        age
                    );
                    self.remove_marker().await?;
                    outcome = LockOutcome::Reclaimed(age);
                }
            }

            match self.create_marker(&holder, true).await {
                Ok(()) => return Ok(self.guard(holder, outcome)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists && outcome == LockOutcome::Free => {
                    debug!("Lost race creating lock marker, re-checking");
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => break,
                Err(e) => return Err(CertcacheError::io("creating lock marker", e)),
            }
        }

        warn!(
            "Lock marker {} still contended, taking it over",
            self.path.display()
        );
        self.create_marker(&holder, false)
            .await
            .map_err(|e| CertcacheError::io("overwriting lock marker", e))?;
        Ok(self.guard(holder, LockOutcome::Forced))
    }

    fn guard(&self, holder: String, outcome: LockOutcome) -> LockGuard {
        debug!("Lock acquired ({:?})", outcome);
        LockGuard {
            path: self.path.clone(),
            holder,
            outcome,
            released: false,
        }
    }

    async fn create_marker(&self, holder: &str, exclusive: bool) -> std::io::Result<()> {
        let contents = MarkerContents {
            holder: holder.to_string(),
            pid: std::process::id(),
            created_at: Utc::now().to_rfc3339(),
        };
        let body = serde_json::to_vec(&contents)?;

        let mut options = fs::OpenOptions::new();
        options.write(true);
        if exclusive {
            options.create_new(true);
        } else {
            options.create(true).truncate(true);
        }
        let mut file = options.open(&self.path).await?;
        file.write_all(&body).await?;
        file.flush().await
    }

    async fn remove_marker(&self) -> CertcacheResult<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CertcacheError::io("removing lock marker", e)),
        }
    }
}

/// Held lock; the marker is removed on release or drop
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    holder: String,
    outcome: LockOutcome,
    released: bool,
}

impl LockGuard {
    pub fn outcome(&self) -> LockOutcome {
        self.outcome
    }

    /// Remove the marker if it is still ours
    pub async fn release(mut self) -> CertcacheResult<()> {
        self.released = true;
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(CertcacheError::io("reading lock marker", e)),
        };
        if !self.owns(&raw) {
            debug!("Lock marker taken over by another instance, leaving it");
            return Ok(());
        }
        debug!("Remove lock marker {}", self.path.display());
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CertcacheError::io("removing lock marker", e)),
        }
    }

    fn owns(&self, raw: &[u8]) -> bool {
        serde_json::from_slice::<MarkerContents>(raw)
            .map(|m| m.holder == self.holder)
            .unwrap_or(false)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Ok(raw) = std::fs::read(&self.path) {
            if self.owns(&raw) {
                if let Err(e) = std::fs::remove_file(&self.path) {
                    warn!("Failed to remove lock marker on drop: {}", e);
                }
            }
        }
    }
}
