// volboot-common/src/lock.rs
use std::env;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{BootError, Result};

/// Contents of the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub owner: Uuid,
    pub host: String,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

impl LockHolder {
    fn current() -> Self {
        Self {
            owner: Uuid::new_v4(),
            host: env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        }
    }

    fn age(&self) -> Duration {
        (Utc::now() - self.acquired_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Exclusive claim on the volume for destructive provisioning work.
/// Released when dropped.
#[derive(Debug)]
pub struct VolumeLock {
    path: PathBuf,
    holder: LockHolder,
}

impl VolumeLock {
    /// One acquisition attempt. `Ok(None)` means a live holder exists.
    /// A holder older than `stale_after` is evicted.
    pub fn try_acquire(path: &Path, stale_after: Duration) -> Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        match Self::create_new(path) {
            Ok(lock) => return Ok(Some(lock)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(BootError::LockError(format!(
                    "Failed to create lock file {}: {}",
                    path.display(),
                    e
                )))
            }
        }

        let age = Self::existing_age(path);
        match age {
            Some(age) if age < stale_after => {
                debug!(
                    "Volume lock {} is held ({} old)",
                    path.display(),
                    humantime::format_duration(truncate_secs(age))
                );
                Ok(None)
            }
            _ => {
                warn!(
                    "Evicting stale volume lock {} (age {})",
                    path.display(),
                    age.map(|a| humantime::format_duration(truncate_secs(a)).to_string())
                        .unwrap_or_else(|| "unknown".to_string())
                );
                if !Self::evict(path, stale_after)? {
                    return Ok(None);
                }
                // Another instance may win the race to recreate it.
                match Self::create_new(path) {
                    Ok(lock) => Ok(Some(lock)),
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
                    Err(e) => Err(BootError::LockError(format!(
                        "Failed to create lock file {}: {}",
                        path.display(),
                        e
                    ))),
                }
            }
        }
    }

    /// Moves a stale lock aside under a unique name, so only one contender
    /// can claim it. Returns `false` when what got moved turned out to be a
    /// live lock (another instance evicted and re-locked first); that lock
    /// is put back.
    fn evict(path: &Path, stale_after: Duration) -> Result<bool> {
        let tombstone = sibling(path, &format!("stale-{}", Uuid::new_v4()));
        match fs::rename(path, &tombstone) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => {
                return Err(BootError::LockError(format!(
                    "Failed to evict stale lock {}: {}",
                    path.display(),
                    e
                )))
            }
        }

        let live = Self::existing_age(&tombstone).is_some_and(|age| age < stale_after);
        if live {
            debug!("Lock {} was re-taken meanwhile; restoring it", path.display());
            // Fails only if yet another instance already holds the path.
            let _ = fs::hard_link(&tombstone, path);
        }
        if let Err(e) = fs::remove_file(&tombstone) {
            warn!("Failed to remove {}: {}", tombstone.display(), e);
        }
        Ok(!live)
    }

    /// Renews the lease so long provisioning runs are not mistaken for a
    /// crashed holder. Fails if the lock was taken over in the meantime.
    pub fn heartbeat(&mut self) -> Result<()> {
        match Self::read_holder(&self.path) {
            Some(current) if current.owner == self.holder.owner => {}
            _ => {
                return Err(BootError::LockError(format!(
                    "Volume lock {} is no longer held by {}",
                    self.path.display(),
                    self.holder.owner
                )))
            }
        }

        let mut renewed = self.holder.clone();
        renewed.acquired_at = Utc::now();
        let body = serde_json::to_vec(&renewed)?;
        let scratch = sibling(&self.path, &format!("renew-{}", renewed.owner));
        let written = fs::write(&scratch, &body).and_then(|()| fs::rename(&scratch, &self.path));
        if let Err(e) = written {
            let _ = fs::remove_file(&scratch);
            return Err(BootError::LockError(format!(
                "Failed to renew volume lock {}: {}",
                self.path.display(),
                e
            )));
        }
        debug!("Renewed volume lock {}", self.path.display());
        self.holder = renewed;
        Ok(())
    }

    fn create_new(path: &Path) -> std::io::Result<Self> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let holder = LockHolder::current();
        let body = serde_json::to_vec(&holder).map_err(std::io::Error::other)?;
        file.write_all(&body)?;
        file.sync_all()?;
        debug!(
            "Acquired volume lock {} as {} (pid {})",
            path.display(),
            holder.owner,
            holder.pid
        );
        Ok(Self {
            path: path.to_path_buf(),
            holder,
        })
    }

    /// Age from the recorded timestamp, falling back to the file mtime when
    /// the body is unreadable (e.g. a writer died mid-write).
    fn existing_age(path: &Path) -> Option<Duration> {
        if let Some(holder) = Self::read_holder(path) {
            return Some(holder.age());
        }
        let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
        SystemTime::now().duration_since(modified).ok()
    }

    pub fn read_holder(path: &Path) -> Option<LockHolder> {
        let bytes = fs::read(path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    pub fn holder(&self) -> &LockHolder {
        &self.holder
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for VolumeLock {
    fn drop(&mut self) {
        // Only remove the file if it is still ours.
        match Self::read_holder(&self.path) {
            Some(current) if current.owner == self.holder.owner => {
                if let Err(e) = fs::remove_file(&self.path) {
                    warn!("Failed to release volume lock {}: {}", self.path.display(), e);
                } else {
                    debug!("Released volume lock {}", self.path.display());
                }
            }
            _ => debug!(
                "Volume lock {} no longer belongs to {}; leaving it",
                self.path.display(),
                self.holder.owner
            ),
        }
    }
}

/// `provision.lock` -> `provision.lock.<suffix>` in the same directory.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{name}.{suffix}"))
}

fn truncate_secs(d: Duration) -> Duration {
    Duration::from_secs(d.as_secs())
}
