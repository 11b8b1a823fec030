// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Cross-process lock scoped to a working directory
//!
//! The marker is a file next to the working directory
//! (`<parent>/<name>.lock`) created with an exclusive create, so two
//! acquirers racing for the same directory cannot both succeed. It records
//! its owner so a marker left behind by a crashed process can be reclaimed.

use crate::error::{Result, UpdateError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

static NEXT_CLAIM: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockOwner {
    pub pid: u32,
    pub host: String,
    /// Distinguishes two claims by the same process
    pub token: String,
    pub acquired_at: DateTime<Utc>,
}

impl LockOwner {
    fn current() -> Self {
        let acquired_at = Utc::now();
        let pid = std::process::id();
        Self {
            pid,
            host: hostname(),
            token: format!(
                "{pid}-{}-{}",
                acquired_at.timestamp_nanos_opt().unwrap_or_default(),
                NEXT_CLAIM.fetch_add(1, Ordering::Relaxed)
            ),
            acquired_at,
        }
    }
}

/// Marker path guarding `work_dir`
pub fn marker_path(work_dir: &Path) -> PathBuf {
    sibling_path(work_dir, "lock")
}

/// `<parent>/<name>.<suffix>`
pub(crate) fn sibling_path(work_dir: &Path, suffix: &str) -> PathBuf {
    let name = work_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "resources".to_string());
    let parent = work_dir.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!("{name}.{suffix}"))
}

#[derive(Debug, Clone)]
pub struct UpdateLock {
    work_dir: PathBuf,
    marker: PathBuf,
    stale_after: Duration,
}

impl UpdateLock {
    pub fn new(work_dir: &Path, stale_after: Duration) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
            marker: marker_path(work_dir),
            stale_after,
        }
    }

    pub fn marker(&self) -> &Path {
        &self.marker
    }

    /// True while a live claim exists. Never modifies the filesystem.
    pub fn is_locked(&self) -> bool {
        match fs::symlink_metadata(&self.marker) {
            Ok(_) => self.stale_marker().is_none(),
            Err(_) => false,
        }
    }

    /// Claim the working directory, reclaiming a stale marker once
    pub fn acquire(&self) -> Result<LockHandle> {
        if let Some(parent) = self.marker.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| UpdateError::fs("create directory", parent, e))?;
        }

        for attempt in 0..2 {
            let owner = LockOwner::current();
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.marker)
            {
                Ok(mut file) => {
                    let content = serde_json::to_vec_pretty(&owner)?;
                    if let Err(e) = file.write_all(&content).and_then(|()| file.sync_all()) {
                        drop(file);
                        if let Err(remove_err) = fs::remove_file(&self.marker) {
                            tracing::warn!(
                                "Failed to remove half-written lock {}: {remove_err}",
                                self.marker.display()
                            );
                        }
                        return Err(UpdateError::fs("write", &self.marker, e));
                    }
                    tracing::debug!("Acquired lock {}", self.marker.display());
                    return Ok(LockHandle {
                        marker: self.marker.clone(),
                        token: owner.token,
                        released: false,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if attempt == 0
                        && let Some(stale) = self.stale_marker()
                        && self.reclaim(&stale, &owner.token)?
                    {
                        continue;
                    }
                    return Err(UpdateError::AlreadyInProgress {
                        work_dir: self.work_dir.clone(),
                    });
                }
                Err(e) => return Err(UpdateError::fs("create", &self.marker, e)),
            }
        }

        Err(UpdateError::AlreadyInProgress {
            work_dir: self.work_dir.clone(),
        })
    }

    /// Owner recorded in the marker, if it exists and parses
    pub fn owner(&self) -> Option<LockOwner> {
        let content = fs::read(&self.marker).ok()?;
        serde_json::from_slice(&content).ok()
    }

    /// Contents of the marker if it is old enough and its owner is gone
    fn stale_marker(&self) -> Option<Vec<u8>> {
        let content = fs::read(&self.marker).ok()?;
        let age = match serde_json::from_slice::<LockOwner>(&content) {
            Ok(owner) => {
                if owner_alive(&owner) {
                    return None;
                }
                (Utc::now() - owner.acquired_at)
                    .to_std()
                    .unwrap_or(Duration::ZERO)
            }
            // Unparsable marker: judge by its mtime alone
            Err(_) => fs::metadata(&self.marker)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| modified.elapsed().ok())
                .unwrap_or(Duration::ZERO),
        };
        (age >= self.stale_after).then_some(content)
    }

    /// Take over a marker judged stale with contents `stale`.
    ///
    /// The marker is first renamed to a tombstone private to `token`, so of
    /// several acquirers reclaiming at once only one can remove it. Returns
    /// false if the marker turned out to be a live claim, which is put back.
    fn reclaim(&self, stale: &[u8], token: &str) -> Result<bool> {
        let mut name = self.marker.file_name().unwrap_or_default().to_os_string();
        name.push(format!(".{token}.stale"));
        let tombstone = self.marker.with_file_name(name);

        match fs::rename(&self.marker, &tombstone) {
            Ok(()) => {}
            // Already taken over by someone else; compete on the create
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(UpdateError::fs("claim", &self.marker, e)),
        }

        if fs::read(&tombstone).ok().as_deref() == Some(stale) {
            fs::remove_file(&tombstone).map_err(|e| UpdateError::fs("remove", &tombstone, e))?;
            tracing::warn!("Reclaimed stale lock {}", self.marker.display());
            return Ok(true);
        }

        // A fresh claim replaced the stale marker in the meantime
        match fs::hard_link(&tombstone, &self.marker) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                tracing::warn!(
                    "Lock {} was re-created while restoring it",
                    self.marker.display()
                );
            }
            Err(_) => {
                return fs::rename(&tombstone, &self.marker)
                    .map(|()| false)
                    .map_err(|e| UpdateError::fs("restore", &self.marker, e));
            }
        }
        if let Err(e) = fs::remove_file(&tombstone)
            && e.kind() != ErrorKind::NotFound
        {
            tracing::warn!("Failed to remove {}: {e}", tombstone.display());
        }
        Ok(false)
    }
}

/// Exclusive claim on a working directory. Released explicitly or on drop.
#[derive(Debug)]
pub struct LockHandle {
    marker: PathBuf,
    token: String,
    released: bool,
}

impl LockHandle {
    pub fn marker(&self) -> &Path {
        &self.marker
    }

    /// Remove the marker if it is still ours. Safe to call repeatedly.
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let ours = fs::read(&self.marker)
            .ok()
            .and_then(|content| serde_json::from_slice::<LockOwner>(&content).ok())
            .is_some_and(|owner| owner.token == self.token);
        if !ours {
            tracing::warn!(
                "Lock {} no longer belongs to this session, leaving it",
                self.marker.display()
            );
            return Ok(());
        }

        match fs::remove_file(&self.marker) {
            Ok(()) => {
                tracing::debug!("Released lock {}", self.marker.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(UpdateError::fs("remove", &self.marker, e)),
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::error!("Failed to release lock on drop: {e}");
        }
    }
}

#[cfg(unix)]
fn hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_default()
}

#[cfg(not(unix))]
fn hostname() -> String {
    std::env::var("COMPUTERNAME").unwrap_or_default()
}

#[cfg(unix)]
fn owner_alive(owner: &LockOwner) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // Liveness cannot be observed across hosts
    if owner.host != hostname() {
        return true;
    }
    let Ok(pid) = i32::try_from(owner.pid) else {
        return false;
    };
    match kill(Pid::from_raw(pid), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn owner_alive(owner: &LockOwner) -> bool {
    // Only our own process can be confirmed alive here
    owner.host == hostname() && owner.pid == std::process::id()
}
