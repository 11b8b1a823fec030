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

//! Working directory replacement and the scratch directories next to it

use crate::error::{Result, UpdateError};
use crate::lock::sibling_path;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Where release artifacts are downloaded for `work_dir`
pub fn download_dir(work_dir: &Path) -> PathBuf {
    sibling_path(work_dir, "download")
}

/// Where a staged update is extracted and verified
pub fn staging_dir(work_dir: &Path) -> PathBuf {
    sibling_path(work_dir, "staging")
}

/// Where the old tree waits while a staged update is moved into place
pub fn previous_dir(work_dir: &Path) -> PathBuf {
    sibling_path(work_dir, "previous")
}

/// Remove a directory tree; a missing tree is not an error
pub fn remove_tree(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => {
            tracing::debug!("Removed {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(UpdateError::fs("remove", path, e)),
    }
}

/// Empty staging directory for `work_dir`, discarding leftovers of an
/// interrupted run
pub fn prepare_staging(work_dir: &Path) -> Result<PathBuf> {
    let staging = staging_dir(work_dir);
    remove_tree(&staging)?;
    fs::create_dir_all(&staging).map_err(|e| UpdateError::fs("create directory", &staging, e))?;
    Ok(staging)
}

/// Move the verified `staging` tree into place of `work_dir`.
///
/// The old tree is parked next to it first and put back if the new tree
/// cannot be moved in, so `work_dir` holds either the old or the new tree.
pub fn swap_in(work_dir: &Path, staging: &Path) -> Result<()> {
    let previous = previous_dir(work_dir);
    remove_tree(&previous)?;

    let had_old = match fs::rename(work_dir, &previous) {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => return Err(UpdateError::fs("move aside", work_dir, e)),
    };

    if let Err(e) = fs::rename(staging, work_dir) {
        if had_old {
            tracing::error!(
                "Failed to move {} into place, restoring previous tree",
                staging.display()
            );
            if let Err(restore_err) = fs::rename(&previous, work_dir) {
                tracing::error!(
                    "Failed to restore {} from {}: {restore_err}",
                    work_dir.display(),
                    previous.display()
                );
            }
        }
        return Err(UpdateError::fs("move into place", staging, e));
    }

    if had_old && let Err(e) = remove_tree(&previous) {
        // New tree is in place; the leftover is cleared on the next run
        tracing::warn!("Failed to remove previous tree: {e}");
    }

    tracing::info!("Swapped {} into {}", staging.display(), work_dir.display());
    Ok(())
}
