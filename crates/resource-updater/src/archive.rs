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

//! Release archive extraction

use crate::error::{Result, UpdateError};
use std::fs::File;
use std::path::Path;
use zip::ZipArchive;

fn zip_error(archive: &Path, err: &zip::result::ZipError) -> UpdateError {
    UpdateError::fs(
        "extract",
        archive,
        std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string()),
    )
}

/// Unpack `archive` into `destination`, creating it if needed.
///
/// Entries whose names would escape `destination` are skipped. Returns the
/// number of files written.
pub fn extract_zip(archive: &Path, destination: &Path) -> Result<usize> {
    let file = File::open(archive).map_err(|e| UpdateError::fs("open", archive, e))?;
    let mut zip = ZipArchive::new(file).map_err(|e| zip_error(archive, &e))?;

    std::fs::create_dir_all(destination)
        .map_err(|e| UpdateError::fs("create directory", destination, e))?;

    let mut written = 0;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| zip_error(archive, &e))?;
        let Some(relative) = entry.enclosed_name() else {
            tracing::warn!("Skipping unsafe archive entry {}", entry.name());
            continue;
        };
        let outpath = destination.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&outpath)
                .map_err(|e| UpdateError::fs("create directory", &outpath, e))?;
        } else {
            if let Some(parent) = outpath.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| UpdateError::fs("create directory", parent, e))?;
            }
            let mut outfile =
                File::create(&outpath).map_err(|e| UpdateError::fs("create", &outpath, e))?;
            std::io::copy(&mut entry, &mut outfile)
                .map_err(|e| UpdateError::fs("write", &outpath, e))?;
            written += 1;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode))
                    .map_err(|e| UpdateError::fs("set permissions on", &outpath, e))?;
            }
        }
    }

    tracing::debug!(
        "Extracted {written} files from {} into {}",
        archive.display(),
        destination.display()
    );
    Ok(written)
}
