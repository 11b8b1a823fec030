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

//! SHA-256 verification of release archives and extracted bundle trees

use crate::error::{ChecksumKind, Result, UpdateError};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use walkdir::WalkDir;

/// Directories skipped at any depth when digesting a tree
pub const EXCLUDED_DIRS: &[&str] = &[".git", ".github"];

/// Files skipped at any depth when digesting a tree
pub const EXCLUDED_FILES: &[&str] = &[".gitignore"];

/// Files skipped at the tree root: the manifest carrying the digest and the
/// legacy digest file
pub const EXCLUDED_ROOT_FILES: &[&str] = &["config.json", "folder-checksum-sha256.txt"];

const BUFFER_SIZE: usize = 64 * 1024;

/// Outcome of a tree verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeVerification {
    Verified,
    /// The bundle carried no digest to compare against
    Skipped,
}

/// Lowercase hex SHA-256 of a file, read in fixed-size chunks
pub fn digest_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| UpdateError::fs("open", path, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|e| UpdateError::fs("read", path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Digest of every regular file under `dir`, independent of listing order
/// and timestamps.
///
/// Files are visited by relative path (`/`-separated) in sorted order and
/// `"{path}:{file digest}\n"` is fed into the outer hash.
pub fn digest_tree(dir: &Path) -> Result<String> {
    let mut files: Vec<(String, std::path::PathBuf)> = Vec::new();

    let walker = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            !(entry.file_type().is_dir()
                && entry.depth() > 0
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| EXCLUDED_DIRS.contains(&name)))
        });

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            UpdateError::fs("walk", &path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        if EXCLUDED_FILES.contains(&name.as_ref())
            || (entry.depth() == 1 && EXCLUDED_ROOT_FILES.contains(&name.as_ref()))
        {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(dir)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push((relative, entry.path().to_path_buf()));
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    for (relative, path) in &files {
        let file_digest = digest_file(path)?;
        hasher.update(format!("{relative}:{file_digest}\n").as_bytes());
    }

    tracing::debug!("Digested {} files under {}", files.len(), dir.display());
    Ok(hex::encode(hasher.finalize()))
}

/// Expected digest for `archive_name` from a sidecar of `<hex> <filename>`
/// lines. A line naming the archive wins; otherwise the first line's digest
/// is used.
pub fn parse_sidecar(content: &str, archive_name: &str, sidecar: &Path) -> Result<String> {
    let mut first = None;

    for line in content.lines() {
        let mut tokens = line.split_whitespace();
        let Some(digest) = tokens.next() else {
            continue;
        };
        let file_name = tokens.next().map(|name| name.trim_start_matches('*'));

        if file_name == Some(archive_name) {
            return validate_digest(digest, sidecar);
        }
        if first.is_none() {
            first = Some(digest);
        }
    }

    match first {
        Some(digest) => validate_digest(digest, sidecar),
        None => Err(UpdateError::MalformedChecksum {
            path: sidecar.to_path_buf(),
            reason: "no digest found".to_string(),
        }),
    }
}

fn validate_digest(digest: &str, sidecar: &Path) -> Result<String> {
    if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(UpdateError::MalformedChecksum {
            path: sidecar.to_path_buf(),
            reason: format!("not a SHA-256 digest: {digest}"),
        });
    }
    Ok(digest.to_ascii_lowercase())
}

/// Check `archive` against the digest listed in `sidecar`
pub fn verify_archive(archive: &Path, sidecar: &Path) -> Result<()> {
    let content =
        std::fs::read_to_string(sidecar).map_err(|e| UpdateError::fs("read", sidecar, e))?;
    let archive_name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let expected = parse_sidecar(&content, &archive_name, sidecar)?;
    let actual = digest_file(archive)?;

    if actual != expected {
        return Err(UpdateError::ChecksumMismatch {
            kind: ChecksumKind::Archive,
            path: archive.to_path_buf(),
            expected,
            actual,
        });
    }

    tracing::info!("Archive checksum verified: {}", archive.display());
    Ok(())
}

/// Check `dir` against `expected`. Without an expected digest the check is
/// skipped with a warning.
pub fn verify_tree(dir: &Path, expected: Option<&str>) -> Result<TreeVerification> {
    let Some(expected) = expected.map(str::trim).filter(|e| !e.is_empty()) else {
        tracing::warn!(
            "No tree digest recorded for {}, skipping content verification",
            dir.display()
        );
        return Ok(TreeVerification::Skipped);
    };

    let expected = expected.to_ascii_lowercase();
    let actual = digest_tree(dir)?;
    if actual != expected {
        return Err(UpdateError::ChecksumMismatch {
            kind: ChecksumKind::Tree,
            path: dir.to_path_buf(),
            expected,
            actual,
        });
    }

    tracing::info!("Tree checksum verified: {}", dir.display());
    Ok(TreeVerification::Verified)
}
