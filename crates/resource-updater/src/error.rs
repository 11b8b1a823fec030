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

//! Error types for the updater crate

use crate::state::Phase;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Which integrity check rejected the content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    /// The downloaded release archive
    Archive,
    /// The extracted bundle directory
    Tree,
}

impl fmt::Display for ChecksumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Archive => f.write_str("archive"),
            Self::Tree => f.write_str("tree"),
        }
    }
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("unexpected HTTP status {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("timed out after {secs}s waiting for {url}")]
    Timeout { url: String, secs: u64 },

    #[error("no usable release: {0}")]
    NotFound(String),

    #[error("{kind} checksum mismatch for {}: expected {expected}, got {actual}", path.display())]
    ChecksumMismatch {
        kind: ChecksumKind,
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("malformed checksum file {}: {reason}", path.display())]
    MalformedChecksum { path: PathBuf, reason: String },

    #[error("an update is already in progress for {}", work_dir.display())]
    AlreadyInProgress { work_dir: PathBuf },

    #[error("update cancelled at {phase}")]
    Cancelled { phase: Phase },

    #[error("failed to {action} {}: {source}", path.display())]
    FileSystem {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error("version parse error: {0}")]
    VersionParse(String),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl UpdateError {
    /// Wrap an I/O failure with the action and path it concerned
    pub fn fs(action: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::FileSystem {
            action,
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn is_checksum_mismatch(&self) -> bool {
        matches!(self, Self::ChecksumMismatch { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl From<tokio::task::JoinError> for UpdateError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("blocking task failed: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, UpdateError>;
