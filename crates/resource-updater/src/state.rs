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

//! Update phases and the in-memory session state machine

use crate::error::{Result, UpdateError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Linear phases of an update cycle.
///
/// `Failed` and `Cancelled` are terminal and reachable from any phase after
/// `CheckingLatest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    CheckingLatest,
    DownloadingArchive,
    DownloadingChecksum,
    VerifyingArchive,
    DeletingOldTree,
    Extracting,
    VerifyingTree,
    CleaningUp,
    Done,
    Failed,
    Cancelled,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }

    /// True once the old working tree may already have been removed
    pub fn is_destructive(self) -> bool {
        matches!(
            self,
            Self::DeletingOldTree | Self::Extracting | Self::VerifyingTree | Self::CleaningUp
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::CheckingLatest => "checking latest",
            Self::DownloadingArchive => "downloading archive",
            Self::DownloadingChecksum => "downloading checksum",
            Self::VerifyingArchive => "verifying archive",
            Self::DeletingOldTree => "deleting old tree",
            Self::Extracting => "extracting",
            Self::VerifyingTree => "verifying tree",
            Self::CleaningUp => "cleaning up",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// One upgrade of one working directory. Lives from lock acquisition to a
/// terminal phase.
#[derive(Debug)]
pub struct UpdateSession {
    work_dir: PathBuf,
    target_version: String,
    progress: f64,
    phase: Phase,
    cancel: CancellationToken,
}

impl UpdateSession {
    pub fn new(work_dir: &Path, target_version: &str, cancel: CancellationToken) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
            target_version: target_version.to_string(),
            progress: 0.0,
            phase: Phase::Idle,
            cancel,
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn target_version(&self) -> &str {
        &self.target_version
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Move to `next`, raising progress to at least `progress`.
    ///
    /// Cancellation is observed here, at the boundary, before the next phase
    /// starts any work.
    pub fn advance(&mut self, next: Phase, progress: f64) -> Result<()> {
        if self.phase.is_terminal() {
            return Err(UpdateError::Internal(format!(
                "session already finished in phase {}",
                self.phase
            )));
        }
        if self.is_cancelled() {
            return Err(UpdateError::Cancelled { phase: next });
        }
        tracing::debug!("{}: {} -> {}", self.work_dir.display(), self.phase, next);
        self.phase = next;
        self.set_progress(progress);
        Ok(())
    }

    /// Progress never moves backwards until the session ends
    pub fn set_progress(&mut self, progress: f64) -> f64 {
        let clamped = progress.clamp(0.0, 1.0);
        if clamped > self.progress {
            self.progress = clamped;
        }
        self.progress
    }

    /// Enter a terminal phase; progress is left where it stopped unless done
    pub fn finish(&mut self, phase: Phase) {
        debug_assert!(phase.is_terminal());
        if phase == Phase::Done {
            self.progress = 1.0;
        }
        self.phase = phase;
    }
}
