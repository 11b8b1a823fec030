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

//! Update pipeline: check, download, verify, swap, verify, clean up

use crate::archive::extract_zip;
use crate::config::{ProgressTable, SwapStrategy, UpdaterConfig};
use crate::downloader::{Downloader, build_client};
use crate::error::{Result, UpdateError};
use crate::integrity::{TreeVerification, verify_archive, verify_tree};
use crate::lock::UpdateLock;
use crate::manifest::{self, BundleManifest};
use crate::notes::ReleaseNotes;
use crate::progress::{ProgressCallback, ProgressEvent, TransferInfo};
use crate::provider::{archive_name, checksum_name};
use crate::release_checker::{ReleaseInfo, ReleaseResolver};
use crate::state::{Phase, UpdateSession};
use crate::swap::{download_dir, prepare_staging, remove_tree, swap_in};
use crate::version::{is_newer, version_from_tag};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Result of [`UpdatePipeline::check_update`]
#[derive(Debug, Clone, Serialize)]
pub struct UpdateCheck {
    pub latest_version: String,
    /// `None` when the working directory holds no bundle yet
    pub current_version: Option<String>,
    pub upgradeable: bool,
    pub notes: ReleaseNotes,
}

#[derive(Clone, Default)]
pub struct UpgradeOptions {
    pub cancel: CancellationToken,
    pub on_progress: Option<ProgressCallback>,
}

impl UpgradeOptions {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            on_progress: None,
        }
    }

    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        self.on_progress = Some(std::sync::Arc::new(callback));
        self
    }
}

impl fmt::Debug for UpgradeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpgradeOptions")
            .field("cancel", &self.cancel)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpgradeReport {
    /// Release tag now installed
    pub version: String,
    /// False when the bundle carried no tree digest to check
    pub tree_verified: bool,
}

/// Sends session snapshots to the caller's callback
struct Reporter<'a> {
    callback: Option<&'a ProgressCallback>,
}

impl Reporter<'_> {
    fn emit(&self, session: &UpdateSession, info: Option<TransferInfo>) {
        if let Some(callback) = self.callback {
            callback(&ProgressEvent {
                phase: session.phase(),
                progress: session.progress(),
                info,
            });
        }
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

/// Enter the terminal phase matching `result` and emit its event. A lock
/// that failed to release is logged, never turned into the session's error.
fn conclude(
    session: &mut UpdateSession,
    reporter: &Reporter<'_>,
    result: Result<UpgradeReport>,
    released: Result<()>,
) -> Result<UpgradeReport> {
    let work_dir = session.work_dir().to_path_buf();
    let at = session.phase();

    match &result {
        Ok(_) => session.finish(Phase::Done),
        Err(e) if e.is_cancelled() => session.finish(Phase::Cancelled),
        Err(_) => session.finish(Phase::Failed),
    }
    reporter.emit(session, None);

    if let Err(lock_err) = released {
        tracing::error!("Failed to release lock: {lock_err}");
    }
    match &result {
        Ok(report) => {
            tracing::info!("Upgraded {} to {}", work_dir.display(), report.version);
        }
        Err(e) if e.is_cancelled() => {
            tracing::warn!("Upgrade of {} cancelled at {at}", work_dir.display());
        }
        Err(e) => {
            tracing::error!("Upgrade of {} failed at {at}: {e}", work_dir.display());
        }
    }
    if result.is_err() && !at.is_destructive() {
        tracing::info!("{} left untouched", work_dir.display());
    }
    result
}

/// Keeps one working directory in sync with the latest published release
#[derive(Debug)]
pub struct UpdatePipeline {
    config: UpdaterConfig,
    client: reqwest::Client,
    downloader: Downloader,
    lock: UpdateLock,
    last_release: Mutex<Option<ReleaseInfo>>,
}

impl UpdatePipeline {
    pub fn new(config: UpdaterConfig) -> Result<Self> {
        config.validate()?;
        let timeout = config.request_timeout();
        let client = build_client(&config.user_agent, timeout)?;
        let downloader = Downloader::new(client.clone(), timeout);
        let lock = UpdateLock::new(&config.work_dir, config.lock_stale_after());

        Ok(Self {
            config,
            client,
            downloader,
            lock,
            last_release: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    pub fn work_dir(&self) -> &Path {
        &self.config.work_dir
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// Version recorded in the bundle manifest of the working directory
    pub fn current_version(&self) -> Result<Option<String>> {
        Ok(BundleManifest::load(self.work_dir())?.map(|m| m.version))
    }

    /// Release seen by the last successful check
    pub fn last_release(&self) -> Option<ReleaseInfo> {
        self.last_release.lock().clone()
    }

    fn resolver(&self) -> Result<ReleaseResolver> {
        let recorded = BundleManifest::load(self.work_dir())?;
        let provider = self
            .config
            .provider
            .clone()
            .or_else(|| recorded.as_ref().and_then(BundleManifest::provider_config))
            .ok_or_else(|| {
                UpdateError::Config(format!(
                    "no release provider configured for {}",
                    self.work_dir().display()
                ))
            })?;
        provider.validate()?;
        let cdn = self
            .config
            .cdn
            .clone()
            .or_else(|| recorded.and_then(|m| m.cdn));

        Ok(ReleaseResolver::new(
            self.client.clone(),
            provider,
            cdn,
            self.config.request_timeout(),
        ))
    }

    /// Look up the latest release and compare it with the installed bundle.
    ///
    /// Fails fast while another session holds the working directory. Touches
    /// no files.
    pub async fn check_update(&self, cancel: &CancellationToken) -> Result<UpdateCheck> {
        if self.lock.is_locked() {
            return Err(UpdateError::AlreadyInProgress {
                work_dir: self.work_dir().to_path_buf(),
            });
        }

        let release = self.resolver()?.resolve_latest(cancel).await?;
        let current_version = self.current_version()?;
        let upgradeable = match current_version.as_deref() {
            Some(current) => is_newer(current, &release.version)?,
            None => true,
        };

        tracing::info!(
            "Latest release {} (installed: {}), upgradeable: {upgradeable}",
            release.version,
            current_version.as_deref().unwrap_or("none")
        );

        let check = UpdateCheck {
            latest_version: release.version.clone(),
            current_version,
            upgradeable,
            notes: release.notes.clone(),
        };
        *self.last_release.lock() = Some(release);
        Ok(check)
    }

    /// Replace the working directory with release `target_version`.
    ///
    /// The lock is held for the whole session and released on every exit
    /// path, as are the downloaded artifacts. A terminal progress event is
    /// always emitted.
    pub async fn upgrade(
        &self,
        target_version: &str,
        options: UpgradeOptions,
    ) -> Result<UpgradeReport> {
        let work_dir = self.work_dir().to_path_buf();
        if self.lock.is_locked() {
            return Err(UpdateError::AlreadyInProgress { work_dir });
        }
        let mut handle = self.lock.acquire()?;

        let mut session = UpdateSession::new(&work_dir, target_version, options.cancel.clone());
        let reporter = Reporter {
            callback: options.on_progress.as_ref(),
        };
        tracing::info!("Upgrading {} to {target_version}", work_dir.display());

        let result = self.run(&mut session, &reporter).await;

        let downloads = download_dir(&work_dir);
        if let Err(e) = blocking(move || remove_tree(&downloads)).await {
            tracing::warn!("Failed to remove downloads: {e}");
        }
        let released = handle.release();

        conclude(&mut session, &reporter, result, released)
    }

    async fn run(
        &self,
        session: &mut UpdateSession,
        reporter: &Reporter<'_>,
    ) -> Result<UpgradeReport> {
        let table = self.config.progress;
        let work_dir = session.work_dir().to_path_buf();
        let cancel = session.cancel_token().clone();

        session.advance(Phase::CheckingLatest, 0.0)?;
        reporter.emit(session, None);
        let release = self.release_for(session.target_version(), &cancel).await?;

        let archive = archive_name(&release.version);
        let checksum = checksum_name(&release.version);
        let missing = |asset: &str| {
            UpdateError::NotFound(format!("release {} has no asset {asset}", release.version))
        };
        let archive_url = release
            .archive_url()
            .ok_or_else(|| missing(&archive))?
            .to_string();
        let checksum_url = release
            .checksum_url()
            .ok_or_else(|| missing(&checksum))?
            .to_string();

        let downloads = download_dir(&work_dir);
        let archive_path = downloads.join(&archive);
        let checksum_path = downloads.join(&checksum);
        {
            let downloads = downloads.clone();
            blocking(move || remove_tree(&downloads)).await?;
        }

        session.advance(Phase::DownloadingArchive, table.start)?;
        reporter.emit(session, None);
        self.download(
            session,
            reporter,
            &archive_url,
            &archive_path,
            (table.start, table.archive),
        )
        .await?;

        session.advance(Phase::DownloadingChecksum, table.archive)?;
        reporter.emit(session, None);
        self.download(
            session,
            reporter,
            &checksum_url,
            &checksum_path,
            (table.archive, table.checksum),
        )
        .await?;

        session.advance(Phase::VerifyingArchive, table.verify_archive)?;
        reporter.emit(session, None);
        {
            let (archive_path, checksum_path) = (archive_path.clone(), checksum_path.clone());
            blocking(move || verify_archive(&archive_path, &checksum_path)).await?;
        }

        let tree_verified = match self.config.swap_strategy {
            SwapStrategy::InPlace => {
                self.replace_in_place(session, reporter, &table, &archive_path)
                    .await?
            }
            SwapStrategy::Staged => {
                self.replace_staged(session, reporter, &table, &archive_path)
                    .await?
            }
        };

        session.advance(Phase::CleaningUp, table.cleanup)?;
        reporter.emit(session, None);
        {
            let version = release.version.clone();
            let work_dir = work_dir.clone();
            blocking(move || {
                remove_tree(&downloads)?;
                manifest::set_version(&work_dir, &version).map(|_| ())
            })
            .await?;
        }

        Ok(UpgradeReport {
            version: release.version,
            tree_verified: tree_verified == TreeVerification::Verified,
        })
    }

    /// Release matching `target`, from the last check or a fresh lookup
    async fn release_for(&self, target: &str, cancel: &CancellationToken) -> Result<ReleaseInfo> {
        let wanted = version_from_tag(target);
        let cached = self
            .last_release
            .lock()
            .clone()
            .filter(|release| version_from_tag(&release.version) == wanted);
        if let Some(release) = cached {
            tracing::debug!("Using release {} from the last check", release.version);
            return Ok(release);
        }

        let release = self.resolver()?.resolve_latest(cancel).await?;
        if version_from_tag(&release.version) != wanted {
            return Err(UpdateError::NotFound(format!(
                "latest release is {}, not {target}",
                release.version
            )));
        }
        *self.last_release.lock() = Some(release.clone());
        Ok(release)
    }

    async fn download(
        &self,
        session: &mut UpdateSession,
        reporter: &Reporter<'_>,
        url: &str,
        dest: &Path,
        (from, to): (f64, f64),
    ) -> Result<u64> {
        let phase = session.phase();
        let cancel = session.cancel_token().clone();
        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        self.downloader
            .fetch(phase, url, dest, &cancel, |sample| {
                session.set_progress(ProgressTable::scale(from, to, sample.fraction));
                let info = TransferInfo::from_sample(&name, sample);
                tracing::debug!(
                    "{name}: {} of {} at {}",
                    info.transferred,
                    info.total,
                    info.speed
                );
                reporter.emit(session, Some(info));
            })
            .await
    }

    /// Delete the old tree, then extract and verify in its place. A tree
    /// that fails to extract or verify is removed.
    async fn replace_in_place(
        &self,
        session: &mut UpdateSession,
        reporter: &Reporter<'_>,
        table: &ProgressTable,
        archive_path: &Path,
    ) -> Result<TreeVerification> {
        let work_dir = session.work_dir().to_path_buf();

        session.advance(Phase::DeletingOldTree, table.delete_old)?;
        reporter.emit(session, None);
        {
            let work_dir = work_dir.clone();
            blocking(move || remove_tree(&work_dir)).await?;
        }

        let result = self
            .extract_and_verify(session, reporter, table, archive_path, &work_dir)
            .await;
        if let Err(ref e) = result
            && !e.is_cancelled()
            && session.phase().is_destructive()
        {
            tracing::warn!("Removing untrusted tree {}", work_dir.display());
            let untrusted = work_dir.clone();
            if let Err(remove_err) = blocking(move || remove_tree(&untrusted)).await {
                tracing::error!("Failed to remove untrusted tree: {remove_err}");
            }
        }
        result
    }

    /// Extract and verify next to the working directory, then swap. The old
    /// tree stays in place until the new one has verified.
    async fn replace_staged(
        &self,
        session: &mut UpdateSession,
        reporter: &Reporter<'_>,
        table: &ProgressTable,
        archive_path: &Path,
    ) -> Result<TreeVerification> {
        let work_dir = session.work_dir().to_path_buf();
        let staging = {
            let work_dir = work_dir.clone();
            blocking(move || prepare_staging(&work_dir)).await?
        };

        let result = async {
            let verification = self
                .extract_and_verify(session, reporter, table, archive_path, &staging)
                .await?;

            session.advance(Phase::DeletingOldTree, table.delete_old)?;
            reporter.emit(session, None);
            let (work_dir, staging) = (work_dir.clone(), staging.clone());
            blocking(move || swap_in(&work_dir, &staging)).await?;
            Ok::<_, UpdateError>(verification)
        }
        .await;

        if result.is_err() {
            let staging = staging.clone();
            if let Err(e) = blocking(move || remove_tree(&staging)).await {
                tracing::warn!("Failed to remove staging tree: {e}");
            }
        }
        result
    }

    async fn extract_and_verify(
        &self,
        session: &mut UpdateSession,
        reporter: &Reporter<'_>,
        table: &ProgressTable,
        archive_path: &Path,
        dest: &Path,
    ) -> Result<TreeVerification> {
        session.advance(Phase::Extracting, table.extract)?;
        reporter.emit(session, None);
        {
            let (archive_path, dest) = (archive_path.to_path_buf(), dest.to_path_buf());
            blocking(move || extract_zip(&archive_path, &dest).map(|_| ())).await?;
        }

        session.advance(Phase::VerifyingTree, table.verify_tree)?;
        reporter.emit(session, None);
        let dest: PathBuf = dest.to_path_buf();
        blocking(move || {
            let expected = BundleManifest::load(&dest)?.and_then(|m| m.sha256);
            verify_tree(&dest, expected.as_deref())
        })
        .await
    }
}
