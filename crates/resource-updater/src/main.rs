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

//! Resource updater - brings the configured bundle to its latest release
//!
//! Reads its configuration from `RESOURCE_UPDATER_CONFIG` (default
//! `resource-updater.json`), checks the release provider and upgrades the
//! working directory when a newer release exists. Ctrl-C cancels the session.

use resource_updater::config::{config_path, load_config};
use resource_updater::progress::ProgressEvent;
use resource_updater::{CancellationToken, UpdatePipeline, UpgradeOptions};
use tracing::{info, warn};

fn log_progress(event: &ProgressEvent) {
    match &event.info {
        Some(info) => info!(
            "[{:>3.0}%] {}: {} {} / {} ({}, {} left)",
            event.progress * 100.0,
            event.phase,
            info.name,
            info.transferred,
            info.total,
            info.speed,
            info.remaining
        ),
        None => info!("[{:>3.0}%] {}", event.progress * 100.0, event.phase),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("resource_updater=debug".parse()?),
        )
        .init();

    let path = config_path();
    let config = load_config(&path)?;
    info!(
        "Loaded config from {}: work_dir={}, swap_strategy={:?}",
        path.display(),
        config.work_dir.display(),
        config.swap_strategy
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    let pipeline = UpdatePipeline::new(config)?;
    let check = pipeline.check_update(&cancel).await?;
    if let Some(notes) = check.notes.for_locale("en")
        && !notes.is_empty()
    {
        info!("Release notes:\n{notes}");
    }

    if !check.upgradeable {
        info!(
            "Already on latest version: {}",
            check.current_version.as_deref().unwrap_or("none")
        );
        return Ok(());
    }

    let options = UpgradeOptions::new(cancel).on_progress(log_progress);
    let report = pipeline.upgrade(&check.latest_version, options).await?;
    if !report.tree_verified {
        warn!("Release {} carried no tree digest", report.version);
    }
    info!("Installed {}", report.version);

    Ok(())
}
