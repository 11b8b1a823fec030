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

//! External resources updater
//!
//! Keeps a local resource bundle (device and extension definitions consumed by
//! the block-programming IDE) in sync with the latest release published on
//! GitHub, Gitee or object storage. An update cycle downloads the release
//! archive and its checksum sidecar, verifies both the archive and the
//! extracted tree, and swaps the working directory while holding a
//! filesystem lock scoped to that directory.

pub mod archive;
pub mod config;
pub mod downloader;
pub mod error;
pub mod integrity;
pub mod lock;
pub mod manifest;
pub mod notes;
pub mod progress;
pub mod provider;
pub mod release_checker;
pub mod state;
pub mod swap;
pub mod upgrader;
pub mod version;

pub use config::{ProgressTable, SwapStrategy, UpdaterConfig};
pub use error::{ChecksumKind, Result, UpdateError};
pub use manifest::BundleManifest;
pub use notes::ReleaseNotes;
pub use progress::{ProgressEvent, TransferInfo, TransferSample};
pub use provider::ProviderConfig;
pub use release_checker::{ReleaseInfo, ReleaseResolver};
pub use state::{Phase, UpdateSession};
pub use tokio_util::sync::CancellationToken;
pub use upgrader::{UpdateCheck, UpdatePipeline, UpgradeOptions, UpgradeReport};
pub use version::{is_newer, parse_version, version_from_tag};
