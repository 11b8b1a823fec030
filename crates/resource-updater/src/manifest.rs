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

//! Bundle manifest stored at the root of every resource bundle

use crate::error::{Result, UpdateError};
use crate::integrity::digest_tree;
use crate::provider::ProviderConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const MANIFEST_FILE: &str = "config.json";

/// `config.json` of a bundle: the installed version, its tree digest and
/// where to look for the next release.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BundleManifest {
    pub version: String,

    /// Tree digest of the bundle, see [`digest_tree`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderConfig>,

    /// Older bundles only carry a GitHub `owner/name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdn: Option<String>,

    /// Keys this crate does not know about, written back untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl BundleManifest {
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
            ..Self::default()
        }
    }

    /// Manifest of the bundle at `dir`; `None` if the bundle has none
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(MANIFEST_FILE);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(UpdateError::fs("read", &path, e)),
        };
        let manifest = serde_json::from_str(&content).map_err(|e| {
            UpdateError::Config(format!("Failed to parse {}: {e}", path.display()))
        })?;
        Ok(Some(manifest))
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = dir.join(MANIFEST_FILE);
        let temp_path = path.with_extension("tmp");
        let content = serde_json::to_string_pretty(self)?;

        // Atomic write
        std::fs::write(&temp_path, content).map_err(|e| UpdateError::fs("write", &temp_path, e))?;
        std::fs::rename(&temp_path, &path).map_err(|e| UpdateError::fs("rename", &temp_path, e))?;

        Ok(())
    }

    /// Provider to query for newer releases
    pub fn provider_config(&self) -> Option<ProviderConfig> {
        self.provider.clone().or_else(|| {
            self.repo
                .as_ref()
                .filter(|repo| !repo.is_empty())
                .map(|repo| ProviderConfig::Github {
                    repo: repo.clone(),
                    api_base_url: None,
                    download_base_url: None,
                })
        })
    }
}

/// Record the installed version in the bundle at `dir`, keeping the rest of
/// its manifest
pub fn set_version(dir: &Path, version: &str) -> Result<BundleManifest> {
    let mut manifest = BundleManifest::load(dir)?.unwrap_or_default();
    manifest.version = version.to_string();
    manifest.save(dir)?;
    tracing::debug!("Recorded version {version} in {}", dir.display());
    Ok(manifest)
}

/// Compute the tree digest of the bundle at `dir` and store it in its
/// manifest. Used when publishing a release.
pub fn seal_bundle(dir: &Path) -> Result<BundleManifest> {
    let mut manifest = BundleManifest::load(dir)?.ok_or_else(|| {
        UpdateError::Config(format!(
            "{} has no {MANIFEST_FILE} to seal",
            dir.display()
        ))
    })?;
    let digest = digest_tree(dir)?;
    tracing::info!("Sealing bundle {} with digest {digest}", dir.display());
    manifest.sha256 = Some(digest);
    manifest.save(dir)?;
    Ok(manifest)
}
