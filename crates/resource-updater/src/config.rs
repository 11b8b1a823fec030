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

//! Configuration module for the updater

use crate::error::{Result, UpdateError};
use crate::provider::ProviderConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the updater config, relative to the process cwd
pub const DEFAULT_CONFIG_PATH: &str = "resource-updater.json";

/// Environment variable overriding [`DEFAULT_CONFIG_PATH`]
pub const CONFIG_PATH_ENV: &str = "RESOURCE_UPDATER_CONFIG";

fn default_30() -> u64 {
    30
}

fn default_600() -> u64 {
    600
}

fn default_user_agent() -> String {
    format!("resource-updater/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Bundle directory kept in sync with the remote release
    pub work_dir: PathBuf,

    /// Where releases are published. Falls back to the provider recorded in
    /// the bundle manifest when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderConfig>,

    /// Caching proxy origin prepended to every outbound URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdn: Option<String>,

    /// Bound on connect + response headers, and on each idle gap while
    /// streaming a body (seconds)
    #[serde(default = "default_30")]
    pub request_timeout_secs: u64,

    /// Age after which a lock held by a dead owner may be reclaimed (seconds)
    #[serde(default = "default_600")]
    pub lock_stale_after_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default)]
    pub progress: ProgressTable,

    #[serde(default)]
    pub swap_strategy: SwapStrategy,
}

/// How the verified archive replaces the working directory
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SwapStrategy {
    /// Delete the old tree, extract in place, then verify. A failed tree
    /// verification leaves the working directory absent.
    #[default]
    InPlace,
    /// Extract and verify next to the working directory, then rename into
    /// place. A failed verification keeps the old tree.
    Staged,
}

/// Overall session progress reached when each phase starts.
///
/// Downloads are mapped into `[start, archive]` and `[archive, checksum]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProgressTable {
    pub start: f64,
    pub archive: f64,
    pub checksum: f64,
    pub verify_archive: f64,
    pub delete_old: f64,
    pub extract: f64,
    pub verify_tree: f64,
    pub cleanup: f64,
}

impl Default for ProgressTable {
    fn default() -> Self {
        Self {
            start: 0.05,
            archive: 0.75,
            checksum: 0.77,
            verify_archive: 0.80,
            delete_old: 0.85,
            extract: 0.90,
            verify_tree: 0.95,
            cleanup: 0.99,
        }
    }
}

impl ProgressTable {
    fn boundaries(&self) -> [f64; 8] {
        [
            self.start,
            self.archive,
            self.checksum,
            self.verify_archive,
            self.delete_old,
            self.extract,
            self.verify_tree,
            self.cleanup,
        ]
    }

    pub fn validate(&self) -> Result<()> {
        let bounds = self.boundaries();
        if bounds.iter().any(|b| !(0.0..1.0).contains(b)) {
            return Err(UpdateError::Config(
                "progress boundaries must lie in [0, 1)".to_string(),
            ));
        }
        if bounds.windows(2).any(|w| w[0] >= w[1]) {
            return Err(UpdateError::Config(
                "progress boundaries must be strictly increasing".to_string(),
            ));
        }
        Ok(())
    }

    /// Map a transfer's completed fraction into `[from, to]`
    pub fn scale(from: f64, to: f64, fraction: f64) -> f64 {
        from + fraction.clamp(0.0, 1.0) * (to - from)
    }
}

impl UpdaterConfig {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            provider: None,
            cdn: None,
            request_timeout_secs: default_30(),
            lock_stale_after_secs: default_600(),
            user_agent: default_user_agent(),
            progress: ProgressTable::default(),
            swap_strategy: SwapStrategy::default(),
        }
    }

    pub fn with_provider(mut self, provider: ProviderConfig) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn lock_stale_after(&self) -> Duration {
        Duration::from_secs(self.lock_stale_after_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.work_dir.as_os_str().is_empty() {
            return Err(UpdateError::Config("work_dir must not be empty".to_string()));
        }
        if self.work_dir.file_name().is_none() {
            return Err(UpdateError::Config(format!(
                "work_dir must name a directory: {}",
                self.work_dir.display()
            )));
        }
        if let Some(cdn) = &self.cdn
            && !(cdn.starts_with("http://") || cdn.starts_with("https://"))
        {
            return Err(UpdateError::Config(format!(
                "cdn must be an http(s) origin: {cdn}"
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(UpdateError::Config(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        self.progress.validate()
    }
}

/// Config path from the environment, or the default
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

pub fn load_config(path: &Path) -> Result<UpdaterConfig> {
    let content =
        std::fs::read_to_string(path).map_err(|e| UpdateError::fs("read config", path, e))?;
    let config: UpdaterConfig = serde_json::from_str(&content)
        .map_err(|e| UpdateError::Config(format!("Failed to parse {}: {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}

pub fn save_config(config: &UpdaterConfig, path: &Path) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    let content = serde_json::to_string_pretty(config)?;

    // Atomic write
    std::fs::write(&temp_path, content).map_err(|e| UpdateError::fs("write", &temp_path, e))?;
    std::fs::rename(&temp_path, path).map_err(|e| UpdateError::fs("rename", &temp_path, e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = UpdaterConfig::new("/data/external-resources");
        assert!(config.provider.is_none());
        assert!(config.cdn.is_none());
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.lock_stale_after_secs, 600);
        assert_eq!(config.swap_strategy, SwapStrategy::InPlace);
        assert!(config.user_agent.starts_with("resource-updater/"));
        config.validate().unwrap();
    }

    #[test]
    fn test_minimal_json_fills_defaults() {
        let config: UpdaterConfig = serde_json::from_str(
            r#"{"work_dir": "/data/external-resources", "progress": {"start": 0.1}}"#,
        )
        .unwrap();
        assert_eq!(config.progress.start, 0.1);
        assert_eq!(config.progress.archive, 0.75);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_progress_table_validation() {
        ProgressTable::default().validate().unwrap();

        let unordered = ProgressTable {
            extract: 0.5,
            ..Default::default()
        };
        assert!(unordered.validate().is_err());

        let out_of_range = ProgressTable {
            cleanup: 1.0,
            ..Default::default()
        };
        assert!(out_of_range.validate().is_err());
    }

    #[test]
    fn test_scale() {
        assert!((ProgressTable::scale(0.05, 0.75, 0.5) - 0.4).abs() < 1e-9);
        assert!((ProgressTable::scale(0.05, 0.75, 2.0) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_bad_cdn() {
        let mut config = UpdaterConfig::new("/data/external-resources");
        config.cdn = Some("cdn.example.com".to_string());
        assert!(matches!(config.validate(), Err(UpdateError::Config(_))));
    }

    #[test]
    fn test_config_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("resource-updater.json");

        let mut config = UpdaterConfig::new(temp_dir.path().join("external-resources"))
            .with_provider(ProviderConfig::Github {
                repo: "openblockcc/external-resources-v2".to_string(),
                api_base_url: None,
                download_base_url: None,
            });
        config.cdn = Some("https://cdn.example.com".to_string());
        config.swap_strategy = SwapStrategy::Staged;

        save_config(&config, &path).unwrap();
        assert!(!path.with_extension("tmp").exists());

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.work_dir, config.work_dir);
        assert_eq!(loaded.provider, config.provider);
        assert_eq!(loaded.cdn, config.cdn);
        assert_eq!(loaded.swap_strategy, SwapStrategy::Staged);
    }
}
