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

//! Release providers and their URL templates

use crate::error::{Result, UpdateError};
use crate::version::version_from_tag;
use serde::{Deserialize, Serialize};

const GITHUB_API: &str = "https://api.github.com";
const GITHUB_DOWNLOADS: &str = "https://github.com";
const GITEE_API: &str = "https://gitee.com";

/// Prefix of every release archive
pub const ARCHIVE_PREFIX: &str = "external-resources";

/// Suffix of every checksum sidecar
pub const CHECKSUM_SUFFIX: &str = "checksums-sha256";

/// Where resource releases are published
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    Github {
        /// `owner/name`
        repo: String,
        /// Override for the REST API origin
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_base_url: Option<String>,
        /// Override for the release download origin
        #[serde(default, skip_serializing_if = "Option::is_none")]
        download_base_url: Option<String>,
    },
    Gitee {
        repo: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_base_url: Option<String>,
    },
    /// S3-compatible bucket holding a re-uploaded `latestRelease.json`
    #[serde(alias = "spaces")]
    ObjectStorage {
        #[serde(alias = "name")]
        bucket: String,
        region: String,
        path: String,
        /// Explicit origin replacing `https://{bucket}.{region}.digitaloceanspaces.com`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
    },
}

impl ProviderConfig {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Github { .. } => "github",
            Self::Gitee { .. } => "gitee",
            Self::ObjectStorage { .. } => "object_storage",
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Github { repo, .. } | Self::Gitee { repo, .. } => {
                let mut parts = repo.split('/');
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty() => {
                        Ok(())
                    }
                    _ => Err(UpdateError::Config(format!(
                        "repo must be owner/name, got {repo:?}"
                    ))),
                }
            }
            Self::ObjectStorage { bucket, region, .. } => {
                if bucket.is_empty() || region.is_empty() {
                    return Err(UpdateError::Config(
                        "object storage needs a bucket and a region".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Endpoint describing the latest release, before any CDN prefix
    pub fn latest_release_url(&self) -> String {
        match self {
            Self::Github {
                repo, api_base_url, ..
            } => {
                let base = trim_origin(api_base_url.as_deref().unwrap_or(GITHUB_API));
                format!("{base}/repos/{repo}/releases/latest")
            }
            Self::Gitee { repo, api_base_url } => {
                let base = trim_origin(api_base_url.as_deref().unwrap_or(GITEE_API));
                format!("{base}/api/v5/repos/{repo}/releases/latest")
            }
            Self::ObjectStorage { .. } => format!("{}/latestRelease.json", self.storage_prefix()),
        }
    }

    /// Download URL for a release asset when the release payload does not
    /// list it. `None` when the provider cannot derive one.
    pub fn templated_asset_url(&self, tag: &str, asset: &str) -> Option<String> {
        match self {
            Self::Github {
                repo,
                download_base_url,
                ..
            } => {
                let base = trim_origin(download_base_url.as_deref().unwrap_or(GITHUB_DOWNLOADS));
                Some(format!("{base}/{repo}/releases/download/{tag}/{asset}"))
            }
            Self::Gitee { .. } => None,
            Self::ObjectStorage { .. } => Some(format!("{}/{asset}", self.storage_prefix())),
        }
    }

    /// Gitee lists assets by substring and its download URL stops short of
    /// the file name
    pub fn lenient_asset_match(&self) -> bool {
        matches!(self, Self::Gitee { .. })
    }

    fn storage_prefix(&self) -> String {
        let Self::ObjectStorage {
            bucket,
            region,
            path,
            endpoint,
        } = self
        else {
            return String::new();
        };
        let origin = endpoint.as_deref().map_or_else(
            || format!("https://{bucket}.{region}.digitaloceanspaces.com"),
            |e| trim_origin(e).to_string(),
        );
        let path = path.trim_matches('/');
        if path.is_empty() {
            origin
        } else {
            format!("{origin}/{path}")
        }
    }
}

fn trim_origin(origin: &str) -> &str {
    origin.trim_end_matches('/')
}

/// Route `url` through a caching proxy by prefixing its origin
pub fn with_cdn(cdn: Option<&str>, url: &str) -> String {
    match cdn.map(trim_origin) {
        Some(cdn) if !cdn.is_empty() => format!("{cdn}/{url}"),
        _ => url.to_string(),
    }
}

/// `external-resources-1.0.1.zip` for tag `v1.0.1`
pub fn archive_name(tag: &str) -> String {
    format!("{ARCHIVE_PREFIX}-{}.zip", version_from_tag(tag))
}

/// `1.0.1-checksums-sha256.txt` for tag `v1.0.1`
pub fn checksum_name(tag: &str) -> String {
    format!("{}-{CHECKSUM_SUFFIX}.txt", version_from_tag(tag))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn github() -> ProviderConfig {
        ProviderConfig::Github {
            repo: "openblockcc/external-resources-v2".to_string(),
            api_base_url: None,
            download_base_url: None,
        }
    }

    #[test]
    fn test_asset_names() {
        assert_eq!(archive_name("v1.0.1"), "external-resources-1.0.1.zip");
        assert_eq!(checksum_name("v1.0.1"), "1.0.1-checksums-sha256.txt");
        assert_eq!(archive_name("2.0.0"), "external-resources-2.0.0.zip");
    }

    #[test]
    fn test_github_urls() {
        let provider = github();
        assert_eq!(
            provider.latest_release_url(),
            "https://api.github.com/repos/openblockcc/external-resources-v2/releases/latest"
        );
        assert_eq!(
            provider
                .templated_asset_url("v1.0.1", "external-resources-1.0.1.zip")
                .unwrap(),
            "https://github.com/openblockcc/external-resources-v2/releases/download/v1.0.1/external-resources-1.0.1.zip"
        );
    }

    #[test]
    fn test_gitee_urls() {
        let provider = ProviderConfig::Gitee {
            repo: "openblockcc/external-resources-v2".to_string(),
            api_base_url: None,
        };
        assert_eq!(
            provider.latest_release_url(),
            "https://gitee.com/api/v5/repos/openblockcc/external-resources-v2/releases/latest"
        );
        assert!(provider.templated_asset_url("v1.0.1", "x.zip").is_none());
        assert!(provider.lenient_asset_match());
    }

    #[test]
    fn test_object_storage_urls() {
        let provider = ProviderConfig::ObjectStorage {
            bucket: "openblock".to_string(),
            region: "sgp1".to_string(),
            path: "/resource/".to_string(),
            endpoint: None,
        };
        assert_eq!(
            provider.latest_release_url(),
            "https://openblock.sgp1.digitaloceanspaces.com/resource/latestRelease.json"
        );
        assert_eq!(
            provider.templated_asset_url("v1.0.1", "1.0.1-checksums-sha256.txt").unwrap(),
            "https://openblock.sgp1.digitaloceanspaces.com/resource/1.0.1-checksums-sha256.txt"
        );
    }

    #[test]
    fn test_cdn_is_prepended_not_substituted() {
        let url = github().latest_release_url();
        assert_eq!(
            with_cdn(Some("https://cdn.example.com/"), &url),
            "https://cdn.example.com/https://api.github.com/repos/openblockcc/external-resources-v2/releases/latest"
        );
        assert_eq!(with_cdn(None, &url), url);
        assert_eq!(with_cdn(Some(""), &url), url);
    }

    #[test]
    fn test_spaces_alias_deserializes() {
        let provider: ProviderConfig = serde_json::from_str(
            r#"{"type": "spaces", "name": "openblock", "region": "sgp1", "path": "resource"}"#,
        )
        .unwrap();
        assert_eq!(provider.name(), "object_storage");
        provider.validate().unwrap();
    }

    #[test]
    fn test_validate_repo() {
        github().validate().unwrap();
        let bad = ProviderConfig::Github {
            repo: "no-owner".to_string(),
            api_base_url: None,
            download_base_url: None,
        };
        assert!(bad.validate().is_err());
    }
}
