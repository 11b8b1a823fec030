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

//! Latest-release lookup against the configured provider

use crate::downloader::map_request_error;
use crate::error::{Result, UpdateError};
use crate::notes::ReleaseNotes;
use crate::provider::{
    ARCHIVE_PREFIX, CHECKSUM_SUFFIX, ProviderConfig, archive_name, checksum_name, with_cdn,
};
use crate::state::Phase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct ReleaseInfo {
    /// Release tag, e.g. "v1.0.1"
    pub version: String,
    pub notes: ReleaseNotes,
    /// Asset name to download URL, CDN prefix already applied
    pub asset_urls: BTreeMap<String, String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl ReleaseInfo {
    pub fn archive_url(&self) -> Option<&str> {
        self.asset_urls
            .get(&archive_name(&self.version))
            .map(String::as_str)
    }

    pub fn checksum_url(&self) -> Option<&str> {
        self.asset_urls
            .get(&checksum_name(&self.version))
            .map(String::as_str)
    }
}

/// Shape shared by GitHub, Gitee and the object-storage copy of a release
#[derive(Debug, Default, Deserialize, Serialize)]
struct ReleasePayload {
    #[serde(default)]
    tag_name: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Serialize)]
struct ReleaseAsset {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    browser_download_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReleaseResolver {
    client: reqwest::Client,
    provider: ProviderConfig,
    cdn: Option<String>,
    timeout: Duration,
}

impl ReleaseResolver {
    pub fn new(
        client: reqwest::Client,
        provider: ProviderConfig,
        cdn: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            provider,
            cdn,
            timeout,
        }
    }

    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    /// Query the provider for its latest release
    pub async fn resolve_latest(&self, cancel: &CancellationToken) -> Result<ReleaseInfo> {
        let url = with_cdn(self.cdn.as_deref(), &self.provider.latest_release_url());
        tracing::debug!("Querying latest release from {url}");

        let secs = self.timeout.as_secs();
        let request = async {
            let response = self
                .client
                .get(&url)
                .header(reqwest::header::ACCEPT, "application/json")
                .send()
                .await
                .map_err(|e| map_request_error(&url, secs, &e))?;

            // Check rate limit
            if let Some(remaining) = response.headers().get("x-ratelimit-remaining")
                && let Ok(remaining_str) = remaining.to_str()
                && let Ok(remaining_int) = remaining_str.parse::<u32>()
                && remaining_int < 10
            {
                tracing::warn!("GitHub rate limit low: {remaining_int} remaining");
            }

            let status = response.status();
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(UpdateError::NotFound(format!("no published release at {url}")));
            }
            if !status.is_success() {
                return Err(UpdateError::HttpStatus {
                    url: url.clone(),
                    status: status.as_u16(),
                });
            }

            let text = response
                .text()
                .await
                .map_err(|e| map_request_error(&url, secs, &e))?;
            Ok::<_, UpdateError>(text)
        };

        let body = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(UpdateError::Cancelled { phase: Phase::CheckingLatest });
            }
            result = tokio::time::timeout(self.timeout, request) => match result {
                Ok(body) => body?,
                Err(_) => return Err(UpdateError::Timeout { url: url.clone(), secs }),
            },
        };

        self.parse_release(&url, &body)
    }

    fn parse_release(&self, url: &str, body: &str) -> Result<ReleaseInfo> {
        let payload: ReleasePayload = serde_json::from_str(body).map_err(|e| {
            UpdateError::NotFound(format!("invalid release payload from {url}: {e}"))
        })?;

        let Some(tag) = payload.tag_name.filter(|t| !t.trim().is_empty()) else {
            return Err(UpdateError::NotFound(format!(
                "Cannot get valid releases from: {url}"
            )));
        };

        let asset_urls = self.asset_urls(&tag, &payload.assets);
        tracing::info!(
            "Latest {} release: {tag} ({} assets)",
            self.provider.name(),
            asset_urls.len()
        );

        Ok(ReleaseInfo {
            notes: ReleaseNotes::parse(payload.body.as_deref()),
            version: tag,
            asset_urls,
            published_at: payload.published_at,
        })
    }

    /// Listed assets plus the archive and sidecar for `tag`, routed through
    /// the CDN
    fn asset_urls(&self, tag: &str, assets: &[ReleaseAsset]) -> BTreeMap<String, String> {
        let lenient = self.provider.lenient_asset_match();
        let listed: Vec<(&str, String)> = assets
            .iter()
            .filter_map(|asset| {
                let name = asset.name.as_deref().filter(|n| !n.is_empty())?;
                let url = asset.browser_download_url.as_deref()?;
                let url = if lenient && !url.ends_with(name) {
                    format!("{}/{name}", url.trim_end_matches('/'))
                } else {
                    url.to_string()
                };
                Some((name, url))
            })
            .collect();

        let mut urls: BTreeMap<String, String> = listed
            .iter()
            .map(|(name, url)| ((*name).to_string(), with_cdn(self.cdn.as_deref(), url)))
            .collect();

        for (wanted, key) in [
            (archive_name(tag), ARCHIVE_PREFIX),
            (checksum_name(tag), CHECKSUM_SUFFIX),
        ] {
            if urls.contains_key(&wanted) {
                continue;
            }
            let found = if lenient {
                listed
                    .iter()
                    .find(|(name, _)| name.contains(key))
                    .map(|(_, url)| url.clone())
            } else {
                None
            };
            if let Some(url) = found.or_else(|| self.provider.templated_asset_url(tag, &wanted)) {
                urls.insert(wanted, with_cdn(self.cdn.as_deref(), &url));
            }
        }

        urls
    }
}
