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

//! Fixtures shared by the pipeline integration tests

#![allow(dead_code)]

use mockito::{Mock, ServerGuard};
use resource_updater::manifest::{BundleManifest, seal_bundle};
use resource_updater::{ProviderConfig, UpdaterConfig};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

pub const REPO: &str = "openblockcc/external-resources-v2";
pub const RELEASE_PATH: &str = "/repos/openblockcc/external-resources-v2/releases/latest";

/// Files of the installed bundle
pub const OLD_FILES: &[(&str, &str)] = &[
    ("devices/arduino/index.js", "module.exports = 'uno';"),
    ("extensions/led/index.js", "// led v1"),
];

/// Files of the published bundle
pub const NEW_FILES: &[(&str, &str)] = &[
    ("devices/arduino/index.js", "module.exports = 'uno r4';"),
    ("devices/microbit/index.js", "module.exports = 'microbit';"),
    ("extensions/led/index.js", "// led v2"),
    (".gitignore", "node_modules"),
];

/// How the manifest inside a published archive is prepared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seal {
    /// Correct tree digest
    Sealed,
    /// A digest that does not match the content
    Wrong,
    /// No digest at all
    Unsealed,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn work_dir(temp: &TempDir) -> PathBuf {
    temp.path().join("external-resources")
}

pub fn config(temp: &TempDir, server: &ServerGuard) -> UpdaterConfig {
    UpdaterConfig::new(work_dir(temp)).with_provider(ProviderConfig::Github {
        repo: REPO.to_string(),
        api_base_url: Some(server.url()),
        download_base_url: Some(server.url()),
    })
}

fn write_files(dir: &Path, files: &[(&str, &str)]) {
    for (name, content) in files {
        let path = dir.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }
}

/// Installed bundle at `work_dir` reporting `version`
pub fn install_bundle(work_dir: &Path, version: &str) {
    std::fs::create_dir_all(work_dir).unwrap();
    write_files(work_dir, OLD_FILES);
    BundleManifest::new(version).save(work_dir).unwrap();
    seal_bundle(work_dir).unwrap();
}

/// Zip of a freshly built bundle for `version`
pub fn bundle_zip(version: &str, seal: Seal) -> Vec<u8> {
    let source = TempDir::new().unwrap();
    let root = source.path();
    write_files(root, NEW_FILES);
    BundleManifest::new(version).save(root).unwrap();
    match seal {
        Seal::Sealed => {
            seal_bundle(root).unwrap();
        }
        Seal::Wrong => {
            let mut manifest = BundleManifest::new(version);
            manifest.sha256 = Some("0".repeat(64));
            manifest.save(root).unwrap();
        }
        Seal::Unsealed => {}
    }

    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.unwrap();
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry
            .path()
            .strip_prefix(root)
            .unwrap()
            .to_string_lossy()
            .replace('\\', "/");
        writer.start_file(name, options).unwrap();
        writer
            .write_all(&std::fs::read(entry.path()).unwrap())
            .unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Sidecar listing `archive` under the archive name of `version`
pub fn sidecar_for(version: &str, archive: &[u8]) -> String {
    format!(
        "{}  {}\n",
        sha256_hex(archive),
        resource_updater::provider::archive_name(version)
    )
}

pub fn asset_path(tag: &str, asset: &str) -> String {
    format!("/{REPO}/releases/download/{tag}/{asset}")
}

/// Mocks for a published release: the latest-release query and both assets
pub struct PublishedRelease {
    pub latest: Mock,
    pub archive: Mock,
    pub checksum: Mock,
}

pub async fn publish(
    server: &mut ServerGuard,
    tag: &str,
    archive: &[u8],
    sidecar: &str,
) -> PublishedRelease {
    publish_expecting(server, tag, archive, sidecar, 1, 1).await
}

/// [`publish`] with the number of release queries and asset downloads each
/// mock expects
pub async fn publish_expecting(
    server: &mut ServerGuard,
    tag: &str,
    archive: &[u8],
    sidecar: &str,
    queries: usize,
    downloads: usize,
) -> PublishedRelease {
    let body = serde_json::json!({
        "tag_name": tag,
        "body": "{\"en\": \"New boards\", \"zh-cn\": \"新板卡\"}",
        "assets": [],
    });
    let latest = server
        .mock("GET", RELEASE_PATH)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .expect(queries)
        .create_async()
        .await;
    let archive = server
        .mock(
            "GET",
            asset_path(tag, &resource_updater::provider::archive_name(tag)).as_str(),
        )
        .with_status(200)
        .with_body(archive)
        .expect(downloads)
        .create_async()
        .await;
    let checksum = server
        .mock(
            "GET",
            asset_path(tag, &resource_updater::provider::checksum_name(tag)).as_str(),
        )
        .with_status(200)
        .with_body(sidecar)
        .expect(downloads)
        .create_async()
        .await;

    PublishedRelease {
        latest,
        archive,
        checksum,
    }
}

/// Relative paths of everything below `dir`, sorted
pub fn snapshot(dir: &Path) -> Vec<(String, Vec<u8>)> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.unwrap();
        let relative = entry
            .path()
            .strip_prefix(dir)
            .unwrap()
            .to_string_lossy()
            .into_owned();
        let content = if entry.file_type().is_file() {
            std::fs::read(entry.path()).unwrap()
        } else {
            Vec::new()
        };
        entries.push((relative, content));
    }
    entries
}
