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

//! Release tag parsing and comparison

use crate::error::{Result, UpdateError};
use semver::Version;
use std::cmp::Ordering;

/// Parse a release tag as a semantic version ("1.0.1", "v1.0.1",
/// "v1.2.0-beta.3")
pub fn parse_version(s: &str) -> Result<Version> {
    let trimmed = s.trim();
    Version::parse(version_from_tag(trimmed))
        .map_err(|e| UpdateError::VersionParse(format!("Invalid version {trimmed:?}: {e}")))
}

/// Ordering of `remote` relative to `local` by semver precedence; build
/// metadata is ignored
pub fn compare_versions(local: &str, remote: &str) -> Result<Ordering> {
    let (local, remote) = (parse_version(local)?, parse_version(remote)?);
    Ok((remote.major, remote.minor, remote.patch, &remote.pre).cmp(&(
        local.major,
        local.minor,
        local.patch,
        &local.pre,
    )))
}

/// Returns true if `remote` is newer than `local`
pub fn is_newer(local: &str, remote: &str) -> Result<bool> {
    Ok(compare_versions(local, remote)? == Ordering::Greater)
}

/// Strip the leading "v" of a release tag
pub fn version_from_tag(tag: &str) -> &str {
    tag.trim_start_matches(['v', 'V'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("1.0.1").unwrap(), Version::new(1, 0, 1));
        assert_eq!(parse_version("v1.0.1").unwrap(), Version::new(1, 0, 1));
        assert_eq!(parse_version("V2.10.30").unwrap(), Version::new(2, 10, 30));
        assert_eq!(parse_version(" v0.9.9 ").unwrap(), Version::new(0, 9, 9));

        let beta = parse_version("v1.2.0-beta.3").unwrap();
        assert_eq!((beta.major, beta.minor, beta.patch), (1, 2, 0));
        assert_eq!(beta.pre.as_str(), "beta.3");
    }

    #[test]
    fn test_parse_version_invalid() {
        assert!(parse_version("latest").is_err());
        assert!(parse_version("1.2").is_err());
        assert!(parse_version("1.2.3.4").is_err());
        assert!(parse_version("a.b.c").is_err());
        assert!(parse_version("").is_err());
    }

    #[test]
    fn test_is_newer() {
        assert!(is_newer("v1.0.0", "v1.0.1").unwrap());
        assert!(!is_newer("v1.0.1", "v1.0.1").unwrap());
        assert!(!is_newer("v1.0.2", "v1.0.1").unwrap());
        assert!(is_newer("v1.9.9", "v1.10.0").unwrap());
        assert!(is_newer("0.9.99", "v1.0.0").unwrap());
        assert!(!is_newer("2.0.0", "v1.99.99").unwrap());
    }

    #[test]
    fn test_prerelease_ordering() {
        assert!(is_newer("v1.2.0-beta.3", "v1.2.0").unwrap());
        assert!(is_newer("v1.2.0-beta.3", "v1.2.0-beta.11").unwrap());
        assert!(is_newer("v1.2.0-alpha.1", "v1.2.0-beta.1").unwrap());
        assert!(!is_newer("v1.2.0", "v1.2.0-rc.1").unwrap());
        assert!(is_newer("v1.1.9", "v1.2.0-rc.1").unwrap());
    }

    #[test]
    fn test_build_metadata_is_ignored() {
        assert_eq!(
            compare_versions("v1.0.1+build.1", "v1.0.1+build.2").unwrap(),
            Ordering::Equal
        );
        assert!(!is_newer("v1.0.1+abc", "v1.0.1").unwrap());
    }

    #[test]
    fn test_version_from_tag_strips_v() {
        assert_eq!(version_from_tag("v1.0.1"), "1.0.1");
        assert_eq!(version_from_tag("V1.0.1"), "1.0.1");
        assert_eq!(version_from_tag("1.0.1"), "1.0.1");
    }
}
