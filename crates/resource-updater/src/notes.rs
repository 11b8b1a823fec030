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

//! Release notes parsing

use serde::Serialize;
use std::collections::BTreeMap;

/// Release notes as published in the release body.
///
/// Bodies are either a JSON object keyed by locale or markdown split by
/// `## <locale>` headings. Anything else is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ReleaseNotes {
    Structured(BTreeMap<String, String>),
    Raw(String),
}

impl ReleaseNotes {
    /// Never fails: unparseable bodies degrade to [`ReleaseNotes::Raw`]
    pub fn parse(body: Option<&str>) -> Self {
        let body = body.unwrap_or_default().trim();
        if body.is_empty() {
            return Self::Raw(String::new());
        }

        if let Some(sections) = parse_json(body).or_else(|| parse_sections(body)) {
            return Self::Structured(sections);
        }

        tracing::debug!("release notes are not structured, keeping raw text");
        Self::Raw(body.to_string())
    }

    /// Text for `locale`, falling back to English, then to the raw body
    pub fn for_locale(&self, locale: &str) -> Option<&str> {
        match self {
            Self::Structured(sections) => sections
                .get(locale)
                .or_else(|| sections.get("en"))
                .map(String::as_str),
            Self::Raw(text) if text.is_empty() => None,
            Self::Raw(text) => Some(text),
        }
    }
}

fn parse_json(body: &str) -> Option<BTreeMap<String, String>> {
    if !body.starts_with('{') {
        return None;
    }
    let sections: BTreeMap<String, String> = serde_json::from_str(body).ok()?;
    (!sections.is_empty()).then_some(sections)
}

fn parse_sections(body: &str) -> Option<BTreeMap<String, String>> {
    let mut sections = BTreeMap::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in body.lines() {
        if let Some(heading) = line.strip_prefix("## ") {
            if let Some((key, lines)) = current.take() {
                sections.insert(key, lines.join("\n").trim().to_string());
            }
            current = Some((heading.trim().to_string(), Vec::new()));
        } else if let Some((_, lines)) = current.as_mut() {
            lines.push(line);
        } else if !line.trim().is_empty() {
            // Text before the first heading means this is not a sectioned body
            return None;
        }
    }

    if let Some((key, lines)) = current {
        sections.insert(key, lines.join("\n").trim().to_string());
    }

    (!sections.is_empty()).then_some(sections)
}
