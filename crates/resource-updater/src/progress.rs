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

//! Progress reporting for update sessions

use crate::state::Phase;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Minimum spacing between two transfer samples
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Callback receiving every progress event of a session
pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Raw measurement of a running transfer
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TransferSample {
    pub bytes_done: u64,
    /// `None` when the server sent no content length
    pub bytes_total: Option<u64>,
    /// Bytes per second since the previous sample
    pub rate_bps: f64,
    pub eta: Option<Duration>,
    /// 0..=1; stays 0 until completion when the total is unknown
    pub fraction: f64,
}

/// Human-readable view of a transfer for UI collaborators
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferInfo {
    pub name: String,
    pub percent: f64,
    pub speed: String,
    pub total: String,
    pub transferred: String,
    pub remaining: String,
}

impl TransferInfo {
    pub fn from_sample(name: &str, sample: &TransferSample) -> Self {
        Self {
            name: name.to_string(),
            percent: sample.fraction,
            speed: format!("{}/s", format_size(sample.rate_bps)),
            total: sample
                .bytes_total
                .map_or_else(|| "unknown".to_string(), |t| format_size(t as f64)),
            transferred: format_size(sample.bytes_done as f64),
            remaining: sample
                .eta
                .map_or_else(|| "unknown".to_string(), |eta| format_time(eta.as_secs_f64())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub phase: Phase,
    /// Overall session progress, 0..=1, never decreasing
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<TransferInfo>,
}

/// Coalesces chunk notifications into samples at most every
/// [`SAMPLE_INTERVAL`]
#[derive(Debug)]
pub struct SampleThrottle {
    total: Option<u64>,
    done: u64,
    last_emit: Instant,
    last_emit_bytes: u64,
    interval: Duration,
}

impl SampleThrottle {
    pub fn new(total: Option<u64>) -> Self {
        Self::with_interval(total, SAMPLE_INTERVAL)
    }

    pub fn with_interval(total: Option<u64>, interval: Duration) -> Self {
        Self {
            total: total.filter(|t| *t > 0),
            done: 0,
            last_emit: Instant::now(),
            last_emit_bytes: 0,
            interval,
        }
    }

    pub fn bytes_done(&self) -> u64 {
        self.done
    }

    /// Record `len` more bytes; returns a sample when one is due
    pub fn record(&mut self, len: u64) -> Option<TransferSample> {
        self.done += len;
        let now = Instant::now();
        if now.duration_since(self.last_emit) < self.interval {
            return None;
        }
        Some(self.sample_at(now, false))
    }

    /// Final sample, always emitted
    pub fn finish(&mut self) -> TransferSample {
        self.sample_at(Instant::now(), true)
    }

    fn sample_at(&mut self, now: Instant, complete: bool) -> TransferSample {
        let elapsed = now.duration_since(self.last_emit).as_secs_f64();
        let delta = self.done.saturating_sub(self.last_emit_bytes);
        let rate_bps = if elapsed > 0.0 {
            delta as f64 / elapsed
        } else {
            0.0
        };

        let fraction = match (complete, self.total) {
            (true, _) => 1.0,
            (false, Some(total)) => (self.done as f64 / total as f64).min(1.0),
            (false, None) => 0.0,
        };

        let eta = match self.total {
            _ if complete => Some(Duration::ZERO),
            Some(total) if rate_bps > 0.0 => Some(Duration::from_secs_f64(
                total.saturating_sub(self.done) as f64 / rate_bps,
            )),
            _ => None,
        };

        self.last_emit = now;
        self.last_emit_bytes = self.done;

        TransferSample {
            bytes_done: self.done,
            bytes_total: self.total,
            rate_bps,
            eta,
            fraction,
        }
    }
}

/// `532 B`, `12 KB`, `3 MB`, `1 GB`
pub fn format_size(bytes: f64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    if bytes < KB {
        format!("{} B", bytes.round())
    } else if bytes < MB {
        format!("{} KB", (bytes / KB).round())
    } else if bytes < GB {
        format!("{} MB", (bytes / MB).round())
    } else {
        format!("{} GB", (bytes / GB).round())
    }
}

/// `42s` below a minute, `3min7s` above
pub fn format_time(secs: f64) -> String {
    let secs = secs.max(0.0).round() as u64;
    if secs < 60 {
        format!("{secs}s")
    } else {
        format!("{}min{}s", secs / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0.0), "0 B");
        assert_eq!(format_size(1023.0), "1023 B");
        assert_eq!(format_size(1536.0), "2 KB");
        assert_eq!(format_size(5.0 * 1024.0 * 1024.0), "5 MB");
        assert_eq!(format_size(3.2 * 1024.0 * 1024.0 * 1024.0), "3 GB");
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0.4), "0s");
        assert_eq!(format_time(59.0), "59s");
        assert_eq!(format_time(187.0), "3min7s");
        assert_eq!(format_time(-3.0), "0s");
    }

    #[test]
    fn test_throttle_coalesces_samples() {
        let mut throttle = SampleThrottle::with_interval(Some(1000), Duration::from_secs(3600));
        assert!(throttle.record(100).is_none());
        assert!(throttle.record(100).is_none());
        assert_eq!(throttle.bytes_done(), 200);

        let last = throttle.finish();
        assert_eq!(last.bytes_done, 200);
        assert_eq!(last.fraction, 1.0);
        assert_eq!(last.eta, Some(Duration::ZERO));
    }

    #[test]
    fn test_sample_fraction_and_eta() {
        let mut throttle = SampleThrottle::with_interval(Some(1000), Duration::ZERO);
        std::thread::sleep(Duration::from_millis(5));
        let sample = throttle.record(250).unwrap();
        assert_eq!(sample.bytes_done, 250);
        assert_eq!(sample.bytes_total, Some(1000));
        assert!((sample.fraction - 0.25).abs() < 1e-9);
        assert!(sample.rate_bps > 0.0);
        assert!(sample.eta.is_some());
    }

    #[test]
    fn test_unknown_total() {
        let mut throttle = SampleThrottle::with_interval(None, Duration::ZERO);
        std::thread::sleep(Duration::from_millis(1));
        let sample = throttle.record(10).unwrap();
        assert_eq!(sample.fraction, 0.0);
        assert!(sample.eta.is_none());

        let info = TransferInfo::from_sample("external-resources-1.0.1.zip", &sample);
        assert_eq!(info.total, "unknown");
        assert_eq!(info.transferred, "10 B");
    }
}
