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

//! Streaming downloads with progress sampling and cancellation

use crate::error::{Result, UpdateError};
use crate::progress::{SampleThrottle, TransferSample};
use crate::state::Phase;
use futures_util::StreamExt;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

pub fn build_client(user_agent: &str, connect_timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .connect_timeout(connect_timeout)
        .build()
        .map_err(|e| UpdateError::Config(format!("Failed to build HTTP client: {e}")))
}

pub(crate) fn map_request_error(url: &str, secs: u64, err: &reqwest::Error) -> UpdateError {
    if err.is_timeout() {
        UpdateError::Timeout {
            url: url.to_string(),
            secs,
        }
    } else {
        UpdateError::Network {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
    timeout: Duration,
}

impl Downloader {
    /// `timeout` bounds the wait for response headers and every idle gap
    /// between body chunks
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Stream `url` into `dest`, returning the number of bytes written.
    ///
    /// Memory use does not grow with the body size. `phase` is reported if
    /// the transfer is cancelled. A partial `dest` is removed on failure.
    pub async fn fetch<F>(
        &self,
        phase: Phase,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<u64>
    where
        F: FnMut(&TransferSample) + Send,
    {
        let result = self
            .stream_to_file(phase, url, dest, cancel, &mut on_progress)
            .await;

        if let Err(ref e) = result {
            tracing::debug!("Download of {url} failed: {e}");
            if let Err(remove_err) = tokio::fs::remove_file(dest).await
                && remove_err.kind() != std::io::ErrorKind::NotFound
            {
                tracing::warn!(
                    "Failed to remove partial download {}: {remove_err}",
                    dest.display()
                );
            }
        }

        result
    }

    async fn stream_to_file<F>(
        &self,
        phase: Phase,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
        on_progress: &mut F,
    ) -> Result<u64>
    where
        F: FnMut(&TransferSample) + Send,
    {
        let secs = self.timeout.as_secs();
        tracing::debug!("Downloading {url} to {}", dest.display());

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(UpdateError::Cancelled { phase }),
            result = tokio::time::timeout(self.timeout, self.client.get(url).send()) => match result {
                Ok(response) => response.map_err(|e| map_request_error(url, secs, &e))?,
                Err(_) => {
                    return Err(UpdateError::Timeout { url: url.to_string(), secs });
                }
            },
        };

        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| UpdateError::fs("create directory", parent, e))?;
        }

        let total = response.content_length();
        let mut throttle = SampleThrottle::new(total);
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| UpdateError::fs("create", dest, e))?;
        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(UpdateError::Cancelled { phase }),
                next = tokio::time::timeout(self.timeout, stream.next()) => next,
            };

            let chunk = match next {
                Err(_) => {
                    return Err(UpdateError::Timeout {
                        url: url.to_string(),
                        secs,
                    });
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => return Err(map_request_error(url, secs, &e)),
                Ok(Some(Ok(chunk))) => chunk,
            };

            file.write_all(&chunk)
                .await
                .map_err(|e| UpdateError::fs("write", dest, e))?;

            if let Some(sample) = throttle.record(chunk.len() as u64) {
                on_progress(&sample);
            }
        }

        file.flush()
            .await
            .map_err(|e| UpdateError::fs("flush", dest, e))?;
        file.sync_all()
            .await
            .map_err(|e| UpdateError::fs("sync", dest, e))?;
        drop(file);

        let done = throttle.bytes_done();
        if let Some(total) = total
            && done != total
        {
            return Err(UpdateError::Network {
                url: url.to_string(),
                message: format!("body ended after {done} of {total} bytes"),
            });
        }

        on_progress(&throttle.finish());
        tracing::debug!("Downloaded {done} bytes from {url}");
        Ok(done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use tempfile::TempDir;

    fn downloader() -> Downloader {
        let client = build_client("resource-updater-test", Duration::from_secs(5)).unwrap();
        Downloader::new(client, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_fetch_streams_to_disk() {
        let mut server = Server::new_async().await;
        let body = vec![7u8; 512 * 1024];
        let mock = server
            .mock("GET", "/external-resources-1.0.1.zip")
            .with_status(200)
            .with_body(&body)
            .create_async()
            .await;

        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("download/external-resources-1.0.1.zip");
        let mut samples = Vec::new();

        let written = downloader()
            .fetch(
                Phase::DownloadingArchive,
                &format!("{}/external-resources-1.0.1.zip", server.url()),
                &dest,
                &CancellationToken::new(),
                |sample| samples.push(*sample),
            )
            .await
            .unwrap();

        assert_eq!(written, body.len() as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), body);

        let last = samples.last().unwrap();
        assert_eq!(last.fraction, 1.0);
        assert_eq!(last.bytes_done, body.len() as u64);
        assert!(samples.windows(2).all(|w| w[0].bytes_done <= w[1].bytes_done));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_http_error_leaves_no_file() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/missing.txt")
            .with_status(404)
            .create_async()
            .await;

        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("missing.txt");

        let err = downloader()
            .fetch(
                Phase::DownloadingChecksum,
                &format!("{}/missing.txt", server.url()),
                &dest,
                &CancellationToken::new(),
                |_| {},
            )
            .await
            .unwrap_err();

        assert!(matches!(err, UpdateError::HttpStatus { status: 404, .. }));
        assert!(!dest.exists());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_cancelled() {
        let server = Server::new_async().await;
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("archive.zip");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = downloader()
            .fetch(
                Phase::DownloadingArchive,
                &format!("{}/archive.zip", server.url()),
                &dest,
                &cancel,
                |_| {},
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            UpdateError::Cancelled {
                phase: Phase::DownloadingArchive
            }
        ));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_fetch_unreachable_host() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("archive.zip");

        // Port 9 (discard) is not expected to accept HTTP connections
        let err = downloader()
            .fetch(
                Phase::DownloadingArchive,
                "http://127.0.0.1:9/archive.zip",
                &dest,
                &CancellationToken::new(),
                |_| {},
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            UpdateError::Network { .. } | UpdateError::Timeout { .. }
        ));
        assert!(!dest.exists());
    }

    /// Server that reads one request, writes `reply` and then stalls
    async fn stalling_server(reply: &'static [u8]) -> String {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket.write_all(reply).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        format!("http://{addr}")
    }

    fn impatient_downloader() -> Downloader {
        let client = build_client("resource-updater-test", Duration::from_secs(5)).unwrap();
        Downloader::new(client, Duration::from_millis(300))
    }

    #[tokio::test]
    async fn test_fetch_times_out_waiting_for_headers() {
        let base = stalling_server(b"").await;
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("archive.zip");

        let err = impatient_downloader()
            .fetch(
                Phase::DownloadingArchive,
                &format!("{base}/archive.zip"),
                &dest,
                &CancellationToken::new(),
                |_| {},
            )
            .await
            .unwrap_err();

        assert!(matches!(err, UpdateError::Timeout { .. }), "got {err:?}");
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_fetch_times_out_on_stalled_body() {
        let base = stalling_server(
            b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\nContent-Type: application/zip\r\n\r\n0123456789",
        )
        .await;
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("archive.zip");
        let mut samples = Vec::new();

        let err = impatient_downloader()
            .fetch(
                Phase::DownloadingArchive,
                &format!("{base}/archive.zip"),
                &dest,
                &CancellationToken::new(),
                |sample| samples.push(*sample),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, UpdateError::Timeout { .. }), "got {err:?}");
        assert!(!dest.exists());
        assert!(samples.iter().all(|s| s.bytes_done <= 10));
    }
}
