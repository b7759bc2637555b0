//! HTTP archive fetcher

use crate::config::LauncherConfig;
use crate::error::{FileOperation, LauncherError, Result};
use crate::fetch::ArchiveFetcher;
use crate::progress::{ProgressCallback, ProgressEvent, redact_query};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

/// Minimum interval between two `DownloadProgress` events
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Streams archives over HTTP(S) into a `.part` file and renames it into place
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    stall_timeout: Duration,
}

impl HttpFetcher {
    /// Create a fetcher from launcher configuration
    pub fn from_config(config: &LauncherConfig) -> Result<Self> {
        // No overall request timeout: archives can take hours. Stalls are
        // caught per chunk instead.
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| LauncherError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
                field: None,
            })?;

        Ok(Self {
            client,
            stall_timeout: config.stall_timeout,
        })
    }

    /// Use an existing client, e.g. one shared with other components
    pub fn with_client(client: Client, stall_timeout: Duration) -> Self {
        Self { client, stall_timeout }
    }

    async fn stream_to_file(
        &self,
        url: &str,
        temp_path: &Path,
        progress_callback: Option<&ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(url)),
            response = tokio::time::timeout(self.stall_timeout, self.client.get(url).send()) => {
                response.map_err(|_| stalled(url, self.stall_timeout))??
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(LauncherError::download(
                url,
                format!("server responded with {}", status),
            ));
        }

        let total_size = response.content_length();
        debug!("Content length: {:?}", total_size);

        if let Some(callback) = progress_callback {
            callback(ProgressEvent::DownloadStarted {
                url: redact_query(url).to_string(),
                total_size,
            });
        }

        let mut file = fs::File::create(temp_path)
            .await
            .map_err(|e| file_error(url, temp_path, FileOperation::Create, e))?;

        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;
        let start_time = Instant::now();
        let mut last_progress_time = start_time;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(url)),
                next = tokio::time::timeout(self.stall_timeout, stream.next()) => {
                    next.map_err(|_| stalled(url, self.stall_timeout))?
                }
            };

            let Some(chunk) = next else { break };
            let chunk = chunk?;

            file.write_all(&chunk)
                .await
                .map_err(|e| file_error(url, temp_path, FileOperation::Write, e))?;
            downloaded += chunk.len() as u64;

            let now = Instant::now();
            if now.duration_since(last_progress_time) >= PROGRESS_INTERVAL {
                if let Some(callback) = progress_callback {
                    let elapsed = start_time.elapsed().as_secs_f64();
                    let speed = if elapsed > 0.0 { downloaded as f64 / elapsed } else { 0.0 };
                    callback(ProgressEvent::DownloadProgress {
                        url: redact_query(url).to_string(),
                        downloaded,
                        total: total_size,
                        speed_bps: speed,
                    });
                }
                last_progress_time = now;
            }
        }

        if let Some(expected) = total_size {
            if downloaded != expected {
                return Err(LauncherError::download(
                    url,
                    format!("connection closed after {} of {} bytes", downloaded, expected),
                ));
            }
        }

        file.flush()
            .await
            .map_err(|e| file_error(url, temp_path, FileOperation::Write, e))?;
        file.sync_all()
            .await
            .map_err(|e| file_error(url, temp_path, FileOperation::Write, e))?;

        Ok(downloaded)
    }
}

#[async_trait]
impl ArchiveFetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        dest_path: &Path,
        progress_callback: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        async move {
            let parsed = url::Url::parse(url)
                .map_err(|e| LauncherError::download(url, format!("invalid url: {}", e)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(LauncherError::download(
                    url,
                    format!("unsupported url scheme '{}'", parsed.scheme()),
                ));
            }

            // A stale archive from an earlier attempt must not survive a failed fetch.
            remove_if_exists(dest_path)
                .await
                .map_err(|e| file_error(url, dest_path, FileOperation::Delete, e))?;

            let temp_path = create_temp_path(dest_path);
            let result = self
                .stream_to_file(url, &temp_path, progress_callback.as_ref(), cancel)
                .await;

            let downloaded = match result {
                Ok(downloaded) => downloaded,
                Err(err) => {
                    if let Err(cleanup) = remove_if_exists(&temp_path).await {
                        warn!("Failed to remove partial download {}: {}", temp_path.display(), cleanup);
                    }
                    return Err(err);
                }
            };

            if let Err(e) = fs::rename(&temp_path, dest_path).await {
                if let Err(cleanup) = remove_if_exists(&temp_path).await {
                    warn!("Failed to remove partial download {}: {}", temp_path.display(), cleanup);
                }
                return Err(file_error(url, dest_path, FileOperation::Rename, e));
            }

            if let Some(ref callback) = progress_callback {
                callback(ProgressEvent::DownloadComplete {
                    url: redact_query(url).to_string(),
                    final_size: downloaded,
                });
            }

            debug!("Download completed: {} bytes", downloaded);
            Ok(downloaded)
        }
        .instrument(info_span!("fetch_archive", url = %redact_query(url)))
        .await
    }
}

/// Path of the in-progress download next to its final destination
pub fn create_temp_path(dest_path: &Path) -> PathBuf {
    let mut name = dest_path.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn file_error(url: &str, path: &Path, operation: FileOperation, source: std::io::Error) -> LauncherError {
    LauncherError::DownloadFailed {
        url: redact_query(url).to_string(),
        reason: format!("{} '{}' failed: {}", operation, path.display(), source),
        source: Some(Box::new(source)),
    }
}

fn stalled(url: &str, after: Duration) -> LauncherError {
    LauncherError::download(url, format!("no data received for {}s", after.as_secs()))
}

fn cancelled(url: &str) -> LauncherError {
    LauncherError::download(url, "cancelled")
}
