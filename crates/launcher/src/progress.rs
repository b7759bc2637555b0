//! Progress tracking and reporting for install operations
//!
//! Progress is presentation only: callbacks observe the pipeline but never
//! influence its outcome.

use crate::orchestrator::TaskState;
use serde::Serialize;
use std::sync::Arc;

/// Progress callback for install operations
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Events emitted while a game is fetched and installed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ProgressEvent {
    DownloadStarted {
        url: String,
        total_size: Option<u64>,
    },
    DownloadProgress {
        url: String,
        downloaded: u64,
        total: Option<u64>,
        speed_bps: f64,
    },
    DownloadComplete {
        url: String,
        final_size: u64,
    },
    ExtractionStarted {
        archive: String,
        entries: usize,
    },
    EntryExtracted {
        entry: String,
        index: usize,
        total: usize,
    },
    ExtractionComplete {
        files: usize,
        directories: usize,
        bytes: u64,
    },
    TaskStateChanged {
        game_id: String,
        state: TaskState,
    },
}

/// Trait for progress reporting with more granular control
pub trait ProgressReporter: Send + Sync {
    fn on_download_started(&self, _url: &str, _total_size: Option<u64>) {}
    fn on_download_progress(&self, _url: &str, _downloaded: u64, _total: Option<u64>, _speed_bps: f64) {}
    fn on_download_complete(&self, _url: &str, _final_size: u64) {}
    fn on_extraction_started(&self, _archive: &str, _entries: usize) {}
    fn on_entry_extracted(&self, _entry: &str, _index: usize, _total: usize) {}
    fn on_extraction_complete(&self, _files: usize, _directories: usize, _bytes: u64) {}
    fn on_task_state_changed(&self, _game_id: &str, _state: TaskState) {}
}

/// Extension trait to convert ProgressReporter to ProgressCallback
pub trait IntoProgressCallback {
    fn into_callback(self) -> ProgressCallback;
}

impl<T: ProgressReporter + 'static> IntoProgressCallback for T {
    fn into_callback(self) -> ProgressCallback {
        Arc::new(move |event: ProgressEvent| match event {
            ProgressEvent::DownloadStarted { url, total_size } => {
                self.on_download_started(&url, total_size);
            }
            ProgressEvent::DownloadProgress { url, downloaded, total, speed_bps } => {
                self.on_download_progress(&url, downloaded, total, speed_bps);
            }
            ProgressEvent::DownloadComplete { url, final_size } => {
                self.on_download_complete(&url, final_size);
            }
            ProgressEvent::ExtractionStarted { archive, entries } => {
                self.on_extraction_started(&archive, entries);
            }
            ProgressEvent::EntryExtracted { entry, index, total } => {
                self.on_entry_extracted(&entry, index, total);
            }
            ProgressEvent::ExtractionComplete { files, directories, bytes } => {
                self.on_extraction_complete(files, directories, bytes);
            }
            ProgressEvent::TaskStateChanged { game_id, state } => {
                self.on_task_state_changed(&game_id, state);
            }
        })
    }
}

/// Reporter that ignores every event
#[derive(Debug, Default)]
pub struct NullProgressReporter;

impl ProgressReporter for NullProgressReporter {}

/// Simple console progress reporter implementation
#[derive(Debug, Default)]
pub struct ConsoleProgressReporter {
    pub verbose: bool,
}

impl ConsoleProgressReporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn on_download_started(&self, url: &str, total_size: Option<u64>) {
        match total_size {
            Some(size) => eprintln!("Downloading {} ({} bytes)", redact_query(url), size),
            None => eprintln!("Downloading {}", redact_query(url)),
        }
    }

    fn on_download_progress(&self, _url: &str, downloaded: u64, total: Option<u64>, speed_bps: f64) {
        if !self.verbose {
            return;
        }
        let speed_mb = speed_bps / 1_000_000.0;
        match total {
            Some(total) if total > 0 => {
                let percent = (downloaded as f64 / total as f64) * 100.0;
                eprintln!("  {:.1}% ({}/{} bytes, {:.2} MB/s)", percent, downloaded, total, speed_mb);
            }
            _ => eprintln!("  {} bytes ({:.2} MB/s)", downloaded, speed_mb),
        }
    }

    fn on_download_complete(&self, _url: &str, final_size: u64) {
        eprintln!("Download complete: {} bytes", final_size);
    }

    fn on_extraction_started(&self, archive: &str, entries: usize) {
        eprintln!("Extracting {} ({} entries)", archive, entries);
    }

    fn on_entry_extracted(&self, entry: &str, index: usize, total: usize) {
        if self.verbose {
            eprintln!("  [{}/{}] {}", index + 1, total, entry);
        }
    }

    fn on_extraction_complete(&self, files: usize, directories: usize, bytes: u64) {
        eprintln!(
            "Extraction complete: {} files, {} directories, {} bytes",
            files, directories, bytes
        );
    }
}

/// Strip the query string from a pre-signed URL before it is displayed
pub(crate) fn redact_query(url: &str) -> &str {
    url.split_once('?').map(|(base, _)| base).unwrap_or(url)
}
