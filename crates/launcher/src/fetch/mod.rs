//! Archive fetching
//!
//! Streams a remote archive straight to disk. The body is never buffered in
//! memory, so archives of any size can be fetched.

pub mod http;
pub mod validation;

pub use http::HttpFetcher;
pub use validation::ArchiveValidation;

use crate::error::Result;
use crate::progress::ProgressCallback;
use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Trait for archive fetch implementations
#[async_trait]
pub trait ArchiveFetcher: Send + Sync {
    /// Stream `url` into `dest_path`, replacing any existing file.
    ///
    /// Returns the number of bytes written. On failure nothing is left at
    /// `dest_path` and every error is reported as `DownloadFailed`.
    async fn fetch(
        &self,
        url: &str,
        dest_path: &Path,
        progress_callback: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<u64>;
}
