//! Error taxonomy for the download–install–launch pipeline
//!
//! Every failure that crosses the orchestrator boundary is a [`LauncherError`].
//! Each variant maps onto a machine-checkable [`ErrorKind`] so the UI can decide
//! how to present it (retry button, purchase prompt, re-login prompt) without
//! parsing messages.

use serde::{Deserialize, Serialize};
use std::error::Error as _;
use std::path::PathBuf;
use thiserror::Error;

use crate::progress::redact_query;

/// Errors produced by the launcher core
#[derive(Error, Debug)]
pub enum LauncherError {
    /// Network, transport or local write failure while fetching an archive.
    /// The partially written archive has already been removed.
    #[error("Download of '{url}' failed: {reason}")]
    DownloadFailed {
        url: String,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The archive could not be read, failed integrity checks, or contains
    /// entries that would escape the installation directory.
    #[error("Invalid archive '{archive}': {reason}")]
    InvalidArchive { archive: PathBuf, reason: String },

    /// Writing an extracted entry failed; the target directory is left
    /// partially populated and the archive is kept for a retry.
    #[error("Extraction of entry '{entry}' failed: {reason}")]
    ExtractionFailed {
        entry: String,
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// The ownership oracle reports a zero balance for this principal.
    #[error("Principal '{principal}' does not own game {game_id}")]
    OwnershipDenied { principal: String, game_id: String },

    /// The ownership oracle could not be queried. Launch is blocked.
    #[error("Ownership verification for game {game_id} failed: {reason}")]
    VerificationFailed { game_id: String, reason: String },

    /// The executable is missing or the OS refused to start it.
    #[error("Failed to launch '{path}': {reason}")]
    LaunchFailed {
        path: PathBuf,
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Another install for the same game is still running.
    #[error("An install for game {game_id} is already in progress")]
    Busy { game_id: String },

    /// Launch identity looks like a placeholder rather than a signed-in user.
    #[error("Invalid launch identity: {reason}")]
    InvalidIdentity { reason: String },

    /// Malformed request coming from the UI or the command line.
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Invalid configuration detected at bootstrap
    #[error("Invalid configuration: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },
}

/// Machine-checkable classification of a [`LauncherError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    DownloadFailed,
    InvalidArchive,
    ExtractionFailed,
    OwnershipDenied,
    VerificationFailed,
    LaunchFailed,
    Busy,
    InvalidIdentity,
    InvalidRequest,
    Configuration,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::DownloadFailed => "DownloadFailed",
            ErrorKind::InvalidArchive => "InvalidArchive",
            ErrorKind::ExtractionFailed => "ExtractionFailed",
            ErrorKind::OwnershipDenied => "OwnershipDenied",
            ErrorKind::VerificationFailed => "VerificationFailed",
            ErrorKind::LaunchFailed => "LaunchFailed",
            ErrorKind::Busy => "Busy",
            ErrorKind::InvalidIdentity => "InvalidIdentity",
            ErrorKind::InvalidRequest => "InvalidRequest",
            ErrorKind::Configuration => "Configuration",
        };
        f.write_str(name)
    }
}

/// Types of file operations for error context
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FileOperation {
    Read,
    Write,
    Create,
    Delete,
    Rename,
    CreateDir,
}

impl std::fmt::Display for FileOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileOperation::Read => write!(f, "reading"),
            FileOperation::Write => write!(f, "writing"),
            FileOperation::Create => write!(f, "creating"),
            FileOperation::Delete => write!(f, "deleting"),
            FileOperation::Rename => write!(f, "renaming"),
            FileOperation::CreateDir => write!(f, "creating directory"),
        }
    }
}

pub type Result<T> = std::result::Result<T, LauncherError>;

impl LauncherError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LauncherError::DownloadFailed { .. } => ErrorKind::DownloadFailed,
            LauncherError::InvalidArchive { .. } => ErrorKind::InvalidArchive,
            LauncherError::ExtractionFailed { .. } => ErrorKind::ExtractionFailed,
            LauncherError::OwnershipDenied { .. } => ErrorKind::OwnershipDenied,
            LauncherError::VerificationFailed { .. } => ErrorKind::VerificationFailed,
            LauncherError::LaunchFailed { .. } => ErrorKind::LaunchFailed,
            LauncherError::Busy { .. } => ErrorKind::Busy,
            LauncherError::InvalidIdentity { .. } => ErrorKind::InvalidIdentity,
            LauncherError::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            LauncherError::Configuration { .. } => ErrorKind::Configuration,
        }
    }

    /// Whether the same request can succeed later without the user changing anything
    pub fn is_retryable(&self) -> bool {
        match self {
            LauncherError::DownloadFailed { .. } => true,
            LauncherError::InvalidArchive { .. } => false, // needs a fresh download
            LauncherError::ExtractionFailed { .. } => true, // re-install is idempotent
            LauncherError::OwnershipDenied { .. } => false, // needs a purchase
            LauncherError::VerificationFailed { .. } => true,
            LauncherError::LaunchFailed { .. } => false, // needs a repaired install
            LauncherError::Busy { .. } => true,
            LauncherError::InvalidIdentity { .. } => false,
            LauncherError::InvalidRequest { .. } => false,
            LauncherError::Configuration { .. } => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            LauncherError::DownloadFailed { .. } => "download_failed",
            LauncherError::InvalidArchive { .. } => "invalid_archive",
            LauncherError::ExtractionFailed { .. } => "extraction_failed",
            LauncherError::OwnershipDenied { .. } => "ownership_denied",
            LauncherError::VerificationFailed { .. } => "verification_failed",
            LauncherError::LaunchFailed { .. } => "launch_failed",
            LauncherError::Busy { .. } => "busy",
            LauncherError::InvalidIdentity { .. } => "invalid_identity",
            LauncherError::InvalidRequest { .. } => "invalid_request",
            LauncherError::Configuration { .. } => "configuration",
        }
    }

    /// Create a detailed error report for debugging
    pub fn detailed_report(&self) -> String {
        let mut report = format!("Error: {}\n", self);
        report.push_str(&format!("Kind: {}\n", self.kind()));
        report.push_str(&format!("Retryable: {}\n", self.is_retryable()));

        if let Some(source) = self.source() {
            report.push_str(&format!("Root cause: {}\n", source));
        }

        report
    }

    pub(crate) fn download<U: Into<String>, R: Into<String>>(url: U, reason: R) -> Self {
        let url = url.into();
        LauncherError::DownloadFailed {
            url: redact_query(&url).to_string(),
            reason: reason.into(),
            source: None,
        }
    }

    pub(crate) fn invalid_request<S: Into<String>>(message: S) -> Self {
        LauncherError::InvalidRequest {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for LauncherError {
    fn from(error: reqwest::Error) -> Self {
        let url = error
            .url()
            .map(|u| redact_query(u.as_str()).to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        // The source is displayed in reports, so it must not carry the signed query
        let error = error.without_url();
        let reason = if error.is_timeout() {
            "request timed out".to_string()
        } else if let Some(status) = error.status() {
            format!("server responded with {}", status)
        } else {
            error.to_string()
        };

        LauncherError::DownloadFailed {
            url,
            reason,
            source: Some(Box::new(error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_the_taxonomy() {
        let busy = LauncherError::Busy {
            game_id: "a870d0a2-23c3-42e7-9154-8c81e3a6f112".into(),
        };
        assert_eq!(busy.kind(), ErrorKind::Busy);
        assert!(busy.is_retryable());

        let denied = LauncherError::OwnershipDenied {
            principal: "0xabc".into(),
            game_id: "g".into(),
        };
        assert_eq!(denied.kind(), ErrorKind::OwnershipDenied);
        assert!(!denied.is_retryable());

        let invalid = LauncherError::InvalidArchive {
            archive: PathBuf::from("g.zip"),
            reason: "truncated".into(),
        };
        assert!(!invalid.is_retryable());
        assert_eq!(invalid.category(), "invalid_archive");
    }

    #[test]
    fn detailed_report_includes_root_cause() {
        let err = LauncherError::ExtractionFailed {
            entry: "data/level1.pak".into(),
            reason: "disk full".into(),
            source: Some(std::io::Error::other("no space left on device")),
        };

        let report = err.detailed_report();
        assert!(report.contains("Kind: ExtractionFailed"));
        assert!(report.contains("Retryable: true"));
        assert!(report.contains("no space left on device"));
    }

    #[test]
    fn kind_serializes_as_variant_name() {
        let json = serde_json::to_string(&ErrorKind::VerificationFailed).unwrap();
        assert_eq!(json, "\"VerificationFailed\"");
        assert_eq!(ErrorKind::LaunchFailed.to_string(), "LaunchFailed");
    }

    #[test]
    fn download_errors_drop_the_query_string() {
        let err = LauncherError::download(
            "https://cdn.example.com/g.zip?X-Amz-Credential=abc&X-Amz-Signature=SECRETSIG",
            "server responded with 403 Forbidden",
        );
        assert_eq!(
            err.to_string(),
            "Download of 'https://cdn.example.com/g.zip' failed: server responded with 403 Forbidden"
        );
    }
}
