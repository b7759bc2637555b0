//! Archive installation
//!
//! Extracts a downloaded zip archive into a game's installation directory.
//! Extraction is idempotent: directories that already exist are accepted and
//! files are always overwritten, so a failed install can simply be re-run.
//!
//! The archive is validated in a planning pass before anything is written:
//! an unreadable central directory or an entry that would land outside the
//! target directory fails the whole install with `InvalidArchive`.

use crate::error::{FileOperation, LauncherError, Result};
use crate::progress::{ProgressCallback, ProgressEvent};
use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, Write};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Summary of a completed extraction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionReport {
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
    /// Whether the archive itself was deleted afterwards
    pub archive_removed: bool,
    /// Whether the declared entry point was among the extracted files
    pub entry_point_extracted: bool,
}

/// One archive entry scheduled for extraction
#[derive(Debug, Clone)]
struct PlannedEntry {
    index: usize,
    name: String,
    relative: PathBuf,
    is_dir: bool,
    mode: Option<u32>,
}

/// Extracts zip archives into installation directories
#[derive(Debug, Clone, Default)]
pub struct ArchiveInstaller {
    entry_point: Option<PathBuf>,
}

impl ArchiveInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the entry point (relative to the target directory).
    ///
    /// It is written after every other entry so its presence on disk implies
    /// the rest of the archive was extracted.
    pub fn with_entry_point<P: Into<PathBuf>>(mut self, entry_point: P) -> Self {
        self.entry_point = Some(entry_point.into());
        self
    }

    /// Extract `archive_path` into `target_dir`, then delete the archive.
    ///
    /// The archive is only deleted after every entry was written; on any
    /// failure it stays on disk for diagnosis or a retry.
    pub async fn install(
        &self,
        archive_path: &Path,
        target_dir: &Path,
        progress_callback: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<ExtractionReport> {
        let archive = archive_path.to_path_buf();
        let target = target_dir.to_path_buf();
        let entry_point = self.entry_point.clone();
        let cancel = cancel.clone();

        async move {
            let worker_archive = archive.clone();
            let mut report = tokio::task::spawn_blocking(move || {
                extract_archive(
                    &worker_archive,
                    &target,
                    entry_point.as_deref(),
                    progress_callback.as_ref(),
                    &cancel,
                )
            })
            .await
            .map_err(|e| LauncherError::ExtractionFailed {
                entry: archive.display().to_string(),
                reason: format!("extraction task failed: {}", e),
                source: None,
            })??;

            match tokio::fs::remove_file(&archive).await {
                Ok(()) => {
                    report.archive_removed = true;
                    debug!("Removed archive {}", archive.display());
                }
                Err(e) => {
                    // The installation itself is complete; a leftover archive
                    // is overwritten by the next fetch.
                    warn!("Failed to remove archive {}: {}", archive.display(), e);
                }
            }

            info!(
                "Extracted {} files and {} directories ({} bytes)",
                report.files, report.directories, report.bytes
            );
            Ok(report)
        }
        .instrument(info_span!("install_archive", archive = %archive_path.display()))
        .await
    }
}

fn extract_archive(
    archive_path: &Path,
    target_dir: &Path,
    entry_point: Option<&Path>,
    progress_callback: Option<&ProgressCallback>,
    cancel: &CancellationToken,
) -> Result<ExtractionReport> {
    let file = File::open(archive_path).map_err(|e| invalid(archive_path, format!("cannot open archive: {}", e)))?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))
        .map_err(|e| invalid(archive_path, format!("unreadable zip archive: {}", e)))?;

    let plan = plan_entries(&mut archive, archive_path, entry_point)?;
    let total = plan.len();

    if let Some(callback) = progress_callback {
        callback(ProgressEvent::ExtractionStarted {
            archive: archive_path.display().to_string(),
            entries: total,
        });
    }

    let mut report = ExtractionReport::default();
    for (position, planned) in plan.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(LauncherError::ExtractionFailed {
                entry: planned.name.clone(),
                reason: "cancelled".to_string(),
                source: None,
            });
        }

        let dest = target_dir.join(&planned.relative);
        if planned.is_dir {
            fs::create_dir_all(&dest).map_err(|e| write_error(planned, FileOperation::CreateDir, e))?;
            report.directories += 1;
        } else {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(|e| write_error(planned, FileOperation::CreateDir, e))?;
            }
            let mut entry = archive
                .by_index(planned.index)
                .map_err(|e| invalid(archive_path, format!("entry '{}' is unreadable: {}", planned.name, e)))?;
            let mut out = replace_file(&dest, planned)?;
            report.bytes += copy_entry(&mut entry, &mut out, planned, archive_path)?;
            drop(entry);
            apply_permissions(&dest, planned)?;

            report.files += 1;
            if entry_point.is_some_and(|ep| planned.relative == ep) {
                report.entry_point_extracted = true;
            }
        }

        if let Some(callback) = progress_callback {
            callback(ProgressEvent::EntryExtracted {
                entry: planned.name.clone(),
                index: position,
                total,
            });
        }
    }

    if let Some(callback) = progress_callback {
        callback(ProgressEvent::ExtractionComplete {
            files: report.files,
            directories: report.directories,
            bytes: report.bytes,
        });
    }

    Ok(report)
}

/// Read every entry header and order the work: directories, then files, then
/// the entry point. Nothing is written here.
fn plan_entries<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    archive_path: &Path,
    entry_point: Option<&Path>,
) -> Result<Vec<PlannedEntry>> {
    let mut plan = Vec::with_capacity(archive.len());

    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .map_err(|e| invalid(archive_path, format!("entry #{} is unreadable: {}", index, e)))?;
        let name = entry.name().to_string();
        let relative = entry.enclosed_name().map(|p| p.to_path_buf()).ok_or_else(|| {
            invalid(
                archive_path,
                format!("entry '{}' would be written outside the installation directory", name),
            )
        })?;

        if relative.as_os_str().is_empty() {
            continue;
        }

        plan.push(PlannedEntry {
            index,
            name,
            relative,
            is_dir: entry.is_dir(),
            mode: entry.unix_mode(),
        });
    }

    plan.sort_by_key(|entry| {
        if entry.is_dir {
            0
        } else if entry_point.is_some_and(|ep| entry.relative == ep) {
            2
        } else {
            1
        }
    });

    debug!("Planned {} archive entries", plan.len());
    Ok(plan)
}

/// Copy one entry, telling corrupt archive data apart from local write failures
fn copy_entry<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    planned: &PlannedEntry,
    archive_path: &Path,
) -> Result<u64> {
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut written = 0u64;

    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(invalid(
                    archive_path,
                    format!("entry '{}' is corrupt: {}", planned.name, e),
                ));
            }
        };
        writer
            .write_all(&buffer[..read])
            .map_err(|e| write_error(planned, FileOperation::Write, e))?;
        written += read as u64;
    }

    writer.flush().map_err(|e| write_error(planned, FileOperation::Write, e))?;
    Ok(written)
}

/// Unlink whatever an earlier run left at `dest`, then create it fresh.
/// A read-only file from a previous install must not block the overwrite.
fn replace_file(dest: &Path, planned: &PlannedEntry) -> Result<File> {
    match fs::remove_file(dest) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(write_error(planned, FileOperation::Delete, e)),
    }
    File::create(dest).map_err(|e| write_error(planned, FileOperation::Create, e))
}

#[cfg(unix)]
fn apply_permissions(dest: &Path, planned: &PlannedEntry) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if let Some(mode) = planned.mode {
        let mode = mode & 0o777;
        if mode != 0 {
            fs::set_permissions(dest, fs::Permissions::from_mode(mode))
                .map_err(|e| write_error(planned, FileOperation::Write, e))?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_permissions(_dest: &Path, _planned: &PlannedEntry) -> Result<()> {
    Ok(())
}

fn invalid<S: Into<String>>(archive_path: &Path, reason: S) -> LauncherError {
    LauncherError::InvalidArchive {
        archive: archive_path.to_path_buf(),
        reason: reason.into(),
    }
}

fn write_error(planned: &PlannedEntry, operation: FileOperation, source: std::io::Error) -> LauncherError {
    LauncherError::ExtractionFailed {
        entry: planned.name.clone(),
        reason: format!("{} failed: {}", operation, source),
        source: Some(source),
    }
}

#[cfg(test)]
mod tests;
