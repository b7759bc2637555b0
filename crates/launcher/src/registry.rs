//! Installation registry
//!
//! The filesystem is the registry: a game is installed exactly when its
//! executable exists at the deterministic path `<root>/games/<id>/<exe>`.
//! Nothing is cached in memory, so manual deletion or a crashed install is
//! always reflected by the next query.
//!
//! A small completion manifest (`.install.json`) is written after a
//! successful install. It carries metadata only and never decides whether a
//! game counts as installed.

use crate::config::LauncherConfig;
use crate::error::{FileOperation, LauncherError, Result};
use crate::game::{GameId, GameInstallation};
use crate::install::ExtractionReport;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tracing::{debug, warn};

/// File name of the completion manifest inside an installation directory
pub const MANIFEST_FILE_NAME: &str = ".install.json";

/// Metadata recorded once an install completed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallManifest {
    pub game_id: GameId,
    pub archive_bytes: u64,
    pub files: usize,
    pub directories: usize,
    /// Unix timestamp in seconds
    pub installed_at: u64,
    pub entry_point: String,
}

/// Resolves installation paths and probes the filesystem for installed games
#[derive(Debug, Clone)]
pub struct InstallRegistry {
    games_dir: PathBuf,
    executable_name: String,
}

impl InstallRegistry {
    pub fn new<P: Into<PathBuf>, S: Into<String>>(games_dir: P, executable_name: S) -> Self {
        Self {
            games_dir: games_dir.into(),
            executable_name: executable_name.into(),
        }
    }

    pub fn from_config(config: &LauncherConfig) -> Self {
        Self::new(config.games_dir(), config.executable_name.clone())
    }

    pub fn games_dir(&self) -> &Path {
        &self.games_dir
    }

    pub fn executable_name(&self) -> &str {
        &self.executable_name
    }

    pub fn install_dir(&self, game_id: &GameId) -> PathBuf {
        self.games_dir.join(game_id.to_string())
    }

    pub fn executable_path(&self, game_id: &GameId) -> PathBuf {
        self.install_dir(game_id).join(&self.executable_name)
    }

    /// Transient archive location inside `install_dir`
    pub fn archive_path(install_dir: &Path, game_id: &GameId) -> PathBuf {
        install_dir.join(format!("{}.zip", game_id))
    }

    /// Probe for the executable. Directories or other non-files do not count.
    pub async fn is_installed(&self, game_id: &GameId) -> bool {
        is_file(&self.executable_path(game_id)).await
    }

    /// Current installation record for `game_id`
    pub async fn installation(&self, game_id: &GameId) -> GameInstallation {
        let install_directory = self.install_dir(game_id);
        let executable_path = self.executable_path(game_id);
        let installed = is_file(&executable_path).await;

        let manifest = if installed {
            match read_manifest(&install_directory).await {
                Ok(manifest) => manifest.filter(|m| m.game_id == *game_id),
                Err(e) => {
                    warn!("Ignoring unreadable install manifest for {}: {}", game_id, e);
                    None
                }
            }
        } else {
            None
        };

        GameInstallation {
            game_id: *game_id,
            install_directory,
            executable_path,
            installed,
            manifest,
        }
    }

    /// Record a completed install in `install_dir`.
    ///
    /// Must be the last write of an install task.
    pub async fn mark_installed(
        &self,
        game_id: &GameId,
        install_dir: &Path,
        archive_bytes: u64,
        report: &ExtractionReport,
    ) -> Result<InstallManifest> {
        let manifest = InstallManifest {
            game_id: *game_id,
            archive_bytes,
            files: report.files,
            directories: report.directories,
            installed_at: unix_now(),
            entry_point: self.executable_name.clone(),
        };

        let body = serde_json::to_vec_pretty(&manifest).map_err(|e| LauncherError::ExtractionFailed {
            entry: MANIFEST_FILE_NAME.to_string(),
            reason: format!("serializing manifest failed: {}", e),
            source: None,
        })?;

        let path = install_dir.join(MANIFEST_FILE_NAME);
        let temp = install_dir.join(format!("{}.tmp", MANIFEST_FILE_NAME));
        fs::write(&temp, &body)
            .await
            .map_err(|e| manifest_error(FileOperation::Write, e))?;
        fs::rename(&temp, &path)
            .await
            .map_err(|e| manifest_error(FileOperation::Rename, e))?;

        debug!("Wrote install manifest {}", path.display());
        Ok(manifest)
    }
}

/// Read the completion manifest of an installation directory, if any
pub async fn read_manifest(install_dir: &Path) -> Result<Option<InstallManifest>> {
    let path = install_dir.join(MANIFEST_FILE_NAME);
    let body = match fs::read(&path).await {
        Ok(body) => body,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(manifest_error(FileOperation::Read, e)),
    };

    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| LauncherError::InvalidRequest {
            message: format!("install manifest '{}' is malformed: {}", path.display(), e),
        })
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn manifest_error(operation: FileOperation, source: std::io::Error) -> LauncherError {
    LauncherError::ExtractionFailed {
        entry: MANIFEST_FILE_NAME.to_string(),
        reason: format!("{} failed: {}", operation, source),
        source: Some(source),
    }
}
