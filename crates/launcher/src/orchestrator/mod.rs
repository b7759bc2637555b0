//! Install/launch orchestration
//!
//! The [`Orchestrator`] is the single control surface used by the IPC
//! boundary and the command line. It wires the fetcher, installer, registry,
//! ownership oracle and process spawner together and enforces the rules that
//! span them:
//!
//! - at most one install per game at a time (a second request gets `Busy`),
//! - launch only after the identity is valid and the oracle confirms
//!   ownership (an oracle failure blocks the launch),
//! - failures of an install leave their filesystem side effects in place,
//!   since re-running the install is idempotent.

pub mod task;

pub use task::{DownloadTask, TaskState};

use crate::config::LauncherConfig;
use crate::entitlement::{OwnershipOracle, oracle_from_config};
use crate::error::{ErrorKind, FileOperation, LauncherError, Result};
use crate::fetch::{ArchiveFetcher, ArchiveValidation, HttpFetcher};
use crate::game::{GameId, GameInstallation, Identity};
use crate::install::{ArchiveInstaller, ExtractionReport};
use crate::launch::{DetachedLauncher, LaunchReceipt, LaunchRequest, ProcessSpawner};
use crate::progress::ProgressCallback;
use crate::registry::{InstallManifest, InstallRegistry};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

/// Message returned to the UI after a successful install
pub const INSTALL_SUCCESS_MESSAGE: &str = "Installation complete.";

/// Per-request install settings
#[derive(Clone, Default)]
pub struct InstallOptions {
    /// Integrity check applied between fetch and extraction
    pub validation: Option<ArchiveValidation>,
    pub progress: Option<ProgressCallback>,
}

impl InstallOptions {
    pub fn with_validation(mut self, validation: ArchiveValidation) -> Self {
        self.validation = Some(validation);
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }
}

impl std::fmt::Debug for InstallOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallOptions")
            .field("validation", &self.validation)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Result of a completed install
#[derive(Debug, Clone)]
pub struct InstallReport {
    pub game_id: GameId,
    pub install_directory: PathBuf,
    pub executable_path: PathBuf,
    pub archive_bytes: u64,
    pub extraction: ExtractionReport,
    pub manifest: Option<InstallManifest>,
    /// Executable probe after the install
    pub installed: bool,
}

/// Boundary form of an install result; never an error
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl InstallOutcome {
    fn from_result(result: &Result<InstallReport>) -> Self {
        match result {
            Ok(_) => Self {
                success: true,
                message: INSTALL_SUCCESS_MESSAGE.to_string(),
                kind: None,
            },
            Err(e) => Self {
                success: false,
                message: format!("Installation failed: {}", e),
                kind: Some(e.kind()),
            },
        }
    }
}

/// Lifecycle of a game as seen by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum GameState {
    NotInstalled,
    Installing,
    Installed,
}

#[derive(Debug)]
struct InFlightInstall {
    cancel: CancellationToken,
    target_directory: PathBuf,
}

type InFlightTable = Arc<Mutex<HashMap<GameId, InFlightInstall>>>;

fn lock_table(table: &InFlightTable) -> MutexGuard<'_, HashMap<GameId, InFlightInstall>> {
    // The table holds no invariants a panic could break halfway.
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Releases a game's install slot when the install ends, however it ends
struct InFlightGuard {
    table: InFlightTable,
    game_id: GameId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock_table(&self.table).remove(&self.game_id);
    }
}

/// Builder wiring the orchestrator's collaborators
pub struct OrchestratorBuilder {
    config: LauncherConfig,
    fetcher: Option<Arc<dyn ArchiveFetcher>>,
    oracle: Option<Arc<dyn OwnershipOracle>>,
    spawner: Option<Arc<dyn ProcessSpawner>>,
}

impl OrchestratorBuilder {
    pub fn fetcher(mut self, fetcher: Arc<dyn ArchiveFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn oracle(mut self, oracle: Arc<dyn OwnershipOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn spawner(mut self, spawner: Arc<dyn ProcessSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Validate the configuration and fill unset collaborators with the real implementations
    pub fn build(self) -> Result<Orchestrator> {
        self.config.validate()?;

        let fetcher = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpFetcher::from_config(&self.config)?),
        };
        let oracle = match self.oracle {
            Some(oracle) => oracle,
            None => oracle_from_config(&self.config)?,
        };
        let spawner = self.spawner.unwrap_or_else(|| Arc::new(DetachedLauncher::new()));

        Ok(Orchestrator {
            installer: ArchiveInstaller::new().with_entry_point(&self.config.executable_name),
            registry: InstallRegistry::from_config(&self.config),
            config: self.config,
            fetcher,
            oracle,
            spawner,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        })
    }
}

pub struct Orchestrator {
    config: LauncherConfig,
    fetcher: Arc<dyn ArchiveFetcher>,
    installer: ArchiveInstaller,
    registry: InstallRegistry,
    oracle: Arc<dyn OwnershipOracle>,
    spawner: Arc<dyn ProcessSpawner>,
    in_flight: InFlightTable,
}

impl Orchestrator {
    pub fn builder(config: LauncherConfig) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            fetcher: None,
            oracle: None,
            spawner: None,
        }
    }

    /// Orchestrator with the HTTP fetcher, configured oracle and OS launcher
    pub fn from_config(config: LauncherConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    pub fn registry(&self) -> &InstallRegistry {
        &self.registry
    }

    /// Fetch `download_url` and install it for `game_id`.
    ///
    /// `target_directory` defaults to the game's canonical installation
    /// directory. Rejected with `Busy` while another install of the same game
    /// is running.
    pub async fn install_game(
        &self,
        game_id: GameId,
        download_url: &str,
        target_directory: Option<&Path>,
        options: InstallOptions,
    ) -> Result<InstallReport> {
        let canonical = self.registry.install_dir(&game_id);
        let target = match target_directory {
            Some(dir) if dir != canonical => {
                warn!(
                    "Installing {} into {} instead of {}; the registry will not see it",
                    game_id,
                    dir.display(),
                    canonical.display()
                );
                dir.to_path_buf()
            }
            _ => canonical,
        };

        let cancel = CancellationToken::new();
        let _slot = self.acquire_slot(game_id, &target, cancel.clone())?;

        let archive_path = InstallRegistry::archive_path(&target, &game_id);
        let mut task = DownloadTask::new(game_id, download_url.to_string(), target, archive_path);

        let result = self
            .run_install(&mut task, &options, &cancel)
            .instrument(info_span!("install_game", game_id = %game_id))
            .await;

        match &result {
            Ok(report) => {
                task.advance(TaskState::Complete, options.progress.as_ref());
                info!("Installed {} into {}", game_id, report.install_directory.display());
            }
            Err(e) => {
                task.advance(TaskState::Failed, options.progress.as_ref());
                error!("Install of {} failed in state {}: {}", game_id, task.state(), e);
            }
        }
        result
    }

    async fn run_install(
        &self,
        task: &mut DownloadTask,
        options: &InstallOptions,
        cancel: &CancellationToken,
    ) -> Result<InstallReport> {
        let progress = options.progress.as_ref();

        tokio::fs::create_dir_all(&task.target_directory)
            .await
            .map_err(|e| LauncherError::DownloadFailed {
                url: crate::progress::redact_query(&task.source_url).to_string(),
                reason: format!(
                    "{} '{}' failed: {}",
                    FileOperation::CreateDir,
                    task.target_directory.display(),
                    e
                ),
                source: Some(Box::new(e)),
            })?;

        task.advance(TaskState::Downloading, progress);
        let archive_bytes = self
            .fetcher
            .fetch(&task.source_url, &task.archive_path, options.progress.clone(), cancel)
            .await?;
        task.advance(TaskState::Downloaded, progress);

        if let Some(validation) = options.validation.as_ref().filter(|v| !v.is_empty()) {
            validation.verify(&task.archive_path).await?;
        }

        task.advance(TaskState::Extracting, progress);
        let extraction = self
            .installer
            .install(&task.archive_path, &task.target_directory, options.progress.clone(), cancel)
            .await?;
        task.advance(TaskState::Extracted, progress);

        // The installer deletes the archive itself; a leftover was already logged.
        task.advance(TaskState::Cleaned, progress);

        if !extraction.entry_point_extracted {
            warn!(
                "Archive for {} has no '{}' at its root; the game will not show as installed",
                task.game_id, self.config.executable_name
            );
        }

        let manifest = match self
            .registry
            .mark_installed(&task.game_id, &task.target_directory, archive_bytes, &extraction)
            .await
        {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                warn!("Failed to write install manifest for {}: {}", task.game_id, e);
                None
            }
        };

        let executable_path = task.target_directory.join(&self.config.executable_name);
        let installed = tokio::fs::metadata(&executable_path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);

        Ok(InstallReport {
            game_id: task.game_id,
            install_directory: task.target_directory.clone(),
            executable_path,
            archive_bytes,
            extraction,
            manifest,
            installed,
        })
    }

    /// Install and fold every failure into an [`InstallOutcome`]
    pub async fn start_download_install(
        &self,
        game_id: &str,
        download_url: &str,
        install_dir: Option<&Path>,
        options: InstallOptions,
    ) -> InstallOutcome {
        let result = match GameId::parse(game_id) {
            Ok(id) => self.install_game(id, download_url, install_dir, options).await,
            Err(e) => Err(e),
        };
        InstallOutcome::from_result(&result)
    }

    /// Launch an installed game for `identity`.
    ///
    /// The identity must be valid and the oracle must report a non-zero
    /// balance before the process is spawned.
    pub async fn launch_game(&self, game_id: &GameId, identity: &Identity) -> Result<LaunchReceipt> {
        async {
            let executable_path = self.registry.executable_path(game_id);

            identity.validate()?;

            let balance = self.check_ownership(&identity.principal_id, game_id).await?;
            if balance == 0 {
                warn!("Launch of {} denied: {} owns no copy", game_id, identity.principal_id);
                return Err(LauncherError::OwnershipDenied {
                    principal: identity.principal_id.clone(),
                    game_id: game_id.to_string(),
                });
            }

            let request = LaunchRequest::new(executable_path, identity.launch_arguments(game_id));
            self.spawner.spawn_detached(&request)
        }
        .instrument(info_span!("launch_game", game_id = %game_id))
        .await
    }

    /// Query the oracle for the balance of `principal`, bounded by the oracle timeout.
    ///
    /// Every oracle failure becomes `VerificationFailed`.
    pub async fn check_ownership(&self, principal: &str, game_id: &GameId) -> Result<u128> {
        let query = self.oracle.balance_of(principal, game_id);
        match tokio::time::timeout(self.config.oracle_timeout, query).await {
            Ok(Ok(balance)) => Ok(balance),
            Ok(Err(e)) => Err(LauncherError::VerificationFailed {
                game_id: game_id.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(LauncherError::VerificationFailed {
                game_id: game_id.to_string(),
                reason: format!(
                    "ownership oracle did not answer within {}s",
                    self.config.oracle_timeout.as_secs_f64()
                ),
            }),
        }
    }

    pub async fn is_installed(&self, game_id: &GameId) -> bool {
        self.registry.is_installed(game_id).await
    }

    pub async fn installation(&self, game_id: &GameId) -> GameInstallation {
        self.registry.installation(game_id).await
    }

    pub async fn game_state(&self, game_id: &GameId) -> GameState {
        if lock_table(&self.in_flight).contains_key(game_id) {
            return GameState::Installing;
        }
        if self.registry.is_installed(game_id).await {
            GameState::Installed
        } else {
            GameState::NotInstalled
        }
    }

    /// Cancel the running install of `game_id`. Returns whether one was running.
    pub fn cancel_install(&self, game_id: &GameId) -> bool {
        match lock_table(&self.in_flight).get(game_id) {
            Some(install) => {
                info!("Cancelling install of {} into {}", game_id, install.target_directory.display());
                install.cancel.cancel();
                true
            }
            None => false,
        }
    }

    fn acquire_slot(&self, game_id: GameId, target: &Path, cancel: CancellationToken) -> Result<InFlightGuard> {
        let mut table = lock_table(&self.in_flight);
        if table.contains_key(&game_id) {
            warn!("Rejecting concurrent install of {}", game_id);
            return Err(LauncherError::Busy {
                game_id: game_id.to_string(),
            });
        }
        table.insert(
            game_id,
            InFlightInstall {
                cancel,
                target_directory: target.to_path_buf(),
            },
        );
        Ok(InFlightGuard {
            table: self.in_flight.clone(),
            game_id,
        })
    }
}
