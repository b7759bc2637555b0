//! Game Launcher Library
//!
//! This library implements the download, install and launch pipeline of the
//! game launcher. It streams a game's archive to disk, extracts it safely
//! into a per-game directory, reports which games are installed by probing
//! the filesystem, and starts a game as a detached process once the
//! ownership contract confirms the player owns it.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use launcher::{GameId, Identity, InstallOptions, LauncherConfig, Orchestrator, ProgressEvent};
//! use std::sync::Arc;
//!
//! # async fn example() -> launcher::Result<()> {
//! // Read GAME_LAUNCHER_* variables, falling back to defaults
//! let config = LauncherConfig::from_env()?;
//! let orchestrator = Orchestrator::from_config(config)?;
//!
//! let game = GameId::parse("a870d0a2-23c3-42e7-9154-8c81e3a6f112")?;
//!
//! // Progress is optional
//! let options = InstallOptions::default().with_progress(Arc::new(|event: ProgressEvent| {
//!     if let ProgressEvent::DownloadProgress { downloaded, total, .. } = event {
//!         println!("{} / {:?} bytes", downloaded, total);
//!     }
//! }));
//!
//! // The URL comes from the store's signed download authorization
//! orchestrator
//!     .install_game(game, "https://cdn.example.com/game.zip?X-Amz-Expires=300", None, options)
//!     .await?;
//!
//! let identity = Identity::new(
//!     "0x456F26E6d63C7d34C2d8A92211C152763f3D2a3F",
//!     "RetroGamer",
//!     "session-key",
//! );
//! orchestrator.launch_game(&game, &identity).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Streaming fetch**: archives go straight from the response body to disk with stall detection
//! - **Integrity check**: optional xxHash64 and size verification before extraction
//! - **Safe extraction**: path traversal is rejected before anything is written
//! - **Single-flight installs**: one install per game at a time, others get `Busy`
//! - **Fail-closed launch**: no ownership confirmation, no launch
//! - **IPC boundary**: newline-delimited JSON over any async reader/writer pair

pub mod config;
pub mod entitlement;
pub mod error;
pub mod fetch;
pub mod game;
pub mod install;
pub mod ipc;
pub mod launch;
pub mod orchestrator;
pub mod progress;
pub mod registry;
pub mod store;

#[cfg(test)]
mod test_support;

// Re-export commonly used types for convenience
pub use config::{LauncherConfig, LauncherConfigBuilder};
pub use entitlement::{OracleError, OwnershipOracle, RpcOwnershipOracle};
pub use error::{ErrorKind, FileOperation, LauncherError, Result};
pub use fetch::{ArchiveFetcher, ArchiveValidation, HttpFetcher};
pub use game::{GameId, GameInstallation, Identity};
pub use install::{ArchiveInstaller, ExtractionReport};
pub use ipc::{IpcHandler, serve};
pub use launch::{DetachedLauncher, LaunchReceipt, LaunchRequest, ProcessSpawner};
pub use orchestrator::{
    GameState, InstallOptions, InstallOutcome, InstallReport, Orchestrator, OrchestratorBuilder, TaskState,
};
pub use progress::{
    ConsoleProgressReporter, IntoProgressCallback, NullProgressReporter, ProgressCallback, ProgressEvent,
    ProgressReporter,
};
pub use registry::{InstallManifest, InstallRegistry};
pub use store::{GameRecord, StoreClient, StoreError, download_message};
