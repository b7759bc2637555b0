//! Command line entry point and composition root of the game launcher
//!
//! Builds the configuration and the orchestrator once, then either runs a
//! single command or serves the IPC boundary over stdin/stdout.

use anyhow::{Context, anyhow};
use clap::{ArgAction, Parser, Subcommand};
use launcher::{
    ArchiveValidation, ConsoleProgressReporter, GameId, Identity, InstallOptions, IntoProgressCallback, IpcHandler,
    LauncherConfig, LauncherError, NullProgressReporter, Orchestrator, ProgressCallback, StoreClient, download_message,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, info};

#[derive(Debug, Parser)]
#[command(name = "game-launcher", version = env!("CARGO_PKG_VERSION"), about, long_about = None)]
struct Cli {
    /// Root directory for installed games (overrides GAME_LAUNCHER_INSTALL_ROOT)
    #[arg(long, global = true)]
    install_root: Option<PathBuf>,

    /// More log output (-v, -vv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download and install a game from an already authorized URL
    Install {
        #[arg(long)]
        game_id: String,
        #[arg(long)]
        url: String,
        /// Install somewhere other than <root>/games/<id>
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Expected archive xxHash64 (base64)
        #[arg(long)]
        xxhash: Option<String>,
        /// Expected archive size in bytes
        #[arg(long)]
        size: Option<u64>,
    },
    /// Ask the store for a download URL with a signed message, then install
    AuthorizeInstall {
        #[arg(long)]
        game_id: String,
        /// Wallet address that signed the download message
        #[arg(long)]
        address: String,
        #[arg(long)]
        signature: String,
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Launch an installed game after checking ownership
    Launch {
        #[arg(long)]
        game_id: String,
        /// Wallet address of the player
        #[arg(long)]
        principal: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        token: String,
    },
    /// Show the installation state of a game
    Status {
        #[arg(long)]
        game_id: String,
    },
    /// List the store catalogue with ownership and install state
    Library {
        #[arg(long)]
        principal: String,
    },
    /// Serve IPC requests on stdin/stdout
    Serve,
}

fn init_logging(cli: &Cli) {
    let level = if cli.quiet {
        Level::ERROR
    } else {
        match cli.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    // stdout belongs to the IPC channel.
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

/// Attach the failure kind so scripts can tell failures apart
fn failure(error: LauncherError) -> anyhow::Error {
    anyhow!("{}: {}", error.kind(), error)
}

/// Console progress unless `--quiet`, where nothing but errors is printed
fn progress_reporter(cli: &Cli) -> ProgressCallback {
    if cli.quiet {
        NullProgressReporter.into_callback()
    } else {
        ConsoleProgressReporter::new(cli.verbose > 0).into_callback()
    }
}

fn parse_game_id(raw: &str) -> anyhow::Result<GameId> {
    GameId::parse(raw).map_err(failure)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_logging(&cli);

    let mut config = LauncherConfig::from_env().map_err(failure).context("loading configuration")?;
    if let Some(root) = cli.install_root.clone() {
        config.install_root = root;
    }
    let progress = progress_reporter(&cli);
    let orchestrator = Arc::new(Orchestrator::from_config(config).map_err(failure)?);

    match cli.command {
        Commands::Install {
            game_id,
            url,
            dir,
            xxhash,
            size,
        } => {
            let game_id = parse_game_id(&game_id)?;
            let mut options = InstallOptions::default().with_progress(progress);
            if xxhash.is_some() || size.is_some() {
                options = options.with_validation(ArchiveValidation {
                    xxhash64_base64: xxhash,
                    expected_size: size,
                });
            }
            install(&orchestrator, game_id, &url, dir, options).await?;
        }
        Commands::AuthorizeInstall {
            game_id,
            address,
            signature,
            dir,
        } => {
            let game_id = parse_game_id(&game_id)?;
            let store = StoreClient::from_config(orchestrator.config()).context("creating store client")?;
            info!("Requesting download of '{}' for {}", download_message(&game_id), address);
            let url = store
                .authorize_download(&game_id, &address, &signature)
                .await
                .context("store refused the download")?;
            let options = InstallOptions::default().with_progress(progress);
            install(&orchestrator, game_id, url.as_str(), dir, options).await?;
        }
        Commands::Launch {
            game_id,
            principal,
            name,
            token,
        } => {
            let game_id = parse_game_id(&game_id)?;
            let identity = Identity::new(principal, name, token);
            let receipt = orchestrator.launch_game(&game_id, &identity).await.map_err(failure)?;
            match receipt.pid {
                Some(pid) => println!("Launched {} (pid {})", receipt.executable_path.display(), pid),
                None => println!("Launched {}", receipt.executable_path.display()),
            }
        }
        Commands::Status { game_id } => {
            let game_id = parse_game_id(&game_id)?;
            let installation = orchestrator.installation(&game_id).await;
            let state = orchestrator.game_state(&game_id).await;
            let report = json!({ "state": state, "installation": installation });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Library { principal } => {
            let store = StoreClient::from_config(orchestrator.config()).context("creating store client")?;
            let games = store.list_games().await.context("fetching the store catalogue")?;

            for game in games {
                let Some(game_id) = game.game_id() else {
                    println!("{:<36}  {:<24}  (malformed id)", game.id, game.name);
                    continue;
                };
                let owned = match orchestrator.check_ownership(&principal, &game_id).await {
                    Ok(balance) => balance.to_string(),
                    Err(e) => format!("unknown ({})", e.kind()),
                };
                let installed = if orchestrator.is_installed(&game_id).await {
                    "installed"
                } else {
                    "-"
                };
                println!("{}  {:<24}  owned: {:<10}  {}", game_id, game.name, owned, installed);
            }
        }
        Commands::Serve => {
            let handler = Arc::new(IpcHandler::new(orchestrator));
            launcher::serve(handler, tokio::io::stdin(), tokio::io::stdout())
                .await
                .context("serving IPC requests")?;
        }
    }

    Ok(())
}

async fn install(
    orchestrator: &Orchestrator,
    game_id: GameId,
    url: &str,
    dir: Option<PathBuf>,
    options: InstallOptions,
) -> anyhow::Result<()> {
    let report = orchestrator
        .install_game(game_id, url, dir.as_deref(), options)
        .await
        .map_err(failure)?;

    println!(
        "Installed {} into {} ({} files, {} bytes downloaded)",
        report.game_id,
        report.install_directory.display(),
        report.extraction.files,
        report.archive_bytes
    );
    if !report.installed {
        println!(
            "Warning: {} was not found after extraction; the game will not launch",
            report.executable_path.display()
        );
    }
    Ok(())
}
