//! Request/response boundary between the UI process and the launcher
//!
//! Messages are newline-delimited JSON. Each request carries an `id` that is
//! echoed in its response; responses may arrive out of order because every
//! request runs on its own task. Progress events are interleaved as
//! `{"id": ..., "event": ...}` lines carrying the id of the request that
//! produced them.
//!
//! ```text
//! -> {"id":1,"command":"checkInstallationStatus","gameId":"a870d0a2-..."}
//! <- {"id":1,"result":{"isInstalled":false}}
//! -> {"id":2,"command":"launchGame","args":"-key \"k\" -id \"0x..\" -name \"n\" -gameId \"a870d0a2-...\""}
//! <- {"id":2,"error":{"kind":"OwnershipDenied","message":"..."}}
//! ```

use crate::error::{ErrorKind, LauncherError, Result};
use crate::fetch::ArchiveValidation;
use crate::game::{GameId, Identity};
use crate::orchestrator::{InstallOptions, Orchestrator};
use crate::progress::{ProgressCallback, ProgressEvent};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Result string of a successful `launchGame`
pub const LAUNCH_SUCCESS_MESSAGE: &str = "Game launch attempt successful.";

/// Commands understood by [`IpcHandler`]
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Command {
    StartDownloadInstall {
        game_id: String,
        download_url: String,
        install_dir: Option<PathBuf>,
        /// Expected archive xxHash64, base64
        xxhash64: Option<String>,
        size: Option<u64>,
    },
    LaunchGame {
        exe_path: Option<PathBuf>,
        args: LaunchArgs,
    },
    CheckInstallationStatus {
        game_id: String,
    },
    CancelInstall {
        game_id: String,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::StartDownloadInstall { .. } => "startDownloadInstall",
            Command::LaunchGame { .. } => "launchGame",
            Command::CheckInstallationStatus { .. } => "checkInstallationStatus",
            Command::CancelInstall { .. } => "cancelInstall",
        }
    }
}

/// Launch arguments as the UI sends them
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum LaunchArgs {
    /// `-key "<token>" -id "<addr>" -name "<name>" -gameId "<id>"`
    Line(String),
    /// The same flags as separate strings, either `"-key"`, `"<token>"` or `"-key \"<token>\""`
    List(Vec<String>),
}

impl LaunchArgs {
    fn tokens(&self) -> Result<Vec<String>> {
        match self {
            LaunchArgs::Line(line) => tokenize(line),
            LaunchArgs::List(items) => {
                let mut tokens = Vec::new();
                for item in items {
                    tokens.extend(tokenize(item)?);
                }
                Ok(tokens)
            }
        }
    }

    /// Extract the game and identity the UI wants to launch
    pub fn parse(&self) -> Result<(GameId, Identity)> {
        let tokens = self.tokens()?;
        let mut key = None;
        let mut principal = None;
        let mut name = None;
        let mut game_id = None;

        let mut iter = tokens.into_iter();
        while let Some(flag) = iter.next() {
            let value = iter
                .next()
                .ok_or_else(|| LauncherError::invalid_request(format!("launch flag '{}' has no value", flag)))?;
            let slot = match flag.as_str() {
                "-key" => &mut key,
                "-id" => &mut principal,
                "-name" => &mut name,
                "-gameId" => &mut game_id,
                other => {
                    return Err(LauncherError::invalid_request(format!(
                        "unknown launch flag '{}'",
                        other
                    )));
                }
            };
            *slot = Some(value);
        }

        let missing = |flag: &str| LauncherError::invalid_request(format!("launch arguments lack {}", flag));
        let game_id = GameId::parse(&game_id.ok_or_else(|| missing("-gameId"))?)?;
        let identity = Identity::new(
            principal.ok_or_else(|| missing("-id"))?,
            name.ok_or_else(|| missing("-name"))?,
            key.ok_or_else(|| missing("-key"))?,
        );
        Ok((game_id, identity))
    }
}

/// Split on whitespace, keeping double-quoted runs together
fn tokenize(input: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quoted = false;

    for c in input.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if quoted {
        return Err(LauncherError::invalid_request("unterminated quote in launch arguments"));
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&LauncherError> for ErrorPayload {
    fn from(error: &LauncherError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseBody {
    Result(Value),
    Error(ErrorPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub id: Option<u64>,
    #[serde(flatten)]
    pub body: ResponseBody,
}

impl Response {
    fn result(id: Option<u64>, value: Value) -> Self {
        Self {
            id,
            body: ResponseBody::Result(value),
        }
    }

    fn error(id: Option<u64>, error: &LauncherError) -> Self {
        Self {
            id,
            body: ResponseBody::Error(error.into()),
        }
    }
}

#[derive(Serialize)]
struct EventLine<'a> {
    id: Option<u64>,
    event: &'a ProgressEvent,
}

/// Progress sink for one request, tagging every event with its id
fn event_sink(tx: mpsc::UnboundedSender<String>, id: Option<u64>) -> ProgressCallback {
    Arc::new(move |event: ProgressEvent| {
        if let Ok(line) = serde_json::to_string(&EventLine { id, event: &event }) {
            let _ = tx.send(line);
        }
    })
}

/// Parse one request line into its id and command.
///
/// The id is recovered even when the command is malformed so the error can
/// still be correlated.
pub fn parse_request(line: &str) -> (Option<u64>, Result<Command>) {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => return (None, Err(LauncherError::invalid_request(format!("malformed JSON: {}", e)))),
    };
    let id = value.get("id").and_then(Value::as_u64);
    let command = serde_json::from_value(value)
        .map_err(|e| LauncherError::invalid_request(format!("malformed request: {}", e)));
    (id, command)
}

/// Dispatches IPC commands to the orchestrator
pub struct IpcHandler {
    orchestrator: Arc<Orchestrator>,
}

impl IpcHandler {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Execute one command. Failures become error responses, never panics.
    pub async fn handle(&self, id: Option<u64>, command: Command, progress: Option<ProgressCallback>) -> Response {
        debug!("IPC request {:?}: {}", id, command.name());
        match self.dispatch(command, progress).await {
            Ok(value) => Response::result(id, value),
            Err(e) => {
                warn!("IPC request {:?} failed: {}", id, e);
                Response::error(id, &e)
            }
        }
    }

    async fn dispatch(&self, command: Command, progress: Option<ProgressCallback>) -> Result<Value> {
        match command {
            Command::StartDownloadInstall {
                game_id,
                download_url,
                install_dir,
                xxhash64,
                size,
            } => {
                let mut options = InstallOptions::default();
                if xxhash64.is_some() || size.is_some() {
                    options = options.with_validation(ArchiveValidation {
                        xxhash64_base64: xxhash64,
                        expected_size: size,
                    });
                }
                options.progress = progress;

                let outcome = self
                    .orchestrator
                    .start_download_install(&game_id, &download_url, install_dir.as_deref(), options)
                    .await;
                Ok(to_value(&outcome))
            }
            Command::LaunchGame { exe_path, args } => {
                let (game_id, identity) = args.parse()?;
                if let Some(exe_path) = exe_path {
                    let expected = self.orchestrator.registry().executable_path(&game_id);
                    if exe_path != expected {
                        return Err(LauncherError::invalid_request(format!(
                            "executable '{}' does not belong to game {} (expected '{}')",
                            exe_path.display(),
                            game_id,
                            expected.display()
                        )));
                    }
                }
                self.orchestrator.launch_game(&game_id, &identity).await?;
                Ok(Value::String(LAUNCH_SUCCESS_MESSAGE.to_string()))
            }
            Command::CheckInstallationStatus { game_id } => {
                let game_id = GameId::parse(&game_id)?;
                let installed = self.orchestrator.is_installed(&game_id).await;
                Ok(json!({ "isInstalled": installed }))
            }
            Command::CancelInstall { game_id } => {
                let game_id = GameId::parse(&game_id)?;
                let cancelled = self.orchestrator.cancel_install(&game_id);
                Ok(json!({ "cancelled": cancelled }))
            }
        }
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Serve requests from `reader` until it closes, writing responses to `writer`.
///
/// Requests still running at end of input are awaited before returning.
pub async fn serve<R, W>(handler: Arc<IpcHandler>, reader: R, mut writer: W) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer_task = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
        Ok::<(), std::io::Error>(())
    });

    let mut requests = JoinSet::new();
    let mut lines = BufReader::new(reader).lines();
    info!("IPC server ready");

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let (id, command) = parse_request(&line);
        let handler = handler.clone();
        let tx = tx.clone();
        let progress = event_sink(tx.clone(), id);

        requests.spawn(async move {
            let response = match command {
                Ok(command) => handler.handle(id, command, Some(progress)).await,
                Err(e) => Response::error(id, &e),
            };
            match serde_json::to_string(&response) {
                Ok(line) => {
                    let _ = tx.send(line);
                }
                Err(e) => error!("Failed to serialize response {:?}: {}", id, e),
            }
        });
    }

    info!("IPC input closed, waiting for {} running requests", requests.len());
    while let Some(joined) = requests.join_next().await {
        if let Err(e) = joined {
            error!("IPC request task failed: {}", e);
        }
    }

    drop(tx);
    match writer_task.await {
        Ok(result) => result,
        Err(e) => Err(std::io::Error::other(e)),
    }
}
