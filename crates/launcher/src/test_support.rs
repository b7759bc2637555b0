//! Fixtures shared by the unit tests

use crate::entitlement::{OracleError, OwnershipOracle};
use crate::error::Result;
use crate::game::GameId;
use crate::launch::{LaunchReceipt, LaunchRequest, ProcessSpawner};
use async_trait::async_trait;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub(crate) const GAME_ID: &str = "a870d0a2-23c3-42e7-9154-8c81e3a6f112";
pub(crate) const WALLET: &str = "0x456F26E6d63C7d34C2d8A92211C152763f3D2a3F";

/// Archive entry: `None` content means a directory
pub(crate) type Entry<'a> = (&'a str, Option<&'a [u8]>);

/// Build an in-memory zip archive from `entries`
pub(crate) fn zip_bytes(entries: &[Entry<'_>]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o755);

    for (name, content) in entries {
        match content {
            None => zip.add_directory(*name, options).unwrap(),
            Some(data) => {
                zip.start_file(*name, options).unwrap();
                zip.write_all(data).unwrap();
            }
        }
    }

    zip.finish().unwrap().into_inner()
}

/// Write a zip archive built from `entries` to `path`
pub(crate) fn write_zip(path: &Path, entries: &[Entry<'_>]) {
    std::fs::write(path, zip_bytes(entries)).unwrap();
}

/// The three-entry game archive used across scenarios
pub(crate) fn sample_game_zip() -> Vec<u8> {
    zip_bytes(&[
        ("data/", None),
        ("data/level1.pak", Some(b"level one".as_slice())),
        ("game.exe", Some(b"MZ fake executable".as_slice())),
    ])
}

/// Serve one response that declares `declared` bytes but closes after `body`
pub(crate) async fn truncated_server(declared: usize, body: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = vec![0u8; 4096];
        let _ = socket.read(&mut request).await;

        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/zip\r\nContent-Length: {}\r\n\r\n",
            declared
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(&body).await.unwrap();
        socket.flush().await.unwrap();
        // Dropping the socket cuts the transfer short.
    });

    format!("http://{}/games/archive.zip", addr)
}

pub(crate) enum OracleAnswer {
    Balance(u128),
    Fail,
    Hang,
}

pub(crate) struct ScriptedOracle {
    answer: OracleAnswer,
    pub(crate) calls: AtomicUsize,
}

impl ScriptedOracle {
    pub(crate) fn new(answer: OracleAnswer) -> Self {
        Self {
            answer,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl OwnershipOracle for ScriptedOracle {
    async fn balance_of(&self, _principal: &str, _game_id: &GameId) -> std::result::Result<u128, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.answer {
            OracleAnswer::Balance(balance) => Ok(balance),
            OracleAnswer::Fail => Err(OracleError::Malformed("node unavailable".to_string())),
            OracleAnswer::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(1)
            }
        }
    }
}

#[derive(Default)]
pub(crate) struct SpySpawner {
    pub(crate) requests: Mutex<Vec<LaunchRequest>>,
}

impl ProcessSpawner for SpySpawner {
    fn spawn_detached(&self, request: &LaunchRequest) -> Result<LaunchReceipt> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(LaunchReceipt {
            pid: Some(4242),
            executable_path: request.executable_path.clone(),
        })
    }
}
