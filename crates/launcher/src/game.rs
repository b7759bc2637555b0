//! Game identity types shared by every component

use crate::error::{LauncherError, Result};
use crate::registry::InstallManifest;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Display name the wallet session reports before a profile is loaded
const PLACEHOLDER_DISPLAY_NAME: &str = "Web3 User";
/// Marker the session puts into auth tokens it could not resolve
const PLACEHOLDER_TOKEN_MARKER: &str = "unknown";

/// Stable, externally assigned game identifier (UUID-shaped)
///
/// Parsing rejects anything that is not a UUID, which also guarantees the id
/// is a single safe path component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GameId(Uuid);

impl GameId {
    pub fn parse(value: &str) -> Result<Self> {
        value.parse()
    }

    /// Token id used by the ownership contract: the UUID's 32 hex digits
    /// read as one big-endian integer
    pub fn token_id(&self) -> u128 {
        self.0.as_u128()
    }
}

impl FromStr for GameId {
    type Err = LauncherError;

    fn from_str(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        // Only the hyphenated 8-4-4-4-12 form is accepted.
        if trimmed.len() != 36 {
            return Err(LauncherError::invalid_request(format!(
                "game id '{}' is not a UUID",
                value
            )));
        }
        Uuid::parse_str(trimmed)
            .map(GameId)
            .map_err(|e| LauncherError::invalid_request(format!("game id '{}' is not a UUID: {}", value, e)))
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl Serialize for GameId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GameId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Check for a `0x`-prefixed 20-byte hex address
pub fn is_address(value: &str) -> bool {
    value.len() == 42
        && (value.starts_with("0x") || value.starts_with("0X"))
        && value[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// The signed-in user a game is launched for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Wallet address of the principal
    pub principal_id: String,
    pub display_name: String,
    /// Session key handed to the game for its own server authentication
    pub auth_token: String,
}

impl Identity {
    pub fn new<P, N, T>(principal_id: P, display_name: N, auth_token: T) -> Self
    where
        P: Into<String>,
        N: Into<String>,
        T: Into<String>,
    {
        Self {
            principal_id: principal_id.into(),
            display_name: display_name.into(),
            auth_token: auth_token.into(),
        }
    }

    /// Reject placeholder values left behind by an incomplete login
    pub fn validate(&self) -> Result<()> {
        if !is_address(&self.principal_id) {
            return Err(LauncherError::InvalidIdentity {
                reason: format!("principal '{}' is not a wallet address", self.principal_id),
            });
        }
        let name = self.display_name.trim();
        if name.is_empty() || name == PLACEHOLDER_DISPLAY_NAME {
            return Err(LauncherError::InvalidIdentity {
                reason: "display name has not been set".to_string(),
            });
        }
        if self.auth_token.trim().is_empty() || self.auth_token.contains(PLACEHOLDER_TOKEN_MARKER) {
            return Err(LauncherError::InvalidIdentity {
                reason: "auth token is missing".to_string(),
            });
        }
        Ok(())
    }

    /// Flat argument list passed to the game executable
    pub fn launch_arguments(&self, game_id: &GameId) -> Vec<String> {
        vec![
            "-key".to_string(),
            self.auth_token.clone(),
            "-id".to_string(),
            self.principal_id.clone(),
            "-name".to_string(),
            self.display_name.clone(),
            "-gameId".to_string(),
            game_id.to_string(),
        ]
    }
}

/// Installation record derived from the filesystem
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameInstallation {
    pub game_id: GameId,
    pub install_directory: PathBuf,
    pub executable_path: PathBuf,
    /// Result of probing `executable_path` at query time
    pub installed: bool,
    /// Completion manifest, only reported while the executable is present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<InstallManifest>,
}
