//! Configuration types for the launcher

use crate::error::{LauncherError, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_INSTALL_ROOT: &str = "GAME_LAUNCHER_INSTALL_ROOT";
pub const ENV_EXECUTABLE: &str = "GAME_LAUNCHER_EXECUTABLE";
pub const ENV_STALL_TIMEOUT_SECS: &str = "GAME_LAUNCHER_STALL_TIMEOUT_SECS";
pub const ENV_RPC_URL: &str = "GAME_LAUNCHER_RPC_URL";
pub const ENV_CONTRACT_ADDRESS: &str = "GAME_LAUNCHER_CONTRACT_ADDRESS";
pub const ENV_STORE_URL: &str = "GAME_LAUNCHER_STORE_URL";

/// Configuration shared by every launcher component
#[derive(Debug, Clone)]
pub struct LauncherConfig {
    /// Root under which `games/<gameId>` directories are created
    pub install_root: PathBuf,
    /// File name of the entry point inside each installation directory
    pub executable_name: String,
    /// Timeout for establishing a connection to the archive host
    pub connect_timeout: Duration,
    /// Longest tolerated wait for response headers or the next body chunk
    pub stall_timeout: Duration,
    pub user_agent: String,
    /// JSON-RPC endpoint of the chain hosting the ownership contract
    pub rpc_url: Option<String>,
    /// Address of the ownership contract
    pub contract_address: Option<String>,
    /// Upper bound for a single ownership query
    pub oracle_timeout: Duration,
    /// Base URL of the metadata/listing service
    pub store_url: String,
}

impl LauncherConfig {
    /// Build a configuration from `GAME_LAUNCHER_*` environment variables,
    /// falling back to defaults for anything unset
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`LauncherConfig::from_env`] with an injectable variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = LauncherConfigBuilder::new();

        if let Some(root) = lookup(ENV_INSTALL_ROOT) {
            builder = builder.install_root(root);
        }
        if let Some(name) = lookup(ENV_EXECUTABLE) {
            builder = builder.executable_name(name);
        }
        if let Some(secs) = lookup(ENV_STALL_TIMEOUT_SECS) {
            let secs: u64 = secs.trim().parse().map_err(|_| LauncherError::Configuration {
                message: format!("{} must be a whole number of seconds, got '{}'", ENV_STALL_TIMEOUT_SECS, secs),
                field: Some("stall_timeout".to_string()),
            })?;
            builder = builder.stall_timeout(Duration::from_secs(secs));
        }
        if let Some(url) = lookup(ENV_RPC_URL) {
            builder = builder.rpc_url(url);
        }
        if let Some(address) = lookup(ENV_CONTRACT_ADDRESS) {
            builder = builder.contract_address(address);
        }
        if let Some(url) = lookup(ENV_STORE_URL) {
            builder = builder.store_url(url);
        }

        let config = builder.build();
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make every install or launch fail
    pub fn validate(&self) -> Result<()> {
        if self.executable_name.trim().is_empty() {
            return Err(configuration("executable name must not be empty", "executable_name"));
        }
        if self.executable_name.contains(['/', '\\']) {
            return Err(configuration(
                "executable name must be a plain file name, not a path",
                "executable_name",
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(configuration("connect timeout must be non-zero", "connect_timeout"));
        }
        if self.stall_timeout.is_zero() {
            return Err(configuration("stall timeout must be non-zero", "stall_timeout"));
        }
        if self.oracle_timeout.is_zero() {
            return Err(configuration("oracle timeout must be non-zero", "oracle_timeout"));
        }
        if let Some(ref address) = self.contract_address {
            if !crate::game::is_address(address) {
                return Err(configuration(
                    format!("contract address '{}' is not a 0x-prefixed 20-byte hex address", address),
                    "contract_address",
                ));
            }
        }
        url::Url::parse(&self.store_url).map_err(|e| {
            configuration(format!("store url '{}' is invalid: {}", self.store_url, e), "store_url")
        })?;
        Ok(())
    }

    /// Directory holding one subdirectory per installed game
    pub fn games_dir(&self) -> PathBuf {
        self.install_root.join("games")
    }
}

fn configuration<S: Into<String>>(message: S, field: &str) -> LauncherError {
    LauncherError::Configuration {
        message: message.into(),
        field: Some(field.to_string()),
    }
}

/// Platform default for the install root
pub fn default_install_root() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(r"C:\electron-game-launcher")
    } else {
        home::home_dir()
            .map(|home| home.join(".game-launcher"))
            .unwrap_or_else(|| PathBuf::from(".game-launcher"))
    }
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            install_root: default_install_root(),
            executable_name: "game.exe".to_string(),
            connect_timeout: Duration::from_secs(15),
            stall_timeout: Duration::from_secs(60),
            user_agent: concat!("game-launcher/", env!("CARGO_PKG_VERSION")).to_string(),
            rpc_url: None,
            contract_address: None,
            oracle_timeout: Duration::from_secs(10),
            store_url: "http://localhost:3001".to_string(),
        }
    }
}

/// Builder for [`LauncherConfig`]
#[derive(Debug, Clone, Default)]
pub struct LauncherConfigBuilder {
    config: LauncherConfig,
}

impl LauncherConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.config.install_root = root.into();
        self
    }

    pub fn executable_name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.executable_name = name.into();
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn stall_timeout(mut self, timeout: Duration) -> Self {
        self.config.stall_timeout = timeout;
        self
    }

    pub fn user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn rpc_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.rpc_url = Some(url.into());
        self
    }

    pub fn contract_address<S: Into<String>>(mut self, address: S) -> Self {
        self.config.contract_address = Some(address.into());
        self
    }

    pub fn oracle_timeout(mut self, timeout: Duration) -> Self {
        self.config.oracle_timeout = timeout;
        self
    }

    pub fn store_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.store_url = url.into();
        self
    }

    pub fn build(self) -> LauncherConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = LauncherConfig::default();
        assert_eq!(config.executable_name, "game.exe");
        assert!(config.validate().is_ok());
        assert!(config.games_dir().ends_with("games"));
    }

    #[test]
    fn reads_overrides_from_lookup() {
        let config = LauncherConfig::from_lookup(lookup_from(&[
            (ENV_INSTALL_ROOT, "/srv/launcher"),
            (ENV_EXECUTABLE, "start.sh"),
            (ENV_STALL_TIMEOUT_SECS, "5"),
            (ENV_CONTRACT_ADDRESS, "0x5FbDB2315678afecb367f032d93F642f64180aa3"),
        ]))
        .unwrap();

        assert_eq!(config.install_root, PathBuf::from("/srv/launcher"));
        assert_eq!(config.executable_name, "start.sh");
        assert_eq!(config.stall_timeout, Duration::from_secs(5));
        assert_eq!(config.games_dir(), PathBuf::from("/srv/launcher/games"));
        assert!(config.rpc_url.is_none());
    }

    #[test]
    fn rejects_bad_timeout_value() {
        let err = LauncherConfig::from_lookup(lookup_from(&[(ENV_STALL_TIMEOUT_SECS, "soon")]))
            .unwrap_err();
        match err {
            LauncherError::Configuration { field, .. } => {
                assert_eq!(field.as_deref(), Some("stall_timeout"));
            }
            other => panic!("Expected Configuration error, got {:?}", other),
        }
    }

    #[test]
    fn rejects_executable_paths_and_bad_contract() {
        let config = LauncherConfigBuilder::new().executable_name("bin/game.exe").build();
        assert!(config.validate().is_err());

        let config = LauncherConfigBuilder::new().contract_address("0x1234").build();
        assert!(config.validate().is_err());

        let config = LauncherConfigBuilder::new().stall_timeout(Duration::ZERO).build();
        assert!(config.validate().is_err());
    }
}
