//! Ownership oracle client
//!
//! Launch is gated on the principal holding at least one unit of the game's
//! token in the ownership contract (ERC-1155 `balanceOf(address,uint256)`).
//! The orchestrator treats every [`OracleError`] as a reason to block the
//! launch.

use crate::config::LauncherConfig;
use crate::error::{LauncherError, Result};
use crate::game::{GameId, is_address};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::debug;

/// `keccak256("balanceOf(address,uint256)")[..4]`
pub const BALANCE_OF_SELECTOR: &str = "00fdd58e";

/// Failures while querying the ownership oracle
#[derive(Error, Debug)]
pub enum OracleError {
    #[error("ownership oracle is not configured: {0}")]
    NotConfigured(String),

    #[error("principal '{0}' is not a wallet address")]
    InvalidPrincipal(String),

    #[error("oracle request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("oracle responded with {0}")]
    Status(reqwest::StatusCode),

    #[error("oracle returned JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("malformed oracle response: {0}")]
    Malformed(String),
}

/// Source of truth for game ownership
#[async_trait]
pub trait OwnershipOracle: Send + Sync {
    /// Number of units of `game_id` held by `principal`
    async fn balance_of(&self, principal: &str, game_id: &GameId) -> std::result::Result<u128, OracleError>;
}

/// Oracle used when no contract is configured: every query fails, so launches stay blocked
#[derive(Debug, Clone, Default)]
pub struct UnconfiguredOracle;

#[async_trait]
impl OwnershipOracle for UnconfiguredOracle {
    async fn balance_of(&self, _principal: &str, _game_id: &GameId) -> std::result::Result<u128, OracleError> {
        Err(OracleError::NotConfigured(
            "set the RPC url and contract address".to_string(),
        ))
    }
}

/// Queries the ownership contract through an Ethereum JSON-RPC node
#[derive(Debug)]
pub struct RpcOwnershipOracle {
    client: Client,
    rpc_url: String,
    contract_address: String,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

impl RpcOwnershipOracle {
    pub fn new<U: Into<String>, A: Into<String>>(client: Client, rpc_url: U, contract_address: A) -> Self {
        Self {
            client,
            rpc_url: rpc_url.into(),
            contract_address: contract_address.into(),
            next_id: AtomicU64::new(1),
        }
    }

    async fn eth_call(&self, data: String) -> std::result::Result<String, OracleError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "eth_call",
            "params": [{ "to": self.contract_address, "data": data }, "latest"],
        });

        let response = self.client.post(&self.rpc_url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(OracleError::Status(status));
        }

        let value: Value = response.json().await?;
        let parsed: RpcResponse =
            serde_json::from_value(value).map_err(|e| OracleError::Malformed(e.to_string()))?;

        if let Some(error) = parsed.error {
            return Err(OracleError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        parsed
            .result
            .ok_or_else(|| OracleError::Malformed("response has neither result nor error".to_string()))
    }
}

#[async_trait]
impl OwnershipOracle for RpcOwnershipOracle {
    async fn balance_of(&self, principal: &str, game_id: &GameId) -> std::result::Result<u128, OracleError> {
        let data = balance_of_calldata(principal, game_id)?;
        let result = self.eth_call(data).await?;
        let balance = decode_uint(&result)?;
        debug!("balanceOf({}, {}) = {}", principal, game_id, balance);
        Ok(balance)
    }
}

/// Build the oracle described by `config`
pub fn oracle_from_config(config: &LauncherConfig) -> Result<Arc<dyn OwnershipOracle>> {
    match (&config.rpc_url, &config.contract_address) {
        (Some(rpc_url), Some(contract)) => {
            let client = Client::builder()
                .timeout(config.oracle_timeout)
                .user_agent(&config.user_agent)
                .build()
                .map_err(|e| LauncherError::Configuration {
                    message: format!("Failed to create RPC client: {}", e),
                    field: Some("rpc_url".to_string()),
                })?;
            Ok(Arc::new(RpcOwnershipOracle::new(client, rpc_url.clone(), contract.clone())))
        }
        _ => Ok(Arc::new(UnconfiguredOracle)),
    }
}

/// ABI-encoded `balanceOf(principal, token_id)` call
pub fn balance_of_calldata(principal: &str, game_id: &GameId) -> std::result::Result<String, OracleError> {
    if !is_address(principal) {
        return Err(OracleError::InvalidPrincipal(principal.to_string()));
    }
    Ok(format!(
        "0x{}{:0>64}{:064x}",
        BALANCE_OF_SELECTOR,
        principal[2..].to_ascii_lowercase(),
        game_id.token_id()
    ))
}

/// Decode a hex-encoded uint256, saturating at `u128::MAX`
fn decode_uint(word: &str) -> std::result::Result<u128, OracleError> {
    let digits = word
        .strip_prefix("0x")
        .ok_or_else(|| OracleError::Malformed(format!("result '{}' is not 0x-prefixed", word)))?;
    if digits.is_empty() {
        return Err(OracleError::Malformed("empty result, is the contract address right?".to_string()));
    }

    let padded = if digits.len() % 2 == 1 {
        format!("0{}", digits)
    } else {
        digits.to_string()
    };
    let bytes = hex::decode(&padded).map_err(|e| OracleError::Malformed(format!("result is not hex: {}", e)))?;

    let split = bytes.len().saturating_sub(16);
    if bytes[..split].iter().any(|b| *b != 0) {
        return Ok(u128::MAX);
    }
    let mut low = [0u8; 16];
    low[16 - (bytes.len() - split)..].copy_from_slice(&bytes[split..]);
    Ok(u128::from_be_bytes(low))
}
