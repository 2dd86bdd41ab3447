//! JSON-RPC envelopes and a [`Ledger`] over the shard connections

use super::connection::ShardConnectionManager;
use crate::address::Address;
use crate::error::WalletError;
use crate::provider::{Ledger, RemoteOutpoint, TxStatus};
use crate::transaction::{Outpoint, TxHash};
use crate::zone::{Shard, Zone};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: &str, params: Value) -> Self {
        JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn into_result(self) -> Result<Value, WalletError> {
        match (self.error, self.result) {
            (Some(error), _) => Err(WalletError::NetworkError(format!(
                "RPC error {}: {}",
                error.code, error.message
            ))),
            (None, Some(result)) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

/// Parses the reply of `quai_listRunningChains`: a list of locations, each
/// either an array of indices (`[]`, `[r]`, `[r, z]`) or a zone hex id.
pub fn parse_running_chains(value: &Value) -> Result<Vec<Shard>, WalletError> {
    let entries = value.as_array().ok_or_else(|| {
        WalletError::DecodeError(format!("Expected a list of running chains, got {}", value))
    })?;
    let mut shards = Vec::with_capacity(entries.len());
    for entry in entries {
        let shard = match entry {
            Value::Array(parts) => {
                let location = parts
                    .iter()
                    .map(|part| {
                        part.as_u64()
                            .and_then(|n| u8::try_from(n).ok())
                            .ok_or_else(|| {
                                WalletError::DecodeError(format!("Invalid location part {}", part))
                            })
                    })
                    .collect::<Result<Vec<u8>, _>>()?;
                Shard::from_location(&location)?
            }
            Value::String(s) => Shard::Zone(Zone::from_str(s)?),
            other => {
                return Err(WalletError::DecodeError(format!(
                    "Invalid running chain entry {}",
                    other
                )))
            }
        };
        if !shards.contains(&shard) {
            shards.push(shard);
        }
    }
    Ok(shards)
}

fn parse_quantity(value: &Value) -> Result<u128, WalletError> {
    match value {
        Value::String(s) => {
            let digits = s.trim_start_matches("0x");
            if digits.is_empty() {
                return Ok(0);
            }
            u128::from_str_radix(digits, 16)
                .map_err(|e| WalletError::DecodeError(format!("Invalid quantity {}: {}", s, e)))
        }
        Value::Number(n) => n
            .as_u64()
            .map(u128::from)
            .ok_or_else(|| WalletError::DecodeError(format!("Invalid quantity {}", n))),
        other => Err(WalletError::DecodeError(format!("Invalid quantity {}", other))),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcOutpoint {
    tx_hash: TxHash,
    index: u16,
    denomination: u8,
}

/// [`Ledger`] backed by JSON-RPC calls routed through the shard manager.
#[derive(Clone)]
pub struct ShardRpcLedger {
    manager: ShardConnectionManager,
    poll_interval: Duration,
    poll_attempts: u32,
}

impl ShardRpcLedger {
    pub fn new(manager: ShardConnectionManager) -> Self {
        let config = manager.config();
        ShardRpcLedger {
            poll_interval: config.receipt_poll_interval(),
            poll_attempts: config.receipt_poll_attempts,
            manager,
        }
    }

    pub fn manager(&self) -> &ShardConnectionManager {
        &self.manager
    }
}

#[async_trait]
impl Ledger for ShardRpcLedger {
    async fn running_shards(&self) -> Result<Vec<Shard>, WalletError> {
        let value = self
            .manager
            .request(Shard::Prime, "quai_listRunningChains", json!([]))
            .await?;
        parse_running_chains(&value)
    }

    async fn get_outpoints(
        &self,
        address: &Address,
        zone: Zone,
    ) -> Result<Vec<RemoteOutpoint>, WalletError> {
        let value = self
            .manager
            .request(
                Shard::Zone(zone),
                "quai_getOutpointsByAddress",
                json!([address.to_string()]),
            )
            .await?;
        if value.is_null() {
            return Ok(Vec::new());
        }
        let outpoints: Vec<RpcOutpoint> = serde_json::from_value(value)?;
        Ok(outpoints
            .into_iter()
            .map(|o| RemoteOutpoint {
                outpoint: Outpoint {
                    tx_hash: o.tx_hash,
                    index: o.index,
                },
                denomination: o.denomination,
            })
            .collect())
    }

    async fn get_balance(&self, address: &Address, zone: Zone) -> Result<u128, WalletError> {
        let value = self
            .manager
            .request(
                Shard::Zone(zone),
                "quai_getBalance",
                json!([address.to_string(), "latest"]),
            )
            .await?;
        parse_quantity(&value)
    }

    async fn broadcast_transaction(&self, zone: Zone, raw: Vec<u8>) -> Result<TxHash, WalletError> {
        let value = self
            .manager
            .request(
                Shard::Zone(zone),
                "quai_sendRawTransaction",
                json!([format!("0x{}", hex::encode(raw))]),
            )
            .await?;
        let hash = value.as_str().ok_or_else(|| {
            WalletError::DecodeError(format!("Expected a transaction hash, got {}", value))
        })?;
        TxHash::from_str(hash)
    }

    async fn wait_for_transaction(&self, zone: Zone, hash: TxHash) -> Result<TxStatus, WalletError> {
        for attempt in 0..self.poll_attempts {
            let receipt = self
                .manager
                .request(
                    Shard::Zone(zone),
                    "quai_getTransactionReceipt",
                    json!([hash.to_string()]),
                )
                .await?;
            if let Some(status) = receipt.get("status") {
                return Ok(if parse_quantity(status)? == 1 {
                    TxStatus::Confirmed
                } else {
                    TxStatus::Failed(format!("transaction {} reverted", hash))
                });
            }
            debug!(%hash, attempt, "receipt not available yet");
            tokio::time::sleep(self.poll_interval).await;
        }
        Err(WalletError::NetworkError(format!(
            "No receipt for {} after {} polls",
            hash, self.poll_attempts
        )))
    }
}
