//! Ledger collaborator consumed by the wallets
//!
//! The wallets only need a handful of chain queries. Anything that can
//! answer them (a JSON-RPC client over the shard connections, an in-memory
//! test double) implements [`Ledger`].

use crate::address::Address;
use crate::error::WalletError;
use crate::transaction::{Outpoint, TxHash};
use crate::zone::{Shard, Zone};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An unspent output as reported by the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteOutpoint {
    pub outpoint: Outpoint,
    pub denomination: u8,
}

/// Final outcome of a broadcast transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    Confirmed,
    Failed(String),
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Chains currently served by the node.
    async fn running_shards(&self) -> Result<Vec<Shard>, WalletError>;

    async fn get_outpoints(
        &self,
        address: &Address,
        zone: Zone,
    ) -> Result<Vec<RemoteOutpoint>, WalletError>;

    async fn get_balance(&self, address: &Address, zone: Zone) -> Result<u128, WalletError>;

    async fn broadcast_transaction(&self, zone: Zone, raw: Vec<u8>) -> Result<TxHash, WalletError>;

    /// Waits until the transaction is included or rejected.
    async fn wait_for_transaction(&self, zone: Zone, hash: TxHash) -> Result<TxStatus, WalletError>;
}
