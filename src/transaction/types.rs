/// Shared transaction primitives: hashes and outpoints
use crate::address::Address;
use crate::error::WalletError;
use crate::zone::Zone;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A 32-byte transaction hash, rendered as `0x`-prefixed hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TxHash(pub [u8; 32]);

impl TxHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash(0x{})", hex::encode(self.0))
    }
}

impl FromStr for TxHash {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_part = s.trim().trim_start_matches("0x");
        let bytes = hex::decode(hex_part)
            .map_err(|e| WalletError::DecodeError(format!("Invalid transaction hash: {}", e)))?;
        let array: [u8; 32] = bytes.try_into().map_err(|_| {
            WalletError::DecodeError("Transaction hash must be 32 bytes".to_string())
        })?;
        Ok(TxHash(array))
    }
}

impl Serialize for TxHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        TxHash::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Reference to one output of a previous transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outpoint {
    pub tx_hash: TxHash,
    pub index: u16,
}

impl fmt::Display for Outpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_hash, self.index)
    }
}

/// An unspent output owned by the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutpointInfo {
    pub outpoint: Outpoint,
    pub denomination: u8,
    pub address: Address,
    pub zone: Zone,
    pub account: u32,
}

impl OutpointInfo {
    pub fn value(&self) -> Result<u64, WalletError> {
        crate::denomination::value(self.denomination)
    }
}
