/// Account-ledger (Quai) transactions
use super::types::TxHash;
use crate::address::Address;
use crate::crypto::{self, keccak256};
use crate::error::WalletError;
use serde::{Deserialize, Serialize};

/// Maximum call data size in bytes
pub const MAX_DATA_SIZE: usize = 128 * 1024;

/// An unsigned account transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuaiTransactionRequest {
    pub chain_id: u64,
    pub nonce: u64,
    pub from: Address,
    pub to: Option<Address>,
    pub value: u128,
    pub gas_limit: u64,
    pub gas_price: u128,
    #[serde(default)]
    pub data: Vec<u8>,
}

impl QuaiTransactionRequest {
    pub fn new(chain_id: u64, nonce: u64, from: Address, to: Option<Address>, value: u128) -> Self {
        QuaiTransactionRequest {
            chain_id,
            nonce,
            from,
            to,
            value,
            gas_limit: 21_000,
            gas_price: 0,
            data: Vec::new(),
        }
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Result<Self, WalletError> {
        if data.len() > MAX_DATA_SIZE {
            return Err(WalletError::InvalidArgument(format!(
                "Call data exceeds maximum size of {} bytes",
                MAX_DATA_SIZE
            )));
        }
        self.data = data;
        Ok(self)
    }

    /// Digest the sender signs: keccak-256 of the canonical encoding.
    pub fn signing_digest(&self) -> Result<[u8; 32], WalletError> {
        let encoded = bincode::serialize(self)?;
        Ok(keccak256(&encoded))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedQuaiTransaction {
    pub request: QuaiTransactionRequest,
    /// `r ‖ s ‖ v`
    pub signature: Vec<u8>,
}

impl SignedQuaiTransaction {
    pub fn raw(&self) -> Result<Vec<u8>, WalletError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_raw(raw: &[u8]) -> Result<Self, WalletError> {
        bincode::deserialize(raw)
            .map_err(|e| WalletError::DecodeError(format!("Invalid raw transaction: {}", e)))
    }

    pub fn hash(&self) -> Result<TxHash, WalletError> {
        Ok(TxHash(keccak256(&self.raw()?)))
    }

    /// Recovers the signer and checks it matches `from`.
    pub fn verify(&self) -> Result<(), WalletError> {
        let signer = crypto::recover_address(&self.request.signing_digest()?, &self.signature)?;
        if signer != self.request.from {
            return Err(WalletError::Mismatch(format!(
                "Signature recovers to {} but transaction is from {}",
                signer, self.request.from
            )));
        }
        Ok(())
    }
}
