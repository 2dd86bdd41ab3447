/// UTXO-ledger (Qi) transactions
use super::types::{Outpoint, TxHash};
use crate::address::Address;
use crate::crypto::{self, keccak256};
use crate::denomination;
use crate::error::WalletError;
use crate::musig;
use secp256k1::PublicKey;
use serde::{Deserialize, Serialize};

/// Maximum number of inputs or outputs in one transaction
pub const MAX_IO: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxInput {
    pub outpoint: Outpoint,
    /// Compressed public key of the spending address
    pub pub_key: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: Address,
    pub denomination: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QiTransaction {
    pub chain_id: u64,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    #[serde(default)]
    pub signature: Option<Vec<u8>>,
}

#[derive(Serialize)]
struct UnsignedView<'a> {
    chain_id: u64,
    inputs: &'a [TxInput],
    outputs: &'a [TxOutput],
}

impl QiTransaction {
    pub fn new(chain_id: u64, inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Result<Self, WalletError> {
        if inputs.is_empty() {
            return Err(WalletError::InvalidArgument(
                "Transaction needs at least one input".to_string(),
            ));
        }
        if inputs.len() > MAX_IO || outputs.len() > MAX_IO {
            return Err(WalletError::InvalidArgument(format!(
                "Transaction exceeds {} inputs or outputs",
                MAX_IO
            )));
        }
        for output in &outputs {
            denomination::value(output.denomination)?;
        }
        Ok(QiTransaction {
            chain_id,
            inputs,
            outputs,
            signature: None,
        })
    }

    /// Digest signed by the inputs' keys; excludes the signature.
    pub fn signing_digest(&self) -> Result<[u8; 32], WalletError> {
        let view = UnsignedView {
            chain_id: self.chain_id,
            inputs: &self.inputs,
            outputs: &self.outputs,
        };
        Ok(keccak256(&bincode::serialize(&view)?))
    }

    pub fn output_value(&self) -> Result<u64, WalletError> {
        let denominations: Vec<u8> = self.outputs.iter().map(|o| o.denomination).collect();
        denomination::total(&denominations)
    }

    /// Distinct input keys in first-seen order.
    pub fn signer_keys(&self) -> Result<Vec<PublicKey>, WalletError> {
        let mut keys: Vec<PublicKey> = Vec::new();
        for input in &self.inputs {
            let key = crypto::parse_public_key(&input.pub_key)?;
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    /// Checks the signature: plain Schnorr for a single signer, otherwise
    /// against the MuSig2 aggregate of all distinct input keys.
    pub fn verify_signature(&self) -> Result<(), WalletError> {
        let signature = self
            .signature
            .as_ref()
            .ok_or_else(|| WalletError::CryptoError("Transaction is not signed".to_string()))?;
        let digest = self.signing_digest()?;
        let mut keys = self.signer_keys()?;
        if keys.len() == 1 {
            let key = keys.remove(0);
            crypto::schnorr_verify(&key, &digest, signature)
        } else {
            musig::verify(keys, &digest, signature)
        }
    }

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
}
