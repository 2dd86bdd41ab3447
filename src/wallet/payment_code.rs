//! Reusable payment codes and the address channels built on them
//!
//! A payment code publishes the public key and chain code of
//! `m/47'/969'/<account>'`. Two wallets that know each other's codes derive
//! the same sequence of one-time addresses from an ECDH shared secret.

use crate::address::Address;
use crate::crypto::{self, sha256, x_bytes, SECP256K1_CONTEXT};
use crate::error::WalletError;
use crate::hdnode::node::NodeKey;
use crate::hdnode::HDNode;
use secp256k1::{PublicKey, Scalar, SecretKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Base58Check prefix byte of an encoded payment code.
pub const PAYMENT_CODE_PREFIX: u8 = 0x47;
pub const PAYMENT_CODE_VERSION: u8 = 0x01;
/// Length of the payload without prefix.
pub const PAYMENT_CODE_LENGTH: usize = 80;

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PaymentCode {
    public_key: PublicKey,
    chain_code: [u8; 32],
}

impl PaymentCode {
    /// Code of a BIP-47 account node.
    pub fn from_node(node: &HDNode) -> Self {
        PaymentCode {
            public_key: *node.public_key(),
            chain_code: *node.chain_code(),
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn chain_code(&self) -> &[u8; 32] {
        &self.chain_code
    }

    /// `version ‖ features ‖ sign ‖ x ‖ chain code ‖ reserved`
    pub fn payload(&self) -> [u8; PAYMENT_CODE_LENGTH] {
        let mut payload = [0u8; PAYMENT_CODE_LENGTH];
        payload[0] = PAYMENT_CODE_VERSION;
        payload[1] = 0x00;
        payload[2..35].copy_from_slice(&self.public_key.serialize());
        payload[35..67].copy_from_slice(&self.chain_code);
        payload
    }

    fn as_node(&self) -> HDNode {
        HDNode::new(
            NodeKey::Public,
            self.public_key,
            self.chain_code,
            None,
            0,
            3,
            [0u8; 4],
            None,
        )
    }

    /// Public key of child `index` under this code.
    pub fn child_public_key(&self, index: u32) -> Result<PublicKey, WalletError> {
        Ok(*self.as_node().derive_child(index)?.public_key())
    }
}

impl fmt::Display for PaymentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut data = Vec::with_capacity(PAYMENT_CODE_LENGTH + 1);
        data.push(PAYMENT_CODE_PREFIX);
        data.extend_from_slice(&self.payload());
        f.write_str(&bs58::encode(data).with_check().into_string())
    }
}

impl fmt::Debug for PaymentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PaymentCode({})", self)
    }
}

impl FromStr for PaymentCode {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let data = bs58::decode(s.trim())
            .with_check(Some(PAYMENT_CODE_PREFIX))
            .into_vec()
            .map_err(|e| WalletError::DecodeError(format!("Invalid payment code: {}", e)))?;
        if data.len() != PAYMENT_CODE_LENGTH + 1 {
            return Err(WalletError::DecodeError(format!(
                "Payment code must be {} bytes, got {}",
                PAYMENT_CODE_LENGTH,
                data.len().saturating_sub(1)
            )));
        }
        let payload = &data[1..];
        if payload[0] != PAYMENT_CODE_VERSION {
            return Err(WalletError::DecodeError(format!(
                "Unsupported payment code version {}",
                payload[0]
            )));
        }
        let public_key = crypto::parse_public_key(&payload[2..35])
            .map_err(|e| WalletError::DecodeError(format!("Invalid payment code key: {}", e)))?;
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&payload[35..67]);
        Ok(PaymentCode {
            public_key,
            chain_code,
        })
    }
}

impl Serialize for PaymentCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PaymentCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        PaymentCode::from_str(&s).map_err(serde::de::Error::custom)
    }
}

fn shared_scalar(point: &PublicKey, secret: &SecretKey) -> Result<Scalar, WalletError> {
    let shared = point.mul_tweak(&SECP256K1_CONTEXT, &Scalar::from(*secret))?;
    let hashed = sha256(&x_bytes(&shared));
    Scalar::from_be_bytes(hashed)
        .map_err(|_| WalletError::CryptoError("Shared secret is out of range".to_string()))
}

/// One side of a channel between this wallet's code and a counterparty's.
#[derive(Clone)]
pub struct PaymentChannel {
    account: u32,
    own: HDNode,
    remote: PaymentCode,
    sent: BTreeSet<u32>,
    received: BTreeSet<u32>,
}

impl PaymentChannel {
    /// `own` must be the private BIP-47 account node.
    pub fn new(account: u32, own: HDNode, remote: PaymentCode) -> Result<Self, WalletError> {
        own.require_private_key()?;
        Ok(PaymentChannel {
            account,
            own,
            remote,
            sent: BTreeSet::new(),
            received: BTreeSet::new(),
        })
    }

    pub fn account(&self) -> u32 {
        self.account
    }

    pub fn remote(&self) -> &PaymentCode {
        &self.remote
    }

    /// Public key the counterparty controls at `index`:
    /// `B_i + sha256(x(a·B_i))·G`.
    pub fn sending_public_key(&self, index: u32) -> Result<PublicKey, WalletError> {
        let own_child = self.own.derive_child(0)?;
        let a = own_child.require_private_key()?;
        let b_i = self.remote.child_public_key(index)?;
        let tweak = shared_scalar(&b_i, a)?;
        Ok(b_i.add_exp_tweak(&SECP256K1_CONTEXT, &tweak)?)
    }

    pub fn sending_address(&self, index: u32) -> Result<Address, WalletError> {
        Ok(Address::from_public_key(&self.sending_public_key(index)?))
    }

    /// Private key this wallet controls at `index`:
    /// `b_i + sha256(x(b_i·A))`.
    pub fn receiving_key(&self, index: u32) -> Result<SecretKey, WalletError> {
        let own_child = self.own.derive_child(index)?;
        let b_i = own_child.require_private_key()?;
        let a = self.remote.child_public_key(0)?;
        let tweak = shared_scalar(&a, b_i)?;
        Ok(b_i.add_tweak(&tweak)?)
    }

    pub fn receiving_address(&self, index: u32) -> Result<Address, WalletError> {
        let key = self.receiving_key(index)?;
        Ok(Address::from_public_key(&crypto::public_key_from_secret(&key)))
    }

    /// First send index not yet handed out.
    pub fn next_send_index(&self) -> u32 {
        self.sent.iter().next_back().map_or(0, |i| i + 1)
    }

    pub fn next_receive_index(&self) -> u32 {
        self.received.iter().next_back().map_or(0, |i| i + 1)
    }

    pub(crate) fn mark_sent(&mut self, index: u32) {
        self.sent.insert(index);
    }

    pub(crate) fn mark_received(&mut self, index: u32) {
        self.received.insert(index);
    }

    pub fn received_indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.received.iter().copied()
    }

    pub fn to_serialized(&self) -> SerializedChannel {
        SerializedChannel {
            payment_code: self.remote,
            account: self.account,
            sent: self.sent.iter().copied().collect(),
            received: self.received.iter().copied().collect(),
        }
    }
}

impl fmt::Debug for PaymentChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentChannel")
            .field("account", &self.account)
            .field("remote", &self.remote)
            .field("sent", &self.sent.len())
            .field("received", &self.received.len())
            .finish()
    }
}

/// Channel state stored alongside a serialized wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedChannel {
    pub payment_code: PaymentCode,
    pub account: u32,
    #[serde(default)]
    pub sent: Vec<u32>,
    #[serde(default)]
    pub received: Vec<u32>,
}
