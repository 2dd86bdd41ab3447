/// BIP-32 hierarchical deterministic nodes
use super::path::{ChildIndex, DerivationPath, HARDENED_OFFSET};
use crate::address::Address;
use crate::crypto::{self, hash160, SECP256K1_CONTEXT};
use crate::error::WalletError;
use bip39::Mnemonic;
use hmac::{Hmac, Mac};
use secp256k1::{PublicKey, Scalar, SecretKey};
use sha2::Sha512;
use std::fmt;
use std::str::FromStr;

type HmacSha512 = Hmac<Sha512>;

const MASTER_SECRET: &[u8] = b"Bitcoin seed";
pub const MIN_SEED_LENGTH: usize = 16;
pub const MAX_SEED_LENGTH: usize = 64;

#[derive(Clone, PartialEq, Eq)]
pub(crate) enum NodeKey {
    Private(SecretKey),
    Public,
}

/// An immutable node of the derivation tree.
///
/// Nodes carry no reference to their parent: deriving returns a new,
/// independently owned node. A neutered node never holds a private scalar.
#[derive(Clone, PartialEq, Eq)]
pub struct HDNode {
    key: NodeKey,
    public_key: PublicKey,
    chain_code: [u8; 32],
    path: Option<String>,
    index: u32,
    depth: u8,
    parent_fingerprint: [u8; 4],
    mnemonic: Option<Mnemonic>,
}

impl HDNode {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        key: NodeKey,
        public_key: PublicKey,
        chain_code: [u8; 32],
        path: Option<String>,
        index: u32,
        depth: u8,
        parent_fingerprint: [u8; 4],
        mnemonic: Option<Mnemonic>,
    ) -> Self {
        HDNode {
            key,
            public_key,
            chain_code,
            path,
            index,
            depth,
            parent_fingerprint,
            mnemonic,
        }
    }

    /// Expands a seed into the master node (`m`).
    pub fn from_seed(seed: &[u8]) -> Result<Self, WalletError> {
        Self::master_from_seed(seed, None)
    }

    fn master_from_seed(seed: &[u8], mnemonic: Option<Mnemonic>) -> Result<Self, WalletError> {
        if !(MIN_SEED_LENGTH..=MAX_SEED_LENGTH).contains(&seed.len()) {
            return Err(WalletError::InvalidArgument(format!(
                "Seed must be between {} and {} bytes, got {}",
                MIN_SEED_LENGTH,
                MAX_SEED_LENGTH,
                seed.len()
            )));
        }

        let mut mac = HmacSha512::new_from_slice(MASTER_SECRET)
            .map_err(|_| WalletError::CryptoError("HMAC initialization failed".to_string()))?;
        mac.update(seed);
        let output = mac.finalize().into_bytes();

        let secret_key = SecretKey::from_slice(&output[..32])
            .map_err(|e| WalletError::CryptoError(format!("Invalid master key: {}", e)))?;
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&output[32..]);

        Ok(HDNode::new(
            NodeKey::Private(secret_key),
            crypto::public_key_from_secret(&secret_key),
            chain_code,
            Some("m".to_string()),
            0,
            0,
            [0u8; 4],
            mnemonic,
        ))
    }

    /// Builds the node at `path` (or `m`) from a BIP-39 mnemonic.
    pub fn from_mnemonic(
        mnemonic: &Mnemonic,
        passphrase: &str,
        path: Option<&str>,
    ) -> Result<Self, WalletError> {
        let seed = mnemonic.to_seed(passphrase);
        let master = Self::master_from_seed(&seed, Some(mnemonic.clone()))?;
        match path {
            Some(path) => master.derive_path(path),
            None => Ok(master),
        }
    }

    pub fn from_phrase(
        phrase: &str,
        passphrase: &str,
        path: Option<&str>,
    ) -> Result<Self, WalletError> {
        let mnemonic = Mnemonic::parse_normalized(phrase)
            .map_err(|e| WalletError::InvalidArgument(format!("Invalid mnemonic: {}", e)))?;
        Self::from_mnemonic(&mnemonic, passphrase, path)
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Compressed SEC1 public key bytes.
    pub fn public_key_bytes(&self) -> [u8; 33] {
        self.public_key.serialize()
    }

    pub fn private_key(&self) -> Option<&SecretKey> {
        match &self.key {
            NodeKey::Private(secret_key) => Some(secret_key),
            NodeKey::Public => None,
        }
    }

    pub(crate) fn require_private_key(&self) -> Result<&SecretKey, WalletError> {
        self.private_key().ok_or_else(|| {
            WalletError::InvalidArgument("Node is neutered and cannot sign".to_string())
        })
    }

    pub fn is_neutered(&self) -> bool {
        matches!(self.key, NodeKey::Public)
    }

    pub fn chain_code(&self) -> &[u8; 32] {
        &self.chain_code
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn parent_fingerprint(&self) -> [u8; 4] {
        self.parent_fingerprint
    }

    pub fn fingerprint(&self) -> [u8; 4] {
        let hash = hash160(&self.public_key.serialize());
        [hash[0], hash[1], hash[2], hash[3]]
    }

    pub fn mnemonic(&self) -> Option<&Mnemonic> {
        self.mnemonic.as_ref()
    }

    pub fn address(&self) -> Address {
        Address::from_public_key(&self.public_key)
    }

    /// A public-only copy of this node.
    pub fn neuter(&self) -> HDNode {
        HDNode::new(
            NodeKey::Public,
            self.public_key,
            self.chain_code,
            self.path.clone(),
            self.index,
            self.depth,
            self.parent_fingerprint,
            None,
        )
    }

    /// Derives the child at `index`; an index with the top bit set is hardened.
    pub fn derive_child(&self, index: u32) -> Result<HDNode, WalletError> {
        let hardened = index & HARDENED_OFFSET != 0;
        if self.depth == u8::MAX {
            return Err(WalletError::InvalidArgument(
                "Maximum derivation depth reached".to_string(),
            ));
        }

        let mut data = Vec::with_capacity(37);
        if hardened {
            let secret_key = self.private_key().ok_or_else(|| {
                WalletError::InvalidArgument(
                    "Cannot derive a hardened child from a neutered node".to_string(),
                )
            })?;
            data.push(0x00);
            data.extend_from_slice(&secret_key.secret_bytes());
        } else {
            data.extend_from_slice(&self.public_key.serialize());
        }
        data.extend_from_slice(&index.to_be_bytes());

        let mut mac = HmacSha512::new_from_slice(&self.chain_code)
            .map_err(|_| WalletError::CryptoError("HMAC initialization failed".to_string()))?;
        mac.update(&data);
        let output = mac.finalize().into_bytes();

        let mut il = [0u8; 32];
        il.copy_from_slice(&output[..32]);
        let tweak = Scalar::from_be_bytes(il).map_err(|_| {
            WalletError::CryptoError(format!("Derived tweak out of range at index {}", index))
        })?;
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&output[32..]);

        let (key, public_key) = match &self.key {
            NodeKey::Private(secret_key) => {
                let child = secret_key.add_tweak(&tweak).map_err(|e| {
                    WalletError::CryptoError(format!("Invalid child key at index {}: {}", index, e))
                })?;
                (NodeKey::Private(child), crypto::public_key_from_secret(&child))
            }
            NodeKey::Public => {
                let child = self
                    .public_key
                    .add_exp_tweak(&SECP256K1_CONTEXT, &tweak)
                    .map_err(|e| {
                        WalletError::CryptoError(format!(
                            "Invalid child key at index {}: {}",
                            index, e
                        ))
                    })?;
                (NodeKey::Public, child)
            }
        };

        let path = self
            .path
            .as_ref()
            .map(|p| format!("{}/{}", p, ChildIndex::from_raw(index)));

        Ok(HDNode::new(
            key,
            public_key,
            chain_code,
            path,
            index,
            self.depth + 1,
            self.fingerprint(),
            self.mnemonic.clone(),
        ))
    }

    /// Derives along a slash-separated path.
    ///
    /// Absolute paths (`m/...`) are only accepted on a depth-0 node; relative
    /// paths apply from this node.
    pub fn derive_path(&self, path: &str) -> Result<HDNode, WalletError> {
        let parsed = DerivationPath::from_str(path)?;
        if parsed.is_absolute() && self.depth != 0 {
            return Err(WalletError::InvalidPath(format!(
                "Absolute path {} cannot be derived from a node at depth {}",
                path, self.depth
            )));
        }
        parsed
            .segments()
            .iter()
            .try_fold(self.clone(), |node, segment| node.derive_child(segment.raw()))
    }

    /// Signs a digest with recoverable ECDSA.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<[u8; 65], WalletError> {
        Ok(crypto::ecdsa_sign_recoverable(
            self.require_private_key()?,
            digest,
        ))
    }

    /// Signs a digest with BIP-340 Schnorr.
    pub fn sign_schnorr(&self, digest: &[u8; 32]) -> Result<[u8; 64], WalletError> {
        Ok(crypto::schnorr_sign(self.require_private_key()?, digest))
    }
}

impl fmt::Debug for HDNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HDNode")
            .field("address", &self.address())
            .field("path", &self.path)
            .field("depth", &self.depth)
            .field("index", &self.index)
            .field("neutered", &self.is_neutered())
            .finish()
    }
}
