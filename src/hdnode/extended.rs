/// Extended key (xprv/xpub) encoding
///
/// Layout: version(4) ‖ depth(1) ‖ parent fingerprint(4) ‖ child index(4) ‖
/// chain code(32) ‖ key(33), Base58Check encoded.
use super::node::{HDNode, NodeKey};
use crate::crypto;
use crate::error::WalletError;
use secp256k1::SecretKey;

pub const EXTENDED_KEY_LENGTH: usize = 78;
pub const XPRV_VERSION: [u8; 4] = [0x04, 0x88, 0xad, 0xe4];
pub const XPUB_VERSION: [u8; 4] = [0x04, 0x88, 0xb2, 0x1e];

impl HDNode {
    /// Base58Check extended key: xprv for private nodes, xpub for neutered ones.
    pub fn extended_key(&self) -> String {
        let mut payload = Vec::with_capacity(EXTENDED_KEY_LENGTH);
        match self.private_key() {
            Some(secret_key) => {
                payload.extend_from_slice(&XPRV_VERSION);
                push_header(&mut payload, self);
                payload.push(0x00);
                payload.extend_from_slice(&secret_key.secret_bytes());
            }
            None => {
                payload.extend_from_slice(&XPUB_VERSION);
                push_header(&mut payload, self);
                payload.extend_from_slice(&self.public_key_bytes());
            }
        }
        bs58::encode(payload).with_check().into_string()
    }

    /// Decodes an xprv or xpub string.
    pub fn from_extended_key(encoded: &str) -> Result<HDNode, WalletError> {
        let payload = bs58::decode(encoded.trim())
            .with_check(None)
            .into_vec()
            .map_err(|e| WalletError::DecodeError(format!("Invalid extended key: {}", e)))?;
        if payload.len() != EXTENDED_KEY_LENGTH {
            return Err(WalletError::DecodeError(format!(
                "Extended key must be {} bytes, got {}",
                EXTENDED_KEY_LENGTH,
                payload.len()
            )));
        }

        let version = &payload[0..4];
        let depth = payload[4];
        let mut parent_fingerprint = [0u8; 4];
        parent_fingerprint.copy_from_slice(&payload[5..9]);
        let mut index_bytes = [0u8; 4];
        index_bytes.copy_from_slice(&payload[9..13]);
        let index = u32::from_be_bytes(index_bytes);
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&payload[13..45]);
        let key_data = &payload[45..78];

        if depth == 0 && (parent_fingerprint != [0u8; 4] || index != 0) {
            return Err(WalletError::DecodeError(
                "Root key with non-zero parent fingerprint or index".to_string(),
            ));
        }
        let path = if depth == 0 { Some("m".to_string()) } else { None };

        if version == XPRV_VERSION {
            if key_data[0] != 0x00 {
                return Err(WalletError::DecodeError(
                    "Private key data must start with 0x00".to_string(),
                ));
            }
            let secret_key = SecretKey::from_slice(&key_data[1..])
                .map_err(|e| WalletError::DecodeError(format!("Invalid private key: {}", e)))?;
            Ok(HDNode::new(
                NodeKey::Private(secret_key),
                crypto::public_key_from_secret(&secret_key),
                chain_code,
                path,
                index,
                depth,
                parent_fingerprint,
                None,
            ))
        } else if version == XPUB_VERSION {
            let public_key = crypto::parse_public_key(key_data)
                .map_err(|e| WalletError::DecodeError(e.to_string()))?;
            Ok(HDNode::new(
                NodeKey::Public,
                public_key,
                chain_code,
                path,
                index,
                depth,
                parent_fingerprint,
                None,
            ))
        } else {
            Err(WalletError::DecodeError(format!(
                "Unknown extended key version {}",
                hex::encode(version)
            )))
        }
    }
}

fn push_header(payload: &mut Vec<u8>, node: &HDNode) {
    payload.push(node.depth());
    payload.extend_from_slice(&node.parent_fingerprint());
    payload.extend_from_slice(&node.index().to_be_bytes());
    payload.extend_from_slice(node.chain_code());
}
