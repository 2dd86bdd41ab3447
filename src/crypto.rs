//! Cryptographic primitives shared by the wallets
//!
//! Hashing helpers, BIP-340 Schnorr signatures over 32-byte digests and
//! recoverable ECDSA signatures for the account ledger.

use crate::address::Address;
use crate::error::WalletError;
use once_cell::sync::Lazy;
use ripemd::Ripemd160;
use secp256k1::{
    constants::SCHNORR_SIGNATURE_SIZE,
    ecdsa::{RecoverableSignature, RecoveryId},
    schnorr, All, Keypair, Message, PublicKey, Secp256k1, SecretKey, XOnlyPublicKey,
};
use sha2::{Digest, Sha256};
use sha3::Keccak256;

/// A thread-safe, lazily initialized Secp256k1 context.
pub(crate) static SECP256K1_CONTEXT: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Size of a recoverable signature: `r ‖ s ‖ v`.
pub const RECOVERABLE_SIGNATURE_SIZE: usize = 65;

const MESSAGE_PREFIX: &str = "\x19Quai Signed Message:\n";

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// RIPEMD-160 of SHA-256, used for key fingerprints.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    Ripemd160::digest(Sha256::digest(data)).into()
}

/// BIP-340 tagged hash: `sha256(sha256(tag) ‖ sha256(tag) ‖ data...)`.
pub fn tagged_hash(tag: &str, parts: &[&[u8]]) -> [u8; 32] {
    let tag_hash = Sha256::digest(tag.as_bytes());
    let mut hasher = Sha256::new();
    hasher.update(tag_hash);
    hasher.update(tag_hash);
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Hash a user message with the Quai signed-message prefix.
pub fn hash_message(message: &[u8]) -> [u8; 32] {
    let mut data = Vec::with_capacity(MESSAGE_PREFIX.len() + 20 + message.len());
    data.extend_from_slice(MESSAGE_PREFIX.as_bytes());
    data.extend_from_slice(message.len().to_string().as_bytes());
    data.extend_from_slice(message);
    keccak256(&data)
}

/// Pre-hashed typed data: the domain separator and the struct hash.
///
/// Producing these hashes needs ABI encoding, which callers do themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypedDataDigest {
    pub domain_separator: [u8; 32],
    pub struct_hash: [u8; 32],
}

impl TypedDataDigest {
    pub fn digest(&self) -> [u8; 32] {
        let mut data = Vec::with_capacity(66);
        data.extend_from_slice(&[0x19, 0x01]);
        data.extend_from_slice(&self.domain_separator);
        data.extend_from_slice(&self.struct_hash);
        keccak256(&data)
    }
}

pub fn public_key_from_secret(secret_key: &SecretKey) -> PublicKey {
    PublicKey::from_secret_key(&SECP256K1_CONTEXT, secret_key)
}

pub fn parse_public_key(bytes: &[u8]) -> Result<PublicKey, WalletError> {
    PublicKey::from_slice(bytes)
        .map_err(|e| WalletError::CryptoError(format!("Invalid public key: {}", e)))
}

/// Returns true when the point's y coordinate is even.
pub(crate) fn has_even_y(point: &PublicKey) -> bool {
    point.serialize()[0] == 0x02
}

/// The 32-byte x coordinate of a point.
pub(crate) fn x_bytes(point: &PublicKey) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&point.serialize()[1..]);
    out
}

/// Signs a 32-byte digest with BIP-340 Schnorr.
pub fn schnorr_sign(
    secret_key: &SecretKey,
    digest: &[u8; 32],
) -> [u8; SCHNORR_SIGNATURE_SIZE] {
    let keypair = Keypair::from_secret_key(&SECP256K1_CONTEXT, secret_key);
    let message = Message::from_digest(*digest);
    let signature = SECP256K1_CONTEXT.sign_schnorr(&message, &keypair);
    let mut out = [0u8; SCHNORR_SIGNATURE_SIZE];
    out.copy_from_slice(signature.as_ref());
    out
}

/// Verifies a BIP-340 signature against the x-only form of `public_key`.
pub fn schnorr_verify(
    public_key: &PublicKey,
    digest: &[u8; 32],
    signature_bytes: &[u8],
) -> Result<(), WalletError> {
    let (x_only, _) = public_key.x_only_public_key();
    verify_x_only(&x_only, digest, signature_bytes)
}

pub(crate) fn verify_x_only(
    x_only: &XOnlyPublicKey,
    digest: &[u8; 32],
    signature_bytes: &[u8],
) -> Result<(), WalletError> {
    if signature_bytes.len() != SCHNORR_SIGNATURE_SIZE {
        return Err(WalletError::CryptoError(format!(
            "Signature must be exactly {} bytes, got {}",
            SCHNORR_SIGNATURE_SIZE,
            signature_bytes.len()
        )));
    }
    let signature = schnorr::Signature::from_slice(signature_bytes)
        .map_err(|e| WalletError::CryptoError(format!("Invalid signature: {}", e)))?;
    let message = Message::from_digest(*digest);

    SECP256K1_CONTEXT
        .verify_schnorr(&signature, &message, x_only)
        .map_err(|_| WalletError::CryptoError("Signature verification failed".to_string()))
}

/// Signs a 32-byte digest with recoverable ECDSA, returning `r ‖ s ‖ v`.
pub fn ecdsa_sign_recoverable(
    secret_key: &SecretKey,
    digest: &[u8; 32],
) -> [u8; RECOVERABLE_SIGNATURE_SIZE] {
    let message = Message::from_digest(*digest);
    let signature = SECP256K1_CONTEXT.sign_ecdsa_recoverable(&message, secret_key);
    let (recovery_id, compact) = signature.serialize_compact();

    let mut out = [0u8; RECOVERABLE_SIGNATURE_SIZE];
    out[..64].copy_from_slice(&compact);
    out[64] = recovery_id.to_i32() as u8;
    out
}

/// Recovers the signing public key from a recoverable signature.
pub fn recover_public_key(
    digest: &[u8; 32],
    signature_bytes: &[u8],
) -> Result<PublicKey, WalletError> {
    if signature_bytes.len() != RECOVERABLE_SIGNATURE_SIZE {
        return Err(WalletError::CryptoError(format!(
            "Signature must be exactly {} bytes, got {}",
            RECOVERABLE_SIGNATURE_SIZE,
            signature_bytes.len()
        )));
    }
    let recovery_id = RecoveryId::from_i32(i32::from(signature_bytes[64]))
        .map_err(|e| WalletError::CryptoError(format!("Invalid recovery id: {}", e)))?;
    let signature = RecoverableSignature::from_compact(&signature_bytes[..64], recovery_id)
        .map_err(|e| WalletError::CryptoError(format!("Invalid signature: {}", e)))?;
    let message = Message::from_digest(*digest);

    SECP256K1_CONTEXT
        .recover_ecdsa(&message, &signature)
        .map_err(|_| WalletError::CryptoError("Signature recovery failed".to_string()))
}

/// Recovers the address that produced a recoverable signature.
pub fn recover_address(digest: &[u8; 32], signature_bytes: &[u8]) -> Result<Address, WalletError> {
    recover_public_key(digest, signature_bytes).map(|pk| Address::from_public_key(&pk))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_keccak_empty() {
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_schnorr_round_trip() {
        let secret_key = SecretKey::new(&mut OsRng);
        let public_key = public_key_from_secret(&secret_key);
        let digest = sha256(b"Hello, Qi!");

        let signature = schnorr_sign(&secret_key, &digest);
        assert!(schnorr_verify(&public_key, &digest, &signature).is_ok());
    }

    #[test]
    fn test_schnorr_wrong_key() {
        let signer = SecretKey::new(&mut OsRng);
        let other = public_key_from_secret(&SecretKey::new(&mut OsRng));
        let digest = sha256(b"Test message");

        let signature = schnorr_sign(&signer, &digest);
        let result = schnorr_verify(&other, &digest, &signature);
        assert_eq!(
            result.unwrap_err().to_string(),
            "Cryptographic error: Signature verification failed"
        );
    }

    #[test]
    fn test_schnorr_length_check() {
        let secret_key = SecretKey::new(&mut OsRng);
        let public_key = public_key_from_secret(&secret_key);
        let digest = sha256(b"Test");
        let signature = schnorr_sign(&secret_key, &digest);

        let result = schnorr_verify(&public_key, &digest, &signature[1..]);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Signature must be exactly"));
    }

    #[test]
    fn test_ecdsa_recovery() {
        let secret_key = SecretKey::new(&mut OsRng);
        let public_key = public_key_from_secret(&secret_key);
        let digest = hash_message(b"hello");

        let signature = ecdsa_sign_recoverable(&secret_key, &digest);
        let recovered = recover_public_key(&digest, &signature).unwrap();
        assert_eq!(recovered, public_key);
        assert_eq!(
            recover_address(&digest, &signature).unwrap(),
            Address::from_public_key(&public_key)
        );
    }

    #[test]
    fn test_tagged_hash_differs_by_tag() {
        assert_ne!(
            tagged_hash("KeyAgg list", &[b"abc"]),
            tagged_hash("KeyAgg coefficient", &[b"abc"])
        );
    }

    #[test]
    fn test_typed_data_digest_depends_on_both_hashes() {
        let a = TypedDataDigest {
            domain_separator: [1u8; 32],
            struct_hash: [2u8; 32],
        };
        let b = TypedDataDigest {
            domain_separator: [1u8; 32],
            struct_hash: [3u8; 32],
        };
        assert_ne!(a.digest(), b.digest());
    }
}
