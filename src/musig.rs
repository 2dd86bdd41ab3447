//! MuSig2 multi-signatures (BIP-327) over secp256k1
//!
//! Produces a single BIP-340 signature that verifies against the x-only
//! aggregate of the signers' public keys. Key tweaking is not supported.

use crate::crypto::{self, has_even_y, tagged_hash, x_bytes, SECP256K1_CONTEXT};
use crate::error::WalletError;
use rand::rngs::OsRng;
use secp256k1::{PublicKey, Scalar, SecretKey, XOnlyPublicKey};

const TAG_KEYAGG_LIST: &str = "KeyAgg list";
const TAG_KEYAGG_COEF: &str = "KeyAgg coefficient";
const TAG_NONCE_COEF: &str = "MuSig/noncecoef";
const TAG_CHALLENGE: &str = "BIP0340/challenge";

fn scalar_from_hash(hash: [u8; 32]) -> Result<Scalar, WalletError> {
    Scalar::from_be_bytes(hash)
        .map_err(|_| WalletError::CryptoError("Hash output exceeds curve order".to_string()))
}

fn combine(points: &[PublicKey]) -> Result<PublicKey, WalletError> {
    let refs: Vec<&PublicKey> = points.iter().collect();
    PublicKey::combine_keys(&refs)
        .map_err(|e| WalletError::CryptoError(format!("Point aggregation failed: {}", e)))
}

/// Ordered set of signer keys and their aggregation coefficients.
#[derive(Debug, Clone)]
pub struct KeyAggContext {
    pubkeys: Vec<PublicKey>,
    coefficients: Vec<Scalar>,
    aggregated: PublicKey,
}

impl KeyAggContext {
    pub fn new(pubkeys: Vec<PublicKey>) -> Result<Self, WalletError> {
        if pubkeys.is_empty() {
            return Err(WalletError::InvalidArgument(
                "Key aggregation needs at least one key".to_string(),
            ));
        }

        let serialized: Vec<[u8; 33]> = pubkeys.iter().map(|pk| pk.serialize()).collect();
        let list: Vec<&[u8]> = serialized.iter().map(|s| s.as_slice()).collect();
        let list_hash = tagged_hash(TAG_KEYAGG_LIST, &list);
        let second = serialized.iter().find(|pk| **pk != serialized[0]).copied();

        let mut coefficients = Vec::with_capacity(pubkeys.len());
        let mut weighted = Vec::with_capacity(pubkeys.len());
        for (pk, bytes) in pubkeys.iter().zip(serialized.iter()) {
            let coefficient = if Some(*bytes) == second {
                Scalar::ONE
            } else {
                scalar_from_hash(tagged_hash(TAG_KEYAGG_COEF, &[&list_hash, bytes]))?
            };
            weighted.push(pk.mul_tweak(&SECP256K1_CONTEXT, &coefficient)?);
            coefficients.push(coefficient);
        }

        Ok(KeyAggContext {
            pubkeys,
            coefficients,
            aggregated: combine(&weighted)?,
        })
    }

    pub fn aggregated_pubkey(&self) -> PublicKey {
        self.aggregated
    }

    pub fn x_only_pubkey(&self) -> XOnlyPublicKey {
        self.aggregated.x_only_public_key().0
    }

    pub fn pubkeys(&self) -> &[PublicKey] {
        &self.pubkeys
    }

    fn position(&self, pubkey: &PublicKey) -> Result<usize, WalletError> {
        self.pubkeys
            .iter()
            .position(|pk| pk == pubkey)
            .ok_or_else(|| WalletError::InvalidArgument("Signer is not part of the key set".to_string()))
    }
}

/// Secret nonce pair. Consumed by [`sign_partial`] so it cannot be reused.
pub struct SecNonce {
    k1: SecretKey,
    k2: SecretKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubNonce {
    r1: PublicKey,
    r2: PublicKey,
}

impl PubNonce {
    pub fn serialize(&self) -> [u8; 66] {
        let mut out = [0u8; 66];
        out[..33].copy_from_slice(&self.r1.serialize());
        out[33..].copy_from_slice(&self.r2.serialize());
        out
    }
}

/// Sum of all signers' public nonces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggNonce(PubNonce);

pub fn generate_nonce() -> (SecNonce, PubNonce) {
    let k1 = SecretKey::new(&mut OsRng);
    let k2 = SecretKey::new(&mut OsRng);
    let public = PubNonce {
        r1: crypto::public_key_from_secret(&k1),
        r2: crypto::public_key_from_secret(&k2),
    };
    (SecNonce { k1, k2 }, public)
}

pub fn aggregate_nonces(nonces: &[PubNonce]) -> Result<AggNonce, WalletError> {
    if nonces.is_empty() {
        return Err(WalletError::InvalidArgument("No nonces to aggregate".to_string()));
    }
    let r1: Vec<PublicKey> = nonces.iter().map(|n| n.r1).collect();
    let r2: Vec<PublicKey> = nonces.iter().map(|n| n.r2).collect();
    Ok(AggNonce(PubNonce {
        r1: combine(&r1)?,
        r2: combine(&r2)?,
    }))
}

/// Per-session values shared by signing and verification.
struct Session {
    b: Scalar,
    r: PublicKey,
    e: Scalar,
}

impl Session {
    fn new(ctx: &KeyAggContext, agg_nonce: &AggNonce, message: &[u8; 32]) -> Result<Self, WalletError> {
        let q_x = x_bytes(&ctx.aggregated);
        let b = scalar_from_hash(tagged_hash(
            TAG_NONCE_COEF,
            &[&agg_nonce.0.serialize(), &q_x, message],
        ))?;
        let r2b = agg_nonce.0.r2.mul_tweak(&SECP256K1_CONTEXT, &b)?;
        let r = agg_nonce.0.r1.combine(&r2b)?;
        let e = scalar_from_hash(tagged_hash(TAG_CHALLENGE, &[&x_bytes(&r), &q_x, message]))?;
        Ok(Session { b, r, e })
    }
}

/// A signer's share: `k1 + b·k2 + e·a·g·d` (nonces negated when R has odd y).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartialSignature(SecretKey);

pub fn sign_partial(
    ctx: &KeyAggContext,
    secret_key: &SecretKey,
    sec_nonce: SecNonce,
    agg_nonce: &AggNonce,
    message: &[u8; 32],
) -> Result<PartialSignature, WalletError> {
    let session = Session::new(ctx, agg_nonce, message)?;
    let public_key = crypto::public_key_from_secret(secret_key);
    let coefficient = ctx.coefficients[ctx.position(&public_key)?];

    let (k1, k2) = if has_even_y(&session.r) {
        (sec_nonce.k1, sec_nonce.k2)
    } else {
        (sec_nonce.k1.negate(), sec_nonce.k2.negate())
    };
    let d = if has_even_y(&ctx.aggregated) {
        *secret_key
    } else {
        secret_key.negate()
    };

    let nonce_part = k2.mul_tweak(&session.b)?;
    let key_part = d.mul_tweak(&coefficient)?.mul_tweak(&session.e)?;
    let s = k1
        .add_tweak(&Scalar::from(nonce_part))?
        .add_tweak(&Scalar::from(key_part))?;
    Ok(PartialSignature(s))
}

/// Checks `s·G == R1 + b·R2 (negated for odd R) + e·a·g·P` for one signer.
pub fn verify_partial(
    ctx: &KeyAggContext,
    partial: &PartialSignature,
    pub_nonce: &PubNonce,
    signer: &PublicKey,
    agg_nonce: &AggNonce,
    message: &[u8; 32],
) -> Result<(), WalletError> {
    let session = Session::new(ctx, agg_nonce, message)?;
    let coefficient = ctx.coefficients[ctx.position(signer)?];

    let mut effective_nonce = pub_nonce
        .r1
        .combine(&pub_nonce.r2.mul_tweak(&SECP256K1_CONTEXT, &session.b)?)?;
    if !has_even_y(&session.r) {
        effective_nonce = effective_nonce.negate(&SECP256K1_CONTEXT);
    }
    let mut key = *signer;
    if !has_even_y(&ctx.aggregated) {
        key = key.negate(&SECP256K1_CONTEXT);
    }
    let key_term = key
        .mul_tweak(&SECP256K1_CONTEXT, &coefficient)?
        .mul_tweak(&SECP256K1_CONTEXT, &session.e)?;

    let expected = effective_nonce.combine(&key_term)?;
    if crypto::public_key_from_secret(&partial.0) != expected {
        return Err(WalletError::CryptoError(
            "Partial signature verification failed".to_string(),
        ));
    }
    Ok(())
}

/// Sums partial signatures into a 64-byte BIP-340 signature.
pub fn aggregate_partial_signatures(
    ctx: &KeyAggContext,
    agg_nonce: &AggNonce,
    partials: &[PartialSignature],
    message: &[u8; 32],
) -> Result<[u8; 64], WalletError> {
    let session = Session::new(ctx, agg_nonce, message)?;
    let (first, rest) = partials
        .split_first()
        .ok_or_else(|| WalletError::InvalidArgument("No partial signatures".to_string()))?;
    let s = rest
        .iter()
        .try_fold(first.0, |acc, partial| acc.add_tweak(&Scalar::from(partial.0)))?;

    let mut signature = [0u8; 64];
    signature[..32].copy_from_slice(&x_bytes(&session.r));
    signature[32..].copy_from_slice(&s.secret_bytes());
    Ok(signature)
}

/// Runs both MuSig2 rounds for keys held by a single party.
///
/// Returns the aggregate signature and the x-only key it verifies against.
pub fn sign_local(
    secret_keys: &[SecretKey],
    message: &[u8; 32],
) -> Result<([u8; 64], XOnlyPublicKey), WalletError> {
    let pubkeys: Vec<PublicKey> = secret_keys.iter().map(crypto::public_key_from_secret).collect();
    let ctx = KeyAggContext::new(pubkeys.clone())?;

    let (sec_nonces, pub_nonces): (Vec<SecNonce>, Vec<PubNonce>) =
        secret_keys.iter().map(|_| generate_nonce()).unzip();
    let agg_nonce = aggregate_nonces(&pub_nonces)?;

    let mut partials = Vec::with_capacity(secret_keys.len());
    for (i, (secret_key, sec_nonce)) in secret_keys.iter().zip(sec_nonces).enumerate() {
        let partial = sign_partial(&ctx, secret_key, sec_nonce, &agg_nonce, message)?;
        verify_partial(&ctx, &partial, &pub_nonces[i], &pubkeys[i], &agg_nonce, message)?;
        partials.push(partial);
    }

    let signature = aggregate_partial_signatures(&ctx, &agg_nonce, &partials, message)?;
    crypto::verify_x_only(&ctx.x_only_pubkey(), message, &signature)?;
    Ok((signature, ctx.x_only_pubkey()))
}

/// Verifies an aggregate signature against the aggregate of `pubkeys`.
pub fn verify(pubkeys: Vec<PublicKey>, message: &[u8; 32], signature: &[u8]) -> Result<(), WalletError> {
    let ctx = KeyAggContext::new(pubkeys)?;
    crypto::verify_x_only(&ctx.x_only_pubkey(), message, signature)
}
