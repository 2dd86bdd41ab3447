//! Qi denomination tiers
//!
//! Qi outputs only carry standard amounts so that change is never a unique,
//! linkable value. Amounts are expressed in qits.

use crate::error::WalletError;

/// Denomination values in qits, indexed by the denomination byte of an output.
pub const DENOMINATIONS: [u64; 17] = [
    1,
    5,
    10,
    50,
    100,
    250,
    500,
    1_000,
    5_000,
    10_000,
    20_000,
    50_000,
    100_000,
    1_000_000,
    10_000_000,
    100_000_000,
    1_000_000_000,
];

pub const MAX_DENOMINATION: u8 = (DENOMINATIONS.len() - 1) as u8;

pub fn value(denomination: u8) -> Result<u64, WalletError> {
    DENOMINATIONS
        .get(usize::from(denomination))
        .copied()
        .ok_or_else(|| {
            WalletError::InvalidArgument(format!("Unknown denomination index {}", denomination))
        })
}

/// Splits `amount` into denomination indices, largest first.
pub fn denominate(amount: u64) -> Vec<u8> {
    let mut remaining = amount;
    let mut out = Vec::new();
    for (index, tier) in DENOMINATIONS.iter().enumerate().rev() {
        while remaining >= *tier {
            out.push(index as u8);
            remaining -= tier;
        }
    }
    out
}

pub fn total(denominations: &[u8]) -> Result<u64, WalletError> {
    denominations.iter().try_fold(0u64, |acc, d| {
        acc.checked_add(value(*d)?)
            .ok_or_else(|| WalletError::InvalidArgument("Denomination total overflows".to_string()))
    })
}
