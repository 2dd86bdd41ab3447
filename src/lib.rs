//! quaiwallet - HD wallets for the Quai (account) and Qi (UTXO) ledgers
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Keys & Derivation
//! - [`hdnode`] - BIP-32 nodes, derivation paths and extended keys
//! - [`crypto`] - Hashing, Schnorr and recoverable ECDSA (secp256k1)
//! - [`musig`] - MuSig2 key and signature aggregation
//!
//! ## Network Topology
//! - [`address`] - 20-byte addresses with checksummed display
//! - [`zone`] - Regions, zones and shards; address classification
//!
//! ## Transactions
//! - [`denomination`] - Qi denomination tiers
//! - [`transaction`] - Quai and Qi transaction formats
//!
//! ## Wallets
//! - [`wallet`] - Quai and Qi HD wallets, outpoints and payment codes
//! - [`provider`] - Ledger collaborator consumed by the wallets
//!
//! ## Networking
//! - [`network`] - Per-shard connections and the JSON-RPC ledger
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Keys & Derivation
// ============================================================================
pub mod crypto;
pub mod hdnode;
pub mod musig;

// ============================================================================
// Network Topology
// ============================================================================
pub mod address;
pub mod zone;

// ============================================================================
// Transactions
// ============================================================================
pub mod denomination;
pub mod transaction;

// ============================================================================
// Wallets
// ============================================================================
pub mod provider;
pub mod wallet;

// ============================================================================
// Networking
// ============================================================================
pub mod network;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;

pub use address::Address;
pub use error::{ErrorKind, Result, WalletError};
pub use hdnode::HDNode;
pub use wallet::{HdWallet, QiHdWallet, QuaiHdWallet};
pub use zone::{Shard, Zone};
