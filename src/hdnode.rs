//! Hierarchical deterministic key derivation (BIP-32)
//!
//! Split into path parsing, node derivation and extended key encoding.

pub mod extended;
pub mod node;
pub mod path;

pub use extended::{EXTENDED_KEY_LENGTH, XPRV_VERSION, XPUB_VERSION};
pub use node::HDNode;
pub use path::{ChildIndex, CoinType, DerivationPath, HARDENED_OFFSET};
