//! Transaction module split into shared types and the two ledger formats

pub mod qi;
pub mod quai;
pub mod types;

pub use qi::{QiTransaction, TxInput, TxOutput};
pub use quai::{QuaiTransactionRequest, SignedQuaiTransaction};
pub use types::*;
