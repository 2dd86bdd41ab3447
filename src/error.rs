//! Error types for quaiwallet

use thiserror::Error;

/// Broad class of a [`WalletError`].
///
/// Argument errors are raised before any mutation. State errors leave the
/// wallet unchanged. Network errors are only retried while waiting for shard
/// readiness. Decode errors are fatal for the decode call that raised them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Argument,
    State,
    Network,
    Decode,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WalletError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Invalid derivation path: {0}")]
    InvalidPath(String),
    #[error("Invalid zone: {0}")]
    InvalidZone(String),
    #[error("Unsupported coin type: {0}")]
    InvalidCoinType(String),

    #[error("Address already exists: {0}")]
    AddressExists(String),
    #[error("Address not found: {0}")]
    AddressNotFound(String),
    #[error("Mismatch: {0}")]
    Mismatch(String),
    #[error(
        "Insufficient funds: short by {shortfall} (required {required}, available {available})"
    )]
    InsufficientFunds {
        required: u64,
        available: u64,
        shortfall: u64,
    },
    #[error("No owning key for input: {0}")]
    MissingKey(String),
    #[error("Address search exhausted for zone {zone} after {attempts} attempts")]
    SearchExhausted { zone: String, attempts: u32 },
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),
    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    #[error("Timed out waiting for shard {0} to become ready")]
    Timeout(String),
    #[error("Channel closed: {0}")]
    ChannelClosed(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("No provider connected")]
    NoProvider,

    #[error("Decode error: {0}")]
    DecodeError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Config error: {0}")]
    ConfigError(String),
}

impl WalletError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WalletError::InvalidArgument(_)
            | WalletError::InvalidPath(_)
            | WalletError::InvalidZone(_)
            | WalletError::InvalidCoinType(_) => ErrorKind::Argument,
            WalletError::AddressExists(_)
            | WalletError::AddressNotFound(_)
            | WalletError::Mismatch(_)
            | WalletError::InsufficientFunds { .. }
            | WalletError::MissingKey(_)
            | WalletError::SearchExhausted { .. }
            | WalletError::TransactionFailed(_)
            | WalletError::CryptoError(_) => ErrorKind::State,
            WalletError::Timeout(_)
            | WalletError::ChannelClosed(_)
            | WalletError::NetworkError(_)
            | WalletError::NoProvider => ErrorKind::Network,
            WalletError::DecodeError(_)
            | WalletError::SerializationError(_)
            | WalletError::IoError(_)
            | WalletError::ConfigError(_) => ErrorKind::Decode,
        }
    }
}

impl From<std::io::Error> for WalletError {
    fn from(err: std::io::Error) -> Self {
        WalletError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(err: serde_json::Error) -> Self {
        WalletError::SerializationError(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for WalletError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        WalletError::SerializationError(err.to_string())
    }
}

impl From<secp256k1::Error> for WalletError {
    fn from(err: secp256k1::Error) -> Self {
        WalletError::CryptoError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, WalletError>;
