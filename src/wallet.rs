//! HD wallets for the two ledgers
//!
//! [`HdWallet`] picks the flavour once, from the coin type of a derivation
//! path or of a serialized wallet.

pub mod address_map;
pub mod hd;
pub mod outpoints;
pub mod payment_code;
pub mod qi;
pub mod quai;

pub use address_map::{AddressMap, NeuteredAddressInfo};
pub use hd::{HdCore, SerializedAddress, SerializedHdWallet, WALLET_VERSION};
pub use outpoints::{OutpointLease, OutpointPool};
pub use payment_code::{PaymentChannel, PaymentCode, SerializedChannel};
pub use qi::{QiHdWallet, ScanSummary};
pub use quai::QuaiHdWallet;

use crate::address::Address;
use crate::error::WalletError;
use crate::hdnode::CoinType;
use crate::provider::Ledger;
use crate::zone::Zone;
use std::fs;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug)]
pub enum HdWallet {
    Quai(QuaiHdWallet),
    Qi(QiHdWallet),
}

impl HdWallet {
    /// Builds the wallet matching the coin type of `path`
    /// (`m/44'/994'...` or `m/44'/969'...`).
    pub fn from_phrase(phrase: &str, path: &str) -> Result<Self, WalletError> {
        match CoinType::from_path(path)? {
            CoinType::Quai => Ok(HdWallet::Quai(QuaiHdWallet::from_phrase(phrase)?)),
            CoinType::Qi => Ok(HdWallet::Qi(QiHdWallet::from_phrase(phrase)?)),
        }
    }

    pub fn create_random(coin_type: CoinType) -> Result<Self, WalletError> {
        match coin_type {
            CoinType::Quai => Ok(HdWallet::Quai(QuaiHdWallet::create_random()?)),
            CoinType::Qi => Ok(HdWallet::Qi(QiHdWallet::create_random()?)),
        }
    }

    pub fn deserialize(serialized: &SerializedHdWallet) -> Result<Self, WalletError> {
        match CoinType::from_value(serialized.coin_type)? {
            CoinType::Quai => Ok(HdWallet::Quai(QuaiHdWallet::deserialize(serialized)?)),
            CoinType::Qi => Ok(HdWallet::Qi(QiHdWallet::deserialize(serialized)?)),
        }
    }

    pub fn load(path: &Path) -> Result<Self, WalletError> {
        let contents = fs::read_to_string(path)?;
        let serialized: SerializedHdWallet = serde_json::from_str(&contents)?;
        Self::deserialize(&serialized)
    }

    pub fn save(&self, path: &Path) -> Result<(), WalletError> {
        match self {
            HdWallet::Quai(wallet) => wallet.save(path),
            HdWallet::Qi(wallet) => wallet.save(path),
        }
    }

    pub fn serialize(&self) -> Result<SerializedHdWallet, WalletError> {
        match self {
            HdWallet::Quai(wallet) => wallet.serialize(),
            HdWallet::Qi(wallet) => wallet.serialize(),
        }
    }

    pub fn core(&self) -> &HdCore {
        match self {
            HdWallet::Quai(wallet) => wallet.core(),
            HdWallet::Qi(wallet) => wallet.core(),
        }
    }

    pub fn coin_type(&self) -> CoinType {
        self.core().coin_type()
    }

    pub fn connect(&mut self, ledger: Arc<dyn Ledger>) {
        match self {
            HdWallet::Quai(wallet) => wallet.connect(ledger),
            HdWallet::Qi(wallet) => wallet.connect(ledger),
        }
    }

    pub fn get_next_address(&self, account: u32, zone: Zone) -> Result<NeuteredAddressInfo, WalletError> {
        self.core().get_next_address(account, zone)
    }

    pub fn get_address_info(&self, address: &Address) -> Option<NeuteredAddressInfo> {
        self.core().get_address_info(address)
    }

    pub fn xpub(&self, account: u32) -> Result<String, WalletError> {
        self.core().xpub(account)
    }

    pub fn as_quai(&self) -> Option<&QuaiHdWallet> {
        match self {
            HdWallet::Quai(wallet) => Some(wallet),
            HdWallet::Qi(_) => None,
        }
    }

    pub fn as_qi(&self) -> Option<&QiHdWallet> {
        match self {
            HdWallet::Qi(wallet) => Some(wallet),
            HdWallet::Quai(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHRASE: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn test_dispatch_from_path() {
        let quai = HdWallet::from_phrase(PHRASE, "m/44'/994'/0'/0").unwrap();
        assert!(quai.as_quai().is_some());
        let qi = HdWallet::from_phrase(PHRASE, "m/44'/969'/0'/0").unwrap();
        assert_eq!(qi.coin_type(), CoinType::Qi);
        assert!(matches!(
            HdWallet::from_phrase(PHRASE, "m/44'/60'/0'/0"),
            Err(WalletError::InvalidCoinType(_))
        ));
        assert!(matches!(
            HdWallet::from_phrase(PHRASE, "m/44/994'/0'"),
            Err(WalletError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_dispatch_from_serialized() {
        let qi = HdWallet::from_phrase(PHRASE, "m/44'/969'/0'/0").unwrap();
        qi.get_next_address(0, Zone::Cyprus1).unwrap();
        let restored = HdWallet::deserialize(&qi.serialize().unwrap()).unwrap();
        assert!(restored.as_qi().is_some());
        assert_eq!(restored.core().address_map().len(), 1);

        let mut unknown = qi.serialize().unwrap();
        unknown.coin_type = 1;
        assert!(HdWallet::deserialize(&unknown).is_err());
    }
}
