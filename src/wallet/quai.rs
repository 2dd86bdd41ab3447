//! Account-ledger wallet
//!
//! A thin signer over the HD core: the owner of a `from` address is looked up
//! in the address map and its re-derived key signs.

use super::address_map::NeuteredAddressInfo;
use super::hd::{self, HdCore, SerializedHdWallet};
use crate::address::Address;
use crate::crypto::{self, TypedDataDigest};
use crate::error::WalletError;
use crate::hdnode::CoinType;
use crate::provider::{Ledger, TxStatus};
use crate::transaction::{QuaiTransactionRequest, SignedQuaiTransaction, TxHash};
use crate::zone::{self, Zone};
use bip39::Mnemonic;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub struct QuaiHdWallet {
    core: HdCore,
    ledger: Option<Arc<dyn Ledger>>,
}

impl QuaiHdWallet {
    pub const COIN_TYPE: CoinType = CoinType::Quai;

    pub fn create_random() -> Result<Self, WalletError> {
        Self::from_mnemonic(&hd::random_mnemonic()?)
    }

    pub fn from_mnemonic(mnemonic: &Mnemonic) -> Result<Self, WalletError> {
        Ok(QuaiHdWallet {
            core: HdCore::from_mnemonic(mnemonic, Self::COIN_TYPE)?,
            ledger: None,
        })
    }

    pub fn from_phrase(phrase: &str) -> Result<Self, WalletError> {
        Self::from_mnemonic(&hd::parse_mnemonic(phrase)?)
    }

    pub fn connect(&mut self, ledger: Arc<dyn Ledger>) {
        self.ledger = Some(ledger);
    }

    pub fn disconnect(&mut self) {
        self.ledger = None;
    }

    pub fn is_connected(&self) -> bool {
        self.ledger.is_some()
    }

    pub fn core(&self) -> &HdCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut HdCore {
        &mut self.core
    }

    pub fn get_next_address(&self, account: u32, zone: Zone) -> Result<NeuteredAddressInfo, WalletError> {
        self.core.get_next_address(account, zone)
    }

    pub fn add_address(&self, account: u32, index: u32) -> Result<NeuteredAddressInfo, WalletError> {
        self.core.add_address(account, index, false)
    }

    pub fn get_address_info(&self, address: &Address) -> Option<NeuteredAddressInfo> {
        self.core.get_address_info(address)
    }

    pub fn get_addresses_for_zone(&self, zone: Zone) -> Vec<NeuteredAddressInfo> {
        self.core.get_addresses_for_zone(zone)
    }

    pub fn get_addresses_for_account(&self, account: u32) -> Vec<NeuteredAddressInfo> {
        self.core.get_addresses_for_account(account)
    }

    pub fn sign_transaction(
        &self,
        request: &QuaiTransactionRequest,
    ) -> Result<SignedQuaiTransaction, WalletError> {
        let node = self.core.private_node_for(&request.from)?;
        let signature = node.sign_digest(&request.signing_digest()?)?;
        Ok(SignedQuaiTransaction {
            request: request.clone(),
            signature: signature.to_vec(),
        })
    }

    /// Signs, broadcasts to the sender's zone and waits for inclusion.
    pub async fn send_transaction(
        &self,
        request: &QuaiTransactionRequest,
    ) -> Result<TxHash, WalletError> {
        let ledger = self.ledger.as_ref().ok_or(WalletError::NoProvider)?;
        let zone = zone::zone_from_address(&request.from)?;
        let signed = self.sign_transaction(request)?;

        let hash = ledger.broadcast_transaction(zone, signed.raw()?).await?;
        info!(zone = %zone, %hash, "broadcast quai transaction");
        match ledger.wait_for_transaction(zone, hash).await? {
            TxStatus::Confirmed => Ok(hash),
            TxStatus::Failed(reason) => {
                warn!(%hash, "quai transaction failed: {}", reason);
                Err(WalletError::TransactionFailed(reason))
            }
        }
    }

    /// Recoverable signature over the prefixed message hash.
    pub fn sign_message(&self, address: &Address, message: &[u8]) -> Result<[u8; 65], WalletError> {
        let node = self.core.private_node_for(address)?;
        node.sign_digest(&crypto::hash_message(message))
    }

    pub fn sign_typed_data(
        &self,
        address: &Address,
        typed: &TypedDataDigest,
    ) -> Result<[u8; 65], WalletError> {
        let node = self.core.private_node_for(address)?;
        node.sign_digest(&typed.digest())
    }

    pub fn xpub(&self, account: u32) -> Result<String, WalletError> {
        self.core.xpub(account)
    }

    pub fn serialize(&self) -> Result<SerializedHdWallet, WalletError> {
        self.core.to_serialized()
    }

    pub fn deserialize(serialized: &SerializedHdWallet) -> Result<Self, WalletError> {
        Ok(QuaiHdWallet {
            core: HdCore::from_serialized(serialized, Self::COIN_TYPE)?,
            ledger: None,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), WalletError> {
        let json = serde_json::to_string_pretty(&self.serialize()?)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, WalletError> {
        let contents = fs::read_to_string(path)?;
        let serialized: SerializedHdWallet = serde_json::from_str(&contents)?;
        Self::deserialize(&serialized)
    }
}

impl std::fmt::Debug for QuaiHdWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuaiHdWallet")
            .field("core", &self.core)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHRASE: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn test_sign_transaction_recovers_sender() {
        let wallet = QuaiHdWallet::from_phrase(PHRASE).unwrap();
        let from = wallet.get_next_address(0, Zone::Cyprus1).unwrap().address;
        let request = QuaiTransactionRequest::new(9000, 0, from, Some(Address::from_bytes([1; 20])), 42);
        let signed = wallet.sign_transaction(&request).unwrap();
        assert!(signed.verify().is_ok());
    }

    #[test]
    fn test_unknown_sender_rejected() {
        let wallet = QuaiHdWallet::from_phrase(PHRASE).unwrap();
        let request = QuaiTransactionRequest::new(9000, 0, Address::from_bytes([3; 20]), None, 1);
        assert!(matches!(
            wallet.sign_transaction(&request),
            Err(WalletError::AddressNotFound(_))
        ));
    }

    #[test]
    fn test_sign_message_recovers() {
        let wallet = QuaiHdWallet::from_phrase(PHRASE).unwrap();
        let address = wallet.get_next_address(0, Zone::Paxos1).unwrap().address;
        let signature = wallet.sign_message(&address, b"hello quai").unwrap();
        let recovered = crypto::recover_address(&crypto::hash_message(b"hello quai"), &signature).unwrap();
        assert_eq!(recovered, address);

        let typed = TypedDataDigest {
            domain_separator: [1; 32],
            struct_hash: [2; 32],
        };
        let signature = wallet.sign_typed_data(&address, &typed).unwrap();
        assert_eq!(crypto::recover_address(&typed.digest(), &signature).unwrap(), address);
    }

    #[tokio::test]
    async fn test_send_requires_provider() {
        let wallet = QuaiHdWallet::from_phrase(PHRASE).unwrap();
        let from = wallet.get_next_address(0, Zone::Cyprus1).unwrap().address;
        let request = QuaiTransactionRequest::new(9000, 0, from, None, 1);
        assert_eq!(
            wallet.send_transaction(&request).await.unwrap_err(),
            WalletError::NoProvider
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("quai.json");
        let wallet = QuaiHdWallet::from_phrase(PHRASE).unwrap();
        wallet.get_next_address(0, Zone::Cyprus1).unwrap();
        wallet.save(&path).unwrap();

        let loaded = QuaiHdWallet::load(&path).unwrap();
        assert_eq!(
            loaded.get_addresses_for_zone(Zone::Cyprus1),
            wallet.get_addresses_for_zone(Zone::Cyprus1)
        );
    }
}
