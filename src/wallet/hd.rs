//! Shared core of the Quai and Qi wallets
//!
//! Owns the master node, the coin root and the address map, and implements
//! the zone-aware address search both wallet flavours build on.

use super::address_map::{AddressMap, NeuteredAddressInfo};
use super::payment_code::SerializedChannel;
use crate::address::Address;
use crate::error::WalletError;
use crate::hdnode::{CoinType, DerivationPath, HDNode, HARDENED_OFFSET};
use crate::transaction::OutpointInfo;
use crate::zone::{self, Ledger, Zone};
use bip39::Mnemonic;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Version written into serialized wallets.
pub const WALLET_VERSION: u32 = 1;
/// Default upper bound on indices tried while searching for a zone address.
pub const DEFAULT_MAX_ADDRESS_ATTEMPTS: u32 = 10_000;

/// One entry of the `addresses` array of a serialized wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedAddress {
    pub account: u32,
    pub index: u32,
    #[serde(default)]
    pub change: bool,
    pub address: Address,
    pub pub_key: String,
    pub zone: Zone,
}

impl From<&NeuteredAddressInfo> for SerializedAddress {
    fn from(info: &NeuteredAddressInfo) -> Self {
        SerializedAddress {
            account: info.account,
            index: info.index,
            change: info.change,
            address: info.address,
            pub_key: info.pub_key.clone(),
            zone: info.zone,
        }
    }
}

/// Serialized wallet: `{ version, coinType, phrase, addresses, outpoints? }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedHdWallet {
    pub version: u32,
    pub coin_type: u32,
    pub phrase: String,
    pub addresses: Vec<SerializedAddress>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outpoints: Vec<OutpointInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<SerializedChannel>,
}

/// Tries `start`, `start+1`, ... below the hardened range and returns the
/// first index for which `probe` yields a value, giving up after
/// `max_attempts` candidates.
pub fn search_indices<T, F>(
    start: u32,
    max_attempts: u32,
    mut probe: F,
) -> Result<Option<(u32, T)>, WalletError>
where
    F: FnMut(u32) -> Result<Option<T>, WalletError>,
{
    for offset in 0..max_attempts {
        let index = match start.checked_add(offset) {
            Some(index) if index < HARDENED_OFFSET => index,
            _ => break,
        };
        if let Some(found) = probe(index)? {
            return Ok(Some((index, found)));
        }
    }
    Ok(None)
}

/// Walks `chain/start`, `chain/start+1`, ... and returns the first child
/// accepted by `predicate`.
pub fn search_chain<F>(
    chain: &HDNode,
    start: u32,
    max_attempts: u32,
    mut predicate: F,
) -> Result<Option<(u32, HDNode)>, WalletError>
where
    F: FnMut(&HDNode) -> bool,
{
    search_indices(start, max_attempts, |index| {
        let child = chain.derive_child(index)?;
        Ok(predicate(&child).then_some(child))
    })
}

pub(crate) fn pub_key_hex(node: &HDNode) -> String {
    format!("0x{}", hex::encode(node.public_key_bytes()))
}

pub(crate) fn random_mnemonic() -> Result<Mnemonic, WalletError> {
    let mut entropy = [0u8; 16];
    OsRng.fill_bytes(&mut entropy);
    Mnemonic::from_entropy(&entropy)
        .map_err(|e| WalletError::CryptoError(format!("Failed to create mnemonic: {}", e)))
}

pub(crate) fn parse_mnemonic(phrase: &str) -> Result<Mnemonic, WalletError> {
    Mnemonic::parse_normalized(phrase)
        .map_err(|e| WalletError::InvalidArgument(format!("Invalid mnemonic: {}", e)))
}

type ChainKey = (u32, bool, Zone);

pub struct HdCore {
    root: HDNode,
    coin_type: CoinType,
    addresses: AddressMap,
    max_address_attempts: u32,
    /// Serialises search-then-register on each (account, change, zone) chain
    chain_locks: Mutex<HashMap<ChainKey, Arc<Mutex<()>>>>,
}

impl HdCore {
    pub fn from_mnemonic(mnemonic: &Mnemonic, coin_type: CoinType) -> Result<Self, WalletError> {
        let root = HDNode::from_mnemonic(mnemonic, "", None)?;
        Ok(HdCore {
            root,
            coin_type,
            addresses: AddressMap::new(),
            max_address_attempts: DEFAULT_MAX_ADDRESS_ATTEMPTS,
            chain_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn coin_type(&self) -> CoinType {
        self.coin_type
    }

    /// Ledger whose addresses this wallet derives.
    pub fn ledger(&self) -> Ledger {
        match self.coin_type {
            CoinType::Quai => Ledger::Quai,
            CoinType::Qi => Ledger::Qi,
        }
    }

    pub(crate) fn root(&self) -> &HDNode {
        &self.root
    }

    pub fn address_map(&self) -> &AddressMap {
        &self.addresses
    }

    pub fn max_address_attempts(&self) -> u32 {
        self.max_address_attempts
    }

    pub fn set_max_address_attempts(&mut self, attempts: u32) -> Result<(), WalletError> {
        if attempts == 0 {
            return Err(WalletError::InvalidArgument(
                "Address search bound must be greater than zero".to_string(),
            ));
        }
        self.max_address_attempts = attempts;
        Ok(())
    }

    pub fn phrase(&self) -> Result<String, WalletError> {
        self.root
            .mnemonic()
            .map(|m| m.to_string())
            .ok_or_else(|| WalletError::MissingKey("wallet has no mnemonic".to_string()))
    }

    /// `m/44'/<coin>'/<account>'/<change>`
    pub(crate) fn chain_node(&self, account: u32, change: bool) -> Result<HDNode, WalletError> {
        let path = DerivationPath::bip44_change(self.coin_type, account, change)?;
        self.root.derive_path(&path.to_string())
    }

    fn matches_zone(&self, node: &HDNode, zone: Zone) -> bool {
        zone::is_valid_address_for_zone(&node.address(), zone, self.ledger())
    }

    fn info_for(
        &self,
        node: &HDNode,
        account: u32,
        index: u32,
        change: bool,
        zone: Zone,
    ) -> NeuteredAddressInfo {
        NeuteredAddressInfo {
            pub_key: pub_key_hex(node),
            address: node.address(),
            account,
            index,
            change,
            zone,
            ledger: self.ledger(),
        }
    }

    /// The `ordinal`-th (0-based) address of `zone` on the chain, counting
    /// from index 0. Does not register the address.
    pub fn derive_address_for_zone(
        &self,
        account: u32,
        zone: Zone,
        ordinal: u32,
        change: bool,
    ) -> Result<NeuteredAddressInfo, WalletError> {
        let chain = self.chain_node(account, change)?;
        let mut seen = 0u32;
        let found = search_chain(&chain, 0, self.max_address_attempts, |node| {
            if !self.matches_zone(node, zone) {
                return false;
            }
            if seen == ordinal {
                return true;
            }
            seen += 1;
            false
        })?;
        match found {
            Some((index, node)) => Ok(self.info_for(&node, account, index, change, zone)),
            None => Err(self.exhausted(zone)),
        }
    }

    /// First address of `zone` at or after `start`. Does not register it.
    pub(crate) fn find_address(
        &self,
        account: u32,
        zone: Zone,
        change: bool,
        start: u32,
    ) -> Result<NeuteredAddressInfo, WalletError> {
        let chain = self.chain_node(account, change)?;
        let found = search_chain(&chain, start, self.max_address_attempts, |node| {
            self.matches_zone(node, zone)
        })?;
        match found {
            Some((index, node)) => {
                debug!(
                    zone = %zone,
                    account,
                    change,
                    tried = index - start + 1,
                    "found zone address"
                );
                Ok(self.info_for(&node, account, index, change, zone))
            }
            None => Err(self.exhausted(zone)),
        }
    }

    fn exhausted(&self, zone: Zone) -> WalletError {
        WalletError::SearchExhausted {
            zone: zone.to_string(),
            attempts: self.max_address_attempts,
        }
    }

    fn chain_lock(&self, account: u32, change: bool, zone: Zone) -> Arc<Mutex<()>> {
        self.chain_locks
            .lock()
            .entry((account, change, zone))
            .or_default()
            .clone()
    }

    fn next_on_chain(
        &self,
        account: u32,
        zone: Zone,
        change: bool,
    ) -> Result<NeuteredAddressInfo, WalletError> {
        let lock = self.chain_lock(account, change, zone);
        let _chain = lock.lock();
        let start = match self.addresses.last_index(account, zone, change) {
            Some(last) => last.checked_add(1).ok_or_else(|| {
                WalletError::InvalidArgument("Address index space exhausted".to_string())
            })?,
            None => 0,
        };
        let info = self.find_address(account, zone, change, start)?;
        self.addresses.insert(info.clone())?;
        info!(zone = %zone, account, index = info.index, change, "derived address {}", info.address);
        Ok(info)
    }

    /// Registers an address found by a search unless it is already known.
    /// Returns whether it was newly added.
    pub(crate) fn register_found(&self, info: &NeuteredAddressInfo) -> Result<bool, WalletError> {
        let lock = self.chain_lock(info.account, info.change, info.zone);
        let _chain = lock.lock();
        if self.addresses.contains(&info.address) {
            return Ok(false);
        }
        self.addresses.insert(info.clone())?;
        Ok(true)
    }

    /// Unregisters an address nothing was ever sent to, so its slot can be
    /// handed out again.
    pub(crate) fn release_address(&self, address: &Address) -> Option<NeuteredAddressInfo> {
        let info = self.addresses.get(address)?;
        let lock = self.chain_lock(info.account, info.change, info.zone);
        let _chain = lock.lock();
        let released = self.addresses.remove(address);
        if let Some(info) = &released {
            debug!(zone = %info.zone, account = info.account, index = info.index, change = info.change, "released address");
        }
        released
    }

    /// Derives and registers the next external address for `zone`.
    pub fn get_next_address(
        &self,
        account: u32,
        zone: Zone,
    ) -> Result<NeuteredAddressInfo, WalletError> {
        self.next_on_chain(account, zone, false)
    }

    pub fn get_next_change_address(
        &self,
        account: u32,
        zone: Zone,
    ) -> Result<NeuteredAddressInfo, WalletError> {
        self.next_on_chain(account, zone, true)
    }

    /// Registers the address at an explicit index. The derived address must
    /// belong to a zone of this wallet's ledger.
    pub fn add_address(
        &self,
        account: u32,
        index: u32,
        change: bool,
    ) -> Result<NeuteredAddressInfo, WalletError> {
        if index >= HARDENED_OFFSET {
            return Err(WalletError::InvalidArgument(format!(
                "Address index {} must be below {}",
                index, HARDENED_OFFSET
            )));
        }
        if self.addresses.is_index_used(account, change, index) {
            return Err(WalletError::AddressExists(format!(
                "index {} of account {} is already in use",
                index, account
            )));
        }
        let node = self.chain_node(account, change)?.derive_child(index)?;
        let address = node.address();
        let zone = zone::zone_from_address(&address)?;
        if zone::ledger_from_address(&address) != self.ledger() {
            return Err(WalletError::InvalidZone(format!(
                "Address {} at index {} is not a {:?} address",
                address,
                index,
                self.ledger()
            )));
        }
        let info = self.info_for(&node, account, index, change, zone);
        self.addresses.insert(info.clone())?;
        Ok(info)
    }

    pub fn get_address_info(&self, address: &Address) -> Option<NeuteredAddressInfo> {
        self.addresses.get(address)
    }

    pub fn get_addresses_for_zone(&self, zone: Zone) -> Vec<NeuteredAddressInfo> {
        self.addresses.for_zone(zone)
    }

    pub fn get_addresses_for_account(&self, account: u32) -> Vec<NeuteredAddressInfo> {
        self.addresses.for_account(account)
    }

    /// Re-derives the private node owning `address`.
    pub fn private_node_for(&self, address: &Address) -> Result<HDNode, WalletError> {
        let info = self
            .addresses
            .get(address)
            .ok_or_else(|| WalletError::AddressNotFound(address.to_string()))?;
        let node = self
            .chain_node(info.account, info.change)?
            .derive_child(info.index)?;
        if node.address() != *address {
            return Err(WalletError::Mismatch(format!(
                "Derived {} but expected {}",
                node.address(),
                address
            )));
        }
        Ok(node)
    }

    /// Extended public key of `m/44'/<coin>'/<account>'`.
    pub fn xpub(&self, account: u32) -> Result<String, WalletError> {
        let path = format!("{}/{}'", self.coin_type.base_path(), account);
        Ok(self.root.derive_path(&path)?.neuter().extended_key())
    }

    pub fn to_serialized(&self) -> Result<SerializedHdWallet, WalletError> {
        Ok(SerializedHdWallet {
            version: WALLET_VERSION,
            coin_type: self.coin_type.value(),
            phrase: self.phrase()?,
            addresses: self.addresses.all().iter().map(SerializedAddress::from).collect(),
            outpoints: Vec::new(),
            channels: Vec::new(),
        })
    }

    /// Rebuilds a core from its serialized form, re-deriving every stored
    /// address and rejecting any discrepancy.
    pub fn from_serialized(
        serialized: &SerializedHdWallet,
        expected: CoinType,
    ) -> Result<Self, WalletError> {
        if serialized.version != WALLET_VERSION {
            return Err(WalletError::DecodeError(format!(
                "Unsupported wallet version {}",
                serialized.version
            )));
        }
        let coin_type = CoinType::from_value(serialized.coin_type)?;
        if coin_type != expected {
            return Err(WalletError::InvalidCoinType(format!(
                "expected {} but wallet has {}",
                expected.value(),
                serialized.coin_type
            )));
        }
        let mnemonic = parse_mnemonic(&serialized.phrase)?;
        let core = HdCore::from_mnemonic(&mnemonic, coin_type)?;

        for stored in &serialized.addresses {
            let node = core
                .chain_node(stored.account, stored.change)?
                .derive_child(stored.index)?;
            let derived = node.address();
            if derived != stored.address {
                return Err(WalletError::Mismatch(format!(
                    "Address at account {} index {} is {} but {} was stored",
                    stored.account, stored.index, derived, stored.address
                )));
            }
            let pub_key = pub_key_hex(&node);
            if !pub_key.eq_ignore_ascii_case(&stored.pub_key) {
                return Err(WalletError::Mismatch(format!(
                    "Public key of {} does not match the stored key",
                    stored.address
                )));
            }
            let derived_zone = zone::zone_from_address(&derived)?;
            if derived_zone != stored.zone {
                return Err(WalletError::Mismatch(format!(
                    "Address {} is in zone {} but {} was stored",
                    stored.address, derived_zone, stored.zone
                )));
            }
            let info = core.info_for(&node, stored.account, stored.index, stored.change, derived_zone);
            core.addresses.insert(info)?;
        }
        Ok(core)
    }
}

impl fmt::Debug for HdCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HdCore")
            .field("coin_type", &self.coin_type)
            .field("addresses", &self.addresses.len())
            .field("max_address_attempts", &self.max_address_attempts)
            .finish()
    }
}
