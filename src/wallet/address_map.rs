//! Registry of the addresses a wallet has derived
//!
//! Entries are keyed by address with a reverse index on
//! `(account, change, index)`, so neither an address nor a derivation slot
//! can be registered twice.

use crate::address::Address;
use crate::error::WalletError;
use crate::zone::{Ledger, Zone};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Public description of one derived address. Holds no private material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NeuteredAddressInfo {
    /// Compressed public key, hex encoded with `0x` prefix
    pub pub_key: String,
    pub address: Address,
    pub account: u32,
    pub index: u32,
    pub change: bool,
    pub zone: Zone,
    pub ledger: Ledger,
}

type SlotKey = (u32, bool, u32);

#[derive(Debug, Default)]
struct AddressMapInner {
    entries: HashMap<Address, NeuteredAddressInfo>,
    slot_index: HashMap<SlotKey, Address>,
}

/// Thread-safe address registry.
#[derive(Debug, Clone, Default)]
pub struct AddressMap {
    inner: Arc<RwLock<AddressMapInner>>,
}

impl AddressMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `info`. Fails without mutating if the address or its
    /// derivation slot is already taken.
    pub fn insert(&self, info: NeuteredAddressInfo) -> Result<(), WalletError> {
        let mut inner = self.inner.write();

        if inner.entries.contains_key(&info.address) {
            return Err(WalletError::AddressExists(info.address.to_string()));
        }
        let slot = (info.account, info.change, info.index);
        if let Some(existing) = inner.slot_index.get(&slot) {
            return Err(WalletError::AddressExists(format!(
                "index {} of account {} is already used by {}",
                info.index, info.account, existing
            )));
        }

        inner.slot_index.insert(slot, info.address);
        inner.entries.insert(info.address, info);
        Ok(())
    }

    /// Unregisters `address`, freeing its derivation slot.
    pub fn remove(&self, address: &Address) -> Option<NeuteredAddressInfo> {
        let mut inner = self.inner.write();
        let info = inner.entries.remove(address)?;
        inner.slot_index.remove(&(info.account, info.change, info.index));
        Some(info)
    }

    pub fn get(&self, address: &Address) -> Option<NeuteredAddressInfo> {
        self.inner.read().entries.get(address).cloned()
    }

    pub fn get_by_index(&self, account: u32, change: bool, index: u32) -> Option<NeuteredAddressInfo> {
        let inner = self.inner.read();
        inner
            .slot_index
            .get(&(account, change, index))
            .and_then(|address| inner.entries.get(address).cloned())
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.inner.read().entries.contains_key(address)
    }

    pub fn is_index_used(&self, account: u32, change: bool, index: u32) -> bool {
        self.inner
            .read()
            .slot_index
            .contains_key(&(account, change, index))
    }

    /// Entries in `zone`, ordered by account, chain and index.
    pub fn for_zone(&self, zone: Zone) -> Vec<NeuteredAddressInfo> {
        self.filtered(|info| info.zone == zone)
    }

    pub fn for_account(&self, account: u32) -> Vec<NeuteredAddressInfo> {
        self.filtered(|info| info.account == account)
    }

    pub fn for_account_zone(&self, account: u32, zone: Zone, change: bool) -> Vec<NeuteredAddressInfo> {
        self.filtered(|info| info.account == account && info.zone == zone && info.change == change)
    }

    /// Highest index used for `(account, zone, change)`.
    pub fn last_index(&self, account: u32, zone: Zone, change: bool) -> Option<u32> {
        self.inner
            .read()
            .entries
            .values()
            .filter(|info| info.account == account && info.zone == zone && info.change == change)
            .map(|info| info.index)
            .max()
    }

    pub fn all(&self) -> Vec<NeuteredAddressInfo> {
        self.filtered(|_| true)
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn filtered<F>(&self, predicate: F) -> Vec<NeuteredAddressInfo>
    where
        F: Fn(&NeuteredAddressInfo) -> bool,
    {
        let inner = self.inner.read();
        let mut entries: Vec<_> = inner
            .entries
            .values()
            .filter(|info| predicate(info))
            .cloned()
            .collect();
        entries.sort_by_key(|info| (info.account, info.change, info.index));
        entries
    }
}
