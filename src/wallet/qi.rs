//! UTXO-ledger wallet
//!
//! Tracks outpoints per zone, selects and leases coins, builds denominated
//! transactions and signs them with Schnorr (one owning key) or MuSig2
//! (several). Payment-code channels provide one-time addresses.

use super::address_map::NeuteredAddressInfo;
use super::hd::{self, search_indices, HdCore, SerializedHdWallet};
use super::outpoints::{OutpointLease, OutpointPool};
use super::payment_code::{PaymentChannel, PaymentCode};
use crate::address::Address;
use crate::config::{FeePolicy, WalletConfig};
use crate::crypto;
use crate::denomination;
use crate::error::WalletError;
use crate::hdnode::{CoinType, DerivationPath, HDNode};
use crate::musig;
use crate::provider::{Ledger, RemoteOutpoint, TxStatus};
use crate::transaction::{OutpointInfo, QiTransaction, TxHash, TxInput, TxOutput};
use crate::zone::{self, Ledger as LedgerKind, Zone};
use bip39::Mnemonic;
use parking_lot::RwLock;
use secp256k1::SecretKey;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A one-time receive address handed out through a payment channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelAddress {
    pub account: u32,
    pub remote: PaymentCode,
    pub index: u32,
    pub zone: Zone,
}

/// Result of a discovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Addresses newly found to hold outpoints
    pub addresses: usize,
    /// Outpoints added to the pool
    pub outpoints: usize,
}

type ChannelKey = (u32, String);

/// Change address registered for a pending spend. Unregistered on drop
/// unless committed.
struct ChangeReservation<'a> {
    core: &'a HdCore,
    address: Option<Address>,
}

impl ChangeReservation<'_> {
    fn commit(mut self) {
        self.address = None;
    }
}

impl Drop for ChangeReservation<'_> {
    fn drop(&mut self) {
        if let Some(address) = self.address.take() {
            self.core.release_address(&address);
        }
    }
}

pub struct QiHdWallet {
    core: HdCore,
    outpoints: OutpointPool,
    channels: RwLock<HashMap<ChannelKey, PaymentChannel>>,
    receive_addresses: RwLock<HashMap<Address, ChannelAddress>>,
    ledger: Option<Arc<dyn Ledger>>,
    fees: FeePolicy,
    gap_limit: u32,
    chain_id: u64,
}

impl QiHdWallet {
    pub const COIN_TYPE: CoinType = CoinType::Qi;

    fn with_core(core: HdCore) -> Self {
        let defaults = WalletConfig::default();
        QiHdWallet {
            core,
            outpoints: OutpointPool::new(),
            channels: RwLock::new(HashMap::new()),
            receive_addresses: RwLock::new(HashMap::new()),
            ledger: None,
            fees: defaults.fee,
            gap_limit: defaults.gap_limit,
            chain_id: defaults.chain_id,
        }
    }

    pub fn create_random() -> Result<Self, WalletError> {
        Self::from_mnemonic(&hd::random_mnemonic()?)
    }

    pub fn from_mnemonic(mnemonic: &Mnemonic) -> Result<Self, WalletError> {
        Ok(Self::with_core(HdCore::from_mnemonic(mnemonic, Self::COIN_TYPE)?))
    }

    pub fn from_phrase(phrase: &str) -> Result<Self, WalletError> {
        Self::from_mnemonic(&hd::parse_mnemonic(phrase)?)
    }

    /// Applies search bound, gap limit, chain id and fee policy.
    pub fn configure(&mut self, config: &WalletConfig) -> Result<(), WalletError> {
        if config.gap_limit == 0 {
            return Err(WalletError::InvalidArgument(
                "Gap limit must be greater than zero".to_string(),
            ));
        }
        self.core.set_max_address_attempts(config.max_address_attempts)?;
        self.gap_limit = config.gap_limit;
        self.chain_id = config.chain_id;
        self.fees = config.fee;
        Ok(())
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

    fn require_ledger(&self) -> Result<Arc<dyn Ledger>, WalletError> {
        self.ledger.clone().ok_or(WalletError::NoProvider)
    }

    pub fn core(&self) -> &HdCore {
        &self.core
    }

    pub fn fee_policy(&self) -> FeePolicy {
        self.fees
    }

    // ---- addresses ----

    pub fn get_next_address(&self, account: u32, zone: Zone) -> Result<NeuteredAddressInfo, WalletError> {
        self.core.get_next_address(account, zone)
    }

    pub fn get_next_change_address(
        &self,
        account: u32,
        zone: Zone,
    ) -> Result<NeuteredAddressInfo, WalletError> {
        self.core.get_next_change_address(account, zone)
    }

    pub fn add_address(
        &self,
        account: u32,
        index: u32,
        change: bool,
    ) -> Result<NeuteredAddressInfo, WalletError> {
        self.core.add_address(account, index, change)
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

    pub fn xpub(&self, account: u32) -> Result<String, WalletError> {
        self.core.xpub(account)
    }

    fn owns(&self, address: &Address) -> bool {
        self.core.address_map().contains(address) || self.receive_addresses.read().contains_key(address)
    }

    // ---- outpoints ----

    /// Imports outpoints owned by known addresses. Each outpoint's zone must
    /// be the zone of its address.
    pub fn import_outpoints(&self, outpoints: Vec<OutpointInfo>) -> Result<usize, WalletError> {
        for info in &outpoints {
            if !self.owns(&info.address) {
                return Err(WalletError::AddressNotFound(info.address.to_string()));
            }
            let zone = zone::zone_from_address(&info.address)?;
            if zone != info.zone {
                return Err(WalletError::Mismatch(format!(
                    "Outpoint {} claims zone {} but {} is in {}",
                    info.outpoint, info.zone, info.address, zone
                )));
            }
        }
        self.outpoints.import(outpoints)
    }

    /// Available (unleased) outpoints in `zone`.
    pub fn get_outpoints(&self, zone: Zone) -> Vec<OutpointInfo> {
        self.outpoints.available(zone)
    }

    pub fn balance(&self, zone: Zone) -> Result<u64, WalletError> {
        self.outpoints.balance(zone, None)
    }

    pub fn balance_for_account(&self, zone: Zone, account: u32) -> Result<u64, WalletError> {
        self.outpoints.balance(zone, Some(account))
    }

    pub fn lease_outpoints(
        &self,
        zone: Zone,
        account: u32,
        amount: u64,
    ) -> Result<OutpointLease, WalletError> {
        self.outpoints.lease(zone, Some(account), amount, &self.fees)
    }

    // ---- transactions ----

    fn input_public_key(&self, address: &Address) -> Result<Vec<u8>, WalletError> {
        let secret = self.resolve_secret(address)?;
        Ok(crypto::public_key_from_secret(&secret).serialize().to_vec())
    }

    /// Builds an unsigned transaction spending `lease`: `amount` to `to` in
    /// standard denominations, the rest to a fresh change address. The change
    /// address stays registered.
    pub fn build_transaction(
        &self,
        lease: &OutpointLease,
        to: &Address,
        amount: u64,
        account: u32,
    ) -> Result<QiTransaction, WalletError> {
        let (tx, change) = self.build_reserving_change(lease, to, amount, account)?;
        change.commit();
        Ok(tx)
    }

    fn build_reserving_change(
        &self,
        lease: &OutpointLease,
        to: &Address,
        amount: u64,
        account: u32,
    ) -> Result<(QiTransaction, ChangeReservation<'_>), WalletError> {
        let zone = lease.zone();
        if !zone::is_valid_address_for_zone(to, zone, LedgerKind::Qi) {
            return Err(WalletError::InvalidArgument(format!(
                "{} is not a Qi address in zone {}",
                to, zone
            )));
        }
        let required = amount.saturating_add(lease.fee());
        if lease.total() < required {
            return Err(WalletError::InsufficientFunds {
                required,
                available: lease.total(),
                shortfall: required - lease.total(),
            });
        }

        let inputs = lease
            .outpoints()
            .iter()
            .map(|info| {
                Ok(TxInput {
                    outpoint: info.outpoint,
                    pub_key: self.input_public_key(&info.address)?,
                })
            })
            .collect::<Result<Vec<_>, WalletError>>()?;

        let mut outputs: Vec<TxOutput> = denomination::denominate(amount)
            .into_iter()
            .map(|denomination| TxOutput {
                address: *to,
                denomination,
            })
            .collect();

        let mut reservation = ChangeReservation {
            core: &self.core,
            address: None,
        };
        let change = lease.change(amount);
        if change > 0 {
            let change_address = self.core.get_next_change_address(account, zone)?.address;
            reservation.address = Some(change_address);
            outputs.extend(
                denomination::denominate(change)
                    .into_iter()
                    .map(|denomination| TxOutput {
                        address: change_address,
                        denomination,
                    }),
            );
        }

        let tx = QiTransaction::new(self.chain_id, inputs, outputs)?;
        Ok((tx, reservation))
    }

    /// Private key of an owned address: either a derived address or a
    /// payment-channel receive address.
    fn resolve_secret(&self, address: &Address) -> Result<SecretKey, WalletError> {
        if self.core.address_map().contains(address) {
            let node = self.core.private_node_for(address)?;
            return Ok(*node.require_private_key()?);
        }
        let channel_address = self
            .receive_addresses
            .read()
            .get(address)
            .cloned()
            .ok_or_else(|| WalletError::MissingKey(address.to_string()))?;
        let channels = self.channels.read();
        let channel = channels
            .get(&(channel_address.account, channel_address.remote.to_string()))
            .ok_or_else(|| WalletError::MissingKey(address.to_string()))?;
        channel.receiving_key(channel_address.index)
    }

    /// Signs every input. A single owning key signs with Schnorr; several
    /// distinct keys produce a MuSig2 aggregate signature.
    pub fn sign_transaction(&self, mut tx: QiTransaction) -> Result<QiTransaction, WalletError> {
        let mut secrets: Vec<SecretKey> = Vec::new();
        for input in &tx.inputs {
            let public_key = crypto::parse_public_key(&input.pub_key)?;
            let address = Address::from_public_key(&public_key);
            let secret = self
                .resolve_secret(&address)
                .map_err(|_| WalletError::MissingKey(format!("input {} ({})", input.outpoint, address)))?;
            if crypto::public_key_from_secret(&secret) != public_key {
                return Err(WalletError::Mismatch(format!(
                    "Key for {} does not match input {}",
                    address, input.outpoint
                )));
            }
            if !secrets.contains(&secret) {
                secrets.push(secret);
            }
        }

        tx.signature = None;
        let digest = tx.signing_digest()?;
        let signature = match secrets.as_slice() {
            [] => {
                return Err(WalletError::InvalidArgument(
                    "Transaction has no inputs to sign".to_string(),
                ))
            }
            [single] => crypto::schnorr_sign(single, &digest).to_vec(),
            many => musig::sign_local(many, &digest)?.0.to_vec(),
        };
        tx.signature = Some(signature);
        tx.verify_signature()?;
        Ok(tx)
    }

    /// Selects coins, builds, signs, broadcasts and waits. Leased coins are
    /// spent only on confirmation and returned on any failure, as is the
    /// change slot.
    pub async fn send_transaction(
        &self,
        to: &Address,
        amount: u64,
        zone: Zone,
        account: u32,
    ) -> Result<TxHash, WalletError> {
        let ledger = self.require_ledger()?;
        let lease = self.lease_outpoints(zone, account, amount)?;
        let (tx, change) = self.build_reserving_change(&lease, to, amount, account)?;
        let tx = self.sign_transaction(tx)?;

        let hash = ledger.broadcast_transaction(zone, tx.raw()?).await?;
        info!(zone = %zone, %hash, inputs = tx.inputs.len(), "broadcast qi transaction");

        match ledger.wait_for_transaction(zone, hash).await? {
            TxStatus::Confirmed => {
                lease.commit();
                change.commit();
                Ok(hash)
            }
            TxStatus::Failed(reason) => {
                warn!(%hash, "qi transaction failed, releasing outpoints: {}", reason);
                Err(WalletError::TransactionFailed(reason))
            }
        }
    }

    // ---- payment codes ----

    fn bip47_node(&self, account: u32) -> Result<HDNode, WalletError> {
        let path = DerivationPath::bip47_account(Self::COIN_TYPE, account)?;
        self.core.root().derive_path(&path.to_string())
    }

    pub fn payment_code(&self, account: u32) -> Result<PaymentCode, WalletError> {
        Ok(PaymentCode::from_node(&self.bip47_node(account)?))
    }

    /// Opens a channel with `remote` if one is not already open.
    pub fn open_channel(&self, remote: &PaymentCode, account: u32) -> Result<(), WalletError> {
        let key = (account, remote.to_string());
        if self.channels.read().contains_key(&key) {
            return Ok(());
        }
        let channel = PaymentChannel::new(account, self.bip47_node(account)?, *remote)?;
        self.channels.write().entry(key).or_insert(channel);
        Ok(())
    }

    pub fn channel_remotes(&self, account: u32) -> Vec<PaymentCode> {
        self.channels
            .read()
            .values()
            .filter(|c| c.account() == account)
            .map(|c| *c.remote())
            .collect()
    }

    fn channel_search<F>(
        &self,
        remote: &PaymentCode,
        account: u32,
        zone: Zone,
        next_index: impl Fn(&PaymentChannel) -> u32,
        derive: F,
    ) -> Result<(u32, Address), WalletError>
    where
        F: Fn(&PaymentChannel, u32) -> Result<Address, WalletError>,
    {
        let channels = self.channels.read();
        let channel = channels
            .get(&(account, remote.to_string()))
            .ok_or_else(|| {
                WalletError::InvalidArgument(format!("No channel open with {}", remote))
            })?;
        let start = next_index(channel);
        let found = search_indices(start, self.core.max_address_attempts(), |index| {
            let address = derive(channel, index)?;
            Ok(zone::is_valid_address_for_zone(&address, zone, LedgerKind::Qi).then_some(address))
        })?;
        found.ok_or_else(|| WalletError::SearchExhausted {
            zone: zone.to_string(),
            attempts: self.core.max_address_attempts(),
        })
    }

    /// Next one-time address in `zone` to pay `remote`.
    pub fn get_next_send_address(
        &self,
        remote: &PaymentCode,
        zone: Zone,
        account: u32,
    ) -> Result<Address, WalletError> {
        let (index, address) = self.channel_search(
            remote,
            account,
            zone,
            PaymentChannel::next_send_index,
            |channel, index| channel.sending_address(index),
        )?;
        if let Some(channel) = self.channels.write().get_mut(&(account, remote.to_string())) {
            channel.mark_sent(index);
        }
        Ok(address)
    }

    /// Next one-time address in `zone` on which `remote` can pay this wallet.
    pub fn get_next_receive_address(
        &self,
        remote: &PaymentCode,
        zone: Zone,
        account: u32,
    ) -> Result<Address, WalletError> {
        let (index, address) = self.channel_search(
            remote,
            account,
            zone,
            PaymentChannel::next_receive_index,
            |channel, index| channel.receiving_address(index),
        )?;
        if let Some(channel) = self.channels.write().get_mut(&(account, remote.to_string())) {
            channel.mark_received(index);
        }
        self.receive_addresses.write().insert(
            address,
            ChannelAddress {
                account,
                remote: *remote,
                index,
                zone,
            },
        );
        Ok(address)
    }

    pub async fn send_to_payment_code(
        &self,
        remote: &PaymentCode,
        amount: u64,
        zone: Zone,
        account: u32,
    ) -> Result<TxHash, WalletError> {
        self.require_ledger()?;
        self.open_channel(remote, account)?;
        let to = self.get_next_send_address(remote, zone, account)?;
        self.send_transaction(&to, amount, zone, account).await
    }

    // ---- discovery ----

    fn to_outpoint_info(
        remote: RemoteOutpoint,
        address: Address,
        zone: Zone,
        account: u32,
    ) -> OutpointInfo {
        OutpointInfo {
            outpoint: remote.outpoint,
            denomination: remote.denomination,
            address,
            zone,
            account,
        }
    }

    /// Walks the external and change chains of `account` in `zone`, stopping
    /// on each chain after `gap_limit` consecutive addresses without outpoints.
    pub async fn scan(&self, zone: Zone, account: u32) -> Result<ScanSummary, WalletError> {
        let ledger = self.require_ledger()?;
        let mut summary = ScanSummary::default();

        for change in [false, true] {
            let mut gap = 0u32;
            let mut start = 0u32;
            while gap < self.gap_limit {
                let info = self.core.find_address(account, zone, change, start)?;
                start = info.index.saturating_add(1);

                let remote = ledger.get_outpoints(&info.address, zone).await?;
                if remote.is_empty() {
                    gap += 1;
                    continue;
                }
                gap = 0;
                if self.core.register_found(&info)? {
                    summary.addresses += 1;
                }
                let fresh = remote
                    .into_iter()
                    .map(|r| Self::to_outpoint_info(r, info.address, zone, account))
                    .collect();
                summary.outpoints += self.outpoints.reconcile(zone, &info.address, fresh)?;
            }
            debug!(zone = %zone, account, change, next_index = start, "finished scanning chain");
        }

        info!(
            zone = %zone,
            account,
            addresses = summary.addresses,
            outpoints = summary.outpoints,
            "scan complete"
        );
        Ok(summary)
    }

    /// Refreshes the outpoints of already known addresses without deriving
    /// new ones. Returns the number of outpoints added.
    pub async fn sync(&self, zone: Zone, account: u32) -> Result<usize, WalletError> {
        let ledger = self.require_ledger()?;

        let mut known: Vec<Address> = self
            .core
            .get_addresses_for_zone(zone)
            .into_iter()
            .filter(|info| info.account == account)
            .map(|info| info.address)
            .collect();
        known.extend(
            self.receive_addresses
                .read()
                .iter()
                .filter(|(_, c)| c.account == account && c.zone == zone)
                .map(|(address, _)| *address),
        );

        let mut added = 0;
        for address in known {
            let remote = ledger.get_outpoints(&address, zone).await?;
            let fresh = remote
                .into_iter()
                .map(|r| Self::to_outpoint_info(r, address, zone, account))
                .collect();
            added += self.outpoints.reconcile(zone, &address, fresh)?;
        }
        debug!(zone = %zone, account, added, "sync complete");
        Ok(added)
    }

    // ---- persistence ----

    pub fn serialize(&self) -> Result<SerializedHdWallet, WalletError> {
        let mut serialized = self.core.to_serialized()?;
        serialized.outpoints = self.outpoints.all();
        let mut channels: Vec<_> = self
            .channels
            .read()
            .values()
            .map(PaymentChannel::to_serialized)
            .collect();
        channels.sort_by_key(|c| (c.account, c.payment_code.to_string()));
        serialized.channels = channels;
        Ok(serialized)
    }

    /// Rebuilds a wallet, re-deriving addresses and channel receive addresses
    /// and validating every stored outpoint against them.
    pub fn deserialize(serialized: &SerializedHdWallet) -> Result<Self, WalletError> {
        let wallet = Self::with_core(HdCore::from_serialized(serialized, Self::COIN_TYPE)?);

        for stored in &serialized.channels {
            wallet.open_channel(&stored.payment_code, stored.account)?;
            let key = (stored.account, stored.payment_code.to_string());
            let mut channels = wallet.channels.write();
            let channel = channels.get_mut(&key).ok_or_else(|| {
                WalletError::Mismatch(format!("Channel with {} was not restored", stored.payment_code))
            })?;
            for index in &stored.sent {
                channel.mark_sent(*index);
            }
            for index in &stored.received {
                let address = channel.receiving_address(*index)?;
                let zone = zone::zone_from_address(&address)?;
                channel.mark_received(*index);
                wallet.receive_addresses.write().insert(
                    address,
                    ChannelAddress {
                        account: stored.account,
                        remote: stored.payment_code,
                        index: *index,
                        zone,
                    },
                );
            }
        }

        wallet.import_outpoints(serialized.outpoints.clone())?;
        Ok(wallet)
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

impl std::fmt::Debug for QiHdWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QiHdWallet")
            .field("core", &self.core)
            .field("channels", &self.channels.read().len())
            .field("connected", &self.is_connected())
            .finish()
    }
}
