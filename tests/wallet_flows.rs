//! End-to-end wallet flows against an in-memory ledger

use async_trait::async_trait;
use parking_lot::Mutex;
use quaiwallet::config::WalletConfig;
use quaiwallet::crypto::{self, keccak256};
use quaiwallet::provider::{Ledger, RemoteOutpoint, TxStatus};
use quaiwallet::transaction::{
    Outpoint, OutpointInfo, QiTransaction, QuaiTransactionRequest, SignedQuaiTransaction, TxHash,
};
use quaiwallet::wallet::{HdWallet, NeuteredAddressInfo, QiHdWallet, QuaiHdWallet};
use quaiwallet::zone::{Shard, Zone};
use quaiwallet::{Address, WalletError};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Barrier};

const ALICE: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
const BOB: &str = "test test test test test test test test test test test junk";

/// Tracks unspent outputs per address and applies confirmed Qi spends.
struct MockLedger {
    utxos: Mutex<HashMap<Address, Vec<RemoteOutpoint>>>,
    status: Mutex<TxStatus>,
    broadcasts: Mutex<Vec<Vec<u8>>>,
    rejecting: Mutex<bool>,
    next_tx: Mutex<u8>,
}

impl MockLedger {
    fn new() -> Arc<Self> {
        Arc::new(MockLedger {
            utxos: Mutex::new(HashMap::new()),
            status: Mutex::new(TxStatus::Confirmed),
            broadcasts: Mutex::new(Vec::new()),
            rejecting: Mutex::new(false),
            next_tx: Mutex::new(1),
        })
    }

    fn fund(&self, address: Address, denomination: u8) {
        let mut next = self.next_tx.lock();
        let outpoint = Outpoint {
            tx_hash: TxHash([*next; 32]),
            index: 0,
        };
        *next += 1;
        self.utxos.lock().entry(address).or_default().push(RemoteOutpoint {
            outpoint,
            denomination,
        });
    }

    fn set_status(&self, status: TxStatus) {
        *self.status.lock() = status;
    }

    fn reject_broadcasts(&self) {
        *self.rejecting.lock() = true;
    }

    fn last_qi_transaction(&self) -> QiTransaction {
        let broadcasts = self.broadcasts.lock();
        QiTransaction::from_raw(broadcasts.last().unwrap()).unwrap()
    }

    fn apply(&self, tx: &QiTransaction, hash: TxHash) {
        let spent: HashSet<Outpoint> = tx.inputs.iter().map(|input| input.outpoint).collect();
        let mut utxos = self.utxos.lock();
        for list in utxos.values_mut() {
            list.retain(|remote| !spent.contains(&remote.outpoint));
        }
        for (index, output) in tx.outputs.iter().enumerate() {
            utxos.entry(output.address).or_default().push(RemoteOutpoint {
                outpoint: Outpoint {
                    tx_hash: hash,
                    index: index as u16,
                },
                denomination: output.denomination,
            });
        }
    }
}

#[async_trait]
impl Ledger for MockLedger {
    async fn running_shards(&self) -> Result<Vec<Shard>, WalletError> {
        Ok(vec![Shard::Prime, Shard::Zone(Zone::Cyprus1)])
    }

    async fn get_outpoints(
        &self,
        address: &Address,
        _zone: Zone,
    ) -> Result<Vec<RemoteOutpoint>, WalletError> {
        Ok(self.utxos.lock().get(address).cloned().unwrap_or_default())
    }

    async fn get_balance(&self, address: &Address, _zone: Zone) -> Result<u128, WalletError> {
        let utxos = self.utxos.lock();
        let total = utxos
            .get(address)
            .map(|list| {
                list.iter()
                    .map(|r| quaiwallet::denomination::value(r.denomination).unwrap_or(0))
                    .sum::<u64>()
            })
            .unwrap_or(0);
        Ok(u128::from(total))
    }

    async fn broadcast_transaction(&self, _zone: Zone, raw: Vec<u8>) -> Result<TxHash, WalletError> {
        if *self.rejecting.lock() {
            return Err(WalletError::NetworkError("node rejected transaction".to_string()));
        }
        let hash = TxHash(keccak256(&raw));
        self.broadcasts.lock().push(raw);
        Ok(hash)
    }

    async fn wait_for_transaction(&self, _zone: Zone, hash: TxHash) -> Result<TxStatus, WalletError> {
        let status = self.status.lock().clone();
        if status == TxStatus::Confirmed {
            let raw = self.broadcasts.lock().last().cloned().unwrap_or_default();
            if let Ok(tx) = QiTransaction::from_raw(&raw) {
                if tx.verify_signature().is_ok() {
                    self.apply(&tx, hash);
                }
            }
        }
        Ok(status)
    }
}

fn qi_wallet(phrase: &str, ledger: &Arc<MockLedger>) -> QiHdWallet {
    let mut wallet = QiHdWallet::from_phrase(phrase).unwrap();
    wallet
        .configure(&WalletConfig {
            gap_limit: 3,
            ..WalletConfig::default()
        })
        .unwrap();
    wallet.connect(ledger.clone());
    wallet
}

fn external(wallet: &QiHdWallet, ordinal: u32) -> NeuteredAddressInfo {
    wallet
        .core()
        .derive_address_for_zone(0, Zone::Cyprus1, ordinal, false)
        .unwrap()
}

#[tokio::test]
async fn test_scan_respects_gap_limit() {
    let ledger = MockLedger::new();
    let wallet = qi_wallet(ALICE, &ledger);
    ledger.fund(external(&wallet, 0).address, 7);
    ledger.fund(external(&wallet, 2).address, 4);
    ledger.fund(external(&wallet, 2).address, 4);
    // Beyond three consecutive empty addresses.
    ledger.fund(external(&wallet, 6).address, 7);

    let summary = wallet.scan(Zone::Cyprus1, 0).await.unwrap();
    assert_eq!(summary.addresses, 2);
    assert_eq!(summary.outpoints, 3);
    assert_eq!(wallet.balance(Zone::Cyprus1).unwrap(), 1200);
    assert!(wallet.get_address_info(&external(&wallet, 6).address).is_none());

    // A second scan finds nothing new.
    let again = wallet.scan(Zone::Cyprus1, 0).await.unwrap();
    assert_eq!(again.outpoints, 0);
    assert_eq!(wallet.get_outpoints(Zone::Cyprus1).len(), 3);
}

#[tokio::test]
async fn test_single_owner_send_spends_and_syncs_change() {
    let ledger = MockLedger::new();
    let wallet = qi_wallet(ALICE, &ledger);
    ledger.fund(external(&wallet, 0).address, 7);
    wallet.scan(Zone::Cyprus1, 0).await.unwrap();

    let bob = QiHdWallet::from_phrase(BOB).unwrap();
    let to = bob.get_next_address(0, Zone::Cyprus1).unwrap().address;
    wallet.send_transaction(&to, 250, Zone::Cyprus1, 0).await.unwrap();

    let tx = ledger.last_qi_transaction();
    assert_eq!(tx.signer_keys().unwrap().len(), 1);
    assert_eq!(tx.signature.as_ref().unwrap().len(), 64);
    assert!(wallet.get_outpoints(Zone::Cyprus1).is_empty());

    let added = wallet.sync(Zone::Cyprus1, 0).await.unwrap();
    assert!(added > 0);
    let fee = wallet.fee_policy().fee_for(1);
    assert_eq!(wallet.balance(Zone::Cyprus1).unwrap(), 1000 - 250 - fee);
}

#[tokio::test]
async fn test_multi_owner_send_uses_aggregate_signature() {
    let ledger = MockLedger::new();
    let wallet = qi_wallet(ALICE, &ledger);
    ledger.fund(external(&wallet, 0).address, 4);
    ledger.fund(external(&wallet, 1).address, 4);
    wallet.scan(Zone::Cyprus1, 0).await.unwrap();
    assert_eq!(wallet.balance(Zone::Cyprus1).unwrap(), 200);

    let bob = QiHdWallet::from_phrase(BOB).unwrap();
    let to = bob.get_next_address(0, Zone::Cyprus1).unwrap().address;
    wallet.send_transaction(&to, 150, Zone::Cyprus1, 0).await.unwrap();

    let tx = ledger.last_qi_transaction();
    assert_eq!(tx.inputs.len(), 2);
    assert_eq!(tx.signer_keys().unwrap().len(), 2);
    assert!(tx.verify_signature().is_ok());
    assert_eq!(wallet.balance(Zone::Cyprus1).unwrap(), 0);
}

#[tokio::test]
async fn test_insufficient_funds_reports_shortfall() {
    let ledger = MockLedger::new();
    let wallet = qi_wallet(ALICE, &ledger);
    ledger.fund(external(&wallet, 0).address, 4);
    wallet.scan(Zone::Cyprus1, 0).await.unwrap();

    let to = external(&wallet, 0).address;
    let result = wallet.send_transaction(&to, 500, Zone::Cyprus1, 0).await;
    assert_eq!(
        result,
        Err(WalletError::InsufficientFunds {
            required: 515,
            available: 100,
            shortfall: 415,
        })
    );
    assert!(ledger.broadcasts.lock().is_empty());
    assert_eq!(wallet.get_outpoints(Zone::Cyprus1).len(), 1);
}

fn change_addresses(wallet: &QiHdWallet) -> Vec<NeuteredAddressInfo> {
    wallet
        .core()
        .address_map()
        .for_account_zone(0, Zone::Cyprus1, true)
}

#[tokio::test]
async fn test_failed_transaction_releases_outpoints() {
    let ledger = MockLedger::new();
    let wallet = qi_wallet(ALICE, &ledger);
    ledger.fund(external(&wallet, 0).address, 7);
    wallet.scan(Zone::Cyprus1, 0).await.unwrap();
    ledger.set_status(TxStatus::Failed("reverted".to_string()));

    let bob = QiHdWallet::from_phrase(BOB).unwrap();
    let to = bob.get_next_address(0, Zone::Cyprus1).unwrap().address;
    let result = wallet.send_transaction(&to, 100, Zone::Cyprus1, 0).await;
    assert!(matches!(result, Err(WalletError::TransactionFailed(_))));
    assert_eq!(wallet.balance(Zone::Cyprus1).unwrap(), 1000);
    assert_eq!(wallet.get_outpoints(Zone::Cyprus1).len(), 1);

    // The change slot of the failed spend is handed out again.
    assert!(change_addresses(&wallet).is_empty());
    let failed_change = ledger
        .last_qi_transaction()
        .outputs
        .iter()
        .find(|output| output.address != to)
        .unwrap()
        .address;
    assert_eq!(
        wallet.get_next_change_address(0, Zone::Cyprus1).unwrap().address,
        failed_change
    );
}

#[tokio::test]
async fn test_rejected_broadcast_releases_outpoints() {
    let ledger = MockLedger::new();
    let wallet = qi_wallet(ALICE, &ledger);
    ledger.fund(external(&wallet, 0).address, 7);
    wallet.scan(Zone::Cyprus1, 0).await.unwrap();
    ledger.reject_broadcasts();

    let bob = QiHdWallet::from_phrase(BOB).unwrap();
    let to = bob.get_next_address(0, Zone::Cyprus1).unwrap().address;
    let result = wallet.send_transaction(&to, 100, Zone::Cyprus1, 0).await;
    assert!(matches!(result, Err(WalletError::NetworkError(_))));
    assert!(ledger.broadcasts.lock().is_empty());
    assert_eq!(wallet.balance(Zone::Cyprus1).unwrap(), 1000);
    assert_eq!(wallet.get_outpoints(Zone::Cyprus1).len(), 1);
    assert!(change_addresses(&wallet).is_empty());

    // A saved wallet does not carry the abandoned change address.
    let serialized = wallet.serialize().unwrap();
    assert!(serialized.addresses.iter().all(|a| !a.change));
}

#[tokio::test]
async fn test_payment_code_round_trip() {
    let ledger = MockLedger::new();
    let alice = qi_wallet(ALICE, &ledger);
    let bob = qi_wallet(BOB, &ledger);
    let alice_code = alice.payment_code(0).unwrap();
    let bob_code = bob.payment_code(0).unwrap();

    ledger.fund(external(&alice, 0).address, 7);
    alice.scan(Zone::Cyprus1, 0).await.unwrap();

    bob.open_channel(&alice_code, 0).unwrap();
    let expected = bob
        .get_next_receive_address(&alice_code, Zone::Cyprus1, 0)
        .unwrap();

    alice
        .send_to_payment_code(&bob_code, 250, Zone::Cyprus1, 0)
        .await
        .unwrap();
    let tx = ledger.last_qi_transaction();
    assert!(tx.outputs.iter().any(|output| output.address == expected));

    assert_eq!(bob.sync(Zone::Cyprus1, 0).await.unwrap(), 1);
    assert_eq!(bob.balance(Zone::Cyprus1).unwrap(), 250);

    // The channel key spends what arrived on the one-time address.
    let back = external(&alice, 0).address;
    bob.send_transaction(&back, 100, Zone::Cyprus1, 0).await.unwrap();
    let refund = ledger.last_qi_transaction();
    assert_eq!(refund.inputs.len(), 1);
    assert!(refund.verify_signature().is_ok());
}

#[test]
fn test_concurrent_leases_are_disjoint() {
    let ledger = MockLedger::new();
    let wallet = qi_wallet(ALICE, &ledger);
    let info = wallet.get_next_address(0, Zone::Cyprus1).unwrap();
    let coins: Vec<OutpointInfo> = (1..=4u8)
        .map(|n| OutpointInfo {
            outpoint: Outpoint {
                tx_hash: TxHash([n; 32]),
                index: 0,
            },
            denomination: 7,
            address: info.address,
            zone: Zone::Cyprus1,
            account: 0,
        })
        .collect();
    wallet.import_outpoints(coins).unwrap();

    let leases: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| wallet.lease_outpoints(Zone::Cyprus1, 0, 500)))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap().unwrap())
            .collect()
    });

    let mut seen = HashSet::new();
    for lease in &leases {
        assert_eq!(lease.outpoints().len(), 1);
        assert!(seen.insert(lease.outpoints()[0].outpoint));
    }
    assert!(matches!(
        wallet.lease_outpoints(Zone::Cyprus1, 0, 500),
        Err(WalletError::InsufficientFunds { .. })
    ));

    drop(leases);
    assert_eq!(wallet.get_outpoints(Zone::Cyprus1).len(), 4);
}

#[test]
fn test_concurrent_change_addresses_are_distinct() {
    let ledger = MockLedger::new();
    let wallet = qi_wallet(ALICE, &ledger);
    let barrier = Barrier::new(4);

    for _ in 0..5 {
        let infos: Vec<NeuteredAddressInfo> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        wallet.get_next_change_address(0, Zone::Cyprus1)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap().unwrap())
                .collect()
        });
        let addresses: HashSet<Address> = infos.iter().map(|info| info.address).collect();
        assert_eq!(addresses.len(), 4);
    }

    let registered = change_addresses(&wallet);
    assert_eq!(registered.len(), 20);
    let indices: HashSet<u32> = registered.iter().map(|info| info.index).collect();
    assert_eq!(indices.len(), 20);
}

#[tokio::test]
async fn test_quai_send_is_recoverable() {
    let ledger = MockLedger::new();
    let mut wallet = QuaiHdWallet::from_phrase(ALICE).unwrap();
    wallet.connect(ledger.clone());
    let from = wallet.get_next_address(0, Zone::Cyprus1).unwrap().address;
    let to = wallet.get_next_address(0, Zone::Cyprus1).unwrap().address;

    let request = QuaiTransactionRequest::new(9000, 0, from, Some(to), 1_000);
    let hash = wallet.send_transaction(&request).await.unwrap();

    let raw = ledger.broadcasts.lock().last().cloned().unwrap();
    let signed = SignedQuaiTransaction::from_raw(&raw).unwrap();
    assert!(signed.verify().is_ok());
    assert_eq!(hash, TxHash(keccak256(&raw)));

    let signature = wallet.sign_message(&from, b"hello quai").unwrap();
    let signer = crypto::recover_address(&crypto::hash_message(b"hello quai"), &signature).unwrap();
    assert_eq!(signer, from);
}

#[test]
fn test_tampered_file_is_rejected() {
    let wallet = HdWallet::from_phrase(ALICE, "m/44'/969'").unwrap();
    wallet.get_next_address(0, Zone::Cyprus1).unwrap();
    wallet.get_next_address(0, Zone::Paxos2).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wallet.json");
    wallet.save(&path).unwrap();
    let restored = HdWallet::load(&path).unwrap();
    assert!(restored.as_qi().is_some());
    assert_eq!(restored.core().address_map().len(), 2);

    let mut serialized = wallet.serialize().unwrap();
    serialized.addresses[0].address = serialized.addresses[1].address;
    assert!(matches!(
        HdWallet::deserialize(&serialized),
        Err(WalletError::Mismatch(_))
    ));

    let quai = QuaiHdWallet::from_phrase(ALICE).unwrap();
    assert!(matches!(
        QuaiHdWallet::deserialize(&wallet.serialize().unwrap()),
        Err(WalletError::InvalidCoinType(_))
    ));
    assert!(quai.serialize().is_ok());
}
