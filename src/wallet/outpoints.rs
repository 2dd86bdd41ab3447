//! Per-zone pool of unspent outpoints
//!
//! Each zone has its own lock, so selections in one zone never wait on
//! another. An outpoint is either available or leased, never both. Leases
//! put their outpoints back on drop unless committed.

use crate::address::Address;
use crate::config::FeePolicy;
use crate::error::WalletError;
use crate::transaction::{Outpoint, OutpointInfo};
use crate::zone::Zone;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct ZonePool {
    available: BTreeMap<Outpoint, OutpointInfo>,
    leased: BTreeMap<Outpoint, OutpointInfo>,
}

impl ZonePool {
    fn contains(&self, outpoint: &Outpoint) -> bool {
        self.available.contains_key(outpoint) || self.leased.contains_key(outpoint)
    }
}

#[derive(Debug)]
pub struct OutpointPool {
    zones: HashMap<Zone, Arc<Mutex<ZonePool>>>,
}

impl Default for OutpointPool {
    fn default() -> Self {
        Self::new()
    }
}

impl OutpointPool {
    pub fn new() -> Self {
        let zones = Zone::ALL
            .iter()
            .map(|zone| (*zone, Arc::new(Mutex::new(ZonePool::default()))))
            .collect();
        OutpointPool { zones }
    }

    fn zone(&self, zone: Zone) -> Result<&Arc<Mutex<ZonePool>>, WalletError> {
        self.zones
            .get(&zone)
            .ok_or_else(|| WalletError::InvalidZone(zone.to_string()))
    }

    /// Adds outpoints to the available sets. The whole batch is rejected if
    /// any outpoint is already known or has an invalid denomination.
    pub fn import(&self, outpoints: Vec<OutpointInfo>) -> Result<usize, WalletError> {
        let mut by_zone: HashMap<Zone, Vec<OutpointInfo>> = HashMap::new();
        let mut seen = HashSet::new();
        for info in outpoints {
            info.value()?;
            if !seen.insert(info.outpoint) {
                return Err(WalletError::InvalidArgument(format!(
                    "Outpoint {} appears twice in the import",
                    info.outpoint
                )));
            }
            by_zone.entry(info.zone).or_default().push(info);
        }

        // Hold every affected zone lock so the check and the insert are atomic.
        let mut zones: Vec<Zone> = by_zone.keys().copied().collect();
        zones.sort();
        let handles = zones
            .iter()
            .map(|zone| self.zone(*zone))
            .collect::<Result<Vec<_>, _>>()?;
        let mut guards: Vec<_> = handles.iter().map(|handle| handle.lock()).collect();

        for (zone, guard) in zones.iter().zip(guards.iter()) {
            for info in &by_zone[zone] {
                if guard.contains(&info.outpoint) {
                    return Err(WalletError::InvalidArgument(format!(
                        "Outpoint {} is already imported",
                        info.outpoint
                    )));
                }
            }
        }

        let mut imported = 0;
        for (zone, guard) in zones.iter().zip(guards.iter_mut()) {
            for info in by_zone.remove(zone).unwrap_or_default() {
                guard.available.insert(info.outpoint, info);
                imported += 1;
            }
        }
        Ok(imported)
    }

    /// Replaces the available outpoints of `address` with `fresh`, keeping
    /// anything currently leased untouched. Returns how many were added.
    pub fn reconcile(
        &self,
        zone: Zone,
        address: &Address,
        fresh: Vec<OutpointInfo>,
    ) -> Result<usize, WalletError> {
        for info in &fresh {
            info.value()?;
        }
        let mut pool = self.zone(zone)?.lock();
        let keep: HashSet<Outpoint> = fresh.iter().map(|info| info.outpoint).collect();
        pool.available
            .retain(|outpoint, info| info.address != *address || keep.contains(outpoint));

        let mut added = 0;
        for info in fresh {
            if !pool.contains(&info.outpoint) {
                pool.available.insert(info.outpoint, info);
                added += 1;
            }
        }
        Ok(added)
    }

    pub fn available(&self, zone: Zone) -> Vec<OutpointInfo> {
        self.zones
            .get(&zone)
            .map(|pool| pool.lock().available.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn leased(&self, zone: Zone) -> Vec<OutpointInfo> {
        self.zones
            .get(&zone)
            .map(|pool| pool.lock().leased.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Every known outpoint, available or leased.
    pub fn all(&self) -> Vec<OutpointInfo> {
        let mut out = Vec::new();
        for zone in Zone::ALL {
            if let Some(pool) = self.zones.get(&zone) {
                let pool = pool.lock();
                out.extend(pool.available.values().cloned());
                out.extend(pool.leased.values().cloned());
            }
        }
        out
    }

    /// Spendable value in `zone`, optionally restricted to one account.
    pub fn balance(&self, zone: Zone, account: Option<u32>) -> Result<u64, WalletError> {
        let pool = self.zone(zone)?.lock();
        pool.available
            .values()
            .filter(|info| account.map_or(true, |a| info.account == a))
            .try_fold(0u64, |acc, info| Ok(acc.saturating_add(info.value()?)))
    }

    /// Selects the fewest outpoints covering `amount` plus fee and moves them
    /// to the leased set.
    ///
    /// Outpoints are taken largest denomination first until the running total
    /// reaches `amount + fee(n)`.
    pub fn lease(
        &self,
        zone: Zone,
        account: Option<u32>,
        amount: u64,
        fees: &FeePolicy,
    ) -> Result<OutpointLease, WalletError> {
        if amount == 0 {
            return Err(WalletError::InvalidArgument(
                "Amount must be greater than zero".to_string(),
            ));
        }
        let handle = Arc::clone(self.zone(zone)?);
        let mut pool = handle.lock();

        let mut candidates: Vec<(u64, OutpointInfo)> = pool
            .available
            .values()
            .filter(|info| account.map_or(true, |a| info.account == a))
            .map(|info| Ok((info.value()?, info.clone())))
            .collect::<Result<_, WalletError>>()?;
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.outpoint.cmp(&b.1.outpoint)));

        let mut selected = Vec::new();
        let mut total = 0u64;
        for (value, info) in &candidates {
            selected.push(info.clone());
            total = total.saturating_add(*value);
            if total >= amount.saturating_add(fees.fee_for(selected.len())) {
                break;
            }
        }

        let fee = fees.fee_for(selected.len());
        let required = amount.saturating_add(fee);
        if total < required {
            return Err(WalletError::InsufficientFunds {
                required,
                available: total,
                shortfall: required - total,
            });
        }

        for info in &selected {
            pool.available.remove(&info.outpoint);
            pool.leased.insert(info.outpoint, info.clone());
        }
        drop(pool);
        debug!(zone = %zone, inputs = selected.len(), total, fee, "leased outpoints");

        Ok(OutpointLease {
            zone,
            pool: handle,
            outpoints: selected,
            total,
            fee,
            committed: false,
        })
    }
}

/// Outpoints reserved for one spend.
///
/// Dropping the lease returns them to the available set; `commit` removes
/// them for good once the spending transaction is confirmed.
#[derive(Debug)]
pub struct OutpointLease {
    zone: Zone,
    pool: Arc<Mutex<ZonePool>>,
    outpoints: Vec<OutpointInfo>,
    total: u64,
    fee: u64,
    committed: bool,
}

impl OutpointLease {
    pub fn zone(&self) -> Zone {
        self.zone
    }

    pub fn outpoints(&self) -> &[OutpointInfo] {
        &self.outpoints
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn fee(&self) -> u64 {
        self.fee
    }

    /// Value left over after paying `amount` and the fee.
    pub fn change(&self, amount: u64) -> u64 {
        self.total.saturating_sub(amount).saturating_sub(self.fee)
    }

    /// Marks the outpoints spent.
    pub fn commit(mut self) {
        let mut pool = self.pool.lock();
        for info in &self.outpoints {
            pool.leased.remove(&info.outpoint);
        }
        self.committed = true;
    }

    pub fn release(self) {}
}

impl Drop for OutpointLease {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut pool = self.pool.lock();
        for info in self.outpoints.drain(..) {
            if pool.leased.remove(&info.outpoint).is_some() {
                pool.available.insert(info.outpoint, info);
            }
        }
        debug!(zone = %self.zone, "released leased outpoints");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TxHash;

    fn coin(n: u8, denomination: u8, zone: Zone) -> OutpointInfo {
        OutpointInfo {
            outpoint: Outpoint {
                tx_hash: TxHash([n; 32]),
                index: 0,
            },
            denomination,
            address: Address::from_bytes([n; 20]),
            zone,
            account: 0,
        }
    }

    fn no_fee() -> FeePolicy {
        FeePolicy {
            base: 0,
            per_input: 0,
        }
    }

    #[test]
    fn test_fewest_coins_selection() {
        let pool = OutpointPool::new();
        // 1000, 100, 100, 10
        pool.import(vec![
            coin(1, 7, Zone::Cyprus1),
            coin(2, 4, Zone::Cyprus1),
            coin(3, 4, Zone::Cyprus1),
            coin(4, 2, Zone::Cyprus1),
        ])
        .unwrap();

        let lease = pool.lease(Zone::Cyprus1, None, 1050, &no_fee()).unwrap();
        let values: Vec<u8> = lease.outpoints().iter().map(|o| o.denomination).collect();
        assert_eq!(values, vec![7, 4]);
        assert_eq!(lease.total(), 1100);
        assert_eq!(lease.change(1050), 50);
        assert_eq!(pool.available(Zone::Cyprus1).len(), 2);
        assert_eq!(pool.leased(Zone::Cyprus1).len(), 2);
    }

    #[test]
    fn test_fee_counts_inputs() {
        let pool = OutpointPool::new();
        pool.import(vec![coin(1, 4, Zone::Cyprus1), coin(2, 4, Zone::Cyprus1)])
            .unwrap();
        let fees = FeePolicy {
            base: 10,
            per_input: 5,
        };
        // 100 < 90 + 15 forces a second input: 200 >= 90 + 20
        let lease = pool.lease(Zone::Cyprus1, None, 90, &fees).unwrap();
        assert_eq!(lease.outpoints().len(), 2);
        assert_eq!(lease.fee(), 20);
    }

    #[test]
    fn test_insufficient_funds_names_shortfall() {
        let pool = OutpointPool::new();
        pool.import(vec![coin(1, 4, Zone::Cyprus1), coin(2, 2, Zone::Cyprus1)])
            .unwrap();
        let fees = FeePolicy {
            base: 10,
            per_input: 5,
        };
        let err = pool.lease(Zone::Cyprus1, None, 500, &fees).unwrap_err();
        assert_eq!(
            err,
            WalletError::InsufficientFunds {
                required: 520,
                available: 110,
                shortfall: 410
            }
        );
        // Nothing was moved
        assert_eq!(pool.available(Zone::Cyprus1).len(), 2);
    }

    #[test]
    fn test_drop_releases_and_commit_spends() {
        let pool = OutpointPool::new();
        pool.import(vec![coin(1, 4, Zone::Cyprus1), coin(2, 4, Zone::Cyprus1)])
            .unwrap();

        {
            let _lease = pool.lease(Zone::Cyprus1, None, 150, &no_fee()).unwrap();
            assert_eq!(pool.balance(Zone::Cyprus1, None).unwrap(), 0);
        }
        assert_eq!(pool.balance(Zone::Cyprus1, None).unwrap(), 200);

        let lease = pool.lease(Zone::Cyprus1, None, 50, &no_fee()).unwrap();
        lease.commit();
        assert_eq!(pool.balance(Zone::Cyprus1, None).unwrap(), 100);
        assert!(pool.leased(Zone::Cyprus1).is_empty());
        assert_eq!(pool.all().len(), 1);
    }

    #[test]
    fn test_import_rejects_duplicates_atomically() {
        let pool = OutpointPool::new();
        pool.import(vec![coin(1, 4, Zone::Cyprus1)]).unwrap();
        let result = pool.import(vec![coin(2, 4, Zone::Paxos1), coin(1, 4, Zone::Cyprus1)]);
        assert!(result.is_err());
        assert!(pool.available(Zone::Paxos1).is_empty());
        assert!(pool
            .import(vec![coin(3, 4, Zone::Cyprus1), coin(3, 4, Zone::Cyprus1)])
            .is_err());
        assert!(pool.import(vec![coin(4, 200, Zone::Cyprus1)]).is_err());
    }

    #[test]
    fn test_zones_are_independent() {
        let pool = OutpointPool::new();
        pool.import(vec![coin(1, 4, Zone::Cyprus1)]).unwrap();
        assert!(matches!(
            pool.lease(Zone::Paxos1, None, 10, &no_fee()),
            Err(WalletError::InsufficientFunds { .. })
        ));
        assert!(pool.lease(Zone::Cyprus1, None, 10, &no_fee()).is_ok());
    }

    #[test]
    fn test_reconcile_keeps_leased() {
        let pool = OutpointPool::new();
        let address = Address::from_bytes([1; 20]);
        pool.import(vec![coin(1, 4, Zone::Cyprus1)]).unwrap();
        let lease = pool.lease(Zone::Cyprus1, None, 10, &no_fee()).unwrap();

        let mut fresh = coin(9, 5, Zone::Cyprus1);
        fresh.address = address;
        let added = pool
            .reconcile(Zone::Cyprus1, &address, vec![coin(1, 4, Zone::Cyprus1), fresh])
            .unwrap();
        assert_eq!(added, 1);
        drop(lease);
        assert_eq!(pool.available(Zone::Cyprus1).len(), 2);
    }
}
