//! Denomination bookkeeping (C4, §4.4): tracks denoms, collaterals and
//! "other" PS coins keyed by `"<txid_hex>:<vout>"`, plus the caches derived
//! from them. Locks are always acquired in the fixed order
//! `denoms_lock < collateral_lock < others_lock` to avoid deadlock.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use rusty_shared_types::OutPoint;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenomCoin {
    pub outpoint: OutPoint,
    pub value: u64,
    pub address: String,
    pub rounds: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollateralCoin {
    pub outpoint: OutPoint,
    pub value: u64,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtherCoin {
    pub outpoint: OutPoint,
    pub value: u64,
    pub address: String,
}

struct DenomsState {
    denoms: HashMap<String, DenomCoin>,
    spent_denoms: HashMap<String, DenomCoin>,
    spending: HashSet<String>,
    amount_cache: u64,
    to_mix_cache: HashMap<String, DenomCoin>,
}

struct CollateralState {
    collaterals: HashMap<String, CollateralCoin>,
    spent_collaterals: HashMap<String, CollateralCoin>,
    spending: HashSet<String>,
}

struct OthersState {
    others: HashMap<String, OtherCoin>,
    spent_others: HashMap<String, OtherCoin>,
    reserved: HashMap<String, Uuid>,
}

pub struct PsDataStore {
    denoms_lock: Mutex<DenomsState>,
    collateral_lock: Mutex<CollateralState>,
    others_lock: Mutex<OthersState>,
    mix_rounds: AtomicU32,
}

impl PsDataStore {
    pub fn new(mix_rounds: u32) -> Self {
        Self {
            denoms_lock: Mutex::new(DenomsState {
                denoms: HashMap::new(),
                spent_denoms: HashMap::new(),
                spending: HashSet::new(),
                amount_cache: 0,
                to_mix_cache: HashMap::new(),
            }),
            collateral_lock: Mutex::new(CollateralState {
                collaterals: HashMap::new(),
                spent_collaterals: HashMap::new(),
                spending: HashSet::new(),
            }),
            others_lock: Mutex::new(OthersState { others: HashMap::new(), spent_others: HashMap::new(), reserved: HashMap::new() }),
            mix_rounds: AtomicU32::new(mix_rounds),
        }
    }

    // --- denoms ---

    pub fn add_denom(&self, coin: DenomCoin) {
        let mut state = self.denoms_lock.lock().unwrap();
        state.amount_cache += coin.value;
        let key = coin.outpoint.to_key();
        let rounds = self.mix_rounds.load(Ordering::Relaxed);
        if coin.rounds < rounds && !state.spending.contains(&key) {
            state.to_mix_cache.insert(key.clone(), coin.clone());
        }
        state.denoms.insert(key, coin);
    }

    pub fn spend_denom(&self, key: &str) -> Option<DenomCoin> {
        let mut state = self.denoms_lock.lock().unwrap();
        let coin = state.denoms.remove(key)?;
        state.amount_cache = state.amount_cache.saturating_sub(coin.value);
        state.to_mix_cache.remove(key);
        state.spending.remove(key);
        state.spent_denoms.insert(key.to_string(), coin.clone());
        Some(coin)
    }

    pub fn mark_spending_denom(&self, key: &str) -> bool {
        let mut state = self.denoms_lock.lock().unwrap();
        if !state.denoms.contains_key(key) {
            return false;
        }
        state.spending.insert(key.to_string());
        state.to_mix_cache.remove(key);
        true
    }

    pub fn unmark_spending_denom(&self, key: &str) {
        let rounds = self.mix_rounds.load(Ordering::Relaxed);
        let mut state = self.denoms_lock.lock().unwrap();
        state.spending.remove(key);
        if let Some(coin) = state.denoms.get(key) {
            if coin.rounds < rounds {
                let coin = coin.clone();
                state.to_mix_cache.insert(key.to_string(), coin);
            }
        }
    }

    pub fn is_spending_denom(&self, key: &str) -> bool {
        self.denoms_lock.lock().unwrap().spending.contains(key)
    }

    pub fn denoms_amount(&self) -> u64 {
        self.denoms_lock.lock().unwrap().amount_cache
    }

    pub fn denoms_to_mix(&self) -> Vec<DenomCoin> {
        self.denoms_lock.lock().unwrap().to_mix_cache.values().cloned().collect()
    }

    pub fn denoms_of_value(&self, value: u64) -> Vec<DenomCoin> {
        self.denoms_lock.lock().unwrap().to_mix_cache.values().filter(|c| c.value == value).cloned().collect()
    }

    pub fn denom_count(&self) -> usize {
        self.denoms_lock.lock().unwrap().denoms.len()
    }

    /// Count of tracked denoms with `rounds >= min_rounds` (§4.5 `calc_need_sign_cnt`).
    pub fn denom_count_min_rounds(&self, min_rounds: u32) -> usize {
        self.denoms_lock.lock().unwrap().denoms.values().filter(|c| c.rounds >= min_rounds).count()
    }

    pub fn collaterals_value(&self) -> u64 {
        self.collateral_lock.lock().unwrap().collaterals.values().map(|c| c.value).sum()
    }

    /// Must be called whenever `mix_rounds` changes (§4.4): fully recomputes
    /// `denoms_to_mix_cache` from scratch.
    pub fn set_mix_rounds(&self, rounds: u32) {
        self.mix_rounds.store(rounds, Ordering::Relaxed);
        let mut state = self.denoms_lock.lock().unwrap();
        state.to_mix_cache.clear();
        for (key, coin) in state.denoms.iter() {
            if coin.rounds < rounds && !state.spending.contains(key) {
                state.to_mix_cache.insert(key.clone(), coin.clone());
            }
        }
    }

    pub fn mix_rounds(&self) -> u32 {
        self.mix_rounds.load(Ordering::Relaxed)
    }

    /// Updates an existing denom's round counter (after a finalized
    /// denominate tx, §4.6.4) and keeps the derived cache in sync.
    pub fn bump_denom_rounds(&self, key: &str, new_rounds: u32) {
        let rounds_target = self.mix_rounds.load(Ordering::Relaxed);
        let mut state = self.denoms_lock.lock().unwrap();
        if let Some(coin) = state.denoms.get_mut(key) {
            coin.rounds = new_rounds;
            if new_rounds < rounds_target && !state.spending.contains(key) {
                let coin = coin.clone();
                state.to_mix_cache.insert(key.to_string(), coin);
            } else {
                state.to_mix_cache.remove(key);
            }
        }
    }

    // --- collaterals ---

    pub fn add_collateral(&self, coin: CollateralCoin) {
        let mut state = self.collateral_lock.lock().unwrap();
        state.collaterals.insert(coin.outpoint.to_key(), coin);
    }

    pub fn spend_collateral(&self, key: &str) -> Option<CollateralCoin> {
        let mut state = self.collateral_lock.lock().unwrap();
        let coin = state.collaterals.remove(key)?;
        state.spending.remove(key);
        state.spent_collaterals.insert(key.to_string(), coin.clone());
        Some(coin)
    }

    pub fn pick_confirmed_collateral(&self) -> Option<CollateralCoin> {
        let state = self.collateral_lock.lock().unwrap();
        state.collaterals.iter().find(|(key, _)| !state.spending.contains(*key)).map(|(_, c)| c.clone())
    }

    pub fn mark_spending_collateral(&self, key: &str) -> bool {
        let mut state = self.collateral_lock.lock().unwrap();
        if !state.collaterals.contains_key(key) {
            return false;
        }
        state.spending.insert(key.to_string());
        true
    }

    pub fn unmark_spending_collateral(&self, key: &str) {
        self.collateral_lock.lock().unwrap().spending.remove(key);
    }

    pub fn has_confirmed_collateral(&self) -> bool {
        let state = self.collateral_lock.lock().unwrap();
        state.collaterals.keys().any(|k| !state.spending.contains(k))
    }

    // --- others ---

    pub fn add_other(&self, coin: OtherCoin) {
        let mut state = self.others_lock.lock().unwrap();
        state.others.insert(coin.outpoint.to_key(), coin);
    }

    pub fn spend_other(&self, key: &str) -> Option<OtherCoin> {
        let mut state = self.others_lock.lock().unwrap();
        let coin = state.others.remove(key)?;
        state.spent_others.insert(key.to_string(), coin.clone());
        Some(coin)
    }

    pub fn reserve_address(&self, address: &str, tag: Uuid) {
        self.others_lock.lock().unwrap().reserved.insert(address.to_string(), tag);
    }

    pub fn release_reserved(&self, tag: Uuid) -> Vec<String> {
        let mut state = self.others_lock.lock().unwrap();
        let released: Vec<String> = state.reserved.iter().filter(|(_, t)| **t == tag).map(|(a, _)| a.clone()).collect();
        for addr in &released {
            state.reserved.remove(addr);
        }
        released
    }

    pub fn is_reserved(&self, address: &str) -> bool {
        self.others_lock.lock().unwrap().reserved.contains_key(address)
    }

    /// Acquires all three locks in the fixed order and holds them for the
    /// duration of `f`, for callers that need a consistent cross-bucket
    /// snapshot (e.g. the broadcast-time double-spend/PS-address guard, §8
    /// S7). `f` only sees the read-only [`LockedView`]; it must not call back
    /// into any other `PsDataStore` method, which would deadlock on these
    /// same locks.
    pub fn with_all_locked<R>(&self, f: impl FnOnce(&LockedView) -> R) -> R {
        let denoms = self.denoms_lock.lock().unwrap();
        let collateral = self.collateral_lock.lock().unwrap();
        let others = self.others_lock.lock().unwrap();
        f(&LockedView { denoms: &denoms, collateral: &collateral, others: &others })
    }
}

/// Read-only view across all three buckets, held locked for the lifetime of
/// a [`PsDataStore::with_all_locked`] call.
pub struct LockedView<'a> {
    denoms: &'a DenomsState,
    collateral: &'a CollateralState,
    others: &'a OthersState,
}

impl<'a> LockedView<'a> {
    pub fn is_spending_denom(&self, key: &str) -> bool {
        self.denoms.spending.contains(key)
    }

    pub fn is_spending_collateral(&self, key: &str) -> bool {
        self.collateral.spending.contains(key)
    }

    pub fn is_reserved(&self, address: &str) -> bool {
        self.others.reserved.contains_key(address)
    }

    pub fn reserved_addresses(&self) -> Vec<String> {
        self.others.reserved.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coin(byte: u8, value: u64, rounds: u32) -> DenomCoin {
        DenomCoin { outpoint: OutPoint::new([byte; 32], 0), value, address: format!("addr{byte}"), rounds }
    }

    #[test]
    fn denoms_to_mix_excludes_fully_mixed_and_spending() {
        let store = PsDataStore::new(4);
        store.add_denom(coin(1, 100_001, 0));
        store.add_denom(coin(2, 100_001, 4));
        assert_eq!(store.denoms_to_mix().len(), 1);

        let key = OutPoint::new([1u8; 32], 0).to_key();
        store.mark_spending_denom(&key);
        assert_eq!(store.denoms_to_mix().len(), 0);

        store.unmark_spending_denom(&key);
        assert_eq!(store.denoms_to_mix().len(), 1);
    }

    #[test]
    fn set_mix_rounds_recomputes_cache() {
        let store = PsDataStore::new(2);
        store.add_denom(coin(1, 100_001, 3));
        assert_eq!(store.denoms_to_mix().len(), 0);
        store.set_mix_rounds(5);
        assert_eq!(store.denoms_to_mix().len(), 1);
    }

    #[test]
    fn with_all_locked_sees_a_consistent_snapshot_across_buckets() {
        let store = PsDataStore::new(4);
        store.add_denom(coin(1, 100_001, 0));
        store.mark_spending_denom(&OutPoint::new([1u8; 32], 0).to_key());
        store.add_collateral(CollateralCoin { outpoint: OutPoint::new([2u8; 32], 0), value: 30_000, address: "c".into() });
        store.mark_spending_collateral(&OutPoint::new([2u8; 32], 0).to_key());
        store.reserve_address("addr-x", Uuid::new_v4());

        let (spending_denom, spending_collateral, reserved) = store.with_all_locked(|view| {
            (
                view.is_spending_denom(&OutPoint::new([1u8; 32], 0).to_key()),
                view.is_spending_collateral(&OutPoint::new([2u8; 32], 0).to_key()),
                view.is_reserved("addr-x"),
            )
        });
        assert!(spending_denom);
        assert!(spending_collateral);
        assert!(reserved);
    }

    #[test]
    fn amount_cache_tracks_spends() {
        let store = PsDataStore::new(4);
        store.add_denom(coin(1, 100_001, 0));
        store.add_denom(coin(2, 1_000_010, 0));
        assert_eq!(store.denoms_amount(), 1_100_011);
        store.spend_denom(&OutPoint::new([1u8; 32], 0).to_key());
        assert_eq!(store.denoms_amount(), 1_000_010);
    }
}
