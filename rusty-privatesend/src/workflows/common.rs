//! Shared workflow machinery (§4.6): UUID allocation, broadcast/retry state,
//! and forcible cleanup.

use std::time::{Duration, Instant};

use rusty_shared_types::{Hash, OutPoint, Transaction};
use uuid::Uuid;

use crate::denom_store::PsDataStore;

pub const BROADCAST_RETRY_BACKOFF: Duration = Duration::from_secs(10);

/// Per-transaction broadcast bookkeeping (§4.6.5).
#[derive(Debug, Clone)]
pub struct PsTxData {
    pub tx: Transaction,
    pub sent_at: Option<Instant>,
    pub next_send_at: Option<Instant>,
}

impl PsTxData {
    pub fn new(tx: Transaction) -> Self {
        Self { tx, sent_at: None, next_send_at: None }
    }

    pub fn should_send(&self, now: Instant) -> bool {
        self.sent_at.is_none() && self.next_send_at.map(|t| t <= now).unwrap_or(true)
    }

    pub fn mark_sent(&mut self, now: Instant) {
        self.sent_at = Some(now);
    }

    pub fn mark_broadcast_failed(&mut self, now: Instant) {
        self.next_send_at = Some(now + BROADCAST_RETRY_BACKOFF);
    }
}

/// Common bookkeeping every workflow kind embeds: its identity, the
/// addresses it reserved, the outpoints it moved into a "spending" state,
/// and the ordered list of transactions it has produced so far.
pub struct WorkflowState {
    pub uuid: Uuid,
    pub completed: bool,
    pub reserved_addresses: Vec<String>,
    pub spending_denoms: Vec<String>,
    pub spending_collaterals: Vec<String>,
    pub tx_order: Vec<Hash>,
    pub txs: std::collections::HashMap<Hash, PsTxData>,
}

impl WorkflowState {
    pub fn new() -> Self {
        Self {
            uuid: Uuid::new_v4(),
            completed: false,
            reserved_addresses: Vec::new(),
            spending_denoms: Vec::new(),
            spending_collaterals: Vec::new(),
            tx_order: Vec::new(),
            txs: std::collections::HashMap::new(),
        }
    }

    pub fn push_tx(&mut self, tx: Transaction) -> Hash {
        let txid = tx.txid();
        self.tx_order.push(txid);
        self.txs.insert(txid, PsTxData::new(tx));
        txid
    }

    /// Candidate for the manager's continuous broadcast loop: the next
    /// unsent tx, skipping anything the wallet already sees unverified on
    /// the network (§4.6.5).
    pub fn next_to_send(&self, now: Instant, unverified: &std::collections::HashSet<Hash>) -> Option<Hash> {
        self.tx_order.iter().copied().find(|txid| {
            if unverified.contains(txid) {
                return false;
            }
            self.txs.get(txid).map(|d| d.should_send(now)).unwrap_or(false)
        })
    }

    /// `cleanup(force)` (§4.6.6): a no-op on a completed workflow with a
    /// non-empty order unless forced; otherwise unwinds everything this
    /// workflow reserved, in reverse tx order.
    pub fn cleanup(
        &mut self,
        force: bool,
        store: &PsDataStore,
        wallet: &dyn rusty_wallet::AddressSource,
        mut remove_local_tx: impl FnMut(&Hash),
    ) {
        if !force && self.completed && !self.tx_order.is_empty() {
            return;
        }
        for txid in self.tx_order.iter().rev() {
            remove_local_tx(txid);
            self.txs.remove(txid);
        }
        self.tx_order.clear();
        for key in self.spending_denoms.drain(..) {
            store.unmark_spending_denom(&key);
        }
        for key in self.spending_collaterals.drain(..) {
            store.unmark_spending_collateral(&key);
        }
        wallet.release_addresses(self.uuid);
        self.reserved_addresses.clear();
    }
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self::new()
    }
}

/// Reserves a denom's outpoint for spending by this workflow, recording it
/// so `cleanup` can roll the reservation back.
pub fn reserve_denom_spend(state: &mut WorkflowState, store: &PsDataStore, outpoint: &OutPoint) -> bool {
    let key = outpoint.to_key();
    if store.mark_spending_denom(&key) {
        state.spending_denoms.push(key);
        true
    } else {
        false
    }
}

pub fn reserve_collateral_spend(state: &mut WorkflowState, store: &PsDataStore, outpoint: &OutPoint) -> bool {
    let key = outpoint.to_key();
    if store.mark_spending_collateral(&key) {
        state.spending_collaterals.push(key);
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_send_respects_backoff() {
        let mut data = PsTxData::new(Transaction::Standard { version: 1, inputs: vec![], outputs: vec![], lock_time: 0 });
        let now = Instant::now();
        assert!(data.should_send(now));
        data.mark_broadcast_failed(now);
        assert!(!data.should_send(now));
        assert!(data.should_send(now + BROADCAST_RETRY_BACKOFF + Duration::from_millis(1)));
    }

    #[test]
    fn sent_tx_is_never_resent() {
        let mut data = PsTxData::new(Transaction::Standard { version: 1, inputs: vec![], outputs: vec![], lock_time: 0 });
        let now = Instant::now();
        data.mark_sent(now);
        assert!(!data.should_send(now + Duration::from_secs(3600)));
    }
}
