//! PS-data discovery (C9, §4.9): classifies incoming transactions into
//! PrivateSend categories and feeds the denomination store (C4) until a
//! pass over the wallet's transaction history finds nothing new to classify.

use std::collections::HashSet;

use rusty_shared_types::denom::{is_create_collateral_val, is_denom_val, COLLATERAL_VAL};
use rusty_shared_types::{Hash, PsTxType, Transaction};

use crate::denom_store::{CollateralCoin, DenomCoin, OtherCoin, PsDataStore};
use crate::error::{MixingError, MixingResult};

/// Classifies one transaction given which of its own outputs belong to this
/// wallet (`owned_outputs`, by vout index) and whether each input spends a
/// coin this store already recognises as a denom or collateral.
///
/// Rules, in priority order (§4.9):
/// - All owned outputs share one denom value, and at least one input spends
///   a tracked denom -> [`PsTxType::Denominate`].
/// - Exactly one owned output, zero value or non-denom, and the spent input
///   was a tracked collateral -> [`PsTxType::PayCollateral`].
/// - One owned output is a `CREATE_COLLATERAL_VAL`-bucket value and no input
///   spent a tracked denom -> [`PsTxType::NewCollateral`].
/// - Two or more owned outputs are denom values, none of the spent inputs
///   were denoms -> [`PsTxType::NewDenoms`].
/// - Any input spends a tracked denom but the outputs don't fit the above
///   -> [`PsTxType::SpendPsCoins`] (cashing mixed coins back out).
/// - Otherwise, if any owned output is a denom/collateral value on its own
///   -> [`PsTxType::OtherPsCoins`].
/// - Otherwise -> [`PsTxType::PrivateSend`], a catch-all for everything else
///   touching PS-tagged addresses (counted, not bucketed further).
pub fn classify(tx: &Transaction, owned_outputs: &[usize], spent_denom_inputs: bool, spent_collateral_inputs: bool) -> PsTxType {
    let outputs = tx.outputs();
    let owned_values: Vec<u64> = owned_outputs.iter().filter_map(|&i| outputs.get(i)).map(|o| o.value).collect();

    if !owned_values.is_empty() && owned_values.iter().all(|&v| is_denom_val(v)) {
        let all_same = owned_values.windows(2).all(|w| w[0] == w[1]);
        if all_same && spent_denom_inputs {
            return PsTxType::Denominate;
        }
        if owned_values.len() >= 2 && !spent_denom_inputs {
            return PsTxType::NewDenoms;
        }
    }

    if owned_values.len() == 1 && spent_collateral_inputs && !is_denom_val(owned_values[0]) {
        return PsTxType::PayCollateral;
    }

    if owned_values.iter().any(|&v| is_create_collateral_val(v)) && !spent_denom_inputs {
        return PsTxType::NewCollateral;
    }

    if spent_denom_inputs {
        return PsTxType::SpendPsCoins;
    }

    if owned_values.iter().any(|&v| is_denom_val(v) || is_create_collateral_val(v) || v == COLLATERAL_VAL) {
        return PsTxType::OtherPsCoins;
    }

    PsTxType::PrivateSend
}

/// One pass over a batch of candidate transactions: classifies each,
/// records the result into the store, and returns how many were newly
/// classified (transactions already known are skipped). A fixed-point scan
/// repeatedly calls this with the same or a growing candidate set until it
/// returns zero (§4.9 S5: "found=86 then 0").
pub struct Discovery {
    seen: HashSet<Hash>,
}

impl Default for Discovery {
    fn default() -> Self {
        Self::new()
    }
}

impl Discovery {
    pub fn new() -> Self {
        Self { seen: HashSet::new() }
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Classifies and records one transaction. Returns `Ok(None)` if this
    /// txid was already processed in a prior pass.
    ///
    /// `spent_denom_rounds` carries the round counter of the tracked denom
    /// input(s) this tx spent (the weakest, i.e. lowest, if more than one),
    /// or `None` if it spent no tracked denom. A `Denominate` output
    /// inherits `spent_denom_rounds + 1`, matching the round bump the
    /// denominate workflow itself applies (§4.6.4); a `NewDenoms` output is
    /// freshly created and always starts at round 0.
    pub fn process(
        &mut self,
        store: &PsDataStore,
        tx: &Transaction,
        owned_outputs: &[(usize, String)],
        spent_denom_rounds: Option<u32>,
        spent_collateral_inputs: bool,
    ) -> MixingResult<Option<PsTxType>> {
        let txid = tx.txid();
        if !self.seen.insert(txid) {
            return Ok(None);
        }

        let indices: Vec<usize> = owned_outputs.iter().map(|(i, _)| *i).collect();
        let tx_type = classify(tx, &indices, spent_denom_rounds.is_some(), spent_collateral_inputs);

        for &(index, ref address) in owned_outputs {
            let output = tx.outputs().get(index).ok_or_else(|| {
                MixingError::AddPsDataError(format!("output index {index} out of range for {}", hex::encode(txid)))
            })?;
            let outpoint = rusty_shared_types::OutPoint::new(txid, index as u32);
            match tx_type {
                PsTxType::Denominate => {
                    let rounds = spent_denom_rounds.unwrap_or(0) + 1;
                    store.add_denom(DenomCoin { outpoint, value: output.value, address: address.clone(), rounds });
                }
                PsTxType::NewDenoms => {
                    store.add_denom(DenomCoin { outpoint, value: output.value, address: address.clone(), rounds: 0 });
                }
                PsTxType::NewCollateral => {
                    store.add_collateral(CollateralCoin { outpoint, value: output.value, address: address.clone() });
                }
                PsTxType::OtherPsCoins | PsTxType::PrivateSend => {
                    store.add_other(OtherCoin { outpoint, value: output.value, address: address.clone() });
                }
                PsTxType::PayCollateral | PsTxType::SpendPsCoins => {}
            }
        }

        Ok(Some(tx_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusty_shared_types::{OutPoint, TxInput, TxOutput};

    fn tx(outputs: Vec<TxOutput>) -> Transaction {
        Transaction::Standard { version: 1, inputs: vec![TxInput::unsigned(OutPoint::new([1u8; 32], 0))], outputs, lock_time: 0 }
    }

    #[test]
    fn same_value_denom_outputs_spent_from_denoms_is_denominate() {
        let t = tx(vec![TxOutput::new(100_001, vec![]), TxOutput::new(100_001, vec![])]);
        assert_eq!(classify(&t, &[0, 1], true, false), PsTxType::Denominate);
    }

    #[test]
    fn multiple_denom_values_from_regular_funds_is_new_denoms() {
        let t = tx(vec![TxOutput::new(100_001, vec![]), TxOutput::new(1_000_010, vec![])]);
        assert_eq!(classify(&t, &[0, 1], false, false), PsTxType::NewDenoms);
    }

    #[test]
    fn create_collateral_output_is_new_collateral() {
        let t = tx(vec![TxOutput::new(40_000, vec![])]);
        assert_eq!(classify(&t, &[0], false, false), PsTxType::NewCollateral);
    }

    #[test]
    fn op_return_after_spending_collateral_is_pay_collateral() {
        let t = tx(vec![TxOutput::op_return()]);
        assert_eq!(classify(&t, &[0], false, true), PsTxType::PayCollateral);
    }

    #[test]
    fn spending_a_denom_to_something_else_is_spend_ps_coins() {
        let t = tx(vec![TxOutput::new(5_000_000, vec![])]);
        assert_eq!(classify(&t, &[0], true, false), PsTxType::SpendPsCoins);
    }

    #[test]
    fn reprocessing_the_same_tx_is_a_no_op_second_pass() {
        let store = PsDataStore::new(4);
        let mut discovery = Discovery::new();
        let t = tx(vec![TxOutput::new(100_001, vec![])]);
        let first = discovery.process(&store, &t, &[(0, "addr".into())], None, false).unwrap();
        assert!(first.is_some());
        let second = discovery.process(&store, &t, &[(0, "addr".into())], None, false).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn denominate_output_inherits_parent_round_plus_one() {
        let store = PsDataStore::new(4);
        let mut discovery = Discovery::new();
        let t = tx(vec![TxOutput::new(100_001, vec![]), TxOutput::new(100_001, vec![])]);
        let owned = vec![(0usize, "a".to_string()), (1usize, "b".to_string())];
        let tx_type = discovery.process(&store, &t, &owned, Some(2), false).unwrap();
        assert_eq!(tx_type, Some(PsTxType::Denominate));
        assert_eq!(store.denom_count_min_rounds(3), 2);
    }

    #[test]
    fn new_denoms_output_always_starts_at_round_zero() {
        let store = PsDataStore::new(4);
        let mut discovery = Discovery::new();
        let t = tx(vec![TxOutput::new(100_001, vec![]), TxOutput::new(1_000_010, vec![])]);
        let owned = vec![(0usize, "a".to_string()), (1usize, "b".to_string())];
        discovery.process(&store, &t, &owned, None, false).unwrap();
        assert_eq!(store.denom_count_min_rounds(0), 2);
        assert_eq!(store.denom_count_min_rounds(1), 0);
    }
}
