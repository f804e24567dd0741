//! New-denoms workflow (§4.6.3): turns one funding coin into a chain of
//! denom-making transactions, each output reserved under the workflow UUID.

use rusty_shared_types::denom::{CREATE_COLLATERAL_VAL, LADDER};
use rusty_shared_types::{Hash, OutPoint, Transaction, TxInput, TxOutput};
use rusty_wallet::{AddressSource, KeyBucket};

use crate::error::{MixingError, MixingResult};
use crate::fees::estimate_tx_fee;

use super::common::WorkflowState;

/// Maximum same-value denom outputs per tx (§4.9 NEW_DENOMS pattern rule).
const MAX_SAME_VALUE_REPEATS: usize = 11;

/// Greedy ladder-ascending plan: within each chained tx, add as many copies
/// of the smallest ladder value as fit (up to the repeat cap), then the next
/// size up, and so on, until the target is exhausted or funds run out. The
/// first tx additionally seeds one `CREATE_COLLATERAL_VAL` output.
pub fn plan_new_denoms_amounts(target: u64) -> Vec<Vec<u64>> {
    let mut remaining = target;
    let mut txs = Vec::new();
    let mut first = true;

    while remaining > 0 {
        let mut outputs = Vec::new();
        if first {
            if remaining < CREATE_COLLATERAL_VAL {
                break;
            }
            outputs.push(CREATE_COLLATERAL_VAL);
            remaining -= CREATE_COLLATERAL_VAL;
        }

        let mut produced_any = false;
        for &denom in LADDER.iter().rev() {
            let mut count = 0;
            while count < MAX_SAME_VALUE_REPEATS && remaining >= denom {
                outputs.push(denom);
                remaining -= denom;
                count += 1;
                produced_any = true;
            }
        }

        if outputs.is_empty() || (!produced_any && first) {
            break;
        }
        txs.push(outputs);
        first = false;
        if !produced_any {
            break;
        }
    }
    txs
}

pub struct NewDenomsWorkflow {
    pub state: WorkflowState,
}

impl NewDenomsWorkflow {
    pub fn start(wallet: &dyn AddressSource, funding: OutPoint, funding_value: u64, target: u64) -> MixingResult<Self> {
        let plan = plan_new_denoms_amounts(target.min(funding_value));
        if plan.is_empty() {
            return Err(MixingError::NotEnoughFunds);
        }

        let mut state = WorkflowState::new();
        let mut current_input = TxInput::unsigned(funding);
        let mut available = funding_value;
        let mut last_txid: Option<Hash> = None;

        for (tx_index, plan_outputs) in plan.iter().enumerate() {
            let mut outputs = Vec::new();
            let mut tx_total = 0u64;
            for &value in plan_outputs {
                let bucket = if tx_index == 0 && value == CREATE_COLLATERAL_VAL && outputs.is_empty() {
                    KeyBucket::PsSpendable
                } else {
                    KeyBucket::PsCoins
                };
                let address = wallet.reserve_address(bucket, state.uuid)?;
                state.reserved_addresses.push(address.clone());
                outputs.push(TxOutput::new(value, denom_script(&address)));
                tx_total += value;
            }

            let fee = estimate_tx_fee(1, outputs.len() + 1, false);
            available = available.saturating_sub(tx_total).saturating_sub(fee);

            let mut final_outputs = outputs;
            if available > 0 && tx_index + 1 == plan.len() {
                let change_address = wallet.reserve_address(KeyBucket::PsChange, state.uuid)?;
                state.reserved_addresses.push(change_address.clone());
                final_outputs.push(TxOutput::new(available, denom_script(&change_address)));
            }

            let tx = Transaction::Standard {
                version: 1,
                inputs: vec![current_input.clone()],
                outputs: final_outputs,
                lock_time: 0,
            };
            let txid = state.push_tx(tx);
            last_txid = Some(txid);
            current_input = TxInput::unsigned(OutPoint::new(txid, 0));
        }
        let _ = last_txid;

        Ok(Self { state })
    }
}

fn denom_script(address: &str) -> Vec<u8> {
    let bytes = hex::decode(address).unwrap_or_default();
    let digest = rusty_crypto::double_sha256(&bytes);
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&digest[..20]);
    rusty_shared_types::script::p2pkh_script(&hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_seeds_collateral_in_first_tx() {
        let plan = plan_new_denoms_amounts(5_000_000);
        assert_eq!(plan[0][0], CREATE_COLLATERAL_VAL);
    }

    #[test]
    fn plan_caps_same_value_repeats_at_eleven() {
        let plan = plan_new_denoms_amounts(50_000_000);
        for tx in &plan {
            let mut counts = std::collections::HashMap::new();
            for &v in tx {
                *counts.entry(v).or_insert(0u32) += 1;
            }
            for (&value, &count) in &counts {
                if value != CREATE_COLLATERAL_VAL {
                    assert!(count <= 11, "value {value} repeated {count} times");
                }
            }
        }
    }

    #[test]
    fn workflow_builds_a_chained_transaction() {
        let wallet = rusty_wallet::Wallet::new().unwrap();
        let wf = NewDenomsWorkflow::start(wallet.as_ref(), OutPoint::new([9u8; 32], 0), 10_000_000, 5_000_000).unwrap();
        assert!(!wf.state.tx_order.is_empty());
        let first_tx = &wf.state.txs.get(&wf.state.tx_order[0]).unwrap().tx;
        assert_eq!(first_tx.outputs()[0].value, CREATE_COLLATERAL_VAL);
    }
}
