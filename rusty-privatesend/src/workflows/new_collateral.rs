//! New-collateral workflow (§4.6.2): funds one `CREATE_COLLATERAL_VAL`
//! output, with optional change back to the spent input's own address.

use rusty_shared_types::denom::{create_collateral_vals, is_create_collateral_val, CREATE_COLLATERAL_VAL, MIN_DENOM_VAL};
use rusty_shared_types::{OutPoint, Transaction, TxInput, TxOutput};
use rusty_wallet::{AddressSource, KeyBucket, Utxo};

use crate::denom_store::PsDataStore;
use crate::error::{MixingError, MixingResult};
use crate::fees::estimate_tx_fee;

use super::common::{reserve_denom_spend, WorkflowState};

pub struct NewCollateralWorkflow {
    pub state: WorkflowState,
}

impl NewCollateralWorkflow {
    /// `regular_coin` is a non-denom, non-collateral UTXO preferred as the
    /// funding input. If none is available but a `MIN_DENOM_VAL` denom is,
    /// one such denom may be spent instead, producing a smaller
    /// `CREATE_COLLATERAL_VALS[k]` output that still covers the fee.
    pub fn start(
        store: &PsDataStore,
        wallet: &dyn AddressSource,
        regular_coin: Option<Utxo>,
        spare_min_denom: Option<Utxo>,
    ) -> MixingResult<Self> {
        let mut state = WorkflowState::new();

        let (input_outpoint, input_value, from_denom) = match regular_coin {
            Some(coin) => (coin.outpoint, coin.value, false),
            None => {
                let denom = spare_min_denom.ok_or(MixingError::NotEnoughFunds)?;
                if !reserve_denom_spend(&mut state, store, &denom.outpoint) {
                    return Err(MixingError::NotEnoughFunds);
                }
                (denom.outpoint, denom.value, true)
            }
        };

        let fee = estimate_tx_fee(1, 2, false);
        let collateral_address = wallet.reserve_address(KeyBucket::PsSpendable, state.uuid)?;
        state.reserved_addresses.push(collateral_address.clone());

        let (collateral_value, change_value) = if from_denom || input_value < CREATE_COLLATERAL_VAL + fee {
            // Cover fee by choosing the largest collateral value that still fits.
            let affordable = input_value.saturating_sub(fee);
            let value = create_collateral_vals()
                .into_iter()
                .rev()
                .find(|&v| v <= affordable)
                .ok_or(MixingError::NotEnoughFunds)?;
            (value, 0)
        } else {
            (CREATE_COLLATERAL_VAL, input_value.saturating_sub(CREATE_COLLATERAL_VAL + fee))
        };
        debug_assert!(is_create_collateral_val(collateral_value));

        let mut outputs = vec![TxOutput::new(collateral_value, collateral_script(&collateral_address))];
        if change_value > 0 {
            let change_address = wallet.reserve_address(KeyBucket::Spendable, state.uuid)?;
            state.reserved_addresses.push(change_address.clone());
            outputs.push(TxOutput::new(change_value, collateral_script(&change_address)));
        }

        let tx = Transaction::Standard {
            version: 1,
            inputs: vec![TxInput::unsigned(input_outpoint)],
            outputs,
            lock_time: 0,
        };
        state.push_tx(tx);

        Ok(Self { state })
    }
}

fn collateral_script(address: &str) -> Vec<u8> {
    let bytes = hex::decode(address).unwrap_or_default();
    let digest = rusty_crypto::double_sha256(&bytes);
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&digest[..20]);
    rusty_shared_types::script::p2pkh_script(&hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coin(byte: u8, value: u64) -> Utxo {
        Utxo { outpoint: OutPoint::new([byte; 32], 0), value, address: "addr".into(), confirmations: 6 }
    }

    #[test]
    fn funds_from_regular_coin_with_change() {
        let store = PsDataStore::new(4);
        let wallet = rusty_wallet::Wallet::new().unwrap();
        let wf = NewCollateralWorkflow::start(&store, wallet.as_ref(), Some(coin(1, 50_000)), None).unwrap();
        let tx = wf.state.txs.get(&wf.state.tx_order[0]).unwrap();
        assert_eq!(tx.tx.outputs()[0].value, CREATE_COLLATERAL_VAL);
        assert_eq!(tx.tx.outputs().len(), 2);
    }

    #[test]
    fn falls_back_to_spare_denom_when_no_regular_coin() {
        let store = PsDataStore::new(4);
        let wallet = rusty_wallet::Wallet::new().unwrap();
        store.add_denom(crate::denom_store::DenomCoin {
            outpoint: OutPoint::new([2u8; 32], 0),
            value: MIN_DENOM_VAL,
            address: "addr".into(),
            rounds: 0,
        });
        let wf = NewCollateralWorkflow::start(&store, wallet.as_ref(), None, Some(coin(2, MIN_DENOM_VAL))).unwrap();
        let tx = wf.state.txs.get(&wf.state.tx_order[0]).unwrap();
        assert!(is_create_collateral_val(tx.tx.outputs()[0].value));
    }
}
