//! Pay-collateral workflow (§4.6.1): spends a confirmed collateral into
//! either change or an `OP_RETURN` burn. The resulting tx is handed to a mix
//! session rather than broadcast directly.

use rusty_shared_types::denom::COLLATERAL_VAL;
use rusty_shared_types::{OutPoint, Transaction, TxInput, TxOutput};
use rusty_wallet::{AddressSource, KeyBucket};

use crate::denom_store::PsDataStore;
use crate::error::{MixingError, MixingResult};

use super::common::{reserve_collateral_spend, WorkflowState};

pub struct PayCollateralWorkflow {
    pub state: WorkflowState,
    pub collateral_outpoint: OutPoint,
}

impl PayCollateralWorkflow {
    /// Triggered by the manager when a confirmed collateral exists and no
    /// pay-collateral workflow is currently active (§4.6.1).
    pub fn start(store: &PsDataStore, wallet: &dyn AddressSource) -> MixingResult<Self> {
        let collateral = store.pick_confirmed_collateral().ok_or(MixingError::NotEnoughFunds)?;
        let mut state = WorkflowState::new();
        if !reserve_collateral_spend(&mut state, store, &collateral.outpoint) {
            return Err(MixingError::NotEnoughFunds);
        }

        let input = TxInput::unsigned(collateral.outpoint);
        let output = if collateral.value >= 2 * COLLATERAL_VAL {
            let change_address = wallet.reserve_address(KeyBucket::PsChange, state.uuid)?;
            state.reserved_addresses.push(change_address.clone());
            let script = rusty_shared_types::script::p2pkh_script(
                &decode_pubkey_hash(&change_address).unwrap_or([0u8; 20]),
            );
            TxOutput::new(collateral.value - COLLATERAL_VAL, script)
        } else {
            TxOutput::op_return()
        };

        let tx = Transaction::Standard {
            version: 1,
            inputs: vec![input],
            outputs: vec![output],
            lock_time: 0,
        };
        state.push_tx(tx);

        Ok(Self { state, collateral_outpoint: collateral.outpoint })
    }

    /// The unbroadcast raw tx handed to the mix session as `pay_collateral_tx`.
    pub fn raw_tx(&self) -> Option<&Transaction> {
        self.state.tx_order.first().and_then(|txid| self.state.txs.get(txid)).map(|d| &d.tx)
    }
}

/// Demo addresses are hex-encoded public keys (see `rusty_wallet::Wallet`);
/// a real deployment decodes whatever address format the wallet uses.
fn decode_pubkey_hash(address: &str) -> Option<[u8; 20]> {
    let bytes = hex::decode(address).ok()?;
    let digest = rusty_crypto::double_sha256(&bytes);
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&digest[..20]);
    Some(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::denom_store::CollateralCoin;
    use std::sync::Arc;

    #[test]
    fn small_collateral_burns_via_op_return() {
        let store = PsDataStore::new(4);
        store.add_collateral(CollateralCoin {
            outpoint: OutPoint::new([1u8; 32], 0),
            value: 15_000,
            address: "addr".to_string(),
        });
        let wallet = rusty_wallet::Wallet::new().unwrap();
        let workflow = PayCollateralWorkflow::start(&store, wallet.as_ref()).unwrap();
        let tx = workflow.raw_tx().unwrap();
        assert_eq!(tx.outputs().len(), 1);
        assert!(tx.outputs()[0].is_op_return());
    }

    #[test]
    fn large_collateral_gets_change() {
        let store = PsDataStore::new(4);
        store.add_collateral(CollateralCoin {
            outpoint: OutPoint::new([2u8; 32], 0),
            value: 30_000,
            address: "addr".to_string(),
        });
        let wallet: Arc<rusty_wallet::Wallet> = rusty_wallet::Wallet::new().unwrap();
        let workflow = PayCollateralWorkflow::start(&store, wallet.as_ref()).unwrap();
        let tx = workflow.raw_tx().unwrap();
        assert_eq!(tx.outputs().len(), 1);
        assert_eq!(tx.outputs()[0].value, 20_000);
    }

    #[test]
    fn no_confirmed_collateral_is_not_enough_funds() {
        let store = PsDataStore::new(4);
        let wallet = rusty_wallet::Wallet::new().unwrap();
        assert!(matches!(PayCollateralWorkflow::start(&store, wallet.as_ref()), Err(MixingError::NotEnoughFunds)));
    }
}
