//! End-to-end exercises of the mixing core across module boundaries: a
//! wallet accumulates regular funds, gets denominated, those denoms are
//! classified back in by PS-data discovery, and the manager reports the
//! right readiness/error at each step.

use rusty_privatesend::config::PsConfig;
use rusty_privatesend::denom_store::{CollateralCoin, DenomCoin};
use rusty_privatesend::discovery::{classify, Discovery};
use rusty_privatesend::error::StartMixingError;
use rusty_privatesend::manager::{calc_need_denoms_amounts, MixingManager};
use rusty_privatesend::workflows::new_denoms::{plan_new_denoms_amounts, NewDenomsWorkflow};
use rusty_privatesend::workflows::pay_collateral::PayCollateralWorkflow;
use rusty_shared_types::denom::{PsTxType, CREATE_COLLATERAL_VAL};
use rusty_shared_types::OutPoint;

#[test]
fn start_mixing_refuses_until_every_precondition_clears() {
    let manager = MixingManager::new(PsConfig::default());
    manager.mark_ready();
    let wallet = rusty_wallet::Wallet::new().unwrap();

    assert_eq!(
        manager.check_start_mixing(false, true, true, true, wallet.as_ref()),
        Err(StartMixingError::NoNetwork),
    );
    assert_eq!(
        manager.check_start_mixing(true, false, true, true, wallet.as_ref()),
        Err(StartMixingError::NoP2p),
    );
    // No denoms at all yet: below keep_amount, so readiness passes through to Ok.
    assert_eq!(manager.check_start_mixing(true, true, true, true, wallet.as_ref()), Ok(()));

    manager.start_mixing(true, true, true, true, wallet.as_ref()).unwrap();
    assert_eq!(
        manager.check_start_mixing(true, true, true, true, wallet.as_ref()),
        Err(StartMixingError::AlreadyRunning),
    );
    manager.stop_mixing();
    assert_eq!(manager.check_start_mixing(true, true, true, true, wallet.as_ref()), Ok(()));
}

#[test]
fn all_mixed_stops_further_start_mixing_calls() {
    let mut config = PsConfig::default();
    config.set_keep_amount(2);
    let manager = MixingManager::new(config);
    manager.mark_ready();
    let wallet = rusty_wallet::Wallet::new().unwrap();

    // Deposit enough fully-mixed (rounds >= mix_rounds) denoms to reach keep_amount.
    let keep_amount = manager.config.lock().unwrap().keep_amount();
    let mix_rounds = manager.store.mix_rounds();
    manager.store.add_denom(DenomCoin {
        outpoint: OutPoint::new([1u8; 32], 0),
        value: keep_amount,
        address: "addr".into(),
        rounds: mix_rounds,
    });

    assert_eq!(
        manager.check_start_mixing(true, true, true, true, wallet.as_ref()),
        Err(StartMixingError::AllMixed),
    );
}

#[test]
fn pay_collateral_then_new_denoms_then_discovery_round_trips() {
    let store = rusty_privatesend::denom_store::PsDataStore::new(4);
    let wallet = rusty_wallet::Wallet::new().unwrap();

    // A confirmed collateral is on hand; pay-collateral spends it into change.
    store.add_collateral(CollateralCoin { outpoint: OutPoint::new([1u8; 32], 0), value: 30_000, address: "c".into() });
    let pc = PayCollateralWorkflow::start(&store, wallet.as_ref()).unwrap();
    let pc_tx = pc.raw_tx().unwrap();
    assert_eq!(pc_tx.outputs()[0].value, 20_000);

    // Discovery sees the pay-collateral tx: spent a collateral input, one
    // non-denom owned output -> PayCollateral.
    let mut discovery = Discovery::default();
    let owned_outputs = vec![(0usize, "change-addr".to_string())];
    let first_pass = discovery.process(&store, pc_tx, &owned_outputs, None, true).unwrap();
    assert_eq!(first_pass, Some(PsTxType::PayCollateral));

    // Reprocessing the same tx is a no-op (the dedup fixed point, S5).
    let second_pass = discovery.process(&store, pc_tx, &owned_outputs, None, true).unwrap();
    assert_eq!(second_pass, None);

    // Separately, fund a new-denoms chain and confirm the plan always seeds
    // a collateral output in its first tx, matching the manager's own
    // shortfall accounting.
    let target = calc_need_denoms_amounts(5_000_000, 0, u64::MAX);
    assert!(target > 0);
    let plan = plan_new_denoms_amounts(target);
    assert_eq!(plan[0][0], CREATE_COLLATERAL_VAL);

    let wf = NewDenomsWorkflow::start(wallet.as_ref(), OutPoint::new([9u8; 32], 0), 5_000_000, target).unwrap();
    let first_tx = &wf.state.txs.get(&wf.state.tx_order[0]).unwrap().tx;
    assert!(!wf.state.reserved_addresses.is_empty());

    // Output 0 is the seeded collateral (-> NewCollateral on its own); the
    // rest are the actual denom outputs, which classify as NewDenoms: no
    // spent denom input, two or more denom-valued owned outputs.
    let owned: Vec<usize> = (1..first_tx.outputs().len()).collect();
    let tx_type = classify(first_tx, &owned, false, false);
    assert_eq!(tx_type, PsTxType::NewDenoms);
}

#[test]
fn address_reservations_are_released_on_cleanup() {
    let store = rusty_privatesend::denom_store::PsDataStore::new(4);
    let wallet = rusty_wallet::Wallet::new().unwrap();
    // Large enough to get a change output, so an address actually gets reserved.
    store.add_collateral(CollateralCoin { outpoint: OutPoint::new([3u8; 32], 0), value: 30_000, address: "c".into() });

    let mut wf = PayCollateralWorkflow::start(&store, wallet.as_ref()).unwrap();
    assert!(!wf.state.reserved_addresses.is_empty());

    wf.state.cleanup(true, &store, wallet.as_ref(), |_txid| {});
    assert!(wf.state.reserved_addresses.is_empty());
    assert!(wf.state.tx_order.is_empty());
}
