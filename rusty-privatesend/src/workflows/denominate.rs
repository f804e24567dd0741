//! Denominate workflow (§4.6.4): selects same-value denoms to offer into a
//! mix session and, once the masternode's final tx is accepted, bumps every
//! spent denom's round counter.

use std::collections::{HashMap, HashSet};

use rusty_shared_types::denom::PRIVATESEND_ENTRY_MAX_SIZE;
use rusty_shared_types::{OutPoint, Transaction, TxInput};
use rusty_wallet::{AddressSource, KeyBucket, TransactionSigner};
use uuid::Uuid;

use crate::address::to_p2pkh_script;
use crate::denom_store::{DenomCoin, PsDataStore};
use crate::error::{MixingError, MixingResult};

/// One denom-value cohort offered into a session: up to
/// `PRIVATESEND_ENTRY_MAX_SIZE` coins of the same value, each from a
/// different parent transaction, each with `rounds < mix_rounds`.
pub struct DenominateOffer {
    pub uuid: Uuid,
    pub denom_value: u64,
    pub inputs: Vec<DenomCoin>,
    pub output_addresses: Vec<String>,
}

/// Picks the denom value with the most eligible same-value, distinct-parent
/// coins available right now, capped at `PRIVATESEND_ENTRY_MAX_SIZE`.
pub fn select_candidates(store: &PsDataStore) -> Option<(u64, Vec<DenomCoin>)> {
    let mut by_value: std::collections::HashMap<u64, Vec<DenomCoin>> = std::collections::HashMap::new();
    for coin in store.denoms_to_mix() {
        by_value.entry(coin.value).or_default().push(coin);
    }

    let mut best: Option<(u64, Vec<DenomCoin>)> = None;
    for (value, mut coins) in by_value {
        let mut seen_parents = HashSet::new();
        coins.retain(|c| seen_parents.insert(c.outpoint.txid));
        coins.sort_by_key(|c| c.outpoint.to_key());
        coins.truncate(PRIVATESEND_ENTRY_MAX_SIZE);
        if coins.is_empty() {
            continue;
        }
        let is_better = best.as_ref().map(|(_, b)| coins.len() > b.len()).unwrap_or(true);
        if is_better {
            best = Some((value, coins));
        }
    }
    best
}

/// Builds an offer: reserves one output address per input, marks every
/// input's outpoint as spending. `force_main_ks` is for hardware-keystore
/// wallets nearing `mix_rounds`, where every extra PS-keystore prompt has a
/// cost: rather than routing every output to the main keystore uniformly,
/// inputs one hop from completing the ladder (`rounds + 1 >= mix_rounds`)
/// keep their output on the PS-dedicated bucket, since that's the round
/// that actually benefits from staying there; everything else offloads to
/// the main keystore (§4.6.4, §4.5, §9 open question).
pub fn build_offer(store: &PsDataStore, wallet: &dyn AddressSource, force_main_ks: bool) -> MixingResult<DenominateOffer> {
    let (denom_value, inputs) = select_candidates(store).ok_or(MixingError::NotEnoughFunds)?;
    let uuid = Uuid::new_v4();
    let mix_rounds = store.mix_rounds();

    let mut reserved = Vec::with_capacity(inputs.len());
    for coin in &inputs {
        let key = coin.outpoint.to_key();
        if !store.mark_spending_denom(&key) {
            for key in &reserved_keys(&reserved) {
                store.unmark_spending_denom(key);
            }
            return Err(MixingError::NotEnoughFunds);
        }
        reserved.push(coin.outpoint);
    }

    let mut output_addresses = Vec::with_capacity(inputs.len());
    for coin in &inputs {
        let bucket = if !force_main_ks || coin.rounds + 1 >= mix_rounds { KeyBucket::PsCoins } else { KeyBucket::Spendable };
        match wallet.reserve_address(bucket, uuid) {
            Ok(address) => output_addresses.push(address),
            Err(err) => {
                for outpoint in &reserved {
                    store.unmark_spending_denom(&outpoint.to_key());
                }
                return Err(err.into());
            }
        }
    }

    Ok(DenominateOffer { uuid, denom_value, inputs, output_addresses })
}

fn reserved_keys(outpoints: &[OutPoint]) -> Vec<String> {
    outpoints.iter().map(|o| o.to_key()).collect()
}

/// Each spent denom's round counter advances by exactly one (§4.6.4 S4),
/// independent of how many rounds the other participants' inputs carried.
pub fn next_rounds(input_rounds: &[u32]) -> Vec<u32> {
    input_rounds.iter().map(|r| r + 1).collect()
}

/// Verifies a masternode-assembled `txFinal` against what this offer
/// actually asked for (§4.7 step 5, §8 property 5): the masternode is never
/// trusted to have preserved offer order or to have included exactly what
/// was reserved, so every reserved input outpoint and every reserved output
/// address/value must be checked present by content, not by position.
pub fn verify_final_tx(offer: &DenominateOffer, tx: &Transaction) -> MixingResult<()> {
    let tx_inputs = tx.inputs();
    let tx_outputs = tx.outputs();
    if tx_inputs.len() != offer.inputs.len() || tx_outputs.len() != offer.inputs.len() {
        return Err(MixingError::Protocol(format!(
            "txFinal has {} inputs and {} outputs, expected {} of each for this offer",
            tx_inputs.len(),
            tx_outputs.len(),
            offer.inputs.len()
        )));
    }

    let tx_outpoints: HashSet<OutPoint> = tx_inputs.iter().map(|i| i.previous_output).collect();
    for coin in &offer.inputs {
        if !tx_outpoints.contains(&coin.outpoint) {
            return Err(MixingError::Protocol(format!("txFinal is missing reserved input {}", coin.outpoint.to_key())));
        }
    }

    for address in &offer.output_addresses {
        let script = to_p2pkh_script(address);
        let present = tx_outputs.iter().any(|o| o.script_pubkey == script && o.value == offer.denom_value);
        if !present {
            return Err(MixingError::Protocol(format!(
                "txFinal is missing reserved output for {address} at value {}",
                offer.denom_value
            )));
        }
    }

    Ok(())
}

/// Signs only the inputs this offer reserved, via `signer`; every other
/// input's `script_sig` is left empty so the masternode (and other
/// participants) can tell which scriptSigs are ours without us ever
/// touching theirs (§4.7 step 6). The result is the `dss` payload.
pub fn sign_final_tx(offer: &DenominateOffer, tx: &Transaction, signer: &dyn TransactionSigner) -> MixingResult<Vec<TxInput>> {
    let by_outpoint: HashMap<OutPoint, &DenomCoin> = offer.inputs.iter().map(|c| (c.outpoint, c)).collect();
    let mut signed_inputs = Vec::with_capacity(tx.inputs().len());
    for (index, input) in tx.inputs().iter().enumerate() {
        let script_sig = match by_outpoint.get(&input.previous_output) {
            Some(coin) => signer.sign_input(&coin.address, tx, index)?,
            None => Vec::new(),
        };
        signed_inputs.push(TxInput { previous_output: input.previous_output, script_sig, sequence: input.sequence });
    }
    Ok(signed_inputs)
}

/// Applies an accepted final transaction: old denoms are spent, the
/// reserved outputs (found by address and value, never by position) re-enter
/// the store. The new round is `min(input rounds) + 1` — conservative, since
/// mixing gives every output the anonymity of its least-mixed contributor,
/// not its best one. Fails closed via [`verify_final_tx`] rather than ever
/// trusting the masternode's ordering of `accepted_tx`.
pub fn finalize(store: &PsDataStore, offer: &DenominateOffer, accepted_tx: &Transaction) -> MixingResult<()> {
    verify_final_tx(offer, accepted_tx)?;

    for coin in &offer.inputs {
        let key = coin.outpoint.to_key();
        store.spend_denom(&key);
        store.unmark_spending_denom(&key);
    }

    let new_rounds = offer.inputs.iter().map(|c| c.rounds).min().unwrap_or(0) + 1;
    let txid = accepted_tx.txid();
    let outputs = accepted_tx.outputs();
    for address in &offer.output_addresses {
        let script = to_p2pkh_script(address);
        if let Some((index, output)) = outputs.iter().enumerate().find(|(_, o)| o.script_pubkey == script && o.value == offer.denom_value) {
            store.add_denom(DenomCoin {
                outpoint: OutPoint::new(txid, index as u32),
                value: output.value,
                address: address.clone(),
                rounds: new_rounds,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coin(txid_byte: u8, value: u64, rounds: u32) -> DenomCoin {
        DenomCoin { outpoint: OutPoint::new([txid_byte; 32], 0), value, address: format!("addr{txid_byte}"), rounds }
    }

    #[test]
    fn rounds_advance_by_exactly_one() {
        assert_eq!(next_rounds(&[2, 2, 3]), vec![3, 3, 4]);
    }

    #[test]
    fn selects_the_value_with_most_distinct_parent_coins() {
        let store = PsDataStore::new(4);
        store.add_denom(coin(1, 100_001, 0));
        store.add_denom(coin(2, 100_001, 0));
        store.add_denom(coin(3, 1_000_010, 0));
        let (value, coins) = select_candidates(&store).unwrap();
        assert_eq!(value, 100_001);
        assert_eq!(coins.len(), 2);
    }

    #[test]
    fn caps_cohort_size_at_entry_max() {
        let store = PsDataStore::new(4);
        for i in 0..12u8 {
            store.add_denom(coin(i, 100_001, 0));
        }
        let (_, coins) = select_candidates(&store).unwrap();
        assert_eq!(coins.len(), PRIVATESEND_ENTRY_MAX_SIZE);
    }

    #[test]
    fn build_offer_marks_inputs_as_spending() {
        let store = PsDataStore::new(4);
        store.add_denom(coin(1, 100_001, 2));
        store.add_denom(coin(2, 100_001, 2));
        let wallet = rusty_wallet::Wallet::new().unwrap();
        let offer = build_offer(&store, wallet.as_ref(), false).unwrap();
        assert_eq!(offer.inputs.len(), 2);
        assert!(store.is_spending_denom(&offer.inputs[0].outpoint.to_key()));
    }

    /// Builds a `txFinal` that actually satisfies `offer`: one input per
    /// reserved outpoint, one output per reserved address at `denom_value`.
    fn accepted_tx_for(offer: &DenominateOffer) -> Transaction {
        Transaction::Standard {
            version: 1,
            inputs: offer.inputs.iter().map(|c| TxInput::unsigned(c.outpoint)).collect(),
            outputs: offer
                .output_addresses
                .iter()
                .map(|a| rusty_shared_types::TxOutput::new(offer.denom_value, to_p2pkh_script(a)))
                .collect(),
            lock_time: 0,
        }
    }

    #[test]
    fn finalize_bumps_rounds_and_respends_inputs() {
        let store = PsDataStore::new(4);
        store.add_denom(coin(1, 100_001, 2));
        let wallet = rusty_wallet::Wallet::new().unwrap();
        let offer = build_offer(&store, wallet.as_ref(), false).unwrap();
        let tx = accepted_tx_for(&offer);

        finalize(&store, &offer, &tx).unwrap();

        assert!(!store.is_spending_denom(&offer.inputs[0].outpoint.to_key()));
        let new_key = OutPoint::new(tx.txid(), 0).to_key();
        assert_eq!(store.denom_count_min_rounds(3), 1);
        let _ = new_key;
    }

    #[test]
    fn verify_final_tx_accepts_a_correctly_assembled_tx() {
        let store = PsDataStore::new(4);
        store.add_denom(coin(1, 100_001, 0));
        store.add_denom(coin(2, 100_001, 0));
        let wallet = rusty_wallet::Wallet::new().unwrap();
        let offer = build_offer(&store, wallet.as_ref(), false).unwrap();
        let tx = accepted_tx_for(&offer);
        assert!(verify_final_tx(&offer, &tx).is_ok());
    }

    #[test]
    fn verify_final_tx_rejects_a_missing_reserved_input() {
        let store = PsDataStore::new(4);
        store.add_denom(coin(1, 100_001, 0));
        let wallet = rusty_wallet::Wallet::new().unwrap();
        let offer = build_offer(&store, wallet.as_ref(), false).unwrap();
        let mut tx = accepted_tx_for(&offer);
        tx.inputs_mut()[0].previous_output = OutPoint::new([99u8; 32], 0);
        assert!(verify_final_tx(&offer, &tx).is_err());
    }

    #[test]
    fn verify_final_tx_rejects_wrong_output_value() {
        let store = PsDataStore::new(4);
        store.add_denom(coin(1, 100_001, 0));
        let wallet = rusty_wallet::Wallet::new().unwrap();
        let offer = build_offer(&store, wallet.as_ref(), false).unwrap();
        let mut tx = accepted_tx_for(&offer);
        tx.outputs_mut()[0].value = 1;
        assert!(verify_final_tx(&offer, &tx).is_err());
    }

    #[test]
    fn verify_final_tx_rejects_mismatched_counts() {
        let store = PsDataStore::new(4);
        store.add_denom(coin(1, 100_001, 0));
        store.add_denom(coin(2, 100_001, 0));
        let wallet = rusty_wallet::Wallet::new().unwrap();
        let offer = build_offer(&store, wallet.as_ref(), false).unwrap();
        let mut tx = accepted_tx_for(&offer);
        tx.outputs_mut().pop();
        assert!(verify_final_tx(&offer, &tx).is_err());
    }

    #[test]
    fn sign_final_tx_signs_only_our_inputs_and_blanks_the_rest() {
        let store = PsDataStore::new(4);
        store.add_denom(coin(1, 100_001, 0));
        let wallet = rusty_wallet::Wallet::new().unwrap();
        let offer = build_offer(&store, wallet.as_ref(), false).unwrap();

        let mut tx = accepted_tx_for(&offer);
        // A foreign input from another participant, not in our offer.
        tx.inputs_mut().push(TxInput::unsigned(OutPoint::new([42u8; 32], 3)));

        let signed = sign_final_tx(&offer, &tx, wallet.as_ref()).unwrap();
        assert_eq!(signed.len(), 2);
        assert!(!signed[0].script_sig.is_empty());
        assert!(signed[1].script_sig.is_empty());
    }
}
