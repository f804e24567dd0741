//! Mixing manager (C8, §4.8): the top-level state machine a host
//! application drives via `start_mixing`/`stop_mixing`, and the maintainer
//! tasks that keep the keypair cache, workflows and denom targets healthy
//! while mixing is running.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use rusty_shared_types::denom::{is_create_collateral_val, is_denom_val, CREATE_COLLATERAL_VAL, LADDER, MIN_DENOM_VAL};
use rusty_wallet::{AddressSource, Broadcaster, WalletView};

use crate::config::PsConfig;
use crate::denom_store::PsDataStore;
use crate::error::{MixingError, MixingResult, StartMixingError};
use crate::fees::estimate_tx_fee;
use crate::keypair_cache::{KeypairCache, KeypairCacheState};
use crate::workflows::denominate::{self, DenominateOffer};
use crate::workflows::new_collateral::NewCollateralWorkflow;
use crate::workflows::new_denoms::{plan_new_denoms_amounts, NewDenomsWorkflow};
use crate::workflows::pay_collateral::PayCollateralWorkflow;

/// How long a maintainer backs off after any workflow reports
/// [`MixingError::NotEnoughFunds`], so a recurring shortfall doesn't spin the
/// maintainer loop (§9 open question: no original-source value survives in
/// this pack, kept as a single named constant rather than re-derived per call
/// site).
pub const NOT_ENOUGH_FUNDS_COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Unsupported,
    Disabled,
    Initializing,
    Ready,
    StartMixing,
    Mixing,
    StopMixing,
    FindingUntracked,
    Errored,
    Cleaning,
}

/// Total value a [`plan_new_denoms_amounts`] plan for `shortfall` would
/// actually need to spend: every planned output plus the fee of every tx in
/// the chain (each funds the next, so each carries its own change output).
fn plan_total_cost(shortfall: u64) -> u64 {
    plan_new_denoms_amounts(shortfall)
        .iter()
        .map(|outputs| {
            let output_sum: u64 = outputs.iter().sum();
            output_sum + estimate_tx_fee(1, outputs.len() + 1, false)
        })
        .sum()
}

/// How much still needs to go into new denoms to reach `target_amount` given
/// `current_denoms_amount` already on hand, constrained so the resulting
/// new-denoms plan never costs more than `spendable_balance` (§8 property 6:
/// `total_output_sum(P) + fees(P) <= spendable_balance`). Mirrors the
/// descending-ladder accounting the new-denoms workflow itself performs
/// (§4.6.3, §4.8): starting from the raw shortfall rounded down to a whole
/// number of minimum-denom units, steps the target down by `MIN_DENOM_VAL` at
/// a time until a plan for it fits the available balance, floored at
/// `CREATE_COLLATERAL_VAL` (below that, no new-denoms tx can even seed its
/// required collateral output).
pub fn calc_need_denoms_amounts(target_amount: u64, current_denoms_amount: u64, spendable_balance: u64) -> u64 {
    if target_amount <= current_denoms_amount {
        return 0;
    }
    let mut shortfall = target_amount - current_denoms_amount;
    shortfall -= shortfall % MIN_DENOM_VAL;

    while shortfall >= CREATE_COLLATERAL_VAL {
        if plan_total_cost(shortfall) <= spendable_balance {
            return shortfall;
        }
        shortfall = shortfall.saturating_sub(MIN_DENOM_VAL);
    }
    0
}

/// Rough count of denoms a given value could produce, used by the keypair
/// cache sizing algorithm (§4.5) when estimating incoming-fund splits.
pub fn approx_denom_count_for_value(value: u64) -> usize {
    let mut remaining = value;
    let mut count = 0usize;
    for &denom in LADDER.iter() {
        count += (remaining / denom) as usize;
        remaining %= denom;
    }
    count
}

/// Owns every piece of mutable state C8 coordinates: the denomination
/// store, the keypair cache, configuration, and the state machine itself.
/// Maintainer tasks are spawned against `cancel` and stop cooperatively when
/// it fires (§4.8, §5).
pub struct MixingManager {
    state: Mutex<ManagerState>,
    pub store: Arc<PsDataStore>,
    pub keypairs: Arc<KeypairCache>,
    pub config: Mutex<PsConfig>,
    cancel: CancellationToken,
    running: AtomicBool,
    pay_collateral: Mutex<Option<PayCollateralWorkflow>>,
    new_collateral: Mutex<Option<NewCollateralWorkflow>>,
    new_denoms: Mutex<Option<NewDenomsWorkflow>>,
    not_enough_funds_until: Mutex<Option<Instant>>,
    active_sessions: AtomicUsize,
}

impl MixingManager {
    pub fn new(config: PsConfig) -> Arc<Self> {
        let mix_rounds = config.mix_rounds();
        Arc::new(Self {
            state: Mutex::new(ManagerState::Initializing),
            store: Arc::new(PsDataStore::new(mix_rounds)),
            keypairs: Arc::new(KeypairCache::new()),
            config: Mutex::new(config),
            cancel: CancellationToken::new(),
            running: AtomicBool::new(false),
            pay_collateral: Mutex::new(None),
            new_collateral: Mutex::new(None),
            new_denoms: Mutex::new(None),
            not_enough_funds_until: Mutex::new(None),
            active_sessions: AtomicUsize::new(0),
        })
    }

    /// Records a `NotEnoughFunds` report from any maintainer, backing every
    /// maintainer off for [`NOT_ENOUGH_FUNDS_COOLDOWN`] rather than letting
    /// them retry a shortfall that won't have changed a tick later.
    pub fn report_not_enough_funds(&self) {
        *self.not_enough_funds_until.lock().unwrap() = Some(Instant::now() + NOT_ENOUGH_FUNDS_COOLDOWN);
    }

    pub fn in_not_enough_funds_cooldown(&self) -> bool {
        self.not_enough_funds_until.lock().unwrap().map(|until| Instant::now() < until).unwrap_or(false)
    }

    /// Called by the host once the session it was handed by [`Self::spawn_mix_denoms`]'s
    /// `on_offer` callback has finished (accepted, timed out, or failed), so
    /// the next tick can consider starting another up to `max_sessions`.
    pub fn mark_session_finished(&self) {
        self.active_sessions.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn state(&self) -> ManagerState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: ManagerState) {
        *self.state.lock().unwrap() = state;
    }

    /// Called by the host once initial wallet/chain data has loaded, moving
    /// the manager out of `Initializing` so `start_mixing` becomes callable
    /// (§4.8). A no-op from any other state.
    pub fn mark_ready(&self) {
        let mut state = self.state.lock().unwrap();
        if *state == ManagerState::Initializing {
            *state = ManagerState::Ready;
        }
    }

    /// Validates preconditions for a `start_mixing` call against the
    /// current state and a read-only wallet view (§6 error catalog).
    pub fn check_start_mixing(
        &self,
        network_ready: bool,
        p2p_ready: bool,
        llmq_data_ready: bool,
        mns_data_ready: bool,
        wallet: &dyn WalletView,
    ) -> Result<(), StartMixingError> {
        match self.state() {
            ManagerState::Unsupported => return Err(StartMixingError::NotEnabled),
            ManagerState::Initializing => return Err(StartMixingError::Initializing),
            ManagerState::Mixing | ManagerState::StartMixing => return Err(StartMixingError::AlreadyRunning),
            ManagerState::FindingUntracked => return Err(StartMixingError::FindUntrackedRun),
            ManagerState::Errored => return Err(StartMixingError::Errored),
            ManagerState::Disabled | ManagerState::Ready | ManagerState::StopMixing | ManagerState::Cleaning => {}
        }
        if !network_ready {
            return Err(StartMixingError::NoNetwork);
        }
        if !p2p_ready {
            return Err(StartMixingError::NoP2p);
        }
        if !llmq_data_ready {
            return Err(StartMixingError::LlmqDataNotReady);
        }
        if !mns_data_ready {
            return Err(StartMixingError::MnsDataNotReady);
        }
        if wallet.is_watching_only() {
            return Err(StartMixingError::WatchingOnly);
        }
        let target = self.config.lock().unwrap().keep_amount();
        if self.store.denoms_amount() >= target && self.store.denoms_to_mix().is_empty() {
            return Err(StartMixingError::AllMixed);
        }
        Ok(())
    }

    pub fn start_mixing(
        self: &Arc<Self>,
        network_ready: bool,
        p2p_ready: bool,
        llmq_data_ready: bool,
        mns_data_ready: bool,
        wallet: &dyn WalletView,
    ) -> Result<(), StartMixingError> {
        self.check_start_mixing(network_ready, p2p_ready, llmq_data_ready, mns_data_ready, wallet)?;
        self.set_state(ManagerState::StartMixing);
        self.running.store(true, Ordering::SeqCst);
        self.set_state(ManagerState::Mixing);
        Ok(())
    }

    /// Cooperative shutdown (§5): cancels every maintainer task. Callers
    /// that hold in-flight workflows are still responsible for calling
    /// `cleanup(force)` on them before dropping the manager.
    pub fn stop_mixing(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.set_state(ManagerState::StopMixing);
        self.cancel.cancel();
        self.set_state(ManagerState::Ready);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawns the keypair-cache maintainer: whenever the cache drops below
    /// what [`crate::keypair_cache::calc_need_new_keypairs_cnt`] says is
    /// needed, it's marked `NeedCache` for the wallet-side filler to refill
    /// (the actual derivation lives in `rusty-wallet`; this task only flags
    /// the need and clears it once `Ready`).
    pub fn spawn_keypairs_cache_worker(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(std::time::Duration::from_secs(5)) => {}
                }
                let mix_rounds = manager.store.mix_rounds();
                if manager.keypairs.needs_recache(&manager.store, mix_rounds, 0) {
                    manager.keypairs.set_state(KeypairCacheState::NeedCache);
                }
            }
        });
    }

    /// Spawns the all-mixed checker: once `keep_amount` worth of
    /// fully-mixed denoms is on hand and nothing is left to mix, mixing
    /// stops itself rather than waiting for the host to notice (§4.8).
    pub fn spawn_all_mixed_checker(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(std::time::Duration::from_secs(10)) => {}
                }
                if !manager.is_running() {
                    continue;
                }
                let target = manager.config.lock().unwrap().keep_amount();
                if manager.store.denoms_amount() >= target && manager.store.denoms_to_mix().is_empty() {
                    manager.stop_mixing();
                    break;
                }
            }
        });
    }

    /// Spawns the pay-collateral maintainer: whenever a confirmed collateral
    /// sits unspent and no pay-collateral workflow is already in flight,
    /// starts one (§4.6.1, §4.8).
    pub fn spawn_pay_collateral_maintainer<W>(self: &Arc<Self>, wallet: Arc<W>)
    where
        W: AddressSource + Send + Sync + 'static,
    {
        let manager = Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                }
                if !manager.is_running() || manager.in_not_enough_funds_cooldown() {
                    continue;
                }
                let mut slot = manager.pay_collateral.lock().unwrap();
                if slot.is_some() || !manager.store.has_confirmed_collateral() {
                    continue;
                }
                match PayCollateralWorkflow::start(&manager.store, wallet.as_ref()) {
                    Ok(workflow) => *slot = Some(workflow),
                    Err(MixingError::NotEnoughFunds) => manager.report_not_enough_funds(),
                    Err(err) => log::warn!("pay-collateral maintainer: {err}"),
                }
            }
        });
    }

    /// Spawns the new-collateral maintainer: whenever no confirmed collateral
    /// is on hand, funds one from a regular coin (preferred) or a spare
    /// `MIN_DENOM_VAL` denom (§4.6.2, §4.8).
    pub fn spawn_new_collateral_maintainer<W>(self: &Arc<Self>, wallet: Arc<W>)
    where
        W: AddressSource + WalletView + Send + Sync + 'static,
    {
        let manager = Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(15)) => {}
                }
                if !manager.is_running() || manager.in_not_enough_funds_cooldown() {
                    continue;
                }
                let mut slot = manager.new_collateral.lock().unwrap();
                if slot.is_some() || manager.store.has_confirmed_collateral() {
                    continue;
                }
                let utxos = wallet.utxos();
                let regular_coin =
                    utxos.iter().find(|u| !is_denom_val(u.value) && !is_create_collateral_val(u.value)).cloned();
                let spare_min_denom = utxos.iter().find(|u| u.value == MIN_DENOM_VAL).cloned();
                if regular_coin.is_none() && spare_min_denom.is_none() {
                    manager.report_not_enough_funds();
                    continue;
                }
                match NewCollateralWorkflow::start(&manager.store, wallet.as_ref(), regular_coin, spare_min_denom) {
                    Ok(workflow) => *slot = Some(workflow),
                    Err(MixingError::NotEnoughFunds) => manager.report_not_enough_funds(),
                    Err(err) => log::warn!("new-collateral maintainer: {err}"),
                }
            }
        });
    }

    /// Spawns the new-denoms maintainer: sizes the shortfall against the
    /// `keep_amount` target via [`calc_need_denoms_amounts`], constrained by
    /// what the wallet's non-denom, non-collateral coins can actually afford,
    /// and funds it from the largest such coin (§4.6.3, §4.8).
    pub fn spawn_new_denoms_maintainer<W>(self: &Arc<Self>, wallet: Arc<W>)
    where
        W: AddressSource + WalletView + Send + Sync + 'static,
    {
        let manager = Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(15)) => {}
                }
                if !manager.is_running() || manager.in_not_enough_funds_cooldown() {
                    continue;
                }
                let mut slot = manager.new_denoms.lock().unwrap();
                if slot.is_some() {
                    continue;
                }
                let keep_amount = manager.config.lock().unwrap().keep_amount();
                let regular: Vec<_> = wallet
                    .utxos()
                    .into_iter()
                    .filter(|u| !is_denom_val(u.value) && !is_create_collateral_val(u.value))
                    .collect();
                let spendable_balance: u64 = regular.iter().map(|u| u.value).sum();
                let need = calc_need_denoms_amounts(keep_amount, manager.store.denoms_amount(), spendable_balance);
                if need == 0 {
                    continue;
                }
                let Some(funding) = regular.into_iter().max_by_key(|u| u.value) else {
                    manager.report_not_enough_funds();
                    continue;
                };
                match NewDenomsWorkflow::start(wallet.as_ref(), funding.outpoint, funding.value, need) {
                    Ok(workflow) => *slot = Some(workflow),
                    Err(MixingError::NotEnoughFunds) => manager.report_not_enough_funds(),
                    Err(err) => log::warn!("new-denoms maintainer: {err}"),
                }
            }
        });
    }

    /// Spawns the denominate-session driver: while fewer than `max_sessions`
    /// are active and eligible denoms are on hand, builds an offer and hands
    /// it to `on_offer` for the host to actually run a session against (C3/C7
    /// socket I/O is out of this manager's scope). The host calls
    /// [`Self::mark_session_finished`] once that session concludes.
    pub fn spawn_mix_denoms<W>(self: &Arc<Self>, wallet: Arc<W>, on_offer: impl Fn(DenominateOffer) + Send + Sync + 'static)
    where
        W: AddressSource + Send + Sync + 'static,
    {
        let manager = Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(3)) => {}
                }
                if !manager.is_running() {
                    continue;
                }
                let max_sessions = manager.config.lock().unwrap().max_sessions() as usize;
                if manager.active_sessions.load(Ordering::SeqCst) >= max_sessions {
                    continue;
                }
                if manager.store.denoms_to_mix().is_empty() {
                    continue;
                }
                match denominate::build_offer(&manager.store, wallet.as_ref(), false) {
                    Ok(offer) => {
                        manager.active_sessions.fetch_add(1, Ordering::SeqCst);
                        on_offer(offer);
                    }
                    Err(MixingError::NotEnoughFunds) => {}
                    Err(err) => log::warn!("mix-denoms maintainer: {err}"),
                }
            }
        });
    }

    /// Spawns the cooldown maintainer: the only job here is to let the
    /// `not_enough_funds` backoff expire on its own clock rather than being
    /// cleared by whichever other maintainer happens to tick next, so a
    /// retry is attempted promptly once the cooldown lapses.
    pub fn spawn_not_enough_funds_cooldown(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                }
                let mut until = manager.not_enough_funds_until.lock().unwrap();
                if until.map(|t| Instant::now() >= t).unwrap_or(false) {
                    *until = None;
                }
            }
        });
    }
}

/// Broadcast-time guard (§8 S7): refuses to send a regular (non-mixing)
/// wallet transaction that would either re-spend a coin currently reserved
/// by a mixing workflow, or pay out to an address a mixing workflow has
/// reserved for its own output. Checked against one consistent locked
/// snapshot of the store, by actual outpoint/script content, never by
/// trusting that `tx` lines up positionally with anything the store tracks.
pub fn guard_regular_send(store: &PsDataStore, tx: &rusty_shared_types::Transaction) -> MixingResult<()> {
    store.with_all_locked(|view| {
        for input in tx.inputs() {
            let key = input.previous_output.to_key();
            if view.is_spending_denom(&key) || view.is_spending_collateral(&key) {
                return Err(MixingError::PossibleDoubleSpend);
            }
        }
        for address in view.reserved_addresses() {
            let script = crate::address::to_p2pkh_script(&address);
            if tx.outputs().iter().any(|o| o.script_pubkey == script) {
                return Err(MixingError::SpendToPsAddresses);
            }
        }
        Ok(())
    })
}

/// Wraps a [`Broadcaster`] so a regular send never reaches the network
/// without first clearing [`guard_regular_send`] (§8 S7).
pub async fn guarded_broadcast<B: Broadcaster + ?Sized>(
    broadcaster: &B,
    store: &PsDataStore,
    tx: &rusty_shared_types::Transaction,
) -> MixingResult<rusty_shared_types::Hash> {
    guard_regular_send(store, tx)?;
    Ok(broadcaster.broadcast(tx).await?)
}

/// Broadcasts every workflow's next unsent tx once per tick, retrying on
/// failure per [`crate::workflows::common::PsTxData`]'s backoff (§4.6.5).
/// Generic over the wallet's `Broadcaster`/`AddressSource` so the manager
/// never depends on a concrete wallet type.
pub async fn broadcast_tick<B: Broadcaster + ?Sized>(
    broadcaster: &B,
    state: &mut crate::workflows::WorkflowState,
    unverified: &std::collections::HashSet<rusty_shared_types::Hash>,
) {
    let now = std::time::Instant::now();
    let Some(txid) = state.next_to_send(now, unverified) else { return };
    let Some(data) = state.txs.get_mut(&txid) else { return };
    match broadcaster.broadcast(&data.tx).await {
        Ok(_) => data.mark_sent(now),
        Err(_) => data.mark_broadcast_failed(now),
    }
}
