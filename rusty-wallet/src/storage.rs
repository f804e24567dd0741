//! `rusty-wallet/src/storage.rs` provides secure storage functionalities for wallet data.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use keyring::Entry;
use serde::{Deserialize, Serialize};

const APP_NAME: &str = "rusty-coin-wallet";
const WALLET_KEY: &str = "master_seed";

/// Non-secret configuration persisted via `confy`. The `ps_*` fields mirror
/// the mixing core's persisted-state layout (external interfaces §6); the
/// core owns their meaning, this crate just durably round-trips them.
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct WalletConfig {
    pub wallet_id: String,
    pub keep_amount: Option<u64>,
    pub mix_rounds: Option<u32>,
    pub max_sessions: Option<u32>,
    pub ps_enabled: bool,
}

pub fn save_config(cfg: &WalletConfig) -> Result<(), String> {
    confy::store(APP_NAME, None, cfg).map_err(|e| format!("failed to save wallet config: {e}"))
}

pub fn load_config() -> Result<WalletConfig, String> {
    confy::load(APP_NAME, None).map_err(|e| format!("failed to load wallet config: {e}"))
}

/// Saves the wallet's master seed to the OS keyring. Never touched by the
/// keypair cache (C5) itself, which never persists outside memory.
pub fn save_wallet_data_securely(data: &[u8]) -> Result<(), String> {
    let entry = Entry::new(APP_NAME, WALLET_KEY).map_err(|e| format!("failed to create keyring entry: {e}"))?;
    entry
        .set_password(&BASE64.encode(data))
        .map_err(|e| format!("failed to set keyring password: {e}"))
}

pub fn load_wallet_data_securely() -> Result<Vec<u8>, String> {
    let entry = Entry::new(APP_NAME, WALLET_KEY).map_err(|e| format!("failed to create keyring entry: {e}"))?;
    let password = entry.get_password().map_err(|e| format!("failed to get keyring password: {e}"))?;
    BASE64.decode(password).map_err(|e| format!("failed to decode wallet data from base64: {e}"))
}