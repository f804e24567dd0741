//! User-adjustable mixing parameters, with clamps (§4.8).

use rusty_shared_types::COIN;
use serde::{Deserialize, Serialize};

fn clamp_u64(value: u64, min: u64, max: u64) -> u64 {
    value.clamp(min, max)
}

/// Upper bound for `mix_rounds` on mainnet; testnet allows up to 256 (§4.8).
pub const MAX_MIX_ROUNDS_MAINNET: u32 = 16;
pub const MAX_MIX_ROUNDS_TESTNET: u32 = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PsConfig {
    keep_amount: u64,
    mix_rounds: u32,
    max_sessions: u32,
    kp_timeout_minutes: u32,
    pub group_history: bool,
    pub notify_ps_txs: bool,
    pub subscribe_spent: bool,
    pub allow_others: bool,
    pub testnet: bool,
}

impl Default for PsConfig {
    fn default() -> Self {
        Self {
            keep_amount: 2 * COIN,
            mix_rounds: 4,
            max_sessions: 4,
            kp_timeout_minutes: 1,
            group_history: true,
            notify_ps_txs: false,
            subscribe_spent: true,
            allow_others: false,
            testnet: false,
        }
    }
}

impl PsConfig {
    pub fn keep_amount(&self) -> u64 {
        self.keep_amount
    }

    pub fn set_keep_amount(&mut self, whole_coins: u64) {
        self.keep_amount = clamp_u64(whole_coins, 2, 21_000_000) * COIN;
    }

    pub fn mix_rounds(&self) -> u32 {
        self.mix_rounds
    }

    pub fn set_mix_rounds(&mut self, rounds: u32) {
        let max = if self.testnet { MAX_MIX_ROUNDS_TESTNET } else { MAX_MIX_ROUNDS_MAINNET };
        self.mix_rounds = rounds.clamp(2, max);
    }

    pub fn max_sessions(&self) -> u32 {
        self.max_sessions
    }

    pub fn set_max_sessions(&mut self, sessions: u32) {
        self.max_sessions = sessions.clamp(1, 10);
    }

    pub fn kp_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.kp_timeout_minutes as u64 * 60)
    }

    pub fn set_kp_timeout_minutes(&mut self, minutes: u32) {
        self.kp_timeout_minutes = minutes.clamp(0, 5);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_amount_clamps_to_range() {
        let mut cfg = PsConfig::default();
        cfg.set_keep_amount(1);
        assert_eq!(cfg.keep_amount(), 2 * COIN);
        cfg.set_keep_amount(100_000_000);
        assert_eq!(cfg.keep_amount(), 21_000_000 * COIN);
    }

    #[test]
    fn mix_rounds_clamp_differs_by_network() {
        let mut cfg = PsConfig::default();
        cfg.set_mix_rounds(1000);
        assert_eq!(cfg.mix_rounds(), MAX_MIX_ROUNDS_MAINNET);

        cfg.testnet = true;
        cfg.set_mix_rounds(1000);
        assert_eq!(cfg.mix_rounds(), MAX_MIX_ROUNDS_TESTNET);
    }
}
