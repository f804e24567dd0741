//! Domain types shared between the network, wallet and mixing crates.
//!
//! This crate intentionally carries no behaviour beyond small helpers on the
//! types themselves: the mixing core, the wallet and the wire codec all need
//! the same notion of an outpoint, a transaction and a masternode identity,
//! and keeping them in one place avoids three slightly different copies.

use serde::{Deserialize, Serialize};
use std::hash::Hash as StdHash;

pub mod denom;
pub mod masternode;
pub mod script;

pub use denom::{CollateralValue, PsTxType, COIN, CREATE_COLLATERAL_VAL, LADDER, MIN_DENOM_VAL};
pub use masternode::{MasternodeEntry, MasternodeId, MasternodeList, MasternodeStatus};

/// A 32-byte double-SHA256/BLAKE3-sized digest, used for txids and block hashes.
pub type Hash = [u8; 32];
pub type PubKeyHash = [u8; 20];

/// Reference to a specific transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, StdHash, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: Hash,
    pub vout: u32,
}

impl OutPoint {
    pub const NULL_VOUT: u32 = 0xFFFF_FFFF;

    pub fn new(txid: Hash, vout: u32) -> Self {
        Self { txid, vout }
    }

    /// `"<txid_hex>:<vout>"`, the bookkeeping key used throughout §4.4.
    pub fn to_key(&self) -> String {
        format!("{}:{}", hex::encode(self.txid), self.vout)
    }
}

impl std::fmt::Display for OutPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_key())
    }
}

/// A transaction input, referencing a previous output being spent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub previous_output: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl TxInput {
    pub fn unsigned(previous_output: OutPoint) -> Self {
        Self {
            previous_output,
            script_sig: Vec::new(),
            sequence: 0xFFFF_FFFF,
        }
    }

    pub fn is_signed(&self) -> bool {
        !self.script_sig.is_empty()
    }
}

/// A transaction output: a value locked to a script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: u64,
    pub script_pubkey: Vec<u8>,
}

impl TxOutput {
    pub fn new(value: u64, script_pubkey: Vec<u8>) -> Self {
        Self { value, script_pubkey }
    }

    /// Value-less `OP_RETURN` output used to burn collateral change (§4.6.1 S2).
    pub fn op_return() -> Self {
        Self { value: 0, script_pubkey: vec![script::OP_RETURN] }
    }

    pub fn is_op_return(&self) -> bool {
        self.script_pubkey.first() == Some(&script::OP_RETURN)
    }

    /// Extracts the pubkey hash out of a standard P2PKH scriptPubKey, if this is one.
    pub fn extract_pubkey_hash(&self) -> Option<PubKeyHash> {
        script::p2pkh_pubkey_hash(&self.script_pubkey)
    }
}

/// A transaction. Only the two kinds the mixing core ever builds or consumes
/// are modelled here; the wallet/consensus layer this core sits on top of may
/// carry richer kinds, but they are opaque to PrivateSend and never appear as
/// an input to any of its workflows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Transaction {
    Standard {
        version: u32,
        inputs: Vec<TxInput>,
        outputs: Vec<TxOutput>,
        lock_time: u32,
    },
    Coinbase {
        version: u32,
        outputs: Vec<TxOutput>,
        lock_time: u32,
    },
}

impl Transaction {
    pub fn inputs(&self) -> &[TxInput] {
        match self {
            Transaction::Standard { inputs, .. } => inputs,
            Transaction::Coinbase { .. } => &[],
        }
    }

    pub fn inputs_mut(&mut self) -> &mut Vec<TxInput> {
        match self {
            Transaction::Standard { inputs, .. } => inputs,
            Transaction::Coinbase { .. } => panic!("coinbase transactions have no spendable inputs"),
        }
    }

    pub fn outputs(&self) -> &[TxOutput] {
        match self {
            Transaction::Standard { outputs, .. } => outputs,
            Transaction::Coinbase { outputs, .. } => outputs,
        }
    }

    pub fn outputs_mut(&mut self) -> &mut Vec<TxOutput> {
        match self {
            Transaction::Standard { outputs, .. } => outputs,
            Transaction::Coinbase { outputs, .. } => outputs,
        }
    }

    pub fn lock_time(&self) -> u32 {
        match self {
            Transaction::Standard { lock_time, .. } => *lock_time,
            Transaction::Coinbase { lock_time, .. } => *lock_time,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        matches!(self, Transaction::Coinbase { .. })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("transaction serialization is infallible")
    }

    /// Transaction id: double-SHA256 of the canonical serialization, matching
    /// the wire hashing rule used for checksums and signed hashes (§4.1).
    pub fn txid(&self) -> Hash {
        rusty_double_sha256(&self.to_bytes())
    }
}

fn rusty_double_sha256(data: &[u8]) -> Hash {
    use sha2::{Digest, Sha256};
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    second.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outpoint_key_format() {
        let op = OutPoint::new([0xabu8; 32], 7);
        assert_eq!(op.to_key(), format!("{}:7", hex::encode([0xabu8; 32])));
    }

    #[test]
    fn op_return_output_has_zero_value() {
        let out = TxOutput::op_return();
        assert_eq!(out.value, 0);
        assert!(out.is_op_return());
    }

    #[test]
    fn txid_is_deterministic() {
        let tx = Transaction::Standard {
            version: 1,
            inputs: vec![],
            outputs: vec![TxOutput::new(100_000, vec![])],
            lock_time: 0,
        };
        assert_eq!(tx.txid(), tx.txid());
    }
}
