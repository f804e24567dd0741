// rusty-wallet/src/lib.rs
//! `rusty-wallet` owns key derivation, secure key storage, and the UTXO set
//! of the surrounding payments wallet. The mixing core in `rusty-privatesend`
//! treats this crate purely as an external collaborator: it never reaches
//! into wallet internals, only through the [`WalletView`], [`AddressSource`],
//! [`Broadcaster`] and [`TransactionSigner`] traits below.

pub mod keys;
pub mod storage;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use keys::HDWallet;
use rusty_shared_types::{Hash, OutPoint, Transaction};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("transaction error: {0}")]
    TransactionError(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("address {0} not found in this wallet")]
    UnknownAddress(String),

    #[error("watching-only wallet cannot sign")]
    WatchingOnly,
}

pub type WalletResult<T> = Result<T, WalletError>;

/// A wallet-owned coin, as seen from outside the wallet.
#[derive(Debug, Clone)]
pub struct Utxo {
    pub outpoint: OutPoint,
    pub value: u64,
    pub address: String,
    pub confirmations: u32,
}

/// Which keypair bucket an address belongs to (§4.5). The wallet is
/// responsible for keeping these logically separate so that, on a
/// hardware-keystore wallet, `PsSpendable`/`PsCoins`/`PsChange` addresses
/// can be routed to a dedicated PS keystore instead of the main one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyBucket {
    Incoming,
    Spendable,
    PsSpendable,
    PsCoins,
    PsChange,
}

/// Read-only view onto the wallet's coins and transaction visibility,
/// consumed by denomination bookkeeping (C4) and PS-data discovery (C9).
pub trait WalletView: Send + Sync {
    fn utxos(&self) -> Vec<Utxo>;
    fn is_confirmed(&self, txid: &Hash) -> bool;
    fn is_islocked(&self, txid: &Hash) -> bool;
    /// Txids the wallet has seen locally but the network has not yet relayed
    /// back to it (§4.6.5: broadcast-skip condition for `next_to_send`).
    fn unverified_txids(&self) -> HashSet<Hash>;
    fn is_watching_only(&self) -> bool;
}

/// Address reservation, scoped by workflow UUID so `cleanup(force)` (§4.6.6)
/// can release everything a workflow touched in one call.
pub trait AddressSource: Send + Sync {
    fn reserve_address(&self, bucket: KeyBucket, reserved_by: uuid::Uuid) -> WalletResult<String>;
    fn release_addresses(&self, reserved_by: uuid::Uuid);
    fn release_address(&self, address: &str);
}

/// Broadcast and local-tx bookkeeping. The mixing core never writes to the
/// wallet's UTXO set directly — only through `add_local_tx`/`broadcast`.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(&self, tx: &Transaction) -> WalletResult<Hash>;
    fn add_local_tx(&self, tx: Transaction);
    fn remove_local_tx(&self, txid: &Hash);
}

/// Produces a `scriptSig` for one input of a transaction, given the address
/// that owns it. Implementations must refuse on watching-only wallets.
pub trait TransactionSigner: Send + Sync {
    fn sign_input(&self, address: &str, tx: &Transaction, input_index: usize) -> WalletResult<Vec<u8>>;
}

/// In-memory reference implementation of the four collaborator traits,
/// backed by a single [`HDWallet`]. Demonstrates the interfaces; a real
/// deployment would back `utxos`/`broadcast` with chain-synced state.
pub struct Wallet {
    hd_wallet: HDWallet,
    utxos: Mutex<HashMap<String, Utxo>>,
    confirmed: Mutex<HashSet<Hash>>,
    islocked: Mutex<HashSet<Hash>>,
    unverified: Mutex<HashSet<Hash>>,
    reservations: Mutex<HashMap<uuid::Uuid, Vec<String>>>,
    next_index: Mutex<u32>,
    watching_only: bool,
}

impl Wallet {
    pub fn new() -> WalletResult<Arc<Self>> {
        let hd_wallet = HDWallet::new_random().map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
        Ok(Arc::new(Self::from_hd_wallet(hd_wallet, false)))
    }

    pub fn from_mnemonic(mnemonic: &str) -> WalletResult<Arc<Self>> {
        let hd_wallet = HDWallet::from_mnemonic(mnemonic).map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
        Ok(Arc::new(Self::from_hd_wallet(hd_wallet, false)))
    }

    fn from_hd_wallet(hd_wallet: HDWallet, watching_only: bool) -> Self {
        Self {
            hd_wallet,
            utxos: Mutex::new(HashMap::new()),
            confirmed: Mutex::new(HashSet::new()),
            islocked: Mutex::new(HashSet::new()),
            unverified: Mutex::new(HashSet::new()),
            reservations: Mutex::new(HashMap::new()),
            next_index: Mutex::new(0),
            watching_only,
        }
    }

    pub fn mnemonic_phrase(&self) -> String {
        self.hd_wallet.mnemonic_phrase()
    }

    /// Test/demo helper: injects a coin as if it had been received on-chain.
    pub fn deposit(&self, outpoint: OutPoint, value: u64, address: String, confirmations: u32) {
        self.utxos.lock().unwrap().insert(outpoint.to_key(), Utxo { outpoint, value, address, confirmations });
    }

    pub fn mark_confirmed(&self, txid: Hash) {
        self.confirmed.lock().unwrap().insert(txid);
    }

    pub fn mark_islocked(&self, txid: Hash) {
        self.islocked.lock().unwrap().insert(txid);
    }

    fn derive_path(&self, bucket: KeyBucket, index: u32) -> String {
        let branch = match bucket {
            KeyBucket::Incoming => 0,
            KeyBucket::Spendable => 1,
            KeyBucket::PsSpendable => 2,
            KeyBucket::PsCoins => 3,
            KeyBucket::PsChange => 4,
        };
        format!("m/44'/5'/{branch}'/0/{index}")
    }
}

impl WalletView for Wallet {
    fn utxos(&self) -> Vec<Utxo> {
        self.utxos.lock().unwrap().values().cloned().collect()
    }

    fn is_confirmed(&self, txid: &Hash) -> bool {
        self.confirmed.lock().unwrap().contains(txid)
    }

    fn is_islocked(&self, txid: &Hash) -> bool {
        self.islocked.lock().unwrap().contains(txid)
    }

    fn unverified_txids(&self) -> HashSet<Hash> {
        self.unverified.lock().unwrap().clone()
    }

    fn is_watching_only(&self) -> bool {
        self.watching_only
    }
}

impl AddressSource for Wallet {
    fn reserve_address(&self, bucket: KeyBucket, reserved_by: uuid::Uuid) -> WalletResult<String> {
        let index = {
            let mut next = self.next_index.lock().unwrap();
            let i = *next;
            *next += 1;
            i
        };
        let path = self.derive_path(bucket, index);
        let pubkey = self
            .hd_wallet
            .derive_key(&path)
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?
            .public
            .to_bytes();
        let address = hex::encode(pubkey);
        self.reservations.lock().unwrap().entry(reserved_by).or_default().push(address.clone());
        Ok(address)
    }

    fn release_addresses(&self, reserved_by: uuid::Uuid) {
        self.reservations.lock().unwrap().remove(&reserved_by);
    }

    fn release_address(&self, address: &str) {
        let mut reservations = self.reservations.lock().unwrap();
        for addresses in reservations.values_mut() {
            addresses.retain(|a| a != address);
        }
    }
}

#[async_trait]
impl Broadcaster for Wallet {
    async fn broadcast(&self, tx: &Transaction) -> WalletResult<Hash> {
        if self.watching_only {
            return Err(WalletError::WatchingOnly);
        }
        let txid = tx.txid();
        self.unverified.lock().unwrap().insert(txid);
        Ok(txid)
    }

    fn add_local_tx(&self, tx: Transaction) {
        let txid = tx.txid();
        self.unverified.lock().unwrap().insert(txid);
    }

    fn remove_local_tx(&self, txid: &Hash) {
        self.unverified.lock().unwrap().remove(txid);
        self.confirmed.lock().unwrap().remove(txid);
    }
}

impl TransactionSigner for Wallet {
    fn sign_input(&self, address: &str, tx: &Transaction, input_index: usize) -> WalletResult<Vec<u8>> {
        if self.watching_only {
            return Err(WalletError::WatchingOnly);
        }
        if tx.inputs().get(input_index).is_none() {
            return Err(WalletError::TransactionError(format!("no input at index {input_index}")));
        }
        // The demo derivation is address-agnostic (see `keys::HDWallet::derive_key`);
        // a production signer would look up the exact derivation path for `address`.
        let _ = address;
        self.hd_wallet.sign(&tx.txid()).map_err(|e| WalletError::KeyDerivation(e.to_string()))
    }
}
