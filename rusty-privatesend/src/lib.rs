//! Client-side CoinJoin mixing core ("PrivateSend"): turns a wallet's
//! regular coins into equal-value denominations and mixes them with other
//! participants through a masternode-coordinated session, without ever
//! custodying funds or trusting the masternode with more than what it needs
//! to assemble a shared transaction.
//!
//! The wallet this core sits on top of is an external collaborator, reached
//! only through the [`rusty_wallet::WalletView`], [`rusty_wallet::AddressSource`],
//! [`rusty_wallet::Broadcaster`] and [`rusty_wallet::TransactionSigner`]
//! traits; chain validation and masternode-list maintenance are likewise
//! out of scope and arrive as a [`rusty_shared_types::masternode::MasternodeList`]
//! snapshot from outside.

mod address;
pub mod config;
pub mod denom_store;
pub mod discovery;
pub mod error;
pub mod fees;
pub mod keypair_cache;
pub mod manager;
pub mod peer_pool;
pub mod session;
pub mod workflows;

pub use config::PsConfig;
pub use denom_store::PsDataStore;
pub use error::{MixingError, MixingResult, StartMixingError};
pub use keypair_cache::{KeypairCache, KeypairCacheState};
pub use manager::{ManagerState, MixingManager};
