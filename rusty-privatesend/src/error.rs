//! Error kinds for the mixing core (§7). Component-level callables return
//! these to their caller; only the mixing manager (C8) decides whether an
//! error means "retry locally" or "stop mixing with a visible reason".

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MixingError {
    #[error("network error: {0}")]
    Network(#[from] rusty_network::NetworkError),

    #[error("wallet error: {0}")]
    Wallet(#[from] rusty_wallet::WalletError),

    #[error("not enough funds for this operation")]
    NotEnoughFunds,

    #[error("address {0} not found in the keypair cache")]
    NotFoundInKeypairs(String),

    #[error("signed {signed} of {expected} expected inputs")]
    SignWithKeypairsFailed { signed: usize, expected: usize },

    #[error("failed to classify incoming PrivateSend transaction: {0}")]
    AddPsDataError(String),

    #[error("refusing to broadcast: spends a coin currently reserved for mixing")]
    PossibleDoubleSpend,

    #[error("refusing to broadcast: pays a PrivateSend-reserved address")]
    SpendToPsAddresses,

    #[error("no dynamic fee estimates available")]
    NoDynamicFeeEstimates,

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("signature verification failed: {0}")]
    SignatureVerification(String),

    #[error("session timeout: {0}")]
    SessionTimeout(String),

    #[error("masternode selection exhausted after {0} attempts")]
    MasternodeSelectionExhausted(usize),
}

pub type MixingResult<T> = Result<T, MixingError>;

/// Fixed catalog of user-facing reasons a mixing start can fail with (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMixingError {
    NotEnabled,
    Initializing,
    AlreadyRunning,
    FindUntrackedRun,
    Errored,
    NoNetwork,
    NoP2p,
    LlmqDataNotReady,
    MnsDataNotReady,
    WatchingOnly,
    AllMixed,
    UnknownState,
}

impl std::fmt::Display for StartMixingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StartMixingError::NotEnabled => "NOT_ENABLED",
            StartMixingError::Initializing => "INITIALIZING",
            StartMixingError::AlreadyRunning => "ALREADY_RUNNING",
            StartMixingError::FindUntrackedRun => "FIND_UNTRACKED_RUN",
            StartMixingError::Errored => "ERRORED",
            StartMixingError::NoNetwork => "NO_NETWORK",
            StartMixingError::NoP2p => "NO_P2P",
            StartMixingError::LlmqDataNotReady => "LLMQ_DATA_NOT_READY",
            StartMixingError::MnsDataNotReady => "MNS_DATA_NOT_READY",
            StartMixingError::WatchingOnly => "WATCHING_ONLY",
            StartMixingError::AllMixed => "ALL_MIXED",
            StartMixingError::UnknownState => "UNKNOWN_STATE",
        };
        f.write_str(s)
    }
}
