//! Mix session (C7, §4.7): masternode selection, the dsa/dssu/dsq/dsi/dsf/
//! dss/dsc protocol flow, and verification of masternode-signed queue
//! announcements.
//!
//! This module models the protocol as a state machine driven by incoming
//! [`Message`]s; the actual socket I/O belongs to the peer pool (C3) and the
//! manager (C8), which hold the live [`PeerConnection`] and feed it here.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use rand::Rng;
use rusty_network::message::{DsqPayload, PoolState};
use rusty_shared_types::denom::PRIVATESEND_SESSION_MSG_TIMEOUT_SECS;
use rusty_shared_types::masternode::{MasternodeEntry, MasternodeId, MasternodeList};
use rusty_shared_types::Hash;

use crate::error::{MixingError, MixingResult};

pub const MASTERNODE_SELECTION_MAX_ATTEMPTS: usize = 10;
/// Share of selection attempts that prefer a masternode with an outstanding
/// `dsq` ready-announcement over a uniformly random enabled one (§4.7).
/// A fixed constant per an open design question (§9); kept tunable in one
/// place rather than baked into the selection logic below.
pub const DSQ_PREFERENCE_RATE: f64 = 0.67;

pub const SESSION_MSG_TIMEOUT: Duration = Duration::from_secs(PRIVATESEND_SESSION_MSG_TIMEOUT_SECS);

/// Packs a `dsq` announcement the same way the signing masternode does,
/// before hashing: `int32 denom || outpoint || int64 nTime || uint8 fReady`.
fn dsq_signed_payload(dsq: &DsqPayload) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + 36 + 8 + 1);
    buf.extend_from_slice(&dsq.denom.to_le_bytes());
    buf.extend_from_slice(&dsq.masternode_outpoint.txid);
    buf.extend_from_slice(&dsq.masternode_outpoint.vout.to_le_bytes());
    buf.extend_from_slice(&dsq.time.to_le_bytes());
    buf.push(dsq.ready as u8);
    buf
}

pub fn dsq_message_hash(dsq: &DsqPayload) -> Hash {
    rusty_crypto::double_sha256(&dsq_signed_payload(dsq))
}

/// Verifies a `dsq`'s BLS signature against the announcing masternode's
/// operator public key (§4.7 S6).
pub fn verify_dsq(dsq: &DsqPayload, masternode: &MasternodeEntry) -> MixingResult<bool> {
    if dsq.signature.len() != 96 {
        return Err(MixingError::Protocol(format!("dsq signature must be 96 bytes, got {}", dsq.signature.len())));
    }
    let mut sig = [0u8; 96];
    sig.copy_from_slice(&dsq.signature);
    let hash = dsq_message_hash(dsq);
    rusty_crypto::bls::verify(&masternode.operator_public_key, &hash, &sig)
        .map_err(|e| MixingError::SignatureVerification(e.to_string()))
}

/// Picks one candidate masternode, excluding `exclude` (already-tried this
/// round) and anything in the recent-use ring. With probability
/// `DSQ_PREFERENCE_RATE` prefers a masternode with an outstanding ready
/// `dsq`; otherwise (or if none is ready) falls back to a uniformly random
/// enabled one.
pub fn select_masternode(
    list: &MasternodeList,
    exclude: &HashSet<MasternodeId>,
    ready: &[MasternodeId],
    rng: &mut impl Rng,
) -> Option<MasternodeId> {
    let prefer_ready = rng.gen_bool(DSQ_PREFERENCE_RATE);
    if prefer_ready {
        let candidates: Vec<MasternodeId> = ready
            .iter()
            .copied()
            .filter(|id| !exclude.contains(id) && list.get(id).map(|e| e.is_enabled()).unwrap_or(false))
            .collect();
        if !candidates.is_empty() {
            let idx = rng.gen_range(0, candidates.len());
            return Some(candidates[idx]);
        }
    }

    let candidates: Vec<MasternodeId> =
        list.enabled().map(|e| e.id).filter(|id| !exclude.contains(id)).collect();
    if candidates.is_empty() {
        return None;
    }
    let idx = rng.gen_range(0, candidates.len());
    Some(candidates[idx])
}

/// Repeatedly selects a masternode, letting the caller report a failed
/// attempt (e.g. connect refused, queue already full) via `exclude`, up to
/// `MASTERNODE_SELECTION_MAX_ATTEMPTS` (§9 Open Question: preserved as a
/// named constant rather than a hard-coded loop bound).
pub fn pick_masternode_with_retries(
    list: &MasternodeList,
    ready: &[MasternodeId],
    mut tried: impl FnMut(MasternodeId) -> bool,
    rng: &mut impl Rng,
) -> MixingResult<MasternodeId> {
    let mut exclude = HashSet::new();
    for _ in 0..MASTERNODE_SELECTION_MAX_ATTEMPTS {
        let Some(candidate) = select_masternode(list, &exclude, ready, rng) else {
            break;
        };
        if tried(candidate) {
            return Ok(candidate);
        }
        exclude.insert(candidate);
    }
    Err(MixingError::MasternodeSelectionExhausted(MASTERNODE_SELECTION_MAX_ATTEMPTS))
}

/// Local view of one in-progress mix session: the pool state reported by
/// the masternode via `dssu`, plus the deadline for the next expected
/// message before the session is abandoned as timed out (§4.7).
pub struct MixSession {
    pub session_id: Option<i32>,
    pub denom: i32,
    pub state: PoolState,
    pub entries_count: i32,
    last_message_at: Instant,
}

impl MixSession {
    pub fn new(denom: i32) -> Self {
        Self { session_id: None, denom, state: PoolState::Idle, entries_count: 0, last_message_at: Instant::now() }
    }

    /// Records a `dssu` status update, advancing session id/state/entry count.
    pub fn on_dssu(&mut self, session_id: i32, state: PoolState, entries_count: i32) {
        self.session_id = Some(session_id);
        self.state = state;
        self.entries_count = entries_count;
        self.last_message_at = Instant::now();
    }

    pub fn touch(&mut self) {
        self.last_message_at = Instant::now();
    }

    pub fn is_timed_out(&self, now: Instant) -> bool {
        now.duration_since(self.last_message_at) > SESSION_MSG_TIMEOUT
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, PoolState::Success | PoolState::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rusty_shared_types::masternode::MasternodeStatus;
    use rusty_shared_types::OutPoint;

    fn entry(byte: u8) -> MasternodeEntry {
        MasternodeEntry {
            id: MasternodeId(OutPoint::new([byte; 32], 0)),
            service: "127.0.0.1:9937".parse().unwrap(),
            operator_public_key: [byte; 48],
            status: MasternodeStatus::Enabled,
        }
    }

    #[test]
    fn dsq_with_flipped_byte_fails_verification() {
        let keypair = blstrs_test_signature();
        let (masternode, dsq) = keypair;
        assert!(verify_dsq(&dsq, &masternode).unwrap());

        let mut tampered = dsq.clone();
        let last = tampered.signature.len() - 1;
        tampered.signature[last] ^= 0x01;
        assert!(!verify_dsq(&tampered, &masternode).unwrap());
    }

    /// Builds a self-consistent (masternode, dsq) pair signed with a random
    /// BLS key, for exercising the verify path without a live masternode.
    fn blstrs_test_signature() -> (MasternodeEntry, DsqPayload) {
        use bls12_381::{G1Affine, G2Affine, G2Projective, Scalar};
        use group::Curve;

        let secret = Scalar::from(424242u64);
        let public = (G1Affine::generator() * secret).to_affine();

        let dsq = DsqPayload {
            denom: 1,
            masternode_outpoint: OutPoint::new([9u8; 32], 0),
            time: 1_700_000_000,
            ready: true,
            signature: vec![0u8; 96],
        };
        let hash = dsq_message_hash(&dsq);
        let message_point = G2Projective::generator() * Scalar::from_bytes_wide(&{
            let digest = rusty_crypto::double_sha256(&hash);
            let mut wide = [0u8; 64];
            wide[..32].copy_from_slice(&digest);
            wide
        });
        let sig = (message_point * secret).to_affine();

        let mut masternode = entry(9);
        masternode.operator_public_key = public.to_compressed();
        let mut dsq = dsq;
        dsq.signature = sig.to_compressed().to_vec();
        (masternode, dsq)
    }

    #[test]
    fn selection_excludes_already_tried_masternodes() {
        let mut list = MasternodeList::new();
        list.insert(entry(1));
        list.insert(entry(2));
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen = HashSet::new();
        let picked = pick_masternode_with_retries(
            &list,
            &[],
            |id| {
                seen.insert(id);
                seen.len() >= 2
            },
            &mut rng,
        )
        .unwrap();
        assert!(seen.contains(&picked));
    }

    #[test]
    fn selection_exhausts_after_max_attempts_when_all_refused() {
        let mut list = MasternodeList::new();
        list.insert(entry(1));
        let mut rng = StdRng::seed_from_u64(3);
        let result = pick_masternode_with_retries(&list, &[], |_| false, &mut rng);
        assert!(matches!(result, Err(MixingError::MasternodeSelectionExhausted(MASTERNODE_SELECTION_MAX_ATTEMPTS))));
    }

    #[test]
    fn session_times_out_after_msg_timeout() {
        let mut session = MixSession::new(1);
        session.on_dssu(1, PoolState::Queue, 1);
        assert!(!session.is_timed_out(Instant::now()));
        assert!(session.is_timed_out(Instant::now() + SESSION_MSG_TIMEOUT + Duration::from_secs(1)));
    }
}
