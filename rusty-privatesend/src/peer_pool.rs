//! Peer pool (C3, §4.2/§4.3): keeps a handful of `PeerConnection`s alive,
//! resolves new candidates from static peers or a seed list, and gathers
//! sporks from a quorum of distinct peers before trusting a value.
//!
//! DNS-over-HTTPS seed resolution is out of scope (spec §1); this module
//! only needs an interface for *some* resolver to plug into, so seed
//! lookups are abstracted behind [`SeedResolver`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rusty_crypto::ecdsa::{self, EcdsaError};
use rusty_network::message::SporkPayload;
use rusty_network::PeerConnection;

/// How often the pool loop re-evaluates its peer set and reconnects.
pub const POOL_TICK: Duration = Duration::from_millis(100);
/// How long a ban lasts before a peer becomes eligible again.
pub const BAN_DURATION: Duration = Duration::from_secs(60 * 60);

/// Compressed secp256k1 spork-signing public key (§4.3), hard-coded per
/// network the same way the original client embeds it. This exact byte
/// value is a placeholder: nothing in the retrieved corpus carries an
/// original-source reference for the real mainnet/testnet constant, so a
/// host connecting to a real network must override it (`PeerPool::new`)
/// with the genuine value rather than rely on this default.
pub const PLACEHOLDER_SPORK_PUBKEY: [u8; 33] = [0x02; 33];

/// Packs a `spork` the same way the signing key does before hashing, when
/// the `NEW_SIGS` spork is active: `int32 id || int64 value || int64 time`.
fn spork_packed_preimage(spork: &SporkPayload) -> Vec<u8> {
    let mut buf = Vec::with_capacity(20);
    buf.extend_from_slice(&spork.id.to_le_bytes());
    buf.extend_from_slice(&spork.value.to_le_bytes());
    buf.extend_from_slice(&spork.time_signed.to_le_bytes());
    buf
}

/// Legacy (pre-`NEW_SIGS`) preimage: the network's message magic followed
/// by an ASCII concatenation of the spork's fields, matching how the
/// pre-`NEW_SIGS` client signed sporks before the packed binary format.
fn spork_legacy_preimage(spork: &SporkPayload) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&rusty_network::protocol::MAINNET_MAGIC);
    buf.extend_from_slice(format!("{}{}{}", spork.id, spork.value, spork.time_signed).as_bytes());
    buf
}

/// The hash a spork's ECDSA signature is recovered against, chosen by
/// whether the `NEW_SIGS` spork is active (§4.3).
pub fn spork_message_hash(spork: &SporkPayload, new_sigs: bool) -> [u8; 32] {
    let preimage = if new_sigs { spork_packed_preimage(spork) } else { spork_legacy_preimage(spork) };
    rusty_crypto::double_sha256(&preimage)
}

/// Resolves a list of candidate peer addresses to dial. A static list is
/// always available; a DNS-over-HTTPS-backed implementation (or any other
/// seed source) can be plugged in without the pool caring which it got.
pub trait SeedResolver: Send + Sync {
    fn resolve(&self) -> Vec<SocketAddr>;
}

/// Trivial resolver over a fixed address list, used when no seed service is
/// configured.
pub struct StaticSeedResolver {
    addrs: Vec<SocketAddr>,
}

impl StaticSeedResolver {
    pub fn new(addrs: Vec<SocketAddr>) -> Self {
        Self { addrs }
    }
}

impl SeedResolver for StaticSeedResolver {
    fn resolve(&self) -> Vec<SocketAddr> {
        self.addrs.clone()
    }
}

struct BannedPeer {
    until: Instant,
}

/// Accumulates per-spork-id signature votes from distinct peers, reporting
/// the strongest (highest `time_signed`) signature-valid value once
/// `ceil(peer_count * 0.51)` distinct peers have reported one for that id
/// (§4.3). Every vote is required to recover, by ECDSA, to
/// [`PLACEHOLDER_SPORK_PUBKEY`] (or whatever key `new` was given) before it
/// is accepted at all.
pub struct SporkTally {
    votes: HashMap<i32, HashMap<SocketAddr, SporkPayload>>,
    spork_pubkey: [u8; 33],
}

impl SporkTally {
    pub fn new(spork_pubkey: [u8; 33]) -> Self {
        Self { votes: HashMap::new(), spork_pubkey }
    }

    /// Verifies `spork`'s signature before accepting it; returns `Err` (and
    /// records nothing) if the signature doesn't recover to the configured
    /// spork key. Callers should ban the sender on `Err` (§4.3).
    pub fn record(&mut self, from: SocketAddr, spork: SporkPayload, new_sigs: bool) -> Result<(), EcdsaError> {
        let hash = spork_message_hash(&spork, new_sigs);
        if !ecdsa::verify_against_pubkey(&hash, &spork.signature, &self.spork_pubkey)? {
            return Err(EcdsaError::RecoveryFailed("signature does not recover to the configured spork key".into()));
        }
        self.votes.entry(spork.id).or_default().insert(from, spork);
        Ok(())
    }

    /// Required number of distinct confirming peers for a spork id to be
    /// trusted, given the pool currently has `peer_count` connected peers.
    pub fn required_quorum(peer_count: usize) -> usize {
        ((peer_count as f64) * 0.51).ceil() as usize
    }

    /// The strongest (highest `time_signed`) signature-valid value reported
    /// for `id`, if quorum of distinct peers has reported one at all.
    pub fn trusted_value(&self, id: i32, peer_count: usize) -> Option<i64> {
        let votes = self.votes.get(&id)?;
        if votes.len() < Self::required_quorum(peer_count) {
            return None;
        }
        votes.values().max_by_key(|spork| spork.time_signed).map(|spork| spork.value)
    }
}

/// Tracks connected peers, a ban list, and the most recent spork tally.
/// Driven by the manager's pool loop on a `POOL_TICK` cadence; connecting
/// and reading from peers is delegated to [`PeerConnection`].
pub struct PeerPool {
    peers: HashMap<SocketAddr, PeerConnection>,
    banned: HashMap<SocketAddr, BannedPeer>,
    pub sporks: SporkTally,
    max_peers: usize,
}

impl PeerPool {
    pub fn new(max_peers: usize, spork_pubkey: [u8; 33]) -> Self {
        Self { peers: HashMap::new(), banned: HashMap::new(), sporks: SporkTally::new(spork_pubkey), max_peers }
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn needs_more_peers(&self) -> bool {
        self.peers.len() < self.max_peers
    }

    pub fn is_banned(&mut self, addr: &SocketAddr, now: Instant) -> bool {
        if let Some(ban) = self.banned.get(addr) {
            if ban.until > now {
                return true;
            }
            self.banned.remove(addr);
        }
        false
    }

    pub fn ban(&mut self, addr: SocketAddr, now: Instant) {
        self.peers.remove(&addr);
        self.banned.insert(addr, BannedPeer { until: now + BAN_DURATION });
    }

    /// Records a `spork` announcement from `from`, banning the sender if
    /// its signature doesn't recover to the configured spork key (§4.3).
    pub fn record_spork(&mut self, from: SocketAddr, spork: SporkPayload, new_sigs: bool, now: Instant) {
        if self.sporks.record(from, spork, new_sigs).is_err() {
            self.ban(from, now);
        }
    }

    pub fn insert(&mut self, addr: SocketAddr, conn: PeerConnection) {
        self.peers.insert(addr, conn);
    }

    pub fn remove(&mut self, addr: &SocketAddr) {
        self.peers.remove(addr);
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<&PeerConnection> {
        self.peers.get(addr)
    }

    pub fn addrs(&self) -> Vec<SocketAddr> {
        self.peers.keys().copied().collect()
    }

    /// Candidates worth dialing right now: from `resolver`, minus already
    /// connected and currently banned peers, capped at however many more are
    /// needed to reach `max_peers`.
    pub fn dial_candidates(&mut self, resolver: &dyn SeedResolver, now: Instant) -> Vec<SocketAddr> {
        let needed = self.max_peers.saturating_sub(self.peers.len());
        if needed == 0 {
            return Vec::new();
        }
        resolver
            .resolve()
            .into_iter()
            .filter(|addr| !self.peers.contains_key(addr) && !self.is_banned(addr, now))
            .take(needed)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::{Message, Secp256k1, SecretKey};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    /// A (secret, compressed pubkey) pair usable as a test spork key, plus a
    /// signer for `spork_signed_by`.
    fn test_spork_key() -> (SecretKey, [u8; 33]) {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[0x7a; 32]).unwrap();
        let public = secp256k1::PublicKey::from_secret_key(&secp, &secret);
        (secret, public.serialize())
    }

    fn spork_signed_by(secret: &SecretKey, id: i32, value: i64, time_signed: i64, new_sigs: bool) -> SporkPayload {
        let mut spork = SporkPayload { id, value, time_signed, signature: Vec::new() };
        let hash = spork_message_hash(&spork, new_sigs);
        let secp = Secp256k1::new();
        let message = Message::from_digest(hash);
        let recoverable = secp.sign_ecdsa_recoverable(&message, secret);
        let (recid, compact) = recoverable.serialize_compact();
        let mut signature = vec![0u8; 65];
        signature[..64].copy_from_slice(&compact);
        signature[64] = recid.to_i32() as u8;
        spork.signature = signature;
        spork
    }

    #[test]
    fn quorum_requires_majority_of_connected_peers() {
        assert_eq!(SporkTally::required_quorum(5), 3);
        assert_eq!(SporkTally::required_quorum(2), 2);
        assert_eq!(SporkTally::required_quorum(10), 6);
    }

    #[test]
    fn trusted_value_needs_quorum_of_distinct_peers() {
        let (secret, pubkey) = test_spork_key();
        let mut tally = SporkTally::new(pubkey);
        tally.record(addr(1), spork_signed_by(&secret, 10, 1, 100, true), true).unwrap();
        tally.record(addr(2), spork_signed_by(&secret, 10, 1, 100, true), true).unwrap();
        assert_eq!(tally.trusted_value(10, 5), None);
        tally.record(addr(3), spork_signed_by(&secret, 10, 1, 100, true), true).unwrap();
        assert_eq!(tally.trusted_value(10, 5), Some(1));
    }

    #[test]
    fn trusted_value_picks_the_highest_time_signed_once_at_quorum() {
        let (secret, pubkey) = test_spork_key();
        let mut tally = SporkTally::new(pubkey);
        tally.record(addr(1), spork_signed_by(&secret, 20, 1, 100, true), true).unwrap();
        tally.record(addr(2), spork_signed_by(&secret, 20, 2, 200, true), true).unwrap();
        assert_eq!(tally.trusted_value(20, 2), Some(2));
    }

    #[test]
    fn record_rejects_a_spork_signed_by_the_wrong_key() {
        let (_, pubkey) = test_spork_key();
        let (other_secret, _) = {
            let secp = Secp256k1::new();
            let secret = SecretKey::from_slice(&[0x11; 32]).unwrap();
            let public = secp256k1::PublicKey::from_secret_key(&secp, &secret);
            (secret, public.serialize())
        };
        let mut tally = SporkTally::new(pubkey);
        let forged = spork_signed_by(&other_secret, 30, 1, 100, true);
        assert!(tally.record(addr(1), forged, true).is_err());
    }

    #[test]
    fn legacy_and_new_sigs_hashes_differ() {
        let spork = SporkPayload { id: 1, value: 2, time_signed: 3, signature: Vec::new() };
        assert_ne!(spork_message_hash(&spork, true), spork_message_hash(&spork, false));
    }

    #[test]
    fn record_spork_bans_the_sender_on_invalid_signature() {
        let (_, pubkey) = test_spork_key();
        let mut pool = PeerPool::new(4, pubkey);
        let now = Instant::now();
        let forged = SporkPayload { id: 1, value: 1, time_signed: 1, signature: vec![0u8; 65] };
        pool.record_spork(addr(1), forged, true, now);
        assert!(pool.is_banned(&addr(1), now));
    }

    #[test]
    fn ban_expires_after_duration() {
        let mut pool = PeerPool::new(4, PLACEHOLDER_SPORK_PUBKEY);
        let now = Instant::now();
        pool.ban(addr(1), now);
        assert!(pool.is_banned(&addr(1), now));
        assert!(!pool.is_banned(&addr(1), now + BAN_DURATION + Duration::from_secs(1)));
    }

    #[test]
    fn dial_candidates_skips_banned_and_connected() {
        let mut pool = PeerPool::new(2, PLACEHOLDER_SPORK_PUBKEY);
        let now = Instant::now();
        pool.ban(addr(1), now);
        let resolver = StaticSeedResolver::new(vec![addr(1), addr(2), addr(3)]);
        let candidates = pool.dial_candidates(&resolver, now);
        assert_eq!(candidates, vec![addr(2), addr(3)]);
    }
}
