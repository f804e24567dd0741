//! Shared address codec for the demo wallet's address format.
//!
//! `rusty_wallet::Wallet` represents an address as a hex-encoded public key
//! (see its `reserve_address`); several components need to turn such an
//! address back into the `scriptPubkey` it pays, to compare against what a
//! transaction actually contains rather than trust positional ordering. A
//! real deployment would decode whatever address format the wallet uses.

pub(crate) fn to_p2pkh_script(address: &str) -> Vec<u8> {
    let bytes = hex::decode(address).unwrap_or_default();
    let digest = rusty_crypto::double_sha256(&bytes);
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&digest[..20]);
    rusty_shared_types::script::p2pkh_script(&hash)
}
