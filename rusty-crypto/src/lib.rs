//! Cryptographic primitives for the PrivateSend mixing core.

pub mod bls;
pub mod ecdsa;
pub mod hash;
pub mod keypair;
pub mod signature;

pub use hash::{double_sha256, wire_checksum};
