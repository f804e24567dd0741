//! Hashing primitives shared by the wire codec and the mixing core.

use sha2::{Digest, Sha256};

/// `SHA256(SHA256(data))`, used for message checksums (§4.1) and signed
/// hashes (`dsq`, `spork`).
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

/// First four bytes of `double_sha256`, the wire checksum (§4.1). Empty
/// payloads use the constant `0x5DF6E0E2` instead of hashing nothing.
pub fn wire_checksum(payload: &[u8]) -> [u8; 4] {
    const EMPTY_PAYLOAD_CHECKSUM: [u8; 4] = [0x5D, 0xF6, 0xE0, 0xE2];
    if payload.is_empty() {
        return EMPTY_PAYLOAD_CHECKSUM;
    }
    let digest = double_sha256(payload);
    [digest[0], digest[1], digest[2], digest[3]]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_checksum_is_the_fixed_constant() {
        assert_eq!(wire_checksum(&[]), [0x5D, 0xF6, 0xE0, 0xE2]);
    }

    #[test]
    fn double_sha256_is_deterministic() {
        assert_eq!(double_sha256(b"hello"), double_sha256(b"hello"));
        assert_ne!(double_sha256(b"hello"), double_sha256(b"world"));
    }
}
