//! secp256k1 ECDSA recovery, used to verify sporks against a hard-coded
//! spork address (§4.3) without needing the spork sender's raw public key on
//! hand.

use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, Secp256k1};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EcdsaError {
    #[error("signature must be exactly 65 bytes (64 + recovery id)")]
    BadLength,
    #[error("invalid recovery id")]
    BadRecoveryId,
    #[error("malformed signature")]
    Malformed,
    #[error("recovery failed: {0}")]
    RecoveryFailed(String),
}

/// Recovers the public key that produced `signature` over `message_hash`,
/// where `signature` is the 65-byte `[R(32) || S(32) || recid(1)]` encoding
/// used by spork messages.
pub fn recover_pubkey(message_hash: &[u8; 32], signature: &[u8]) -> Result<[u8; 33], EcdsaError> {
    if signature.len() != 65 {
        return Err(EcdsaError::BadLength);
    }
    let recid = RecoveryId::from_i32(signature[64] as i32).map_err(|_| EcdsaError::BadRecoveryId)?;
    let recoverable = RecoverableSignature::from_compact(&signature[..64], recid)
        .map_err(|_| EcdsaError::Malformed)?;

    let secp = Secp256k1::verification_only();
    let message = Message::from_digest(*message_hash);
    let pubkey = secp
        .recover_ecdsa(&message, &recoverable)
        .map_err(|e| EcdsaError::RecoveryFailed(e.to_string()))?;
    Ok(pubkey.serialize())
}

/// Verifies that `signature` over `message_hash` recovers to `expected_pubkey`.
pub fn verify_against_pubkey(
    message_hash: &[u8; 32],
    signature: &[u8],
    expected_pubkey: &[u8; 33],
) -> Result<bool, EcdsaError> {
    let recovered = recover_pubkey(message_hash, signature)?;
    Ok(&recovered == expected_pubkey)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::SecretKey;

    #[test]
    fn recovers_the_signing_key() {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::from_slice(&[0x11; 32]).unwrap();
        let public_key = secp256k1::PublicKey::from_secret_key(&secp, &secret_key);
        let hash = [0x22u8; 32];
        let message = Message::from_digest(hash);
        let recoverable = secp.sign_ecdsa_recoverable(&message, &secret_key);
        let (recid, compact) = recoverable.serialize_compact();
        let mut signature = [0u8; 65];
        signature[..64].copy_from_slice(&compact);
        signature[64] = recid.to_i32() as u8;

        assert!(verify_against_pubkey(&hash, &signature, &public_key.serialize()).unwrap());
    }

    #[test]
    fn rejects_short_signature() {
        assert_eq!(recover_pubkey(&[0u8; 32], &[0u8; 10]), Err(EcdsaError::BadLength));
    }
}
