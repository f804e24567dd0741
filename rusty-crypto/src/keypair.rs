//! Keypair generation and management for Rusty Coin.

use ed25519_dalek::{Keypair, PublicKey, Signature, Signer, Verifier};
use rand::rngs::OsRng;
use log::warn;

/// Represents a cryptographic key pair (public and secret key).
pub struct RustyKeyPair {
    keypair: Keypair,
}

impl RustyKeyPair {
    /// Generates a new random key pair.
    pub fn generate() -> Self {
        let mut csprng = OsRng{};
        let keypair = Keypair::generate(&mut csprng);
        RustyKeyPair { keypair }
    }

    /// Returns the public key of this key pair.
    pub fn public_key(&self) -> PublicKey {
        self.keypair.public
    }



    /// Signs the given message with the secret key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.keypair.sign(message)
    }

    /// Verifies the given signature against the message and public key.
    pub fn verify(public_key: &PublicKey, message: &[u8], signature: &Signature) -> Result<(), ed25519_dalek::SignatureError> {
        public_key.verify(message, signature)
    }

    /// Derives a new key pair from the current one using a derivation path.
    /// This is a placeholder for HD Wallet support.
    pub fn derive_key(&self, _path: &str) -> Result<RustyKeyPair, String> {
        // TODO: Implement actual HD key derivation using a library like `bip32` or `hdwallet`.
        // This is a simplified placeholder and does not provide real HD wallet functionality.
        warn!("HD Wallet derivation is a placeholder and not fully implemented.");
        // For demonstration, we'll just generate a new random keypair.
        Ok(RustyKeyPair::generate())
    }
}