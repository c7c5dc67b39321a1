//! Cryptographic primitives for the WhatsApp Web transport.
//!
//! - Curve25519 key pairs and signed pre-keys for the credentials
//! - HKDF-SHA256 and XEdDSA signatures
//! - the Noise XX symmetric state and transport ciphers

mod kdf;
mod keypair;
mod noise;

use thiserror::Error;

pub use keypair::{verify_signature, KeyPair, SignedKeyPair, KEY_BUNDLE_TYPE};
pub use noise::{NoiseState, TransportCipher, NOISE_MODE};

/// Errors raised by key derivation and the AEAD layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("invalid key")]
    InvalidKey,
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed")]
    Decrypt,
    #[error("nonce counter exhausted")]
    CounterExhausted,
    #[error("cannot derive {0} bytes of key material")]
    KeyDerivation(usize),
}
