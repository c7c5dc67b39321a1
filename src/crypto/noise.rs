//! Noise_XX_25519_AESGCM_SHA256 symmetric state, as spoken by WhatsApp Web.
//!
//! Before the handshake finishes a single counter drives the GCM IV for both
//! directions and the running hash is the associated data. Once
//! [`NoiseState::finish`] is called the state splits into two
//! [`TransportCipher`]s that use independent counters and no associated data.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use sha2::{Digest, Sha256};

use crate::crypto::{kdf, CryptoError};

/// Protocol name. Exactly 32 bytes, so it seeds the hash directly.
pub const NOISE_MODE: &[u8; 32] = b"Noise_XX_25519_AESGCM_SHA256\0\0\0\0";

/// 12-byte GCM IV with the counter big-endian in the last four bytes.
fn iv(counter: u32) -> [u8; 12] {
    let mut iv = [0u8; 12];
    iv[8..].copy_from_slice(&counter.to_be_bytes());
    iv
}

fn gcm(key: &[u8; 32]) -> Result<Aes256Gcm, CryptoError> {
    Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKey)
}

/// Handshake state shared by initiator and responder.
pub struct NoiseState {
    hash: [u8; 32],
    salt: [u8; 32],
    key: [u8; 32],
    counter: u32,
}

impl NoiseState {
    /// Start a handshake, authenticating `prologue` (the WA intro header).
    pub fn new(prologue: &[u8]) -> Self {
        let mut state = Self {
            hash: *NOISE_MODE,
            salt: *NOISE_MODE,
            key: *NOISE_MODE,
            counter: 0,
        };
        state.authenticate(prologue);
        state
    }

    /// Current handshake hash.
    pub fn hash(&self) -> &[u8; 32] {
        &self.hash
    }

    /// `h = SHA256(h || data)`
    pub fn authenticate(&mut self, data: &[u8]) {
        let mut hasher = Sha256::new();
        hasher.update(self.hash);
        hasher.update(data);
        self.hash = hasher.finalize().into();
    }

    /// Encrypt with the running hash as associated data, then mix the
    /// ciphertext into the hash.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let ciphertext = gcm(&self.key)?
            .encrypt(
                Nonce::from_slice(&iv(self.counter)),
                Payload {
                    msg: plaintext,
                    aad: &self.hash,
                },
            )
            .map_err(|_| CryptoError::Encrypt)?;
        self.bump()?;
        self.authenticate(&ciphertext);
        Ok(ciphertext)
    }

    /// Inverse of [`NoiseState::encrypt`].
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let plaintext = gcm(&self.key)?
            .decrypt(
                Nonce::from_slice(&iv(self.counter)),
                Payload {
                    msg: ciphertext,
                    aad: &self.hash,
                },
            )
            .map_err(|_| CryptoError::Decrypt)?;
        self.bump()?;
        self.authenticate(ciphertext);
        Ok(plaintext)
    }

    /// Mix input key material into the chaining key. Resets the counter.
    pub fn mix_into_key(&mut self, ikm: &[u8]) -> Result<(), CryptoError> {
        let (salt, key) = kdf::derive_pair(&self.salt, ikm)?;
        self.salt = salt;
        self.key = key;
        self.counter = 0;
        Ok(())
    }

    /// Mix the X25519 shared secret of `private` and `public`.
    pub fn mix_shared_secret(
        &mut self,
        private: &[u8; 32],
        public: &[u8; 32],
    ) -> Result<(), CryptoError> {
        let shared = x25519_dalek::x25519(*private, *public);
        self.mix_into_key(&shared)
    }

    /// Derive the transport keys. The first cipher is the initiator's write
    /// side; a responder swaps the pair.
    pub fn finish(self) -> Result<(TransportCipher, TransportCipher), CryptoError> {
        let (first, second) = kdf::derive_pair(&self.salt, &[])?;
        Ok((TransportCipher::new(first), TransportCipher::new(second)))
    }

    fn bump(&mut self) -> Result<(), CryptoError> {
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or(CryptoError::CounterExhausted)?;
        Ok(())
    }
}

/// AES-256-GCM for one direction of an established connection.
pub struct TransportCipher {
    key: [u8; 32],
    counter: u32,
}

impl TransportCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key, counter: 0 }
    }

    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let out = gcm(&self.key)?
            .encrypt(Nonce::from_slice(&iv(self.counter)), plaintext)
            .map_err(|_| CryptoError::Encrypt)?;
        self.bump()?;
        Ok(out)
    }

    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let out = gcm(&self.key)?
            .decrypt(Nonce::from_slice(&iv(self.counter)), ciphertext)
            .map_err(|_| CryptoError::Decrypt)?;
        self.bump()?;
        Ok(out)
    }

    /// Number of frames processed so far.
    pub fn counter(&self) -> u32 {
        self.counter
    }

    fn bump(&mut self) -> Result<(), CryptoError> {
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or(CryptoError::CounterExhausted)?;
        Ok(())
    }
}

impl std::fmt::Debug for TransportCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportCipher")
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}
