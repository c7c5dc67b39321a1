//! Curve25519 key pairs used for the Noise handshake and Signal identity.

use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::montgomery::MontgomeryPoint;
use curve25519_dalek::scalar::Scalar;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::auth::buffer_json;

/// A Curve25519 key pair.
///
/// Persisted as `{ "private": Buffer, "public": Buffer }`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    #[serde(with = "buffer_json::fixed")]
    pub private: [u8; 32],
    #[serde(with = "buffer_json::fixed")]
    pub public: [u8; 32],
}

impl KeyPair {
    /// Generate a new random key pair.
    pub fn generate() -> Self {
        let mut private = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut private);

        Self::from_private_key(clamp(private))
    }

    /// Rebuild a key pair from its private half.
    pub fn from_private_key(private: [u8; 32]) -> Self {
        let secret = StaticSecret::from(private);
        let public = PublicKey::from(&secret);

        Self {
            private,
            public: *public.as_bytes(),
        }
    }

    /// XEdDSA signature over `message`, verifiable with the Curve25519
    /// public key alone.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        let mut nonce = [0u8; 64];
        rand::thread_rng().fill_bytes(&mut nonce);

        let key = clamp(self.private);
        let a = Scalar::from_bytes_mod_order(key);
        let ed_public = EdwardsPoint::mul_base(&a).compress();
        let sign_bit = ed_public.as_bytes()[31] & 0x80;

        let r = hash_to_scalar(&[&XEDDSA_PREFIX, &key, message, &nonce]);
        let cap_r = EdwardsPoint::mul_base(&r).compress();
        let h = hash_to_scalar(&[cap_r.as_bytes(), ed_public.as_bytes(), message]);
        let s = h * a + r;

        let mut signature = [0u8; 64];
        signature[..32].copy_from_slice(cap_r.as_bytes());
        signature[32..].copy_from_slice(s.as_bytes());
        // s < 2^253, so the top bit is free to carry the sign of A.
        signature[63] &= 0x7f;
        signature[63] |= sign_bit;
        signature
    }

    /// Sign `0x05 || other.public` with this key.
    pub fn sign_public(&self, other: &KeyPair) -> [u8; 64] {
        self.sign(&bundle_public(&other.public))
    }
}

/// Check an XEdDSA signature made by [`KeyPair::sign`].
pub fn verify_signature(public: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> bool {
    let sign_bit = (signature[63] & 0x80) >> 7;
    let Some(a_point) = MontgomeryPoint(*public).to_edwards(sign_bit) else {
        return false;
    };

    let mut s_bytes = [0u8; 32];
    s_bytes.copy_from_slice(&signature[32..]);
    s_bytes[31] &= 0x7f;
    let Some(s) = Option::<Scalar>::from(Scalar::from_canonical_bytes(s_bytes)) else {
        return false;
    };

    let cap_r = &signature[..32];
    let h = hash_to_scalar(&[cap_r, a_point.compress().as_bytes(), message]);
    let check = EdwardsPoint::vartime_double_scalar_mul_basepoint(&h, &(-a_point), &s).compress();
    check.as_bytes()[..] == *cap_r
}

/// `hash1` domain separation: 0xFE followed by 31 bytes of 0xFF.
const XEDDSA_PREFIX: [u8; 32] = {
    let mut prefix = [0xff; 32];
    prefix[0] = 0xfe;
    prefix
};

fn clamp(mut private: [u8; 32]) -> [u8; 32] {
    private[0] &= 248;
    private[31] &= 127;
    private[31] |= 64;
    private
}

fn hash_to_scalar(parts: &[&[u8]]) -> Scalar {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part);
    }
    let mut wide = [0u8; 64];
    wide.copy_from_slice(&hasher.finalize());
    Scalar::from_bytes_mod_order_wide(&wide)
}

fn bundle_public(public: &[u8; 32]) -> [u8; 33] {
    let mut message = [0u8; 33];
    message[0] = KEY_BUNDLE_TYPE;
    message[1..].copy_from_slice(public);
    message
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &hex::encode(self.public))
            .field("private", &"[REDACTED]")
            .finish()
    }
}

/// Type prefix of a serialized Curve25519 public key.
pub const KEY_BUNDLE_TYPE: u8 = 5;

/// A key pair signed by the account identity key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedKeyPair {
    pub key_pair: KeyPair,
    #[serde(with = "buffer_json::fixed")]
    pub signature: [u8; 64],
    pub key_id: u32,
}

impl SignedKeyPair {
    /// Generate a fresh key pair and sign it with `identity`.
    pub fn generate(identity: &KeyPair, key_id: u32) -> Self {
        let key_pair = KeyPair::generate();
        let signature = identity.sign_public(&key_pair);
        Self {
            key_pair,
            signature,
            key_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_are_clamped() {
        let kp = KeyPair::generate();
        assert_eq!(kp.private[0] & 7, 0);
        assert_eq!(kp.private[31] & 128, 0);
        assert_eq!(kp.private[31] & 64, 64);
        assert_ne!(kp.public, [0u8; 32]);
    }

    #[test]
    fn from_private_key_rebuilds_public() {
        let kp = KeyPair::generate();
        assert_eq!(KeyPair::from_private_key(kp.private), kp);
    }

    #[test]
    fn signed_pre_key_verifies_against_identity_public_key() {
        let identity = KeyPair::generate();
        let signed = SignedKeyPair::generate(&identity, 1);
        assert_eq!(signed.key_id, 1);

        let message = bundle_public(&signed.key_pair.public);
        assert_eq!(message[0], KEY_BUNDLE_TYPE);
        assert!(verify_signature(&identity.public, &message, &signed.signature));
    }

    #[test]
    fn xeddsa_rejects_wrong_key_message_or_signature() {
        let identity = KeyPair::generate();
        let other = KeyPair::generate();
        let signature = identity.sign(b"registration");

        assert!(verify_signature(&identity.public, b"registration", &signature));
        assert!(!verify_signature(&other.public, b"registration", &signature));
        assert!(!verify_signature(&identity.public, b"registrations", &signature));

        let mut tampered = signature;
        tampered[5] ^= 0x01;
        assert!(!verify_signature(&identity.public, b"registration", &tampered));
    }

    #[test]
    fn xeddsa_signatures_are_randomised() {
        let identity = KeyPair::generate();
        let first = identity.sign(b"m");
        let second = identity.sign(b"m");
        assert_ne!(first, second);
        assert!(verify_signature(&identity.public, b"m", &second));
    }

    #[test]
    fn unclamped_private_keys_sign_like_their_clamped_form() {
        let mut raw = [0x42u8; 32];
        raw[0] = 0xff;
        let kp = KeyPair::from_private_key(raw);
        let signature = kp.sign(b"m");
        assert!(verify_signature(&kp.public, b"m", &signature));
    }

    #[test]
    fn debug_redacts_private_key() {
        let kp = KeyPair::generate();
        let printed = format!("{kp:?}");
        assert!(printed.contains("[REDACTED]"));
        assert!(!printed.contains(&hex::encode(kp.private)));
    }

    #[test]
    fn key_pair_json_uses_buffer_objects() {
        let kp = KeyPair::generate();
        let value = serde_json::to_value(&kp).unwrap();
        assert_eq!(value["public"]["type"], "Buffer");
        let back: KeyPair = serde_json::from_value(value).unwrap();
        assert_eq!(back, kp);
    }
}
