//! HKDF-SHA256 helpers for the Noise chaining key.

use sha2::Sha256;

use crate::crypto::CryptoError;

/// Extract with `salt` (32 zero bytes when `None`) and expand to `length`
/// bytes.
pub fn derive(
    salt: Option<&[u8]>,
    ikm: &[u8],
    info: &[u8],
    length: usize,
) -> Result<Vec<u8>, CryptoError> {
    let mut okm = vec![0u8; length];
    hkdf::Hkdf::<Sha256>::new(salt, ikm)
        .expand(info, &mut okm)
        .map_err(|_| CryptoError::KeyDerivation(length))?;
    Ok(okm)
}

/// Derive 64 bytes with empty info and split them into two 32-byte keys.
pub fn derive_pair(salt: &[u8], ikm: &[u8]) -> Result<([u8; 32], [u8; 32]), CryptoError> {
    let okm = derive(Some(salt), ikm, &[], 64)?;

    let mut first = [0u8; 32];
    let mut second = [0u8; 32];
    first.copy_from_slice(&okm[..32]);
    second.copy_from_slice(&okm[32..]);
    Ok((first, second))
}
