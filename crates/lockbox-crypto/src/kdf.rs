//! Key derivation: PBKDF2 passphrase -> user key, HKDF secret -> subkey

use hkdf::Hkdf;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use crate::{CryptoError, SymmetricKey, KEY_SIZE};

/// Fixed PBKDF2 work factor for user keys. Changing it invalidates every
/// registered user's marker.
pub const PBKDF2_ROUNDS: u32 = 10_000;

/// Derive a user's 256-bit key from their passphrase, salted with the
/// username.
///
/// Deterministic: the same (passphrase, username) always yields the same
/// key, so the key never needs to be stored.
pub fn derive_user_key(passphrase: &SecretString, username: &str) -> SymmetricKey {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(
        passphrase.expose_secret().as_bytes(),
        username.as_bytes(),
        PBKDF2_ROUNDS,
        &mut key,
    );
    SymmetricKey::from_bytes(key)
}

/// HKDF-SHA256 derivation of a 256-bit subkey with a domain-specific info string.
pub fn derive_subkey(ikm: &[u8], info: &[u8]) -> Result<SymmetricKey, CryptoError> {
    let hkdf = Hkdf::<Sha256>::new(None, ikm);
    let mut okm = [0u8; KEY_SIZE];
    hkdf.expand(info, &mut okm)
        .map_err(|_| CryptoError::InvalidKeyLength(okm.len()))?;
    Ok(SymmetricKey::from_bytes(okm))
}
