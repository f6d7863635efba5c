//! Printable random key material

use rand::rngs::OsRng;
use rand::RngCore;

use crate::CryptoError;

/// Alphabet the random bytes are folded onto. Output is safe to paste into
/// logs, shells, and config files.
const ALPHABET: &[u8] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz!@#$%^&*()-_+={}[]|<>,.?;:~";

/// Generate `length` bytes from the OS CSPRNG, each mapped onto [`ALPHABET`].
///
/// Fails only if the entropy source does.
pub fn generate_key(length: usize) -> Result<Vec<u8>, CryptoError> {
    let mut key = vec![0u8; length];
    OsRng.try_fill_bytes(&mut key)?;

    for b in key.iter_mut() {
        *b = ALPHABET[*b as usize % ALPHABET.len()];
    }

    Ok(key)
}
