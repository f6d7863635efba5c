//! Authenticated block codec for small, fully buffered payloads (markers)
//!
//! Encoded blob (standard base64 of):
//! ```text
//! [12 bytes: random nonce][N bytes: ciphertext][16 bytes: GCM tag]
//! ```
//!
//! The blob is self-contained: only the key is needed to decode it.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::{CryptoError, SymmetricKey, NONCE_SIZE};

/// Encrypt `plaintext` with AES-256-GCM under a fresh random nonce and
/// return the base64-encoded blob.
pub fn encrypt(plaintext: &[u8], key: &SymmetricKey) -> Result<String, CryptoError> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.try_fill_bytes(&mut nonce_bytes)?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(sealed))
}

/// Decode and decrypt a blob produced by [`encrypt`].
///
/// A wrong key and a tampered blob are indistinguishable: both fail with
/// [`CryptoError::AuthenticationFailed`].
pub fn decrypt(blob: &[u8], key: &SymmetricKey) -> Result<Vec<u8>, CryptoError> {
    let decoded = STANDARD.decode(blob)?;
    if decoded.len() < NONCE_SIZE {
        return Err(CryptoError::CiphertextTooShort);
    }

    let (nonce_bytes, ciphertext) = decoded.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{KEY_SIZE, TAG_SIZE};
    use proptest::prelude::*;

    fn key(fill: u8) -> SymmetricKey {
        SymmetricKey::from_bytes([fill; KEY_SIZE])
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let k = key(1);
        let blob = encrypt(b"beaver", &k).unwrap();
        assert_eq!(decrypt(blob.as_bytes(), &k).unwrap(), b"beaver");
    }

    #[test]
    fn test_encrypt_decrypt_empty() {
        let k = key(1);
        let blob = encrypt(b"", &k).unwrap();
        assert_eq!(decrypt(blob.as_bytes(), &k).unwrap(), b"");
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let k = key(1);
        let a = encrypt(b"same plaintext", &k).unwrap();
        let b = encrypt(b"same plaintext", &k).unwrap();
        assert_ne!(a, b, "each call must use a fresh nonce");
    }

    #[test]
    fn test_blob_size() {
        let blob = encrypt(&[0u8; 100], &key(1)).unwrap();
        let raw = STANDARD.decode(&blob).unwrap();
        assert_eq!(raw.len(), NONCE_SIZE + 100 + TAG_SIZE);
    }

    #[test]
    fn test_decrypt_wrong_key() {
        let blob = encrypt(b"secret data", &key(1)).unwrap();
        let result = decrypt(blob.as_bytes(), &key(2));
        assert!(matches!(result, Err(CryptoError::AuthenticationFailed)));
    }

    #[test]
    fn test_tampered_ciphertext() {
        let k = key(1);
        let blob = encrypt(b"secret data", &k).unwrap();
        let mut raw = STANDARD.decode(&blob).unwrap();
        raw[NONCE_SIZE + 1] ^= 0xFF;
        let tampered = STANDARD.encode(raw);

        let result = decrypt(tampered.as_bytes(), &k);
        assert!(matches!(result, Err(CryptoError::AuthenticationFailed)));
    }

    #[test]
    fn test_ciphertext_too_short() {
        let short = STANDARD.encode([0u8; NONCE_SIZE - 1]);
        let result = decrypt(short.as_bytes(), &key(1));
        assert!(matches!(result, Err(CryptoError::CiphertextTooShort)));
    }

    #[test]
    fn test_invalid_base64() {
        let result = decrypt(b"not base64 at all!", &key(1));
        assert!(matches!(result, Err(CryptoError::Encoding(_))));
    }

    proptest! {
        #[test]
        fn prop_roundtrip(plaintext in proptest::collection::vec(any::<u8>(), 0..512), fill in any::<u8>()) {
            let k = key(fill);
            let blob = encrypt(&plaintext, &k).unwrap();
            prop_assert_eq!(decrypt(blob.as_bytes(), &k).unwrap(), plaintext);
        }

        #[test]
        fn prop_wrong_key_never_decrypts(plaintext in proptest::collection::vec(any::<u8>(), 0..256), a in any::<u8>(), b in any::<u8>()) {
            prop_assume!(a != b);
            let blob = encrypt(&plaintext, &key(a)).unwrap();
            prop_assert!(matches!(decrypt(blob.as_bytes(), &key(b)), Err(CryptoError::AuthenticationFailed)));
        }
    }
}
