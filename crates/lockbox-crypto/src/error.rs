use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: {0} bytes (expected 32)")]
    InvalidKeyLength(usize),

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("ciphertext too short")]
    CiphertextTooShort,

    #[error("authentication failure: wrong key or corrupted data")]
    AuthenticationFailed,

    #[error("invalid base64 encoding: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("entropy source failed: {0}")]
    Entropy(#[from] rand::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
