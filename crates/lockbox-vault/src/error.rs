use std::path::PathBuf;

use lockbox_crypto::CryptoError;
use thiserror::Error;

/// Authenticator failures. Deliberately coarse: every way a candidate key
/// can fail to open a marker collapses into one variant.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("username cannot be empty")]
    EmptyUsername,

    #[error("passphrase cannot be empty")]
    EmptyPassphrase,

    #[error("username must be a single path component")]
    InvalidUsername,

    #[error("invalid master key")]
    InvalidMasterKey,

    #[error("invalid passphrase")]
    InvalidPassphrase,

    #[error("user not found")]
    UserNotFound,

    #[error("user already exists")]
    UserAlreadyExists,

    #[error("data directory {} is not empty", path.display())]
    DataDirNotEmpty { path: PathBuf },

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthError {
    /// True for errors caused by the caller's input rather than server state.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AuthError::EmptyUsername | AuthError::EmptyPassphrase | AuthError::InvalidUsername
        )
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("file already exists: {0}")]
    FileExists(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("invalid filename: {0:?}")]
    InvalidFilename(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,

    #[error("invalid token")]
    Invalid,

    #[error("malformed token payload: {0}")]
    Payload(String),

    #[error("token signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}
