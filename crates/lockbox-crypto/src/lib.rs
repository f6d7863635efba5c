//! lockbox-crypto: encryption primitives for the lockbox vault
//!
//! Two cipher modes with different guarantees:
//! ```text
//! markers (small, buffered)  -> AES-256-GCM   base64([12-byte nonce][ciphertext][16-byte tag])
//! files   (unbounded stream) -> AES-256-CFB   [16-byte IV][ciphertext]
//! ```
//!
//! Markers are authenticated: a wrong key or a flipped bit is reported as
//! [`CryptoError::AuthenticationFailed`]. File streams are confidentiality
//! only. They carry no tag so they can be processed in a single pass with
//! constant memory, which means corruption of a stored file is not detected.
//!
//! User keys are derived with PBKDF2-HMAC-SHA256 (10 000 rounds, salt =
//! username) and are never persisted.

pub mod block;
pub mod error;
pub mod kdf;
pub mod key;
pub mod keygen;
pub mod stream;

pub use block::{decrypt, encrypt};
pub use error::CryptoError;
pub use kdf::{derive_subkey, derive_user_key};
pub use key::SymmetricKey;
pub use keygen::generate_key;
pub use stream::{decrypt_stream, encrypt_stream};

/// Size of a symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of the CFB initialization vector (one AES block)
pub const IV_SIZE: usize = 16;
