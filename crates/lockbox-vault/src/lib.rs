//! lockbox-vault: per-user encrypted file vault on the local filesystem
//!
//! On-disk layout:
//! ```text
//! <data_dir>/
//!   master.key            AES-GCM marker proving the master key (written once, 0400)
//!   <username>/           one private directory per user (0700)
//!     .<username>         AES-GCM marker proving the user's derived key (0400)
//!     <filename>          AES-CFB ciphertext, IV-prefixed (0600, write-once)
//! ```
//!
//! [`Authenticator`] owns the markers and hands out [`User`] values carrying
//! the derived key. [`Storage`] only ever sees an already authenticated
//! `User`; it never handles passphrases.

pub mod auth;
pub mod error;
pub mod storage;
pub mod token;
pub mod user;

pub use auth::{Authenticator, Bootstrap};
pub use error::{AuthError, StorageError, TokenError};
pub use storage::Storage;
pub use token::TokenManager;
pub use user::User;
