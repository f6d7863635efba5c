//! Authenticated user identity

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use lockbox_crypto::SymmetricKey;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::auth::MASTER_MARKER;
use crate::error::{AuthError, TokenError};

/// A user that has proven knowledge of its passphrase.
///
/// Only [`crate::Authenticator`] constructs these, either after checking a
/// passphrase or after validating a session token.
#[derive(Debug, Clone)]
pub struct User {
    username: String,
    data_dir: PathBuf,
    key: SymmetricKey,
}

/// Wire form of a [`User`] inside a session token. The data directory is
/// not carried; it is re-derived from the username on the server.
#[derive(Serialize, Deserialize)]
struct UserPayload {
    username: String,
    key: String,
}

impl User {
    pub(crate) fn new(username: &str, data_dir: PathBuf, key: SymmetricKey) -> Self {
        Self {
            username: username.to_owned(),
            data_dir,
            key,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// The user's private directory (`<data_dir>/<username>`)
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Key derived from the passphrase; encrypts every file the user stores.
    pub fn key(&self) -> &SymmetricKey {
        &self.key
    }

    /// Serialize the identity for embedding in a session token.
    pub fn to_payload(&self) -> Result<Vec<u8>, TokenError> {
        let payload = UserPayload {
            username: self.username.clone(),
            key: STANDARD.encode(self.key.as_bytes()),
        };
        serde_json::to_vec(&payload).map_err(|e| TokenError::Payload(e.to_string()))
    }

    /// Inverse of [`User::to_payload`]; `data_dir` is the vault root.
    pub(crate) fn from_payload(payload: &[u8], data_dir: &Path) -> Result<Self, TokenError> {
        let decoded: UserPayload =
            serde_json::from_slice(payload).map_err(|e| TokenError::Payload(e.to_string()))?;

        validate_username(&decoded.username)
            .map_err(|e| TokenError::Payload(e.to_string()))?;

        let key_bytes = STANDARD
            .decode(&decoded.key)
            .map_err(|e| TokenError::Payload(e.to_string()))?;
        let key =
            SymmetricKey::from_slice(&key_bytes).map_err(|e| TokenError::Payload(e.to_string()))?;

        Ok(Self::new(
            &decoded.username,
            data_dir.join(&decoded.username),
            key,
        ))
    }
}

/// Usernames name a directory directly under the vault root, so they must
/// be a single, ordinary path component that does not collide with the
/// master marker.
pub fn validate_username(username: &str) -> Result<(), AuthError> {
    if username.is_empty() {
        return Err(AuthError::EmptyUsername);
    }
    if !is_single_component(username) || username == MASTER_MARKER {
        return Err(AuthError::InvalidUsername);
    }
    Ok(())
}

/// Name of the hidden marker file inside a user's directory
pub fn marker_filename(username: &str) -> String {
    format!(".{username}")
}

pub(crate) fn is_single_component(name: &str) -> bool {
    name != "." && name != ".." && !name.contains(['/', '\\', '\0'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_username() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("alice.smith-2").is_ok());
        assert!(matches!(validate_username(""), Err(AuthError::EmptyUsername)));
        for bad in [".", "..", "../etc", "a/b", "a\\b", "nul\0byte", "master.key"] {
            assert!(
                matches!(validate_username(bad), Err(AuthError::InvalidUsername)),
                "{bad:?} must be rejected"
            );
        }
    }

    #[test]
    fn test_payload_roundtrip() {
        let root = Path::new("/srv/lockbox");
        let user = User::new("alice", root.join("alice"), SymmetricKey::from_bytes([5; 32]));

        let payload = user.to_payload().unwrap();
        let decoded = User::from_payload(&payload, root).unwrap();

        assert_eq!(decoded.username(), "alice");
        assert_eq!(decoded.data_dir(), root.join("alice"));
        assert_eq!(decoded.key(), user.key());
    }

    #[test]
    fn test_payload_rejects_traversal_username() {
        let payload = br#"{"username":"../bob","key":"AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="}"#;
        let result = User::from_payload(payload, Path::new("/srv/lockbox"));
        assert!(matches!(result, Err(TokenError::Payload(_))));
    }

    #[test]
    fn test_payload_rejects_short_key() {
        let payload = br#"{"username":"alice","key":"AAAA"}"#;
        let result = User::from_payload(payload, Path::new("/srv/lockbox"));
        assert!(matches!(result, Err(TokenError::Payload(_))));
    }

    #[test]
    fn test_payload_rejects_garbage() {
        let result = User::from_payload(b"not json", Path::new("/srv/lockbox"));
        assert!(matches!(result, Err(TokenError::Payload(_))));
    }

    #[test]
    fn test_marker_filename_is_hidden() {
        assert_eq!(marker_filename("alice"), ".alice");
    }
}
