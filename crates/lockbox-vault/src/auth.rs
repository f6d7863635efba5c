//! Authenticator: master-key bootstrap, user registration, passphrase checks
//!
//! The vault root moves through two states, re-derived from disk on every
//! start:
//! ```text
//! uninitialized (missing or empty dir) --ensure_bootstrapped--> bootstrapped (master.key present)
//! ```
//! A non-empty directory without `master.key` is refused.

use lockbox_crypto::{block, derive_user_key, generate_key, SymmetricKey, KEY_SIZE};
use secrecy::{ExposeSecret, SecretString};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{AuthError, TokenError};
use crate::user::{marker_filename, validate_username, User};

/// Name of the master-key marker in the vault root
pub const MASTER_MARKER: &str = "master.key";

/// Length of the generated master key (printable bytes, used directly as an AES-256 key)
pub const MASTER_KEY_LENGTH: usize = KEY_SIZE;

/// Known plaintext sealed inside every marker
const AUTH_MESSAGE: &[u8] = b"beaver";

/// Outcome of [`Authenticator::ensure_bootstrapped`]
#[derive(Debug)]
pub enum Bootstrap {
    /// The directory was initialized and a master key generated. This is the
    /// only time the key is available.
    Created(SecretString),
    /// The master marker already existed; nothing was touched.
    Existing,
}

#[derive(Debug, Clone)]
pub struct Authenticator {
    data_dir: PathBuf,
}

impl Authenticator {
    /// Open the vault rooted at `data_dir`, bootstrapping it if needed.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<(Self, Bootstrap), AuthError> {
        let auth = Self {
            data_dir: data_dir.into(),
        };
        let state = auth.ensure_bootstrapped()?;
        Ok((auth, state))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Idempotent bootstrap of the vault root.
    ///
    /// On a missing or empty directory: create it (0700), generate a master
    /// key, write its marker, and log the key once. On a directory that
    /// already holds the marker: no-op. Anything else is refused.
    pub fn ensure_bootstrapped(&self) -> Result<Bootstrap, AuthError> {
        match fs::read_dir(&self.data_dir) {
            Ok(entries) => {
                let mut empty = true;
                for entry in entries {
                    if entry?.file_name() == MASTER_MARKER {
                        debug!(data_dir = %self.data_dir.display(), "vault already bootstrapped");
                        return Ok(Bootstrap::Existing);
                    }
                    empty = false;
                }
                if !empty {
                    return Err(AuthError::DataDirNotEmpty {
                        path: self.data_dir.clone(),
                    });
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        create_private_dir(&self.data_dir, true)?;
        // An existing empty directory keeps its old mode through DirBuilder.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.data_dir, fs::Permissions::from_mode(0o700))?;
        }

        let master_key = generate_key(MASTER_KEY_LENGTH)?;
        let key = SymmetricKey::from_slice(&master_key)?;
        let marker = block::encrypt(AUTH_MESSAGE, &key)?;

        if let Err(e) = write_marker(&self.master_marker_path(), marker.as_bytes()) {
            // Only succeeds if the directory is still empty.
            let _ = fs::remove_dir(&self.data_dir);
            return Err(e.into());
        }

        let master_key = String::from_utf8_lossy(&master_key).into_owned();
        info!(
            data_dir = %self.data_dir.display(),
            master_key = %master_key,
            "vault bootstrapped; record the master key now, it is never shown again"
        );

        Ok(Bootstrap::Created(SecretString::from(master_key)))
    }

    /// Register a new user. Requires the deployment's master key.
    pub fn add_user(
        &self,
        username: &str,
        passphrase: &SecretString,
        master_key: &SecretString,
    ) -> Result<User, AuthError> {
        validate_username(username)?;
        if passphrase.expose_secret().is_empty() {
            return Err(AuthError::EmptyPassphrase);
        }

        self.verify_master_key(master_key)?;

        let user_dir = self.user_dir(username);
        if fs::symlink_metadata(&user_dir).is_ok() {
            return Err(AuthError::UserAlreadyExists);
        }

        let key = derive_user_key(passphrase, username);
        let marker = block::encrypt(AUTH_MESSAGE, &key)?;

        // Atomic: of two racing registrations only one creates the directory.
        create_private_dir(&user_dir, false).map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => AuthError::UserAlreadyExists,
            _ => AuthError::Io(e),
        })?;

        if let Err(e) = write_marker(&user_dir.join(marker_filename(username)), marker.as_bytes()) {
            if let Err(cleanup) = fs::remove_dir_all(&user_dir) {
                warn!(
                    username,
                    error = %cleanup,
                    "failed to remove half-created user directory"
                );
            }
            return Err(e.into());
        }

        info!(username, "user registered");
        Ok(User::new(username, user_dir, key))
    }

    /// Check a passphrase and return the user with its derived key.
    pub fn authenticate(&self, username: &str, passphrase: &SecretString) -> Result<User, AuthError> {
        validate_username(username)?;
        if passphrase.expose_secret().is_empty() {
            return Err(AuthError::EmptyPassphrase);
        }

        let user_dir = self.user_dir(username);
        let marker = match fs::read(user_dir.join(marker_filename(username))) {
            Ok(marker) => marker,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(AuthError::UserNotFound),
            Err(e) => return Err(e.into()),
        };

        let key = derive_user_key(passphrase, username);
        if !opens_marker(&marker, &key) {
            return Err(AuthError::InvalidPassphrase);
        }

        debug!(username, "user authenticated");
        Ok(User::new(username, user_dir, key))
    }

    /// Rebuild a user from a session token payload produced by
    /// [`User::to_payload`].
    pub fn user_from_payload(&self, payload: &[u8]) -> Result<User, TokenError> {
        User::from_payload(payload, &self.data_dir)
    }

    fn verify_master_key(&self, master_key: &SecretString) -> Result<(), AuthError> {
        let key = SymmetricKey::from_slice(master_key.expose_secret().as_bytes())
            .map_err(|_| AuthError::InvalidMasterKey)?;

        let marker = fs::read(self.master_marker_path())?;
        if !opens_marker(&marker, &key) {
            return Err(AuthError::InvalidMasterKey);
        }
        Ok(())
    }

    fn user_dir(&self, username: &str) -> PathBuf {
        self.data_dir.join(username)
    }

    fn master_marker_path(&self) -> PathBuf {
        self.data_dir.join(MASTER_MARKER)
    }
}

/// True if `key` decrypts `marker` to the known plaintext. Decode errors,
/// tag mismatches and wrong plaintexts are all just `false`.
fn opens_marker(marker: &[u8], key: &SymmetricKey) -> bool {
    matches!(block::decrypt(marker, key), Ok(plaintext) if plaintext == AUTH_MESSAGE)
}

fn create_private_dir(path: &Path, recursive: bool) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(recursive);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path)
}

/// Write a marker that must not already exist, read-only for the owner.
fn write_marker(path: &Path, contents: &[u8]) -> io::Result<()> {
    use std::io::Write;

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o400);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}
