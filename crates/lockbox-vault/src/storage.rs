//! Encrypted per-user file storage
//!
//! Every operation takes an already authenticated [`User`]; files live
//! directly inside `user.data_dir()` and are encrypted with `user.key()`.

use std::io;
use std::path::PathBuf;

use lockbox_crypto::{decrypt_stream, encrypt_stream};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::user::{is_single_component, marker_filename, User};

#[derive(Debug, Clone, Default)]
pub struct Storage;

impl Storage {
    pub fn new() -> Self {
        Self
    }

    /// Encrypt everything read from `src` into a new file.
    ///
    /// Never overwrites: an existing `filename` fails with
    /// [`StorageError::FileExists`] and is left untouched. If the transfer
    /// fails midway the partial file is removed. Returns plaintext bytes
    /// stored.
    pub async fn upload<R>(&self, user: &User, filename: &str, src: &mut R) -> Result<u64, StorageError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let path = self.file_path(user, filename)?;

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&path).await.map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => StorageError::FileExists(filename.to_owned()),
            _ => StorageError::Io(e),
        })?;

        let result = async {
            let written = encrypt_stream(user.key(), src, &mut file).await?;
            file.sync_all().await?;
            Ok::<_, StorageError>(written)
        }
        .await;

        match result {
            Ok(written) => {
                info!(username = %user.username(), filename, bytes = written, "file stored");
                Ok(written)
            }
            Err(e) => {
                drop(file);
                if let Err(cleanup) = fs::remove_file(&path).await {
                    warn!(
                        username = %user.username(),
                        filename,
                        error = %cleanup,
                        "failed to remove partial upload"
                    );
                }
                Err(e)
            }
        }
    }

    /// Decrypt a stored file into `dst`. Returns plaintext bytes written.
    pub async fn download<W>(&self, user: &User, filename: &str, dst: &mut W) -> Result<u64, StorageError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let path = self.file_path(user, filename)?;

        let mut file = File::open(&path).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StorageError::FileNotFound(filename.to_owned()),
            _ => StorageError::Io(e),
        })?;

        let read = decrypt_stream(user.key(), &mut file, dst).await?;
        debug!(username = %user.username(), filename, bytes = read, "file served");
        Ok(read)
    }

    /// Names of the user's stored files, in directory order.
    ///
    /// Regular files only; subdirectories and the user's marker are skipped.
    pub async fn list(&self, user: &User) -> Result<Vec<String>, StorageError> {
        let marker = marker_filename(user.username());
        let mut entries = fs::read_dir(user.data_dir()).await?;
        let mut names = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) if name == marker => {}
                Ok(name) => names.push(name),
                Err(raw) => {
                    warn!(username = %user.username(), name = ?raw, "skipping non-UTF-8 filename");
                }
            }
        }

        Ok(names)
    }

    fn file_path(&self, user: &User, filename: &str) -> Result<PathBuf, StorageError> {
        if filename.is_empty()
            || !is_single_component(filename)
            || filename == marker_filename(user.username())
        {
            return Err(StorageError::InvalidFilename(filename.to_owned()));
        }
        Ok(user.data_dir().join(filename))
    }
}
