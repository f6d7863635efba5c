//! 256-bit symmetric key shared by the marker codec and the file streams

use zeroize::Zeroize;

use crate::{CryptoError, KEY_SIZE};

/// A 256-bit symmetric key.
///
/// Zeroized on drop; `Debug` never prints the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey {
    bytes: [u8; KEY_SIZE],
}

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Build a key from a slice, failing unless it is exactly 32 bytes long.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; KEY_SIZE] = slice
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength(slice.len()))?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}
