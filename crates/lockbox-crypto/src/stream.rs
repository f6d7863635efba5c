//! Streaming AES-256-CFB for file contents
//!
//! Stream format:
//! ```text
//! [16 bytes: random IV, plaintext][N bytes: CFB ciphertext]
//! ```
//!
//! Ciphertext length equals plaintext length plus the IV. There is no
//! integrity tag: a stored file is kept confidential but corruption or
//! tampering is not detected on download. Marker payloads, which do need
//! integrity, go through [`crate::block`] instead.

use aes::Aes256;
use cfb_mode::cipher::KeyIvInit;
use cfb_mode::{BufDecryptor, BufEncryptor};
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::{CryptoError, SymmetricKey, IV_SIZE};

/// Bytes processed per read; memory use is bounded by this, not by stream length.
const BUF_SIZE: usize = 32 * 1024;

/// Encrypt everything read from `src` into `dst`.
///
/// Writes the IV first, then the ciphertext, until `src` is exhausted.
/// Returns the number of plaintext bytes processed. Any read or write error
/// aborts the whole operation.
pub async fn encrypt_stream<R, W>(
    key: &SymmetricKey,
    src: &mut R,
    dst: &mut W,
) -> Result<u64, CryptoError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut iv = [0u8; IV_SIZE];
    OsRng.try_fill_bytes(&mut iv)?;

    let mut cipher = BufEncryptor::<Aes256>::new_from_slices(key.as_bytes(), &iv)
        .map_err(|_| CryptoError::InvalidKeyLength(key.as_bytes().len()))?;

    dst.write_all(&iv).await?;

    let mut buf = vec![0u8; BUF_SIZE];
    let mut total = 0u64;
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        cipher.encrypt(&mut buf[..n]);
        dst.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    dst.flush().await?;
    trace!(bytes = total, "stream encrypted");

    Ok(total)
}

/// Decrypt a stream produced by [`encrypt_stream`] from `src` into `dst`.
///
/// Returns the number of plaintext bytes written. A source shorter than the
/// IV fails with [`CryptoError::CiphertextTooShort`].
pub async fn decrypt_stream<R, W>(
    key: &SymmetricKey,
    src: &mut R,
    dst: &mut W,
) -> Result<u64, CryptoError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut iv = [0u8; IV_SIZE];
    src.read_exact(&mut iv).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => CryptoError::CiphertextTooShort,
        _ => CryptoError::Io(e),
    })?;

    let mut cipher = BufDecryptor::<Aes256>::new_from_slices(key.as_bytes(), &iv)
        .map_err(|_| CryptoError::InvalidKeyLength(key.as_bytes().len()))?;

    let mut buf = vec![0u8; BUF_SIZE];
    let mut total = 0u64;
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        cipher.decrypt(&mut buf[..n]);
        dst.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    dst.flush().await?;
    trace!(bytes = total, "stream decrypted");

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KEY_SIZE;
    use proptest::prelude::*;
    use std::io;

    fn key(fill: u8) -> SymmetricKey {
        SymmetricKey::from_bytes([fill; KEY_SIZE])
    }

    fn make_data(size: usize) -> Vec<u8> {
        (0..size)
            .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
            .collect()
    }

    async fn roundtrip(k: &SymmetricKey, plaintext: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut ciphertext = Vec::new();
        let written = encrypt_stream(k, &mut &plaintext[..], &mut ciphertext)
            .await
            .unwrap();
        assert_eq!(written, plaintext.len() as u64);

        let mut decrypted = Vec::new();
        let read = decrypt_stream(k, &mut &ciphertext[..], &mut decrypted)
            .await
            .unwrap();
        assert_eq!(read, plaintext.len() as u64);

        (ciphertext, decrypted)
    }

    #[tokio::test]
    async fn test_roundtrip_boundary_sizes() {
        let k = key(9);
        for size in [0, 1, IV_SIZE - 1, IV_SIZE, IV_SIZE + 1, BUF_SIZE, BUF_SIZE * 3 + 5] {
            let plaintext = make_data(size);
            let (ciphertext, decrypted) = roundtrip(&k, &plaintext).await;
            assert_eq!(ciphertext.len(), IV_SIZE + size, "size {size}");
            assert_eq!(decrypted, plaintext, "size {size}");
        }
    }

    #[tokio::test]
    async fn test_ciphertext_hides_plaintext() {
        let plaintext = vec![0u8; 4096];
        let (ciphertext, _) = roundtrip(&key(3), &plaintext).await;
        assert_ne!(&ciphertext[IV_SIZE..], &plaintext[..]);
    }

    #[tokio::test]
    async fn test_fresh_iv_per_stream() {
        let k = key(3);
        let plaintext = b"same file contents";
        let (a, _) = roundtrip(&k, plaintext).await;
        let (b, _) = roundtrip(&k, plaintext).await;
        assert_ne!(a[..IV_SIZE], b[..IV_SIZE]);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_wrong_key_is_not_detected() {
        let plaintext = make_data(100);
        let mut ciphertext = Vec::new();
        encrypt_stream(&key(1), &mut &plaintext[..], &mut ciphertext)
            .await
            .unwrap();

        let mut garbage = Vec::new();
        decrypt_stream(&key(2), &mut &ciphertext[..], &mut garbage)
            .await
            .expect("CFB carries no tag, so a wrong key decrypts to garbage");
        assert_eq!(garbage.len(), plaintext.len());
        assert_ne!(garbage, plaintext);
    }

    #[tokio::test]
    async fn test_decrypt_shorter_than_iv() {
        let mut out = Vec::new();
        let result = decrypt_stream(&key(1), &mut &[0u8; IV_SIZE - 1][..], &mut out).await;
        assert!(matches!(result, Err(CryptoError::CiphertextTooShort)));

        let result = decrypt_stream(&key(1), &mut &[][..], &mut out).await;
        assert!(matches!(result, Err(CryptoError::CiphertextTooShort)));
    }

    #[tokio::test]
    async fn test_source_error_aborts_encrypt() {
        let mut src = tokio_test::io::Builder::new()
            .read(b"first part")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "peer went away"))
            .build();
        let mut out = Vec::new();

        let result = encrypt_stream(&key(1), &mut src, &mut out).await;
        match result {
            Err(CryptoError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("expected I/O error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_source_error_aborts_decrypt() {
        let mut src = tokio_test::io::Builder::new()
            .read(&[0u8; IV_SIZE])
            .read(b"ciphertext")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "peer went away"))
            .build();
        let mut out = Vec::new();

        let result = decrypt_stream(&key(1), &mut src, &mut out).await;
        assert!(matches!(result, Err(CryptoError::Io(_))));
    }

    proptest! {
        #[test]
        fn prop_stream_roundtrip(plaintext in proptest::collection::vec(any::<u8>(), 0..4096), fill in any::<u8>()) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let (_, decrypted) = rt.block_on(roundtrip(&key(fill), &plaintext));
            prop_assert_eq!(decrypted, plaintext);
        }
    }
}
