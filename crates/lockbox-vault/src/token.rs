//! Session tokens: signed, expiring, with a sealed payload
//!
//! A token is an HS256 JWT whose `data` claim is the caller's payload
//! encrypted (AES-GCM) under a subkey of the signing secret. The payload
//! carries the user's derived key, so it must never be readable by a client
//! that merely holds the token.

use std::fmt;
use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use lockbox_crypto::{block, derive_subkey, SymmetricKey};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TokenError;

const SEAL_INFO: &[u8] = b"lockbox-token-seal";

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// Sealed payload, base64
    data: String,
    exp: u64,
    iat: u64,
}

pub struct TokenManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
    seal_key: SymmetricKey,
    ttl: Duration,
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    pub fn new(secret: &[u8], ttl: Duration) -> Result<Self, TokenError> {
        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            seal_key: derive_subkey(secret, SEAL_INFO)?,
            ttl,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a token carrying `payload`, valid for the configured TTL.
    pub fn issue(&self, payload: &[u8]) -> Result<String, TokenError> {
        let now = jsonwebtoken::get_current_timestamp();
        let claims = Claims {
            data: block::encrypt(payload, &self.seal_key)?,
            exp: now.saturating_add(self.ttl.as_secs()),
            iat: now,
        };
        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        Ok(token)
    }

    /// Verify signature and expiry, then return the original payload.
    pub fn validate(&self, token: &str) -> Result<Vec<u8>, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let claims = jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => {
                    debug!(error = %e, "token rejected");
                    TokenError::Invalid
                }
            })?
            .claims;

        block::decrypt(claims.data.as_bytes(), &self.seal_key).map_err(|e| {
            debug!(error = %e, "token payload could not be unsealed");
            TokenError::Invalid
        })
    }
}
