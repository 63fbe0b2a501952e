//! Authenticated token codec for data-channel payloads.
//!
//! Every payload that crosses the channel is sealed into a self-describing
//! token:
//!
//! ```text
//! version (1) | issued-at, unix secs BE (8) | nonce (12) | ciphertext | tag (16)
//! ```
//!
//! The first 21 bytes are bound to the ciphertext as associated data, so
//! flipping any bit of the token makes decryption fail before a single byte
//! of plaintext is released.

use crate::utils::{CryptoError, Result};
use base64::{engine::general_purpose::URL_SAFE, Engine};
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;

/// Size of the pre-shared secret in bytes
pub const KEY_SIZE: usize = 32;

/// Token format version
pub const TOKEN_VERSION: u8 = 0x80;

const TIMESTAMP_SIZE: usize = 8;
const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

/// Bytes in front of the ciphertext
pub const HEADER_SIZE: usize = 1 + TIMESTAMP_SIZE + NONCE_SIZE;

/// Bytes a token adds on top of its plaintext
pub const TOKEN_OVERHEAD: usize = HEADER_SIZE + TAG_SIZE;

/// Tolerated clock skew for tokens stamped in the future
const MAX_CLOCK_SKEW_SECS: i64 = 60;

const KDF_INFO: &[u8] = b"p2p-courier/frame-key/v1";

/// Pre-shared symmetric secret, supplied by configuration
#[derive(Clone, PartialEq, Eq)]
pub struct SharedKey([u8; KEY_SIZE]);

impl SharedKey {
    /// Generate a fresh random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::RngCore::fill_bytes(&mut OsRng, &mut bytes);
        Self(bytes)
    }

    /// Build a key from raw bytes
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidKey` unless exactly 32 bytes are given
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| CryptoError::InvalidKey {
            reason: format!(
                "Invalid key length: expected {}, got {}",
                KEY_SIZE,
                bytes.len()
            ),
        })?;
        Ok(Self(bytes))
    }

    /// Parse the URL-safe base64 text form
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = URL_SAFE
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidKey {
                reason: e.to_string(),
            })?;
        Self::from_bytes(&bytes)
    }

    /// URL-safe base64 text form, as stored in configuration
    pub fn to_base64(&self) -> String {
        URL_SAFE.encode(self.0)
    }

    /// Short hex digest for logs; never reveals the key itself
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0);
        hex::encode(&digest[..8])
    }
}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedKey({})", self.fingerprint())
    }
}

/// Seals and opens channel tokens under one shared key
#[derive(Clone)]
pub struct EncryptionCodec {
    cipher: ChaCha20Poly1305,
    max_age: Option<Duration>,
}

impl EncryptionCodec {
    /// Create a codec whose tokens never expire
    pub fn new(key: &SharedKey) -> Result<Self> {
        let hk = Hkdf::<Sha256>::new(None, &key.0);
        let mut derived = [0u8; KEY_SIZE];
        hk.expand(KDF_INFO, &mut derived)
            .map_err(|_| CryptoError::KeyDerivation {
                reason: "Frame key derivation failed".to_string(),
            })?;

        Ok(Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&derived)),
            max_age: None,
        })
    }

    /// Reject tokens issued longer ago than `max_age`
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    /// Encrypt `plaintext` into a token stamped with the current time
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.encrypt_at(plaintext, chrono::Utc::now().timestamp())
    }

    fn encrypt_at(&self, plaintext: &[u8], issued_at: i64) -> Result<Vec<u8>> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);

        let mut token = Vec::with_capacity(TOKEN_OVERHEAD + plaintext.len());
        token.push(TOKEN_VERSION);
        token.extend_from_slice(&(issued_at as u64).to_be_bytes());
        token.extend_from_slice(&nonce);

        let sealed = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: &token,
                },
            )
            .map_err(|_| CryptoError::Encryption {
                reason: "Failed to seal payload".to_string(),
            })?;

        token.extend_from_slice(&sealed);
        Ok(token)
    }

    /// Verify and decrypt a token
    ///
    /// # Errors
    ///
    /// `CryptoError::AuthenticationTag` when the token is malformed or was not
    /// sealed by this key, `CryptoError::TokenExpired` when it is authentic
    /// but outside the configured staleness window
    pub fn decrypt(&self, token: &[u8]) -> Result<Vec<u8>> {
        self.decrypt_at(token, chrono::Utc::now().timestamp())
    }

    fn decrypt_at(&self, token: &[u8], now: i64) -> Result<Vec<u8>> {
        if token.len() < TOKEN_OVERHEAD {
            return Err(tag_error(format!("token too short ({} bytes)", token.len())));
        }
        if token[0] != TOKEN_VERSION {
            return Err(tag_error(format!("unknown token version {:#04x}", token[0])));
        }

        let (header, sealed) = token.split_at(HEADER_SIZE);
        let nonce = Nonce::from_slice(&header[1 + TIMESTAMP_SIZE..]);

        let plaintext = self
            .cipher
            .decrypt(
                nonce,
                Payload {
                    msg: sealed,
                    aad: header,
                },
            )
            .map_err(|_| tag_error("tag mismatch".to_string()))?;

        if let Some(max_age) = self.max_age {
            let mut stamp = [0u8; TIMESTAMP_SIZE];
            stamp.copy_from_slice(&header[1..1 + TIMESTAMP_SIZE]);
            let issued_at = i64::try_from(u64::from_be_bytes(stamp)).unwrap_or(i64::MAX);
            let age = now.saturating_sub(issued_at);
            let max_age_secs = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
            if age > max_age_secs || age < -MAX_CLOCK_SKEW_SECS {
                return Err(CryptoError::TokenExpired {
                    age_secs: age,
                    max_age_secs: max_age.as_secs(),
                }
                .into());
            }
        }

        Ok(plaintext)
    }
}

impl fmt::Debug for EncryptionCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionCodec")
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

fn tag_error(reason: String) -> crate::utils::CourierError {
    CryptoError::AuthenticationTag { reason }.into()
}
