use core::fmt;
use std::sync::Arc;

use base64::prelude::*;
use orion::aead;
use serde::{
    de::{self, Visitor},
    Deserializer,
};

/// Encryption key suitable for including in request state
///
/// Exposes helpers to encrypt/decrypt, but opaque
/// to prevent leaking the key through logs or responses
#[derive(Clone)]
pub struct EncryptionKey(Arc<aead::SecretKey>);

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Base64 error {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Utf8 error {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Unknown crypto error")]
    Unknown,
}

impl From<orion::errors::UnknownCryptoError> for CryptoError {
    fn from(_err: orion::errors::UnknownCryptoError) -> Self {
        CryptoError::Unknown
    }
}

impl EncryptionKey {
    pub fn try_from_base64(val: &str) -> Result<EncryptionKey, CryptoError> {
        let bytes = BASE64_STANDARD.decode(val.trim().as_bytes())?;
        EncryptionKey::try_from(&*bytes)
    }

    /// Generates a random 32 byte key, base64 encoded
    pub fn generate_base64() -> String {
        let bytes: [u8; 32] = rand::random();
        BASE64_STANDARD.encode(bytes)
    }

    /// Seals `msg` and returns base64 text suitable for a TEXT column
    ///
    /// A unique nonce is generated and included in the returned cyphertext
    pub fn seal(&self, msg: &str) -> Result<String, CryptoError> {
        let ciphertext = aead::seal(&self.0, msg.as_bytes())?;
        Ok(BASE64_STANDARD.encode(ciphertext))
    }

    /// Opens a value produced by [`EncryptionKey::seal`]. Fails on anything else.
    pub fn open(&self, value: &str) -> Result<String, CryptoError> {
        let ciphertext = BASE64_STANDARD.decode(value.as_bytes())?;
        let decrypted = aead::open(&self.0, &ciphertext)?;
        Ok(String::from_utf8(decrypted)?)
    }

    /// Opens a sealed value, treating anything that does not decrypt as
    /// plaintext written before encryption at rest was introduced.
    pub fn open_or_plain(&self, value: &str) -> String {
        match self.open(value) {
            Ok(msg) => msg,
            Err(err) => {
                tracing::trace!(error = %err, "value did not decrypt, treating as plaintext");
                value.to_string()
            }
        }
    }
}

impl TryFrom<&[u8]> for EncryptionKey {
    type Error = CryptoError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let key = aead::SecretKey::from_slice(bytes)?;
        Ok(EncryptionKey(Arc::new(key)))
    }
}

/// Helper to deserialize EncryptionKey from base64
///
/// Use with serde's `deserialize_with` attribute
///
/// ```rust
/// # use serde::Deserialize;
/// # use postbox::crypto::{deserialize_base64_key, EncryptionKey};
/// #[derive(Deserialize)]
/// struct Config {
///     #[serde(deserialize_with = "deserialize_base64_key")]
///     encryption_key: EncryptionKey,
/// }
/// ```
pub fn deserialize_base64_key<'de, D>(deserializer: D) -> Result<EncryptionKey, D::Error>
where
    D: Deserializer<'de>,
{
    struct EncryptionKeyVisitor;

    impl<'de> Visitor<'de> for EncryptionKeyVisitor {
        type Value = EncryptionKey;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a base64 encoded string representing a secret key")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            EncryptionKey::try_from_base64(value).map_err(de::Error::custom)
        }
    }

    deserializer.deserialize_str(EncryptionKeyVisitor)
}

/// Encrypts the message using provided key on a blocking thread
pub async fn encrypt(key: EncryptionKey, msg: String) -> Result<String, CryptoError> {
    tokio::task::spawn_blocking(move || key.seal(&msg))
        .await
        .map_err(|_| CryptoError::Unknown)?
}

/// Decrypts on a blocking thread, failing on any malformed or foreign input.
///
/// Used for values that must never be used garbled, such as SMTP passwords.
pub async fn decrypt_strict(key: EncryptionKey, value: String) -> Result<String, CryptoError> {
    tokio::task::spawn_blocking(move || key.open(&value))
        .await
        .map_err(|_| CryptoError::Unknown)?
}

/// Decrypts on a blocking thread, falling back to the input as plaintext.
pub async fn decrypt_maybe_legacy(key: EncryptionKey, value: String) -> Result<String, CryptoError> {
    tokio::task::spawn_blocking(move || key.open_or_plain(&value))
        .await
        .map_err(|_| CryptoError::Unknown)
}

// Helper to call `decrypt_maybe_legacy` with an optional value.
pub async fn decrypt_maybe_legacy_opt(
    key: EncryptionKey,
    value: Option<String>,
) -> Result<Option<String>, CryptoError> {
    match value {
        None => Ok(None),
        Some(value) => Ok(Some(decrypt_maybe_legacy(key, value).await?)),
    }
}
