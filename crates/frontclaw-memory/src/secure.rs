//! AEAD envelope over any memory store.
//!
//! Write path: value → JSON → AES-256-GCM under a random 12-byte IV →
//! HMAC-SHA256 over (iv ‖ tag ‖ ciphertext) with the signing key → base64
//! JSON wrapper. Read path re-computes the HMAC and compares in constant
//! time before decrypting; a mismatch fails loudly with
//! `SIGNATURE_MISMATCH`, never a silent `None`.

use crate::{KeyTtl, MemoryError, MemoryStore};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// IV length for AES-GCM.
const IV_LEN: usize = 12;

/// GCM authentication tag length.
const TAG_LEN: usize = 16;

/// Envelope format version.
const ENVELOPE_VERSION: u32 = 1;

/// Encryption key plus an optional separate signing key.
#[derive(Clone)]
pub struct EnvelopeKeys {
    encryption: [u8; 32],
    signing: [u8; 32],
}

impl EnvelopeKeys {
    /// Build from a 32-byte encryption key; the signing key defaults to the
    /// encryption key when not supplied.
    pub fn new(encryption: [u8; 32], signing: Option<[u8; 32]>) -> Self {
        Self {
            signing: signing.unwrap_or(encryption),
            encryption,
        }
    }

    /// Parse a key from hex (64 chars) or standard base64 (44 chars).
    pub fn parse_key(text: &str) -> Result<[u8; 32], MemoryError> {
        let text = text.trim();
        let bytes = if text.len() == 64 && text.chars().all(|c| c.is_ascii_hexdigit()) {
            decode_hex(text)?
        } else {
            BASE64
                .decode(text)
                .map_err(|e| MemoryError::InvalidKey(format!("not hex or base64: {e}")))?
        };
        bytes
            .try_into()
            .map_err(|_| MemoryError::InvalidKey("key must be exactly 32 bytes".to_string()))
    }

    /// Parse from configuration strings.
    pub fn from_config(encryption: &str, signing: Option<&str>) -> Result<Self, MemoryError> {
        let enc = Self::parse_key(encryption)?;
        let sign = signing.map(Self::parse_key).transpose()?;
        Ok(Self::new(enc, sign))
    }
}

fn decode_hex(s: &str) -> Result<Vec<u8>, MemoryError> {
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16)
                .map_err(|e| MemoryError::InvalidKey(format!("bad hex: {e}")))
        })
        .collect()
}

/// The stored wrapper, all fields base64.
#[derive(Serialize, Deserialize)]
struct EnvelopeWire {
    v: u32,
    iv: String,
    tag: String,
    ct: String,
    hmac: String,
}

/// Secure wrapper around any [`MemoryStore`].
pub struct SecureStore<S> {
    inner: S,
    keys: EnvelopeKeys,
}

impl<S: MemoryStore> SecureStore<S> {
    pub fn new(inner: S, keys: EnvelopeKeys) -> Self {
        Self { inner, keys }
    }

    fn mac_state(&self, iv: &[u8], tag: &[u8], ct: &[u8]) -> HmacSha256 {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.keys.signing)
            .expect("HMAC accepts any key length");
        mac.update(iv);
        mac.update(tag);
        mac.update(ct);
        mac
    }

    fn seal(&self, value: &str) -> Result<String, MemoryError> {
        let plaintext = serde_json::to_vec(value)
            .map_err(|e| MemoryError::Envelope(format!("serialize: {e}")))?;

        let mut iv = [0u8; IV_LEN];
        rand::rngs::OsRng.fill_bytes(&mut iv);

        let cipher = Aes256Gcm::new((&self.keys.encryption).into());
        let mut sealed = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_ref())
            .map_err(|e| MemoryError::Envelope(format!("encrypt: {e}")))?;

        // aes-gcm appends the tag; the envelope keeps it detached.
        let tag = sealed.split_off(sealed.len() - TAG_LEN);
        let ct = sealed;
        let hmac = self.mac_state(&iv, &tag, &ct).finalize().into_bytes();

        let wire = EnvelopeWire {
            v: ENVELOPE_VERSION,
            iv: BASE64.encode(iv),
            tag: BASE64.encode(&tag),
            ct: BASE64.encode(&ct),
            hmac: BASE64.encode(hmac),
        };
        serde_json::to_string(&wire).map_err(|e| MemoryError::Envelope(format!("wrap: {e}")))
    }

    fn open(&self, stored: &str) -> Result<String, MemoryError> {
        let wire: EnvelopeWire = serde_json::from_str(stored)
            .map_err(|e| MemoryError::Envelope(format!("unwrap: {e}")))?;
        if wire.v != ENVELOPE_VERSION {
            return Err(MemoryError::Envelope(format!(
                "unsupported envelope version {}",
                wire.v
            )));
        }

        let decode = |field: &str, value: &str| {
            BASE64
                .decode(value)
                .map_err(|e| MemoryError::Envelope(format!("{field}: {e}")))
        };
        let iv = decode("iv", &wire.iv)?;
        let tag = decode("tag", &wire.tag)?;
        let ct = decode("ct", &wire.ct)?;
        let stored_mac = decode("hmac", &wire.hmac)?;

        // Constant-time comparison via the MAC itself.
        if self
            .mac_state(&iv, &tag, &ct)
            .verify_slice(&stored_mac)
            .is_err()
        {
            return Err(MemoryError::SignatureMismatch);
        }

        let mut sealed = ct;
        sealed.extend_from_slice(&tag);
        let cipher = Aes256Gcm::new((&self.keys.encryption).into());
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&iv), sealed.as_ref())
            .map_err(|_| MemoryError::SignatureMismatch)?;

        serde_json::from_slice(&plaintext)
            .map_err(|e| MemoryError::Envelope(format!("deserialize: {e}")))
    }
}

#[async_trait]
impl<S: MemoryStore> MemoryStore for SecureStore<S> {
    async fn get(&self, key: &str) -> Result<Option<String>, MemoryError> {
        match self.inner.get(key).await? {
            Some(stored) => Ok(Some(self.open(&stored)?)),
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        value: String,
        ttl_secs: Option<u64>,
    ) -> Result<(), MemoryError> {
        let sealed = self.seal(&value)?;
        self.inner.set(key, sealed, ttl_secs).await
    }

    async fn delete(&self, key: &str) -> Result<bool, MemoryError> {
        self.inner.delete(key).await
    }

    async fn list(
        &self,
        prefix: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<String>, MemoryError> {
        self.inner.list(prefix, limit).await
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, MemoryError> {
        self.inner.ttl(key).await
    }
}
