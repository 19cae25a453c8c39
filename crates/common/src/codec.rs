//! Symmetric encryption for credential fields at rest
//!
//! AES-256-GCM with a process-wide key loaded at startup. Each call to
//! `encrypt` draws a fresh 96-bit nonce; the stored form is
//! `nonce || ciphertext || tag` so a single BLOB column holds everything
//! needed to decrypt.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngExt;

use crate::Secret;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encryption key must be 32 bytes of standard base64")]
    InvalidKey,

    #[error("encryption failed")]
    Encrypt,

    #[error("ciphertext is truncated or corrupt")]
    Malformed,

    #[error("decryption failed (wrong key or tampered data)")]
    Decrypt,

    #[error("decrypted value is not valid UTF-8")]
    Utf8,
}

pub struct SecretCodec {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SecretCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCodec")
            .field("cipher", &"[REDACTED]")
            .finish()
    }
}

impl SecretCodec {
    pub fn from_key(key: &[u8]) -> Result<Self, CodecError> {
        if key.len() != KEY_LEN {
            return Err(CodecError::InvalidKey);
        }
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        Ok(Self { cipher })
    }

    /// Build a codec from a base64-encoded 32-byte key (the form stored in
    /// `ENCRYPTION_KEY` or the configured key file).
    pub fn from_base64_key(encoded: &Secret<String>) -> Result<Self, CodecError> {
        let bytes = Secret::new(
            STANDARD
                .decode(encoded.expose().trim())
                .map_err(|_| CodecError::InvalidKey)?,
        );
        Self::from_key(bytes.expose())
    }

    /// Generate a fresh base64-encoded key.
    pub fn generate_key() -> String {
        let mut key = [0u8; KEY_LEN];
        rand::rng().fill(&mut key);
        STANDARD.encode(key)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>, CodecError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill(&mut nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|_| CodecError::Encrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    pub fn decrypt(&self, sealed: &[u8]) -> Result<Secret<String>, CodecError> {
        if sealed.len() <= NONCE_LEN {
            return Err(CodecError::Malformed);
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CodecError::Decrypt)?;

        String::from_utf8(plaintext)
            .map(Secret::new)
            .map_err(|_| CodecError::Utf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> SecretCodec {
        SecretCodec::from_base64_key(&Secret::new(SecretCodec::generate_key())).unwrap()
    }

    #[test]
    fn decrypt_recovers_plaintext() {
        let codec = codec();
        let sealed = codec.encrypt("at_live_token").unwrap();
        assert_ne!(sealed, b"at_live_token");
        assert_eq!(codec.decrypt(&sealed).unwrap().expose(), "at_live_token");
    }

    #[test]
    fn same_plaintext_gets_distinct_ciphertexts() {
        let codec = codec();
        let a = codec.encrypt("rt_refresh").unwrap();
        let b = codec.encrypt("rt_refresh").unwrap();
        assert_ne!(a, b, "nonce must be fresh per call");
    }

    #[test]
    fn wrong_key_fails_without_panicking() {
        let sealed = codec().encrypt("at_live_token").unwrap();
        let other = codec();
        assert!(matches!(other.decrypt(&sealed), Err(CodecError::Decrypt)));
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let codec = codec();
        let mut sealed = codec.encrypt("at_live_token").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(codec.decrypt(&sealed), Err(CodecError::Decrypt)));
    }

    #[test]
    fn truncated_input_is_malformed() {
        assert!(matches!(
            codec().decrypt(&[0u8; NONCE_LEN]),
            Err(CodecError::Malformed)
        ));
    }

    #[test]
    fn short_or_non_base64_key_is_rejected() {
        assert!(SecretCodec::from_base64_key(&Secret::new("not base64!".into())).is_err());
        let short = STANDARD.encode([7u8; 16]);
        assert!(matches!(
            SecretCodec::from_base64_key(&Secret::new(short)),
            Err(CodecError::InvalidKey)
        ));
    }

    #[test]
    fn debug_hides_key_material() {
        assert!(format!("{:?}", codec()).contains("[REDACTED]"));
    }
}
