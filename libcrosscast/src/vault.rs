//! Credential vault: authenticated encryption of OAuth tokens at rest
//!
//! Secrets are sealed with AES-256-GCM under a single process-wide key and
//! stored as one text column in the envelope format
//!
//! ```text
//! base64(iv) ":" base64(auth_tag) ":" base64(ciphertext)
//! ```
//!
//! Every call to [`CredentialVault::encrypt`] draws a fresh 96-bit nonce.
//! Decryption fails closed: any decode, length, or tag failure surfaces as
//! [`VaultError::TamperedOrCorrupt`] and no plaintext is returned.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

use crate::error::{Result, VaultError};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

const DELIMITER: char = ':';

pub struct CredentialVault {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CredentialVault { key: <redacted> }")
    }
}

impl CredentialVault {
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Build a vault from the key as supplied by the environment: 64 hex
    /// characters or standard base64 of 32 bytes.
    pub fn from_encoded_key(encoded: &SecretString) -> Result<Self> {
        let raw = encoded.expose_secret().trim();
        let bytes = Zeroizing::new(if raw.len() == KEY_LEN * 2 && raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            hex::decode(raw).map_err(|e| VaultError::InvalidKey(e.to_string()))?
        } else {
            STANDARD
                .decode(raw)
                .map_err(|_| VaultError::InvalidKey("expected 64 hex chars or base64".to_string()))?
        });

        let key: &[u8; KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
            VaultError::InvalidKey(format!("expected {} bytes, got {}", KEY_LEN, bytes.len()))
        })?;
        Ok(Self::new(key))
    }

    /// Generate a new random key, hex encoded for `CROSSCAST_ENCRYPTION_KEY`.
    pub fn generate_key() -> SecretString {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(key.as_mut());
        SecretString::from(hex::encode(key.as_ref()))
    }

    /// Seal a secret into an `iv:tag:ciphertext` envelope.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() {
            return Err(VaultError::EmptyPlaintext.into());
        }

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        // aes-gcm appends the tag to the ciphertext
        let sealed = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| VaultError::EncryptionFailed)?;
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        Ok(format!(
            "{}{d}{}{d}{}",
            STANDARD.encode(nonce_bytes),
            STANDARD.encode(tag),
            STANDARD.encode(ciphertext),
            d = DELIMITER
        ))
    }

    /// Open an envelope produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, envelope: &str) -> Result<SecretString> {
        let mut parts = envelope.split(DELIMITER);
        let (iv, tag, ciphertext) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(iv), Some(tag), Some(ct), None) => (iv, tag, ct),
            _ => return Err(corrupt("expected three ':'-separated segments")),
        };

        let iv = STANDARD.decode(iv).map_err(|_| corrupt("iv is not base64"))?;
        let tag = STANDARD.decode(tag).map_err(|_| corrupt("auth tag is not base64"))?;
        let ciphertext = STANDARD
            .decode(ciphertext)
            .map_err(|_| corrupt("ciphertext is not base64"))?;

        if iv.len() != NONCE_LEN {
            return Err(corrupt(&format!("iv must be {} bytes, got {}", NONCE_LEN, iv.len())));
        }
        if tag.len() != TAG_LEN {
            return Err(corrupt(&format!("auth tag must be {} bytes, got {}", TAG_LEN, tag.len())));
        }

        let mut sealed = ciphertext;
        sealed.extend_from_slice(&tag);

        let plaintext = Zeroizing::new(
            self.cipher
                .decrypt(Nonce::from_slice(&iv), sealed.as_slice())
                .map_err(|_| corrupt("authentication tag did not verify"))?,
        );
        let text = std::str::from_utf8(&plaintext).map_err(|_| corrupt("plaintext is not UTF-8"))?;
        Ok(SecretString::from(text))
    }

    /// Decrypt a stored column, passing legacy plaintext through.
    ///
    /// Rows written before encryption was introduced hold raw tokens. They
    /// keep working until `cast-creds migrate` rewrites them.
    pub fn reveal_stored(&self, stored: &str) -> Result<SecretString> {
        if is_encrypted_format(stored) {
            self.decrypt(stored)
        } else {
            tracing::warn!("Stored credential is not encrypted; run `cast-creds migrate`");
            Ok(SecretString::from(stored))
        }
    }
}

fn corrupt(reason: &str) -> crate::error::CrosscastError {
    VaultError::TamperedOrCorrupt(reason.to_string()).into()
}

/// Structural check: three non-empty `:`-separated segments.
///
/// Used to tell legacy plaintext from envelopes during migration. It says
/// nothing about whether the envelope will decrypt.
pub fn is_encrypted_format(text: &str) -> bool {
    let parts: Vec<&str> = text.split(DELIMITER).collect();
    parts.len() == 3 && parts.iter().all(|p| !p.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CrosscastError;

    fn test_vault() -> CredentialVault {
        CredentialVault::new(&[7u8; KEY_LEN])
    }

    fn assert_tampered(result: Result<SecretString>) {
        match result {
            Err(CrosscastError::Vault(VaultError::TamperedOrCorrupt(_))) => {}
            Err(other) => panic!("expected TamperedOrCorrupt, got {other}"),
            Ok(_) => panic!("expected TamperedOrCorrupt, got plaintext"),
        }
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let vault = test_vault();
        for plaintext in ["a", "access-token-123", "ünïcödé ✓", &"x".repeat(4096)] {
            let envelope = vault.encrypt(plaintext).unwrap();
            assert!(is_encrypted_format(&envelope));
            assert_eq!(vault.decrypt(&envelope).unwrap().expose_secret(), plaintext);
        }
    }

    #[test]
    fn nonce_is_fresh_per_call() {
        let vault = test_vault();
        let first = vault.encrypt("same secret").unwrap();
        let second = vault.encrypt("same secret").unwrap();

        assert_ne!(first, second);
        assert_ne!(first.split(':').next(), second.split(':').next());
        assert_eq!(vault.decrypt(&first).unwrap().expose_secret(), "same secret");
        assert_eq!(vault.decrypt(&second).unwrap().expose_secret(), "same secret");
    }

    #[test]
    fn envelope_segment_lengths() {
        let envelope = test_vault().encrypt("token").unwrap();
        let parts: Vec<&str> = envelope.split(':').collect();
        assert_eq!(STANDARD.decode(parts[0]).unwrap().len(), NONCE_LEN);
        assert_eq!(STANDARD.decode(parts[1]).unwrap().len(), TAG_LEN);
        assert_eq!(STANDARD.decode(parts[2]).unwrap().len(), "token".len());
    }

    #[test]
    fn empty_plaintext_rejected() {
        let err = test_vault().encrypt("").unwrap_err();
        assert!(matches!(err, CrosscastError::Vault(VaultError::EmptyPlaintext)));
    }

    #[test]
    fn flipping_any_ciphertext_byte_is_detected() {
        let vault = test_vault();
        let envelope = vault.encrypt("refresh-token-value").unwrap();
        let parts: Vec<&str> = envelope.split(':').collect();
        let ciphertext = STANDARD.decode(parts[2]).unwrap();

        for i in 0..ciphertext.len() {
            let mut flipped = ciphertext.clone();
            flipped[i] ^= 0x01;
            let tampered = format!("{}:{}:{}", parts[0], parts[1], STANDARD.encode(&flipped));
            assert_tampered(vault.decrypt(&tampered));
        }
    }

    #[test]
    fn flipping_envelope_text_is_detected() {
        let vault = test_vault();
        let envelope = vault.encrypt("refresh-token-value").unwrap();
        let start = envelope.rfind(':').unwrap() + 1;

        for i in start..envelope.len() {
            let mut bytes = envelope.clone().into_bytes();
            bytes[i] = if bytes[i] == b'A' { b'B' } else { b'A' };
            let tampered = String::from_utf8(bytes).unwrap();
            if tampered == envelope {
                continue;
            }
            assert_tampered(vault.decrypt(&tampered));
        }
    }

    #[test]
    fn tampered_tag_and_iv_are_detected() {
        let vault = test_vault();
        let envelope = vault.encrypt("token").unwrap();
        let parts: Vec<&str> = envelope.split(':').collect();

        let mut tag = STANDARD.decode(parts[1]).unwrap();
        tag[0] ^= 0xff;
        assert_tampered(vault.decrypt(&format!("{}:{}:{}", parts[0], STANDARD.encode(&tag), parts[2])));

        let short_iv = STANDARD.encode([0u8; 8]);
        assert_tampered(vault.decrypt(&format!("{}:{}:{}", short_iv, parts[1], parts[2])));
    }

    #[test]
    fn wrong_key_fails_closed() {
        let envelope = test_vault().encrypt("secret").unwrap();
        let other = CredentialVault::new(&[9u8; KEY_LEN]);
        assert_tampered(other.decrypt(&envelope));
    }

    #[test]
    fn malformed_envelopes_fail_closed() {
        let vault = test_vault();
        assert_tampered(vault.decrypt("plaintext-token"));
        assert_tampered(vault.decrypt("a:b"));
        assert_tampered(vault.decrypt("a:b:c:d"));
        assert_tampered(vault.decrypt("!!:??:##"));
    }

    #[test]
    fn encrypted_format_is_structural_only() {
        assert!(is_encrypted_format("a:b:c"));
        assert!(!is_encrypted_format("plain-token"));
        assert!(!is_encrypted_format("a::c"));
        assert!(!is_encrypted_format("a:b:c:d"));
        assert!(!is_encrypted_format(""));
    }

    #[test]
    fn reveal_stored_passes_legacy_plaintext() {
        let vault = test_vault();
        assert_eq!(vault.reveal_stored("legacy-token").unwrap().expose_secret(), "legacy-token");

        let envelope = vault.encrypt("modern-token").unwrap();
        assert_eq!(vault.reveal_stored(&envelope).unwrap().expose_secret(), "modern-token");
    }

    #[test]
    fn key_parsing_accepts_hex_and_base64() {
        let generated = CredentialVault::generate_key();
        assert_eq!(generated.expose_secret().len(), 64);
        let vault = CredentialVault::from_encoded_key(&generated).unwrap();
        let envelope = vault.encrypt("x").unwrap();

        let bytes = hex::decode(generated.expose_secret()).unwrap();
        let b64 = SecretString::from(STANDARD.encode(&bytes));
        let same = CredentialVault::from_encoded_key(&b64).unwrap();
        assert_eq!(same.decrypt(&envelope).unwrap().expose_secret(), "x");
    }

    #[test]
    fn key_parsing_rejects_wrong_length() {
        let short = SecretString::from(STANDARD.encode([1u8; 16]));
        assert!(CredentialVault::from_encoded_key(&short).is_err());
        assert!(CredentialVault::from_encoded_key(&SecretString::from("not a key")).is_err());
    }

    #[test]
    fn debug_output_is_redacted() {
        assert_eq!(format!("{:?}", test_vault()), "CredentialVault { key: <redacted> }");
    }
}
