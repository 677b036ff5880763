//! Delivery signatures
//!
//! Header format: `X-Queue-Signature: v1=<mac>[,v1=<mac>...]` where `<mac>`
//! is HMAC-SHA256 of the raw request body, hex or standard base64. Several
//! keys may be configured so signing keys can be rotated without dropping
//! deliveries in flight.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use std::sync::Arc;

use crate::error::{QueueError, Result};

pub const SIGNATURE_HEADER: &str = "x-queue-signature";
const SCHEME_PREFIX: &str = "v1=";

type HmacSha256 = Hmac<Sha256>;

/// Compute the `v1=<hex>` signature of `body` under `key`.
pub fn sign(key: &SecretString, body: &[u8]) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(key.expose_secret().as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    format!("{}{}", SCHEME_PREFIX, hex::encode(mac.finalize().into_bytes()))
}

#[derive(Clone)]
pub struct SignatureVerifier {
    keys: Arc<Vec<SecretString>>,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("keys", &self.keys.len())
            .finish()
    }
}

impl SignatureVerifier {
    pub fn new(keys: Vec<SecretString>) -> Self {
        Self {
            keys: Arc::new(keys),
        }
    }

    /// Check a signature header against the raw body.
    ///
    /// With no keys configured every delivery is rejected.
    pub fn verify(&self, header: Option<&str>, body: &[u8]) -> Result<()> {
        let header = header.ok_or(QueueError::InvalidSignature)?;

        for candidate in header.split(',').map(str::trim) {
            let Some(encoded) = candidate.strip_prefix(SCHEME_PREFIX) else {
                continue;
            };
            let Some(provided) = decode_mac(encoded) else {
                continue;
            };
            for key in self.keys.iter() {
                let Ok(mut mac) = HmacSha256::new_from_slice(key.expose_secret().as_bytes()) else {
                    continue;
                };
                mac.update(body);
                if mac.verify_slice(&provided).is_ok() {
                    return Ok(());
                }
            }
        }

        Err(QueueError::InvalidSignature.into())
    }
}

fn decode_mac(encoded: &str) -> Option<Vec<u8>> {
    if encoded.len() == 64 && encoded.bytes().all(|b| b.is_ascii_hexdigit()) {
        return hex::decode(encoded).ok();
    }
    STANDARD.decode(encoded).ok()
}
