use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs raw request payloads with the shared carrier secret. The carrier
/// verifies the signature over the exact bytes sent, so callers must sign
/// the serialized body they transmit, not a re-serialization.
pub struct SignatureGenerator {
    secret: String,
}

impl SignatureGenerator {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// HMAC-SHA256 over the payload, base64-encoded.
    pub fn sign(&self, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(payload);
        STANDARD.encode(mac.finalize().into_bytes())
    }
}
