//! HMAC-SHA256 signatures for webhook bodies, `sha256=<hex>` form.

use hex::decode as hex_decode;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::error;

use crate::error::{Result, TmsError};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-TMS-Signature-256";
const SIGNATURE_PREFIX: &str = "sha256=";

/// Signs `payload`, returning the header value.
pub fn sign_payload(secret: &str, payload: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| TmsError::ConfigError(format!("Invalid webhook secret: {}", e)))?;
    mac.update(payload);
    Ok(format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Checks a `sha256=<hex>` header against `payload`.
pub fn verify_signature(secret: &str, payload: &[u8], signature_header: &str) -> bool {
    let Some(hex_signature) = signature_header.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);

    match hex_decode(hex_signature) {
        // verify_slice compares in constant time
        Ok(signature_bytes) => mac.verify_slice(&signature_bytes).is_ok(),
        Err(_) => {
            error!("Signature is not valid hex");
            false
        }
    }
}
