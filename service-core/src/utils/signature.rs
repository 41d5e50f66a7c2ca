use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Generate an HMAC-SHA256 payload signature.
///
/// Format: HMAC-SHA256("{timestamp}.{body}", secret), hex-encoded. The
/// timestamp is sent alongside the signature so receivers can reject stale
/// deliveries.
pub fn sign_payload(secret: &str, timestamp: i64, body: &str) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;

    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body.as_bytes());
    let result = mac.finalize();

    Ok(hex::encode(result.into_bytes()))
}

/// Verify an HMAC-SHA256 payload signature using constant-time comparison.
pub fn verify_payload(
    secret: &str,
    timestamp: i64,
    body: &str,
    signature: &str,
) -> Result<bool, anyhow::Error> {
    let expected_signature = sign_payload(secret, timestamp, body)?;

    let expected_bytes = expected_signature.as_bytes();
    let signature_bytes = signature.as_bytes();

    if expected_bytes.len() != signature_bytes.len() {
        return Ok(false);
    }

    Ok(expected_bytes.ct_eq(signature_bytes).into())
}
