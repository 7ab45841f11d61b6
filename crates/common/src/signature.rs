//! Webhook signature verification and the Graph app-secret proof.
//!
//! Meta signs every webhook delivery with
//! `X-Hub-Signature-256: sha256=<hex>` computed as HMAC-SHA256 of the raw
//! request body under the app secret. Verification MUST run over the exact
//! raw bytes, before any JSON parsing; a re-serialized body will not match.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header prefix Meta puts in front of the hex digest.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Create an HMAC-SHA256 signature over a payload, hex-encoded.
pub fn sign(payload: &[u8], secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");

    mac.update(payload);
    let result = mac.finalize();

    hex::encode(result.into_bytes())
}

/// Verify an `X-Hub-Signature-256` header against the raw request body.
///
/// Rejects when the header lacks the `sha256=` prefix, is not valid hex,
/// decodes to a different length than the MAC, or fails the comparison.
/// The comparison itself is constant-time (`Mac::verify_slice`), so an
/// attacker cannot learn the expected digest byte by byte.
pub fn verify_webhook_signature(raw_body: &[u8], header_value: &str, app_secret: &str) -> bool {
    let Some(signature_hex) = header_value.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };

    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };

    // SHA-256 MACs are 32 bytes; anything else can never match and
    // verify_slice would panic-free reject it anyway, but check up front
    // so truncated signatures are handled uniformly.
    if signature.len() != 32 {
        return false;
    }

    let mut mac =
        HmacSha256::new_from_slice(app_secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(raw_body);

    mac.verify_slice(&signature).is_ok()
}

/// Compute the `appsecret_proof` query parameter the Graph API requires:
/// hex HMAC-SHA256 of the access token under the app secret.
pub fn app_secret_proof(access_token: &str, app_secret: &str) -> String {
    sign(access_token.as_bytes(), app_secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test_app_secret";

    fn header_for(body: &[u8]) -> String {
        format!("{}{}", SIGNATURE_PREFIX, sign(body, SECRET))
    }

    #[test]
    fn test_valid_signature_accepted() {
        let body = br#"{"object":"page","entry":[]}"#;
        assert!(verify_webhook_signature(body, &header_for(body), SECRET));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let body = br#"{"object":"page","entry":[]}"#;
        let header = header_for(body);
        assert!(!verify_webhook_signature(
            br#"{"object":"page","entry":[{}]}"#,
            &header,
            SECRET
        ));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let body = b"payload";
        let header = header_for(body);
        assert!(!verify_webhook_signature(body, &header, "other_secret"));
    }

    #[test]
    fn test_missing_prefix_rejected() {
        let body = b"payload";
        let bare_hex = sign(body, SECRET);
        assert!(!verify_webhook_signature(body, &bare_hex, SECRET));
    }

    #[test]
    fn test_truncated_signature_rejected() {
        let body = b"payload";
        let header = format!("{}{}", SIGNATURE_PREFIX, &sign(body, SECRET)[..32]);
        assert!(!verify_webhook_signature(body, &header, SECRET));
    }

    #[test]
    fn test_non_hex_signature_rejected() {
        let header = format!("{}{}", SIGNATURE_PREFIX, "z".repeat(64));
        assert!(!verify_webhook_signature(b"payload", &header, SECRET));
    }

    #[test]
    fn test_all_zero_signature_rejected() {
        let header = format!("{}{}", SIGNATURE_PREFIX, "0".repeat(64));
        assert!(!verify_webhook_signature(b"payload", &header, SECRET));
    }

    #[test]
    fn test_app_secret_proof_shape() {
        let proof = app_secret_proof("EAAB_access_token", SECRET);
        assert_eq!(proof.len(), 64); // SHA256 produces 64 hex characters
        assert_eq!(proof, app_secret_proof("EAAB_access_token", SECRET));
    }
}
