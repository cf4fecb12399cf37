// Copyright (c) LINE Console Contributors
// SPDX-License-Identifier: Apache-2.0

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Validate the `X-Line-Signature` header against the raw request body.
///
/// The digest is HMAC-SHA256 over the exact raw bytes, keyed by the
/// channel secret and base64-encoded by the platform. Verification must
/// happen before any JSON parsing: re-serializing a parsed body changes
/// key order and whitespace and silently breaks the digest.
pub fn verify_signature(raw_body: &[u8], signature_header: &str, channel_secret: &str) -> bool {
    let supplied = match BASE64.decode(signature_header.trim()) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let mut mac = match HmacSha256::new_from_slice(channel_secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(raw_body);
    mac.verify_slice(&supplied).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(body: &[u8], secret: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        BASE64.encode(mac.finalize().into_bytes())
    }

    #[test]
    fn correct_signature_validates() {
        let body = br#"{"destination":"U1","events":[]}"#;
        let header = sign(body, "channel-secret");
        assert!(verify_signature(body, &header, "channel-secret"));
    }

    #[test]
    fn single_byte_mutation_invalidates() {
        let body = br#"{"destination":"U1","events":[]}"#.to_vec();
        let header = sign(&body, "channel-secret");
        let mut tampered = body.clone();
        tampered[3] ^= 0x01;
        assert!(!verify_signature(&tampered, &header, "channel-secret"));
    }

    #[test]
    fn wrong_secret_invalidates() {
        let body = br#"{"events":[]}"#;
        let header = sign(body, "channel-secret");
        assert!(!verify_signature(body, &header, "other-secret"));
    }

    #[test]
    fn garbage_header_is_rejected() {
        assert!(!verify_signature(b"{}", "not base64!!!", "channel-secret"));
    }
}
