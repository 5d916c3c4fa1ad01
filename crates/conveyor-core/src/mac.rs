//! HMAC-SHA256 request authentication (spec §4.1).
//!
//! The signature is base64-encoded and transported as a single-token
//! `Authorization` header value — no `Bearer`/`keyID` prefix. This
//! implementation deliberately settles the open question noted in spec §9:
//! older variants of the upstream API accepted a two-token `{keyID} {b64}`
//! form signalling a per-repository key model that never fully replaced the
//! single shared secret; we only accept the single-token form (see
//! `DESIGN.md`).

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Computes the base64-encoded HMAC-SHA256 of `message` under `secret`.
pub fn sign(message: &[u8], secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(message);
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Verifies a base64-encoded HMAC-SHA256 token against `message` under
/// `secret`. Comparison is constant-time (delegated to `hmac::Mac::verify_slice`).
pub fn verify(message: &[u8], token: &str, secret: &str) -> bool {
    let Ok(signature) = STANDARD.decode(token) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(message);
    mac.verify_slice(&signature).is_ok()
}

/// Canonical bytes to sign for a GET request: the URL-encoded query string,
/// without a leading `?`.
pub fn canonical_query_bytes(query: &str) -> Vec<u8> {
    query.trim_start_matches('?').as_bytes().to_vec()
}
