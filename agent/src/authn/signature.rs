//! Webhook signature verification
//!
//! GitHub signs every delivery with `X-Hub-Signature: sha1=<hex>`, the
//! HMAC-SHA1 of the raw request body keyed by the shared webhook secret.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;

type HmacSha1 = Hmac<Sha1>;

/// Header carrying the delivery signature
pub const SIGNATURE_HEADER: &str = "x-hub-signature";

const SIGNATURE_PREFIX: &str = "sha1=";

/// Compute the `sha1=<hex>` signature for a body.
///
/// Returns `None` if the key is rejected by the MAC.
pub fn sign(raw_body: &[u8], secret: &[u8]) -> Option<String> {
    let mut mac = HmacSha1::new_from_slice(secret).ok()?;
    mac.update(raw_body);
    Some(format!(
        "{SIGNATURE_PREFIX}{}",
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Check a received signature header against the body.
///
/// Returns `false` when the header is missing. The comparison is over the raw
/// bytes of both strings and runs in constant time for equal lengths; a length
/// mismatch is rejected up front since the expected length is public.
pub fn verify(raw_body: &[u8], received: Option<&str>, secret: &[u8]) -> bool {
    let Some(received) = received else {
        return false;
    };

    let Some(expected) = sign(raw_body, secret) else {
        return false;
    };
    let expected = expected.as_bytes();
    let received = received.as_bytes();

    if expected.len() != received.len() {
        return false;
    }

    expected.ct_eq(received).into()
}
