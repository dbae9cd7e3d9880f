use std::fmt::Debug;
use std::fmt::Display;

use hmac::Hmac;
use hmac::Mac;
use sha1::Digest;
use sha1::Sha1;

/// Convert arbitrary error types to `actix_web::Error` with HTTP 500.
pub fn error_500<T>(e: T) -> actix_web::Error
where
    T: Debug + Display + 'static,
{
    actix_web::error::ErrorInternalServerError(e)
}

/// Convert arbitrary error types to `actix_web::Error` with HTTP 400.
pub fn error_400<T>(e: T) -> actix_web::Error
where
    T: Debug + Display + 'static,
{
    actix_web::error::ErrorBadRequest(e)
}

/// `key(x) = "hash_" + sha1(utf8(x))` (§3).
pub fn entity_key(value: &str) -> String {
    format!("hash_{}", hex::encode(Sha1::digest(value.as_bytes())))
}

/// `sha1(entry_xml)`-style content fingerprint (§3 "change is detected by
/// sha1(entry_xml)").
pub fn sha1_hex(value: &[u8]) -> String {
    hex::encode(Sha1::digest(value))
}

/// `HMAC_SHA1(secret, payload)`, hex-encoded, used for `X-Hub-Signature`
/// (§6) and verified against the reference vector in §8's round-trip laws.
pub fn sha1_hmac_hex(
    secret: &[u8],
    payload: &[u8],
) -> String {
    let mut mac = Hmac::<Sha1>::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_key_is_deterministic() {
        assert_eq!(entity_key("http://x.test/cb"), entity_key("http://x.test/cb"));
        assert_ne!(entity_key("a"), entity_key("b"));
    }

    #[test]
    fn sha1_hmac_matches_reference_vector() {
        // RFC 2202 test case 1: key = 20 bytes of 0x0b, data = "Hi There".
        let key = [0x0bu8; 20];
        let mac = sha1_hmac_hex(&key, b"Hi There");
        assert_eq!(mac, "b617318655057264e28bc0b6fb378c8ef146be00");
    }
}
