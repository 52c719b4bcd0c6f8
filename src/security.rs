use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Constant-time string comparison to prevent timing attacks
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn signature(secret: &str, value: &str) -> String {
    // HMAC accepts keys of any length
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC-SHA256 accepts any key length"));
    mac.update(value.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// `value.signature`, safe to hand to a browser.
pub fn sign_value(secret: &str, value: &str) -> String {
    format!("{}.{}", value, signature(secret, value))
}

/// The original value when `signed` carries a valid signature for `secret`.
pub fn verify_signed_value<'a>(secret: &str, signed: &'a str) -> Option<&'a str> {
    let (value, sig) = signed.rsplit_once('.')?;
    constant_time_compare(sig, &signature(secret, value)).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("secret123", "secret123"));
        assert!(!constant_time_compare("secret123", "secret124"));
        assert!(!constant_time_compare("secret123", "secret12"));
        assert!(!constant_time_compare("", "secret"));
    }

    #[test]
    fn test_signed_value_round_trip() {
        let signed = sign_value("key", "lv");
        assert!(signed.starts_with("lv."));
        assert_eq!(verify_signed_value("key", &signed), Some("lv"));
    }

    #[test]
    fn test_tampered_value_is_rejected() {
        let signed = sign_value("key", "lv");
        let tampered = signed.replacen("lv", "en", 1);

        assert_eq!(verify_signed_value("key", &tampered), None);
        assert_eq!(verify_signed_value("other-key", &signed), None);
        assert_eq!(verify_signed_value("key", "lv"), None);
        assert_eq!(verify_signed_value("key", ""), None);
    }
}
