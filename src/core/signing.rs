// src/core/signing.rs

//! Request signing: `Spas-Signature = base64(HMAC-SHA1(sk, signBase))`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Builds the sign-base string from whichever of `tenant`/`group` are present, per
/// §4.4: `tenant+group+ts`, `tenant+ts`, `group+ts`, or `None` if neither is present
/// (in which case no signature header should be sent at all).
pub fn sign_base(tenant: Option<&str>, group: Option<&str>, timestamp_ms: &str) -> Option<String> {
    match (non_blank(tenant), non_blank(group)) {
        (Some(tenant), Some(group)) => Some(format!("{tenant}+{group}+{timestamp_ms}")),
        (Some(tenant), None) => Some(format!("{tenant}+{timestamp_ms}")),
        (None, Some(group)) => Some(format!("{group}+{timestamp_ms}")),
        (None, None) => None,
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// `base64(HMAC-SHA1(sk, sign_base))`.
pub fn sign(sk: &str, sign_base: &str) -> String {
    let mut mac = HmacSha1::new_from_slice(sk.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(sign_base.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_base_prefers_tenant_and_group() {
        assert_eq!(
            sign_base(Some("ns1"), Some("GROUP"), "1000"),
            Some("ns1+GROUP+1000".to_string())
        );
    }

    #[test]
    fn sign_base_falls_back_to_tenant_only() {
        assert_eq!(sign_base(Some("ns1"), None, "1000"), Some("ns1+1000".to_string()));
    }

    #[test]
    fn sign_base_falls_back_to_group_only() {
        assert_eq!(sign_base(None, Some("GROUP"), "1000"), Some("GROUP+1000".to_string()));
    }

    #[test]
    fn sign_base_none_when_neither_present() {
        assert_eq!(sign_base(None, None, "1000"), None);
        assert_eq!(sign_base(Some(""), Some(""), "1000"), None);
    }

    #[test]
    fn sign_is_deterministic_and_base64() {
        let sig1 = sign("my-secret-key", "ns1+GROUP+1000");
        let sig2 = sign("my-secret-key", "ns1+GROUP+1000");
        assert_eq!(sig1, sig2);
        assert!(base64::engine::general_purpose::STANDARD.decode(&sig1).is_ok());
    }

    #[test]
    fn sign_differs_for_different_keys() {
        assert_ne!(sign("key-a", "base"), sign("key-b", "base"));
    }
}
