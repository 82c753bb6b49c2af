// src/core/codec.rs

//! GBK transcoding and content fingerprinting.
//!
//! The fingerprint is computed over the *GBK-encoded* bytes of a value, not its UTF-8
//! representation. The server compares fingerprints byte-for-byte, so reimplementing this
//! over UTF-8 bytes would mean the probe loop never converges for any non-ASCII value.

use encoding_rs::GBK;
use md5::{Digest, Md5};

/// Encodes `text` as GBK, replacing unmappable characters per `encoding_rs`'s usual policy.
pub fn encode_gbk(text: &str) -> Vec<u8> {
    let (bytes, _, _) = GBK.encode(text);
    bytes.into_owned()
}

/// Decodes GBK `bytes` into a `String`, replacing malformed sequences with U+FFFD.
pub fn decode_gbk(bytes: &[u8]) -> String {
    let (text, _, _) = GBK.decode(bytes);
    text.into_owned()
}

/// Lowercase hex MD5 over the GBK-encoded bytes of `text`. `""` denotes "no value".
pub fn fingerprint(text: &str) -> String {
    fingerprint_bytes(&encode_gbk(text))
}

/// Lowercase hex MD5 over already-GBK-encoded bytes.
pub fn fingerprint_bytes(gbk_bytes: &[u8]) -> String {
    let digest = Md5::digest(gbk_bytes);
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_ascii() {
        let text = "hello=world";
        let bytes = encode_gbk(text);
        assert_eq!(decode_gbk(&bytes), text);
    }

    #[test]
    fn fingerprint_is_stable_and_lowercase_hex() {
        let fp = fingerprint("abc");
        assert_eq!(fp.len(), 32);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(fp, fingerprint("abc"));
    }

    #[test]
    fn fingerprint_differs_for_different_content() {
        assert_ne!(fingerprint("abc"), fingerprint("abd"));
    }

    #[test]
    fn chinese_characters_encode_to_gbk_not_utf8() {
        let text = "配置";
        let gbk = encode_gbk(text);
        // GBK encodes each of these two Han characters into 2 bytes; UTF-8 would take 3 each.
        assert_eq!(gbk.len(), 4);
        assert_eq!(decode_gbk(&gbk), text);
    }
}
