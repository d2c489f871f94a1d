//! Key derivation for the Android Backup format.
//!
//! Android derives every key in the format with PBKDF2-HMAC-SHA1. The
//! master-key checksum additionally depends on a "mangled" form of the key
//! that reproduces a sign-extension artifact of Android's Java
//! implementation; see [`mangle`].

use pbkdf2::pbkdf2_hmac;
use sha1::Sha1;

/// Derives `length` bytes of key material with PBKDF2-HMAC-SHA1.
pub fn derive(length: usize, salt: &[u8], iterations: u32, passphrase: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; length];
    pbkdf2_hmac::<Sha1>(passphrase, salt, iterations, &mut out);
    out
}

/// Applies the Java `byte -> char -> UTF-8` round trip to a master key.
///
/// The Android implementation feeds the raw master key through a Java
/// `String`, which sign-extends each byte into a `char`: bytes below 0x80
/// survive unchanged, while bytes 0x80..=0xFF become the code points
/// U+FF80..=U+FFFF and encode to three UTF-8 bytes each. The checksum in
/// the key blob is computed over this mangled form, so it has to be
/// reproduced byte for byte.
pub fn mangle(master_key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(master_key.len() * 3);
    for &b in master_key {
        if b < 0x80 {
            out.push(b);
        } else {
            // UTF-8 for the code point 0xFF00 | b, always in U+FF80..=U+FFFF.
            let cp = 0xFF00u32 | u32::from(b);
            out.push(0xE0 | (cp >> 12) as u8);
            out.push(0x80 | ((cp >> 6) & 0x3F) as u8);
            out.push(0x80 | (cp & 0x3F) as u8);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_matches_rfc6070_vectors() {
        // PBKDF2-HMAC-SHA1("password", "salt", 1, 20)
        let dk = derive(20, b"salt", 1, b"password");
        assert_eq!(
            dk,
            hex::decode("0c60c80f961f0e71f3a9b524af6012062fe037a6").unwrap()
        );

        // PBKDF2-HMAC-SHA1("password", "salt", 2, 20)
        let dk = derive(20, b"salt", 2, b"password");
        assert_eq!(
            dk,
            hex::decode("ea6c014dc72d6f8ccd1ed92ace1d41f0d8de8957").unwrap()
        );
    }

    #[test]
    fn mangle_keeps_ascii_untouched() {
        assert_eq!(mangle(b"hello"), b"hello".to_vec());
        assert_eq!(mangle(&[0x00, 0x7F]), vec![0x00, 0x7F]);
    }

    #[test]
    fn mangle_expands_high_bytes() {
        // 0x80 -> U+FF80, 0xFF -> U+FFFF.
        assert_eq!(mangle(&[0x80]), vec![0xEF, 0xBE, 0x80]);
        assert_eq!(mangle(&[0xFF]), vec![0xEF, 0xBF, 0xBF]);
        assert_eq!(mangle(&[0x41, 0xC3]), vec![0x41, 0xEF, 0xBF, 0x83]);
    }

    #[test]
    fn mangle_matches_java_string_round_trip() {
        // The same transform expressed through Rust's own char encoder.
        let key: Vec<u8> = (0u16..=255).map(|b| b as u8).collect();
        let expected: Vec<u8> = key
            .iter()
            .map(|&b| {
                if b < 0x80 {
                    char::from(b)
                } else {
                    char::from_u32(0xFF00 | u32::from(b)).unwrap()
                }
            })
            .collect::<String>()
            .into_bytes();
        assert_eq!(mangle(&key), expected);
    }

    #[test]
    fn mangle_length_law() {
        let key = [0x10, 0x90, 0x20, 0xA0, 0xFF];
        let high = key.iter().filter(|&&b| b >= 0x80).count();
        assert_eq!(mangle(&key).len(), key.len() + 2 * high);
    }
}
