//! Password-based key derivation
//!
//! The tunnel key is stretched from the shared password with
//! PBKDF2-HMAC-SHA256 (4096 iterations, 16-byte salt). The salt never
//! travels on the wire and the password is the only secret both peers are
//! provisioned with, so the salt is pinned deterministically to the first
//! 16 bytes of SHA-256(password): client and server derive the identical
//! key from the password alone.

use crate::crypto::{KEY_LEN, SALT_LEN};
use pbkdf2::pbkdf2_hmac;
use sha2::{Digest, Sha256};

/// PBKDF2 iteration count
pub const ITERATIONS: u32 = 4096;

/// Derives the 32-byte tunnel key from a password and salt
pub fn derive_key(password: &str, salt: &[u8]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, ITERATIONS, &mut key);
    key
}

/// Returns the deterministic per-password salt
pub fn password_salt(password: &str) -> [u8; SALT_LEN] {
    let digest = Sha256::digest(password.as_bytes());
    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&digest[..SALT_LEN]);
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        // standard PBKDF2-HMAC-SHA256 test vector ("password", "salt", 4096, 32)
        let key = derive_key("password", b"salt");
        let expected = [
            0xc5, 0xe4, 0x78, 0xd5, 0x92, 0x88, 0xc8, 0x41, 0xaa, 0x53, 0x0d, 0xb6, 0x84, 0x5c,
            0x4c, 0x8d, 0x96, 0x28, 0x93, 0xa0, 0x01, 0xce, 0x4e, 0x11, 0xa4, 0x96, 0x38, 0x73,
            0xaa, 0x98, 0x13, 0x4a,
        ];
        assert_eq!(key, expected);
    }

    #[test]
    fn same_password_same_key() {
        let a = derive_key("shared secret", &password_salt("shared secret"));
        let b = derive_key("shared secret", &password_salt("shared secret"));
        assert_eq!(a, b);
    }

    #[test]
    fn different_passwords_different_keys() {
        let a = derive_key("alpha", &password_salt("alpha"));
        let b = derive_key("bravo", &password_salt("bravo"));
        assert_ne!(a, b);
    }
}
