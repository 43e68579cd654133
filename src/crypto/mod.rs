//! Datagram encryption for the tunnel
//!
//! Every UDP datagram is sealed with AES-256-GCM under a single symmetric
//! key derived once from the shared password. Each datagram gets its own
//! random 96-bit nonce, prepended to the ciphertext; there is no rekeying,
//! so a key must not be used for anywhere near 2^32 datagrams (the random
//! nonce birthday bound).

pub mod aes256;
pub mod kdf;

pub use aes256::TunnelCipher;

use std::fmt;
use std::fmt::Display;

/// Symmetric key length in bytes (AES-256)
pub const KEY_LEN: usize = 32;

/// GCM nonce length in bytes
pub const NONCE_LEN: usize = 12;

/// GCM authentication tag length in bytes
pub const TAG_LEN: usize = 16;

/// Key-derivation salt length in bytes
pub const SALT_LEN: usize = 16;

/// Per-datagram overhead added by `seal`: nonce + tag
pub const OVERHEAD: usize = NONCE_LEN + TAG_LEN;

/// Seal/open failure modes
#[derive(Debug, PartialEq, Eq)]
pub enum CryptoError {
    /// Datagram is shorter than the 12-byte nonce prefix
    ShortDatagram,

    /// Tag verification failed: tampered data or a different key
    AuthFailed,

    /// AEAD encryption failed
    SealFailed,
}

impl std::error::Error for CryptoError {}

impl Display for CryptoError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CryptoError::ShortDatagram => "datagram too short for nonce".fmt(fmt),
            CryptoError::AuthFailed => "datagram authentication failed".fmt(fmt),
            CryptoError::SealFailed => "datagram encryption failed".fmt(fmt),
        }
    }
}
