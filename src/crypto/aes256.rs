//! AES-256-GCM datagram cipher
//!
//! Seals whole frames into wire datagrams and opens them again. The sealed
//! format is `[nonce (12 bytes)][ciphertext][tag (16 bytes)]` with an empty
//! AAD; the nonce is drawn fresh from the system CSPRNG for every seal.

use crate::crypto::{CryptoError, KEY_LEN, NONCE_LEN, kdf};
use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};

/// Stateless AEAD context shared by every worker of a peer
///
/// The key is immutable for the peer's lifetime; `seal` and `open` take
/// `&self` and are safe to call concurrently.
pub struct TunnelCipher {
    cipher: Aes256Gcm,
}

impl TunnelCipher {
    /// Derives the tunnel key from the shared password
    pub fn from_password(password: &str) -> Self {
        let salt = kdf::password_salt(password);
        Self::from_key(&kdf::derive_key(password, &salt))
    }

    /// Builds a cipher from a raw 32-byte key
    pub fn from_key(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: Aes256Gcm::new(key.into()),
        }
    }

    fn generate_nonce() -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        nonce
    }

    /// Encrypts a plaintext frame into a wire datagram
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce_bytes = Self::generate_nonce();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::SealFailed)?;

        let mut datagram = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        datagram.extend_from_slice(&nonce_bytes);
        datagram.extend_from_slice(&ciphertext);
        Ok(datagram)
    }

    /// Decrypts a wire datagram back into the plaintext frame
    pub fn open(&self, datagram: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if datagram.len() < NONCE_LEN {
            return Err(CryptoError::ShortDatagram);
        }

        let (nonce, ciphertext) = datagram.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::AuthFailed)
    }
}
