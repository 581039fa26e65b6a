//! Secure random generation
//!
//! Wraps the operating system CSPRNG behind small helpers used everywhere
//! nonces, salts, and keys are needed.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::OsRng;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of an AES-GCM nonce in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Size of a key-derivation salt in bytes
pub const SALT_SIZE: usize = 16;

/// Size of an AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// A 256-bit symmetric key that zeroes its memory on drop
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretKey {
    key: [u8; KEY_SIZE],
}

impl SecretKey {
    /// Wrap existing key bytes
    pub fn from_bytes(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Get the key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKey").finish_non_exhaustive()
    }
}

/// Fill a buffer with cryptographically secure random bytes
pub fn fill(buf: &mut [u8]) {
    OsRng.fill_bytes(buf);
}

/// Generate a fresh 96-bit AEAD nonce
pub fn nonce_12() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Generate a fresh 128-bit salt
pub fn salt_16() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Generate a fresh AES-256 key
pub fn key_32() -> SecretKey {
    let mut key = [0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut key);
    SecretKey::from_bytes(key)
}
