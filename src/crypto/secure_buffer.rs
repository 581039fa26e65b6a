//! Encrypted in-memory buffers for decrypted secrets
//!
//! Plaintext that must exist in process memory (decrypt-for-view, export) is
//! immediately re-encrypted under a per-buffer, memory-only AES-256 key. The
//! key has no user-authentication gate; its purpose is memory-disclosure
//! resistance, not access control. The originating plaintext array is
//! destructively overwritten the instant it is captured, and scoped access
//! guarantees the temporary decrypted copy is wiped on every exit path.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use zeroize::Zeroize;

use super::random::{self, SecretKey, NONCE_SIZE};
use crate::error::{StrongboxError, StrongboxResult};

/// Maximum buffer capacity (10 MiB)
pub const MAX_CAPACITY: usize = 10 * 1024 * 1024;

/// Destructively overwrite a byte slice with multiple passes
///
/// Pattern: random, 0xFF, 0x00, random, 0x00. The final pass leaves the
/// slice zeroed via a volatile write so the compiler cannot elide it.
pub fn secure_wipe(buf: &mut [u8]) {
    random::fill(buf);
    buf.fill(0xFF);
    buf.fill(0x00);
    random::fill(buf);
    buf.zeroize();
}

/// Guard that wipes its contents on drop, covering every exit path
struct WipedOnDrop {
    bytes: Vec<u8>,
}

impl Drop for WipedOnDrop {
    fn drop(&mut self) {
        secure_wipe(&mut self.bytes);
    }
}

/// Holds a secret encrypted-at-rest in process memory
pub struct SecureMemoryBuffer {
    capacity: usize,
    key: Option<SecretKey>,
    nonce: [u8; NONCE_SIZE],
    ciphertext: Vec<u8>,
    sealed: bool,
    destroyed: bool,
}

impl SecureMemoryBuffer {
    /// Create an empty buffer with the given plaintext capacity
    ///
    /// # Errors
    ///
    /// [`StrongboxError::InvalidCapacity`] unless `0 < capacity <= 10 MiB`.
    pub fn create(capacity: usize) -> StrongboxResult<Self> {
        if capacity == 0 || capacity > MAX_CAPACITY {
            return Err(StrongboxError::InvalidCapacity(capacity));
        }
        Ok(Self {
            capacity,
            key: None,
            nonce: [0u8; NONCE_SIZE],
            ciphertext: Vec::new(),
            sealed: false,
            destroyed: false,
        })
    }

    /// Capture a secret into the buffer
    ///
    /// Encrypts `plaintext` under a fresh memory-only key, then destructively
    /// overwrites the caller's array in place before returning. A subsequent
    /// write replaces the previous payload under a new key and nonce.
    ///
    /// # Errors
    ///
    /// [`StrongboxError::Sealed`] after `seal()`/`destroy()`;
    /// [`StrongboxError::InvalidCapacity`] if the payload exceeds capacity.
    pub fn write(&mut self, plaintext: &mut [u8]) -> StrongboxResult<()> {
        if self.sealed || self.destroyed {
            return Err(StrongboxError::Sealed);
        }
        if plaintext.len() > self.capacity {
            return Err(StrongboxError::InvalidCapacity(plaintext.len()));
        }

        let key = random::key_32();
        let nonce = random::nonce_12();
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| StrongboxError::Crypto(format!("Failed to create cipher: {}", e)))?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_ref())
            .map_err(|e| StrongboxError::Crypto(format!("Encryption failed: {}", e)))?;

        // The caller's plaintext is gone from this point on
        secure_wipe(plaintext);

        self.wipe_internal();
        self.key = Some(key);
        self.nonce = nonce;
        self.ciphertext = ciphertext;
        Ok(())
    }

    /// Run a closure over the decrypted payload
    ///
    /// The temporary decrypted copy is wiped when the closure returns,
    /// unwinds, or exits early; the wipe is attached to a drop guard.
    ///
    /// # Errors
    ///
    /// [`StrongboxError::Sealed`] after `seal()`/`destroy()`;
    /// [`StrongboxError::Crypto`] if nothing has been written.
    pub fn with_scoped_access<R>(&self, f: impl FnOnce(&[u8]) -> R) -> StrongboxResult<R> {
        if self.sealed || self.destroyed {
            return Err(StrongboxError::Sealed);
        }
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| StrongboxError::Crypto("buffer has no payload".into()))?;

        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| StrongboxError::Crypto(format!("Failed to create cipher: {}", e)))?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&self.nonce), self.ciphertext.as_ref())
            .map_err(|_| StrongboxError::BadTag)?;

        let guard = WipedOnDrop { bytes: plaintext };
        Ok(f(&guard.bytes))
    }

    /// Wipe all internal state and close the buffer to further access.
    /// Idempotent.
    pub fn seal(&mut self) {
        self.wipe_internal();
        self.sealed = true;
    }

    /// Wipe all internal state and mark the buffer permanently unusable.
    /// Idempotent.
    pub fn destroy(&mut self) {
        self.wipe_internal();
        self.sealed = true;
        self.destroyed = true;
    }

    /// Plaintext capacity this buffer admits
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the buffer currently holds a payload
    pub fn has_payload(&self) -> bool {
        !self.sealed && self.key.is_some()
    }

    /// Whether the buffer was sealed or destroyed
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    fn wipe_internal(&mut self) {
        if !self.ciphertext.is_empty() {
            secure_wipe(&mut self.ciphertext);
        }
        self.ciphertext = Vec::new();
        self.nonce.zeroize();
        // SecretKey zeroes itself on drop
        self.key = None;
    }
}

impl Drop for SecureMemoryBuffer {
    // Backstop only: explicit seal()/destroy() is the supported release path
    fn drop(&mut self) {
        self.wipe_internal();
    }
}

impl std::fmt::Debug for SecureMemoryBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureMemoryBuffer")
            .field("capacity", &self.capacity)
            .field("sealed", &self.sealed)
            .field("destroyed", &self.destroyed)
            .finish_non_exhaustive()
    }
}
