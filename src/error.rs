//! Custom error types for Strongbox
//!
//! This module defines the error hierarchy for the application using thiserror
//! for ergonomic error definitions. Cryptographic failures never carry payload
//! bytes or key material in their messages; only error kind and non-sensitive
//! context (file name, size) may surface to the caller.

use thiserror::Error;

/// The main error type for Strongbox operations
#[derive(Error, Debug)]
pub enum StrongboxError {
    /// Master key exists but cannot be used right now (recoverable:
    /// re-authenticate and retry)
    #[error("Master key unavailable: {0}")]
    KeyUnavailable(String),

    /// Master key was permanently invalidated (biometric enrollment changed);
    /// all existing ciphertext is unrecoverable
    #[error("Master key invalidated: enrolled biometrics changed")]
    KeyInvalidated,

    /// AEAD authentication tag verification failed (tamper or corruption)
    #[error("Authentication tag mismatch: data is corrupted or tampered")]
    BadTag,

    /// Encrypted file too short to contain nonce and tag
    #[error("Malformed encrypted file: {0}")]
    Malformed(String),

    /// Secure buffer capacity outside the allowed range
    #[error("Invalid buffer capacity: {0} bytes (must be between 1 byte and 10 MiB)")]
    InvalidCapacity(usize),

    /// Secure buffer used after seal() or destroy()
    #[error("Secure buffer is sealed")]
    Sealed,

    /// Authentication temporarily blocked by a lockout window
    #[error("Authentication locked for {remaining_ms} ms")]
    Locked {
        /// Milliseconds until the lockout expires
        remaining_ms: i64,
    },

    /// PIN rejected by the weak-value deny-list at setup
    #[error("PIN is too weak: choose a less predictable value")]
    WeakPin,

    /// PIN fails structural validation (not exactly 4 ASCII digits)
    #[error("Invalid PIN: {0}")]
    InvalidPin(String),

    /// Operation requires a configured PIN but none is set
    #[error("No PIN configured")]
    PinNotConfigured,

    /// Cryptographic operation failed (no sensitive detail included)
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Persisted store errors (preference store, keystore blobs)
    #[error("Storage error: {0}")]
    Storage(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),
}

impl StrongboxError {
    /// Check if this error is recoverable by re-authenticating
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::KeyUnavailable(_) | Self::Locked { .. })
    }

    /// Check if this error must trigger destructive cleanup
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::KeyInvalidated)
    }

    /// Check if this error indicates tampering or corruption
    pub fn is_tamper(&self) -> bool {
        matches!(self, Self::BadTag | Self::Malformed(_))
    }
}

// Implement From traits for common error types

impl From<std::io::Error> for StrongboxError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StrongboxError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Result type alias for Strongbox operations
pub type StrongboxResult<T> = Result<T, StrongboxError>;
