//! Master key lifecycle
//!
//! Owns the single hardware-backed AES-256 key that protects all vault files.
//! The key's alias is a UUID minted lazily on first use and persisted in the
//! encrypted preference store, so a fresh install never collides with a
//! previous install's key. Cipher acquisition is gated by a biometric
//! authentication window: a recorded biometric success is valid for 300
//! seconds, after which the key is unavailable until re-authentication.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use uuid::Uuid;

use super::gcm_stream::{StreamDecryptor, StreamEncryptor};
use super::keystore::KeystoreProvider;
use super::random::{self, NONCE_SIZE};
use crate::error::{StrongboxError, StrongboxResult};
use crate::store::EncryptedPrefs;

/// Preference key holding the master key's keystore alias
const MASTER_ALIAS_PREF: &str = "master_key_alias";

/// How long a biometric authentication event unlocks the key
pub const AUTH_VALIDITY: Duration = Duration::from_secs(300);

/// Gatekeeper for the vault's master key
pub struct MasterKeyStore {
    provider: Arc<dyn KeystoreProvider>,
    prefs: Arc<EncryptedPrefs>,
    /// Guards lazy key creation (double-checked against the prefs entry)
    init_lock: Mutex<()>,
    last_biometric: Mutex<Option<Instant>>,
    auth_validity: Duration,
}

impl MasterKeyStore {
    /// Create a master key store over a keystore provider and preference store
    pub fn new(provider: Arc<dyn KeystoreProvider>, prefs: Arc<EncryptedPrefs>) -> Self {
        Self {
            provider,
            prefs,
            init_lock: Mutex::new(()),
            last_biometric: Mutex::new(None),
            auth_validity: AUTH_VALIDITY,
        }
    }

    /// Override the biometric validity window (used by tests)
    pub fn with_auth_validity(mut self, validity: Duration) -> Self {
        self.auth_validity = validity;
        self
    }

    /// Record a successful biometric authentication, opening the validity window
    pub fn record_biometric_success(&self) {
        if let Ok(mut last) = self.last_biometric.lock() {
            *last = Some(Instant::now());
        }
    }

    /// Close the biometric window immediately (logout, emergency wipe)
    pub fn clear_biometric_session(&self) {
        if let Ok(mut last) = self.last_biometric.lock() {
            *last = None;
        }
    }

    /// Check whether a biometric success is still within the validity window
    pub fn is_unlocked(&self) -> bool {
        self.last_biometric
            .lock()
            .ok()
            .and_then(|last| *last)
            .map(|at| at.elapsed() <= self.auth_validity)
            .unwrap_or(false)
    }

    fn require_unlocked(&self) -> StrongboxResult<()> {
        if self.is_unlocked() {
            Ok(())
        } else {
            Err(StrongboxError::KeyUnavailable(
                "biometric authentication required".into(),
            ))
        }
    }

    /// Get the persisted alias, creating the key on first use
    ///
    /// Creation is guarded by a double-checked lock so concurrent callers
    /// cannot race two key generations.
    fn ensure_alias(&self) -> StrongboxResult<String> {
        if let Some(alias) = self.prefs.get_string(MASTER_ALIAS_PREF)? {
            return Ok(alias);
        }

        let _guard = self
            .init_lock
            .lock()
            .map_err(|_| StrongboxError::Storage("Master key init lock poisoned".into()))?;

        // Re-check under the lock
        if let Some(alias) = self.prefs.get_string(MASTER_ALIAS_PREF)? {
            return Ok(alias);
        }

        let alias = format!("strongbox-master-{}", Uuid::new_v4());
        self.provider.generate_key(&alias)?;
        self.prefs.put_string(MASTER_ALIAS_PREF, &alias)?;
        Ok(alias)
    }

    /// Get a ready-to-use encryption context and the fresh nonce bound to it
    ///
    /// The caller must prepend the returned nonce to the output stream.
    ///
    /// # Errors
    ///
    /// [`StrongboxError::KeyUnavailable`] if no biometric authentication
    /// occurred within the validity window.
    pub fn encryption_cipher(&self) -> StrongboxResult<(StreamEncryptor, [u8; NONCE_SIZE])> {
        self.require_unlocked()?;
        let alias = self.ensure_alias()?;
        let nonce = random::nonce_12();
        let encryptor = self.provider.stream_encryptor(&alias, &nonce)?;
        Ok((encryptor, nonce))
    }

    /// Get a decryption context for a file's stored nonce
    ///
    /// # Errors
    ///
    /// [`StrongboxError::KeyInvalidated`] if enrolled biometrics changed (the
    /// caller must run destructive cleanup); [`StrongboxError::KeyUnavailable`]
    /// if re-authentication would recover access.
    pub fn decryption_cipher(&self, nonce: &[u8; NONCE_SIZE]) -> StrongboxResult<StreamDecryptor> {
        self.require_unlocked()?;
        let alias = self
            .prefs
            .get_string(MASTER_ALIAS_PREF)?
            .ok_or_else(|| StrongboxError::KeyUnavailable("no master key exists".into()))?;
        self.provider.stream_decryptor(&alias, nonce)
    }

    /// Irreversibly destroy the master key and forget its alias
    ///
    /// Idempotent: succeeds when no key exists.
    pub fn delete_master_key(&self) -> StrongboxResult<()> {
        let _guard = self
            .init_lock
            .lock()
            .map_err(|_| StrongboxError::Storage("Master key init lock poisoned".into()))?;

        if let Some(alias) = self.prefs.get_string(MASTER_ALIAS_PREF)? {
            self.provider.delete_key(&alias)?;
            self.prefs.remove(MASTER_ALIAS_PREF)?;
        }
        Ok(())
    }

    /// Whether a master key currently exists
    pub fn has_master_key(&self) -> StrongboxResult<bool> {
        match self.prefs.get_string(MASTER_ALIAS_PREF)? {
            Some(alias) => self.provider.contains(&alias),
            None => Ok(false),
        }
    }
}
