//! Vault composition root
//!
//! Wires the keystore provider, encrypted preference store, master key,
//! authentication manager, file codec, and secure memory manager into one
//! object and enforces the authentication gate in front of every key
//! operation. A `KeyInvalidated` result anywhere below this layer triggers
//! the emergency wipe before the error reaches the caller.

pub mod filename;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use zeroize::Zeroize;

use crate::auth::{AuthStatus, AuthenticationManager, PinHashParams};
use crate::config::StrongboxPaths;
use crate::crypto::keystore::SoftwareKeystore;
use crate::crypto::{
    BatchOutcome, BatchResult, FileCodec, KeystoreProvider, MasterKeyStore, SecureMemoryManager,
};
use crate::error::{StrongboxError, StrongboxResult};
use crate::store::EncryptedPrefs;

pub use filename::sanitize_file_name;

/// Everything a session needs, behind one authentication gate
pub struct Vault {
    paths: StrongboxPaths,
    master: Arc<MasterKeyStore>,
    codec: FileCodec,
    auth: AuthenticationManager,
    memory: SecureMemoryManager,
}

impl Vault {
    /// Open a vault backed by the on-disk software keystore
    pub fn open(paths: StrongboxPaths) -> StrongboxResult<Self> {
        paths.ensure_directories()?;
        let provider = Arc::new(SoftwareKeystore::open(paths.keystore_dir())?);
        Self::with_provider(paths, provider)
    }

    /// Open a vault over a specific keystore provider
    pub fn with_provider(
        paths: StrongboxPaths,
        provider: Arc<dyn KeystoreProvider>,
    ) -> StrongboxResult<Self> {
        paths.ensure_directories()?;
        let prefs = Arc::new(EncryptedPrefs::open(paths.prefs_file(), provider.clone())?);
        let master = Arc::new(MasterKeyStore::new(provider, prefs.clone()));
        Ok(Self {
            paths,
            codec: FileCodec::new(master.clone()),
            master,
            auth: AuthenticationManager::new(prefs),
            memory: SecureMemoryManager::new(),
        })
    }

    /// Override the PIN hashing costs (tests use reduced values)
    pub fn with_pin_params(mut self, params: PinHashParams) -> Self {
        self.auth = self.auth.with_params(params);
        self
    }

    /// Authentication state machine (PIN setup, verification, lockouts)
    pub fn auth(&self) -> &AuthenticationManager {
        &self.auth
    }

    /// Master key gatekeeper (biometric window, key lifecycle)
    pub fn master(&self) -> &MasterKeyStore {
        &self.master
    }

    /// In-memory encrypted buffer registry
    pub fn memory(&self) -> &SecureMemoryManager {
        &self.memory
    }

    /// Filesystem layout in use
    pub fn paths(&self) -> &StrongboxPaths {
        &self.paths
    }

    /// Require a live authenticated session before any key operation
    fn require_session(&self) -> StrongboxResult<()> {
        match self.auth.status()? {
            AuthStatus::Authenticated => Ok(()),
            AuthStatus::Locked { remaining_ms } => Err(StrongboxError::Locked { remaining_ms }),
            AuthStatus::SetupRequired => Err(StrongboxError::PinNotConfigured),
            AuthStatus::AuthRequired => Err(StrongboxError::KeyUnavailable(
                "authentication required".into(),
            )),
        }
    }

    /// Re-open the biometric window for a process holding a live session
    ///
    /// The biometric window lives in process memory and does not survive a
    /// restart; the persisted session record does. A caller that still holds
    /// a live session may resume key access without a fresh biometric prompt.
    pub fn resume_session(&self) -> StrongboxResult<()> {
        self.require_session()?;
        self.master.record_biometric_success();
        Ok(())
    }

    /// Run the emergency wipe when a key invalidation surfaces
    fn guard_fatal(&self, err: StrongboxError) -> StrongboxError {
        if err.is_fatal() {
            self.emergency_wipe();
        }
        err
    }

    /// Encrypt a file into the vault's storage directory
    ///
    /// The blob's filesystem name is the sanitized original filename; a
    /// numeric suffix is appended when that name is already taken. Returns
    /// the path of the ciphertext blob.
    pub fn encrypt_file(&self, source: &Path) -> StrongboxResult<PathBuf> {
        self.require_session()?;

        let original = source
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let name = sanitize_file_name(original);
        let dest = unused_path(&self.paths.files_dir(), &name);

        self.codec
            .encrypt_file(source, &dest)
            .map_err(|e| self.guard_fatal(e))?;
        Ok(dest)
    }

    /// Encrypt a file to an explicit destination path
    pub fn encrypt_file_to(&self, source: &Path, dest: &Path) -> StrongboxResult<u64> {
        self.require_session()?;
        self.codec
            .encrypt_file(source, dest)
            .map_err(|e| self.guard_fatal(e))
    }

    /// Decrypt a vault blob to a plaintext file
    pub fn decrypt_file(&self, source: &Path, dest: &Path) -> StrongboxResult<u64> {
        self.require_session()?;
        self.codec
            .decrypt_file(source, dest)
            .map_err(|e| self.guard_fatal(e))
    }

    /// Decrypt a vault blob into a named secure memory buffer
    ///
    /// The plaintext never touches disk: it is staged in memory, re-encrypted
    /// under an ephemeral key inside the buffer, and wiped from the staging
    /// area.
    pub fn decrypt_to_memory(&self, source: &Path, buffer_name: &str) -> StrongboxResult<()> {
        self.require_session()?;

        let mut plaintext = self
            .codec
            .decrypt_to_vec(source)
            .map_err(|e| self.guard_fatal(e))?;

        let capacity = plaintext.len().max(1);
        if let Err(e) = self.memory.create_buffer(buffer_name, capacity) {
            plaintext.zeroize();
            return Err(e);
        }
        // write() wipes the staging bytes after sealing them into the buffer
        if let Err(e) = self.memory.write(buffer_name, &mut plaintext) {
            plaintext.zeroize();
            let _ = self.memory.destroy_buffer(buffer_name);
            return Err(e);
        }
        Ok(())
    }

    /// Decrypt several vault blobs concurrently
    ///
    /// Per-file failures are reported in the results; a key invalidation in
    /// any job still triggers the emergency wipe.
    pub fn decrypt_batch(&self, jobs: &[(PathBuf, PathBuf)]) -> StrongboxResult<Vec<BatchResult>> {
        self.require_session()?;

        let results = self.codec.decrypt_batch(jobs);
        let invalidated = results
            .iter()
            .any(|r| matches!(&r.outcome, BatchOutcome::Failed(e) if e.is_fatal()));
        if invalidated {
            self.emergency_wipe();
        }
        Ok(results)
    }

    /// Destroy all key material, authentication state, and vault blobs
    ///
    /// Best-effort and infallible: every step runs even if an earlier one
    /// fails. With the master key gone the ciphertext is unreadable anyway;
    /// the blobs are purged as well so nothing references the dead key.
    pub fn emergency_wipe(&self) {
        self.memory.emergency_destroy_all();
        self.master.clear_biometric_session();
        let _ = self.master.delete_master_key();
        let _ = self.auth.remove_pin();
        purge_dir(&self.paths.files_dir());
    }
}

/// Best-effort removal of every regular file in a directory
fn purge_dir(dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let _ = std::fs::remove_file(entry.path());
    }
}

/// First free path for `name` under `dir`, suffixing `_2`, `_3`, ... as needed
fn unused_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 => (&name[..dot], &name[dot..]),
        _ => (name, ""),
    };
    for n in 2.. {
        let candidate = dir.join(format!("{}_{}{}", stem, n, ext));
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!()
}
