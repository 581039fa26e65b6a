//! Keystore provider abstraction
//!
//! Hides the key facility behind a trait so the crypto core (framing, state
//! machine, wiping) is testable without secure hardware. Key material never
//! crosses the trait boundary: callers receive ready-to-use cipher contexts,
//! never raw key bytes.
//!
//! Two implementations:
//! - [`SoftwareKeystore`]: file-backed provider. Each named key is sealed
//!   on disk under a device-local root key. A hardware-backed provider slots
//!   in behind the same trait unchanged.
//! - [`MemoryKeystore`]: in-memory test double with switches to simulate
//!   key invalidation (biometric re-enrollment) and key absence.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use super::gcm_stream::{StreamDecryptor, StreamEncryptor};
use super::random::{self, SecretKey, KEY_SIZE, NONCE_SIZE};
use crate::error::{StrongboxError, StrongboxResult};

/// Opaque key facility holding named AES-256 keys
///
/// All operations are keyed by alias. `delete_key` is idempotent. Cipher
/// acquisition fails with [`StrongboxError::KeyUnavailable`] when the key is
/// absent or the facility refuses access, and
/// [`StrongboxError::KeyInvalidated`] when the key was permanently destroyed
/// by a biometric enrollment change.
pub trait KeystoreProvider: Send + Sync {
    /// Generate a new AES-256 key under the given alias
    fn generate_key(&self, alias: &str) -> StrongboxResult<()>;

    /// Check whether a key exists under the given alias
    fn contains(&self, alias: &str) -> StrongboxResult<bool>;

    /// Destroy the key under the given alias; succeeds if already absent
    fn delete_key(&self, alias: &str) -> StrongboxResult<()>;

    /// Build a streaming encryption context bound to the aliased key
    fn stream_encryptor(
        &self,
        alias: &str,
        nonce: &[u8; NONCE_SIZE],
    ) -> StrongboxResult<StreamEncryptor>;

    /// Build a streaming decryption context bound to the aliased key
    fn stream_decryptor(
        &self,
        alias: &str,
        nonce: &[u8; NONCE_SIZE],
    ) -> StrongboxResult<StreamDecryptor>;

    /// One-shot AEAD seal (used for small payloads like the preference store)
    fn aead_seal(
        &self,
        alias: &str,
        nonce: &[u8; NONCE_SIZE],
        plaintext: &[u8],
    ) -> StrongboxResult<Vec<u8>>;

    /// One-shot AEAD open; fails with `BadTag` on tamper
    fn aead_open(
        &self,
        alias: &str,
        nonce: &[u8; NONCE_SIZE],
        ciphertext: &[u8],
    ) -> StrongboxResult<Vec<u8>>;
}

/// On-disk envelope for a sealed key blob
#[derive(Serialize, Deserialize)]
struct SealedKeyBlob {
    /// Nonce used to seal the key (base64 encoded)
    nonce: String,
    /// Sealed key bytes with authentication tag (base64 encoded)
    ciphertext: String,
    /// Version for future format upgrades
    version: u8,
}

/// File-backed keystore provider
///
/// Keys are sealed under a root key generated on first use and stored with
/// owner-only permissions. This is the best software approximation of a
/// hardware keystore; the trait seam is the contract.
pub struct SoftwareKeystore {
    dir: PathBuf,
    /// Guards root-key creation and blob writes
    lock: Mutex<()>,
}

impl SoftwareKeystore {
    /// Open (or initialize) a keystore rooted at the given directory
    pub fn open(dir: PathBuf) -> StrongboxResult<Self> {
        fs::create_dir_all(&dir)
            .map_err(|e| StrongboxError::Storage(format!("Failed to create keystore: {}", e)))?;
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    fn root_key_path(&self) -> PathBuf {
        self.dir.join("root.key")
    }

    fn blob_path(&self, alias: &str) -> PathBuf {
        self.dir.join(format!("{}.key.json", alias))
    }

    /// Load the root key, creating it on first use
    fn root_key(&self) -> StrongboxResult<SecretKey> {
        let path = self.root_key_path();
        if path.exists() {
            let bytes = fs::read(&path)
                .map_err(|e| StrongboxError::Storage(format!("Failed to read root key: {}", e)))?;
            if bytes.len() != KEY_SIZE {
                return Err(StrongboxError::Storage("Corrupt root key".into()));
            }
            let mut key = [0u8; KEY_SIZE];
            key.copy_from_slice(&bytes);
            return Ok(SecretKey::from_bytes(key));
        }

        let key = random::key_32();
        fs::write(&path, key.as_bytes())
            .map_err(|e| StrongboxError::Storage(format!("Failed to write root key: {}", e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&path, perms)
                .map_err(|e| StrongboxError::Storage(format!("Failed to chmod root key: {}", e)))?;
        }

        Ok(key)
    }

    /// Load and unseal the key stored under an alias
    fn load_key(&self, alias: &str) -> StrongboxResult<SecretKey> {
        let path = self.blob_path(alias);
        if !path.exists() {
            return Err(StrongboxError::KeyUnavailable(format!(
                "no key under alias '{}'",
                alias
            )));
        }

        let data = fs::read_to_string(&path)
            .map_err(|e| StrongboxError::Storage(format!("Failed to read key blob: {}", e)))?;
        let blob: SealedKeyBlob = serde_json::from_str(&data)
            .map_err(|e| StrongboxError::Storage(format!("Corrupt key blob: {}", e)))?;

        let nonce = STANDARD
            .decode(&blob.nonce)
            .map_err(|e| StrongboxError::Storage(format!("Invalid nonce encoding: {}", e)))?;
        let sealed = STANDARD
            .decode(&blob.ciphertext)
            .map_err(|e| StrongboxError::Storage(format!("Invalid key encoding: {}", e)))?;
        if nonce.len() != NONCE_SIZE {
            return Err(StrongboxError::Storage("Invalid key blob nonce".into()));
        }

        let root = self.root_key()?;
        let cipher = Aes256Gcm::new_from_slice(root.as_bytes())
            .map_err(|e| StrongboxError::Crypto(format!("Failed to create cipher: {}", e)))?;
        let mut unsealed = cipher
            .decrypt(Nonce::from_slice(&nonce), sealed.as_ref())
            .map_err(|_| StrongboxError::BadTag)?;

        if unsealed.len() != KEY_SIZE {
            unsealed.zeroize();
            return Err(StrongboxError::Storage("Sealed key has wrong size".into()));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&unsealed);
        unsealed.zeroize();
        Ok(SecretKey::from_bytes(key))
    }
}

impl KeystoreProvider for SoftwareKeystore {
    fn generate_key(&self, alias: &str) -> StrongboxResult<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| StrongboxError::Storage("Keystore lock poisoned".into()))?;

        let path = self.blob_path(alias);
        if path.exists() {
            return Err(StrongboxError::Storage(format!(
                "Key alias '{}' already exists",
                alias
            )));
        }

        let key = random::key_32();
        let nonce = random::nonce_12();
        let root = self.root_key()?;
        let cipher = Aes256Gcm::new_from_slice(root.as_bytes())
            .map_err(|e| StrongboxError::Crypto(format!("Failed to create cipher: {}", e)))?;
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), key.as_bytes().as_ref())
            .map_err(|e| StrongboxError::Crypto(format!("Failed to seal key: {}", e)))?;

        let blob = SealedKeyBlob {
            nonce: STANDARD.encode(nonce),
            ciphertext: STANDARD.encode(&sealed),
            version: 1,
        };

        // Write to a sibling temp file, then rename into place
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&blob)?;
        fs::write(&tmp, json)
            .map_err(|e| StrongboxError::Storage(format!("Failed to write key blob: {}", e)))?;
        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            StrongboxError::Storage(format!("Failed to commit key blob: {}", e))
        })?;

        Ok(())
    }

    fn contains(&self, alias: &str) -> StrongboxResult<bool> {
        Ok(self.blob_path(alias).exists())
    }

    fn delete_key(&self, alias: &str) -> StrongboxResult<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| StrongboxError::Storage("Keystore lock poisoned".into()))?;
        let path = self.blob_path(alias);
        if path.exists() {
            fs::remove_file(&path)
                .map_err(|e| StrongboxError::Storage(format!("Failed to delete key: {}", e)))?;
        }
        Ok(())
    }

    fn stream_encryptor(
        &self,
        alias: &str,
        nonce: &[u8; NONCE_SIZE],
    ) -> StrongboxResult<StreamEncryptor> {
        let key = self.load_key(alias)?;
        Ok(StreamEncryptor::new(key.as_bytes(), nonce))
    }

    fn stream_decryptor(
        &self,
        alias: &str,
        nonce: &[u8; NONCE_SIZE],
    ) -> StrongboxResult<StreamDecryptor> {
        let key = self.load_key(alias)?;
        Ok(StreamDecryptor::new(key.as_bytes(), nonce))
    }

    fn aead_seal(
        &self,
        alias: &str,
        nonce: &[u8; NONCE_SIZE],
        plaintext: &[u8],
    ) -> StrongboxResult<Vec<u8>> {
        let key = self.load_key(alias)?;
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| StrongboxError::Crypto(format!("Failed to create cipher: {}", e)))?;
        cipher
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|e| StrongboxError::Crypto(format!("Encryption failed: {}", e)))
    }

    fn aead_open(
        &self,
        alias: &str,
        nonce: &[u8; NONCE_SIZE],
        ciphertext: &[u8],
    ) -> StrongboxResult<Vec<u8>> {
        let key = self.load_key(alias)?;
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| StrongboxError::Crypto(format!("Failed to create cipher: {}", e)))?;
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| StrongboxError::BadTag)
    }
}

/// In-memory keystore test double
///
/// Holds keys in a mutex-guarded table and can simulate the two hardware
/// failure modes: key invalidation (biometric re-enrollment destroys the
/// key permanently) and temporary unavailability.
#[derive(Default)]
pub struct MemoryKeystore {
    keys: Mutex<HashMap<String, [u8; KEY_SIZE]>>,
    state: Mutex<MemoryKeystoreState>,
}

#[derive(Default)]
struct MemoryKeystoreState {
    invalidated: bool,
    unavailable: bool,
}

impl MemoryKeystore {
    /// Create an empty in-memory keystore
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a biometric re-enrollment invalidating all keys
    pub fn set_invalidated(&self, invalidated: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.invalidated = invalidated;
        }
    }

    /// Simulate the key facility refusing access (recoverable)
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.unavailable = unavailable;
        }
    }

    fn check_state(&self) -> StrongboxResult<()> {
        let state = self
            .state
            .lock()
            .map_err(|_| StrongboxError::Storage("Keystore lock poisoned".into()))?;
        if state.invalidated {
            return Err(StrongboxError::KeyInvalidated);
        }
        if state.unavailable {
            return Err(StrongboxError::KeyUnavailable("key facility offline".into()));
        }
        Ok(())
    }

    fn load_key(&self, alias: &str) -> StrongboxResult<SecretKey> {
        self.check_state()?;
        let keys = self
            .keys
            .lock()
            .map_err(|_| StrongboxError::Storage("Keystore lock poisoned".into()))?;
        keys.get(alias)
            .map(|k| SecretKey::from_bytes(*k))
            .ok_or_else(|| {
                StrongboxError::KeyUnavailable(format!("no key under alias '{}'", alias))
            })
    }
}

impl KeystoreProvider for MemoryKeystore {
    fn generate_key(&self, alias: &str) -> StrongboxResult<()> {
        self.check_state()?;
        let mut keys = self
            .keys
            .lock()
            .map_err(|_| StrongboxError::Storage("Keystore lock poisoned".into()))?;
        if keys.contains_key(alias) {
            return Err(StrongboxError::Storage(format!(
                "Key alias '{}' already exists",
                alias
            )));
        }
        let key = random::key_32();
        keys.insert(alias.to_string(), *key.as_bytes());
        Ok(())
    }

    fn contains(&self, alias: &str) -> StrongboxResult<bool> {
        let keys = self
            .keys
            .lock()
            .map_err(|_| StrongboxError::Storage("Keystore lock poisoned".into()))?;
        Ok(keys.contains_key(alias))
    }

    fn delete_key(&self, alias: &str) -> StrongboxResult<()> {
        let mut keys = self
            .keys
            .lock()
            .map_err(|_| StrongboxError::Storage("Keystore lock poisoned".into()))?;
        keys.remove(alias).map(|mut k| k.zeroize());
        Ok(())
    }

    fn stream_encryptor(
        &self,
        alias: &str,
        nonce: &[u8; NONCE_SIZE],
    ) -> StrongboxResult<StreamEncryptor> {
        let key = self.load_key(alias)?;
        Ok(StreamEncryptor::new(key.as_bytes(), nonce))
    }

    fn stream_decryptor(
        &self,
        alias: &str,
        nonce: &[u8; NONCE_SIZE],
    ) -> StrongboxResult<StreamDecryptor> {
        let key = self.load_key(alias)?;
        Ok(StreamDecryptor::new(key.as_bytes(), nonce))
    }

    fn aead_seal(
        &self,
        alias: &str,
        nonce: &[u8; NONCE_SIZE],
        plaintext: &[u8],
    ) -> StrongboxResult<Vec<u8>> {
        let key = self.load_key(alias)?;
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| StrongboxError::Crypto(format!("Failed to create cipher: {}", e)))?;
        cipher
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|e| StrongboxError::Crypto(format!("Encryption failed: {}", e)))
    }

    fn aead_open(
        &self,
        alias: &str,
        nonce: &[u8; NONCE_SIZE],
        ciphertext: &[u8],
    ) -> StrongboxResult<Vec<u8>> {
        let key = self.load_key(alias)?;
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| StrongboxError::Crypto(format!("Failed to create cipher: {}", e)))?;
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| StrongboxError::BadTag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_keystore_round_trip() {
        let ks = MemoryKeystore::new();
        ks.generate_key("test").unwrap();
        assert!(ks.contains("test").unwrap());

        let nonce = random::nonce_12();
        let sealed = ks.aead_seal("test", &nonce, b"payload").unwrap();
        let opened = ks.aead_open("test", &nonce, &sealed).unwrap();
        assert_eq!(opened, b"payload");
    }

    #[test]
    fn test_memory_keystore_missing_key_unavailable() {
        let ks = MemoryKeystore::new();
        let nonce = random::nonce_12();
        let err = ks.stream_encryptor("absent", &nonce).unwrap_err();
        assert!(matches!(err, StrongboxError::KeyUnavailable(_)));
    }

    #[test]
    fn test_memory_keystore_invalidation() {
        let ks = MemoryKeystore::new();
        ks.generate_key("test").unwrap();
        ks.set_invalidated(true);

        let nonce = random::nonce_12();
        let err = ks.stream_decryptor("test", &nonce).unwrap_err();
        assert!(matches!(err, StrongboxError::KeyInvalidated));
    }

    #[test]
    fn test_memory_keystore_delete_idempotent() {
        let ks = MemoryKeystore::new();
        ks.generate_key("test").unwrap();
        ks.delete_key("test").unwrap();
        ks.delete_key("test").unwrap();
        assert!(!ks.contains("test").unwrap());
    }

    #[test]
    fn test_duplicate_alias_rejected() {
        let ks = MemoryKeystore::new();
        ks.generate_key("dup").unwrap();
        assert!(ks.generate_key("dup").is_err());
    }

    #[test]
    fn test_software_keystore_round_trip() {
        let tmp = TempDir::new().unwrap();
        let ks = SoftwareKeystore::open(tmp.path().join("keystore")).unwrap();
        ks.generate_key("master").unwrap();
        assert!(ks.contains("master").unwrap());

        let nonce = random::nonce_12();
        let mut data = b"stream me".to_vec();
        let mut enc = ks.stream_encryptor("master", &nonce).unwrap();
        enc.update(&mut data).unwrap();
        let tag = enc.finalize();

        let mut dec = ks.stream_decryptor("master", &nonce).unwrap();
        dec.update(&mut data).unwrap();
        dec.finalize(&tag).unwrap();
        assert_eq!(data, b"stream me");
    }

    #[test]
    fn test_software_keystore_persists_across_opens() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("keystore");
        let nonce = random::nonce_12();

        let sealed = {
            let ks = SoftwareKeystore::open(dir.clone()).unwrap();
            ks.generate_key("master").unwrap();
            ks.aead_seal("master", &nonce, b"persist").unwrap()
        };

        let ks = SoftwareKeystore::open(dir).unwrap();
        let opened = ks.aead_open("master", &nonce, &sealed).unwrap();
        assert_eq!(opened, b"persist");
    }

    #[test]
    fn test_software_keystore_delete_removes_blob() {
        let tmp = TempDir::new().unwrap();
        let ks = SoftwareKeystore::open(tmp.path().join("keystore")).unwrap();
        ks.generate_key("gone").unwrap();
        ks.delete_key("gone").unwrap();
        assert!(!ks.contains("gone").unwrap());

        let nonce = random::nonce_12();
        let err = ks.stream_encryptor("gone", &nonce).unwrap_err();
        assert!(matches!(err, StrongboxError::KeyUnavailable(_)));
    }
}
