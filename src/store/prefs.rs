//! Encrypted key-value preference store
//!
//! A small JSON namespace sealed with a dedicated keystore key, distinct from
//! the file master key. Holds the master-key alias and the authentication
//! record. Every mutation is written through to disk before the call returns,
//! using the temp-file-plus-rename pattern so the store is never left half
//! written.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::crypto::keystore::KeystoreProvider;
use crate::crypto::random::{self, NONCE_SIZE};
use crate::error::{StrongboxError, StrongboxResult};

/// Keystore alias of the key sealing the preference store
pub const PREFS_KEY_ALIAS: &str = "strongbox-prefs";

/// On-disk envelope for the sealed preference map
#[derive(Serialize, Deserialize)]
struct SealedPrefs {
    /// The nonce used for this seal (base64 encoded)
    nonce: String,
    /// The sealed JSON map with authentication tag (base64 encoded)
    ciphertext: String,
    /// Version for future format upgrades
    #[serde(default = "default_version")]
    version: u8,
}

fn default_version() -> u8 {
    1
}

/// Encrypted key-value store with synchronous write-through
pub struct EncryptedPrefs {
    path: PathBuf,
    provider: Arc<dyn KeystoreProvider>,
    values: Mutex<HashMap<String, serde_json::Value>>,
}

impl EncryptedPrefs {
    /// Open the preference store, creating its sealing key on first use
    pub fn open(path: PathBuf, provider: Arc<dyn KeystoreProvider>) -> StrongboxResult<Self> {
        if !provider.contains(PREFS_KEY_ALIAS)? {
            provider.generate_key(PREFS_KEY_ALIAS)?;
        }

        let values = if path.exists() {
            let data = fs::read_to_string(&path)
                .map_err(|e| StrongboxError::Storage(format!("Failed to read prefs: {}", e)))?;
            let sealed: SealedPrefs = serde_json::from_str(&data)
                .map_err(|e| StrongboxError::Storage(format!("Corrupt prefs file: {}", e)))?;
            if sealed.version != 1 {
                return Err(StrongboxError::Storage(format!(
                    "Unsupported prefs version: {}",
                    sealed.version
                )));
            }

            let nonce = STANDARD
                .decode(&sealed.nonce)
                .map_err(|e| StrongboxError::Storage(format!("Invalid nonce encoding: {}", e)))?;
            let ciphertext = STANDARD.decode(&sealed.ciphertext).map_err(|e| {
                StrongboxError::Storage(format!("Invalid ciphertext encoding: {}", e))
            })?;
            if nonce.len() != NONCE_SIZE {
                return Err(StrongboxError::Storage("Invalid prefs nonce size".into()));
            }
            let mut nonce_bytes = [0u8; NONCE_SIZE];
            nonce_bytes.copy_from_slice(&nonce);

            let plaintext = provider.aead_open(PREFS_KEY_ALIAS, &nonce_bytes, &ciphertext)?;
            serde_json::from_slice(&plaintext)
                .map_err(|e| StrongboxError::Storage(format!("Corrupt prefs payload: {}", e)))?
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            provider,
            values: Mutex::new(values),
        })
    }

    /// Get a string value
    pub fn get_string(&self, key: &str) -> StrongboxResult<Option<String>> {
        let values = self.lock_values()?;
        Ok(values
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()))
    }

    /// Get an integer value
    pub fn get_i64(&self, key: &str) -> StrongboxResult<Option<i64>> {
        let values = self.lock_values()?;
        Ok(values.get(key).and_then(|v| v.as_i64()))
    }

    /// Get a boolean value
    pub fn get_bool(&self, key: &str) -> StrongboxResult<Option<bool>> {
        let values = self.lock_values()?;
        Ok(values.get(key).and_then(|v| v.as_bool()))
    }

    /// Store a string value, persisting immediately
    pub fn put_string(&self, key: &str, value: &str) -> StrongboxResult<()> {
        let mut values = self.lock_values()?;
        values.insert(key.to_string(), serde_json::Value::from(value));
        self.persist(&values)
    }

    /// Store an integer value, persisting immediately
    pub fn put_i64(&self, key: &str, value: i64) -> StrongboxResult<()> {
        let mut values = self.lock_values()?;
        values.insert(key.to_string(), serde_json::Value::from(value));
        self.persist(&values)
    }

    /// Store a boolean value, persisting immediately
    pub fn put_bool(&self, key: &str, value: bool) -> StrongboxResult<()> {
        let mut values = self.lock_values()?;
        values.insert(key.to_string(), serde_json::Value::from(value));
        self.persist(&values)
    }

    /// Remove a value, persisting immediately
    pub fn remove(&self, key: &str) -> StrongboxResult<()> {
        let mut values = self.lock_values()?;
        values.remove(key);
        self.persist(&values)
    }

    /// Apply several mutations under one lock and persist once
    pub fn update<F>(&self, f: F) -> StrongboxResult<()>
    where
        F: FnOnce(&mut HashMap<String, serde_json::Value>),
    {
        let mut values = self.lock_values()?;
        f(&mut values);
        self.persist(&values)
    }

    /// Drop every stored value and delete the backing file
    pub fn clear(&self) -> StrongboxResult<()> {
        let mut values = self.lock_values()?;
        values.clear();
        if self.path.exists() {
            fs::remove_file(&self.path)
                .map_err(|e| StrongboxError::Storage(format!("Failed to remove prefs: {}", e)))?;
        }
        Ok(())
    }

    fn lock_values(
        &self,
    ) -> StrongboxResult<std::sync::MutexGuard<'_, HashMap<String, serde_json::Value>>> {
        self.values
            .lock()
            .map_err(|_| StrongboxError::Storage("Prefs lock poisoned".into()))
    }

    /// Seal and atomically rewrite the store
    fn persist(&self, values: &HashMap<String, serde_json::Value>) -> StrongboxResult<()> {
        let plaintext = serde_json::to_vec(values)?;
        let nonce = random::nonce_12();
        let ciphertext = self
            .provider
            .aead_seal(PREFS_KEY_ALIAS, &nonce, &plaintext)?;

        let sealed = SealedPrefs {
            nonce: STANDARD.encode(nonce),
            ciphertext: STANDARD.encode(&ciphertext),
            version: 1,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                StrongboxError::Storage(format!("Failed to create prefs directory: {}", e))
            })?;
        }

        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&sealed)?;
        fs::write(&tmp, json)
            .map_err(|e| StrongboxError::Storage(format!("Failed to write prefs: {}", e)))?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            StrongboxError::Storage(format!("Failed to commit prefs: {}", e))
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keystore::MemoryKeystore;
    use tempfile::TempDir;

    fn prefs_with_tmp() -> (EncryptedPrefs, TempDir) {
        let tmp = TempDir::new().unwrap();
        let provider = Arc::new(MemoryKeystore::new());
        let prefs = EncryptedPrefs::open(tmp.path().join("prefs.json"), provider).unwrap();
        (prefs, tmp)
    }

    #[test]
    fn test_put_get_round_trip() {
        let (prefs, _tmp) = prefs_with_tmp();
        prefs.put_string("alias", "abc-123").unwrap();
        prefs.put_i64("count", 7).unwrap();
        prefs.put_bool("flag", true).unwrap();

        assert_eq!(prefs.get_string("alias").unwrap().unwrap(), "abc-123");
        assert_eq!(prefs.get_i64("count").unwrap().unwrap(), 7);
        assert!(prefs.get_bool("flag").unwrap().unwrap());
    }

    #[test]
    fn test_missing_key_is_none() {
        let (prefs, _tmp) = prefs_with_tmp();
        assert!(prefs.get_string("nothing").unwrap().is_none());
    }

    #[test]
    fn test_persists_across_opens() {
        let tmp = TempDir::new().unwrap();
        let provider = Arc::new(MemoryKeystore::new());
        let path = tmp.path().join("prefs.json");

        {
            let prefs = EncryptedPrefs::open(path.clone(), provider.clone()).unwrap();
            prefs.put_string("alias", "persisted").unwrap();
        }

        let prefs = EncryptedPrefs::open(path, provider).unwrap();
        assert_eq!(prefs.get_string("alias").unwrap().unwrap(), "persisted");
    }

    #[test]
    fn test_file_is_not_plaintext() {
        let tmp = TempDir::new().unwrap();
        let provider = Arc::new(MemoryKeystore::new());
        let path = tmp.path().join("prefs.json");
        let prefs = EncryptedPrefs::open(path.clone(), provider).unwrap();
        prefs.put_string("secret_key_name", "super_secret_value").unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("super_secret_value"));
        assert!(!raw.contains("secret_key_name"));
    }

    #[test]
    fn test_remove_and_clear() {
        let tmp = TempDir::new().unwrap();
        let provider = Arc::new(MemoryKeystore::new());
        let path = tmp.path().join("prefs.json");
        let prefs = EncryptedPrefs::open(path.clone(), provider).unwrap();

        prefs.put_string("a", "1").unwrap();
        prefs.remove("a").unwrap();
        assert!(prefs.get_string("a").unwrap().is_none());

        prefs.put_string("b", "2").unwrap();
        prefs.clear().unwrap();
        assert!(prefs.get_string("b").unwrap().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_update_batches_mutations() {
        let (prefs, _tmp) = prefs_with_tmp();
        prefs
            .update(|values| {
                values.insert("x".into(), serde_json::Value::from(1));
                values.insert("y".into(), serde_json::Value::from(2));
            })
            .unwrap();
        assert_eq!(prefs.get_i64("x").unwrap().unwrap(), 1);
        assert_eq!(prefs.get_i64("y").unwrap().unwrap(), 2);
    }
}
