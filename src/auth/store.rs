//! Persisted authentication record
//!
//! All authentication state lives in the encrypted preference store: PIN hash
//! and salt, failure counters, lockout deadlines, and the last successful
//! authentication timestamp. Every mutation is written through synchronously,
//! so state surveyed immediately after a call always reflects that call's
//! outcome.

use std::sync::Arc;

use crate::error::StrongboxResult;
use crate::store::EncryptedPrefs;

const KEY_PIN_HASH: &str = "pin_hash";
const KEY_PIN_SALT: &str = "pin_salt";
const KEY_PIN_SET: &str = "pin_set";
const KEY_PIN_FAILURES: &str = "pin_failure_count";
const KEY_PIN_LOCKOUT: &str = "pin_lockout_until";
const KEY_LAST_SUCCESS: &str = "last_auth_success";
const KEY_BIO_FAILURES: &str = "biometric_failure_count";
const KEY_BIO_LOCKOUT: &str = "biometric_lockout_until";

/// Snapshot of the persisted authentication state
///
/// Timestamps are epoch milliseconds; zero means "never".
#[derive(Debug, Clone, Default)]
pub struct AuthRecord {
    /// Argon2id PIN hash (base64)
    pub pin_hash: Option<String>,
    /// PIN salt (base64)
    pub pin_salt: Option<String>,
    /// Whether a PIN has been configured
    pub pin_set: bool,
    /// Consecutive failed PIN attempts
    pub pin_failures: i64,
    /// PIN lockout deadline (epoch ms)
    pub pin_lockout_until: i64,
    /// Last successful authentication (epoch ms)
    pub last_success: i64,
    /// Consecutive failed biometric attempts (reported by the caller)
    pub bio_failures: i64,
    /// Biometric lockout deadline (epoch ms)
    pub bio_lockout_until: i64,
}

/// Write-through view over the authentication fields of the preference store
pub struct AuthStore {
    prefs: Arc<EncryptedPrefs>,
}

impl AuthStore {
    /// Create a store over the encrypted preference namespace
    pub fn new(prefs: Arc<EncryptedPrefs>) -> Self {
        Self { prefs }
    }

    /// Load the current record (missing fields default to zero/none)
    pub fn load(&self) -> StrongboxResult<AuthRecord> {
        Ok(AuthRecord {
            pin_hash: self.prefs.get_string(KEY_PIN_HASH)?,
            pin_salt: self.prefs.get_string(KEY_PIN_SALT)?,
            pin_set: self.prefs.get_bool(KEY_PIN_SET)?.unwrap_or(false),
            pin_failures: self.prefs.get_i64(KEY_PIN_FAILURES)?.unwrap_or(0),
            pin_lockout_until: self.prefs.get_i64(KEY_PIN_LOCKOUT)?.unwrap_or(0),
            last_success: self.prefs.get_i64(KEY_LAST_SUCCESS)?.unwrap_or(0),
            bio_failures: self.prefs.get_i64(KEY_BIO_FAILURES)?.unwrap_or(0),
            bio_lockout_until: self.prefs.get_i64(KEY_BIO_LOCKOUT)?.unwrap_or(0),
        })
    }

    /// Persist the whole record in one sealed write
    pub fn save(&self, record: &AuthRecord) -> StrongboxResult<()> {
        self.prefs.update(|values| {
            match &record.pin_hash {
                Some(hash) => {
                    values.insert(KEY_PIN_HASH.into(), serde_json::Value::from(hash.clone()));
                }
                None => {
                    values.remove(KEY_PIN_HASH);
                }
            }
            match &record.pin_salt {
                Some(salt) => {
                    values.insert(KEY_PIN_SALT.into(), serde_json::Value::from(salt.clone()));
                }
                None => {
                    values.remove(KEY_PIN_SALT);
                }
            }
            values.insert(KEY_PIN_SET.into(), serde_json::Value::from(record.pin_set));
            values.insert(
                KEY_PIN_FAILURES.into(),
                serde_json::Value::from(record.pin_failures),
            );
            values.insert(
                KEY_PIN_LOCKOUT.into(),
                serde_json::Value::from(record.pin_lockout_until),
            );
            values.insert(
                KEY_LAST_SUCCESS.into(),
                serde_json::Value::from(record.last_success),
            );
            values.insert(
                KEY_BIO_FAILURES.into(),
                serde_json::Value::from(record.bio_failures),
            );
            values.insert(
                KEY_BIO_LOCKOUT.into(),
                serde_json::Value::from(record.bio_lockout_until),
            );
        })
    }

    /// Remove every authentication field, including the PIN itself
    pub fn reset(&self) -> StrongboxResult<()> {
        self.prefs.update(|values| {
            for key in [
                KEY_PIN_HASH,
                KEY_PIN_SALT,
                KEY_PIN_SET,
                KEY_PIN_FAILURES,
                KEY_PIN_LOCKOUT,
                KEY_LAST_SUCCESS,
                KEY_BIO_FAILURES,
                KEY_BIO_LOCKOUT,
            ] {
                values.remove(key);
            }
        })
    }
}
