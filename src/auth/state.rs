//! Authentication state machine
//!
//! Tracks the PIN/session half of two-factor authentication: the caller
//! verifies biometrics first and reports failures here; this machine owns the
//! PIN, failure counters, lockout windows, and the session timeout.
//!
//! States: `SetupRequired` → `Authenticated` (PIN setup + immediate
//! second-factor verify), `Authenticated` → `AuthRequired` (session timeout
//! or forced re-auth on launch), `AuthRequired` → `Authenticated` (PIN
//! verify), any → `Locked` (failure thresholds), `Locked` → `AuthRequired`
//! (both windows elapsed).

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;

use super::pin::{self, PinHashParams};
use super::store::{AuthRecord, AuthStore};
use crate::crypto::random;
use crate::error::{StrongboxError, StrongboxResult};
use crate::store::EncryptedPrefs;

/// How long a successful authentication remains valid
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(300);

/// Failed PIN attempts before lockout
pub const MAX_PIN_FAILURES: i64 = 3;

/// Failed biometric attempts before lockout
pub const MAX_BIO_FAILURES: i64 = 5;

/// PIN lockout window (1 hour)
pub const PIN_LOCKOUT: Duration = Duration::from_secs(3600);

/// Biometric lockout window (30 minutes)
pub const BIO_LOCKOUT: Duration = Duration::from_secs(1800);

/// Where the caller stands with authentication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    /// No PIN configured yet; run first-time setup
    SetupRequired,
    /// Too many failures; wait out the lockout
    Locked {
        /// Milliseconds until the later of the two lockout windows expires
        remaining_ms: i64,
    },
    /// Credentials needed before key access
    AuthRequired,
    /// Session is live; key operations may proceed
    Authenticated,
}

/// Owns PIN verification, lockouts, and the session window
pub struct AuthenticationManager {
    store: AuthStore,
    params: PinHashParams,
    session_timeout: Duration,
    pin_lockout: Duration,
    bio_lockout: Duration,
}

impl AuthenticationManager {
    /// Create a manager over the encrypted preference store
    pub fn new(prefs: Arc<EncryptedPrefs>) -> Self {
        Self {
            store: AuthStore::new(prefs),
            params: PinHashParams::default(),
            session_timeout: SESSION_TIMEOUT,
            pin_lockout: PIN_LOCKOUT,
            bio_lockout: BIO_LOCKOUT,
        }
    }

    /// Override the Argon2id cost parameters (tests use reduced costs)
    pub fn with_params(mut self, params: PinHashParams) -> Self {
        self.params = params;
        self
    }

    /// Override the session timeout (used by tests)
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Override the lockout windows (used by tests)
    pub fn with_lockouts(mut self, pin_lockout: Duration, bio_lockout: Duration) -> Self {
        self.pin_lockout = pin_lockout;
        self.bio_lockout = bio_lockout;
        self
    }

    /// Access to the persisted record (tests rewind timestamps through this)
    pub fn store(&self) -> &AuthStore {
        &self.store
    }

    /// Current authentication status
    pub fn status(&self) -> StrongboxResult<AuthStatus> {
        let record = self.store.load()?;
        Ok(self.status_of(&record))
    }

    /// Whether the caller must present credentials before key access
    pub fn is_authentication_required(&self) -> StrongboxResult<bool> {
        Ok(self.status()? != AuthStatus::Authenticated)
    }

    /// Configure a PIN for the first time (or replace after `remove_pin`)
    ///
    /// The weak-value deny-list applies here and only here. The session is
    /// not opened by setup; the caller verifies the PIN immediately after.
    ///
    /// # Errors
    ///
    /// [`StrongboxError::InvalidPin`] on bad format,
    /// [`StrongboxError::WeakPin`] for deny-listed values.
    pub fn setup_pin(&self, pin: &str) -> StrongboxResult<()> {
        pin::validate_pin_format(pin)?;
        if pin::is_weak_pin(pin) {
            return Err(StrongboxError::WeakPin);
        }

        let salt = random::salt_16();
        let hash = pin::hash_pin(pin, &salt, &self.params)?;

        let record = AuthRecord {
            pin_hash: Some(STANDARD.encode(hash)),
            pin_salt: Some(STANDARD.encode(salt)),
            pin_set: true,
            ..Default::default()
        };
        self.store.save(&record)
    }

    /// Verify the PIN as the second authentication factor
    ///
    /// Success resets both failure counters and opens a fresh session.
    /// The third consecutive failure locks PIN authentication for an hour.
    ///
    /// # Errors
    ///
    /// [`StrongboxError::Locked`] while a lockout window is active (the hash
    /// is not recomputed in that case), [`StrongboxError::PinNotConfigured`]
    /// if no PIN exists.
    pub fn verify_second_factor(&self, pin: &str) -> StrongboxResult<bool> {
        pin::validate_pin_format(pin)?;

        let mut record = self.store.load()?;
        let now = now_ms();

        if let Some(remaining_ms) = lockout_remaining(&record, now) {
            return Err(StrongboxError::Locked { remaining_ms });
        }
        if !record.pin_set {
            return Err(StrongboxError::PinNotConfigured);
        }

        let hash_b64 = record
            .pin_hash
            .clone()
            .ok_or(StrongboxError::PinNotConfigured)?;
        let salt_b64 = record
            .pin_salt
            .clone()
            .ok_or(StrongboxError::PinNotConfigured)?;
        let expected = STANDARD
            .decode(hash_b64)
            .map_err(|e| StrongboxError::Storage(format!("Corrupt PIN hash: {}", e)))?;
        let salt = STANDARD
            .decode(salt_b64)
            .map_err(|e| StrongboxError::Storage(format!("Corrupt PIN salt: {}", e)))?;

        if pin::verify_pin(pin, &salt, &self.params, &expected)? {
            record.pin_failures = 0;
            record.bio_failures = 0;
            record.pin_lockout_until = 0;
            record.bio_lockout_until = 0;
            record.last_success = now;
            self.store.save(&record)?;
            Ok(true)
        } else {
            record.pin_failures += 1;
            if record.pin_failures >= MAX_PIN_FAILURES {
                record.pin_lockout_until = now + self.pin_lockout.as_millis() as i64;
            }
            self.store.save(&record)?;
            Ok(false)
        }
    }

    /// Record a biometric failure observed by the caller
    ///
    /// The fifth consecutive failure locks authentication for 30 minutes.
    pub fn record_failed_attempt(&self) -> StrongboxResult<()> {
        let mut record = self.store.load()?;
        record.bio_failures += 1;
        if record.bio_failures >= MAX_BIO_FAILURES {
            record.bio_lockout_until = now_ms() + self.bio_lockout.as_millis() as i64;
        }
        self.store.save(&record)
    }

    /// Invalidate the current session, requiring fresh credentials
    ///
    /// Applied on every app launch/foreground regardless of the timeout.
    pub fn force_reauthentication(&self) -> StrongboxResult<()> {
        let mut record = self.store.load()?;
        record.last_success = 0;
        self.store.save(&record)
    }

    /// Clear session and failure state, preserving the configured PIN
    pub fn logout(&self) -> StrongboxResult<()> {
        let mut record = self.store.load()?;
        record.pin_failures = 0;
        record.bio_failures = 0;
        record.pin_lockout_until = 0;
        record.bio_lockout_until = 0;
        record.last_success = 0;
        self.store.save(&record)
    }

    /// Reset path: additionally removes the PIN itself
    pub fn remove_pin(&self) -> StrongboxResult<()> {
        self.store.reset()
    }

    fn status_of(&self, record: &AuthRecord) -> AuthStatus {
        if !record.pin_set {
            return AuthStatus::SetupRequired;
        }
        let now = now_ms();
        if let Some(remaining_ms) = lockout_remaining(record, now) {
            return AuthStatus::Locked { remaining_ms };
        }
        if record.last_success > 0
            && now - record.last_success <= self.session_timeout.as_millis() as i64
        {
            AuthStatus::Authenticated
        } else {
            AuthStatus::AuthRequired
        }
    }
}

/// Milliseconds until the later of the two lockout windows expires
fn lockout_remaining(record: &AuthRecord, now: i64) -> Option<i64> {
    let until = record.pin_lockout_until.max(record.bio_lockout_until);
    if until > now {
        Some(until - now)
    } else {
        None
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
