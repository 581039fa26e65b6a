//! Persisted stores for Strongbox

pub mod prefs;

pub use prefs::EncryptedPrefs;
