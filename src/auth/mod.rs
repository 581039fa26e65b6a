//! Two-factor authentication for Strongbox
//!
//! The caller verifies biometrics with the platform facility; this module
//! owns the PIN factor, failure counters, lockout windows, and the session
//! timeout that together gate master-key access.

pub mod pin;
pub mod state;
pub mod store;

pub use pin::PinHashParams;
pub use state::{AuthStatus, AuthenticationManager};
pub use store::{AuthRecord, AuthStore};
