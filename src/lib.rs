//! Strongbox - at-rest file encryption vault
//!
//! This library provides the core functionality for the Strongbox vault.
//! Files are encrypted with a single AES-256-GCM master key held in a
//! keystore and never exported; access to the key requires two-factor
//! authentication (a biometric-style presence check plus a PIN) and is
//! revoked by session timeouts, lockouts, and an emergency wipe.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Path management for the data directory
//! - `error`: Custom error types
//! - `crypto`: Streaming AES-GCM, keystore providers, master key, secure
//!   memory buffers
//! - `store`: Encrypted key-value preference store
//! - `auth`: PIN hashing, lockouts, and the authentication state machine
//! - `vault`: Composition root tying the above together
//! - `threat`: Environment probes and the destructive response path
//! - `cli`: Command handlers for the `strongbox` binary
//!
//! # Example
//!
//! ```rust,ignore
//! use strongbox::config::StrongboxPaths;
//! use strongbox::vault::Vault;
//!
//! let vault = Vault::open(StrongboxPaths::new()?)?;
//! vault.auth().setup_pin("8352")?;
//! ```

pub mod auth;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod error;
pub mod store;
pub mod threat;
pub mod vault;

pub use error::{StrongboxError, StrongboxResult};
