//! Cryptographic core for Strongbox
//!
//! Provides the keystore provider seam, master key lifecycle, streaming
//! AES-256-GCM file codec, and encrypted in-memory buffers for decrypted
//! secrets.

pub mod file_codec;
pub mod gcm_stream;
pub mod keystore;
pub mod master_key;
pub mod random;
pub mod secure_buffer;
pub mod secure_manager;

pub use file_codec::{BatchOutcome, BatchResult, FileCodec};
pub use keystore::{KeystoreProvider, MemoryKeystore, SoftwareKeystore};
pub use master_key::MasterKeyStore;
pub use secure_buffer::{secure_wipe, SecureMemoryBuffer};
pub use secure_manager::SecureMemoryManager;
