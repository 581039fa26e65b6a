//! Process-wide registry of secure memory buffers
//!
//! Tracks named buffers behind a single mutex, enforces the concurrency and
//! footprint caps, and exposes the emergency-destroy path used by the threat
//! responder. Buffer counts are low, so one global lock is sufficient.

use std::collections::HashMap;
use std::sync::Mutex;

use super::secure_buffer::SecureMemoryBuffer;
use crate::error::{StrongboxError, StrongboxResult};

/// Maximum number of live buffers
pub const MAX_BUFFERS: usize = 10;

/// Maximum aggregate capacity across all buffers (50 MiB)
pub const MAX_TOTAL_CAPACITY: usize = 50 * 1024 * 1024;

/// Mutex-guarded table of named secure buffers
#[derive(Default)]
pub struct SecureMemoryManager {
    buffers: Mutex<HashMap<String, SecureMemoryBuffer>>,
}

impl SecureMemoryManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a buffer under a unique name
    ///
    /// # Errors
    ///
    /// [`StrongboxError::InvalidCapacity`] if the capacity is out of range or
    /// would breach a cap; [`StrongboxError::Storage`] on a duplicate name.
    pub fn create_buffer(&self, name: &str, capacity: usize) -> StrongboxResult<()> {
        let mut buffers = self.lock()?;

        if buffers.contains_key(name) {
            return Err(StrongboxError::Storage(format!(
                "Buffer '{}' already exists",
                name
            )));
        }
        if buffers.len() >= MAX_BUFFERS {
            return Err(StrongboxError::InvalidCapacity(capacity));
        }
        let total: usize = buffers.values().map(|b| b.capacity()).sum();
        if total + capacity > MAX_TOTAL_CAPACITY {
            return Err(StrongboxError::InvalidCapacity(capacity));
        }

        let buffer = SecureMemoryBuffer::create(capacity)?;
        buffers.insert(name.to_string(), buffer);
        Ok(())
    }

    /// Capture a secret into a named buffer (the source array is wiped)
    pub fn write(&self, name: &str, plaintext: &mut [u8]) -> StrongboxResult<()> {
        let mut buffers = self.lock()?;
        let buffer = buffers
            .get_mut(name)
            .ok_or_else(|| StrongboxError::Storage(format!("No buffer named '{}'", name)))?;
        buffer.write(plaintext)
    }

    /// Run a closure over a named buffer's decrypted payload
    pub fn with_scoped_access<R>(
        &self,
        name: &str,
        f: impl FnOnce(&[u8]) -> R,
    ) -> StrongboxResult<R> {
        let buffers = self.lock()?;
        let buffer = buffers
            .get(name)
            .ok_or_else(|| StrongboxError::Storage(format!("No buffer named '{}'", name)))?;
        buffer.with_scoped_access(f)
    }

    /// Destroy and unregister a named buffer; succeeds if already absent
    pub fn destroy_buffer(&self, name: &str) -> StrongboxResult<()> {
        let mut buffers = self.lock()?;
        if let Some(mut buffer) = buffers.remove(name) {
            buffer.destroy();
        }
        Ok(())
    }

    /// Number of live buffers
    pub fn buffer_count(&self) -> usize {
        self.lock().map(|b| b.len()).unwrap_or(0)
    }

    /// Aggregate capacity of live buffers in bytes
    pub fn total_capacity(&self) -> usize {
        self.lock()
            .map(|b| b.values().map(|buf| buf.capacity()).sum())
            .unwrap_or(0)
    }

    /// Destroy every buffer unconditionally
    ///
    /// Best effort: never fails, proceeds even through a poisoned lock, and
    /// keeps going past any individual buffer.
    pub fn emergency_destroy_all(&self) {
        let mut buffers = match self.buffers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (_, buffer) in buffers.iter_mut() {
            buffer.destroy();
        }
        buffers.clear();
    }

    fn lock(
        &self,
    ) -> StrongboxResult<std::sync::MutexGuard<'_, HashMap<String, SecureMemoryBuffer>>> {
        self.buffers
            .lock()
            .map_err(|_| StrongboxError::Storage("Buffer table lock poisoned".into()))
    }
}
