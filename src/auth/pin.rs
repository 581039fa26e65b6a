//! PIN validation and hashing
//!
//! PINs are exactly 4 ASCII digits, screened against a small deny-list of
//! weak values at setup time only, and hashed with Argon2id (memory-hard,
//! resistant to GPU/ASIC attacks). Verification recomputes the hash with the
//! stored salt and compares in constant time.

use argon2::{Algorithm, Argon2, Params, Version};
use subtle::ConstantTimeEq;

use crate::error::{StrongboxError, StrongboxResult};

/// Required PIN length
pub const PIN_LENGTH: usize = 4;

/// Argon2id output length (bytes)
pub const PIN_HASH_LENGTH: usize = 32;

/// Weak values rejected at setup; verification never re-applies this check
const WEAK_PINS: [&str; 7] = ["1234", "0000", "1111", "9876", "2580", "1122", "1379"];

/// Argon2id cost parameters for PIN hashing
#[derive(Debug, Clone)]
pub struct PinHashParams {
    /// Memory cost in KiB (default: 131072 = 128 MiB)
    pub memory_cost: u32,
    /// Time cost (iterations, default: 4)
    pub time_cost: u32,
    /// Parallelism degree (default: 2)
    pub parallelism: u32,
}

impl Default for PinHashParams {
    fn default() -> Self {
        Self {
            memory_cost: 131_072, // 128 MiB
            time_cost: 4,
            parallelism: 2,
        }
    }
}

impl PinHashParams {
    /// Create params with specific values (tests use reduced costs)
    pub fn with_values(memory_cost: u32, time_cost: u32, parallelism: u32) -> Self {
        Self {
            memory_cost,
            time_cost,
            parallelism,
        }
    }
}

/// Check that a PIN is exactly 4 ASCII digits
pub fn validate_pin_format(pin: &str) -> StrongboxResult<()> {
    if pin.len() != PIN_LENGTH || !pin.bytes().all(|b| b.is_ascii_digit()) {
        return Err(StrongboxError::InvalidPin(format!(
            "expected exactly {} digits",
            PIN_LENGTH
        )));
    }
    Ok(())
}

/// Check a candidate PIN against the weak-value deny-list
pub fn is_weak_pin(pin: &str) -> bool {
    WEAK_PINS.contains(&pin)
}

/// Hash a PIN with Argon2id under the given salt and cost parameters
pub fn hash_pin(
    pin: &str,
    salt: &[u8],
    params: &PinHashParams,
) -> StrongboxResult<[u8; PIN_HASH_LENGTH]> {
    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(PIN_HASH_LENGTH),
    )
    .map_err(|e| StrongboxError::Crypto(format!("Invalid Argon2 parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut hash = [0u8; PIN_HASH_LENGTH];
    argon2
        .hash_password_into(pin.as_bytes(), salt, &mut hash)
        .map_err(|e| StrongboxError::Crypto(format!("PIN hashing failed: {}", e)))?;
    Ok(hash)
}

/// Recompute the hash for a candidate PIN and compare in constant time
pub fn verify_pin(
    pin: &str,
    salt: &[u8],
    params: &PinHashParams,
    expected: &[u8],
) -> StrongboxResult<bool> {
    let hash = hash_pin(pin, salt, params)?;
    Ok(hash.ct_eq(expected).into())
}
