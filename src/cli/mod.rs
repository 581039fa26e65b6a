//! CLI command handlers
//!
//! Bridges clap argument parsing with the vault layer. Each submodule owns
//! one command family.

pub mod files;
pub mod pin;
pub mod session;

pub use files::{handle_decrypt_command, handle_encrypt_command};
pub use pin::{handle_pin_command, PinCommands};
pub use session::{
    handle_lock_command, handle_status_command, handle_unlock_command, handle_wipe_command,
};

use crate::error::{StrongboxError, StrongboxResult};

/// Prompt for a PIN with hidden input
fn prompt_pin(prompt: &str) -> StrongboxResult<String> {
    rpassword::prompt_password(prompt)
        .map_err(|e| StrongboxError::Io(format!("Failed to read PIN: {}", e)))
}
