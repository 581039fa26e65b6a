//! Session commands: status, unlock, lock, wipe

use std::io::{BufRead, Write};

use crate::auth::AuthStatus;
use crate::error::{StrongboxError, StrongboxResult};
use crate::vault::Vault;

use super::prompt_pin;

/// Show the vault's current state
pub fn handle_status_command(vault: &Vault) -> StrongboxResult<()> {
    println!("Strongbox Status");
    println!("================");
    println!("Data directory: {}", vault.paths().base_dir().display());

    match vault.auth().status()? {
        AuthStatus::SetupRequired => {
            println!("State:          setup required (no PIN configured)");
        }
        AuthStatus::Locked { remaining_ms } => {
            let minutes = (remaining_ms + 59_999) / 60_000;
            println!("State:          locked ({} min remaining)", minutes);
        }
        AuthStatus::AuthRequired => {
            println!("State:          locked (authentication required)");
        }
        AuthStatus::Authenticated => {
            println!("State:          unlocked");
        }
    }

    println!(
        "Master key:     {}",
        if vault.master().has_master_key()? {
            "present"
        } else {
            "not yet created"
        }
    );
    println!("Memory buffers: {}", vault.memory().buffer_count());
    Ok(())
}

/// Run the two-factor unlock flow
pub fn handle_unlock_command(vault: &Vault) -> StrongboxResult<()> {
    match vault.auth().status()? {
        AuthStatus::SetupRequired => {
            println!("No PIN configured. Run 'strongbox pin setup' first.");
            return Ok(());
        }
        AuthStatus::Locked { remaining_ms } => {
            return Err(StrongboxError::Locked { remaining_ms });
        }
        _ => {}
    }

    // First factor: presence confirmation standing in for the platform's
    // biometric prompt.
    print!("Confirm it's you (press Enter to continue): ");
    std::io::stdout()
        .flush()
        .map_err(|e| StrongboxError::Io(e.to_string()))?;
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| StrongboxError::Io(e.to_string()))?;
    vault.master().record_biometric_success();

    // Second factor: the PIN
    loop {
        let pin = prompt_pin("Enter PIN: ")?;
        match vault.auth().verify_second_factor(&pin) {
            Ok(true) => break,
            Ok(false) => println!("Incorrect PIN."),
            Err(StrongboxError::InvalidPin(_)) => println!("A PIN is exactly 4 digits."),
            Err(e) => {
                vault.master().clear_biometric_session();
                return Err(e);
            }
        }
    }

    println!("Vault unlocked. The session stays open for 5 minutes.");
    Ok(())
}

/// Close the session without touching stored data
pub fn handle_lock_command(vault: &Vault) -> StrongboxResult<()> {
    vault.auth().logout()?;
    vault.master().clear_biometric_session();
    vault.memory().emergency_destroy_all();
    println!("Vault locked.");
    Ok(())
}

/// Destroy all key material after explicit confirmation
pub fn handle_wipe_command(vault: &Vault, yes: bool) -> StrongboxResult<()> {
    if !yes {
        println!("This destroys the master key, the PIN, every in-memory buffer,");
        println!("and every encrypted file in the vault. Nothing is recoverable.");
        println!();
        print!("Type 'WIPE' to continue: ");
        std::io::stdout()
            .flush()
            .map_err(|e| StrongboxError::Io(e.to_string()))?;

        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| StrongboxError::Io(e.to_string()))?;
        if line.trim() != "WIPE" {
            println!("Aborted.");
            return Ok(());
        }
    }

    vault.emergency_wipe();
    println!("Wipe complete.");
    Ok(())
}
