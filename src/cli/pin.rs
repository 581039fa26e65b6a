//! PIN management commands

use clap::Subcommand;

use crate::auth::AuthStatus;
use crate::error::{StrongboxError, StrongboxResult};
use crate::vault::Vault;

use super::prompt_pin;

/// PIN management commands
#[derive(Subcommand)]
pub enum PinCommands {
    /// Configure the vault PIN (first-time setup)
    Setup,

    /// Remove the PIN and all authentication state
    Remove,
}

/// Handle PIN commands
pub fn handle_pin_command(vault: &Vault, cmd: PinCommands) -> StrongboxResult<()> {
    match cmd {
        PinCommands::Setup => setup_pin(vault),
        PinCommands::Remove => remove_pin(vault),
    }
}

/// First-time PIN setup
fn setup_pin(vault: &Vault) -> StrongboxResult<()> {
    if vault.auth().status()? != AuthStatus::SetupRequired {
        println!("A PIN is already configured.");
        println!("Use 'strongbox pin remove' first to replace it.");
        return Ok(());
    }

    println!("PIN Setup");
    println!("=========");
    println!();
    println!("Choose a 4-digit PIN. It is the second factor protecting your vault;");
    println!("common values like 1234 or 0000 are rejected.");
    println!();

    loop {
        let pin = prompt_pin("Enter new PIN: ")?;
        let confirm = prompt_pin("Confirm PIN: ")?;
        if pin != confirm {
            println!("PINs do not match. Please try again.");
            continue;
        }

        match vault.auth().setup_pin(&pin) {
            Ok(()) => break,
            Err(StrongboxError::WeakPin) => {
                println!("That PIN is too common. Please choose another.");
            }
            Err(StrongboxError::InvalidPin(_)) => {
                println!("A PIN is exactly 4 digits. Please try again.");
            }
            Err(e) => return Err(e),
        }
    }

    println!();
    println!("PIN configured. Run 'strongbox unlock' to open the vault.");
    Ok(())
}

/// Remove the PIN after verifying it
fn remove_pin(vault: &Vault) -> StrongboxResult<()> {
    if vault.auth().status()? == AuthStatus::SetupRequired {
        println!("No PIN is configured.");
        return Ok(());
    }

    let pin = prompt_pin("Enter current PIN: ")?;
    if !vault.auth().verify_second_factor(&pin)? {
        println!("Incorrect PIN.");
        return Ok(());
    }

    vault.auth().remove_pin()?;
    vault.master().clear_biometric_session();
    println!("PIN removed. The vault requires setup before further use.");
    Ok(())
}
