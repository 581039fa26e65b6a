use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use strongbox::cli::{
    handle_decrypt_command, handle_encrypt_command, handle_lock_command, handle_pin_command,
    handle_status_command, handle_unlock_command, handle_wipe_command, PinCommands,
};
use strongbox::config::StrongboxPaths;
use strongbox::vault::Vault;

#[derive(Parser)]
#[command(
    name = "strongbox",
    author = "Kaylee Beyene",
    version,
    about = "At-rest file encryption vault with two-factor unlock",
    long_about = "Strongbox encrypts files with a hardware-style AES-256-GCM master key \
                  that never leaves the keystore. Access requires two factors: a presence \
                  confirmation and a 4-digit PIN, with lockouts after repeated failures \
                  and an emergency wipe that renders all ciphertext permanently unreadable."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show vault status
    Status,

    /// PIN management commands
    #[command(subcommand)]
    Pin(PinCommands),

    /// Unlock the vault (presence confirmation + PIN)
    Unlock,

    /// Lock the vault, closing the session
    Lock,

    /// Encrypt a file into the vault
    Encrypt {
        /// File to encrypt
        file: PathBuf,
    },

    /// Decrypt one or more vault files
    Decrypt {
        /// Encrypted files to decrypt
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Output file (single input) or directory (several inputs)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Destroy all key material, making every encrypted file unreadable
    Wipe {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let paths = StrongboxPaths::new()?;
    let vault = Vault::open(paths)?;

    match cli.command {
        Commands::Status => handle_status_command(&vault)?,
        Commands::Pin(cmd) => handle_pin_command(&vault, cmd)?,
        Commands::Unlock => handle_unlock_command(&vault)?,
        Commands::Lock => handle_lock_command(&vault)?,
        Commands::Encrypt { file } => {
            vault.resume_session()?;
            handle_encrypt_command(&vault, &file)?;
        }
        Commands::Decrypt { files, output } => {
            vault.resume_session()?;
            handle_decrypt_command(&vault, &files, output.as_deref())?;
        }
        Commands::Wipe { yes } => handle_wipe_command(&vault, yes)?,
    }

    Ok(())
}
