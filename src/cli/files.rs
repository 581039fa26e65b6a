//! File encryption and decryption commands

use std::path::{Path, PathBuf};

use crate::crypto::BatchOutcome;
use crate::error::{StrongboxError, StrongboxResult};
use crate::vault::Vault;

/// Encrypt a file into the vault
pub fn handle_encrypt_command(vault: &Vault, file: &Path) -> StrongboxResult<()> {
    let blob = vault.encrypt_file(file)?;
    println!("Encrypted '{}' -> '{}'", file.display(), blob.display());
    Ok(())
}

/// Decrypt one or more vault blobs
///
/// A single file decrypts to `output` (or the blob's name in the current
/// directory). Several files decrypt concurrently into the `output`
/// directory.
pub fn handle_decrypt_command(
    vault: &Vault,
    files: &[PathBuf],
    output: Option<&Path>,
) -> StrongboxResult<()> {
    match files {
        [] => {
            println!("Nothing to decrypt.");
            Ok(())
        }
        [file] => decrypt_single(vault, file, output),
        many => decrypt_many(vault, many, output),
    }
}

fn decrypt_single(vault: &Vault, source: &Path, output: Option<&Path>) -> StrongboxResult<()> {
    let dest = match output {
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(
            source
                .file_name()
                .ok_or_else(|| StrongboxError::Malformed("Source has no filename".into()))?,
        ),
    };

    let bytes = vault.decrypt_file(source, &dest)?;
    println!(
        "Decrypted '{}' -> '{}' ({} bytes)",
        source.display(),
        dest.display(),
        bytes
    );
    Ok(())
}

fn decrypt_many(vault: &Vault, sources: &[PathBuf], output: Option<&Path>) -> StrongboxResult<()> {
    let out_dir = output.map(Path::to_path_buf).unwrap_or_else(|| ".".into());

    let mut jobs = Vec::with_capacity(sources.len());
    for source in sources {
        let name = source
            .file_name()
            .ok_or_else(|| StrongboxError::Malformed("Source has no filename".into()))?;
        jobs.push((source.clone(), out_dir.join(name)));
    }

    let results = vault.decrypt_batch(&jobs)?;
    let mut failures = 0usize;
    for result in &results {
        match &result.outcome {
            BatchOutcome::Decrypted { bytes } => {
                println!("  ok      {} ({} bytes)", result.source.display(), bytes);
            }
            BatchOutcome::Failed(err) => {
                failures += 1;
                println!("  failed  {}: {}", result.source.display(), err);
            }
            BatchOutcome::TimedOut => {
                failures += 1;
                println!("  timeout {}", result.source.display());
            }
        }
    }

    println!(
        "{} of {} files decrypted",
        results.len() - failures,
        results.len()
    );
    Ok(())
}
