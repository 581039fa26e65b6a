//! Path management for Strongbox
//!
//! Provides XDG-compliant path resolution for the vault directory, the
//! encrypted preference store, and keystore blobs.
//!
//! ## Path Resolution Order
//!
//! 1. `STRONGBOX_DATA_DIR` environment variable (if set)
//! 2. Unix (Linux/macOS): `$XDG_CONFIG_HOME/strongbox` or `~/.config/strongbox`
//! 3. Windows: `%APPDATA%\strongbox`

use std::path::PathBuf;

use crate::error::StrongboxError;

/// Manages all paths used by Strongbox
#[derive(Debug, Clone)]
pub struct StrongboxPaths {
    /// Base directory for all Strongbox data
    base_dir: PathBuf,
}

impl StrongboxPaths {
    /// Create a new StrongboxPaths instance
    ///
    /// Path resolution:
    /// 1. `STRONGBOX_DATA_DIR` env var (explicit override)
    /// 2. Unix: `$XDG_CONFIG_HOME/strongbox` or `~/.config/strongbox`
    /// 3. Windows: `%APPDATA%\strongbox`
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new() -> Result<Self, StrongboxError> {
        let base_dir = if let Ok(custom) = std::env::var("STRONGBOX_DATA_DIR") {
            PathBuf::from(custom)
        } else {
            resolve_default_path()?
        };

        Ok(Self { base_dir })
    }

    /// Create StrongboxPaths with a custom base directory (useful for testing)
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.config/strongbox/ or equivalent)
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the directory holding encrypted file blobs
    pub fn files_dir(&self) -> PathBuf {
        self.base_dir.join("files")
    }

    /// Get the directory holding keystore key blobs
    pub fn keystore_dir(&self) -> PathBuf {
        self.base_dir.join("keystore")
    }

    /// Get the path to the encrypted preference store
    pub fn prefs_file(&self) -> PathBuf {
        self.base_dir.join("prefs.json")
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<(), StrongboxError> {
        std::fs::create_dir_all(&self.base_dir)
            .map_err(|e| StrongboxError::Io(format!("Failed to create base directory: {}", e)))?;

        std::fs::create_dir_all(self.files_dir())
            .map_err(|e| StrongboxError::Io(format!("Failed to create files directory: {}", e)))?;

        std::fs::create_dir_all(self.keystore_dir()).map_err(|e| {
            StrongboxError::Io(format!("Failed to create keystore directory: {}", e))
        })?;

        Ok(())
    }

    /// Check if Strongbox has been initialized (preference store exists)
    pub fn is_initialized(&self) -> bool {
        self.prefs_file().exists()
    }
}

/// Resolve the default data directory path based on platform
#[cfg(not(windows))]
fn resolve_default_path() -> Result<PathBuf, StrongboxError> {
    // Unix (Linux/macOS): Use XDG_CONFIG_HOME if set, otherwise ~/.config
    let config_base = match std::env::var("XDG_CONFIG_HOME") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => {
            let home = std::env::var("HOME").map_err(|_| {
                StrongboxError::Storage("Could not determine home directory".into())
            })?;
            PathBuf::from(home).join(".config")
        }
    };
    Ok(config_base.join("strongbox"))
}

/// Resolve the default data directory path based on platform
#[cfg(windows)]
fn resolve_default_path() -> Result<PathBuf, StrongboxError> {
    // Windows: Use APPDATA
    let appdata = std::env::var("APPDATA")
        .map_err(|_| StrongboxError::Storage("Could not determine APPDATA directory".into()))?;
    Ok(PathBuf::from(appdata).join("strongbox"))
}
