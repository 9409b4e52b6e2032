use crate::utils::errors::{PkiError, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub struct PkiPaths;
const PROGRAM_NAME: &str = "pki-revocation";

impl PkiPaths {
    /// Get the base data directory: ~/.local/share/pki-revocation/
    pub fn data_dir() -> Result<PathBuf> {
        dirs::data_local_dir()
            .map(|dir| dir.join(PROGRAM_NAME))
            .ok_or_else(|| PkiError::Config("Cannot determine local data directory".to_string()))
    }

    /// Get the config directory: ~/.config/pki-revocation/
    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(PROGRAM_NAME))
            .ok_or_else(|| PkiError::Config("Cannot determine config directory".to_string()))
    }

    /// Get the default config file: ~/.config/pki-revocation/config.yaml
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.yaml"))
    }

    /// Get the storage root: ~/.local/share/pki-revocation/storage/
    pub fn storage_dir() -> Result<PathBuf> {
        Ok(Self::data_dir()?.join("storage"))
    }

    /// Get the default CA key path: ~/.local/share/pki-revocation/ca_key.pem
    pub fn ca_key() -> Result<PathBuf> {
        Ok(Self::data_dir()?.join("ca_key.pem"))
    }

    /// Expand a leading `~/` to the home directory
    pub fn expand_home(path: &str) -> Result<PathBuf> {
        match path.strip_prefix("~/") {
            Some(rest) => dirs::home_dir()
                .map(|home| home.join(rest))
                .ok_or_else(|| PkiError::Config("Cannot determine home directory".to_string())),
            None => Ok(PathBuf::from(path)),
        }
    }

    /// Ensure a directory exists with proper permissions
    pub fn ensure_dir_exists(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;

            // Set restrictive permissions on data directories (700)
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let mut perms = fs::metadata(path)?.permissions();
                perms.set_mode(0o700);
                fs::set_permissions(path, perms)?;
            }
        }
        Ok(())
    }
}
