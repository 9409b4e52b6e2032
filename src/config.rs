use crate::revocation::{DEFAULT_SAFETY_BUFFER_SECS, DEFAULT_TIDY_INTERVAL_SECS};
use crate::utils::errors::{PkiError, Result};
use crate::utils::paths::PkiPaths;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_CRL_LIFETIME_SECS: u64 = 72 * 3600;
const DEFAULT_PERIODIC_TICK_SECS: u64 = 60;
/// Upper bound on any configured duration (100 years)
const MAX_DURATION_SECS: u64 = 100 * 365 * 86_400;

/// Backend settings, read from YAML. Durations are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    pub crl_lifetime: u64,
    pub tidy_interval: u64,
    pub safety_buffer: u64,
    pub periodic_tick: u64,
    /// CA subject as an RFC 4514 string
    pub issuer: String,
    /// Colon hex serial of the CA certificate, never accepted for revocation
    pub ca_serial: Option<String>,
    pub ca_key_path: Option<String>,
    pub storage_dir: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            crl_lifetime: DEFAULT_CRL_LIFETIME_SECS,
            tidy_interval: DEFAULT_TIDY_INTERVAL_SECS as u64,
            safety_buffer: DEFAULT_SAFETY_BUFFER_SECS as u64,
            periodic_tick: DEFAULT_PERIODIC_TICK_SECS,
            issuer: "CN=PKI Revocation CA".to_string(),
            ca_serial: None,
            ca_key_path: None,
            storage_dir: None,
        }
    }
}

impl BackendConfig {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => PkiPaths::config_file()?,
        };

        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("crl_lifetime", self.crl_lifetime),
            ("tidy_interval", self.tidy_interval),
            ("periodic_tick", self.periodic_tick),
        ] {
            if value == 0 {
                return Err(PkiError::Config(format!("{name} must be greater than zero")));
            }
        }
        for (name, value) in [
            ("crl_lifetime", self.crl_lifetime),
            ("tidy_interval", self.tidy_interval),
            ("safety_buffer", self.safety_buffer),
        ] {
            if value > MAX_DURATION_SECS {
                return Err(PkiError::Config(format!("{name} is out of range")));
            }
        }
        if self.issuer.trim().is_empty() {
            return Err(PkiError::Config("issuer must not be empty".to_string()));
        }
        if let Some(serial) = &self.ca_serial {
            crate::cert::SerialNumber::parse(serial)?;
        }
        Ok(())
    }

    pub fn crl_lifetime(&self) -> chrono::Duration {
        seconds(self.crl_lifetime)
    }

    pub fn tidy_interval(&self) -> chrono::Duration {
        seconds(self.tidy_interval)
    }

    pub fn safety_buffer(&self) -> chrono::Duration {
        seconds(self.safety_buffer)
    }

    pub fn periodic_tick(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.periodic_tick)
    }

    pub fn storage_dir(&self) -> Result<PathBuf> {
        match &self.storage_dir {
            Some(dir) => PkiPaths::expand_home(dir),
            None => PkiPaths::storage_dir(),
        }
    }

    pub fn ca_key_path(&self) -> Result<PathBuf> {
        match &self.ca_key_path {
            Some(path) => PkiPaths::expand_home(path),
            None => PkiPaths::ca_key(),
        }
    }
}

/// Seconds to a chrono duration, clamped to the supported range
pub(crate) fn seconds(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(secs.min(MAX_DURATION_SECS) as i64)
}
