use crate::cert::parser::CertificateParser;
use crate::cert::SerialNumber;
use crate::storage::{self, Storage};
use crate::utils::errors::Result;
use crate::utils::pem::normalize_pem;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const CERT_PREFIX: &str = "certs/";

/// An issued certificate as recorded at issuance time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CertificateEntry {
    pub serial: SerialNumber,
    pub expiration: DateTime<Utc>,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_pem: Option<String>,
}

impl CertificateEntry {
    pub fn new(serial: SerialNumber, expiration: DateTime<Utc>, role: impl Into<String>) -> Self {
        Self {
            serial,
            expiration,
            role: role.into(),
            certificate_pem: None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration <= now
    }
}

/// Issued certificates keyed by serial under `certs/`
#[derive(Clone)]
pub struct CertificateStore {
    storage: Arc<dyn Storage>,
}

impl CertificateStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    fn key(serial: &SerialNumber) -> String {
        format!("{CERT_PREFIX}{}", serial.as_storage_key())
    }

    pub async fn get(&self, serial: &SerialNumber) -> Result<Option<CertificateEntry>> {
        storage::get_json(self.storage.as_ref(), &Self::key(serial)).await
    }

    pub async fn put(&self, entry: &CertificateEntry) -> Result<()> {
        storage::put_json(self.storage.as_ref(), &Self::key(&entry.serial), entry).await
    }

    pub async fn delete(&self, serial: &SerialNumber) -> Result<()> {
        self.storage.delete(&Self::key(serial)).await
    }

    /// Raw key names under the prefix, including ones that are not valid serials
    pub async fn list_names(&self) -> Result<Vec<String>> {
        let names = self.storage.list(CERT_PREFIX).await?;
        Ok(names.into_iter().filter(|n| !n.ends_with('/')).collect())
    }

    /// Remove an entry by its raw key name
    pub async fn delete_name(&self, name: &str) -> Result<()> {
        self.storage.delete(&format!("{CERT_PREFIX}{name}")).await
    }

    /// Serials of every stored certificate, skipping names that do not parse
    pub async fn list(&self) -> Result<Vec<SerialNumber>> {
        let mut serials = Vec::new();
        for name in self.list_names().await? {
            match SerialNumber::parse(&name) {
                Ok(serial) => serials.push(serial),
                Err(e) => tracing::warn!("Ignoring certificate key '{}': {}", name, e),
            }
        }
        Ok(serials)
    }

    /// Record an issued certificate from its PEM encoding
    pub async fn import_pem(&self, pem_data: &str, role: &str) -> Result<CertificateEntry> {
        let parsed = CertificateParser::parse_pem(pem_data)?;
        let entry = CertificateEntry {
            serial: parsed.serial,
            expiration: parsed.not_after,
            role: role.to_string(),
            certificate_pem: Some(normalize_pem(pem_data)),
        };
        self.put(&entry).await?;
        tracing::info!(
            "Imported certificate {} (CN {}, expires {})",
            entry.serial,
            parsed.cn,
            entry.expiration
        );
        Ok(entry)
    }
}
