use crate::cert::SerialNumber;
use crate::storage::{self, Storage};
use crate::utils::errors::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

pub const REVOKED_PREFIX: &str = "revoked/";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RevocationRecord {
    pub serial: SerialNumber,
    pub revocation_time: DateTime<Utc>,
    pub certificate_expiration: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_pem: Option<String>,
}

impl RevocationRecord {
    /// Whether the certificate is past its validity and no longer belongs on a CRL
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.certificate_expiration <= now
    }

    /// Whether tidy may drop the record
    pub fn is_tidy_eligible(&self, now: DateTime<Utc>, safety_buffer: Duration) -> bool {
        now > self.certificate_expiration + safety_buffer
    }
}

/// Revoked serials under `revoked/`, plus the lock that orders writers.
///
/// Reads go straight to storage. Writes are only available on
/// [`RevocationWriteGuard`], which holds the exclusive side of the lock for as long
/// as it lives.
pub struct RevocationStore {
    storage: Arc<dyn Storage>,
    lock: RwLock<()>,
}

impl RevocationStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            lock: RwLock::new(()),
        }
    }

    fn key(serial: &SerialNumber) -> String {
        format!("{REVOKED_PREFIX}{}", serial.as_storage_key())
    }

    pub async fn get(&self, serial: &SerialNumber) -> Result<Option<RevocationRecord>> {
        storage::get_json(self.storage.as_ref(), &Self::key(serial)).await
    }

    /// Snapshot of every recorded serial; call again for a fresh one
    pub async fn list(&self) -> Result<Vec<SerialNumber>> {
        let mut serials = Vec::new();
        for name in self.list_names().await? {
            match SerialNumber::parse(&name) {
                Ok(serial) => serials.push(serial),
                Err(e) => tracing::warn!("Ignoring revocation key '{}': {}", name, e),
            }
        }
        Ok(serials)
    }

    /// Raw key names, including ones that are not valid serials
    pub async fn list_names(&self) -> Result<Vec<String>> {
        let names = self.storage.list(REVOKED_PREFIX).await?;
        Ok(names.into_iter().filter(|n| !n.ends_with('/')).collect())
    }

    /// Exclusive access for revoke and tidy
    pub async fn write(&self) -> RevocationWriteGuard<'_> {
        RevocationWriteGuard {
            store: self,
            _lock: self.lock.write().await,
        }
    }

    /// Shared access, excludes writers while held
    pub async fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().await
    }
}

pub struct RevocationWriteGuard<'a> {
    store: &'a RevocationStore,
    _lock: RwLockWriteGuard<'a, ()>,
}

impl<'a> RevocationWriteGuard<'a> {
    pub fn store(&self) -> &'a RevocationStore {
        self.store
    }

    pub async fn get(&self, serial: &SerialNumber) -> Result<Option<RevocationRecord>> {
        self.store.get(serial).await
    }

    pub async fn list_names(&self) -> Result<Vec<String>> {
        self.store.list_names().await
    }

    /// Insert or replace the record for its serial
    pub async fn put(&self, record: &RevocationRecord) -> Result<()> {
        let key = RevocationStore::key(&record.serial);
        storage::put_json(self.store.storage.as_ref(), &key, record).await
    }

    pub async fn delete(&self, serial: &SerialNumber) -> Result<()> {
        self.store
            .storage
            .delete(&RevocationStore::key(serial))
            .await
    }

    /// Remove an entry by raw key name, for keys that no longer parse
    pub async fn delete_name(&self, name: &str) -> Result<()> {
        self.store
            .storage
            .delete(&format!("{REVOKED_PREFIX}{name}"))
            .await
    }
}
