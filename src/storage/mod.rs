pub mod local;
pub mod memory;

pub use local::LocalStorage;
pub use memory::InMemoryStorage;

use crate::utils::errors::{PkiError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Key-value backing store.
///
/// Each single-key write is atomic; there are no multi-key transactions, callers
/// coordinate with their own locks. `list` returns the immediate children of a
/// prefix, with a trailing `/` on names that have children of their own.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Deleting a missing key is not an error
    async fn delete(&self, key: &str) -> Result<()>;

    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Read and decode a JSON value
pub async fn get_json<T: DeserializeOwned>(storage: &dyn Storage, key: &str) -> Result<Option<T>> {
    match storage.get(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Encode and write a JSON value
pub async fn put_json<T: Serialize + Sync>(storage: &dyn Storage, key: &str, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    storage.put(key, &bytes).await
}

pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(PkiError::Storage("empty storage key".to_string()));
    }
    if key.starts_with('/') || key.split('/').any(|part| part == ".." || part == ".") {
        return Err(PkiError::Storage(format!("invalid storage key: {key}")));
    }
    Ok(())
}
