//! Namespaced credential storage.
//!
//! [`CredentialStore`] is the read/write/clear contract of the physical
//! storage engine. [`Storage`] layers the typed operations registration and
//! provisioning need on top of it.

mod fs;
mod memory;

pub use fs::FsBacking;
pub use memory::MemoryBacking;

use crate::keys::{IdentityKeyPair, PreKeyRecord};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub const NS_STATE: &str = "state";
pub const NS_SESSION: &str = "session";
pub const NS_OUR_IDENTITY: &str = "our_identity";
pub const NS_THEIR_IDENTITY: &str = "their_identity";
pub const NS_PRE_KEY: &str = "pre_key";
pub const NS_SIGNED_PRE_KEY: &str = "signed_pre_key";

const OUR_IDENTITY_KEY: &str = "identityKey";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),
}

impl From<aes_gcm::Error> for StorageError {
    fn from(_: aes_gcm::Error) -> Self {
        StorageError::Encryption("AES-GCM encryption/decryption failed".to_string())
    }
}

/// Key-value persistence partitioned by namespace.
///
/// A single `set` is atomic; nothing stronger is assumed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, ns: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    async fn set(&self, ns: &str, key: &str, value: &[u8]) -> Result<(), StorageError>;

    async fn has(&self, ns: &str, key: &str) -> Result<bool, StorageError>;

    /// Remove a key. Removing a missing key is not an error.
    async fn remove(&self, ns: &str, key: &str) -> Result<(), StorageError>;

    async fn keys(&self, ns: &str) -> Result<Vec<String>, StorageError>;

    /// Remove every key in a namespace.
    async fn clear(&self, ns: &str) -> Result<(), StorageError>;
}

/// Typed storage facade shared by the coordinators.
#[derive(Clone)]
pub struct Storage {
    backing: Arc<dyn CredentialStore>,
}

impl Storage {
    pub fn new(backing: Arc<dyn CredentialStore>) -> Self {
        Self { backing }
    }

    /// Storage backed by process memory only.
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryBacking::new()))
    }

    pub fn backing(&self) -> &Arc<dyn CredentialStore> {
        &self.backing
    }

    async fn put<T: Serialize + ?Sized>(
        &self,
        ns: &str,
        key: &str,
        value: &T,
    ) -> Result<(), StorageError> {
        let encoded = serde_json::to_vec(value)?;
        self.backing.set(ns, key, &encoded).await
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        ns: &str,
        key: &str,
    ) -> Result<Option<T>, StorageError> {
        match self.backing.get(ns, key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn put_state<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), StorageError> {
        self.put(NS_STATE, key, value).await
    }

    pub async fn get_state<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        self.fetch(NS_STATE, key).await
    }

    pub async fn clear_session_store(&self) -> Result<(), StorageError> {
        debug!("Clearing session store");
        self.backing.clear(NS_SESSION).await
    }

    /// Drop every stored one-time and signed prekey.
    pub async fn clear_pre_keys(&self) -> Result<(), StorageError> {
        debug!("Clearing prekeys");
        self.backing.clear(NS_PRE_KEY).await?;
        self.backing.clear(NS_SIGNED_PRE_KEY).await
    }

    pub async fn remove_our_identity(&self) -> Result<(), StorageError> {
        self.backing.remove(NS_OUR_IDENTITY, OUR_IDENTITY_KEY).await
    }

    pub async fn save_our_identity(&self, identity: &IdentityKeyPair) -> Result<(), StorageError> {
        self.put(NS_OUR_IDENTITY, OUR_IDENTITY_KEY, identity).await
    }

    pub async fn get_our_identity(&self) -> Result<Option<IdentityKeyPair>, StorageError> {
        self.fetch(NS_OUR_IDENTITY, OUR_IDENTITY_KEY).await
    }

    /// Forget the trusted identity key of `address`.
    pub async fn remove_identity(&self, address: &str) -> Result<(), StorageError> {
        self.backing.remove(NS_THEIR_IDENTITY, address).await
    }

    /// Trust `public_key` as the identity key of `address`.
    pub async fn save_identity(&self, address: &str, public_key: &[u8]) -> Result<(), StorageError> {
        self.put(NS_THEIR_IDENTITY, address, &STANDARD.encode(public_key))
            .await
    }

    /// Trusted identity key of `address`, base64 encoded.
    pub async fn get_identity(&self, address: &str) -> Result<Option<String>, StorageError> {
        self.fetch(NS_THEIR_IDENTITY, address).await
    }

    pub async fn store_pre_key(&self, record: &PreKeyRecord) -> Result<(), StorageError> {
        self.put(NS_PRE_KEY, &record.key_id.to_string(), record).await
    }

    pub async fn store_signed_pre_key(&self, record: &PreKeyRecord) -> Result<(), StorageError> {
        self.put(NS_SIGNED_PRE_KEY, &record.key_id.to_string(), record)
            .await
    }
}

/// Reject keys that could escape their namespace on a filesystem backing.
///
/// Dot-prefixed names are reserved for the backing's own temp files.
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty()
        || key.starts_with('.')
        || key.contains("..")
        || key.contains(['/', '\\', '\0'])
    {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
