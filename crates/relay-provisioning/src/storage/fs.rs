//! Filesystem storage backing with optional encryption at rest.

use super::{validate_key, CredentialStore, StorageError};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use async_trait::async_trait;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// On-disk layout version.
const LAYOUT_VERSION: u32 = 1;

/// Domain separator mixed into passphrase-derived keys.
const KEY_DERIVATION_PATH: &str = "relay-provisioning/storage";

/// Nonce size for AES-GCM (96 bits = 12 bytes).
const NONCE_SIZE: usize = 12;

/// Temp files are dot-prefixed, a form [`validate_key`] never accepts.
const TEMP_PREFIX: &str = ".";
const TEMP_SUFFIX: &str = ".tmp";

/// One file per value under `<root>/<label>/v1/<namespace>/<key>`.
///
/// When a passphrase is configured each file is `[12 bytes nonce][ciphertext with auth tag]`.
pub struct FsBacking {
    root: PathBuf,
    key: Option<[u8; 32]>,
}

impl FsBacking {
    /// Create a plaintext backing.
    pub fn new(base: impl AsRef<Path>, label: &str) -> Self {
        let root = base
            .as_ref()
            .join(label)
            .join(format!("v{}", LAYOUT_VERSION));
        info!(root = ?root, "Using filesystem credential storage");
        Self { root, key: None }
    }

    /// Create a backing that encrypts every value with a key derived from `passphrase`.
    pub fn encrypted(base: impl AsRef<Path>, label: &str, passphrase: &str) -> Self {
        let mut backing = Self::new(base, label);
        backing.key = Some(derive_key(passphrase));
        backing
    }

    /// Directory holding one subdirectory per namespace.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn to_path(&self, ns: &str, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(ns)?;
        validate_key(key)?;
        Ok(self.root.join(ns).join(key))
    }

    fn temp_path(&self, ns: &str, key: &str) -> PathBuf {
        self.root
            .join(ns)
            .join(format!("{}{}{}", TEMP_PREFIX, key, TEMP_SUFFIX))
    }

    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, StorageError> {
        let Some(key) = &self.key else {
            return Ok(plaintext.to_vec());
        };

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher.encrypt(nonce, plaintext)?;

        let mut data = nonce_bytes.to_vec();
        data.extend(ciphertext);
        Ok(data)
    }

    fn open(&self, data: Vec<u8>) -> Result<Vec<u8>, StorageError> {
        let Some(key) = &self.key else {
            return Ok(data);
        };

        if data.len() < NONCE_SIZE {
            return Err(StorageError::Encryption("Stored value too short".into()));
        }

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        let nonce = Nonce::from_slice(&data[..NONCE_SIZE]);
        cipher.decrypt(nonce, &data[NONCE_SIZE..]).map_err(|_| {
            StorageError::Encryption(
                "Failed to decrypt stored value. The storage passphrase may have changed."
                    .to_string(),
            )
        })
    }
}

/// Derive a 32-byte storage key: SHA256(passphrase || key_derivation_path).
fn derive_key(passphrase: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(passphrase.as_bytes());
    hasher.update(KEY_DERIVATION_PATH.as_bytes());
    let hash = hasher.finalize();

    let mut key = [0u8; 32];
    key.copy_from_slice(&hash);
    key
}

#[async_trait]
impl CredentialStore for FsBacking {
    async fn get(&self, ns: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.to_path(ns, key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Some(self.open(data)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, ns: &str, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let path = self.to_path(ns, key)?;
        let data = self.seal(value)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write atomically using temp file + rename
        let temp_path = self.temp_path(ns, key);
        fs::write(&temp_path, &data).await?;
        fs::rename(&temp_path, &path).await?;

        debug!(ns, key, bytes = data.len(), "Stored value");
        Ok(())
    }

    async fn has(&self, ns: &str, key: &str) -> Result<bool, StorageError> {
        let path = self.to_path(ns, key)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, ns: &str, key: &str) -> Result<(), StorageError> {
        let path = self.to_path(ns, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self, ns: &str) -> Result<Vec<String>, StorageError> {
        validate_key(ns)?;
        let mut entries = match fs::read_dir(self.root.join(ns)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with(TEMP_PREFIX) {
                continue;
            }
            keys.push(name);
        }
        Ok(keys)
    }

    async fn clear(&self, ns: &str) -> Result<(), StorageError> {
        validate_key(ns)?;
        match fs::remove_dir_all(self.root.join(ns)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
