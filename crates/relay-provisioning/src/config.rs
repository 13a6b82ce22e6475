//! Configuration for account registration and device provisioning.
//!
//! Loaded from the environment (and `.env`), sections separated by `__`,
//! e.g. `ACCOUNT__URL`, `STORAGE__PASSPHRASE`, `TRANSPORT__KEEPALIVE_INTERVAL=15s`.

use crate::provisioning::{
    Provisioner, ProvisionerSettings, DEFAULT_DEVICE_NAME, DEFAULT_PRE_KEY_COUNT,
};
use crate::storage::{FsBacking, Storage};
use crate::transport::{Connector, Keepalive, PROVISIONING_KEEPALIVE_PATH};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Account directory
    #[serde(default)]
    pub account: AccountConfig,

    /// Provisioning transport
    #[serde(default)]
    pub transport: TransportConfig,

    /// Credential storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Device defaults
    #[serde(default)]
    pub device: DeviceConfig,

    /// Key material
    #[serde(default)]
    pub keys: KeysConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    /// Account directory base URL
    #[serde(default = "default_account_url")]
    pub url: String,

    /// Bearer token for the directory
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_keepalive_path")]
    pub keepalive_path: String,

    #[serde(default = "default_keepalive_interval", with = "humantime_serde")]
    pub keepalive_interval: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Base directory of the filesystem backing
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,

    /// Subdirectory separating independent identities
    #[serde(default = "default_storage_label")]
    pub label: String,

    /// Enable persistence (if false, credentials are in-memory only)
    #[serde(default = "default_true")]
    pub persist: bool,

    /// Encrypt values at rest when set
    #[serde(default)]
    pub passphrase: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_device_name")]
    pub name: String,

    #[serde(default = "default_true")]
    pub auto_provision: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeysConfig {
    #[serde(default = "default_pre_key_count")]
    pub pre_key_count: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            url: default_account_url(),
            token: None,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            keepalive_path: default_keepalive_path(),
            keepalive_interval: default_keepalive_interval(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            label: default_storage_label(),
            persist: true,
            passphrase: None,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: default_device_name(),
            auto_provision: true,
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            pre_key_count: default_pre_key_count(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_account_url() -> String {
    "http://localhost:8000".into()
}

fn default_keepalive_path() -> String {
    PROVISIONING_KEEPALIVE_PATH.into()
}

fn default_keepalive_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_storage_path() -> PathBuf {
    PathBuf::from(".relay")
}

fn default_storage_label() -> String {
    "default".into()
}

fn default_true() -> bool {
    true
}

fn default_device_name() -> String {
    DEFAULT_DEVICE_NAME.into()
}

fn default_pre_key_count() -> u32 {
    DEFAULT_PRE_KEY_COUNT
}

fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(false),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    pub fn keepalive(&self) -> Keepalive {
        Keepalive {
            path: self.transport.keepalive_path.clone(),
            interval: self.transport.keepalive_interval,
        }
    }

    /// Open the configured credential storage.
    pub fn storage(&self) -> Storage {
        if !self.storage.persist {
            info!("Persistence disabled, using in-memory storage");
            return Storage::memory();
        }

        let backing = match &self.storage.passphrase {
            Some(passphrase) => {
                FsBacking::encrypted(&self.storage.path, &self.storage.label, passphrase)
            }
            None => FsBacking::new(&self.storage.path, &self.storage.label),
        };
        Storage::new(Arc::new(backing))
    }

    pub fn settings(&self) -> ProvisionerSettings {
        ProvisionerSettings {
            account_url: self.account.url.clone(),
            account_token: self.account.token.clone(),
            keepalive: self.keepalive(),
            pre_key_count: self.keys.pre_key_count,
        }
    }

    pub fn provisioner(&self, connector: Arc<dyn Connector>) -> Provisioner {
        Provisioner::new(self.storage(), connector, self.settings())
    }
}
