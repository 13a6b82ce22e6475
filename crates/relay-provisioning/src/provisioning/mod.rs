//! Account bootstrap and device linking.
//!
//! [`Provisioner::register_account`] creates a brand new account whose first
//! device is this one. [`Provisioner::register_device`] links this process as
//! an additional device of an account that already has one, via a link session
//! over the provisioning transport.

mod credentials;
mod device;
mod registration;

pub use credentials::{
    bootstrap_pre_keys, commit_credentials, state_keys, AccountCredentials, BootstrapError,
};
pub use device::{
    classify, Canceller, DeviceOptions, Disposition, ProvisionReady, ProvisionReadyFuture,
    ProvisioningHandle, ProvisioningState, ADDRESS_PATH, ENVELOPE_PATH,
};

use crate::error::ProvisioningError;
use crate::storage::Storage;
use crate::transport::{Connector, Keepalive};
use relay_client::AccountServiceClient;
use std::sync::Arc;

/// Device name used when the caller does not pick one.
pub const DEFAULT_DEVICE_NAME: &str = "librelay";

/// Default number of one-time prekeys uploaded after a commit.
pub const DEFAULT_PRE_KEY_COUNT: u32 = 100;

/// Settings shared by both registration flows.
#[derive(Debug, Clone)]
pub struct ProvisionerSettings {
    /// Account directory used when no client is passed in.
    pub account_url: String,
    pub account_token: Option<String>,
    pub keepalive: Keepalive,
    pub pre_key_count: u32,
}

impl ProvisionerSettings {
    pub fn new(account_url: impl Into<String>) -> Self {
        Self {
            account_url: account_url.into(),
            account_token: None,
            keepalive: Keepalive::default(),
            pre_key_count: DEFAULT_PRE_KEY_COUNT,
        }
    }
}

/// Entry point for registering accounts and linking devices.
#[derive(Clone)]
pub struct Provisioner {
    storage: Storage,
    connector: Arc<dyn Connector>,
    settings: ProvisionerSettings,
}

impl Provisioner {
    pub fn new(
        storage: Storage,
        connector: Arc<dyn Connector>,
        settings: ProvisionerSettings,
    ) -> Self {
        Self {
            storage,
            connector,
            settings,
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn settings(&self) -> &ProvisionerSettings {
        &self.settings
    }

    /// Use the given directory client, or build the default one.
    fn account_client(
        &self,
        given: Option<AccountServiceClient>,
    ) -> Result<AccountServiceClient, ProvisioningError> {
        match given {
            Some(client) => Ok(client),
            None => Ok(AccountServiceClient::new(
                &self.settings.account_url,
                self.settings.account_token.clone(),
            )?),
        }
    }
}
