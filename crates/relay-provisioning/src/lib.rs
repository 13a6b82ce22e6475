//! Account bootstrap and multi-device provisioning for relay messaging clients.
//!
//! - Register a brand new account with this process as its first device
//! - Link this process as an additional device through a link session
//! - Persist the resulting credentials and identity as one unit

pub mod cipher;
pub mod config;
pub mod error;
pub mod keys;
pub mod provisioning;
pub mod storage;
pub mod transport;

pub use config::Config;
pub use error::ProvisioningError;
pub use provisioning::{
    AccountCredentials, DeviceOptions, ProvisionReady, Provisioner, ProvisionerSettings,
    ProvisioningHandle, ProvisioningState,
};
pub use storage::{CredentialStore, FsBacking, MemoryBacking, Storage};
pub use transport::{Connector, MemoryConnector, Transport, WebSocketConnector};
