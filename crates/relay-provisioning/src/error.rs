//! Error types for account registration and device provisioning.

use crate::cipher::CipherError;
use crate::provisioning::BootstrapError;
use crate::storage::StorageError;
use crate::transport::TransportError;
use relay_client::RelayClientError;
use thiserror::Error;

/// Provisioning error types.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Protocol error: unexpected request {verb} {path}")]
    UnexpectedRequest { verb: String, path: String },

    #[error("Protocol error: malformed {path} body: {reason}")]
    MalformedRequest { path: String, reason: String },

    #[error("Security violation: foreign account {actual} sent an identity key for {expected}")]
    SecurityViolation { expected: String, actual: String },

    #[error("Upstream service error: {0}")]
    Upstream(#[from] RelayClientError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Provisioning message could not be decrypted: {0}")]
    Crypto(#[from] CipherError),

    #[error("Provision-ready callback failed: {0}")]
    Callback(String),

    #[error("Provisioning cancelled")]
    Cancelled,

    #[error("Provisioning task aborted: {0}")]
    TaskAborted(String),

    #[error("Account registration failed: {0}")]
    RegistrationFailed(#[source] Box<ProvisioningError>),
}

impl ProvisioningError {
    /// Whether the failure was a request the protocol does not allow.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            ProvisioningError::UnexpectedRequest { .. } | ProvisioningError::MalformedRequest { .. }
        )
    }
}

impl From<BootstrapError> for ProvisioningError {
    fn from(err: BootstrapError) -> Self {
        match err {
            BootstrapError::Storage(e) => ProvisioningError::Storage(e),
            BootstrapError::Upload(e) => ProvisioningError::Upstream(e),
        }
    }
}
