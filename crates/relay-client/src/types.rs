//! Wire types for the account directory and the message server.

use serde::{Deserialize, Serialize};

/// Account as reported by `GET /v1/provision/account`.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountInfo {
    #[serde(rename = "userId")]
    pub user_id: String,
    /// Linked devices. The directory may send `null` for an account without any.
    #[serde(default)]
    pub devices: Option<Vec<serde_json::Value>>,
    #[serde(rename = "serverUrl")]
    pub server_url: String,
}

impl AccountInfo {
    /// Whether at least one device is already linked to the account.
    pub fn has_devices(&self) -> bool {
        self.devices.as_ref().is_some_and(|d| !d.is_empty())
    }

    /// Number of linked devices.
    pub fn device_count(&self) -> usize {
        self.devices.as_ref().map_or(0, Vec::len)
    }
}

/// Body of `PUT /v1/provision/account`.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionAccountRequest {
    #[serde(rename = "signalingKey")]
    pub signaling_key: String,
    #[serde(rename = "supportsSms")]
    pub supports_sms: bool,
    #[serde(rename = "fetchesMessages")]
    pub fetches_messages: bool,
    #[serde(rename = "registrationId")]
    pub registration_id: u32,
    pub name: String,
    pub password: String,
}

/// Response of `PUT /v1/provision/account`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvisionedAccount {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "deviceId")]
    pub device_id: u32,
    #[serde(rename = "serverUrl")]
    pub server_url: String,
}

/// Body of `POST /v1/provision/request`.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisioningRequest {
    pub uuid: String,
    pub key: String,
}

/// Body of `PUT /v1/devices/{code}`.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceRegistrationRequest {
    #[serde(rename = "signalingKey")]
    pub signaling_key: String,
    #[serde(rename = "supportsSms")]
    pub supports_sms: bool,
    #[serde(rename = "fetchesMessages")]
    pub fetches_messages: bool,
    #[serde(rename = "registrationId")]
    pub registration_id: u32,
    pub name: String,
}

/// One-time prekey as uploaded to the message server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreKeyEntity {
    #[serde(rename = "keyId")]
    pub key_id: u32,
    #[serde(rename = "publicKey")]
    pub public_key: String,
}

/// Signed prekey as uploaded to the message server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedPreKeyEntity {
    #[serde(rename = "keyId")]
    pub key_id: u32,
    #[serde(rename = "publicKey")]
    pub public_key: String,
    pub signature: String,
}

/// Body of `PUT /v2/keys`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreKeyUpload {
    #[serde(rename = "identityKey")]
    pub identity_key: String,
    #[serde(rename = "signedPreKey")]
    pub signed_pre_key: SignedPreKeyEntity,
    #[serde(rename = "preKeys")]
    pub pre_keys: Vec<PreKeyEntity>,
}
