//! Message server HTTP client.

use crate::error::RelayClientError;
use crate::types::*;
use reqwest::{Client, Response};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::{debug, instrument, warn};
use urlencoding::encode;

const PROVISIONING_SOCKET_PATH: &str = "/v1/websocket/provisioning/";

/// Basic-auth credentials for the message server.
#[derive(Clone)]
struct Credentials {
    username: String,
    password: SecretString,
}

/// Message server client used for device registration and key upload.
#[derive(Clone)]
pub struct SignalServiceClient {
    client: Client,
    base_url: String,
    credentials: Option<Credentials>,
}

impl SignalServiceClient {
    /// Create an unauthenticated client.
    pub fn new(base_url: impl Into<String>) -> Result<Self, RelayClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials: None,
        })
    }

    /// Derive a client authenticated as `username` sharing the same connection pool.
    pub fn with_credentials(&self, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            credentials: Some(Credentials {
                username: username.into(),
                password: SecretString::new(password.into()),
            }),
        }
    }

    /// Server URL as given to the constructor.
    pub fn url(&self) -> &str {
        &self.base_url
    }

    /// Username this client authenticates as, if any.
    pub fn username(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.username.as_str())
    }

    /// WebSocket URL of the provisioning endpoint.
    pub fn provisioning_socket_url(&self) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.base_url.clone()
        };
        format!("{}{}", ws_base, PROVISIONING_SOCKET_PATH)
    }

    async fn check(response: Response, what: &str) -> Result<Response, RelayClientError> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        warn!(status, body = %body, "{} failed", what);
        Err(RelayClientError::Api { status, body })
    }

    /// Register a new device for `address` using a provisioning code.
    ///
    /// The server must answer with an integer `deviceId`.
    #[instrument(skip(self, password, request), fields(name = %request.name))]
    pub async fn register_device(
        &self,
        provisioning_code: &str,
        address: &str,
        password: &str,
        request: &DeviceRegistrationRequest,
    ) -> Result<u32, RelayClientError> {
        let url = format!("{}/v1/devices/{}", self.base_url, encode(provisioning_code));

        let response = self
            .client
            .put(&url)
            .basic_auth(address, Some(password))
            .json(request)
            .send()
            .await?;

        let response = Self::check(response, "Device registration").await?;
        let body: serde_json::Value = response.json().await?;

        let device_id = body
            .get("deviceId")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| {
                RelayClientError::InvalidResponse(format!(
                    "expected integer deviceId, got {}",
                    body
                ))
            })?;
        let device_id = u32::try_from(device_id).map_err(|_| {
            RelayClientError::InvalidResponse(format!("deviceId out of range: {}", device_id))
        })?;

        debug!(device_id, "Device registered");
        Ok(device_id)
    }

    /// Upload the identity key, signed prekey and one-time prekeys.
    #[instrument(skip(self, upload), fields(pre_keys = upload.pre_keys.len()))]
    pub async fn register_keys(&self, upload: &PreKeyUpload) -> Result<(), RelayClientError> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or(RelayClientError::NotAuthenticated)?;

        let response = self
            .client
            .put(format!("{}/v2/keys", self.base_url))
            .basic_auth(&credentials.username, Some(credentials.password.expose_secret()))
            .json(upload)
            .send()
            .await?;

        Self::check(response, "Key registration").await?;
        debug!("Registered prekeys");
        Ok(())
    }
}
