//! Account directory HTTP client.

use crate::error::RelayClientError;
use crate::types::*;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Client for the account directory that owns provisioning signaling.
#[derive(Clone)]
pub struct AccountServiceClient {
    client: Client,
    base_url: String,
    token: Option<SecretString>,
}

impl AccountServiceClient {
    /// Create a new account directory client.
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
    ) -> Result<Self, RelayClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.map(SecretString::new),
        })
    }

    /// Base URL of the directory.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
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

    /// Look up the account this client is authorized for.
    #[instrument(skip(self))]
    pub async fn get_account(&self) -> Result<AccountInfo, RelayClientError> {
        let response = self
            .authorize(
                self.client
                    .get(format!("{}/v1/provision/account", self.base_url)),
            )
            .send()
            .await?;

        let response = Self::check(response, "Account lookup").await?;
        let account: AccountInfo = response.json().await?;
        debug!(
            user_id = %account.user_id,
            devices = account.device_count(),
            "Looked up account"
        );
        Ok(account)
    }

    /// Create a brand new account and its first device.
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn provision_account(
        &self,
        request: &ProvisionAccountRequest,
    ) -> Result<ProvisionedAccount, RelayClientError> {
        let response = self
            .authorize(
                self.client
                    .put(format!("{}/v1/provision/account", self.base_url)),
            )
            .json(request)
            .send()
            .await?;

        let response = Self::check(response, "Account provisioning").await?;
        let account: ProvisionedAccount = response.json().await?;
        debug!(
            user_id = %account.user_id,
            device_id = account.device_id,
            "Provisioned account"
        );
        Ok(account)
    }

    /// Ask the directory to relay a provisioning request to the primary device.
    #[instrument(skip(self, key))]
    pub async fn request_provisioning(&self, uuid: &str, key: &str) -> Result<(), RelayClientError> {
        let request = ProvisioningRequest {
            uuid: uuid.to_string(),
            key: key.to_string(),
        };

        let response = self
            .authorize(
                self.client
                    .post(format!("{}/v1/provision/request", self.base_url)),
            )
            .json(&request)
            .send()
            .await?;

        Self::check(response, "Provisioning request").await?;
        debug!(uuid = %uuid, "Provisioning request relayed");
        Ok(())
    }
}
