//! First-device account registration.

use super::credentials::{bootstrap_pre_keys, commit_credentials, AccountCredentials};
use super::Provisioner;
use crate::error::ProvisioningError;
use crate::keys::{
    generate_password, generate_registration_id, generate_signaling_key, IdentityKeyPair,
};
use relay_client::{AccountServiceClient, ProvisionAccountRequest, SignalServiceClient};
use tracing::{error, info, instrument};

impl Provisioner {
    /// Create a new account with this process as its first device.
    ///
    /// Any failure is reported as [`ProvisioningError::RegistrationFailed`]
    /// wrapping the underlying cause.
    #[instrument(skip(self, account))]
    pub async fn register_account(
        &self,
        account: Option<AccountServiceClient>,
        name: &str,
    ) -> Result<AccountCredentials, ProvisioningError> {
        self.try_register_account(account, name)
            .await
            .map_err(|e| {
                error!("Account registration failed: {}", e);
                ProvisioningError::RegistrationFailed(Box::new(e))
            })
    }

    async fn try_register_account(
        &self,
        account: Option<AccountServiceClient>,
        name: &str,
    ) -> Result<AccountCredentials, ProvisioningError> {
        let account = self.account_client(account)?;

        let registration_id = generate_registration_id();
        let password = generate_password();
        let signaling_key = generate_signaling_key();

        let request = ProvisionAccountRequest {
            signaling_key: signaling_key.to_base64(),
            supports_sms: false,
            fetches_messages: true,
            registration_id,
            name: name.to_string(),
            password: password.clone(),
        };
        let provisioned = account.provision_account(&request).await?;

        let credentials = AccountCredentials::new(
            provisioned.user_id,
            provisioned.device_id,
            registration_id,
            password,
            signaling_key,
            name,
            provisioned.server_url,
        );
        let identity = IdentityKeyPair::generate();
        commit_credentials(&self.storage, &credentials, &identity).await?;

        info!(
            username = %credentials.username(),
            "Account registered"
        );

        let service = SignalServiceClient::new(credentials.server_url())?
            .with_credentials(credentials.username(), credentials.password());
        bootstrap_pre_keys(
            &self.storage,
            &service,
            &identity,
            self.settings.pre_key_count,
        )
        .await
        .map_err(ProvisioningError::from)?;

        Ok(credentials)
    }
}
