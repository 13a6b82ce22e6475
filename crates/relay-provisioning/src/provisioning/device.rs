//! Linking this process as an additional device of an existing account.
//!
//! The flow runs in two phases on a background task:
//!
//! 1. While the link session is open the server relays requests from the
//!    primary device. `PUT /v1/address` announces the session uuid,
//!    `PUT /v1/message` delivers the sealed envelope and ends the session.
//! 2. The envelope is decrypted and checked against the account, then the
//!    device is registered and the credentials committed.
//!
//! [`ProvisioningHandle`] observes progress, cancels phase one and awaits
//! the outcome.

use super::credentials::{bootstrap_pre_keys, commit_credentials, AccountCredentials};
use super::{Provisioner, DEFAULT_DEVICE_NAME};
use crate::cipher::{ProvisionEnvelope, ProvisioningCipher, ProvisioningUuid};
use crate::error::ProvisioningError;
use crate::keys::{generate_password, generate_registration_id, generate_signaling_key};
use crate::storage::Storage;
use crate::transport::{InboundRequest, Transport, TransportError};
use futures::future::BoxFuture;
use futures::FutureExt;
use relay_client::{
    AccountInfo, AccountServiceClient, DeviceRegistrationRequest, SignalServiceClient,
};
use serde::de::DeserializeOwned;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};

/// Path on which the server announces the link session.
pub const ADDRESS_PATH: &str = "/v1/address";

/// Path on which the server delivers the provisioning envelope.
pub const ENVELOPE_PATH: &str = "/v1/message";

/// Progress of a device link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningState {
    Init,
    AccountLookedUp,
    LinkSessionOpen,
    AwaitingEnvelope,
    EnvelopeDecrypted,
    AddressValidated,
    DeviceRegistered,
    Committed,
    Cancelled,
    Failed,
}

impl ProvisioningState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProvisioningState::Committed | ProvisioningState::Cancelled | ProvisioningState::Failed
        )
    }
}

/// What to do with a request relayed during the link session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    AddressNotify,
    EnvelopeComplete,
    Unexpected,
}

/// Route a relayed request by verb and path.
pub fn classify(verb: &str, path: &str) -> Disposition {
    match (verb, path) {
        ("PUT", ADDRESS_PATH) => Disposition::AddressNotify,
        ("PUT", ENVELOPE_PATH) => Disposition::EnvelopeComplete,
        _ => Disposition::Unexpected,
    }
}

pub type ProvisionReadyFuture = BoxFuture<'static, anyhow::Result<()>>;

type ReadyFn = dyn Fn(&str, &str) -> Option<ProvisionReadyFuture> + Send + Sync;

/// Called with `(uuid, public_key)` once the link session is announced.
///
/// The caller typically renders both as a link for the primary device. An
/// asynchronous callback that fails aborts the link.
#[derive(Clone)]
pub struct ProvisionReady(Arc<ReadyFn>);

impl ProvisionReady {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        let ready: Arc<ReadyFn> = Arc::new(move |uuid: &str, key: &str| {
            callback(uuid, key);
            None::<ProvisionReadyFuture>
        });
        Self(ready)
    }

    pub fn with_future<F, Fut>(callback: F) -> Self
    where
        F: Fn(String, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let ready: Arc<ReadyFn> = Arc::new(move |uuid: &str, key: &str| {
            Some(callback(uuid.to_string(), key.to_string()).boxed())
        });
        Self(ready)
    }

    fn invoke(&self, uuid: &str, key: &str) -> Option<ProvisionReadyFuture> {
        (self.0)(uuid, key)
    }
}

impl fmt::Debug for ProvisionReady {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProvisionReady(..)")
    }
}

/// Options for [`Provisioner::register_device`].
#[derive(Debug, Clone)]
pub struct DeviceOptions {
    pub name: String,
    /// Ask the directory to forward the link to the primary device.
    pub auto_provision: bool,
    pub on_provision_ready: Option<ProvisionReady>,
}

impl DeviceOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            auto_provision: true,
            on_provision_ready: None,
        }
    }

    pub fn auto_provision(mut self, enabled: bool) -> Self {
        self.auto_provision = enabled;
        self
    }

    pub fn on_provision_ready(mut self, callback: ProvisionReady) -> Self {
        self.on_provision_ready = Some(callback);
        self
    }
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self::new(DEFAULT_DEVICE_NAME)
    }
}

/// Outcome of phase one, published to cancellers.
#[derive(Debug, Clone, PartialEq, Eq)]
enum EnvelopeSignal {
    Pending,
    Delivered,
    Cancelled,
    Failed(String),
}

/// Cancels a pending device link. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Canceller {
    cancel: Arc<watch::Sender<bool>>,
    envelope: watch::Receiver<EnvelopeSignal>,
}

impl Canceller {
    /// Close the link session and wait until phase one has settled.
    ///
    /// Transport failures are logged, never returned. Once the envelope has
    /// been delivered this has no effect.
    pub async fn cancel(&self) {
        self.cancel.send_replace(true);

        let mut envelope = self.envelope.clone();
        let settled = envelope
            .wait_for(|signal| *signal != EnvelopeSignal::Pending)
            .await
            .map(|signal| signal.clone());

        match settled {
            Ok(EnvelopeSignal::Failed(reason)) => {
                warn!("Ignoring provisioning socket error: {}", reason)
            }
            Ok(EnvelopeSignal::Cancelled) => debug!("Link session closed"),
            Ok(_) => debug!("Envelope already delivered, cancel has no effect"),
            Err(_) => debug!("Provisioning task already finished"),
        }
    }
}

/// Handle to a device link running in the background.
#[derive(Debug)]
pub struct ProvisioningHandle {
    state: watch::Receiver<ProvisioningState>,
    canceller: Canceller,
    task: JoinHandle<Result<AccountCredentials, ProvisioningError>>,
}

impl ProvisioningHandle {
    /// True until the envelope has been decrypted or the link ended.
    pub fn is_waiting(&self) -> bool {
        matches!(
            *self.state.borrow(),
            ProvisioningState::LinkSessionOpen | ProvisioningState::AwaitingEnvelope
        )
    }

    pub fn state(&self) -> ProvisioningState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ProvisioningState> {
        self.state.clone()
    }

    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }

    pub async fn cancel(&self) {
        self.canceller.cancel().await
    }

    /// Wait for the link to finish.
    pub async fn wait(self) -> Result<AccountCredentials, ProvisioningError> {
        self.task
            .await
            .map_err(|e| ProvisioningError::TaskAborted(e.to_string()))?
    }
}

impl Provisioner {
    /// Link this process as a new device of an existing account.
    ///
    /// Returns once the link session is open. The account must already have
    /// at least one device, and automatic provisioning needs a
    /// `on_provision_ready` callback; both are checked before connecting.
    #[instrument(skip(self, account, options), fields(name = %options.name))]
    pub async fn register_device(
        &self,
        account: Option<AccountServiceClient>,
        options: DeviceOptions,
    ) -> Result<ProvisioningHandle, ProvisioningError> {
        let (state, state_rx) = watch::channel(ProvisioningState::Init);
        let account = self.account_client(account)?;
        let account_info = account.get_account().await?;

        if !account_info.has_devices() {
            error!("Must use register_account for the first device");
            return Err(ProvisioningError::Precondition(
                "account has no devices, register it first".into(),
            ));
        }
        if options.auto_provision && options.on_provision_ready.is_none() {
            return Err(ProvisioningError::Configuration(
                "auto_provision requires an on_provision_ready callback".into(),
            ));
        }

        state.send_replace(ProvisioningState::AccountLookedUp);
        let signal = SignalServiceClient::new(&account_info.server_url)?;
        let cipher = ProvisioningCipher::new();
        let public_key = cipher.public_key_base64();

        let transport = self
            .connector
            .connect(&signal.provisioning_socket_url(), &self.settings.keepalive)
            .await?;
        state.send_replace(ProvisioningState::LinkSessionOpen);
        info!(user_id = %account_info.user_id, "Link session open");

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (envelope_tx, envelope_rx) = watch::channel(EnvelopeSignal::Pending);

        let session = LinkSession {
            storage: self.storage.clone(),
            account,
            account_info,
            signal,
            cipher,
            public_key,
            options,
            pre_key_count: self.settings.pre_key_count,
            state,
        };
        let task = tokio::spawn(session.run(transport, cancel_rx, envelope_tx));

        Ok(ProvisioningHandle {
            state: state_rx,
            canceller: Canceller {
                cancel: Arc::new(cancel_tx),
                envelope: envelope_rx,
            },
            task,
        })
    }
}

type SideTasks = JoinSet<Result<(), ProvisioningError>>;

struct LinkSession {
    storage: Storage,
    account: AccountServiceClient,
    account_info: AccountInfo,
    signal: SignalServiceClient,
    cipher: ProvisioningCipher,
    public_key: String,
    options: DeviceOptions,
    pre_key_count: u32,
    state: watch::Sender<ProvisioningState>,
}

impl LinkSession {
    async fn run(
        self,
        transport: Box<dyn Transport>,
        cancel: watch::Receiver<bool>,
        envelope: watch::Sender<EnvelopeSignal>,
    ) -> Result<AccountCredentials, ProvisioningError> {
        let result = match self.receive_envelope(transport, cancel, &envelope).await {
            Ok(sealed) => self.complete(sealed).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(credentials) => {
                info!(username = %credentials.username(), "Device linked");
                self.state.send_replace(ProvisioningState::Committed);
            }
            Err(ProvisioningError::Cancelled) => {
                self.state.send_replace(ProvisioningState::Cancelled);
            }
            Err(e) => {
                error!("Device link failed: {}", e);
                self.state.send_replace(ProvisioningState::Failed);
            }
        }
        result
    }

    /// Phase one. The transport is closed exactly once, whatever the outcome.
    async fn receive_envelope(
        &self,
        mut transport: Box<dyn Transport>,
        mut cancel: watch::Receiver<bool>,
        envelope: &watch::Sender<EnvelopeSignal>,
    ) -> Result<ProvisionEnvelope, ProvisioningError> {
        self.state.send_replace(ProvisioningState::AwaitingEnvelope);

        let mut side_tasks = SideTasks::new();
        let outcome = self
            .dispatch(transport.as_mut(), &mut cancel, &mut side_tasks)
            .await;

        transport.close().await;
        side_tasks.abort_all();

        envelope.send_replace(match &outcome {
            Ok(_) => EnvelopeSignal::Delivered,
            Err(ProvisioningError::Cancelled) => EnvelopeSignal::Cancelled,
            Err(e) => EnvelopeSignal::Failed(e.to_string()),
        });
        outcome
    }

    async fn dispatch(
        &self,
        transport: &mut dyn Transport,
        cancel: &mut watch::Receiver<bool>,
        side_tasks: &mut SideTasks,
    ) -> Result<ProvisionEnvelope, ProvisioningError> {
        let mut cancel_live = true;

        loop {
            tokio::select! {
                biased;

                cancelled = async { cancel.wait_for(|c| *c).await.is_ok() }, if cancel_live => {
                    if cancelled {
                        info!("Device link cancelled");
                        return Err(ProvisioningError::Cancelled);
                    }
                    // Every canceller is gone.
                    cancel_live = false;
                }

                Some(joined) = side_tasks.join_next() => match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => return Err(e),
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => return Err(ProvisioningError::TaskAborted(e.to_string())),
                },

                next = transport.next_request() => {
                    let request = match next {
                        Some(request) => request?,
                        None => return Err(TransportError::Closed.into()),
                    };

                    match classify(&request.verb, &request.path) {
                        Disposition::AddressNotify => {
                            self.on_address(transport, request, side_tasks).await?
                        }
                        Disposition::EnvelopeComplete => {
                            return self.on_envelope(transport, request).await;
                        }
                        Disposition::Unexpected => {
                            warn!(verb = %request.verb, path = %request.path, "Unexpected request on link session");
                            return Err(ProvisioningError::UnexpectedRequest {
                                verb: request.verb,
                                path: request.path,
                            });
                        }
                    }
                }
            }
        }
    }

    async fn on_address(
        &self,
        transport: &mut dyn Transport,
        request: InboundRequest,
        side_tasks: &mut SideTasks,
    ) -> Result<(), ProvisioningError> {
        let link: ProvisioningUuid = decode_body(&request)?;
        transport.respond(request.id, 200, "OK").await?;
        info!(uuid = %link.uuid, "Link session announced");

        if self.options.auto_provision {
            let account = self.account.clone();
            let uuid = link.uuid.clone();
            let key = self.public_key.clone();
            side_tasks.spawn(async move {
                account
                    .request_provisioning(&uuid, &key)
                    .await
                    .map_err(ProvisioningError::from)
            });
        }

        if let Some(callback) = &self.options.on_provision_ready {
            if let Some(pending) = callback.invoke(&link.uuid, &self.public_key) {
                side_tasks.spawn(async move {
                    pending
                        .await
                        .map_err(|e| ProvisioningError::Callback(format!("{:#}", e)))
                });
            }
        }
        Ok(())
    }

    async fn on_envelope(
        &self,
        transport: &mut dyn Transport,
        request: InboundRequest,
    ) -> Result<ProvisionEnvelope, ProvisioningError> {
        let sealed: ProvisionEnvelope = decode_body(&request)?;
        transport.respond(request.id, 200, "OK").await?;
        debug!("Provisioning envelope received");
        Ok(sealed)
    }

    /// Phase two.
    async fn complete(
        &self,
        sealed: ProvisionEnvelope,
    ) -> Result<AccountCredentials, ProvisioningError> {
        let message = self.cipher.decrypt(&sealed)?;
        self.state.send_replace(ProvisioningState::EnvelopeDecrypted);

        if message.address != self.account_info.user_id {
            error!(
                expected = %self.account_info.user_id,
                actual = %message.address,
                "Foreign account sent an identity key"
            );
            return Err(ProvisioningError::SecurityViolation {
                expected: self.account_info.user_id.clone(),
                actual: message.address,
            });
        }
        self.state.send_replace(ProvisioningState::AddressValidated);

        let registration_id = generate_registration_id();
        let password = generate_password();
        let signaling_key = generate_signaling_key();

        let request = DeviceRegistrationRequest {
            signaling_key: signaling_key.to_base64(),
            supports_sms: false,
            fetches_messages: true,
            registration_id,
            name: self.options.name.clone(),
        };
        let device_id = self
            .signal
            .register_device(
                &message.provisioning_code,
                &message.address,
                &password,
                &request,
            )
            .await?;
        self.state.send_replace(ProvisioningState::DeviceRegistered);

        let credentials = AccountCredentials::new(
            message.address,
            device_id,
            registration_id,
            password,
            signaling_key,
            self.options.name.as_str(),
            self.signal.url(),
        );
        commit_credentials(&self.storage, &credentials, &message.identity_key_pair).await?;

        let authed = self
            .signal
            .with_credentials(credentials.username(), credentials.password());
        bootstrap_pre_keys(
            &self.storage,
            &authed,
            &message.identity_key_pair,
            self.pre_key_count,
        )
        .await?;

        Ok(credentials)
    }
}

fn decode_body<T: DeserializeOwned>(request: &InboundRequest) -> Result<T, ProvisioningError> {
    serde_json::from_slice(&request.body).map_err(|e| ProvisioningError::MalformedRequest {
        path: request.path.clone(),
        reason: e.to_string(),
    })
}
