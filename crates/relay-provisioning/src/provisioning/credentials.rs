//! Account credentials and the clear-then-install commit shared by both flows.

use crate::keys::{GeneratedPreKeys, IdentityKeyPair, SignalingKey};
use crate::storage::{Storage, StorageError};
use relay_client::{RelayClientError, SignalServiceClient};
use std::fmt;
use tracing::{debug, info, instrument};

/// Keys of the `state` namespace written by a commit.
pub mod state_keys {
    pub const ADDRESS: &str = "addr";
    pub const SERVER_URL: &str = "serverUrl";
    pub const DEVICE_ID: &str = "deviceId";
    pub const NAME: &str = "name";
    pub const USERNAME: &str = "username";
    pub const PASSWORD: &str = "password";
    pub const REGISTRATION_ID: &str = "registration_id";
    pub const SIGNALING_KEY: &str = "signalingKey";

    pub const ALL: [&str; 8] = [
        ADDRESS,
        SERVER_URL,
        DEVICE_ID,
        NAME,
        USERNAME,
        PASSWORD,
        REGISTRATION_ID,
        SIGNALING_KEY,
    ];
}

/// Credentials of this device, persisted as one unit.
#[derive(Clone, PartialEq, Eq)]
pub struct AccountCredentials {
    address: String,
    device_id: u32,
    registration_id: u32,
    password: String,
    signaling_key: SignalingKey,
    name: String,
    server_url: String,
    username: String,
}

impl AccountCredentials {
    pub fn new(
        address: impl Into<String>,
        device_id: u32,
        registration_id: u32,
        password: impl Into<String>,
        signaling_key: SignalingKey,
        name: impl Into<String>,
        server_url: impl Into<String>,
    ) -> Self {
        let address = address.into();
        let username = format!("{}.{}", address, device_id);
        Self {
            address,
            device_id,
            registration_id,
            password: password.into(),
            signaling_key,
            name: name.into(),
            server_url: server_url.into(),
            username,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    pub fn registration_id(&self) -> u32 {
        self.registration_id
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn signaling_key(&self) -> &SignalingKey {
        &self.signaling_key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// `<address>.<deviceId>`, the message server login.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Read the committed credentials back. `None` unless every field is present.
    pub async fn load(storage: &Storage) -> Result<Option<Self>, StorageError> {
        use state_keys::*;

        let Some(address) = storage.get_state::<String>(ADDRESS).await? else {
            return Ok(None);
        };
        let server_url = storage.get_state::<String>(SERVER_URL).await?;
        let device_id = storage.get_state::<u32>(DEVICE_ID).await?;
        let name = storage.get_state::<String>(NAME).await?;
        let username = storage.get_state::<String>(USERNAME).await?;
        let password = storage.get_state::<String>(PASSWORD).await?;
        let registration_id = storage.get_state::<u32>(REGISTRATION_ID).await?;
        let signaling_key = storage.get_state::<SignalingKey>(SIGNALING_KEY).await?;

        let (
            Some(server_url),
            Some(device_id),
            Some(name),
            Some(username),
            Some(password),
            Some(registration_id),
            Some(signaling_key),
        ) = (
            server_url,
            device_id,
            name,
            username,
            password,
            registration_id,
            signaling_key,
        )
        else {
            return Ok(None);
        };

        Ok(Some(Self {
            address,
            device_id,
            registration_id,
            password,
            signaling_key,
            name,
            server_url,
            username,
        }))
    }
}

impl fmt::Debug for AccountCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountCredentials")
            .field("address", &self.address)
            .field("device_id", &self.device_id)
            .field("registration_id", &self.registration_id)
            .field("name", &self.name)
            .field("server_url", &self.server_url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Replace all local identity state with `credentials` and `identity`.
///
/// Phase one clears the session store, the prekeys, our identity and any
/// trusted identity of the address. Phase two runs only if phase one succeeded.
#[instrument(skip_all, fields(username = %credentials.username()))]
pub async fn commit_credentials(
    storage: &Storage,
    credentials: &AccountCredentials,
    identity: &IdentityKeyPair,
) -> Result<(), StorageError> {
    clear_identity_state(storage, credentials.address()).await?;
    install_credentials(storage, credentials, identity).await?;
    info!(
        fingerprint = %identity.fingerprint(),
        "Committed account credentials"
    );
    Ok(())
}

async fn clear_identity_state(storage: &Storage, address: &str) -> Result<(), StorageError> {
    storage.clear_session_store().await?;
    storage.clear_pre_keys().await?;
    storage.remove_our_identity().await?;
    storage.remove_identity(address).await?;
    debug!(address = %address, "Cleared previous identity state");
    Ok(())
}

async fn install_credentials(
    storage: &Storage,
    credentials: &AccountCredentials,
    identity: &IdentityKeyPair,
) -> Result<(), StorageError> {
    use state_keys::*;

    storage
        .save_identity(credentials.address(), identity.public_key())
        .await?;
    storage.save_our_identity(identity).await?;

    storage.put_state(ADDRESS, credentials.address()).await?;
    storage.put_state(SERVER_URL, credentials.server_url()).await?;
    storage.put_state(DEVICE_ID, &credentials.device_id()).await?;
    storage.put_state(NAME, credentials.name()).await?;
    storage.put_state(USERNAME, credentials.username()).await?;
    storage.put_state(PASSWORD, credentials.password()).await?;
    storage
        .put_state(REGISTRATION_ID, &credentials.registration_id())
        .await?;
    storage
        .put_state(SIGNALING_KEY, credentials.signaling_key())
        .await?;
    Ok(())
}

/// Errors while generating and uploading the initial prekeys.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Upload(#[from] RelayClientError),
}

/// Generate prekeys for `identity`, keep their private halves and upload the bundle.
#[instrument(skip_all, fields(count))]
pub async fn bootstrap_pre_keys(
    storage: &Storage,
    client: &SignalServiceClient,
    identity: &IdentityKeyPair,
    count: u32,
) -> Result<(), BootstrapError> {
    let generated = GeneratedPreKeys::generate(identity, count);

    for record in &generated.pre_keys {
        storage.store_pre_key(record).await?;
    }
    storage
        .store_signed_pre_key(&generated.signed_pre_key)
        .await?;

    client.register_keys(&generated.upload(identity)).await?;
    info!(count, "Uploaded prekeys");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_signaling_key;
    use crate::storage::{
        CredentialStore, MemoryBacking, MockCredentialStore, NS_OUR_IDENTITY, NS_PRE_KEY,
        NS_SESSION, NS_SIGNED_PRE_KEY, NS_STATE, NS_THEIR_IDENTITY,
    };
    use mockall::Sequence;
    use std::sync::Arc;

    fn credentials() -> AccountCredentials {
        AccountCredentials::new(
            "user-1",
            2,
            77,
            "secret",
            generate_signaling_key(),
            "worker",
            "https://textsecure.example.com",
        )
    }

    #[test]
    fn test_username_is_address_dot_device() {
        assert_eq!(credentials().username(), "user-1.2");
    }

    #[test]
    fn test_debug_hides_secrets() {
        let debug = format!("{:?}", credentials());
        assert!(debug.contains("user-1.2"));
        assert!(!debug.contains("secret"));
    }

    #[tokio::test]
    async fn test_commit_replaces_previous_state() {
        let backing = Arc::new(MemoryBacking::new());
        let storage = Storage::new(backing.clone());

        backing.set(NS_SESSION, "user-9.1", b"old").await.unwrap();
        backing.set(NS_THEIR_IDENTITY, "user-1", b"\"stale\"").await.unwrap();
        backing.set(NS_THEIR_IDENTITY, "user-9", b"\"keep\"").await.unwrap();
        let previous = IdentityKeyPair::generate();
        storage.save_our_identity(&previous).await.unwrap();
        let old_keys = GeneratedPreKeys::generate(&previous, 4);
        for record in &old_keys.pre_keys {
            storage.store_pre_key(record).await.unwrap();
        }
        storage
            .store_signed_pre_key(&old_keys.signed_pre_key)
            .await
            .unwrap();

        let credentials = credentials();
        let identity = IdentityKeyPair::generate();
        commit_credentials(&storage, &credentials, &identity).await.unwrap();

        assert!(backing.keys(NS_SESSION).await.unwrap().is_empty());
        assert!(storage.backing().keys(NS_PRE_KEY).await.unwrap().is_empty());
        assert!(storage.backing().keys(NS_SIGNED_PRE_KEY).await.unwrap().is_empty());
        assert_eq!(storage.get_our_identity().await.unwrap(), Some(identity.clone()));
        assert_eq!(
            storage.get_identity("user-1").await.unwrap(),
            Some(identity.public_key_base64())
        );
        assert!(backing.has(NS_THEIR_IDENTITY, "user-9").await.unwrap());

        let mut keys = backing.keys(NS_STATE).await.unwrap();
        keys.sort();
        let mut expected: Vec<String> = state_keys::ALL.iter().map(|k| k.to_string()).collect();
        expected.sort();
        assert_eq!(keys, expected);

        let loaded = AccountCredentials::load(&storage).await.unwrap().unwrap();
        assert_eq!(loaded, credentials);
    }

    #[tokio::test]
    async fn test_load_requires_every_field() {
        let storage = Storage::memory();
        assert!(AccountCredentials::load(&storage).await.unwrap().is_none());

        storage.put_state(state_keys::ADDRESS, "user-1").await.unwrap();
        assert!(AccountCredentials::load(&storage).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_clear_writes_nothing() {
        let mut store = MockCredentialStore::new();
        store
            .expect_clear()
            .times(1)
            .returning(|_| Err(StorageError::Encryption("disk on fire".into())));
        store.expect_remove().never();
        store.expect_set().never();

        let storage = Storage::new(Arc::new(store));
        let result =
            commit_credentials(&storage, &credentials(), &IdentityKeyPair::generate()).await;

        assert!(matches!(result, Err(StorageError::Encryption(_))));
    }

    #[tokio::test]
    async fn test_clear_happens_before_any_write() {
        let mut seq = Sequence::new();
        let mut store = MockCredentialStore::new();
        for namespace in [NS_SESSION, NS_PRE_KEY, NS_SIGNED_PRE_KEY] {
            store
                .expect_clear()
                .withf(move |ns| ns == namespace)
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Ok(()));
        }
        store
            .expect_remove()
            .withf(|ns, _| ns == NS_OUR_IDENTITY)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        store
            .expect_remove()
            .withf(|ns, key| ns == NS_THEIR_IDENTITY && key == "user-1")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        store
            .expect_set()
            .times(10)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));

        let storage = Storage::new(Arc::new(store));
        commit_credentials(&storage, &credentials(), &IdentityKeyPair::generate())
            .await
            .unwrap();
    }
}
