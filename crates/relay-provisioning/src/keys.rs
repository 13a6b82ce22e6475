//! Credential and key material generated during (re)registration.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use relay_client::{PreKeyEntity, PreKeyUpload, SignedPreKeyEntity};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use x25519_dalek::{PublicKey, StaticSecret};

/// Length of the signaling key cipher half.
pub const SIGNALING_CIPHER_KEY_LEN: usize = 32;

/// Length of the signaling key integrity half.
pub const SIGNALING_MAC_KEY_LEN: usize = 20;

/// Total signaling key length.
pub const SIGNALING_KEY_LEN: usize = SIGNALING_CIPHER_KEY_LEN + SIGNALING_MAC_KEY_LEN;

/// Random bytes behind a generated password.
pub const PASSWORD_BYTES: usize = 16;

/// Registration ids are 14-bit, never zero.
const MAX_REGISTRATION_ID: u32 = 16380;

/// Generate a registration id for a new device.
pub fn generate_registration_id() -> u32 {
    OsRng.gen_range(1..=MAX_REGISTRATION_ID)
}

/// Generate a URL-safe password token from 16 random bytes.
pub fn generate_password() -> String {
    let mut bytes = [0u8; PASSWORD_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a 52 byte signaling key (AES key followed by MAC key).
pub fn generate_signaling_key() -> SignalingKey {
    let mut bytes = [0u8; SIGNALING_KEY_LEN];
    OsRng.fill_bytes(&mut bytes);
    SignalingKey(bytes)
}

/// Symmetric key used to open push payloads.
#[derive(Clone, PartialEq, Eq)]
pub struct SignalingKey([u8; SIGNALING_KEY_LEN]);

impl SignalingKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn cipher_key(&self) -> &[u8] {
        &self.0[..SIGNALING_CIPHER_KEY_LEN]
    }

    pub fn mac_key(&self) -> &[u8] {
        &self.0[SIGNALING_CIPHER_KEY_LEN..]
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    pub fn from_base64(encoded: &str) -> Option<Self> {
        let bytes = STANDARD.decode(encoded).ok()?;
        let bytes: [u8; SIGNALING_KEY_LEN] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Debug for SignalingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SignalingKey(..)")
    }
}

impl Serialize for SignalingKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for SignalingKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Self::from_base64(&encoded)
            .ok_or_else(|| serde::de::Error::custom("signaling key must be 52 base64 bytes"))
    }
}

mod base64_key {
    use super::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("key must be 32 bytes"))
    }
}

/// Long-term identity of an account.
///
/// The private half is an Ed25519 seed; the public half is its verifying key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityKeyPair {
    #[serde(rename = "publicKey", with = "base64_key")]
    public_key: [u8; 32],
    #[serde(rename = "privateKey", with = "base64_key")]
    private_key: [u8; 32],
}

impl IdentityKeyPair {
    /// Generate a fresh identity.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        Self::from_seed(seed)
    }

    /// Rebuild an identity from its private seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        Self {
            public_key: signing_key.verifying_key().to_bytes(),
            private_key: seed,
        }
    }

    pub fn public_key(&self) -> &[u8; 32] {
        &self.public_key
    }

    pub fn public_key_base64(&self) -> String {
        STANDARD.encode(self.public_key)
    }

    /// Short hex fingerprint of the public key for logs.
    pub fn fingerprint(&self) -> String {
        hex::encode(&self.public_key[..8])
    }

    /// Sign a message with the identity key.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        SigningKey::from_bytes(&self.private_key)
            .sign(message)
            .to_bytes()
    }
}

impl fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public_key", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

/// Private half of a generated prekey, kept locally.
#[derive(Clone, Serialize, Deserialize)]
pub struct PreKeyRecord {
    pub key_id: u32,
    #[serde(with = "base64_key")]
    pub public_key: [u8; 32],
    #[serde(with = "base64_key")]
    pub private_key: [u8; 32],
}

impl PreKeyRecord {
    fn generate(key_id: u32) -> Self {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        let secret = StaticSecret::from(seed);
        Self {
            key_id,
            public_key: PublicKey::from(&secret).to_bytes(),
            private_key: secret.to_bytes(),
        }
    }
}

/// Prekeys generated for upload together with their locally kept private halves.
pub struct GeneratedPreKeys {
    pub pre_keys: Vec<PreKeyRecord>,
    pub signed_pre_key: PreKeyRecord,
    pub signature: [u8; 64],
}

impl GeneratedPreKeys {
    /// Generate `count` one-time prekeys and a signed prekey for `identity`.
    pub fn generate(identity: &IdentityKeyPair, count: u32) -> Self {
        let start = OsRng.gen_range(1..0x00ff_0000);
        let pre_keys = (0..count).map(|i| PreKeyRecord::generate(start + i)).collect();
        let signed_pre_key = PreKeyRecord::generate(OsRng.gen_range(1..0x00ff_0000));
        let signature = identity.sign(&signed_pre_key.public_key);

        Self {
            pre_keys,
            signed_pre_key,
            signature,
        }
    }

    /// Public upload body for the message server.
    pub fn upload(&self, identity: &IdentityKeyPair) -> PreKeyUpload {
        PreKeyUpload {
            identity_key: identity.public_key_base64(),
            signed_pre_key: SignedPreKeyEntity {
                key_id: self.signed_pre_key.key_id,
                public_key: STANDARD.encode(self.signed_pre_key.public_key),
                signature: STANDARD.encode(self.signature),
            },
            pre_keys: self
                .pre_keys
                .iter()
                .map(|k| PreKeyEntity {
                    key_id: k.key_id,
                    public_key: STANDARD.encode(k.public_key),
                })
                .collect(),
        }
    }
}
