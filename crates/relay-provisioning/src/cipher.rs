//! Ephemeral provisioning cipher.
//!
//! The new device publishes an X25519 public key. The primary device seals the
//! identity to it with its own ephemeral key: the shared secret is expanded
//! with HKDF-SHA256 into an AES-256-GCM key, and the sealed body is
//! `version(1) || nonce(12) || ciphertext`.

use crate::keys::IdentityKeyPair;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};

const ENVELOPE_VERSION: u8 = 1;

/// Nonce size for AES-GCM (96 bits = 12 bytes).
const NONCE_SIZE: usize = 12;

const KDF_INFO: &[u8] = b"TextSecure Provisioning Message";

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u8),

    #[error("envelope too short")]
    Truncated,

    #[error("authentication failed")]
    Authentication,

    #[error("malformed provisioning message: {0}")]
    Message(#[from] serde_json::Error),
}

/// Body of the `/v1/address` request: the link session identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProvisioningUuid {
    pub uuid: String,
}

/// Body of the `/v1/message` request, sealed by the primary device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProvisionEnvelope {
    #[serde(rename = "publicKey")]
    pub public_key: String,
    pub ciphertext: String,
}

/// Plaintext carried inside a [`ProvisionEnvelope`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionMessage {
    #[serde(rename = "addr")]
    pub address: String,
    #[serde(rename = "identityKeyPair")]
    pub identity_key_pair: IdentityKeyPair,
    #[serde(rename = "provisioningCode")]
    pub provisioning_code: String,
}

fn derive_key(secret: &StaticSecret, their_public: &PublicKey) -> Result<[u8; 32], CipherError> {
    let shared = secret.diffie_hellman(their_public);
    if !shared.was_contributory() {
        return Err(CipherError::InvalidPublicKey);
    }

    let mut key = [0u8; 32];
    Hkdf::<Sha256>::new(None, shared.as_bytes())
        .expand(KDF_INFO, &mut key)
        .map_err(|_| CipherError::InvalidPublicKey)?;
    Ok(key)
}

fn decode_public_key(encoded: &str) -> Result<PublicKey, CipherError> {
    let bytes: [u8; 32] = STANDARD
        .decode(encoded)?
        .try_into()
        .map_err(|_| CipherError::InvalidPublicKey)?;
    Ok(PublicKey::from(bytes))
}

fn random_secret() -> StaticSecret {
    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    StaticSecret::from(seed)
}

/// Ephemeral keypair owned by a single linking attempt.
pub struct ProvisioningCipher {
    secret: StaticSecret,
    public: PublicKey,
}

impl ProvisioningCipher {
    pub fn new() -> Self {
        let secret = random_secret();
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key(&self) -> &[u8; 32] {
        self.public.as_bytes()
    }

    pub fn public_key_base64(&self) -> String {
        STANDARD.encode(self.public.as_bytes())
    }

    /// Open an envelope sealed to this cipher's public key.
    pub fn decrypt(&self, envelope: &ProvisionEnvelope) -> Result<ProvisionMessage, CipherError> {
        let their_public = decode_public_key(&envelope.public_key)?;
        let data = STANDARD.decode(&envelope.ciphertext)?;

        let (&version, rest) = data.split_first().ok_or(CipherError::Truncated)?;
        if version != ENVELOPE_VERSION {
            return Err(CipherError::UnsupportedVersion(version));
        }
        if rest.len() < NONCE_SIZE {
            return Err(CipherError::Truncated);
        }

        let key = derive_key(&self.secret, &their_public)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let nonce = Nonce::from_slice(&rest[..NONCE_SIZE]);
        let plaintext = cipher
            .decrypt(nonce, &rest[NONCE_SIZE..])
            .map_err(|_| CipherError::Authentication)?;

        Ok(serde_json::from_slice(&plaintext)?)
    }
}

impl Default for ProvisioningCipher {
    fn default() -> Self {
        Self::new()
    }
}

/// Seal `message` to a new device's provisioning public key.
///
/// This is the primary device's half of the exchange.
pub fn encrypt_for(
    recipient_public_key: &str,
    message: &ProvisionMessage,
) -> Result<ProvisionEnvelope, CipherError> {
    let recipient = decode_public_key(recipient_public_key)?;
    let secret = random_secret();
    let key = derive_key(&secret, &recipient)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let plaintext = serde_json::to_vec(message)?;
    let sealed = cipher
        .encrypt(nonce, plaintext.as_ref())
        .map_err(|_| CipherError::Authentication)?;

    let mut data = Vec::with_capacity(1 + NONCE_SIZE + sealed.len());
    data.push(ENVELOPE_VERSION);
    data.extend_from_slice(&nonce_bytes);
    data.extend(sealed);

    Ok(ProvisionEnvelope {
        public_key: STANDARD.encode(PublicKey::from(&secret).as_bytes()),
        ciphertext: STANDARD.encode(data),
    })
}
