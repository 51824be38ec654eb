/*!
 * Delivery verification code sealing.
 *
 * A verification code is the base64url encoding of `nonce || ciphertext`
 * where the ciphertext is the AES-256-GCM encryption of a JSON payload
 * binding the code to one delivery, order and client. The sealed form is
 * what gets stored and what the client submits; the plaintext payload never
 * touches the database.
 */

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

use crate::errors::ServiceError;

/// Verification codes stay usable this long after issue.
pub const CODE_TTL_HOURS: i64 = 24;

const NONCE_LEN: usize = 12;

/// Payload sealed inside a delivery verification code.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryCodePayload {
    pub delivery_id: Uuid,
    pub order_id: Uuid,
    pub client_id: Uuid,
    pub issued_at: DateTime<Utc>,
    /// Random value making every issued code unique even for the same
    /// delivery
    pub nonce: u64,
}

impl DeliveryCodePayload {
    pub fn new(delivery_id: Uuid, order_id: Uuid, client_id: Uuid) -> Self {
        Self {
            delivery_id,
            order_id,
            client_id,
            issued_at: Utc::now(),
            nonce: rand::thread_rng().gen(),
        }
    }

    /// The acceptance window is measured from the sealed `issued_at`, which
    /// cannot be tampered with without failing authentication.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.issued_at > Duration::hours(CODE_TTL_HOURS)
    }
}

/// Symmetric key for sealing verification codes, derived from the configured
/// secret with SHA-256.
#[derive(Clone)]
pub struct CodeKey(Key<Aes256Gcm>);

impl CodeKey {
    pub fn derive(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        Self(Key::<Aes256Gcm>::clone_from_slice(&digest))
    }
}

impl fmt::Debug for CodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CodeKey(..)")
    }
}

/// Seal a payload into an opaque verification code.
pub fn seal(payload: &DeliveryCodePayload, key: &CodeKey) -> Result<String, ServiceError> {
    let plaintext = serde_json::to_vec(payload).map_err(|e| {
        ServiceError::InternalError(format!("Failed to encode code payload: {}", e))
    })?;

    let cipher = Aes256Gcm::new(&key.0);
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_ref())
        .map_err(|_| ServiceError::InternalError("Failed to seal verification code".to_string()))?;

    let mut envelope = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    envelope.extend_from_slice(&nonce);
    envelope.extend_from_slice(&ciphertext);

    Ok(URL_SAFE_NO_PAD.encode(envelope))
}

/// Open a sealed verification code. Any decoding or authentication failure
/// maps to `InvalidCode`; callers treat all of them the same way.
pub fn open(code: &str, key: &CodeKey) -> Result<DeliveryCodePayload, ServiceError> {
    let envelope = URL_SAFE_NO_PAD
        .decode(code)
        .map_err(|_| ServiceError::InvalidCode("Verification code is malformed".to_string()))?;

    if envelope.len() <= NONCE_LEN {
        return Err(ServiceError::InvalidCode(
            "Verification code is malformed".to_string(),
        ));
    }

    let (nonce, ciphertext) = envelope.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(&key.0);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| {
            ServiceError::InvalidCode("Verification code failed authentication".to_string())
        })?;

    serde_json::from_slice(&plaintext).map_err(|_| {
        ServiceError::InvalidCode("Verification code payload is malformed".to_string())
    })
}

/// Six-digit doorstep code derived from the delivery and order ids.
///
/// Low assurance by construction: it proves the agent is holding the right
/// parcel, not that the handoff is authentic. The sealed code carries the
/// actual proof.
pub fn short_code(delivery_id: Uuid, order_id: Uuid) -> String {
    format!("{}{}", digit_tail(delivery_id), digit_tail(order_id))
}

fn digit_tail(id: Uuid) -> String {
    let digits: String = id
        .simple()
        .to_string()
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    let start = digits.len().saturating_sub(3);
    format!("{:0>3}", &digits[start..])
}
