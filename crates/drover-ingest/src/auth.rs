use base64::Engine as _;
use drover_store::{DeviceRow, Store};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::info;

use crate::error::IngestError;

const HASH_VERSION: &str = "v1";
const FINGERPRINT_HEX_LEN: usize = 16;

/// Mint a fresh bearer secret: 32 random bytes, URL-safe base64.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Short indexed fingerprint of a secret for O(1) row lookup.
/// Not a credential: the full secret is always verified against the hash.
pub fn token_fingerprint(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    hex::encode(digest)[..FINGERPRINT_HEX_LEN].to_string()
}

/// Salted hash of a bearer secret: `v1$<salt_hex>$<sha256(salt || secret)_hex>`.
pub fn hash_secret(secret: &str) -> String {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let digest = salted_digest(&salt, secret);
    format!("{HASH_VERSION}${}${}", hex::encode(salt), hex::encode(digest))
}

/// Constant-time verification of a secret against a stored hash.
pub fn verify_secret(secret: &str, stored: &str) -> bool {
    let mut parts = stored.split('$');
    let (Some(version), Some(salt_hex), Some(digest_hex), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    if version != HASH_VERSION {
        return false;
    }
    let (Ok(salt), Ok(expected)) = (hex::decode(salt_hex), hex::decode(digest_hex)) else {
        return false;
    };
    let actual = salted_digest(&salt, secret);
    actual.as_slice().ct_eq(expected.as_slice()).into()
}

fn salted_digest(salt: &[u8], secret: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(secret.as_bytes());
    hasher.finalize().to_vec()
}

/// Resolve a device from its bearer secret.
///
/// Point lookup by fingerprint first; rows predating the fingerprint column
/// are scanned as a fallback and backfilled on their first match. Every
/// failure collapses into the same opaque [`IngestError::Unauthorized`].
pub async fn authenticate_device(
    store: &dyn Store,
    secret: &str,
) -> Result<DeviceRow, IngestError> {
    if secret.is_empty() {
        return Err(IngestError::Unauthorized);
    }

    let fingerprint = token_fingerprint(secret);
    if let Some(device) = store.get_device_by_token_id(&fingerprint).await? {
        if verify_secret(secret, &device.token_hash) {
            return Ok(device);
        }
        return Err(IngestError::Unauthorized);
    }

    // Legacy rows without a fingerprint: verify against each, then backfill.
    for device in store.list_devices_missing_token_id().await? {
        if verify_secret(secret, &device.token_hash) {
            store.set_device_token_id(&device.id, &fingerprint).await?;
            info!(device_id = %device.id, "backfilled token fingerprint on legacy device");
            let mut device = device;
            device.token_id = Some(fingerprint);
            return Ok(device);
        }
    }

    Err(IngestError::Unauthorized)
}
