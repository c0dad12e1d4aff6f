// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Generation and at-rest sealing of tenant credentials
//!
//! Credentials are regenerated on every provisioning attempt — they are never
//! reused across attempts, so a credential that leaked into the logs of a
//! failed attempt is worthless.  The copy persisted on the tenant record is
//! sealed with ChaCha20-Poly1305 under a key derived (HKDF-SHA3) from the
//! worker's master key, salted per seal and bound to the tenant id so a blob
//! pasted onto another tenant's row fails to open.

use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit};
use emporos_common::api::external::Error;
use hkdf::Hkdf;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use sha3::Sha3_256;
use std::fmt;
use uuid::Uuid;

const PASSWORD_LEN: usize = 24;

/// The per-tenant credentials produced by the credentials pipeline step.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantCredentials {
    pub db_user: String,
    pub db_password: String,
    pub admin_user: String,
    pub admin_password: String,
}

// Keep passwords out of debug logs; log the usernames only.
impl fmt::Debug for TenantCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantCredentials")
            .field("db_user", &self.db_user)
            .field("db_password", &"<redacted>")
            .field("admin_user", &self.admin_user)
            .field("admin_password", &"<redacted>")
            .finish()
    }
}

impl TenantCredentials {
    pub fn generate() -> TenantCredentials {
        TenantCredentials {
            db_user: "store".to_string(),
            db_password: random_password(),
            admin_user: "admin".to_string(),
            admin_password: random_password(),
        }
    }
}

fn random_password() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LEN)
        .map(char::from)
        .collect()
}

/// The sealed form stored on the tenant record, serialized as JSON so the
/// column stays debuggable without being readable.
#[derive(Serialize, Deserialize)]
struct SealedBlob {
    salt: String,
    nonce: String,
    ciphertext: String,
}

/// Seals `credentials` for storage on the tenant record.
pub fn seal_credentials(
    master_key: &[u8; 32],
    tenant_id: &Uuid,
    credentials: &TenantCredentials,
) -> Result<String, Error> {
    let mut salt = [0u8; 32];
    OsRng.fill_bytes(&mut salt);
    let mut nonce = [0u8; 12];
    OsRng.fill_bytes(&mut nonce);

    let cipher = derive_cipher(master_key, &salt, tenant_id);
    let plaintext = serde_json::to_vec(credentials)?;
    let ciphertext =
        cipher.encrypt((&nonce).into(), plaintext.as_slice()).map_err(|_| {
            Error::internal_error("failed to seal tenant credentials")
        })?;

    let blob = SealedBlob {
        salt: hex::encode(salt),
        nonce: hex::encode(nonce),
        ciphertext: hex::encode(ciphertext),
    };
    Ok(serde_json::to_string(&blob)?)
}

/// Opens a blob produced by [`seal_credentials`] for the same tenant.
pub fn unseal_credentials(
    master_key: &[u8; 32],
    tenant_id: &Uuid,
    sealed: &str,
) -> Result<TenantCredentials, Error> {
    let blob: SealedBlob = serde_json::from_str(sealed)?;
    let salt: [u8; 32] = decode_fixed(&blob.salt)?;
    let nonce: [u8; 12] = decode_fixed(&blob.nonce)?;
    let ciphertext = hex::decode(&blob.ciphertext).map_err(|_| {
        Error::internal_error("sealed credentials are not valid hex")
    })?;

    let cipher = derive_cipher(master_key, &salt, tenant_id);
    let plaintext =
        cipher.decrypt((&nonce).into(), ciphertext.as_slice()).map_err(
            |_| Error::internal_error("failed to unseal tenant credentials"),
        )?;
    Ok(serde_json::from_slice(&plaintext)?)
}

fn decode_fixed<const N: usize>(hex_str: &str) -> Result<[u8; N], Error> {
    let bytes = hex::decode(hex_str).map_err(|_| {
        Error::internal_error("sealed credentials are not valid hex")
    })?;
    bytes.try_into().map_err(|_| {
        Error::internal_error("sealed credentials have the wrong length")
    })
}

// Return a cipher bound to this tenant.  The "info" string is context that
// ties the derived key to its purpose.
fn derive_cipher(
    master_key: &[u8; 32],
    salt: &[u8; 32],
    tenant_id: &Uuid,
) -> ChaCha20Poly1305 {
    let prk = Hkdf::<Sha3_256>::new(Some(&salt[..]), master_key);
    let mut key = [0u8; 32];
    prk.expand_multi_info(
        &[b"emporos-tenant-credentials-", tenant_id.as_ref()],
        &mut key,
    )
    .unwrap();
    ChaCha20Poly1305::new(Key::from_slice(&key))
}

#[cfg(test)]
mod test {
    use super::*;

    fn test_key() -> [u8; 32] {
        [7u8; 32]
    }

    #[test]
    fn test_seal_roundtrip() {
        let tenant_id = Uuid::new_v4();
        let creds = TenantCredentials::generate();
        let sealed =
            seal_credentials(&test_key(), &tenant_id, &creds).unwrap();
        assert!(!sealed.contains(&creds.db_password));
        assert!(!sealed.contains(&creds.admin_password));
        let opened =
            unseal_credentials(&test_key(), &tenant_id, &sealed).unwrap();
        assert_eq!(creds, opened);
    }

    #[test]
    fn test_seal_bound_to_tenant() {
        let creds = TenantCredentials::generate();
        let sealed =
            seal_credentials(&test_key(), &Uuid::new_v4(), &creds).unwrap();
        assert!(unseal_credentials(&test_key(), &Uuid::new_v4(), &sealed)
            .is_err());
    }

    #[test]
    fn test_passwords_unique_per_attempt() {
        let a = TenantCredentials::generate();
        let b = TenantCredentials::generate();
        assert_ne!(a.db_password, b.db_password);
        assert_ne!(a.admin_password, b.admin_password);
    }
}
