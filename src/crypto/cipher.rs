//! Credential Cipher
//!
//! - **Key derivation**: PBKDF2-HMAC-SHA256, 100 000 iterations, over the
//!   protected machine id and a fresh 16-byte salt per encryption
//! - **Encryption**: AES-256-GCM, random 96-bit nonce prepended to the ciphertext
//! - **Storage**: salt and nonce||ciphertext as standard base64

use std::sync::OnceLock;

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use rand::RngCore;
use tracing::{debug, error};
use zeroize::Zeroizing;

use super::field::SecretField;
use super::machine::{APP_ID, MachineIdentity, SystemMachineId, protected_id};
use crate::error::{BridgeError, Result};

const PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// Process-scoped credential cipher keyed by the machine identity.
///
/// The machine id is looked up on first use and the outcome is kept for the
/// lifetime of the value: a failed lookup fails every later call as well.
pub struct CredentialCipher {
    identity: Box<dyn MachineIdentity>,
    key_material: OnceLock<std::result::Result<Zeroizing<String>, String>>,
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCipher")
            .field("initialized", &self.key_material.get().is_some())
            .finish_non_exhaustive()
    }
}

impl CredentialCipher {
    #[must_use]
    pub fn new(identity: impl MachineIdentity + 'static) -> Self {
        Self {
            identity: Box::new(identity),
            key_material: OnceLock::new(),
        }
    }

    /// Cipher keyed by this machine's operating system id.
    #[must_use]
    pub fn system() -> Self {
        Self::new(SystemMachineId)
    }

    fn key_material(&self) -> Result<&str> {
        let cached = self.key_material.get_or_init(|| {
            let id = self.identity.machine_id().map_err(|e| {
                error!(error = %e, "Failed to read machine id, credential encryption unavailable");
                e
            })?;
            protected_id(&id, APP_ID)
                .map(Zeroizing::new)
                .map_err(|e| e.to_string())
        });

        match cached {
            Ok(material) => Ok(material.as_str()),
            Err(reason) => Err(BridgeError::Crypto {
                reason: format!("machine id unavailable: {reason}"),
            }),
        }
    }

    /// Encrypt one secret. Empty plaintext is skipped and yields an empty field.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Crypto` if the machine id is unavailable or
    /// encryption fails.
    pub fn encrypt(&self, plaintext: &str) -> Result<SecretField> {
        if plaintext.is_empty() {
            return Ok(SecretField::default());
        }

        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let key = self.derive_key(&salt)?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let cipher = Aes256Gcm::new_from_slice(key.as_slice()).map_err(|e| BridgeError::Crypto {
            reason: format!("AES init: {e}"),
        })?;
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| BridgeError::Crypto {
                reason: format!("AES encrypt: {e}"),
            })?;

        let mut blob = Vec::with_capacity(NONCE_LEN + sealed.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&sealed);

        debug!(len = plaintext.len(), "Encrypted credential field");
        Ok(SecretField {
            ciphertext: STANDARD.encode(blob),
            salt: STANDARD.encode(salt),
        })
    }

    /// Decrypt one secret. An empty field decrypts to an empty string.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Crypto` if only one of ciphertext and salt is
    /// present, if either is not valid base64, if the ciphertext is too short,
    /// or if authentication fails.
    pub fn decrypt(&self, field: &SecretField) -> Result<Zeroizing<String>> {
        match (field.ciphertext.is_empty(), field.salt.is_empty()) {
            (true, true) => return Ok(Zeroizing::new(String::new())),
            (false, false) => {}
            _ => {
                return Err(BridgeError::Crypto {
                    reason: "ciphertext and salt must both be present".to_string(),
                });
            }
        }

        let salt = STANDARD
            .decode(field.salt.as_bytes())
            .map_err(|e| BridgeError::Crypto {
                reason: format!("bad salt encoding: {e}"),
            })?;
        let blob = STANDARD
            .decode(field.ciphertext.as_bytes())
            .map_err(|e| BridgeError::Crypto {
                reason: format!("bad ciphertext encoding: {e}"),
            })?;

        let key = self.derive_key(&salt)?;
        open(&key, &blob)
    }

    fn derive_key(&self, salt: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        let material = self.key_material()?;
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        pbkdf2::pbkdf2_hmac::<sha2::Sha256>(
            material.as_bytes(),
            salt,
            PBKDF2_ITERATIONS,
            &mut *key,
        );
        Ok(key)
    }
}

fn open(key: &[u8; KEY_LEN], blob: &[u8]) -> Result<Zeroizing<String>> {
    if blob.len() < NONCE_LEN + TAG_LEN {
        return Err(BridgeError::Crypto {
            reason: "insufficient ciphertext length".to_string(),
        });
    }
    let (nonce, sealed) = blob.split_at(NONCE_LEN);

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| BridgeError::Crypto {
        reason: format!("AES init: {e}"),
    })?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| BridgeError::Crypto {
            reason: "authentication failed, wrong machine or corrupted data".to_string(),
        })?;

    String::from_utf8(plaintext)
        .map(Zeroizing::new)
        .map_err(|_| BridgeError::Crypto {
            reason: "decrypted secret is not valid UTF-8".to_string(),
        })
}
