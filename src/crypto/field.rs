use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::CredentialCipher;
use crate::error::Result;

/// Durable form of one secret: base64 `nonce || ciphertext` plus base64 salt.
///
/// Both strings are empty (no secret) or both are present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretField {
    #[serde(default)]
    pub ciphertext: String,
    #[serde(default)]
    pub salt: String,
}

impl SecretField {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ciphertext.is_empty() && self.salt.is_empty()
    }
}

/// Plaintext secrets of one credential record. Only lives in memory.
#[derive(Default)]
pub struct PlainSecrets {
    pub password: Zeroizing<String>,
    pub private_key: Zeroizing<String>,
    pub passphrase: Zeroizing<String>,
}

impl std::fmt::Debug for PlainSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlainSecrets")
            .field("password", &!self.password.is_empty())
            .field("private_key", &!self.private_key.is_empty())
            .field("passphrase", &!self.passphrase.is_empty())
            .finish()
    }
}

/// The three sealed secret fields of one credential record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSecrets {
    #[serde(default, skip_serializing_if = "SecretField::is_empty")]
    pub password: SecretField,
    #[serde(default, skip_serializing_if = "SecretField::is_empty")]
    pub private_key: SecretField,
    #[serde(default, skip_serializing_if = "SecretField::is_empty")]
    pub passphrase: SecretField,
}

impl CredentialSecrets {
    /// Encrypt each non-empty secret independently, each with its own salt.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Crypto` if any field fails to encrypt.
    pub fn seal(cipher: &CredentialCipher, plain: &PlainSecrets) -> Result<Self> {
        Ok(Self {
            password: cipher.encrypt(&plain.password)?,
            private_key: cipher.encrypt(&plain.private_key)?,
            passphrase: cipher.encrypt(&plain.passphrase)?,
        })
    }

    /// Decrypt each present field. Empty fields come back as empty strings.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Crypto` if any present field is malformed or
    /// fails authentication.
    pub fn open(&self, cipher: &CredentialCipher) -> Result<PlainSecrets> {
        Ok(PlainSecrets {
            password: cipher.decrypt(&self.password)?,
            private_key: cipher.decrypt(&self.private_key)?,
            passphrase: cipher.decrypt(&self.passphrase)?,
        })
    }
}
