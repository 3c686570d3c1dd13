//! Per-installation machine identity used as the credential key material

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{BridgeError, Result};

/// Application identifier mixed into the machine id so that other
/// programs reading the same id never see our key material.
pub const APP_ID: &str = "termbridge";

/// Source of a stable machine identifier.
pub trait MachineIdentity: Send + Sync {
    /// Raw machine identifier.
    ///
    /// # Errors
    ///
    /// Returns a description of the failure when the identifier cannot be read.
    fn machine_id(&self) -> std::result::Result<String, String>;
}

/// Reads the operating system's machine id (`/etc/machine-id`,
/// `IOPlatformUUID` or the `MachineGuid` registry value).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMachineId;

impl MachineIdentity for SystemMachineId {
    fn machine_id(&self) -> std::result::Result<String, String> {
        machine_uid::get().map_err(|e| e.to_string())
    }
}

/// Fixed identifier, for tests and for callers that manage their own id.
#[derive(Debug, Clone)]
pub struct StaticMachineId(pub String);

impl MachineIdentity for StaticMachineId {
    fn machine_id(&self) -> std::result::Result<String, String> {
        if self.0.is_empty() {
            return Err("machine id is empty".to_string());
        }
        Ok(self.0.clone())
    }
}

/// Hex HMAC-SHA256 of `app_id` keyed by the raw machine id.
///
/// # Errors
///
/// Returns `BridgeError::Crypto` if the HMAC cannot be keyed.
pub fn protected_id(machine_id: &str, app_id: &str) -> Result<String> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(machine_id.trim().as_bytes())
        .map_err(|e| BridgeError::Crypto {
            reason: format!("HMAC init: {e}"),
        })?;
    mac.update(app_id.as_bytes());
    Ok(const_hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protected_id_is_hex_sha256() {
        let id = protected_id("0123456789abcdef", APP_ID).unwrap();
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_protected_id_depends_on_app_id() {
        assert_ne!(
            protected_id("machine", "termbridge").unwrap(),
            protected_id("machine", "other-app").unwrap()
        );
    }

    #[test]
    fn test_protected_id_ignores_trailing_newline() {
        assert_eq!(
            protected_id("machine\n", APP_ID).unwrap(),
            protected_id("machine", APP_ID).unwrap()
        );
    }

    #[test]
    fn test_static_machine_id_empty_is_error() {
        assert!(StaticMachineId(String::new()).machine_id().is_err());
        assert_eq!(
            StaticMachineId("abc".to_string()).machine_id().unwrap(),
            "abc"
        );
    }
}
