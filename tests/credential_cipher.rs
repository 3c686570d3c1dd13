//! Credential Cipher Integration Tests
//!
//! Sealing and opening secrets through the public API, including the
//! config-file path where sealed secrets are revealed at connect time.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use termbridge::config::{AuthConfig, parse_config};
use termbridge::crypto::{
    CredentialCipher, CredentialSecrets, PlainSecrets, SecretField, StaticMachineId,
};
use termbridge::error::BridgeError;
use termbridge::ssh::{AuthMethod, ConnectionParams};
use zeroize::Zeroizing;

fn cipher(machine: &str) -> CredentialCipher {
    CredentialCipher::new(StaticMachineId(machine.to_string()))
}

// ============== Round Trip ==============

#[test]
fn test_roundtrip_unicode_and_long_secrets() {
    let cipher = cipher("b1946ac92492d2347c6235b4d2611184");
    for secret in ["p", "correct horse battery staple", "пароль-密码-🔑", &"k".repeat(4096)] {
        let sealed = cipher.encrypt(secret).unwrap();
        assert_eq!(cipher.decrypt(&sealed).unwrap().as_str(), secret);
    }
}

#[test]
fn test_same_plaintext_seals_differently() {
    let cipher = cipher("machine-a");
    let first = cipher.encrypt("hunter2").unwrap();
    let second = cipher.encrypt("hunter2").unwrap();
    assert_ne!(first.ciphertext, second.ciphertext);
    assert_ne!(first.salt, second.salt);
    assert_eq!(STANDARD.decode(&first.salt).unwrap().len(), 16);
}

#[test]
fn test_empty_secret_is_an_empty_field() {
    let cipher = cipher("machine-a");
    let sealed = cipher.encrypt("").unwrap();
    assert!(sealed.is_empty());
    assert_eq!(cipher.decrypt(&sealed).unwrap().as_str(), "");
}

// ============== Failure Modes ==============

#[test]
fn test_other_machine_cannot_open() {
    let sealed = cipher("machine-a").encrypt("hunter2").unwrap();
    let result = cipher("machine-b").decrypt(&sealed);
    assert!(matches!(result, Err(BridgeError::Crypto { .. })));
}

#[test]
fn test_tampered_ciphertext_fails_authentication() {
    let cipher = cipher("machine-a");
    let mut sealed = cipher.encrypt("hunter2").unwrap();
    let mut blob = STANDARD.decode(&sealed.ciphertext).unwrap();
    let last = blob.len() - 1;
    blob[last] ^= 0x01;
    sealed.ciphertext = STANDARD.encode(blob);

    assert!(matches!(
        cipher.decrypt(&sealed),
        Err(BridgeError::Crypto { .. })
    ));
}

#[test]
fn test_half_present_field_is_rejected() {
    let cipher = cipher("machine-a");
    let field = SecretField {
        ciphertext: "AAAA".to_string(),
        salt: String::new(),
    };
    assert!(matches!(
        cipher.decrypt(&field),
        Err(BridgeError::Crypto { .. })
    ));
}

#[test]
fn test_short_ciphertext_is_rejected() {
    let cipher = cipher("machine-a");
    let field = SecretField {
        ciphertext: STANDARD.encode([0u8; 20]),
        salt: STANDARD.encode([0u8; 16]),
    };
    let err = cipher.decrypt(&field).unwrap_err();
    assert!(err.to_string().contains("insufficient ciphertext length"));
}

#[test]
fn test_missing_machine_id_fails_cleanly() {
    let cipher = cipher("");
    assert!(matches!(
        cipher.encrypt("hunter2"),
        Err(BridgeError::Crypto { .. })
    ));
}

// ============== Credential Records ==============

#[test]
fn test_record_seal_and_open() {
    let cipher = cipher("machine-a");
    let plain = PlainSecrets {
        password: Zeroizing::new("pw".to_string()),
        passphrase: Zeroizing::new("phrase".to_string()),
        ..PlainSecrets::default()
    };

    let sealed = CredentialSecrets::seal(&cipher, &plain).unwrap();
    assert!(sealed.private_key.is_empty());

    let json = serde_json::to_string(&sealed).unwrap();
    assert!(!json.contains("private_key"));
    let restored: CredentialSecrets = serde_json::from_str(&json).unwrap();

    let opened = restored.open(&cipher).unwrap();
    assert_eq!(opened.password.as_str(), "pw");
    assert_eq!(opened.passphrase.as_str(), "phrase");
    assert!(opened.private_key.is_empty());
}

#[test]
fn test_sealed_password_in_config_is_revealed_for_connect() {
    let cipher = cipher("machine-a");
    let sealed = cipher.encrypt("s3cret").unwrap();
    let yaml = format!(
        "hosts:\n  web:\n    hostname: 10.0.0.5\n    user: deploy\n    auth:\n      type: password\n      password:\n        ciphertext: \"{}\"\n        salt: \"{}\"\n",
        sealed.ciphertext, sealed.salt
    );

    let config = parse_config(&yaml).unwrap();
    assert!(matches!(config.hosts["web"].auth, AuthConfig::Password { .. }));

    let params = ConnectionParams::from_host(&config.hosts["web"], &config.limits, &cipher).unwrap();
    match params.auth {
        AuthMethod::Password(password) => assert_eq!(password.as_str(), "s3cret"),
        other => panic!("unexpected auth {other:?}"),
    }

    let wrong_machine = ConnectionParams::from_host(
        &config.hosts["web"],
        &config.limits,
        &self::cipher("machine-b"),
    );
    assert!(matches!(wrong_machine, Err(BridgeError::Crypto { .. })));
}
