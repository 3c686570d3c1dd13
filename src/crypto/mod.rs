//! Field-level credential encryption at rest

mod cipher;
mod field;
mod machine;

pub use cipher::CredentialCipher;
pub use field::{CredentialSecrets, PlainSecrets, SecretField};
pub use machine::{APP_ID, MachineIdentity, StaticMachineId, SystemMachineId, protected_id};
