//! Identity and key model.
//!
//! - [`keys`]: ML-DSA-87 verifying keys, key pairs and detached signatures
//! - [`keyring`]: the [`Keyring`] custody trait and the [`LocalKeyring`] implementation

pub mod keyring;
pub mod keys;

pub use keyring::{KeyRole, Keyring, LocalKeyring};
pub use keys::{IdentityId, KeyPair, Signature, VerifyingKey};
