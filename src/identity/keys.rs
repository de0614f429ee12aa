//! ML-DSA-87 key material and detached signatures.
//!
//! Every signed channel node is signed over its [`ContentHash`], which is the
//! SHA3-512 digest of the bincode-encoded content. Verifying a node therefore
//! only needs the hash and the verifying key carried inside the content.

use crate::dag::ContentHash;
use crate::error::{ChansyncError, Result};
use pqcrypto_mldsa::mldsa87;
use pqcrypto_traits::sign::{DetachedSignature as _, PublicKey as _, SecretKey as _};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Stable 32-byte identifier of a key: SHA3-256 over the verifying key bytes.
///
/// Author identities and channel keys are both addressed by this value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityId([u8; 32]);

impl IdentityId {
    /// Creates an identifier from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the hex-encoded identifier.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a hex-encoded identifier.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| ChansyncError::validation(format!("Invalid identity hex: {}", e)))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ChansyncError::validation("Identity id must be 32 bytes"))?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A public ML-DSA-87 verifying key.
#[derive(Clone, Serialize, Deserialize)]
pub struct VerifyingKey {
    bytes: Vec<u8>,
}

impl PartialEq for VerifyingKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes.len() == other.bytes.len() && bool::from(self.bytes.ct_eq(&other.bytes))
    }
}

impl Eq for VerifyingKey {}

impl fmt::Debug for VerifyingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifyingKey")
            .field("id", &self.id())
            .field("size", &self.bytes.len())
            .finish()
    }
}

impl VerifyingKey {
    /// Reconstructs a verifying key, rejecting bytes of the wrong shape.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        mldsa87::PublicKey::from_bytes(bytes)
            .map_err(|_| ChansyncError::signature("Invalid ML-DSA-87 public key bytes"))?;
        Ok(Self {
            bytes: bytes.to_vec(),
        })
    }

    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the identifier of this key.
    pub fn id(&self) -> IdentityId {
        let digest = Sha3_256::digest(&self.bytes);
        let mut id = [0u8; 32];
        id.copy_from_slice(&digest);
        IdentityId(id)
    }

    /// Verifies a detached signature over a content hash.
    pub fn verify(&self, hash: &ContentHash, signature: &Signature) -> Result<()> {
        let public_key = mldsa87::PublicKey::from_bytes(&self.bytes)
            .map_err(|_| ChansyncError::signature("Invalid ML-DSA-87 public key bytes"))?;
        let detached = mldsa87::DetachedSignature::from_bytes(&signature.0)
            .map_err(|_| ChansyncError::signature("Malformed ML-DSA-87 signature"))?;

        mldsa87::verify_detached_signature(&detached, hash.as_bytes(), &public_key)
            .map_err(|_| ChansyncError::signature("Signature verification failed"))
    }
}

/// A detached ML-DSA-87 signature.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(Vec<u8>);

impl Signature {
    /// Wraps raw signature bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the raw signature bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({} bytes)", self.0.len())
    }
}

/// A verifying key together with its secret signing half.
///
/// The secret bytes are wiped from memory when the pair is dropped.
#[derive(Clone)]
pub struct KeyPair {
    public: VerifyingKey,
    secret: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Generates a fresh ML-DSA-87 key pair using the library's internal CSPRNG.
    pub fn generate() -> Self {
        let (public_key, secret_key) = mldsa87::keypair();
        Self {
            public: VerifyingKey {
                bytes: public_key.as_bytes().to_vec(),
            },
            secret: Zeroizing::new(secret_key.as_bytes().to_vec()),
        }
    }

    /// Restores a pair from stored bytes.
    pub fn from_parts(public: &[u8], secret: &[u8]) -> Result<Self> {
        let public = VerifyingKey::from_bytes(public)?;
        mldsa87::SecretKey::from_bytes(secret)
            .map_err(|_| ChansyncError::signature("Invalid ML-DSA-87 secret key bytes"))?;
        Ok(Self {
            public,
            secret: Zeroizing::new(secret.to_vec()),
        })
    }

    /// Returns the verifying half.
    pub fn public(&self) -> &VerifyingKey {
        &self.public
    }

    /// Returns the secret key bytes.
    pub fn secret_bytes(&self) -> &[u8] {
        &self.secret
    }

    /// Signs a content hash.
    pub fn sign(&self, hash: &ContentHash) -> Result<Signature> {
        let secret_key = mldsa87::SecretKey::from_bytes(&self.secret)
            .map_err(|_| ChansyncError::signature("Invalid ML-DSA-87 secret key bytes"))?;
        let detached = mldsa87::detached_sign(hash.as_bytes(), &secret_key);
        Ok(Signature(detached.as_bytes().to_vec()))
    }
}
