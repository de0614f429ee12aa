//! Key custody for identities and channel keys.
//!
//! The [`Keyring`] trait is the only way the engine reaches secret key
//! material: it asks the keyring to sign a content hash with a key named by its
//! [`IdentityId`]. Holding a channel's admin key grants admin rights; holding
//! its publish key grants publish rights.

use crate::dag::ContentHash;
use crate::error::{ChansyncError, Result};
use crate::identity::keys::{IdentityId, KeyPair, Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// What a stored key is used for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyRole {
    /// A named author identity.
    Identity(String),
    /// Admin key of a channel (edits, key sharing).
    ChannelAdmin,
    /// Publish key of a channel (posts).
    ChannelPublish,
}

/// Signing and key custody collaborator.
pub trait Keyring: Send + Sync {
    /// Generates and stores a new key pair, returning its verifying half.
    fn generate_key(&self, role: KeyRole) -> Result<VerifyingKey>;

    /// Stores an externally obtained key pair.
    fn import_pair(&self, role: KeyRole, pair: KeyPair) -> Result<()>;

    /// Forgets a held key pair. Unknown ids are ignored.
    fn remove_key(&self, id: &IdentityId) -> Result<()>;

    /// Returns a copy of a held key pair, for handing keys to trusted peers.
    fn export_pair(&self, id: &IdentityId) -> Result<KeyPair>;

    /// Returns true if the secret half of this key is held locally.
    fn holds_key(&self, id: &IdentityId) -> bool;

    /// Returns true if `id` names a locally owned author identity.
    fn owns_identity(&self, id: &IdentityId) -> bool;

    /// Returns the verifying key for a held key.
    fn verifying_key(&self, id: &IdentityId) -> Option<VerifyingKey>;

    /// Signs a content hash with a held key.
    fn sign(&self, id: &IdentityId, hash: &ContentHash) -> Result<Signature>;

    /// Lists owned author identities with their names.
    fn identities(&self) -> Vec<(IdentityId, String)>;
}

#[derive(Clone)]
struct KeyEntry {
    role: KeyRole,
    pair: KeyPair,
}

/// On-disk form of one key entry.
#[derive(Serialize, Deserialize)]
struct StoredKey {
    role: KeyRole,
    public: Vec<u8>,
    secret: Vec<u8>,
}

/// In-process keyring, optionally persisted to a single bincode file.
#[derive(Default)]
pub struct LocalKeyring {
    entries: RwLock<HashMap<IdentityId, KeyEntry>>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for LocalKeyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.read_entries().len();
        f.debug_struct("LocalKeyring")
            .field("keys", &count)
            .field("path", &self.path)
            .finish()
    }
}

impl LocalKeyring {
    /// Creates an empty, memory-only keyring.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a keyring file, creating an empty keyring if it does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut entries = HashMap::new();

        if path.exists() {
            let bytes = Zeroizing::new(fs::read(&path)?);
            let stored: Vec<StoredKey> = bincode::deserialize(&bytes).map_err(|e| {
                ChansyncError::serialization(format!("Failed to read keyring: {}", e))
            })?;
            for key in stored {
                let secret = Zeroizing::new(key.secret);
                let pair = KeyPair::from_parts(&key.public, &secret)?;
                entries.insert(
                    pair.public().id(),
                    KeyEntry {
                        role: key.role,
                        pair,
                    },
                );
            }
            info!(path = %path.display(), keys = entries.len(), "Loaded keyring");
        }

        Ok(Self {
            entries: RwLock::new(entries),
            path: Some(path),
        })
    }

    /// Number of key pairs held, of every role.
    pub fn key_count(&self) -> usize {
        self.read_entries().len()
    }

    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, HashMap<IdentityId, KeyEntry>> {
        self.entries.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_entries(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<IdentityId, KeyEntry>> {
        self.entries.write().unwrap_or_else(|p| p.into_inner())
    }

    fn insert(&self, role: KeyRole, pair: KeyPair) -> Result<()> {
        let mut entries = self.write_entries();
        let id = pair.public().id();
        let previous = entries.insert(id, KeyEntry { role, pair });
        if let Err(e) = self.persist(&entries) {
            match previous {
                Some(old) => entries.insert(id, old),
                None => entries.remove(&id),
            };
            return Err(e);
        }
        debug!(key = %id, "Stored key");
        Ok(())
    }

    fn persist(&self, entries: &HashMap<IdentityId, KeyEntry>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let stored: Vec<StoredKey> = entries
            .values()
            .map(|entry| StoredKey {
                role: entry.role.clone(),
                public: entry.pair.public().as_bytes().to_vec(),
                secret: entry.pair.secret_bytes().to_vec(),
            })
            .collect();
        let bytes = Zeroizing::new(bincode::serialize(&stored).map_err(|e| {
            ChansyncError::serialization(format!("Failed to encode keyring: {}", e))
        })?);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &*bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl Keyring for LocalKeyring {
    fn generate_key(&self, role: KeyRole) -> Result<VerifyingKey> {
        let pair = KeyPair::generate();
        let public = pair.public().clone();
        self.insert(role, pair)?;
        Ok(public)
    }

    fn import_pair(&self, role: KeyRole, pair: KeyPair) -> Result<()> {
        if self.holds_key(&pair.public().id()) {
            return Ok(());
        }
        self.insert(role, pair)
    }

    fn remove_key(&self, id: &IdentityId) -> Result<()> {
        let mut entries = self.write_entries();
        let Some(removed) = entries.remove(id) else {
            return Ok(());
        };
        if let Err(e) = self.persist(&entries) {
            entries.insert(*id, removed);
            return Err(e);
        }
        debug!(key = %id, "Removed key");
        Ok(())
    }

    fn export_pair(&self, id: &IdentityId) -> Result<KeyPair> {
        self.read_entries()
            .get(id)
            .map(|entry| entry.pair.clone())
            .ok_or_else(|| ChansyncError::permission(format!("Key {} is not held", id)))
    }

    fn holds_key(&self, id: &IdentityId) -> bool {
        self.read_entries().contains_key(id)
    }

    fn owns_identity(&self, id: &IdentityId) -> bool {
        matches!(
            self.read_entries().get(id),
            Some(KeyEntry {
                role: KeyRole::Identity(_),
                ..
            })
        )
    }

    fn verifying_key(&self, id: &IdentityId) -> Option<VerifyingKey> {
        self.read_entries()
            .get(id)
            .map(|entry| entry.pair.public().clone())
    }

    fn sign(&self, id: &IdentityId, hash: &ContentHash) -> Result<Signature> {
        let entries = self.read_entries();
        let entry = entries
            .get(id)
            .ok_or_else(|| ChansyncError::permission(format!("Key {} is not held", id)))?;
        entry.pair.sign(hash)
    }

    fn identities(&self) -> Vec<(IdentityId, String)> {
        let mut identities: Vec<(IdentityId, String)> = self
            .read_entries()
            .iter()
            .filter_map(|(id, entry)| match &entry.role {
                KeyRole::Identity(name) => Some((*id, name.clone())),
                _ => None,
            })
            .collect();
        identities.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
        identities
    }
}
