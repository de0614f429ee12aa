//! Durable persistence for the channel graph.
//!
//! The engine keeps the graph in memory and writes through a [`GraphStore`].
//! Each mutating call hands the store one batch of [`StoreOp`]s; a store must
//! apply a batch atomically so that a failed call leaves nothing behind.
//!
//! ## Column Families (RocksDB)
//!
//! - `nodes`: content_hash → ChannelNode (bincode)
//! - `settings`: group_id → ChannelSettings (bincode)
//! - `read`: group_id:message_id → ()
//! - `meta`: store format version

use crate::channel::state::{ChannelSettings, LocalState};
use crate::channel::types::MessageRef;
use crate::channel::{ChannelNode, ContentHash};
use crate::error::{ChansyncError, Result};
use crate::storage::{composite_key, BatchOp, RocksDbConfig, RocksDbHandle};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::{info, warn};

/// Column family for channel nodes.
const CF_NODES: &str = "nodes";
/// Column family for local channel settings.
const CF_SETTINGS: &str = "settings";
/// Column family for read flags.
const CF_READ: &str = "read";
/// Column family for store-wide markers.
const CF_META: &str = "meta";

const META_FORMAT: &[u8] = b"format";
/// On-disk layout version written by this build.
const STORE_FORMAT: u32 = 1;

/// One write inside a commit batch.
#[derive(Debug, Clone, Copy)]
pub enum StoreOp<'a> {
    /// Persist an accepted node.
    PutNode(&'a ChannelNode),
    /// Replace a channel's local settings.
    PutSettings(&'a ContentHash, &'a ChannelSettings),
    /// Set or clear a read flag.
    SetRead(MessageRef, bool),
}

/// Everything a store holds, as loaded at startup.
#[derive(Debug, Default)]
pub struct StoredGraph {
    /// Accepted nodes in no particular order.
    pub nodes: Vec<ChannelNode>,
    /// Local settings and read flags.
    pub local: LocalState,
}

/// Durable storage collaborator for the channel graph.
pub trait GraphStore: Send + Sync {
    /// Applies a batch atomically.
    fn commit(&self, ops: &[StoreOp<'_>]) -> Result<()>;

    /// Loads all stored state.
    fn load(&self) -> Result<StoredGraph>;
}

// =============================================================================
// In-memory store
// =============================================================================

#[derive(Default)]
struct MemoryInner {
    nodes: HashMap<ContentHash, ChannelNode>,
    local: LocalState,
}

/// Non-durable store for tests and ephemeral engines.
#[derive(Default)]
pub struct MemoryGraphStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryGraphStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored nodes.
    pub fn node_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .nodes
            .len()
    }
}

impl std::fmt::Debug for MemoryGraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryGraphStore")
            .field("nodes", &self.node_count())
            .finish()
    }
}

impl GraphStore for MemoryGraphStore {
    fn commit(&self, ops: &[StoreOp<'_>]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        for op in ops {
            match op {
                StoreOp::PutNode(node) => {
                    inner.nodes.insert(*node.hash(), (*node).clone());
                }
                StoreOp::PutSettings(id, settings) => {
                    inner.local.settings.insert(**id, (*settings).clone());
                }
                StoreOp::SetRead(message, true) => {
                    inner.local.read.insert(*message);
                }
                StoreOp::SetRead(message, false) => {
                    inner.local.read.remove(message);
                }
            }
        }
        Ok(())
    }

    fn load(&self) -> Result<StoredGraph> {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        Ok(StoredGraph {
            nodes: inner.nodes.values().cloned().collect(),
            local: inner.local.clone(),
        })
    }
}

// =============================================================================
// RocksDB store
// =============================================================================

/// RocksDB-backed store.
#[derive(Debug)]
pub struct RocksGraphStore {
    db: RocksDbHandle,
}

impl RocksGraphStore {
    /// Opens or creates the store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, &RocksDbConfig::default())
    }

    /// Opens or creates the store with custom RocksDB settings.
    pub fn open_with_config(path: impl AsRef<Path>, config: &RocksDbConfig) -> Result<Self> {
        let db = RocksDbHandle::open(
            path.as_ref(),
            config,
            &[CF_NODES, CF_SETTINGS, CF_READ, CF_META],
        )?;

        match db.get::<u32>(CF_META, META_FORMAT)? {
            Some(STORE_FORMAT) => {}
            Some(other) => {
                return Err(ChansyncError::storage(format!(
                    "Unsupported channel store format {} (expected {})",
                    other, STORE_FORMAT
                )))
            }
            None => db.write_batch(&[BatchOp::put(CF_META, META_FORMAT.to_vec(), &STORE_FORMAT)?])?,
        }

        info!(path = %path.as_ref().display(), format = STORE_FORMAT, "Opened channel store");
        Ok(Self { db })
    }
}

fn read_key(message: &MessageRef) -> Vec<u8> {
    composite_key(message.group_id.as_bytes(), message.message_id.as_bytes())
}

fn parse_read_key(key: &[u8]) -> Option<MessageRef> {
    if key.len() != 64 + 1 + 64 || key[64] != b':' {
        return None;
    }
    let mut group = [0u8; 64];
    let mut message = [0u8; 64];
    group.copy_from_slice(&key[..64]);
    message.copy_from_slice(&key[65..]);
    Some(MessageRef::new(
        ContentHash::from_bytes(group),
        ContentHash::from_bytes(message),
    ))
}

fn parse_hash_key(key: &[u8]) -> Option<ContentHash> {
    let bytes: [u8; 64] = key.try_into().ok()?;
    Some(ContentHash::from_bytes(bytes))
}

impl GraphStore for RocksGraphStore {
    fn commit(&self, ops: &[StoreOp<'_>]) -> Result<()> {
        let mut batch = Vec::with_capacity(ops.len());
        for op in ops {
            batch.push(match op {
                StoreOp::PutNode(node) => BatchOp::Put {
                    cf: CF_NODES,
                    key: node.hash().as_bytes().to_vec(),
                    value: node.to_bytes()?,
                },
                StoreOp::PutSettings(id, settings) => {
                    BatchOp::put(CF_SETTINGS, id.as_bytes().to_vec(), *settings)?
                }
                StoreOp::SetRead(message, true) => BatchOp::Put {
                    cf: CF_READ,
                    key: read_key(message),
                    value: Vec::new(),
                },
                StoreOp::SetRead(message, false) => BatchOp::Delete {
                    cf: CF_READ,
                    key: read_key(message),
                },
            });
        }
        self.db.write_batch(&batch)
    }

    fn load(&self) -> Result<StoredGraph> {
        let mut stored = StoredGraph::default();
        let mut corrupt = 0usize;

        self.db.iterate_all(CF_NODES, |key, value| {
            match ChannelNode::from_bytes(value) {
                Ok(node) if node.hash().as_bytes()[..] == *key => stored.nodes.push(node),
                Ok(_) | Err(_) => corrupt += 1,
            }
            true
        })?;

        let mut settings_error: Option<ChansyncError> = None;
        self.db.iterate_all(CF_SETTINGS, |key, value| {
            let Some(id) = parse_hash_key(key) else {
                corrupt += 1;
                return true;
            };
            match bincode::deserialize::<ChannelSettings>(value) {
                Ok(settings) => {
                    stored.local.settings.insert(id, settings);
                    true
                }
                Err(e) => {
                    settings_error = Some(ChansyncError::serialization(format!(
                        "Failed to decode settings for {}: {}",
                        id, e
                    )));
                    false
                }
            }
        })?;
        if let Some(e) = settings_error {
            return Err(e);
        }

        self.db.iterate_all(CF_READ, |key, _| {
            match parse_read_key(key) {
                Some(message) => {
                    stored.local.read.insert(message);
                }
                None => corrupt += 1,
            }
            true
        })?;

        if corrupt > 0 {
            warn!(records = corrupt, "Skipped corrupt records while loading channel store");
        }
        info!(
            nodes = stored.nodes.len(),
            channels_with_settings = stored.local.settings.len(),
            "Loaded channel store"
        );
        Ok(stored)
    }
}
