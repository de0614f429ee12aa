//! Channel-specific value types.
//!
//! - `NodeType`: discriminator carried in every signed node content
//! - `CircleType` / `CircleId`: visibility rule of a channel
//! - `VoteType`, `FileRef`, `FileHash`, `Image`, `PeerId`, `MessageRef`
//!
//! For the generic DAG types like `ContentHash`, see the `dag` module.

use crate::error::{ChansyncError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use crate::dag::{current_timestamp_millis, ContentHash};
pub use crate::identity::IdentityId;

/// Type discriminator for channel nodes.
///
/// Included in the hashed content so that two node kinds with the same field
/// values never share an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum NodeType {
    /// Channel genesis: creates the group and fixes its keys.
    ChannelGenesis = 1,
    /// Metadata edit of an existing channel.
    ChannelEdit = 2,
    /// Post in a channel.
    Post = 3,
    /// Comment on a post or on another comment.
    Comment = 4,
    /// Up/down vote on a comment.
    Vote = 5,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeType::ChannelGenesis => write!(f, "ChannelGenesis"),
            NodeType::ChannelEdit => write!(f, "ChannelEdit"),
            NodeType::Post => write!(f, "Post"),
            NodeType::Comment => write!(f, "Comment"),
            NodeType::Vote => write!(f, "Vote"),
        }
    }
}

/// Visibility rule of a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircleType {
    /// Anyone may read the channel. No circle id.
    #[default]
    Public,
    /// Restricted to a defined circle of identities.
    External,
    /// Restricted to a local group of friend nodes.
    NodesGroup,
}

impl CircleType {
    /// Returns true if this rule requires an accompanying circle id.
    pub fn requires_circle_id(&self) -> bool {
        !matches!(self, CircleType::Public)
    }
}

impl fmt::Display for CircleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircleType::Public => write!(f, "public"),
            CircleType::External => write!(f, "external"),
            CircleType::NodesGroup => write!(f, "nodes-group"),
        }
    }
}

impl std::str::FromStr for CircleType {
    type Err = ChansyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "public" => Ok(CircleType::Public),
            "external" => Ok(CircleType::External),
            "nodes-group" | "nodes_group" => Ok(CircleType::NodesGroup),
            other => Err(ChansyncError::validation(format!(
                "Unknown circle type '{}'",
                other
            ))),
        }
    }
}

/// Identifier of a circle or of a local friend group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CircleId(pub String);

impl CircleId {
    /// Creates a circle id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for CircleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Value of a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteType {
    Up,
    Down,
}

impl fmt::Display for VoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteType::Up => write!(f, "up"),
            VoteType::Down => write!(f, "down"),
        }
    }
}

/// SHA3-256 hash of a shared file's contents.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileHash([u8; 32]);

impl FileHash {
    /// Creates a file hash from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the hex-encoded hash.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a hex-encoded file hash.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| ChansyncError::validation(format!("Invalid file hash hex: {}", e)))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ChansyncError::validation("File hash must be 32 bytes"))?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for FileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for FileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A file referenced from a post's file list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub hash: FileHash,
    pub name: String,
    pub size: u64,
}

/// Thumbnail or channel image bytes.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub data: Vec<u8>,
}

impl Image {
    /// Wraps raw image bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Returns true if no image data is present.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Image({} bytes)", self.data.len())
    }
}

/// Identifier of a peer node on the overlay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address of one message inside a channel, used for read-status bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub group_id: ContentHash,
    pub message_id: ContentHash,
}

impl MessageRef {
    /// Creates a message reference.
    pub fn new(group_id: ContentHash, message_id: ContentHash) -> Self {
        Self {
            group_id,
            message_id,
        }
    }
}
