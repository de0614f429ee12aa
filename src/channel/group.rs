//! Channel genesis node.
//!
//! A `ChannelGenesis` creates a channel. Its content hash becomes the channel's
//! group id, and its content fixes the two verifying keys that govern the
//! channel for its whole life:
//!
//! - the **admin key** signs the genesis and every later `ChannelEdit`
//! - the **publish key** signs every post
//!
//! When the channel has an author, the author identity co-signs the genesis.

use crate::channel::constants::{MAX_DESCRIPTION_SIZE, MAX_NAME_SIZE, MAX_THUMBNAIL_SIZE};
use crate::channel::types::{current_timestamp_millis, CircleId, CircleType, ContentHash, Image, NodeType};
use crate::error::{ChansyncError, Result};
use crate::identity::{IdentityId, Keyring, Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The verifying keys fixed at channel creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelKeys {
    pub admin: VerifyingKey,
    pub publish: VerifyingKey,
}

/// The content of a channel genesis node that gets signed and hashed.
///
/// The content hash of this struct becomes the channel's group id.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelGenesisContent {
    /// Node type discriminator (always ChannelGenesis).
    pub node_type: NodeType,
    /// Human-readable channel name.
    pub name: String,
    /// Channel description.
    pub description: String,
    /// Optional channel image.
    pub thumbnail: Option<Image>,
    /// Author identity key, `None` for an anonymous channel.
    pub author: Option<VerifyingKey>,
    /// Visibility rule.
    pub circle_type: CircleType,
    /// Circle or friend-group id, present iff `circle_type` is not public.
    pub circle_id: Option<CircleId>,
    /// Key that signs the genesis and all edits.
    pub admin_key: VerifyingKey,
    /// Key that signs posts.
    pub publish_key: VerifyingKey,
    /// Creation timestamp in milliseconds since Unix epoch.
    pub created_at: u64,
}

impl fmt::Debug for ChannelGenesisContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelGenesisContent")
            .field("name", &self.name)
            .field("circle_type", &self.circle_type)
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl ChannelGenesisContent {
    /// Creates new channel genesis content.
    ///
    /// # Errors
    /// Returns a validation error if:
    /// - The name is empty or longer than `MAX_NAME_SIZE`
    /// - The description or thumbnail is oversized
    /// - The circle id does not match the circle type
    pub fn new(
        name: String,
        description: String,
        thumbnail: Option<Image>,
        author: Option<VerifyingKey>,
        circle_type: CircleType,
        circle_id: Option<CircleId>,
        keys: ChannelKeys,
    ) -> Result<Self> {
        check_name(&name)?;
        check_description(&description)?;
        check_thumbnail(thumbnail.as_ref())?;
        check_circle(circle_type, circle_id.as_ref())?;

        Ok(Self {
            node_type: NodeType::ChannelGenesis,
            name,
            description,
            thumbnail: thumbnail.filter(|t| !t.is_empty()),
            author,
            circle_type,
            circle_id,
            admin_key: keys.admin,
            publish_key: keys.publish,
            created_at: current_timestamp_millis(),
        })
    }

    /// Computes the content hash of this genesis content.
    pub fn content_hash(&self) -> Result<ContentHash> {
        ContentHash::compute(self)
    }
}

pub(crate) fn check_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(ChansyncError::validation("Channel name cannot be empty"));
    }
    if name.len() > MAX_NAME_SIZE {
        return Err(ChansyncError::validation(format!(
            "Channel name too long: {} bytes (max {})",
            name.len(),
            MAX_NAME_SIZE
        )));
    }
    Ok(())
}

pub(crate) fn check_description(description: &str) -> Result<()> {
    if description.len() > MAX_DESCRIPTION_SIZE {
        return Err(ChansyncError::validation(format!(
            "Channel description too long: {} bytes (max {})",
            description.len(),
            MAX_DESCRIPTION_SIZE
        )));
    }
    Ok(())
}

pub(crate) fn check_thumbnail(thumbnail: Option<&Image>) -> Result<()> {
    if let Some(image) = thumbnail {
        if image.data.len() > MAX_THUMBNAIL_SIZE {
            return Err(ChansyncError::validation(format!(
                "Thumbnail too large: {} bytes (max {})",
                image.data.len(),
                MAX_THUMBNAIL_SIZE
            )));
        }
    }
    Ok(())
}

/// Structural circle rule: public channels carry no circle id, others must.
pub(crate) fn check_circle(circle_type: CircleType, circle_id: Option<&CircleId>) -> Result<()> {
    match (circle_type.requires_circle_id(), circle_id) {
        (false, Some(id)) if !id.0.is_empty() => Err(ChansyncError::validation(
            "Public channels must not name a circle",
        )),
        (true, None) => Err(ChansyncError::validation(format!(
            "A {} channel requires a circle id",
            circle_type
        ))),
        (true, Some(id)) if id.0.is_empty() => Err(ChansyncError::validation(format!(
            "A {} channel requires a circle id",
            circle_type
        ))),
        _ => Ok(()),
    }
}

/// A complete channel genesis node with content, signatures and content hash.
#[derive(Clone, Serialize, Deserialize)]
pub struct ChannelGenesis {
    /// The signed content of this node.
    pub content: ChannelGenesisContent,
    /// Admin key signature over the content hash.
    pub admin_signature: Signature,
    /// Author signature over the content hash, present iff the channel has an author.
    pub author_signature: Option<Signature>,
    /// Content hash - the group id.
    pub content_hash: ContentHash,
}

impl fmt::Debug for ChannelGenesis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelGenesis")
            .field("name", &self.content.name)
            .field("content_hash", &self.content_hash)
            .finish()
    }
}

impl ChannelGenesis {
    /// Signs genesis content with the admin key (and author key, if any) held
    /// by the keyring.
    pub fn create(content: ChannelGenesisContent, keyring: &dyn Keyring) -> Result<Self> {
        let content_hash = content.content_hash()?;
        let admin_signature = keyring.sign(&content.admin_key.id(), &content_hash)?;
        let author_signature = match &content.author {
            Some(author) => Some(keyring.sign(&author.id(), &content_hash)?),
            None => None,
        };

        Ok(Self {
            content,
            admin_signature,
            author_signature,
            content_hash,
        })
    }

    /// Verifies the content hash and every signature carried by this node.
    pub fn verify(&self) -> Result<()> {
        let computed_hash = self.content.content_hash()?;
        if computed_hash != self.content_hash {
            return Err(ChansyncError::validation(
                "Channel genesis content hash mismatch",
            ));
        }

        self.content
            .admin_key
            .verify(&self.content_hash, &self.admin_signature)?;

        match (&self.content.author, &self.author_signature) {
            (Some(author), Some(signature)) => author.verify(&self.content_hash, signature),
            (None, None) => Ok(()),
            _ => Err(ChansyncError::validation(
                "Channel author and author signature must both be present or both absent",
            )),
        }
    }

    /// Returns the channel name at creation.
    pub fn name(&self) -> &str {
        &self.content.name
    }

    /// Returns the channel description at creation.
    pub fn description(&self) -> &str {
        &self.content.description
    }

    /// Returns the author identity, if any.
    pub fn author_id(&self) -> Option<IdentityId> {
        self.content.author.as_ref().map(VerifyingKey::id)
    }

    /// Returns the admin key.
    pub fn admin_key(&self) -> &VerifyingKey {
        &self.content.admin_key
    }

    /// Returns the publish key.
    pub fn publish_key(&self) -> &VerifyingKey {
        &self.content.publish_key
    }

    /// Returns the creation timestamp in milliseconds.
    pub fn created_at(&self) -> u64 {
        self.content.created_at
    }

    /// Returns the content hash (group id).
    pub fn hash(&self) -> &ContentHash {
        &self.content_hash
    }
}
