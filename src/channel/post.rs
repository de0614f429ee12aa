//! Post node.
//!
//! Posts are immutable once created. A correction is published as a new post
//! whose `older_versions` names the superseded post ids; the old versions stay
//! retrievable by id but are hidden from default listings.
//!
//! Posts are signed with the channel's publish key. When the post names an
//! author identity, the author co-signs it.

use crate::channel::constants::{
    MAX_FILES_PER_POST, MAX_FILE_NAME_SIZE, MAX_OLDER_VERSIONS, MAX_POST_BODY_SIZE,
    MAX_TITLE_SIZE,
};
use crate::channel::group::{check_thumbnail, ChannelGenesis};
use crate::channel::types::{current_timestamp_millis, ContentHash, FileRef, Image, NodeType};
use crate::error::{ChansyncError, Result};
use crate::identity::{IdentityId, Keyring, Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// The content of a post that gets signed and hashed.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostContent {
    /// Node type discriminator (always Post).
    pub node_type: NodeType,
    /// Group id of the channel.
    pub channel_id: ContentHash,
    /// Post title.
    pub title: String,
    /// Post body (UTF-8).
    pub body: String,
    /// Attached files, in display order.
    pub files: Vec<FileRef>,
    /// Optional thumbnail.
    pub thumbnail: Option<Image>,
    /// Post ids this post supersedes.
    pub older_versions: BTreeSet<ContentHash>,
    /// Optional author identity key.
    pub author: Option<VerifyingKey>,
    /// Creation timestamp in milliseconds.
    pub created_at: u64,
}

impl fmt::Debug for PostContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostContent")
            .field("channel_id", &self.channel_id)
            .field("title", &self.title)
            .field("body_len", &self.body.len())
            .field("files", &self.files.len())
            .field("older_versions", &self.older_versions.len())
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl PostContent {
    /// Creates new post content.
    ///
    /// # Errors
    /// Returns a validation error for an empty title or any size limit breach.
    pub fn new(
        channel_id: ContentHash,
        title: String,
        body: String,
        files: Vec<FileRef>,
        thumbnail: Option<Image>,
        older_versions: BTreeSet<ContentHash>,
        author: Option<VerifyingKey>,
    ) -> Result<Self> {
        let content = Self {
            node_type: NodeType::Post,
            channel_id,
            title,
            body,
            files,
            thumbnail: thumbnail.filter(|t| !t.is_empty()),
            older_versions,
            author,
            created_at: current_timestamp_millis(),
        };
        content.check_limits()?;
        Ok(content)
    }

    /// Checks title, body, file list and thumbnail limits.
    pub fn check_limits(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(ChansyncError::validation("Post title cannot be empty"));
        }
        if self.title.len() > MAX_TITLE_SIZE {
            return Err(ChansyncError::validation(format!(
                "Post title too long: {} bytes (max {})",
                self.title.len(),
                MAX_TITLE_SIZE
            )));
        }
        if self.body.len() > MAX_POST_BODY_SIZE {
            return Err(ChansyncError::validation(format!(
                "Post body too long: {} bytes (max {})",
                self.body.len(),
                MAX_POST_BODY_SIZE
            )));
        }
        if self.files.len() > MAX_FILES_PER_POST {
            return Err(ChansyncError::validation(format!(
                "Too many files: {} (max {})",
                self.files.len(),
                MAX_FILES_PER_POST
            )));
        }
        if let Some(file) = self
            .files
            .iter()
            .find(|f| f.name.is_empty() || f.name.len() > MAX_FILE_NAME_SIZE)
        {
            return Err(ChansyncError::validation(format!(
                "Invalid file name for {}",
                file.hash
            )));
        }
        if self.older_versions.len() > MAX_OLDER_VERSIONS {
            return Err(ChansyncError::validation(format!(
                "Too many superseded versions: {} (max {})",
                self.older_versions.len(),
                MAX_OLDER_VERSIONS
            )));
        }
        check_thumbnail(self.thumbnail.as_ref())
    }

    /// Computes the content hash of this post.
    pub fn content_hash(&self) -> Result<ContentHash> {
        ContentHash::compute(self)
    }
}

/// A signed post.
#[derive(Clone, Serialize, Deserialize)]
pub struct Post {
    /// The signed content of this node.
    pub content: PostContent,
    /// Publish key signature over the content hash.
    pub publish_signature: Signature,
    /// Author signature, present iff the post has an author.
    pub author_signature: Option<Signature>,
    /// Content hash - the post id.
    pub content_hash: ContentHash,
}

impl fmt::Debug for Post {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Post")
            .field("title", &self.content.title)
            .field("channel_id", &self.content.channel_id)
            .field("content_hash", &self.content_hash)
            .finish()
    }
}

impl Post {
    /// Signs post content with the channel publish key and the author key.
    ///
    /// Fails with a permission error if the keyring lacks either key.
    pub fn create(
        content: PostContent,
        genesis: &ChannelGenesis,
        keyring: &dyn Keyring,
    ) -> Result<Self> {
        let content_hash = content.content_hash()?;
        let publish_signature = keyring.sign(&genesis.publish_key().id(), &content_hash)?;
        let author_signature = match &content.author {
            Some(author) => Some(keyring.sign(&author.id(), &content_hash)?),
            None => None,
        };

        Ok(Self {
            content,
            publish_signature,
            author_signature,
            content_hash,
        })
    }

    /// Verifies the content hash and signatures against the channel genesis.
    pub fn verify(&self, genesis: &ChannelGenesis) -> Result<()> {
        if self.content.channel_id != *genesis.hash() {
            return Err(ChansyncError::validation("Post belongs to a different channel"));
        }

        let computed_hash = self.content.content_hash()?;
        if computed_hash != self.content_hash {
            return Err(ChansyncError::validation("Post content hash mismatch"));
        }

        genesis
            .publish_key()
            .verify(&self.content_hash, &self.publish_signature)?;

        match (&self.content.author, &self.author_signature) {
            (Some(author), Some(signature)) => author.verify(&self.content_hash, signature),
            (None, None) => Ok(()),
            _ => Err(ChansyncError::validation(
                "Post author and author signature must both be present or both absent",
            )),
        }
    }

    /// Returns the channel group id.
    pub fn channel_id(&self) -> &ContentHash {
        &self.content.channel_id
    }

    /// Returns the post title.
    pub fn title(&self) -> &str {
        &self.content.title
    }

    /// Returns the post body.
    pub fn body(&self) -> &str {
        &self.content.body
    }

    /// Returns the attached files.
    pub fn files(&self) -> &[FileRef] {
        &self.content.files
    }

    /// Returns the superseded post ids.
    pub fn older_versions(&self) -> &BTreeSet<ContentHash> {
        &self.content.older_versions
    }

    /// Returns the author identity, if any.
    pub fn author_id(&self) -> Option<IdentityId> {
        self.content.author.as_ref().map(VerifyingKey::id)
    }

    /// Number of attached files.
    pub fn count(&self) -> u32 {
        u32::try_from(self.content.files.len()).unwrap_or(u32::MAX)
    }

    /// Total size of attached files in bytes.
    pub fn size(&self) -> u64 {
        self.content
            .files
            .iter()
            .fold(0u64, |acc, f| acc.saturating_add(f.size))
    }

    /// Returns the creation timestamp in milliseconds.
    pub fn created_at(&self) -> u64 {
        self.content.created_at
    }

    /// Returns the content hash (post id).
    pub fn hash(&self) -> &ContentHash {
        &self.content_hash
    }
}
