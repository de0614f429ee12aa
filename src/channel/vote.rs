//! Vote node.
//!
//! A vote is an up/down endorsement of a comment by an identity. Each author
//! may vote at most once on a given comment; the graph rejects a second vote.

use crate::channel::types::{current_timestamp_millis, ContentHash, NodeType, VoteType};
use crate::error::{ChansyncError, Result};
use crate::identity::{IdentityId, Keyring, Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The content of a vote that gets signed and hashed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteContent {
    /// Node type discriminator (always Vote).
    pub node_type: NodeType,
    /// Group id of the channel.
    pub channel_id: ContentHash,
    /// The post whose thread contains the comment.
    pub post_id: ContentHash,
    /// The comment being voted on.
    pub comment_id: ContentHash,
    /// Up or down.
    pub vote: VoteType,
    /// Voter identity key.
    pub author: VerifyingKey,
    /// Creation timestamp in milliseconds.
    pub created_at: u64,
}

impl VoteContent {
    /// Creates new vote content.
    pub fn new(
        channel_id: ContentHash,
        post_id: ContentHash,
        comment_id: ContentHash,
        vote: VoteType,
        author: VerifyingKey,
    ) -> Self {
        Self {
            node_type: NodeType::Vote,
            channel_id,
            post_id,
            comment_id,
            vote,
            author,
            created_at: current_timestamp_millis(),
        }
    }

    /// Computes the content hash of this vote.
    pub fn content_hash(&self) -> Result<ContentHash> {
        ContentHash::compute(self)
    }
}

/// A signed vote.
#[derive(Clone, Serialize, Deserialize)]
pub struct Vote {
    /// The signed content of this node.
    pub content: VoteContent,
    /// Author signature over the content hash.
    pub signature: Signature,
    /// Content hash - the vote id.
    pub content_hash: ContentHash,
}

impl fmt::Debug for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vote")
            .field("comment_id", &self.content.comment_id)
            .field("vote", &self.content.vote)
            .field("content_hash", &self.content_hash)
            .finish()
    }
}

impl Vote {
    /// Signs vote content with the voter's key.
    pub fn create(content: VoteContent, keyring: &dyn Keyring) -> Result<Self> {
        let content_hash = content.content_hash()?;
        let signature = keyring.sign(&content.author.id(), &content_hash)?;

        Ok(Self {
            content,
            signature,
            content_hash,
        })
    }

    /// Verifies the content hash and the voter signature.
    pub fn verify(&self) -> Result<()> {
        let computed_hash = self.content.content_hash()?;
        if computed_hash != self.content_hash {
            return Err(ChansyncError::validation("Vote content hash mismatch"));
        }

        self.content
            .author
            .verify(&self.content_hash, &self.signature)
    }

    /// Returns the channel group id.
    pub fn channel_id(&self) -> &ContentHash {
        &self.content.channel_id
    }

    /// Returns the post id.
    pub fn post_id(&self) -> &ContentHash {
        &self.content.post_id
    }

    /// Returns the voted comment id.
    pub fn comment_id(&self) -> &ContentHash {
        &self.content.comment_id
    }

    /// Returns the vote value.
    pub fn vote_type(&self) -> VoteType {
        self.content.vote
    }

    /// Returns the voter identity.
    pub fn author_id(&self) -> IdentityId {
        self.content.author.id()
    }

    /// Returns the creation timestamp in milliseconds.
    pub fn created_at(&self) -> u64 {
        self.content.created_at
    }

    /// Returns the content hash (vote id).
    pub fn hash(&self) -> &ContentHash {
        &self.content_hash
    }
}
