//! Comment node.
//!
//! Comments form a tree rooted at a post: `thread_id` names the post and
//! `parent_id` is either the post itself (top-level comment) or another
//! comment in the same thread. Comments are signed by their author, who is
//! always present.

use crate::channel::constants::MAX_COMMENT_BODY_SIZE;
use crate::channel::types::{current_timestamp_millis, ContentHash, NodeType};
use crate::error::{ChansyncError, Result};
use crate::identity::{IdentityId, Keyring, Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The content of a comment that gets signed and hashed.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommentContent {
    /// Node type discriminator (always Comment).
    pub node_type: NodeType,
    /// Group id of the channel.
    pub channel_id: ContentHash,
    /// The post being discussed.
    pub thread_id: ContentHash,
    /// The post (top level) or the comment being replied to.
    pub parent_id: ContentHash,
    /// Comment text.
    pub body: String,
    /// Author identity key.
    pub author: VerifyingKey,
    /// Creation timestamp in milliseconds.
    pub created_at: u64,
}

impl fmt::Debug for CommentContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommentContent")
            .field("thread_id", &self.thread_id)
            .field("parent_id", &self.parent_id)
            .field("body_len", &self.body.len())
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl CommentContent {
    /// Creates new comment content.
    ///
    /// # Errors
    /// Returns a validation error for an empty or oversized body.
    pub fn new(
        channel_id: ContentHash,
        thread_id: ContentHash,
        parent_id: ContentHash,
        body: String,
        author: VerifyingKey,
    ) -> Result<Self> {
        let content = Self {
            node_type: NodeType::Comment,
            channel_id,
            thread_id,
            parent_id,
            body,
            author,
            created_at: current_timestamp_millis(),
        };
        content.check_limits()?;
        Ok(content)
    }

    /// Checks the body limits.
    pub fn check_limits(&self) -> Result<()> {
        if self.body.trim().is_empty() {
            return Err(ChansyncError::validation("Comment body cannot be empty"));
        }
        if self.body.len() > MAX_COMMENT_BODY_SIZE {
            return Err(ChansyncError::validation(format!(
                "Comment body too long: {} bytes (max {})",
                self.body.len(),
                MAX_COMMENT_BODY_SIZE
            )));
        }
        Ok(())
    }

    /// Computes the content hash of this comment.
    pub fn content_hash(&self) -> Result<ContentHash> {
        ContentHash::compute(self)
    }
}

/// A signed comment.
#[derive(Clone, Serialize, Deserialize)]
pub struct Comment {
    /// The signed content of this node.
    pub content: CommentContent,
    /// Author signature over the content hash.
    pub signature: Signature,
    /// Content hash - the comment id.
    pub content_hash: ContentHash,
}

impl fmt::Debug for Comment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Comment")
            .field("thread_id", &self.content.thread_id)
            .field("parent_id", &self.content.parent_id)
            .field("content_hash", &self.content_hash)
            .finish()
    }
}

impl Comment {
    /// Signs comment content with the author's key.
    pub fn create(content: CommentContent, keyring: &dyn Keyring) -> Result<Self> {
        let content_hash = content.content_hash()?;
        let signature = keyring.sign(&content.author.id(), &content_hash)?;

        Ok(Self {
            content,
            signature,
            content_hash,
        })
    }

    /// Verifies the content hash and the author signature.
    pub fn verify(&self) -> Result<()> {
        let computed_hash = self.content.content_hash()?;
        if computed_hash != self.content_hash {
            return Err(ChansyncError::validation("Comment content hash mismatch"));
        }

        self.content
            .author
            .verify(&self.content_hash, &self.signature)
    }

    /// Returns the channel group id.
    pub fn channel_id(&self) -> &ContentHash {
        &self.content.channel_id
    }

    /// Returns the post this comment belongs to.
    pub fn thread_id(&self) -> &ContentHash {
        &self.content.thread_id
    }

    /// Returns the parent (post or comment).
    pub fn parent_id(&self) -> &ContentHash {
        &self.content.parent_id
    }

    /// Returns true if this comment replies directly to the post.
    pub fn is_top_level(&self) -> bool {
        self.content.parent_id == self.content.thread_id
    }

    /// Returns the comment text.
    pub fn body(&self) -> &str {
        &self.content.body
    }

    /// Returns the author identity.
    pub fn author_id(&self) -> IdentityId {
        self.content.author.id()
    }

    /// Returns the creation timestamp in milliseconds.
    pub fn created_at(&self) -> u64 {
        self.content.created_at
    }

    /// Returns the content hash (comment id).
    pub fn hash(&self) -> &ContentHash {
        &self.content_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{KeyRole, LocalKeyring};

    #[test]
    fn test_comment_create_and_verify() {
        let keyring = LocalKeyring::new();
        let author = keyring
            .generate_key(KeyRole::Identity("alice".to_string()))
            .unwrap();
        let thread = ContentHash::digest(b"post");

        let content = CommentContent::new(
            ContentHash::digest(b"channel"),
            thread,
            thread,
            "Nice post".to_string(),
            author.clone(),
        )
        .unwrap();
        let comment = Comment::create(content, &keyring).unwrap();

        comment.verify().expect("Comment verification failed");
        assert!(comment.is_top_level());
        assert_eq!(comment.author_id(), author.id());
    }

    #[test]
    fn test_empty_comment_rejected() {
        let keyring = LocalKeyring::new();
        let author = keyring
            .generate_key(KeyRole::Identity("alice".to_string()))
            .unwrap();

        let result = CommentContent::new(
            ContentHash::zero(),
            ContentHash::zero(),
            ContentHash::zero(),
            " ".to_string(),
            author,
        );
        assert!(matches!(result, Err(ChansyncError::Validation(_))));
    }

    #[test]
    fn test_tampered_comment_fails_verification() {
        let keyring = LocalKeyring::new();
        let author = keyring
            .generate_key(KeyRole::Identity("alice".to_string()))
            .unwrap();
        let thread = ContentHash::digest(b"post");
        let content = CommentContent::new(
            ContentHash::digest(b"channel"),
            thread,
            thread,
            "Original".to_string(),
            author,
        )
        .unwrap();
        let mut comment = Comment::create(content, &keyring).unwrap();

        comment.content.body = "Changed".to_string();
        assert!(comment.verify().is_err());
    }
}
