//! DAG node wrapper for the channel graph.
//!
//! The `ChannelNode` enum wraps every node kind so that storage, replay and
//! the overlay can handle nodes generically while preserving type safety.

use crate::channel::comment::Comment;
use crate::channel::edit::ChannelEdit;
use crate::channel::group::ChannelGenesis;
use crate::channel::post::Post;
use crate::channel::types::{ContentHash, NodeType};
use crate::channel::vote::Vote;
use crate::dag::DagNodeOps;
use crate::error::{ChansyncError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A wrapper enum for all node types in the channel graph.
#[derive(Clone, Serialize, Deserialize)]
pub enum ChannelNode {
    /// Channel genesis - creates a channel.
    Genesis(ChannelGenesis),
    /// Channel metadata edit.
    Edit(ChannelEdit),
    /// Post in a channel.
    Post(Post),
    /// Comment on a post.
    Comment(Comment),
    /// Vote on a comment.
    Vote(Vote),
}

impl fmt::Debug for ChannelNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelNode::Genesis(node) => fmt::Debug::fmt(node, f),
            ChannelNode::Edit(node) => fmt::Debug::fmt(node, f),
            ChannelNode::Post(node) => fmt::Debug::fmt(node, f),
            ChannelNode::Comment(node) => fmt::Debug::fmt(node, f),
            ChannelNode::Vote(node) => fmt::Debug::fmt(node, f),
        }
    }
}

impl ChannelNode {
    /// Returns the content hash of this node.
    pub fn hash(&self) -> &ContentHash {
        match self {
            ChannelNode::Genesis(node) => node.hash(),
            ChannelNode::Edit(node) => node.hash(),
            ChannelNode::Post(node) => node.hash(),
            ChannelNode::Comment(node) => node.hash(),
            ChannelNode::Vote(node) => node.hash(),
        }
    }

    /// Returns the node type.
    pub fn node_type(&self) -> NodeType {
        match self {
            ChannelNode::Genesis(_) => NodeType::ChannelGenesis,
            ChannelNode::Edit(_) => NodeType::ChannelEdit,
            ChannelNode::Post(_) => NodeType::Post,
            ChannelNode::Comment(_) => NodeType::Comment,
            ChannelNode::Vote(_) => NodeType::Vote,
        }
    }

    /// Returns the creation timestamp in milliseconds.
    pub fn created_at(&self) -> u64 {
        match self {
            ChannelNode::Genesis(node) => node.created_at(),
            ChannelNode::Edit(node) => node.created_at(),
            ChannelNode::Post(node) => node.created_at(),
            ChannelNode::Comment(node) => node.created_at(),
            ChannelNode::Vote(node) => node.created_at(),
        }
    }

    /// Returns the group id of the channel this node belongs to.
    ///
    /// For a genesis node this is its own hash.
    pub fn channel_id(&self) -> &ContentHash {
        match self {
            ChannelNode::Genesis(node) => node.hash(),
            ChannelNode::Edit(node) => node.group_id(),
            ChannelNode::Post(node) => node.channel_id(),
            ChannelNode::Comment(node) => node.channel_id(),
            ChannelNode::Vote(node) => node.channel_id(),
        }
    }

    /// Returns the nodes that must be present before this one can be applied.
    ///
    /// Superseded post versions are deliberately not listed: a correction may
    /// arrive before (or without) the version it replaces.
    pub fn parent_hashes(&self) -> Vec<ContentHash> {
        match self {
            ChannelNode::Genesis(_) => Vec::new(),
            ChannelNode::Edit(node) => vec![*node.group_id()],
            ChannelNode::Post(node) => vec![*node.channel_id()],
            ChannelNode::Comment(node) => {
                let mut parents = vec![*node.channel_id(), *node.thread_id()];
                if !node.is_top_level() {
                    parents.push(*node.parent_id());
                }
                parents
            }
            ChannelNode::Vote(node) => {
                vec![*node.channel_id(), *node.post_id(), *node.comment_id()]
            }
        }
    }

    /// Returns a short label for logs and CLI output.
    pub fn label(&self) -> String {
        match self {
            ChannelNode::Genesis(node) => node.name().to_string(),
            ChannelNode::Edit(_) => "channel edit".to_string(),
            ChannelNode::Post(node) => node.title().to_string(),
            ChannelNode::Comment(node) => node.body().chars().take(40).collect(),
            ChannelNode::Vote(node) => format!("{} vote", node.vote_type()),
        }
    }

    /// Encodes the node for storage or transport.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| ChansyncError::serialization(format!("Failed to encode node: {}", e)))
    }

    /// Decodes a node from storage or transport bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| ChansyncError::serialization(format!("Failed to decode node: {}", e)))
    }

    /// Returns the inner genesis, if this is one.
    pub fn as_genesis(&self) -> Option<&ChannelGenesis> {
        match self {
            ChannelNode::Genesis(node) => Some(node),
            _ => None,
        }
    }

    /// Returns the inner edit, if this is one.
    pub fn as_edit(&self) -> Option<&ChannelEdit> {
        match self {
            ChannelNode::Edit(node) => Some(node),
            _ => None,
        }
    }

    /// Returns the inner post, if this is one.
    pub fn as_post(&self) -> Option<&Post> {
        match self {
            ChannelNode::Post(node) => Some(node),
            _ => None,
        }
    }

    /// Returns the inner comment, if this is one.
    pub fn as_comment(&self) -> Option<&Comment> {
        match self {
            ChannelNode::Comment(node) => Some(node),
            _ => None,
        }
    }

    /// Returns the inner vote, if this is one.
    pub fn as_vote(&self) -> Option<&Vote> {
        match self {
            ChannelNode::Vote(node) => Some(node),
            _ => None,
        }
    }
}

impl DagNodeOps for ChannelNode {
    fn hash(&self) -> &ContentHash {
        ChannelNode::hash(self)
    }

    fn parent_hashes(&self) -> Vec<ContentHash> {
        ChannelNode::parent_hashes(self)
    }

    fn created_at(&self) -> u64 {
        ChannelNode::created_at(self)
    }
}

impl From<ChannelGenesis> for ChannelNode {
    fn from(node: ChannelGenesis) -> Self {
        ChannelNode::Genesis(node)
    }
}

impl From<ChannelEdit> for ChannelNode {
    fn from(node: ChannelEdit) -> Self {
        ChannelNode::Edit(node)
    }
}

impl From<Post> for ChannelNode {
    fn from(node: Post) -> Self {
        ChannelNode::Post(node)
    }
}

impl From<Comment> for ChannelNode {
    fn from(node: Comment) -> Self {
        ChannelNode::Comment(node)
    }
}

impl From<Vote> for ChannelNode {
    fn from(node: Vote) -> Self {
        ChannelNode::Vote(node)
    }
}
