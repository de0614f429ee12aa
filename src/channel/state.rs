//! In-memory channel graph.
//!
//! `ChannelGraph` holds every accepted node plus secondary indexes for the
//! queries the service answers, and a buffer of orphans: nodes whose parents
//! have not arrived yet.
//!
//! ## Indexing Strategy
//!
//! - `channels`: group id → `ChannelIndex` (edits in `(created_at, hash)`
//!   order, posts, comments, votes, superseded post ids)
//! - `votes_by_author`: `(author, comment)` pairs for the one-vote rule
//! - `orphans`: missing parent hash → nodes waiting for it
//!
//! Indexes are maintained by `insert()`. Callers must run `admit()` first;
//! `insert()` trusts that the node was validated.
//!
//! Local, non-replicated bookkeeping (subscription, download settings, read
//! flags) lives in [`LocalState`].

use crate::channel::constants::MAX_ORPHANS;
use crate::channel::edit::EffectiveMetadata;
use crate::channel::types::{MessageRef, PeerId};
use crate::channel::validation::{validate_node, ValidationContext};
use crate::channel::{ChannelEdit, ChannelGenesis, ChannelNode, ContentHash};
use crate::error::{ChansyncError, Result};
use crate::identity::IdentityId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use tracing::{debug, trace, warn};

/// Outcome of checking whether a node can enter the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The node is already present; applying it again is a no-op.
    Duplicate,
    /// A parent is not known locally yet.
    MissingParent(ContentHash),
    /// The node is valid and can be inserted.
    Accept,
}

/// Per-channel secondary indexes.
#[derive(Debug, Default, Clone)]
pub struct ChannelIndex {
    /// Edit ids in application order.
    edits: BTreeSet<(u64, ContentHash)>,
    /// Post ids in arrival order.
    posts: Vec<ContentHash>,
    /// Comment ids in arrival order.
    comments: Vec<ContentHash>,
    /// Vote ids in arrival order.
    votes: Vec<ContentHash>,
    /// Post ids named in some post's `older_versions`.
    superseded: HashSet<ContentHash>,
    /// Timestamp of the newest post.
    last_post_at: u64,
}

impl ChannelIndex {
    /// Returns all post ids, including superseded versions.
    pub fn posts(&self) -> &[ContentHash] {
        &self.posts
    }

    /// Returns all comment ids.
    pub fn comments(&self) -> &[ContentHash] {
        &self.comments
    }

    /// Returns all vote ids.
    pub fn votes(&self) -> &[ContentHash] {
        &self.votes
    }

    /// Returns true if a newer post supersedes this one.
    pub fn is_superseded(&self, post_id: &ContentHash) -> bool {
        self.superseded.contains(post_id)
    }

    /// Returns post ids that no other post supersedes.
    pub fn visible_posts(&self) -> impl Iterator<Item = &ContentHash> + '_ {
        self.posts.iter().filter(|h| !self.superseded.contains(*h))
    }

    /// Returns the timestamp of the newest post, or 0.
    pub fn last_post_at(&self) -> u64 {
        self.last_post_at
    }
}

/// In-memory state for all known channels.
#[derive(Debug)]
pub struct ChannelGraph {
    /// All accepted nodes, keyed by content hash.
    nodes: HashMap<ContentHash, ChannelNode>,
    /// Per-channel indexes keyed by group id.
    channels: HashMap<ContentHash, ChannelIndex>,
    /// `(author, comment)` pairs that already carry a vote.
    votes_by_author: HashSet<(IdentityId, ContentHash)>,
    /// Missing parent → nodes waiting for it.
    orphans: HashMap<ContentHash, Vec<ChannelNode>>,
    /// Hashes of all buffered orphans, to drop duplicate deliveries.
    orphan_hashes: HashSet<ContentHash>,
    /// Orphan buffer capacity.
    max_orphans: usize,
}

impl Default for ChannelGraph {
    fn default() -> Self {
        Self::new(MAX_ORPHANS)
    }
}

impl ChannelGraph {
    /// Creates an empty graph with the given orphan buffer capacity.
    pub fn new(max_orphans: usize) -> Self {
        Self {
            nodes: HashMap::new(),
            channels: HashMap::new(),
            votes_by_author: HashSet::new(),
            orphans: HashMap::new(),
            orphan_hashes: HashSet::new(),
            max_orphans,
        }
    }

    /// Checks whether a node may enter the graph, without changing anything.
    ///
    /// # Errors
    /// - `Validation` if the node breaks a structural or signature rule
    /// - `State` if the node is a second vote by the same author on a comment
    pub fn admit(&self, node: &ChannelNode, now_ms: u64) -> Result<Admission> {
        if self.nodes.contains_key(node.hash()) {
            return Ok(Admission::Duplicate);
        }

        if let Some(missing) = node
            .parent_hashes()
            .into_iter()
            .find(|p| !self.nodes.contains_key(p) && p != node.hash())
        {
            return Ok(Admission::MissingParent(missing));
        }

        let ctx = ValidationContext::new(&self.nodes, now_ms);
        validate_node(node, &ctx).into_result()?;

        if let ChannelNode::Vote(vote) = node {
            if self
                .votes_by_author
                .contains(&(vote.author_id(), *vote.comment_id()))
            {
                return Err(ChansyncError::state(format!(
                    "Identity {} already voted on comment {}",
                    vote.author_id(),
                    vote.comment_id()
                )));
            }
        }

        Ok(Admission::Accept)
    }

    /// Inserts an admitted node and updates every index.
    ///
    /// Returns `false` if the node was already present.
    pub fn insert(&mut self, node: ChannelNode) -> bool {
        let hash = *node.hash();
        if self.nodes.contains_key(&hash) {
            return false;
        }

        match &node {
            ChannelNode::Genesis(_) => {
                self.channels.entry(hash).or_default();
            }
            ChannelNode::Edit(edit) => {
                self.channels
                    .entry(*edit.group_id())
                    .or_default()
                    .edits
                    .insert((edit.created_at(), hash));
            }
            ChannelNode::Post(post) => {
                let index = self.channels.entry(*post.channel_id()).or_default();
                index.posts.push(hash);
                index.last_post_at = index.last_post_at.max(post.created_at());
                index.superseded.extend(post.older_versions().iter().copied());
            }
            ChannelNode::Comment(comment) => {
                self.channels
                    .entry(*comment.channel_id())
                    .or_default()
                    .comments
                    .push(hash);
            }
            ChannelNode::Vote(vote) => {
                self.votes_by_author
                    .insert((vote.author_id(), *vote.comment_id()));
                self.channels
                    .entry(*vote.channel_id())
                    .or_default()
                    .votes
                    .push(hash);
            }
        }

        trace!(hash = %hash, node_type = %node.node_type(), "graph_insert");
        self.nodes.insert(hash, node);
        true
    }

    /// Buffers a node until `missing` arrives.
    ///
    /// Returns `false` if the node is already buffered or the buffer is full.
    pub fn buffer_orphan(&mut self, missing: ContentHash, node: ChannelNode) -> bool {
        let hash = *node.hash();
        if self.orphan_hashes.contains(&hash) {
            return false;
        }
        if self.orphan_hashes.len() >= self.max_orphans {
            warn!(hash = %hash, missing = %missing, "Orphan buffer full, dropping node");
            return false;
        }

        debug!(hash = %hash, missing = %missing, "Buffering orphan until parent arrives");
        self.orphan_hashes.insert(hash);
        self.orphans.entry(missing).or_default().push(node);
        true
    }

    /// Removes and returns every orphan waiting for `parent`.
    pub fn take_orphans(&mut self, parent: &ContentHash) -> Vec<ChannelNode> {
        let released = self.orphans.remove(parent).unwrap_or_default();
        for node in &released {
            self.orphan_hashes.remove(node.hash());
        }
        released
    }

    /// Number of nodes waiting for a parent.
    pub fn orphan_count(&self) -> usize {
        self.orphan_hashes.len()
    }

    /// Returns true if a node with this hash is buffered as an orphan.
    pub fn is_orphan(&self, hash: &ContentHash) -> bool {
        self.orphan_hashes.contains(hash)
    }

    /// Returns the number of accepted nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Gets a node by hash.
    pub fn get_node(&self, hash: &ContentHash) -> Option<&ChannelNode> {
        self.nodes.get(hash)
    }

    /// Gets the genesis of a channel.
    pub fn genesis(&self, channel_id: &ContentHash) -> Option<&ChannelGenesis> {
        self.nodes.get(channel_id).and_then(ChannelNode::as_genesis)
    }

    /// Gets the indexes of a channel.
    pub fn channel_index(&self, channel_id: &ContentHash) -> Option<&ChannelIndex> {
        self.channels.get(channel_id)
    }

    /// Returns all channel ids ordered by creation time.
    pub fn channel_ids(&self) -> Vec<ContentHash> {
        let mut ids: Vec<(u64, ContentHash)> = self
            .channels
            .keys()
            .filter_map(|id| self.genesis(id).map(|g| (g.created_at(), *id)))
            .collect();
        ids.sort();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    /// Returns a channel's edits in application order.
    pub fn edits(&self, channel_id: &ContentHash) -> Vec<&ChannelEdit> {
        self.channels
            .get(channel_id)
            .map(|index| {
                index
                    .edits
                    .iter()
                    .filter_map(|(_, hash)| self.nodes.get(hash).and_then(ChannelNode::as_edit))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Resolves a channel's metadata with all known edits applied.
    pub fn metadata(&self, channel_id: &ContentHash) -> Option<EffectiveMetadata> {
        let genesis = self.genesis(channel_id)?;
        Some(EffectiveMetadata::resolve(genesis, self.edits(channel_id)))
    }

    /// Returns true if `author` already voted on `comment_id`.
    pub fn has_voted(&self, author: &IdentityId, comment_id: &ContentHash) -> bool {
        self.votes_by_author.contains(&(*author, *comment_id))
    }

    /// Finds channels whose current name or description contains `text`,
    /// ignoring case.
    pub fn search(&self, text: &str) -> Vec<ContentHash> {
        let needle = text.to_lowercase();
        self.channel_ids()
            .into_iter()
            .filter(|id| {
                self.metadata(id).is_some_and(|meta| {
                    meta.name.to_lowercase().contains(&needle)
                        || meta.description.to_lowercase().contains(&needle)
                })
            })
            .collect()
    }
}

// =============================================================================
// Local (non-replicated) state
// =============================================================================

/// Per-channel settings that never leave this node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// Whether the local node follows this channel.
    pub subscribed: bool,
    /// Whether attached files are fetched automatically.
    pub auto_download: bool,
    /// Download directory override; `None` uses the configured default.
    pub download_directory: Option<PathBuf>,
    /// Peers the publish key was shared with.
    pub shared_with: BTreeSet<PeerId>,
}

/// Local bookkeeping: channel settings and read flags.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LocalState {
    /// Settings keyed by group id.
    pub settings: HashMap<ContentHash, ChannelSettings>,
    /// Messages marked as read.
    pub read: HashSet<MessageRef>,
}

impl LocalState {
    /// Returns the settings of a channel, or defaults.
    pub fn settings(&self, channel_id: &ContentHash) -> ChannelSettings {
        self.settings.get(channel_id).cloned().unwrap_or_default()
    }

    /// Returns true if the message is marked read.
    pub fn is_read(&self, group_id: &ContentHash, message_id: &ContentHash) -> bool {
        self.read.contains(&MessageRef::new(*group_id, *message_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::comment::{Comment, CommentContent};
    use crate::channel::group::{ChannelGenesisContent, ChannelKeys};
    use crate::channel::post::{Post, PostContent};
    use crate::channel::types::{CircleType, VoteType};
    use crate::channel::vote::{Vote, VoteContent};
    use crate::dag::current_timestamp_millis;
    use crate::identity::{KeyRole, Keyring, LocalKeyring, VerifyingKey};

    fn genesis(keyring: &LocalKeyring, name: &str, description: &str) -> ChannelGenesis {
        let keys = ChannelKeys {
            admin: keyring.generate_key(KeyRole::ChannelAdmin).unwrap(),
            publish: keyring.generate_key(KeyRole::ChannelPublish).unwrap(),
        };
        ChannelGenesis::create(
            ChannelGenesisContent::new(
                name.to_string(),
                description.to_string(),
                None,
                None,
                CircleType::Public,
                None,
                keys,
            )
            .unwrap(),
            keyring,
        )
        .unwrap()
    }

    fn post(
        keyring: &LocalKeyring,
        genesis: &ChannelGenesis,
        title: &str,
        older: &[ContentHash],
    ) -> Post {
        Post::create(
            PostContent::new(
                *genesis.hash(),
                title.to_string(),
                String::new(),
                Vec::new(),
                None,
                older.iter().copied().collect(),
                None,
            )
            .unwrap(),
            genesis,
            keyring,
        )
        .unwrap()
    }

    fn comment(
        keyring: &LocalKeyring,
        author: &VerifyingKey,
        post: &Post,
        parent: ContentHash,
    ) -> Comment {
        Comment::create(
            CommentContent::new(
                *post.channel_id(),
                *post.hash(),
                parent,
                "comment".to_string(),
                author.clone(),
            )
            .unwrap(),
            keyring,
        )
        .unwrap()
    }

    fn apply(graph: &mut ChannelGraph, node: impl Into<ChannelNode>) -> Result<Admission> {
        let node = node.into();
        let admission = graph.admit(&node, current_timestamp_millis())?;
        if admission == Admission::Accept {
            graph.insert(node);
        }
        Ok(admission)
    }

    #[test]
    fn test_insert_and_index() {
        let keyring = LocalKeyring::new();
        let mut graph = ChannelGraph::default();
        let channel = genesis(&keyring, "Tech", "gadgets");
        let first = post(&keyring, &channel, "Hello", &[]);
        let second = post(&keyring, &channel, "Hello v2", &[*first.hash()]);

        assert_eq!(apply(&mut graph, channel.clone()).unwrap(), Admission::Accept);
        apply(&mut graph, first.clone()).unwrap();
        apply(&mut graph, second.clone()).unwrap();

        let index = graph.channel_index(channel.hash()).unwrap();
        assert_eq!(index.posts().len(), 2);
        assert!(index.is_superseded(first.hash()));
        let visible: Vec<_> = index.visible_posts().copied().collect();
        assert_eq!(visible, vec![*second.hash()]);
        assert_eq!(graph.node_count(), 3);
    }

    #[test]
    fn test_duplicate_is_noop() {
        let keyring = LocalKeyring::new();
        let mut graph = ChannelGraph::default();
        let channel = genesis(&keyring, "Tech", "");

        apply(&mut graph, channel.clone()).unwrap();
        assert_eq!(apply(&mut graph, channel).unwrap(), Admission::Duplicate);
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn test_missing_parent_reported() {
        let keyring = LocalKeyring::new();
        let graph = ChannelGraph::default();
        let channel = genesis(&keyring, "Tech", "");
        let orphan = post(&keyring, &channel, "Early", &[]);

        let admission = graph
            .admit(&ChannelNode::from(orphan), current_timestamp_millis())
            .unwrap();
        assert_eq!(admission, Admission::MissingParent(*channel.hash()));
    }

    #[test]
    fn test_orphan_buffer() {
        let keyring = LocalKeyring::new();
        let mut graph = ChannelGraph::new(1);
        let channel = genesis(&keyring, "Tech", "");
        let a = post(&keyring, &channel, "A", &[]);
        let b = post(&keyring, &channel, "B", &[]);

        assert!(graph.buffer_orphan(*channel.hash(), a.clone().into()));
        assert!(!graph.buffer_orphan(*channel.hash(), a.clone().into()));
        assert!(!graph.buffer_orphan(*channel.hash(), b.into()));
        assert!(graph.is_orphan(a.hash()));

        let released = graph.take_orphans(channel.hash());
        assert_eq!(released.len(), 1);
        assert_eq!(graph.orphan_count(), 0);
    }

    #[test]
    fn test_second_vote_is_state_error() {
        let keyring = LocalKeyring::new();
        let voter = keyring
            .generate_key(KeyRole::Identity("bob".to_string()))
            .unwrap();
        let mut graph = ChannelGraph::default();
        let channel = genesis(&keyring, "Tech", "");
        let p = post(&keyring, &channel, "Hello", &[]);
        let c = comment(&keyring, &voter, &p, *p.hash());
        apply(&mut graph, channel.clone()).unwrap();
        apply(&mut graph, p.clone()).unwrap();
        apply(&mut graph, c.clone()).unwrap();

        let up = Vote::create(
            VoteContent::new(*channel.hash(), *p.hash(), *c.hash(), VoteType::Up, voter.clone()),
            &keyring,
        )
        .unwrap();
        let down = Vote::create(
            VoteContent::new(*channel.hash(), *p.hash(), *c.hash(), VoteType::Down, voter.clone()),
            &keyring,
        )
        .unwrap();

        apply(&mut graph, up).unwrap();
        assert!(graph.has_voted(&voter.id(), c.hash()));
        let result = apply(&mut graph, down);
        assert!(matches!(result, Err(ChansyncError::State(_))));
        assert_eq!(graph.channel_index(channel.hash()).unwrap().votes().len(), 1);
    }

    #[test]
    fn test_search_matches_name_and_description() {
        let keyring = LocalKeyring::new();
        let mut graph = ChannelGraph::default();
        let tech = genesis(&keyring, "Tech News", "");
        let cooking = genesis(&keyring, "Kitchen", "recipes and TECHniques");
        let music = genesis(&keyring, "Music", "");
        for g in [&tech, &cooking, &music] {
            apply(&mut graph, g.clone()).unwrap();
        }

        let found = graph.search("tech");
        assert_eq!(found.len(), 2);
        assert!(found.contains(tech.hash()));
        assert!(found.contains(cooking.hash()));
        assert!(graph.search("jazz").is_empty());
    }

    #[test]
    fn test_local_state_defaults() {
        let state = LocalState::default();
        let id = ContentHash::digest(b"channel");
        assert_eq!(state.settings(&id), ChannelSettings::default());
        assert!(!state.is_read(&id, &id));
    }
}
