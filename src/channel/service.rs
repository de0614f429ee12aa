//! Blocking channel service.
//!
//! [`ChannelService`] is the preferred call surface: every operation blocks
//! until its effects are committed locally and returns a `Result`.
//! [`ChannelEngine`] implements it over the in-memory [`ChannelGraph`], a
//! durable [`GraphStore`] and the injected collaborators (keyring, overlay,
//! file sharing).
//!
//! ## Commit discipline
//!
//! Mutations run entirely under the graph write lock:
//!
//! 1. check inputs and rights against the current graph
//! 2. build and sign the node
//! 3. `admit()` it (full validation, no mutation)
//! 4. commit it to the store in one batch
//! 5. insert it into the graph and release any orphans waiting for it
//!
//! A failure at any step before 5 leaves graph and store untouched, and a
//! call that returns has its effects visible to every later call.

use crate::channel::edit::{ChannelEdit, ChannelEditContent, EffectiveMetadata};
use crate::channel::files::{FileSharing, LocalFileShare};
use crate::channel::group::{check_circle, check_name, ChannelGenesis, ChannelGenesisContent, ChannelKeys};
use crate::channel::search::{
    DistantChannel, NullOverlay, Overlay, ResultSink, SearchCallback, SearchQuery,
    SearchRegistry, SearchRequestId, SearchSubscription, ChannelKeyBundle, GroupSummary,
};
use crate::channel::state::{Admission, ChannelGraph, ChannelIndex, ChannelSettings, LocalState};
use crate::channel::store::{GraphStore, MemoryGraphStore, RocksGraphStore, StoreOp};
use crate::channel::types::{
    CircleId, CircleType, ContentHash, FileHash, FileRef, Image, MessageRef, NodeType, PeerId,
    VoteType,
};
use crate::channel::{ChannelNode, Comment, CommentContent, Post, PostContent, Vote, VoteContent};
use crate::config::ServiceConfig;
use crate::dag::{current_timestamp_millis, topological_order};
use crate::error::{ChansyncError, Result};
use crate::identity::{IdentityId, KeyRole, Keyring, LocalKeyring, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

// =============================================================================
// Requests
// =============================================================================

/// Input of [`ChannelService::create_channel`].
#[derive(Debug, Clone, Default)]
pub struct NewChannel {
    pub name: String,
    pub description: String,
    pub thumbnail: Option<Image>,
    /// Owned identity signing as author; `None` publishes anonymously.
    pub author: Option<IdentityId>,
    pub circle_type: CircleType,
    pub circle_id: Option<CircleId>,
}

/// Input of [`ChannelService::edit_channel`]. `None` fields stay unchanged.
#[derive(Debug, Clone)]
pub struct ChannelEditRequest {
    pub group_id: ContentHash,
    pub name: Option<String>,
    pub description: Option<String>,
    /// An empty image clears the thumbnail.
    pub thumbnail: Option<Image>,
}

/// Input of [`ChannelService::create_post`].
#[derive(Debug, Clone)]
pub struct NewPost {
    pub channel_id: ContentHash,
    pub title: String,
    pub body: String,
    /// Attachments; each must already be shared through `extra_file_hash`.
    pub files: Vec<FileRef>,
    pub thumbnail: Option<Image>,
    pub author: Option<IdentityId>,
    /// Post this one supersedes.
    pub orig_post_id: Option<ContentHash>,
}

/// Input of [`ChannelService::create_comment`].
#[derive(Debug, Clone)]
pub struct NewComment {
    pub channel_id: ContentHash,
    pub thread_id: ContentHash,
    /// Comment being replied to; `None` (or the thread id) for a top-level
    /// comment.
    pub parent_id: Option<ContentHash>,
    pub body: String,
    pub author: IdentityId,
}

/// Input of [`ChannelService::create_vote`].
#[derive(Debug, Clone)]
pub struct NewVote {
    pub channel_id: ContentHash,
    pub post_id: ContentHash,
    pub comment_id: ContentHash,
    pub author: IdentityId,
    pub vote: VoteType,
}

// =============================================================================
// Records
// =============================================================================

/// Summary of one channel as seen locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMeta {
    pub group_id: ContentHash,
    pub name: String,
    pub author: Option<IdentityId>,
    pub circle_type: CircleType,
    pub circle_id: Option<CircleId>,
    pub subscribed: bool,
    /// `1 + number of applied edits`.
    pub version: u32,
    pub last_post_at: u64,
    /// Number of posts not superseded by a newer version.
    pub post_count: u32,
    pub publish_rights: bool,
    pub admin_rights: bool,
}

/// Full channel record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelGroup {
    pub meta: GroupMeta,
    pub description: String,
    pub image: Option<Image>,
    pub auto_download: bool,
}

/// Metadata common to posts, comments and votes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMeta {
    pub group_id: ContentHash,
    pub message_id: ContentHash,
    pub kind: NodeType,
    /// Post of a comment or vote.
    pub thread_id: Option<ContentHash>,
    /// Parent of a comment, or the comment a vote targets.
    pub parent_id: Option<ContentHash>,
    pub author: Option<IdentityId>,
    pub title: String,
    pub published_at: u64,
    pub read: bool,
    /// True for post versions replaced by a newer post.
    pub superseded: bool,
}

impl MessageMeta {
    /// Metadata for a record that has not been published yet.
    pub fn draft(group_id: ContentHash, kind: NodeType) -> Self {
        Self {
            group_id,
            message_id: ContentHash::zero(),
            kind,
            thread_id: None,
            parent_id: None,
            author: None,
            title: String::new(),
            published_at: 0,
            read: false,
            superseded: false,
        }
    }
}

/// Post record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRecord {
    pub meta: MessageMeta,
    pub older_versions: BTreeSet<ContentHash>,
    pub msg: String,
    pub files: Vec<FileRef>,
    /// Number of attached files.
    pub count: u32,
    /// Total size of attached files.
    pub size: u64,
    pub thumbnail: Option<Image>,
}

/// Comment record with its vote tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub meta: MessageMeta,
    pub comment: String,
    pub up_votes: u32,
    pub down_votes: u32,
}

/// Vote record. `meta.thread_id` is the post, `meta.parent_id` the comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub meta: MessageMeta,
    pub vote: VoteType,
}

/// Content of one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelContent {
    pub posts: Vec<PostRecord>,
    pub comments: Vec<CommentRecord>,
    pub votes: Vec<VoteRecord>,
}

/// Outcome of receiving a node from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingest {
    /// Accepted; `released` orphans were accepted along with it.
    Accepted { released: usize },
    /// Already known.
    Duplicate,
    /// Held until `missing` arrives.
    Buffered { missing: ContentHash },
    /// The orphan buffer refused it.
    Dropped,
}

// =============================================================================
// Service trait
// =============================================================================

/// Blocking channel operations.
pub trait ChannelService: Send + Sync {
    /// Creates a channel with fresh admin and publish keys and subscribes to
    /// it. Returns the group id.
    fn create_channel(&self, request: NewChannel) -> Result<ContentHash>;

    /// Publishes a metadata edit. Requires the admin key. Returns the edit id.
    fn edit_channel(&self, request: ChannelEditRequest) -> Result<ContentHash>;

    /// Publishes a post. Requires the publish key. Returns the post id.
    fn create_post(&self, request: NewPost) -> Result<ContentHash>;

    /// Publishes a comment. Returns the comment id.
    fn create_comment(&self, request: NewComment) -> Result<ContentHash>;

    /// Publishes a vote. Returns the vote id.
    fn create_vote(&self, request: NewVote) -> Result<ContentHash>;

    fn subscribe_to_channel(&self, channel_id: &ContentHash, subscribe: bool) -> Result<()>;

    fn get_channel_auto_download(&self, channel_id: &ContentHash) -> Result<bool>;

    fn set_channel_auto_download(&self, channel_id: &ContentHash, enabled: bool) -> Result<()>;

    fn get_channel_download_directory(&self, channel_id: &ContentHash) -> Result<PathBuf>;

    fn set_channel_download_directory(&self, channel_id: &ContentHash, directory: PathBuf) -> Result<()>;

    /// Hands the publish key to trusted peers. Requires the admin key.
    fn share_channel_keys(&self, channel_id: &ContentHash, peers: &[PeerId]) -> Result<()>;

    /// Imports a publish key shared by the channel's admin.
    fn accept_channel_keys(&self, bundle: ChannelKeyBundle) -> Result<()>;

    fn get_channels_summaries(&self) -> Result<Vec<GroupMeta>>;

    /// Returns the requested channels, or every known channel for an empty
    /// list.
    fn get_channels_info(&self, channel_ids: &[ContentHash]) -> Result<Vec<ChannelGroup>>;

    /// Returns the requested messages of a channel. An empty list returns all
    /// current posts with every comment and vote; ids that are not messages of
    /// the channel are skipped.
    fn get_channel_content(&self, channel_id: &ContentHash, content_ids: &[ContentHash]) -> Result<ChannelContent>;

    /// Returns metadata of every post, comment and vote of a channel.
    fn get_content_summaries(&self, channel_id: &ContentHash) -> Result<Vec<MessageMeta>>;

    fn mark_read(&self, message: MessageRef, read: bool) -> Result<()>;

    /// Hashes a local file and offers it to peers.
    fn extra_file_hash(&self, path: &Path) -> Result<FileHash>;

    fn extra_file_remove(&self, hash: &FileHash) -> Result<()>;

    /// Searches the overlay by text. `None` uses the default window.
    fn turtle_search_request(&self, match_string: &str, callback: SearchCallback, max_wait: Option<Duration>) -> Result<SearchRequestId>;

    /// Requests one channel from the overlay.
    fn turtle_channel_request(&self, channel_id: &ContentHash, callback: SearchCallback, max_wait: Option<Duration>) -> Result<SearchRequestId>;

    /// Searches the local graph; results are delivered before returning.
    fn local_search_request(&self, match_string: &str, callback: SearchCallback, max_wait: Option<Duration>) -> Result<SearchRequestId>;

    /// Searches the overlay, yielding results through a handle.
    fn subscribe_search(&self, query: SearchQuery, max_wait: Option<Duration>) -> Result<SearchSubscription>;

    /// Imports a search result into the local graph. Returns the group id.
    fn import_distant_channel(&self, channel: DistantChannel) -> Result<ContentHash>;
}

// =============================================================================
// Engine
// =============================================================================

struct EngineState {
    graph: ChannelGraph,
    local: LocalState,
}

/// Channel engine shared by both call surfaces.
pub struct ChannelEngine {
    config: ServiceConfig,
    keyring: Arc<dyn Keyring>,
    store: Arc<dyn GraphStore>,
    overlay: Arc<dyn Overlay>,
    files: Arc<dyn FileSharing>,
    state: RwLock<EngineState>,
    searches: Arc<SearchRegistry>,
}

impl std::fmt::Debug for ChannelEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read_state();
        f.debug_struct("ChannelEngine")
            .field("nodes", &state.graph.node_count())
            .field("orphans", &state.graph.orphan_count())
            .finish_non_exhaustive()
    }
}

fn search_window(max_wait: Option<Duration>, default: Duration) -> Result<Duration> {
    match max_wait {
        Some(wait) if wait.is_zero() => {
            Err(ChansyncError::validation("Search window must be at least one second"))
        }
        Some(wait) => Ok(wait),
        None => Ok(default),
    }
}

impl ChannelEngine {
    /// Builds an engine and replays the store into memory.
    ///
    /// Stored nodes are re-validated in parent-before-child order; nodes that
    /// no longer validate are skipped with a warning.
    pub fn new(
        config: ServiceConfig,
        keyring: Arc<dyn Keyring>,
        store: Arc<dyn GraphStore>,
        overlay: Arc<dyn Overlay>,
        files: Arc<dyn FileSharing>,
    ) -> Result<Self> {
        config.validate()?;
        let stored = store.load()?;
        let mut graph = ChannelGraph::new(config.max_orphans);

        let nodes: HashMap<ContentHash, ChannelNode> = stored
            .nodes
            .into_iter()
            .map(|node| (*node.hash(), node))
            .collect();
        let order = topological_order(&nodes);
        let now = current_timestamp_millis();
        let mut skipped = 0usize;

        for node in order.ordered {
            match graph.admit(node, now) {
                Ok(Admission::Accept) => {
                    graph.insert(node.clone());
                }
                Ok(Admission::Duplicate) => {}
                Ok(Admission::MissingParent(missing)) => {
                    graph.buffer_orphan(missing, node.clone());
                }
                Err(e) => {
                    skipped += 1;
                    warn!(hash = %node.hash(), error = %e, "Skipping stored node that no longer validates");
                }
            }
        }
        if !order.cyclic.is_empty() {
            warn!(nodes = order.cyclic.len(), "Skipping stored nodes on a reference cycle");
        }

        info!(
            nodes = graph.node_count(),
            channels = graph.channel_ids().len(),
            skipped,
            "Channel engine ready"
        );

        Ok(Self {
            config,
            keyring,
            store,
            overlay,
            files,
            state: RwLock::new(EngineState {
                graph,
                local: stored.local,
            }),
            searches: Arc::new(SearchRegistry::new()),
        })
    }

    /// Builds a non-durable engine with a fresh keyring and no overlay peers.
    pub fn in_memory(config: ServiceConfig) -> Result<Self> {
        Self::new(
            config,
            Arc::new(LocalKeyring::new()),
            Arc::new(MemoryGraphStore::new()),
            Arc::new(NullOverlay),
            Arc::new(LocalFileShare::new()),
        )
    }

    /// Opens the durable engine under `config.data_dir`.
    pub fn open(config: ServiceConfig) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;
        let keyring = LocalKeyring::open(config.keyring_path())?;
        let store = RocksGraphStore::open(config.store_path())?;
        Self::new(
            config,
            Arc::new(keyring),
            Arc::new(store),
            Arc::new(NullOverlay),
            Arc::new(LocalFileShare::new()),
        )
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Returns the keyring.
    pub fn keyring(&self) -> &Arc<dyn Keyring> {
        &self.keyring
    }

    /// Creates a locally owned author identity.
    pub fn create_identity(&self, name: &str) -> Result<IdentityId> {
        if name.trim().is_empty() {
            return Err(ChansyncError::validation("Identity name cannot be empty"));
        }
        let key = self
            .keyring
            .generate_key(KeyRole::Identity(name.to_string()))?;
        info!(identity = %key.id(), name, "Created identity");
        Ok(key.id())
    }

    /// Number of accepted nodes.
    pub fn node_count(&self) -> usize {
        self.read_state().graph.node_count()
    }

    /// Number of nodes waiting for a parent.
    pub fn orphan_count(&self) -> usize {
        self.read_state().graph.orphan_count()
    }

    fn read_state(&self) -> RwLockReadGuard<'_, EngineState> {
        self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, EngineState> {
        self.state.write().unwrap_or_else(|p| p.into_inner())
    }

    // -------------------------------------------------------------------------
    // Commit path
    // -------------------------------------------------------------------------

    /// Admits, persists and inserts one node, then releases its orphans.
    fn commit_node(
        &self,
        state: &mut EngineState,
        node: ChannelNode,
        settings: Option<(ContentHash, ChannelSettings)>,
    ) -> Result<ContentHash> {
        let hash = *node.hash();
        match state.graph.admit(&node, current_timestamp_millis())? {
            Admission::Accept => {}
            Admission::Duplicate => return Ok(hash),
            Admission::MissingParent(parent) => {
                return Err(ChansyncError::not_found(format!(
                    "Parent {} is not known locally",
                    parent
                )))
            }
        }

        {
            let mut ops = vec![StoreOp::PutNode(&node)];
            if let Some((id, settings)) = &settings {
                ops.push(StoreOp::PutSettings(id, settings));
            }
            self.store.commit(&ops)?;
        }

        if let Some((id, settings)) = settings {
            state.local.settings.insert(id, settings);
        }
        debug!(hash = %hash, node_type = %node.node_type(), "Committed node");
        state.graph.insert(node);
        self.release_orphans(state, hash);
        Ok(hash)
    }

    /// Re-applies every orphan unblocked by `parent`, recursively.
    fn release_orphans(&self, state: &mut EngineState, parent: ContentHash) -> usize {
        let mut released = 0usize;
        let mut ready = vec![parent];

        while let Some(parent) = ready.pop() {
            for orphan in state.graph.take_orphans(&parent) {
                let hash = *orphan.hash();
                match state.graph.admit(&orphan, current_timestamp_millis()) {
                    Ok(Admission::Accept) => {
                        if let Err(e) = self.store.commit(&[StoreOp::PutNode(&orphan)]) {
                            warn!(hash = %hash, error = %e, "Failed to persist released orphan");
                            continue;
                        }
                        state.graph.insert(orphan);
                        released += 1;
                        ready.push(hash);
                    }
                    Ok(Admission::MissingParent(missing)) => {
                        state.graph.buffer_orphan(missing, orphan);
                    }
                    Ok(Admission::Duplicate) => {}
                    Err(e) => {
                        warn!(hash = %hash, error = %e, "Dropping orphan that failed validation");
                    }
                }
            }
        }

        if released > 0 {
            debug!(parent = %parent, released, "Released orphans");
        }
        released
    }

    /// Applies a node received from a peer.
    ///
    /// Nodes with unknown parents are buffered and applied once the parents
    /// arrive.
    pub fn receive_node(&self, node: ChannelNode) -> Result<Ingest> {
        let mut state = self.write_state();
        let hash = *node.hash();

        match state.graph.admit(&node, current_timestamp_millis()) {
            Ok(Admission::Duplicate) => Ok(Ingest::Duplicate),
            Ok(Admission::MissingParent(missing)) => {
                if state.graph.buffer_orphan(missing, node) {
                    Ok(Ingest::Buffered { missing })
                } else {
                    Ok(Ingest::Dropped)
                }
            }
            Ok(Admission::Accept) => {
                self.store.commit(&[StoreOp::PutNode(&node)])?;
                state.graph.insert(node);
                let released = self.release_orphans(&mut state, hash);
                Ok(Ingest::Accepted { released })
            }
            Err(e) => {
                warn!(hash = %hash, error = %e, "Rejected node from peer");
                Err(e)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Checks
    // -------------------------------------------------------------------------

    fn check_circle_registry(&self, circle_type: CircleType, circle_id: Option<&CircleId>) -> Result<()> {
        check_circle(circle_type, circle_id)?;
        match (circle_type, circle_id) {
            (CircleType::External, Some(id)) if !self.config.is_defined_circle(id) => Err(
                ChansyncError::validation(format!("Circle {} is not defined", id)),
            ),
            (CircleType::NodesGroup, Some(id)) if !self.config.is_friend_group(id) => Err(
                ChansyncError::validation(format!("Friend group {} does not exist", id)),
            ),
            _ => Ok(()),
        }
    }

    fn owned_author(&self, id: &IdentityId) -> Result<VerifyingKey> {
        if !self.keyring.owns_identity(id) {
            return Err(ChansyncError::permission(format!(
                "Identity {} is not owned locally",
                id
            )));
        }
        self.keyring
            .verifying_key(id)
            .ok_or_else(|| ChansyncError::permission(format!("No key for identity {}", id)))
    }

    /// Checks an attachment against the share registry. The size always
    /// comes from the shared file; an empty name takes the shared file's name.
    fn shared_attachment(&self, file: FileRef) -> Result<FileRef> {
        let shared = self.files.file_ref(&file.hash).ok_or_else(|| {
            ChansyncError::validation(format!(
                "Attachment {} ({}) has not been hashed for sharing",
                file.name, file.hash
            ))
        })?;
        if file.size != shared.size {
            return Err(ChansyncError::validation(format!(
                "Attachment {} is {} bytes, not {}",
                file.hash, shared.size, file.size
            )));
        }
        Ok(FileRef {
            name: if file.name.is_empty() { shared.name } else { file.name },
            ..shared
        })
    }

    fn genesis_of<'a>(state: &'a EngineState, channel_id: &ContentHash) -> Result<&'a ChannelGenesis> {
        state
            .graph
            .genesis(channel_id)
            .ok_or_else(|| ChansyncError::not_found(format!("Unknown channel {}", channel_id)))
    }

    fn post_of<'a>(state: &'a EngineState, channel_id: &ContentHash, post_id: &ContentHash) -> Result<&'a Post> {
        match state.graph.get_node(post_id) {
            Some(ChannelNode::Post(post)) if post.channel_id() == channel_id => Ok(post),
            Some(ChannelNode::Post(_)) => Err(ChansyncError::validation(format!(
                "Post {} belongs to another channel",
                post_id
            ))),
            Some(other) => Err(ChansyncError::validation(format!(
                "{} is a {}, not a post",
                post_id,
                other.node_type()
            ))),
            None => Err(ChansyncError::not_found(format!("Unknown post {}", post_id))),
        }
    }

    fn comment_of<'a>(state: &'a EngineState, thread_id: &ContentHash, comment_id: &ContentHash) -> Result<&'a Comment> {
        match state.graph.get_node(comment_id) {
            Some(ChannelNode::Comment(comment)) if comment.thread_id() == thread_id => Ok(comment),
            Some(ChannelNode::Comment(_)) => Err(ChansyncError::validation(format!(
                "Comment {} belongs to another thread",
                comment_id
            ))),
            Some(other) => Err(ChansyncError::validation(format!(
                "{} is a {}, not a comment",
                comment_id,
                other.node_type()
            ))),
            None => Err(ChansyncError::not_found(format!("Unknown comment {}", comment_id))),
        }
    }

    fn update_settings<F>(&self, channel_id: &ContentHash, update: F) -> Result<()>
    where
        F: FnOnce(&mut ChannelSettings),
    {
        let mut state = self.write_state();
        Self::genesis_of(&state, channel_id)?;
        let mut settings = state.local.settings(channel_id);
        update(&mut settings);
        self.commit_settings(&mut state, *channel_id, settings)
    }

    fn commit_settings(&self, state: &mut EngineState, channel_id: ContentHash, settings: ChannelSettings) -> Result<()> {
        self.store
            .commit(&[StoreOp::PutSettings(&channel_id, &settings)])?;
        state.local.settings.insert(channel_id, settings);
        Ok(())
    }

    /// Drops channel keys that never made it into a committed genesis.
    fn discard_keys(&self, ids: &[IdentityId]) {
        for id in ids {
            if let Err(e) = self.keyring.remove_key(id) {
                warn!(key = %id, error = %e, "Failed to discard unused channel key");
            }
        }
    }

    fn build_edit(&self, genesis: &ChannelGenesis, request: ChannelEditRequest) -> Result<ChannelEdit> {
        if !self.keyring.holds_key(&genesis.admin_key().id()) {
            return Err(ChansyncError::permission(format!(
                "No admin rights for channel {}",
                request.group_id
            )));
        }
        let content = ChannelEditContent::new(
            request.group_id,
            request.name,
            request.description,
            request.thumbnail,
        )?;
        ChannelEdit::create(content, genesis, self.keyring.as_ref())
    }

    // -------------------------------------------------------------------------
    // Combined writes
    // -------------------------------------------------------------------------

    /// Creates a channel with its initial local settings in the same commit
    /// as the genesis. Keys generated for a channel that fails to commit are
    /// removed from the keyring again.
    pub(crate) fn create_channel_with(&self, request: NewChannel, auto_download: bool) -> Result<ContentHash> {
        check_name(&request.name)?;
        let circle_id = request.circle_id.filter(|id| !id.0.is_empty());
        self.check_circle_registry(request.circle_type, circle_id.as_ref())?;
        let author = request
            .author
            .as_ref()
            .map(|id| self.owned_author(id))
            .transpose()?;

        let mut state = self.write_state();
        let admin = self.keyring.generate_key(KeyRole::ChannelAdmin)?;
        let publish = match self.keyring.generate_key(KeyRole::ChannelPublish) {
            Ok(key) => key,
            Err(e) => {
                self.discard_keys(&[admin.id()]);
                return Err(e);
            }
        };
        let key_ids = [admin.id(), publish.id()];
        let settings = ChannelSettings {
            subscribed: true,
            auto_download,
            ..Default::default()
        };

        let committed = ChannelGenesisContent::new(
            request.name,
            request.description,
            request.thumbnail,
            author,
            request.circle_type,
            circle_id,
            ChannelKeys { admin, publish },
        )
        .and_then(|content| ChannelGenesis::create(content, self.keyring.as_ref()))
        .and_then(|genesis| {
            let group_id = *genesis.hash();
            self.commit_node(&mut state, genesis.into(), Some((group_id, settings)))
        });

        match committed {
            Ok(group_id) => {
                info!(group = %group_id, auto_download, "Created channel");
                Ok(group_id)
            }
            Err(e) => {
                self.discard_keys(&key_ids);
                Err(e)
            }
        }
    }

    /// Applies a metadata edit and local setting changes as one commit.
    /// Returns the edit id when metadata changed.
    pub(crate) fn update_channel(
        &self,
        request: ChannelEditRequest,
        subscribed: Option<bool>,
        auto_download: Option<bool>,
    ) -> Result<Option<ContentHash>> {
        let group_id = request.group_id;
        let mut state = self.write_state();
        let genesis = Self::genesis_of(&state, &group_id)?;

        let current = state.local.settings(&group_id);
        let mut settings = current.clone();
        if let Some(subscribed) = subscribed {
            settings.subscribed = subscribed;
        }
        if let Some(auto_download) = auto_download {
            settings.auto_download = auto_download;
        }
        let settings = (settings != current).then_some(settings);

        let changes_metadata =
            request.name.is_some() || request.description.is_some() || request.thumbnail.is_some();
        if !changes_metadata {
            if let Some(settings) = settings {
                self.commit_settings(&mut state, group_id, settings)?;
                info!(group = %group_id, "Updated channel settings");
            }
            return Ok(None);
        }

        let edit = self.build_edit(genesis, request)?;
        let edit_id = self.commit_node(&mut state, edit.into(), settings.map(|s| (group_id, s)))?;
        info!(group = %group_id, edit = %edit_id, "Updated channel");
        Ok(Some(edit_id))
    }

    // -------------------------------------------------------------------------
    // Record building
    // -------------------------------------------------------------------------

    fn channel_group(&self, state: &EngineState, channel_id: &ContentHash) -> Option<ChannelGroup> {
        let genesis = state.graph.genesis(channel_id)?;
        let meta = state.graph.metadata(channel_id)?;
        let index = state.graph.channel_index(channel_id)?;
        let settings = state.local.settings(channel_id);

        Some(ChannelGroup {
            meta: GroupMeta {
                group_id: *channel_id,
                name: meta.name,
                author: genesis.author_id(),
                circle_type: genesis.content.circle_type,
                circle_id: genesis.content.circle_id.clone(),
                subscribed: settings.subscribed,
                version: meta.version,
                last_post_at: index.last_post_at(),
                post_count: index.visible_posts().count() as u32,
                publish_rights: self.keyring.holds_key(&genesis.publish_key().id()),
                admin_rights: self.keyring.holds_key(&genesis.admin_key().id()),
            },
            description: meta.description,
            image: meta.thumbnail,
            auto_download: settings.auto_download,
        })
    }

    fn distant_channel(state: &EngineState, channel_id: &ContentHash) -> Option<DistantChannel> {
        let genesis = state.graph.genesis(channel_id)?.clone();
        let index = state.graph.channel_index(channel_id)?;
        Some(DistantChannel {
            genesis,
            edits: state.graph.edits(channel_id).into_iter().cloned().collect(),
            post_count: index.visible_posts().count() as u32,
            last_post_at: index.last_post_at(),
        })
    }

    fn message_meta(state: &EngineState, node: &ChannelNode, index: &ChannelIndex) -> MessageMeta {
        let group_id = *node.channel_id();
        let message_id = *node.hash();
        let (thread_id, parent_id, author) = match node {
            ChannelNode::Post(post) => (None, None, post.author_id()),
            ChannelNode::Comment(comment) => (
                Some(*comment.thread_id()),
                Some(*comment.parent_id()),
                Some(comment.author_id()),
            ),
            ChannelNode::Vote(vote) => (
                Some(*vote.post_id()),
                Some(*vote.comment_id()),
                Some(vote.author_id()),
            ),
            ChannelNode::Genesis(_) | ChannelNode::Edit(_) => (None, None, None),
        };

        MessageMeta {
            group_id,
            message_id,
            kind: node.node_type(),
            thread_id,
            parent_id,
            author,
            title: node.label(),
            published_at: node.created_at(),
            read: state.local.is_read(&group_id, &message_id),
            superseded: index.is_superseded(&message_id),
        }
    }

    fn post_record(state: &EngineState, node: &ChannelNode, post: &Post, index: &ChannelIndex) -> PostRecord {
        PostRecord {
            meta: Self::message_meta(state, node, index),
            older_versions: post.older_versions().clone(),
            msg: post.body().to_string(),
            files: post.files().to_vec(),
            count: post.count(),
            size: post.size(),
            thumbnail: post.content.thumbnail.clone(),
        }
    }

    fn vote_tally(state: &EngineState, index: &ChannelIndex) -> HashMap<ContentHash, (u32, u32)> {
        let mut tally: HashMap<ContentHash, (u32, u32)> = HashMap::new();
        for vote in index
            .votes()
            .iter()
            .filter_map(|id| state.graph.get_node(id).and_then(ChannelNode::as_vote))
        {
            let entry = tally.entry(*vote.comment_id()).or_default();
            match vote.vote_type() {
                VoteType::Up => entry.0 += 1,
                VoteType::Down => entry.1 += 1,
            }
        }
        tally
    }

    fn collect_content(
        state: &EngineState,
        index: &ChannelIndex,
        nodes: impl IntoIterator<Item = ContentHash>,
    ) -> ChannelContent {
        let tally = Self::vote_tally(state, index);
        let mut content = ChannelContent::default();

        for id in nodes {
            let Some(node) = state.graph.get_node(&id) else {
                continue;
            };
            match node {
                ChannelNode::Post(post) => {
                    content.posts.push(Self::post_record(state, node, post, index));
                }
                ChannelNode::Comment(comment) => {
                    let (up_votes, down_votes) = tally.get(&id).copied().unwrap_or_default();
                    content.comments.push(CommentRecord {
                        meta: Self::message_meta(state, node, index),
                        comment: comment.body().to_string(),
                        up_votes,
                        down_votes,
                    });
                }
                ChannelNode::Vote(vote) => {
                    content.votes.push(VoteRecord {
                        meta: Self::message_meta(state, node, index),
                        vote: vote.vote_type(),
                    });
                }
                ChannelNode::Genesis(_) | ChannelNode::Edit(_) => {}
            }
        }
        content
    }

    // -------------------------------------------------------------------------
    // Search support
    // -------------------------------------------------------------------------

    fn dispatch_search(
        &self,
        query: SearchQuery,
        max_wait: Option<Duration>,
        callback: SearchCallback,
        retain: bool,
    ) -> Result<SearchRequestId> {
        query.check()?;
        let wait = search_window(max_wait, self.config.distant_search_window())?;
        let request = self.searches.next_request_id()?;
        let registry = retain.then(|| Arc::clone(&self.searches));
        let sink = ResultSink::with_callback(request, query.clone(), wait, registry, callback);
        self.overlay.search(request, &query, sink)?;
        info!(request = %request, query = ?query, wait_secs = wait.as_secs(), "Dispatched overlay request");
        Ok(request)
    }

    /// Dispatches an overlay request whose results are kept for
    /// [`Self::search_results`] and [`Self::distant_group`] instead of being
    /// handed to a callback.
    pub fn collect_search(&self, query: SearchQuery, max_wait: Option<Duration>) -> Result<SearchRequestId> {
        self.dispatch_search(query, max_wait, Box::new(|_| {}), true)
    }

    /// Answers a text search from a peer with matching public channels.
    pub fn serve_search(&self, match_string: &str) -> Vec<DistantChannel> {
        let state = self.read_state();
        state
            .graph
            .search(match_string)
            .iter()
            .filter(|id| {
                state
                    .graph
                    .genesis(id)
                    .is_some_and(|g| g.content.circle_type == CircleType::Public)
            })
            .filter_map(|id| Self::distant_channel(&state, id))
            .collect()
    }

    /// Answers a channel request from a peer if the channel is public.
    pub fn serve_channel(&self, channel_id: &ContentHash) -> Option<DistantChannel> {
        let state = self.read_state();
        let genesis = state.graph.genesis(channel_id)?;
        if genesis.content.circle_type != CircleType::Public {
            return None;
        }
        Self::distant_channel(&state, channel_id)
    }

    /// Returns the summaries collected so far for a request started with
    /// [`Self::collect_search`].
    pub fn search_results(&self, request: SearchRequestId) -> BTreeMap<ContentHash, GroupSummary> {
        self.searches.results(request)
    }

    /// Forgets the summaries collected for a request.
    pub fn clear_search_results(&self, request: SearchRequestId) {
        self.searches.clear(request);
    }

    /// Returns a channel record built from the last search result for it.
    pub fn distant_group(&self, channel_id: &ContentHash) -> Option<ChannelGroup> {
        let channel = self.searches.channel(channel_id)?;
        let meta: EffectiveMetadata = channel.verify().ok()?;
        let genesis = &channel.genesis;
        Some(ChannelGroup {
            meta: GroupMeta {
                group_id: *channel_id,
                name: meta.name,
                author: genesis.author_id(),
                circle_type: genesis.content.circle_type,
                circle_id: genesis.content.circle_id.clone(),
                subscribed: false,
                version: meta.version,
                last_post_at: channel.last_post_at,
                post_count: channel.post_count,
                publish_rights: self.keyring.holds_key(&genesis.publish_key().id()),
                admin_rights: self.keyring.holds_key(&genesis.admin_key().id()),
            },
            description: meta.description,
            image: meta.thumbnail,
            auto_download: false,
        })
    }
}

impl ChannelService for ChannelEngine {
    fn create_channel(&self, request: NewChannel) -> Result<ContentHash> {
        self.create_channel_with(request, false)
    }

    fn edit_channel(&self, request: ChannelEditRequest) -> Result<ContentHash> {
        let group_id = request.group_id;
        let mut state = self.write_state();
        let genesis = Self::genesis_of(&state, &group_id)?;
        let edit = self.build_edit(genesis, request)?;
        let edit_id = self.commit_node(&mut state, edit.into(), None)?;
        info!(group = %group_id, edit = %edit_id, "Edited channel");
        Ok(edit_id)
    }

    fn create_post(&self, request: NewPost) -> Result<ContentHash> {
        let mut state = self.write_state();
        let genesis = Self::genesis_of(&state, &request.channel_id)?;
        if !self.keyring.holds_key(&genesis.publish_key().id()) {
            return Err(ChansyncError::permission(format!(
                "No publish rights for channel {}",
                request.channel_id
            )));
        }
        let author = request
            .author
            .as_ref()
            .map(|id| self.owned_author(id))
            .transpose()?;

        let files = request
            .files
            .into_iter()
            .map(|file| self.shared_attachment(file))
            .collect::<Result<Vec<_>>>()?;

        let mut older_versions = BTreeSet::new();
        if let Some(orig) = request.orig_post_id {
            Self::post_of(&state, &request.channel_id, &orig)?;
            older_versions.insert(orig);
        }

        let content = PostContent::new(
            request.channel_id,
            request.title,
            request.body,
            files,
            request.thumbnail,
            older_versions,
            author,
        )?;
        let post = Post::create(content, genesis, self.keyring.as_ref())?;
        let post_id = self.commit_node(&mut state, post.into(), None)?;
        info!(group = %request.channel_id, post = %post_id, supersedes = ?request.orig_post_id, "Published post");
        Ok(post_id)
    }

    fn create_comment(&self, request: NewComment) -> Result<ContentHash> {
        let mut state = self.write_state();
        Self::genesis_of(&state, &request.channel_id)?;
        Self::post_of(&state, &request.channel_id, &request.thread_id)?;

        let parent_id = request.parent_id.unwrap_or(request.thread_id);
        if parent_id != request.thread_id {
            Self::comment_of(&state, &request.thread_id, &parent_id)?;
        }
        let author = self.owned_author(&request.author)?;

        let content = CommentContent::new(
            request.channel_id,
            request.thread_id,
            parent_id,
            request.body,
            author,
        )?;
        let comment = Comment::create(content, self.keyring.as_ref())?;
        let comment_id = self.commit_node(&mut state, comment.into(), None)?;
        debug!(group = %request.channel_id, comment = %comment_id, "Published comment");
        Ok(comment_id)
    }

    fn create_vote(&self, request: NewVote) -> Result<ContentHash> {
        let mut state = self.write_state();
        Self::genesis_of(&state, &request.channel_id)?;
        Self::post_of(&state, &request.channel_id, &request.post_id)?;
        Self::comment_of(&state, &request.post_id, &request.comment_id)?;
        let author = self.owned_author(&request.author)?;

        if state.graph.has_voted(&request.author, &request.comment_id) {
            return Err(ChansyncError::state(format!(
                "Identity {} already voted on comment {}",
                request.author, request.comment_id
            )));
        }

        let content = VoteContent::new(
            request.channel_id,
            request.post_id,
            request.comment_id,
            request.vote,
            author,
        );
        let vote = Vote::create(content, self.keyring.as_ref())?;
        let vote_id = self.commit_node(&mut state, vote.into(), None)?;
        debug!(group = %request.channel_id, vote = %vote_id, "Published vote");
        Ok(vote_id)
    }

    fn subscribe_to_channel(&self, channel_id: &ContentHash, subscribe: bool) -> Result<()> {
        self.update_settings(channel_id, |s| s.subscribed = subscribe)?;
        info!(group = %channel_id, subscribe, "Updated subscription");
        Ok(())
    }

    fn get_channel_auto_download(&self, channel_id: &ContentHash) -> Result<bool> {
        let state = self.read_state();
        Self::genesis_of(&state, channel_id)?;
        Ok(state.local.settings(channel_id).auto_download)
    }

    fn set_channel_auto_download(&self, channel_id: &ContentHash, enabled: bool) -> Result<()> {
        self.update_settings(channel_id, |s| s.auto_download = enabled)
    }

    fn get_channel_download_directory(&self, channel_id: &ContentHash) -> Result<PathBuf> {
        let state = self.read_state();
        Self::genesis_of(&state, channel_id)?;
        Ok(state
            .local
            .settings(channel_id)
            .download_directory
            .unwrap_or_else(|| self.config.download_directory.clone()))
    }

    fn set_channel_download_directory(&self, channel_id: &ContentHash, directory: PathBuf) -> Result<()> {
        if directory.as_os_str().is_empty() {
            return Err(ChansyncError::validation("Download directory cannot be empty"));
        }
        self.update_settings(channel_id, |s| s.download_directory = Some(directory))
    }

    fn share_channel_keys(&self, channel_id: &ContentHash, peers: &[PeerId]) -> Result<()> {
        if peers.is_empty() {
            return Err(ChansyncError::validation("No peers to share keys with"));
        }
        let publish_id = {
            let state = self.read_state();
            let genesis = Self::genesis_of(&state, channel_id)?;
            if !self.keyring.holds_key(&genesis.admin_key().id()) {
                return Err(ChansyncError::permission(format!(
                    "No admin rights for channel {}",
                    channel_id
                )));
            }
            genesis.publish_key().id()
        };

        let bundle = ChannelKeyBundle {
            group_id: *channel_id,
            publish: self.keyring.export_pair(&publish_id)?,
        };
        self.overlay.share_keys(peers, &bundle)?;
        self.update_settings(channel_id, |s| s.shared_with.extend(peers.iter().cloned()))?;
        info!(group = %channel_id, peers = peers.len(), "Shared publish key");
        Ok(())
    }

    fn accept_channel_keys(&self, bundle: ChannelKeyBundle) -> Result<()> {
        {
            let state = self.read_state();
            let genesis = Self::genesis_of(&state, &bundle.group_id)?;
            if bundle.publish.public() != genesis.publish_key() {
                return Err(ChansyncError::validation(format!(
                    "Shared key is not the publish key of channel {}",
                    bundle.group_id
                )));
            }
        }
        let group_id = bundle.group_id;
        self.keyring.import_pair(KeyRole::ChannelPublish, bundle.publish)?;
        info!(group = %group_id, "Imported channel publish key");
        Ok(())
    }

    fn get_channels_summaries(&self) -> Result<Vec<GroupMeta>> {
        let state = self.read_state();
        Ok(state
            .graph
            .channel_ids()
            .iter()
            .filter_map(|id| self.channel_group(&state, id))
            .map(|group| group.meta)
            .collect())
    }

    fn get_channels_info(&self, channel_ids: &[ContentHash]) -> Result<Vec<ChannelGroup>> {
        let state = self.read_state();
        if channel_ids.is_empty() {
            return Ok(state
                .graph
                .channel_ids()
                .iter()
                .filter_map(|id| self.channel_group(&state, id))
                .collect());
        }
        channel_ids
            .iter()
            .map(|id| {
                self.channel_group(&state, id)
                    .ok_or_else(|| ChansyncError::not_found(format!("Unknown channel {}", id)))
            })
            .collect()
    }

    fn get_channel_content(&self, channel_id: &ContentHash, content_ids: &[ContentHash]) -> Result<ChannelContent> {
        let state = self.read_state();
        Self::genesis_of(&state, channel_id)?;
        let Some(index) = state.graph.channel_index(channel_id) else {
            return Ok(ChannelContent::default());
        };

        if content_ids.is_empty() {
            let all = index
                .visible_posts()
                .chain(index.comments())
                .chain(index.votes())
                .copied();
            return Ok(Self::collect_content(&state, index, all));
        }

        let wanted = content_ids.iter().copied().filter(|id| {
            state
                .graph
                .get_node(id)
                .is_some_and(|node| node.channel_id() == channel_id && !matches!(node, ChannelNode::Genesis(_) | ChannelNode::Edit(_)))
        });
        Ok(Self::collect_content(&state, index, wanted))
    }

    fn get_content_summaries(&self, channel_id: &ContentHash) -> Result<Vec<MessageMeta>> {
        let state = self.read_state();
        Self::genesis_of(&state, channel_id)?;
        let Some(index) = state.graph.channel_index(channel_id) else {
            return Ok(Vec::new());
        };

        Ok(index
            .posts()
            .iter()
            .chain(index.comments())
            .chain(index.votes())
            .filter_map(|id| state.graph.get_node(id))
            .map(|node| Self::message_meta(&state, node, index))
            .collect())
    }

    fn mark_read(&self, message: MessageRef, read: bool) -> Result<()> {
        let mut state = self.write_state();
        Self::genesis_of(&state, &message.group_id)?;
        match state.graph.get_node(&message.message_id) {
            Some(node)
                if node.channel_id() == &message.group_id
                    && !matches!(node, ChannelNode::Genesis(_) | ChannelNode::Edit(_)) => {}
            _ => {
                return Err(ChansyncError::not_found(format!(
                    "Unknown message {} in channel {}",
                    message.message_id, message.group_id
                )))
            }
        }

        self.store.commit(&[StoreOp::SetRead(message, read)])?;
        if read {
            state.local.read.insert(message);
        } else {
            state.local.read.remove(&message);
        }
        Ok(())
    }

    fn extra_file_hash(&self, path: &Path) -> Result<FileHash> {
        self.files.hash_file(path)
    }

    fn extra_file_remove(&self, hash: &FileHash) -> Result<()> {
        self.files.remove(hash)
    }

    fn turtle_search_request(&self, match_string: &str, callback: SearchCallback, max_wait: Option<Duration>) -> Result<SearchRequestId> {
        self.dispatch_search(SearchQuery::Text(match_string.to_string()), max_wait, callback, false)
    }

    fn turtle_channel_request(&self, channel_id: &ContentHash, callback: SearchCallback, max_wait: Option<Duration>) -> Result<SearchRequestId> {
        self.dispatch_search(SearchQuery::Channel(*channel_id), max_wait, callback, false)
    }

    fn local_search_request(&self, match_string: &str, callback: SearchCallback, max_wait: Option<Duration>) -> Result<SearchRequestId> {
        let query = SearchQuery::Text(match_string.to_string());
        query.check()?;
        let wait = search_window(max_wait, self.config.local_search_window())?;
        let request = self.searches.next_request_id()?;
        let sink = ResultSink::with_callback(request, query, wait, None, callback);

        let matches: Vec<DistantChannel> = {
            let state = self.read_state();
            state
                .graph
                .search(match_string)
                .iter()
                .filter_map(|id| Self::distant_channel(&state, id))
                .collect()
        };
        let found = matches.len();
        for channel in matches {
            sink.deliver(channel);
        }
        debug!(request = %request, found, "Local search finished");
        Ok(request)
    }

    fn subscribe_search(&self, query: SearchQuery, max_wait: Option<Duration>) -> Result<SearchSubscription> {
        query.check()?;
        let wait = search_window(max_wait, self.config.distant_search_window())?;
        let request = self.searches.next_request_id()?;
        let (sink, subscription) = ResultSink::subscription(request, query.clone(), wait, None);
        self.overlay.search(request, &query, sink)?;
        info!(request = %request, query = ?query, wait_secs = wait.as_secs(), "Opened search subscription");
        Ok(subscription)
    }

    fn import_distant_channel(&self, channel: DistantChannel) -> Result<ContentHash> {
        channel.verify()?;
        let group_id = *channel.group_id();

        let mut state = self.write_state();
        self.commit_node(&mut state, channel.genesis.into(), None)?;

        let mut edits = channel.edits;
        edits.sort_by_key(|e| (e.created_at(), *e.hash()));
        for edit in edits {
            let edit_id = *edit.hash();
            if let Err(e) = self.commit_node(&mut state, edit.into(), None) {
                warn!(group = %group_id, edit = %edit_id, error = %e, "Skipping edit of imported channel");
            }
        }

        info!(group = %group_id, "Imported distant channel");
        Ok(group_id)
    }
}
