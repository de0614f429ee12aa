//! Adversarial tests for the channel engine
//!
//! These tests feed the engine hostile or failing input and verify that the
//! graph, the store and the local settings are left exactly as they were.

use chansync::channel::constants::{MAX_COMMENT_BODY_SIZE, MAX_NAME_SIZE, MAX_POST_BODY_SIZE};
use chansync::channel::store::{StoreOp, StoredGraph};
use chansync::channel::{
    ChannelEngine, ChannelGroup, ChannelService, CircleType, ContentHash, GraphStore, GroupMeta,
    InlineDispatcher, Ingest, LegacyChannelApi, LocalFileShare, MemoryGraphStore, MessageRef,
    NewChannel, NewComment, NewPost, NewVote, NullOverlay, RequestStatus, VoteType,
};
use chansync::config::ServiceConfig;
use chansync::identity::{IdentityId, LocalKeyring};
use chansync::ChansyncError;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// Store that refuses writes while `failing` is set.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryGraphStore,
    failing: AtomicBool,
}

impl GraphStore for FlakyStore {
    fn commit(&self, ops: &[StoreOp<'_>]) -> chansync::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChansyncError::storage("disk full"));
        }
        self.inner.commit(ops)
    }

    fn load(&self) -> chansync::Result<StoredGraph> {
        self.inner.load()
    }
}

/// Store that accepts a fixed number of commits and refuses the rest.
struct LimitedStore {
    inner: MemoryGraphStore,
    remaining: AtomicUsize,
}

impl LimitedStore {
    fn new() -> Self {
        Self {
            inner: MemoryGraphStore::new(),
            remaining: AtomicUsize::new(usize::MAX),
        }
    }

    fn allow(&self, commits: usize) {
        self.remaining.store(commits, Ordering::SeqCst);
    }
}

impl GraphStore for LimitedStore {
    fn commit(&self, ops: &[StoreOp<'_>]) -> chansync::Result<()> {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .map_err(|_| ChansyncError::storage("commit budget exhausted"))?;
        self.inner.commit(ops)
    }

    fn load(&self) -> chansync::Result<StoredGraph> {
        self.inner.load()
    }
}

fn engine() -> ChannelEngine {
    ChannelEngine::in_memory(ServiceConfig::default()).unwrap()
}

fn engine_on(store: Arc<dyn GraphStore>, config: ServiceConfig) -> ChannelEngine {
    ChannelEngine::new(
        config,
        Arc::new(LocalKeyring::new()),
        store,
        Arc::new(NullOverlay),
        Arc::new(LocalFileShare::new()),
    )
    .unwrap()
}

fn engine_with_keyring(store: Arc<dyn GraphStore>, keyring: Arc<LocalKeyring>) -> ChannelEngine {
    ChannelEngine::new(
        ServiceConfig::default(),
        keyring,
        store,
        Arc::new(NullOverlay),
        Arc::new(LocalFileShare::new()),
    )
    .unwrap()
}

fn draft_group(name: &str, auto_download: bool) -> ChannelGroup {
    ChannelGroup {
        meta: GroupMeta {
            group_id: ContentHash::zero(),
            name: name.to_string(),
            author: None,
            circle_type: CircleType::Public,
            circle_id: None,
            subscribed: true,
            version: 0,
            last_post_at: 0,
            post_count: 0,
            publish_rights: false,
            admin_rights: false,
        },
        description: String::new(),
        image: None,
        auto_download,
    }
}

fn channel(engine: &ChannelEngine) -> ContentHash {
    engine
        .create_channel(NewChannel {
            name: "Target".to_string(),
            ..Default::default()
        })
        .unwrap()
}

fn post(channel_id: ContentHash, title: &str, body: String) -> NewPost {
    NewPost {
        channel_id,
        title: title.to_string(),
        body,
        files: Vec::new(),
        thumbnail: None,
        author: None,
        orig_post_id: None,
    }
}

fn comment(channel_id: ContentHash, thread_id: ContentHash, author: IdentityId, body: String) -> NewComment {
    NewComment {
        channel_id,
        thread_id,
        parent_id: None,
        body,
        author,
    }
}

// =============================================================================
// Oversized and Malformed Input
// =============================================================================

#[test]
fn test_oversized_input_is_rejected_without_writes() {
    let store = Arc::new(MemoryGraphStore::new());
    let engine = engine_on(store.clone(), ServiceConfig::default());
    let alice = engine.create_identity("alice").unwrap();
    let g = channel(&engine);
    let p = engine.create_post(post(g, "ok", String::new())).unwrap();
    let before = engine.node_count();

    let long_name = engine.create_channel(NewChannel {
        name: "n".repeat(MAX_NAME_SIZE + 1),
        ..Default::default()
    });
    assert!(matches!(long_name, Err(ChansyncError::Validation(_))));

    let big_post = engine.create_post(post(g, "big", "x".repeat(MAX_POST_BODY_SIZE + 1)));
    assert!(matches!(big_post, Err(ChansyncError::Validation(_))));

    let big_comment = engine.create_comment(comment(g, p, alice, "x".repeat(MAX_COMMENT_BODY_SIZE + 1)));
    assert!(matches!(big_comment, Err(ChansyncError::Validation(_))));

    assert_eq!(engine.node_count(), before);
    assert_eq!(store.node_count(), before);
}

#[test]
fn test_references_of_the_wrong_kind() {
    let engine = engine();
    let alice = engine.create_identity("alice").unwrap();
    let g = channel(&engine);
    let p = engine.create_post(post(g, "post", String::new())).unwrap();
    let c = engine.create_comment(comment(g, p, alice, "hi".to_string())).unwrap();

    // A comment is not a thread.
    let on_comment = engine.create_comment(comment(g, c, alice, "nested wrong".to_string()));
    assert!(matches!(on_comment, Err(ChansyncError::Validation(_))));

    // A post is not a vote target.
    let vote_on_post = engine.create_vote(NewVote {
        channel_id: g,
        post_id: p,
        comment_id: p,
        author: alice,
        vote: VoteType::Up,
    });
    assert!(matches!(vote_on_post, Err(ChansyncError::Validation(_))));

    // A channel is not a post.
    let thread_on_channel = engine.create_comment(comment(g, g, alice, "nope".to_string()));
    assert!(matches!(thread_on_channel, Err(ChansyncError::Validation(_))));

    // Messages are addressed within their own channel.
    let other = channel(&engine);
    assert!(matches!(
        engine.mark_read(MessageRef::new(other, p), true),
        Err(ChansyncError::NotFound(_))
    ));
    assert!(matches!(
        engine.get_channel_content(&ContentHash::digest(b"nowhere"), &[]),
        Err(ChansyncError::NotFound(_))
    ));
    assert!(engine.get_channel_content(&other, &[p]).unwrap().posts.is_empty());
}

#[test]
fn test_unowned_identity_cannot_write() {
    let stranger = engine();
    let engine = engine();
    let mallory = stranger.create_identity("mallory").unwrap();
    let g = channel(&engine);
    let p = engine.create_post(post(g, "post", String::new())).unwrap();

    let result = engine.create_comment(comment(g, p, mallory, "impersonated".to_string()));
    assert!(matches!(result, Err(ChansyncError::Permission(_))));

    let mut signed = post(g, "signed", String::new());
    signed.author = Some(mallory);
    assert!(matches!(engine.create_post(signed), Err(ChansyncError::Permission(_))));
}

// =============================================================================
// Storage Failures
// =============================================================================

#[test]
fn test_failed_commit_leaves_graph_unchanged() {
    let store = Arc::new(FlakyStore::default());
    let engine = engine_on(store.clone(), ServiceConfig::default());

    store.failing.store(true, Ordering::SeqCst);
    let refused = engine.create_channel(NewChannel {
        name: "Doomed".to_string(),
        ..Default::default()
    });
    assert!(matches!(refused, Err(ChansyncError::Storage(_))));
    assert_eq!(engine.node_count(), 0);
    assert!(engine.get_channels_summaries().unwrap().is_empty());

    store.failing.store(false, Ordering::SeqCst);
    let g = channel(&engine);

    store.failing.store(true, Ordering::SeqCst);
    assert!(matches!(
        engine.create_post(post(g, "lost", String::new())),
        Err(ChansyncError::Storage(_))
    ));
    assert!(matches!(
        engine.subscribe_to_channel(&g, false),
        Err(ChansyncError::Storage(_))
    ));
    assert_eq!(engine.node_count(), 1);
    assert!(engine.get_channel_content(&g, &[]).unwrap().posts.is_empty());
    assert!(engine.get_channels_summaries().unwrap()[0].subscribed);

    store.failing.store(false, Ordering::SeqCst);
    engine.create_post(post(g, "kept", String::new())).unwrap();
    assert_eq!(store.inner.node_count(), 2);
}

#[test]
fn test_failed_channel_creation_leaves_no_keys() {
    let store = Arc::new(FlakyStore::default());
    let keyring = Arc::new(LocalKeyring::new());
    let engine = engine_with_keyring(store.clone(), keyring.clone());

    store.failing.store(true, Ordering::SeqCst);
    let refused = engine.create_channel(NewChannel {
        name: "Doomed".to_string(),
        ..Default::default()
    });
    assert!(matches!(refused, Err(ChansyncError::Storage(_))));
    assert_eq!(keyring.key_count(), 0);

    store.failing.store(false, Ordering::SeqCst);
    channel(&engine);
    assert_eq!(keyring.key_count(), 2);
}

#[test]
fn test_record_calls_write_in_a_single_commit() {
    let store = Arc::new(LimitedStore::new());
    let keyring = Arc::new(LocalKeyring::new());
    let engine = Arc::new(engine_with_keyring(store.clone(), keyring.clone()));
    let api = LegacyChannelApi::new(Arc::clone(&engine), Arc::new(InlineDispatcher));

    // Channel plus auto-download setting fit in one commit.
    store.allow(1);
    let token = api.create_group(draft_group("Tech", true)).unwrap();
    assert_eq!(api.request_status(token).unwrap(), RequestStatus::Complete);
    let g = api.acknowledge(token).unwrap().ready().unwrap().unwrap();
    assert!(engine.get_channel_auto_download(&g).unwrap());

    // Nothing left: the whole update is refused and nothing changes.
    let mut update = engine.get_channels_info(&[g]).unwrap().remove(0);
    update.meta.name = "Tech Weekly".to_string();
    update.meta.subscribed = false;
    update.auto_download = false;
    let token = api.update_group(update.clone()).unwrap();
    assert_eq!(api.request_status(token).unwrap(), RequestStatus::Failed);
    assert!(matches!(api.acknowledge(token), Err(ChansyncError::Storage(_))));
    let group = engine.get_channels_info(&[g]).unwrap().remove(0);
    assert_eq!(group.meta.name, "Tech");
    assert!(group.meta.subscribed);
    assert!(group.auto_download);
    assert_eq!(engine.node_count(), 1);

    // One commit carries edit and settings together.
    store.allow(1);
    let token = api.update_group(update).unwrap();
    assert!(api.acknowledge(token).unwrap().ready().unwrap().is_some());
    let group = engine.get_channels_info(&[g]).unwrap().remove(0);
    assert_eq!(group.meta.name, "Tech Weekly");
    assert!(!group.meta.subscribed);
    assert!(!group.auto_download);

    // A failed record-style create leaves neither channel nor keys behind.
    store.allow(0);
    let mut record = draft_group("Doomed", true);
    assert!(matches!(
        api.create_channel_legacy(&mut record),
        Err(ChansyncError::Storage(_))
    ));
    assert_eq!(record.meta.group_id, ContentHash::zero());
    assert_eq!(engine.get_channels_summaries().unwrap().len(), 1);
    assert_eq!(keyring.key_count(), 2);
}

// =============================================================================
// Remote Flooding
// =============================================================================

#[test]
fn test_orphan_buffer_is_bounded() {
    let store = Arc::new(MemoryGraphStore::new());
    let origin = engine_on(store.clone(), ServiceConfig::default());
    let g = channel(&origin);
    for i in 0..3 {
        origin.create_post(post(g, &format!("post {}", i), String::new())).unwrap();
    }

    let (genesis, posts): (Vec<_>, Vec<_>) = store
        .load()
        .unwrap()
        .nodes
        .into_iter()
        .partition(|n| n.hash() == &g);

    let replica = engine_on(
        Arc::new(MemoryGraphStore::new()),
        ServiceConfig {
            max_orphans: 2,
            ..Default::default()
        },
    );
    let outcomes: Vec<Ingest> = posts
        .into_iter()
        .map(|node| replica.receive_node(node).unwrap())
        .collect();
    assert_eq!(
        outcomes,
        vec![
            Ingest::Buffered { missing: g },
            Ingest::Buffered { missing: g },
            Ingest::Dropped,
        ]
    );
    assert_eq!(replica.orphan_count(), 2);
    assert_eq!(replica.node_count(), 0);

    let genesis = genesis.into_iter().next().unwrap();
    assert_eq!(
        replica.receive_node(genesis).unwrap(),
        Ingest::Accepted { released: 2 }
    );
    assert_eq!(replica.orphan_count(), 0);
    assert_eq!(replica.node_count(), 3);
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_concurrent_writers() {
    let engine = Arc::new(engine());
    let alice = engine.create_identity("alice").unwrap();
    let g = channel(&engine);
    let p = engine.create_post(post(g, "thread", String::new())).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                (0..10)
                    .map(|i| {
                        if i % 2 == 0 {
                            engine
                                .create_post(post(g, &format!("{}-{}", t, i), String::new()))
                                .unwrap()
                        } else {
                            engine
                                .create_comment(comment(g, p, alice, format!("{}-{}", t, i)))
                                .unwrap()
                        }
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        ids.extend(handle.join().unwrap());
    }
    assert_eq!(ids.len(), 80);
    assert_eq!(engine.node_count(), 2 + 80);

    let content = engine.get_channel_content(&g, &[]).unwrap();
    assert_eq!(content.posts.len(), 41);
    assert_eq!(content.comments.len(), 40);
}
