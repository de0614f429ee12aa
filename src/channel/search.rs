//! Anonymous search and retrieval over the overlay.
//!
//! A search is fire-and-forget: the caller gets a [`SearchRequestId`] back as
//! soon as the overlay accepts the request, and results trickle in through a
//! [`ResultSink`] until the request's deadline passes. There is no timeout
//! error; a window that closes without results simply delivers nothing.
//!
//! ## Delivery rules
//!
//! - Each result is verified (content hashes and signatures of the genesis
//!   and its edits) and re-matched against the query before delivery.
//! - At most one delivery per group id per request.
//! - Deliveries of one request are serialized in confirmation order; the
//!   overlay may call [`ResultSink::deliver`] from any thread.
//! - Nothing is delivered once the deadline has passed.
//!
//! Results never touch the local graph. Importing one goes through
//! `ChannelService::import_distant_channel`, which re-validates every node.

use crate::channel::constants::{MAX_RETAINED_CHANNELS, MAX_RETAINED_SEARCHES};
use crate::channel::edit::{ChannelEdit, EffectiveMetadata};
use crate::channel::group::ChannelGenesis;
use crate::channel::types::{CircleType, ContentHash, PeerId};
use crate::error::{ChansyncError, Result};
use crate::identity::{IdentityId, KeyPair};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Identifier of one search or channel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SearchRequestId(pub u32);

impl fmt::Display for SearchRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "search#{}", self.0)
    }
}

/// What a request is looking for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchQuery {
    /// Case-insensitive substring over channel name and description.
    Text(String),
    /// One channel by group id.
    Channel(ContentHash),
}

impl SearchQuery {
    /// Checks that the query can be dispatched.
    pub fn check(&self) -> Result<()> {
        match self {
            SearchQuery::Text(text) if text.trim().is_empty() => {
                Err(ChansyncError::validation("Search text cannot be empty"))
            }
            _ => Ok(()),
        }
    }

    /// Returns true if a channel with this id and metadata answers the query.
    pub fn matches(&self, group_id: &ContentHash, meta: &EffectiveMetadata) -> bool {
        match self {
            SearchQuery::Text(text) => {
                let needle = text.to_lowercase();
                meta.name.to_lowercase().contains(&needle)
                    || meta.description.to_lowercase().contains(&needle)
            }
            SearchQuery::Channel(id) => id == group_id,
        }
    }
}

/// A channel as served by a remote peer: its genesis and known edits, plus
/// the peer's view of activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistantChannel {
    pub genesis: ChannelGenesis,
    pub edits: Vec<ChannelEdit>,
    /// Number of visible posts the serving peer holds.
    pub post_count: u32,
    /// Timestamp of the serving peer's newest post.
    pub last_post_at: u64,
}

impl DistantChannel {
    /// Returns the group id.
    pub fn group_id(&self) -> &ContentHash {
        self.genesis.hash()
    }

    /// Verifies every carried node and resolves the channel's metadata.
    pub fn verify(&self) -> Result<EffectiveMetadata> {
        self.genesis.verify()?;
        for edit in &self.edits {
            edit.verify(&self.genesis)?;
        }

        let mut edits: Vec<&ChannelEdit> = self.edits.iter().collect();
        edits.sort_by_key(|e| (e.created_at(), *e.hash()));
        edits.dedup_by_key(|e| *e.hash());
        Ok(EffectiveMetadata::resolve(&self.genesis, edits))
    }

    /// Encodes the channel for transport.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| {
            ChansyncError::serialization(format!("Failed to encode distant channel: {}", e))
        })
    }

    /// Decodes a channel received from the overlay.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| {
            ChansyncError::serialization(format!("Failed to decode distant channel: {}", e))
        })
    }
}

/// Short description of a search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub group_id: ContentHash,
    pub name: String,
    pub description: String,
    pub author: Option<IdentityId>,
    pub circle_type: CircleType,
    pub version: u32,
    pub post_count: u32,
    pub last_post_at: u64,
}

impl GroupSummary {
    fn new(channel: &DistantChannel, meta: &EffectiveMetadata) -> Self {
        Self {
            group_id: *channel.group_id(),
            name: meta.name.clone(),
            description: meta.description.clone(),
            author: channel.genesis.author_id(),
            circle_type: channel.genesis.content.circle_type,
            version: meta.version,
            post_count: channel.post_count,
            last_post_at: channel.last_post_at,
        }
    }
}

/// One delivered search result.
#[derive(Debug, Clone)]
pub struct ChannelSearchResult {
    pub request_id: SearchRequestId,
    pub summary: GroupSummary,
    pub channel: DistantChannel,
}

/// Callback receiving search results.
pub type SearchCallback = Box<dyn FnMut(ChannelSearchResult) + Send + 'static>;

/// Publish key of a channel handed to trusted peers.
#[derive(Clone)]
pub struct ChannelKeyBundle {
    pub group_id: ContentHash,
    pub publish: KeyPair,
}

impl fmt::Debug for ChannelKeyBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelKeyBundle")
            .field("group_id", &self.group_id)
            .field("publish", &self.publish.public().id())
            .finish_non_exhaustive()
    }
}

/// Overlay routing collaborator.
pub trait Overlay: Send + Sync {
    /// Dispatches a request. Results go to `sink` from any thread until the
    /// sink's deadline; dropping the sink ends the request early.
    fn search(&self, request: SearchRequestId, query: &SearchQuery, sink: ResultSink) -> Result<()>;

    /// Hands a channel's publish key to the given peers.
    fn share_keys(&self, peers: &[PeerId], bundle: &ChannelKeyBundle) -> Result<()>;
}

/// Overlay with no peers: accepts every request and never answers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOverlay;

impl Overlay for NullOverlay {
    fn search(&self, request: SearchRequestId, query: &SearchQuery, _sink: ResultSink) -> Result<()> {
        debug!(request = %request, query = ?query, "No overlay peers, request will see no results");
        Ok(())
    }

    fn share_keys(&self, peers: &[PeerId], bundle: &ChannelKeyBundle) -> Result<()> {
        debug!(group = %bundle.group_id, peers = peers.len(), "No overlay peers to share keys with");
        Ok(())
    }
}

// =============================================================================
// Result sink
// =============================================================================

enum SinkTarget {
    Callback(SearchCallback),
    Stream(mpsc::UnboundedSender<ChannelSearchResult>),
}

struct SinkState {
    seen: HashSet<ContentHash>,
    target: SinkTarget,
}

struct SinkInner {
    request_id: SearchRequestId,
    query: SearchQuery,
    deadline: Instant,
    registry: Option<Arc<SearchRegistry>>,
    state: Mutex<SinkState>,
}

/// Receiving end of one request, handed to the overlay.
///
/// Cloning is cheap; all clones share deduplication and the deadline.
#[derive(Clone)]
pub struct ResultSink {
    inner: Arc<SinkInner>,
}

impl fmt::Debug for ResultSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSink")
            .field("request_id", &self.inner.request_id)
            .field("query", &self.inner.query)
            .finish_non_exhaustive()
    }
}

impl ResultSink {
    fn build(
        request_id: SearchRequestId,
        query: SearchQuery,
        max_wait: Duration,
        registry: Option<Arc<SearchRegistry>>,
        target: SinkTarget,
    ) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                request_id,
                query,
                deadline: Instant::now() + max_wait,
                registry,
                state: Mutex::new(SinkState {
                    seen: HashSet::new(),
                    target,
                }),
            }),
        }
    }

    /// Creates a sink that invokes `callback` once per distinct result.
    pub fn with_callback(
        request_id: SearchRequestId,
        query: SearchQuery,
        max_wait: Duration,
        registry: Option<Arc<SearchRegistry>>,
        callback: SearchCallback,
    ) -> Self {
        Self::build(request_id, query, max_wait, registry, SinkTarget::Callback(callback))
    }

    /// Creates a sink feeding a [`SearchSubscription`].
    pub fn subscription(
        request_id: SearchRequestId,
        query: SearchQuery,
        max_wait: Duration,
        registry: Option<Arc<SearchRegistry>>,
    ) -> (Self, SearchSubscription) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let sink = Self::build(request_id, query, max_wait, registry, SinkTarget::Stream(sender));
        let subscription = SearchSubscription {
            id: request_id,
            deadline: sink.inner.deadline,
            receiver,
        };
        (sink, subscription)
    }

    /// Returns the request this sink belongs to.
    pub fn request_id(&self) -> SearchRequestId {
        self.inner.request_id
    }

    /// Returns the query being answered.
    pub fn query(&self) -> &SearchQuery {
        &self.inner.query
    }

    /// Returns the instant after which results are discarded.
    pub fn deadline(&self) -> Instant {
        self.inner.deadline
    }

    /// Returns true once the deadline has passed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.inner.deadline
    }

    /// Offers one result. Returns true if it was delivered.
    ///
    /// Results are dropped when the window has closed, when they fail
    /// verification, when they do not answer the query, or when the same
    /// group was already delivered for this request. Must not be called from
    /// inside this sink's own callback.
    pub fn deliver(&self, channel: DistantChannel) -> bool {
        let inner = &self.inner;
        if self.is_expired() {
            trace!(request = %inner.request_id, "Result arrived after the deadline");
            return false;
        }

        let meta = match channel.verify() {
            Ok(meta) => meta,
            Err(e) => {
                warn!(request = %inner.request_id, group = %channel.group_id(), error = %e, "Discarding unverifiable search result");
                return false;
            }
        };
        if !inner.query.matches(channel.group_id(), &meta) {
            warn!(request = %inner.request_id, group = %channel.group_id(), "Discarding search result that does not match the query");
            return false;
        }

        let mut state = inner.state.lock().unwrap_or_else(|p| p.into_inner());
        if self.is_expired() || !state.seen.insert(*channel.group_id()) {
            return false;
        }

        let summary = GroupSummary::new(&channel, &meta);
        if let Some(registry) = &inner.registry {
            registry.record(inner.request_id, &summary, &channel);
        }

        debug!(request = %inner.request_id, group = %summary.group_id, name = %summary.name, "Delivering search result");
        let result = ChannelSearchResult {
            request_id: inner.request_id,
            summary,
            channel,
        };
        match &mut state.target {
            SinkTarget::Callback(callback) => {
                callback(result);
                true
            }
            SinkTarget::Stream(sender) => sender.send(result).is_ok(),
        }
    }

    /// Number of distinct results delivered so far.
    pub fn delivered(&self) -> usize {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .seen
            .len()
    }
}

// =============================================================================
// Subscription handle
// =============================================================================

/// Handle yielding the results of one request until the deadline passes or
/// the handle is dropped.
#[derive(Debug)]
pub struct SearchSubscription {
    id: SearchRequestId,
    deadline: Instant,
    receiver: mpsc::UnboundedReceiver<ChannelSearchResult>,
}

impl SearchSubscription {
    /// Returns the request id.
    pub fn id(&self) -> SearchRequestId {
        self.id
    }

    /// Returns the instant at which the window closes.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Waits for the next result. Returns `None` once the window has closed
    /// or the overlay has released the request.
    pub async fn next(&mut self) -> Option<ChannelSearchResult> {
        let deadline = tokio::time::Instant::from_std(self.deadline);
        tokio::time::timeout_at(deadline, self.receiver.recv())
            .await
            .ok()
            .flatten()
    }

    /// Returns an already delivered result without waiting.
    pub fn try_next(&mut self) -> Option<ChannelSearchResult> {
        if Instant::now() >= self.deadline {
            return None;
        }
        self.receiver.try_recv().ok()
    }
}

// =============================================================================
// Registry for the deprecated retrieve-style calls
// =============================================================================

/// Accumulates search results so they can be retrieved later by request id.
///
/// Only requests dispatched for the retrieve-style calls record here. Both
/// maps are bounded: the oldest request and the least recently received
/// channel are evicted first.
#[derive(Debug)]
pub struct SearchRegistry {
    next_id: AtomicU32,
    max_requests: usize,
    max_channels: usize,
    retained: Mutex<Retained>,
}

#[derive(Debug, Default)]
struct Retained {
    results: HashMap<SearchRequestId, BTreeMap<ContentHash, GroupSummary>>,
    request_order: VecDeque<SearchRequestId>,
    channels: HashMap<ContentHash, DistantChannel>,
    channel_order: VecDeque<ContentHash>,
}

impl Default for SearchRegistry {
    fn default() -> Self {
        Self::with_capacity(MAX_RETAINED_SEARCHES, MAX_RETAINED_CHANNELS)
    }
}

impl SearchRegistry {
    /// Creates an empty registry with the default bounds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry keeping at most `max_requests` result sets
    /// and `max_channels` distant channels.
    pub fn with_capacity(max_requests: usize, max_channels: usize) -> Self {
        Self {
            next_id: AtomicU32::new(1),
            max_requests: max_requests.max(1),
            max_channels: max_channels.max(1),
            retained: Mutex::new(Retained::default()),
        }
    }

    /// Issues a fresh request id.
    pub fn next_request_id(&self) -> Result<SearchRequestId> {
        self.next_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n != 0).then(|| n.wrapping_add(1))
            })
            .map(SearchRequestId)
            .map_err(|_| ChansyncError::state("Search request ids exhausted"))
    }

    fn retained(&self) -> std::sync::MutexGuard<'_, Retained> {
        self.retained.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn record(&self, request: SearchRequestId, summary: &GroupSummary, channel: &DistantChannel) {
        let mut retained = self.retained();

        if !retained.results.contains_key(&request) {
            while retained.request_order.len() >= self.max_requests {
                let Some(oldest) = retained.request_order.pop_front() else {
                    break;
                };
                retained.results.remove(&oldest);
                trace!(request = %oldest, "Evicted search results");
            }
            retained.request_order.push_back(request);
        }
        retained
            .results
            .entry(request)
            .or_default()
            .insert(summary.group_id, summary.clone());

        let group_id = summary.group_id;
        if retained.channels.insert(group_id, channel.clone()).is_some() {
            retained.channel_order.retain(|id| *id != group_id);
        }
        retained.channel_order.push_back(group_id);
        while retained.channel_order.len() > self.max_channels {
            let Some(oldest) = retained.channel_order.pop_front() else {
                break;
            };
            retained.channels.remove(&oldest);
        }
    }

    /// Returns the summaries collected for a request so far.
    pub fn results(&self, request: SearchRequestId) -> BTreeMap<ContentHash, GroupSummary> {
        self.retained()
            .results
            .get(&request)
            .cloned()
            .unwrap_or_default()
    }

    /// Forgets the summaries of a request.
    pub fn clear(&self, request: SearchRequestId) {
        let mut retained = self.retained();
        if retained.results.remove(&request).is_some() {
            retained.request_order.retain(|id| *id != request);
        }
    }

    /// Returns the last received copy of a distant channel.
    pub fn channel(&self, group_id: &ContentHash) -> Option<DistantChannel> {
        self.retained().channels.get(group_id).cloned()
    }

    /// Number of requests with retained results.
    pub fn request_count(&self) -> usize {
        self.retained().results.len()
    }

    /// Number of retained distant channels.
    pub fn channel_count(&self) -> usize {
        self.retained().channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::edit::ChannelEditContent;
    use crate::channel::group::{ChannelGenesisContent, ChannelKeys};
    use crate::identity::{KeyRole, Keyring, LocalKeyring};
    use std::sync::atomic::AtomicUsize;

    fn channel(keyring: &LocalKeyring, name: &str) -> DistantChannel {
        let keys = ChannelKeys {
            admin: keyring.generate_key(KeyRole::ChannelAdmin).unwrap(),
            publish: keyring.generate_key(KeyRole::ChannelPublish).unwrap(),
        };
        let genesis = ChannelGenesis::create(
            ChannelGenesisContent::new(
                name.to_string(),
                "a channel".to_string(),
                None,
                None,
                CircleType::Public,
                None,
                keys,
            )
            .unwrap(),
            keyring,
        )
        .unwrap();
        DistantChannel {
            genesis,
            edits: Vec::new(),
            post_count: 3,
            last_post_at: 0,
        }
    }

    fn counting_sink(query: SearchQuery, wait: Duration) -> (ResultSink, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let sink = ResultSink::with_callback(
            SearchRequestId(1),
            query,
            wait,
            None,
            Box::new(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );
        (sink, count)
    }

    #[test]
    fn test_duplicate_results_delivered_once() {
        let keyring = LocalKeyring::new();
        let tech = channel(&keyring, "Tech");
        let (sink, count) = counting_sink(SearchQuery::Text("tech".into()), Duration::from_secs(5));

        assert!(sink.deliver(tech.clone()));
        assert!(!sink.deliver(tech.clone()));
        let clone = sink.clone();
        assert!(!clone.deliver(tech));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(sink.delivered(), 1);
    }

    #[test]
    fn test_nothing_after_deadline() {
        let keyring = LocalKeyring::new();
        let (sink, count) = counting_sink(SearchQuery::Text("tech".into()), Duration::ZERO);

        assert!(sink.is_expired());
        assert!(!sink.deliver(channel(&keyring, "Tech")));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_non_matching_result_discarded() {
        let keyring = LocalKeyring::new();
        let (sink, count) = counting_sink(SearchQuery::Text("music".into()), Duration::from_secs(5));

        assert!(!sink.deliver(channel(&keyring, "Tech")));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_tampered_result_discarded() {
        let keyring = LocalKeyring::new();
        let mut tampered = channel(&keyring, "Tech");
        tampered.genesis.content.name = "Tech Deals".to_string();
        let (sink, count) = counting_sink(SearchQuery::Text("tech".into()), Duration::from_secs(5));

        assert!(!sink.deliver(tampered));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_channel_query_matches_only_its_id() {
        let keyring = LocalKeyring::new();
        let wanted = channel(&keyring, "Wanted");
        let other = channel(&keyring, "Other");
        let (sink, count) = counting_sink(
            SearchQuery::Channel(*wanted.group_id()),
            Duration::from_secs(5),
        );

        assert!(!sink.deliver(other));
        assert!(sink.deliver(wanted));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_edits_are_applied_to_summary() {
        let keyring = LocalKeyring::new();
        let mut distant = channel(&keyring, "Old name");
        let edit = ChannelEdit::create(
            ChannelEditContent::new(
                *distant.group_id(),
                Some("Tech Weekly".to_string()),
                None,
                None,
            )
            .unwrap(),
            &distant.genesis,
            &keyring,
        )
        .unwrap();
        distant.edits.push(edit);

        let registry = Arc::new(SearchRegistry::new());
        let request = registry.next_request_id().unwrap();
        let sink = ResultSink::with_callback(
            request,
            SearchQuery::Text("weekly".into()),
            Duration::from_secs(5),
            Some(Arc::clone(&registry)),
            Box::new(|result| assert_eq!(result.summary.version, 2)),
        );

        assert!(sink.deliver(distant.clone()));
        let results = registry.results(request);
        assert_eq!(results[distant.group_id()].name, "Tech Weekly");
        assert!(registry.channel(distant.group_id()).is_some());

        registry.clear(request);
        assert!(registry.results(request).is_empty());
    }

    #[test]
    fn test_registry_is_bounded() {
        let keyring = LocalKeyring::new();
        let registry = Arc::new(SearchRegistry::with_capacity(2, 2));
        let record = |name: &str| {
            let request = registry.next_request_id().unwrap();
            let sink = ResultSink::with_callback(
                request,
                SearchQuery::Text("tech".into()),
                Duration::from_secs(5),
                Some(Arc::clone(&registry)),
                Box::new(|_| {}),
            );
            let distant = channel(&keyring, name);
            assert!(sink.deliver(distant.clone()));
            (request, distant)
        };

        let (first, first_channel) = record("Tech one");
        let (second, _) = record("Tech two");
        let (third, third_channel) = record("Tech three");

        assert_eq!(registry.request_count(), 2);
        assert_eq!(registry.channel_count(), 2);
        assert!(registry.results(first).is_empty());
        assert_eq!(registry.results(second).len(), 1);
        assert_eq!(registry.results(third).len(), 1);
        assert!(registry.channel(first_channel.group_id()).is_none());
        assert!(registry.channel(third_channel.group_id()).is_some());

        registry.clear(second);
        assert_eq!(registry.request_count(), 1);
    }

    #[test]
    fn test_request_ids_increase() {
        let registry = SearchRegistry::new();
        let a = registry.next_request_id().unwrap();
        let b = registry.next_request_id().unwrap();
        assert!(b > a);
    }

    #[test]
    fn test_empty_text_query_rejected() {
        assert!(SearchQuery::Text("  ".into()).check().is_err());
        assert!(SearchQuery::Channel(ContentHash::digest(b"x")).check().is_ok());
    }

    #[tokio::test]
    async fn test_subscription_yields_then_closes() {
        let keyring = LocalKeyring::new();
        let (sink, mut subscription) = ResultSink::subscription(
            SearchRequestId(9),
            SearchQuery::Text("tech".into()),
            Duration::from_secs(5),
            None,
        );

        assert!(sink.deliver(channel(&keyring, "Tech")));
        let first = subscription.next().await.expect("one result");
        assert_eq!(first.summary.name, "Tech");

        drop(sink);
        assert!(subscription.next().await.is_none());
    }

    #[test]
    fn test_dropped_subscription_stops_delivery() {
        let keyring = LocalKeyring::new();
        let (sink, subscription) = ResultSink::subscription(
            SearchRequestId(10),
            SearchQuery::Text("tech".into()),
            Duration::from_secs(5),
            None,
        );
        drop(subscription);
        assert!(!sink.deliver(channel(&keyring, "Tech")));
    }
}
