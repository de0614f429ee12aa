//! Overlay search tests.
//!
//! A loopback overlay answers requests from other in-process engines, so the
//! full path is exercised: dispatch, serving, verification, deduplication,
//! collection and import.

use chansync::channel::{
    ChannelEngine, ChannelSearchResult, ChannelService, CircleId, CircleType, ContentHash,
    DistantChannel, InlineDispatcher, LegacyChannelApi, LocalFileShare,
    MemoryGraphStore, NewChannel, NewPost, Overlay, PeerId, ResultSink, SearchQuery,
    SearchRequestId,
};
use chansync::config::ServiceConfig;
use chansync::identity::LocalKeyring;
use chansync::ChansyncError;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Answers requests from a set of peer engines.
struct Loopback {
    peers: Vec<Arc<ChannelEngine>>,
    /// Number of times each answer is sent.
    repeat: usize,
    /// Deliver from a background thread after this delay.
    delay: Option<Duration>,
}

impl Loopback {
    fn answers(&self, query: &SearchQuery) -> Vec<DistantChannel> {
        self.peers
            .iter()
            .flat_map(|peer| match query {
                SearchQuery::Text(text) => peer.serve_search(text),
                SearchQuery::Channel(id) => peer.serve_channel(id).into_iter().collect(),
            })
            .collect()
    }
}

impl Overlay for Loopback {
    fn search(&self, _request: SearchRequestId, query: &SearchQuery, sink: ResultSink) -> chansync::Result<()> {
        let answers = self.answers(query);
        let repeat = self.repeat;
        let send = move || {
            for _ in 0..repeat {
                for channel in &answers {
                    sink.deliver(channel.clone());
                }
            }
        };
        match self.delay {
            Some(delay) => {
                thread::spawn(move || {
                    thread::sleep(delay);
                    send();
                });
            }
            None => send(),
        }
        Ok(())
    }

    fn share_keys(&self, _peers: &[PeerId], _bundle: &chansync::channel::ChannelKeyBundle) -> chansync::Result<()> {
        Ok(())
    }
}

fn peer_config() -> ServiceConfig {
    ServiceConfig {
        friend_groups: vec![CircleId::new("crew")],
        ..Default::default()
    }
}

fn peer() -> Arc<ChannelEngine> {
    Arc::new(ChannelEngine::in_memory(peer_config()).unwrap())
}

fn searcher(peers: Vec<Arc<ChannelEngine>>, repeat: usize, delay: Option<Duration>) -> ChannelEngine {
    ChannelEngine::new(
        ServiceConfig::default(),
        Arc::new(LocalKeyring::new()),
        Arc::new(MemoryGraphStore::new()),
        Arc::new(Loopback { peers, repeat, delay }),
        Arc::new(LocalFileShare::new()),
    )
    .unwrap()
}

fn publish(engine: &ChannelEngine, name: &str, description: &str) -> ContentHash {
    engine
        .create_channel(NewChannel {
            name: name.to_string(),
            description: description.to_string(),
            ..Default::default()
        })
        .unwrap()
}

type Collected = Arc<Mutex<Vec<ChannelSearchResult>>>;

fn collector() -> (Collected, chansync::channel::search::SearchCallback) {
    let found: Collected = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&found);
    (found, Box::new(move |hit| sink.lock().unwrap().push(hit)))
}

// =============================================================================
// Text and Channel Requests
// =============================================================================

#[test]
fn test_search_without_peers_returns_nothing() {
    let engine = ChannelEngine::in_memory(ServiceConfig::default()).unwrap();
    let (found, callback) = collector();
    let request = engine
        .turtle_search_request("Tech", callback, Some(Duration::from_secs(5)))
        .unwrap();
    thread::sleep(Duration::from_millis(50));
    assert!(found.lock().unwrap().is_empty());
    assert!(engine.search_results(request).is_empty());
}

#[test]
fn test_text_search_matches_public_channels_only() {
    let remote = peer();
    let tech = publish(&remote, "Tech", "gadgets");
    publish(&remote, "Cooking", "recipes and technique");
    publish(&remote, "Gardening", "roses");
    remote
        .create_channel(NewChannel {
            name: "Tech crew".to_string(),
            circle_type: CircleType::NodesGroup,
            circle_id: Some(CircleId::new("crew")),
            ..Default::default()
        })
        .unwrap();

    let engine = searcher(vec![remote], 1, None);
    let (found, callback) = collector();
    let request = engine.turtle_search_request("TECH", callback, None).unwrap();

    let found = found.lock().unwrap();
    let mut names: Vec<&str> = found.iter().map(|r| r.summary.name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["Cooking", "Tech"]);
    assert!(found.iter().all(|r| r.request_id == request));

    // Callback searches hand results over and keep nothing.
    assert!(engine.search_results(request).is_empty());
    assert!(engine.distant_group(&tech).is_none());

    // Searching never writes to the local graph.
    assert_eq!(engine.node_count(), 0);
}

#[test]
fn test_collected_search_results_can_be_retrieved_and_cleared() {
    let remote = peer();
    let tech = publish(&remote, "Tech", "gadgets");
    publish(&remote, "Cooking", "recipes and technique");
    let engine = searcher(vec![remote], 1, None);

    let request = engine
        .collect_search(SearchQuery::Text("TECH".to_string()), None)
        .unwrap();
    let collected = engine.search_results(request);
    assert_eq!(collected.len(), 2);
    assert_eq!(collected[&tech].description, "gadgets");
    assert_eq!(engine.distant_group(&tech).unwrap().meta.name, "Tech");

    engine.clear_search_results(request);
    assert!(engine.search_results(request).is_empty());
    assert_eq!(engine.node_count(), 0);
}

#[test]
fn test_duplicate_results_are_delivered_once() {
    let remote = peer();
    publish(&remote, "Tech", "");
    let engine = searcher(vec![Arc::clone(&remote), remote], 3, None);

    let (found, callback) = collector();
    engine.turtle_search_request("tech", callback, None).unwrap();
    assert_eq!(found.lock().unwrap().len(), 1);

    let request = engine
        .collect_search(SearchQuery::Text("tech".to_string()), None)
        .unwrap();
    assert_eq!(engine.search_results(request).len(), 1);
}

#[test]
fn test_channel_request() {
    let remote = peer();
    let wanted = publish(&remote, "Tech", "");
    publish(&remote, "Other", "");
    let engine = searcher(vec![remote], 1, None);

    let (found, callback) = collector();
    engine.turtle_channel_request(&wanted, callback, None).unwrap();
    let found = found.lock().unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].summary.group_id, wanted);
}

#[test]
fn test_invalid_requests() {
    let engine = searcher(Vec::new(), 1, None);
    let (_, callback) = collector();
    assert!(matches!(
        engine.turtle_search_request("   ", callback, None),
        Err(ChansyncError::Validation(_))
    ));
    let (_, callback) = collector();
    assert!(matches!(
        engine.turtle_search_request("tech", callback, Some(Duration::ZERO)),
        Err(ChansyncError::Validation(_))
    ));
}

// =============================================================================
// Result Sink
// =============================================================================

#[test]
fn test_sink_discards_forged_and_late_results() {
    let remote = peer();
    let id = publish(&remote, "Tech", "");
    let genuine = remote.serve_channel(&id).unwrap();

    let (found, callback) = collector();
    let sink = ResultSink::with_callback(
        SearchRequestId(7),
        SearchQuery::Text("tech".to_string()),
        Duration::from_secs(5),
        None,
        callback,
    );

    let mut forged = genuine.clone();
    forged.genesis.content.name = "Tech (official)".to_string();
    assert!(!sink.deliver(forged));

    assert!(sink.deliver(genuine.clone()));
    assert!(!sink.deliver(genuine.clone()));
    assert_eq!(sink.delivered(), 1);
    assert_eq!(found.lock().unwrap().len(), 1);

    let (late, callback) = collector();
    let expired = ResultSink::with_callback(
        SearchRequestId(8),
        SearchQuery::Text("tech".to_string()),
        Duration::from_millis(1),
        None,
        callback,
    );
    thread::sleep(Duration::from_millis(20));
    assert!(expired.is_expired());
    assert!(!expired.deliver(genuine));
    assert!(late.lock().unwrap().is_empty());
}

#[test]
fn test_sink_rejects_results_for_other_queries() {
    let remote = peer();
    let id = publish(&remote, "Gardening", "");
    let (found, callback) = collector();
    let sink = ResultSink::with_callback(
        SearchRequestId(1),
        SearchQuery::Text("tech".to_string()),
        Duration::from_secs(5),
        None,
        callback,
    );
    assert!(!sink.deliver(remote.serve_channel(&id).unwrap()));
    assert!(found.lock().unwrap().is_empty());
}

// =============================================================================
// Subscriptions and Import
// =============================================================================

#[tokio::test]
async fn test_subscription_yields_late_results() {
    let remote = peer();
    let id = publish(&remote, "Tech", "");
    let engine = searcher(vec![remote], 2, Some(Duration::from_millis(50)));

    let mut subscription = engine
        .subscribe_search(SearchQuery::Text("tech".to_string()), Some(Duration::from_secs(2)))
        .unwrap();
    let first = subscription.next().await.expect("one result");
    assert_eq!(first.summary.group_id, id);
    assert_eq!(first.request_id, subscription.id());
    assert!(subscription.next().await.is_none());
}

#[tokio::test]
async fn test_subscription_closes_at_deadline() {
    let engine = searcher(Vec::new(), 1, None);
    let mut subscription = engine
        .subscribe_search(SearchQuery::Text("tech".to_string()), Some(Duration::from_millis(100)))
        .unwrap();
    assert!(subscription.next().await.is_none());
    assert!(subscription.try_next().is_none());
}

#[test]
fn test_import_distant_channel() {
    let remote = peer();
    let id = publish(&remote, "Tech", "gadgets");
    remote
        .edit_channel(chansync::channel::ChannelEditRequest {
            group_id: id,
            name: None,
            description: Some("gadgets and code".to_string()),
            thumbnail: None,
        })
        .unwrap();
    let engine = searcher(vec![remote], 1, None);

    let (found, callback) = collector();
    engine.turtle_search_request("tech", callback, None).unwrap();
    let channel = found.lock().unwrap().pop().unwrap().channel;

    assert_eq!(engine.import_distant_channel(channel.clone()).unwrap(), id);
    assert_eq!(engine.import_distant_channel(channel).unwrap(), id);
    assert_eq!(engine.node_count(), 2);

    let group = engine.get_channels_info(&[id]).unwrap().remove(0);
    assert_eq!(group.meta.name, "Tech");
    assert_eq!(group.description, "gadgets and code");
    assert_eq!(group.meta.version, 2);
    assert!(!group.meta.publish_rights);

    let post = engine.create_post(NewPost {
        channel_id: id,
        title: "Hi".to_string(),
        body: String::new(),
        files: Vec::new(),
        thumbnail: None,
        author: None,
        orig_post_id: None,
    });
    assert!(matches!(post, Err(ChansyncError::Permission(_))));
}

#[test]
fn test_legacy_distant_retrieval() {
    let remote = peer();
    let id = publish(&remote, "Tech", "gadgets");
    let engine = Arc::new(searcher(vec![remote], 1, None));
    let api = LegacyChannelApi::new(engine, Arc::new(InlineDispatcher));

    let request = api.turtle_search_request_legacy("gadget").unwrap();
    let results = api.retrieve_distant_search_results(request);
    assert_eq!(results.len(), 1);
    assert_eq!(results[&id].name, "Tech");

    let group = api.retrieve_distant_group(&id).expect("cached result");
    assert_eq!(group.meta.name, "Tech");
    assert!(!group.meta.subscribed);

    api.clear_distant_search_results(request);
    assert!(api.retrieve_distant_search_results(request).is_empty());

    let by_id = api.turtle_group_request(&id).unwrap();
    assert_eq!(api.retrieve_distant_search_results(by_id).len(), 1);
}
