//! Deprecated token/poll call surface.
//!
//! Kept for callers written against the old asynchronous protocol. New code
//! should use [`ChannelService`] directly: every call here forwards to the
//! same engine operations.
//!
//! Submitting a request returns a [`Token`] at once and hands the work to a
//! [`TokenDispatcher`]. The caller then polls [`LegacyChannelApi::request_status`]
//! and fetches the result with the getter matching the request kind:
//!
//! | Request                                            | Fetch with       |
//! |----------------------------------------------------|------------------|
//! | `request_group_info`                               | `get_group_data` |
//! | `request_post_data`                                | `get_post_data`  |
//! | `create_group`, `update_group`, `create_post_request`, `subscribe_to_group`, `set_message_read_status`, `group_share_keys` | `acknowledge` |

use crate::channel::search::{GroupSummary, SearchQuery, SearchRequestId};
use crate::channel::service::{
    ChannelContent, ChannelEditRequest, ChannelEngine, ChannelGroup, ChannelService,
    CommentRecord, NewChannel, NewComment, NewPost, NewVote, PostRecord, VoteRecord,
};
use crate::channel::tokens::{
    PayloadKind, RequestStatus, Token, TokenDispatcher, TokenFetch, TokenPayload, TokenQueue,
};
use crate::channel::types::{ContentHash, MessageRef, PeerId};
use crate::error::{ChansyncError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Request id of the deprecated distant-search calls.
pub type TurtleRequestId = SearchRequestId;

/// Token-based wrapper around a shared [`ChannelEngine`].
pub struct LegacyChannelApi {
    engine: Arc<ChannelEngine>,
    queue: Arc<TokenQueue>,
    dispatcher: Arc<dyn TokenDispatcher>,
}

impl std::fmt::Debug for LegacyChannelApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyChannelApi")
            .field("outstanding", &self.queue.outstanding())
            .finish_non_exhaustive()
    }
}

impl LegacyChannelApi {
    /// Wraps an engine. Unfetched results are kept for the engine's
    /// configured token retention.
    pub fn new(engine: Arc<ChannelEngine>, dispatcher: Arc<dyn TokenDispatcher>) -> Self {
        let queue = TokenQueue::new(engine.config().token_retention());
        Self {
            engine,
            queue: Arc::new(queue),
            dispatcher,
        }
    }

    /// Returns the wrapped engine.
    pub fn engine(&self) -> &Arc<ChannelEngine> {
        &self.engine
    }

    /// Issues a token and schedules `run` against the engine.
    fn submit<F>(&self, operation: &'static str, run: F) -> Result<Token>
    where
        F: FnOnce(&ChannelEngine) -> Result<TokenPayload> + Send + 'static,
    {
        let token = self.queue.submit()?;
        let engine = Arc::clone(&self.engine);
        let queue = Arc::clone(&self.queue);

        self.dispatcher.dispatch(Box::new(move || {
            queue.mark_pending(token);
            let outcome = run(engine.as_ref());
            if let Err(e) = &outcome {
                debug!(token, operation, error = %e, "Token request failed");
            }
            queue.complete(token, outcome);
        }));

        debug!(token, operation, "Submitted token request");
        Ok(token)
    }

    /// Fetches a finished result and unwraps the expected payload.
    fn take<T>(
        &self,
        token: Token,
        kind: PayloadKind,
        extract: fn(TokenPayload) -> Option<T>,
    ) -> Result<TokenFetch<T>> {
        match self.queue.fetch(token, kind)? {
            TokenFetch::NotReady => Ok(TokenFetch::NotReady),
            TokenFetch::Ready(payload) => extract(payload)
                .map(TokenFetch::Ready)
                .ok_or_else(|| ChansyncError::state(format!("Token {} holds no {}", token, kind))),
        }
    }

    // -------------------------------------------------------------------------
    // Submit
    // -------------------------------------------------------------------------

    /// Creates a channel from a record. Acknowledged with the group id.
    pub fn create_group(&self, group: ChannelGroup) -> Result<Token> {
        self.submit("create_group", move |engine| {
            let auto_download = group.auto_download;
            let id = engine.create_channel_with(new_channel(group), auto_download)?;
            Ok(TokenPayload::Ack(Some(id)))
        })
    }

    /// Brings a channel in line with a record: metadata differences become an
    /// edit, subscription and auto-download differences update local
    /// settings, all in one commit. Acknowledged with the edit id, if an edit
    /// was published.
    pub fn update_group(&self, group: ChannelGroup) -> Result<Token> {
        self.submit("update_group", move |engine| {
            let group_id = group.meta.group_id;
            let current = engine
                .get_channels_info(&[group_id])?
                .pop()
                .ok_or_else(|| ChansyncError::not_found(format!("Unknown channel {}", group_id)))?;

            let request = ChannelEditRequest {
                group_id,
                name: (group.meta.name != current.meta.name).then(|| group.meta.name.clone()),
                description: (group.description != current.description)
                    .then(|| group.description.clone()),
                thumbnail: (group.image != current.image)
                    .then(|| group.image.clone().unwrap_or_default()),
            };
            let subscribed = (group.meta.subscribed != current.meta.subscribed)
                .then_some(group.meta.subscribed);
            let auto_download =
                (group.auto_download != current.auto_download).then_some(group.auto_download);
            let edit_id = engine.update_channel(request, subscribed, auto_download)?;
            Ok(TokenPayload::Ack(edit_id))
        })
    }

    /// Publishes a post from a record. Acknowledged with the post id.
    pub fn create_post_request(&self, post: PostRecord) -> Result<Token> {
        let request = new_post(post)?;
        self.submit("create_post", move |engine| {
            Ok(TokenPayload::Ack(Some(engine.create_post(request)?)))
        })
    }

    pub fn subscribe_to_group(&self, group_id: ContentHash, subscribe: bool) -> Result<Token> {
        self.submit("subscribe_to_group", move |engine| {
            engine.subscribe_to_channel(&group_id, subscribe)?;
            Ok(TokenPayload::Ack(None))
        })
    }

    pub fn set_message_read_status(&self, message: MessageRef, read: bool) -> Result<Token> {
        self.submit("set_message_read_status", move |engine| {
            engine.mark_read(message, read)?;
            Ok(TokenPayload::Ack(None))
        })
    }

    /// Requests channel records; an empty list asks for every channel.
    pub fn request_group_info(&self, group_ids: Vec<ContentHash>) -> Result<Token> {
        self.submit("request_group_info", move |engine| {
            Ok(TokenPayload::Groups(engine.get_channels_info(&group_ids)?))
        })
    }

    /// Requests messages of a channel; an empty list asks for all current
    /// content.
    pub fn request_post_data(&self, group_id: ContentHash, message_ids: Vec<ContentHash>) -> Result<Token> {
        self.submit("request_post_data", move |engine| {
            Ok(TokenPayload::Posts(
                engine.get_channel_content(&group_id, &message_ids)?,
            ))
        })
    }

    /// Shares a channel's publish key with peers. Acknowledged without an id.
    pub fn group_share_keys(&self, group_id: ContentHash, peers: Vec<PeerId>) -> Result<Token> {
        self.submit("group_share_keys", move |engine| {
            engine.share_channel_keys(&group_id, &peers)?;
            Ok(TokenPayload::Ack(None))
        })
    }

    // -------------------------------------------------------------------------
    // Poll
    // -------------------------------------------------------------------------

    pub fn request_status(&self, token: Token) -> Result<RequestStatus> {
        self.queue.status(token)
    }

    pub fn get_group_data(&self, token: Token) -> Result<TokenFetch<Vec<ChannelGroup>>> {
        self.take(token, PayloadKind::Groups, |payload| match payload {
            TokenPayload::Groups(groups) => Some(groups),
            _ => None,
        })
    }

    pub fn get_post_data(&self, token: Token) -> Result<TokenFetch<ChannelContent>> {
        self.take(token, PayloadKind::Posts, |payload| match payload {
            TokenPayload::Posts(content) => Some(content),
            _ => None,
        })
    }

    /// Fetches the acknowledgement of a mutation, with the created id if any.
    pub fn acknowledge(&self, token: Token) -> Result<TokenFetch<Option<ContentHash>>> {
        self.take(token, PayloadKind::Ack, |payload| match payload {
            TokenPayload::Ack(id) => Some(id),
            _ => None,
        })
    }

    // -------------------------------------------------------------------------
    // Record-style calls
    // -------------------------------------------------------------------------

    /// Creates a channel and replaces the record with the stored one.
    pub fn create_channel_legacy(&self, group: &mut ChannelGroup) -> Result<()> {
        let id = self
            .engine
            .create_channel_with(new_channel(group.clone()), group.auto_download)?;
        if let Some(stored) = self.engine.get_channels_info(&[id])?.pop() {
            *group = stored;
        }
        Ok(())
    }

    /// Publishes a post and replaces the record with the stored one.
    pub fn create_post_legacy(&self, post: &mut PostRecord) -> Result<()> {
        let group_id = post.meta.group_id;
        let id = self.engine.create_post(new_post(post.clone())?)?;
        if let Some(stored) = self.engine.get_channel_content(&group_id, &[id])?.posts.pop() {
            *post = stored;
        }
        Ok(())
    }

    /// Publishes a comment and replaces the record with the stored one.
    pub fn create_comment_legacy(&self, comment: &mut CommentRecord) -> Result<()> {
        let group_id = comment.meta.group_id;
        let request = NewComment {
            channel_id: group_id,
            thread_id: comment
                .meta
                .thread_id
                .ok_or_else(|| ChansyncError::validation("Comment has no thread id"))?,
            parent_id: comment.meta.parent_id,
            body: comment.comment.clone(),
            author: comment
                .meta
                .author
                .ok_or_else(|| ChansyncError::validation("Comment has no author"))?,
        };
        let id = self.engine.create_comment(request)?;
        if let Some(stored) = self.engine.get_channel_content(&group_id, &[id])?.comments.pop() {
            *comment = stored;
        }
        Ok(())
    }

    /// Publishes a vote and replaces the record with the stored one.
    pub fn create_vote_legacy(&self, vote: &mut VoteRecord) -> Result<()> {
        let group_id = vote.meta.group_id;
        let request = NewVote {
            channel_id: group_id,
            post_id: vote
                .meta
                .thread_id
                .ok_or_else(|| ChansyncError::validation("Vote has no post id"))?,
            comment_id: vote
                .meta
                .parent_id
                .ok_or_else(|| ChansyncError::validation("Vote has no comment id"))?,
            author: vote
                .meta
                .author
                .ok_or_else(|| ChansyncError::validation("Vote has no author"))?,
            vote: vote.vote,
        };
        let id = self.engine.create_vote(request)?;
        if let Some(stored) = self.engine.get_channel_content(&group_id, &[id])?.votes.pop() {
            *vote = stored;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Distant search
    // -------------------------------------------------------------------------

    /// Requests one channel from the overlay. Results are collected for
    /// [`Self::retrieve_distant_group`].
    pub fn turtle_group_request(&self, group_id: &ContentHash) -> Result<TurtleRequestId> {
        self.engine
            .collect_search(SearchQuery::Channel(*group_id), None)
    }

    /// Searches the overlay. Results are collected for
    /// [`Self::retrieve_distant_search_results`].
    pub fn turtle_search_request_legacy(&self, match_string: &str) -> Result<TurtleRequestId> {
        self.engine
            .collect_search(SearchQuery::Text(match_string.to_string()), None)
    }

    pub fn retrieve_distant_search_results(&self, request: TurtleRequestId) -> BTreeMap<ContentHash, GroupSummary> {
        self.engine.search_results(request)
    }

    pub fn clear_distant_search_results(&self, request: TurtleRequestId) {
        self.engine.clear_search_results(request);
    }

    pub fn retrieve_distant_group(&self, group_id: &ContentHash) -> Option<ChannelGroup> {
        self.engine.distant_group(group_id)
    }
}

fn new_channel(group: ChannelGroup) -> NewChannel {
    NewChannel {
        name: group.meta.name,
        description: group.description,
        thumbnail: group.image,
        author: group.meta.author,
        circle_type: group.meta.circle_type,
        circle_id: group.meta.circle_id,
    }
}

fn new_post(post: PostRecord) -> Result<NewPost> {
    if post.older_versions.len() > 1 {
        warn!(group = %post.meta.group_id, versions = post.older_versions.len(), "Rejecting post naming several older versions");
        return Err(ChansyncError::validation(
            "A post can supersede at most one older version",
        ));
    }
    Ok(NewPost {
        channel_id: post.meta.group_id,
        title: post.meta.title,
        body: post.msg,
        files: post.files,
        thumbnail: post.thumbnail,
        author: post.meta.author,
        orig_post_id: post.older_versions.into_iter().next(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::service::{GroupMeta, MessageMeta};
    use crate::channel::tokens::InlineDispatcher;
    use crate::channel::types::{CircleType, NodeType};
    use crate::config::ServiceConfig;

    fn api() -> LegacyChannelApi {
        let engine = ChannelEngine::in_memory(ServiceConfig::default()).unwrap();
        LegacyChannelApi::new(Arc::new(engine), Arc::new(InlineDispatcher))
    }

    fn draft_group(name: &str) -> ChannelGroup {
        ChannelGroup {
            meta: GroupMeta {
                group_id: ContentHash::zero(),
                name: name.to_string(),
                author: None,
                circle_type: CircleType::Public,
                circle_id: None,
                subscribed: false,
                version: 0,
                last_post_at: 0,
                post_count: 0,
                publish_rights: false,
                admin_rights: false,
            },
            description: "legacy".to_string(),
            image: None,
            auto_download: true,
        }
    }

    fn acked_id(api: &LegacyChannelApi, token: Token) -> ContentHash {
        api.acknowledge(token)
            .unwrap()
            .ready()
            .expect("inline dispatch completes before returning")
            .expect("request created a node")
    }

    #[test]
    fn test_create_group_then_fetch_info() {
        let api = api();
        let token = api.create_group(draft_group("Tech")).unwrap();
        assert_eq!(api.request_status(token).unwrap(), RequestStatus::Complete);
        let id = acked_id(&api, token);

        let info = api.request_group_info(vec![id]).unwrap();
        let groups = api.get_group_data(info).unwrap().ready().unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].meta.name, "Tech");
        assert!(groups[0].auto_download);
        assert!(groups[0].meta.subscribed);
    }

    #[test]
    fn test_update_group_publishes_edit_for_changes_only() {
        let api = api();
        let mut group = draft_group("Tech");
        api.create_channel_legacy(&mut group).unwrap();
        assert_eq!(group.meta.version, 1);

        let unchanged = api.update_group(group.clone()).unwrap();
        assert_eq!(api.acknowledge(unchanged).unwrap().ready(), Some(None));

        group.meta.name = "Tech Weekly".to_string();
        group.meta.subscribed = false;
        let token = api.update_group(group.clone()).unwrap();
        assert!(api.acknowledge(token).unwrap().ready().unwrap().is_some());

        let info = api.engine().get_channels_info(&[group.meta.group_id]).unwrap();
        assert_eq!(info[0].meta.name, "Tech Weekly");
        assert_eq!(info[0].meta.version, 2);
        assert!(!info[0].meta.subscribed);
    }

    #[test]
    fn test_failed_request_surfaces_error_on_fetch() {
        let api = api();
        let token = api.create_group(draft_group("")).unwrap();
        assert_eq!(api.request_status(token).unwrap(), RequestStatus::Failed);
        assert!(matches!(api.acknowledge(token), Err(ChansyncError::Validation(_))));
        assert!(matches!(api.request_status(token), Err(ChansyncError::NotFound(_))));
    }

    #[test]
    fn test_wrong_fetch_kind_keeps_token() {
        let api = api();
        let token = api.request_group_info(Vec::new()).unwrap();
        assert!(matches!(api.get_post_data(token), Err(ChansyncError::State(_))));
        assert!(api.get_group_data(token).unwrap().ready().is_some());
        assert!(matches!(api.get_group_data(token), Err(ChansyncError::NotFound(_))));
    }

    #[test]
    fn test_post_record_roundtrip() {
        let api = api();
        let mut group = draft_group("Tech");
        api.create_channel_legacy(&mut group).unwrap();

        let mut post = PostRecord {
            meta: MessageMeta {
                title: "Hello".to_string(),
                ..MessageMeta::draft(group.meta.group_id, NodeType::Post)
            },
            older_versions: Default::default(),
            msg: "first post".to_string(),
            files: Vec::new(),
            count: 0,
            size: 0,
            thumbnail: None,
        };
        api.create_post_legacy(&mut post).unwrap();
        assert_ne!(post.meta.message_id, ContentHash::zero());
        assert!(post.meta.published_at > 0);

        let mut v2 = post.clone();
        v2.meta.title = "Hello v2".to_string();
        v2.older_versions.insert(post.meta.message_id);
        let token = api.create_post_request(v2).unwrap();
        acked_id(&api, token);

        let content = api
            .request_post_data(group.meta.group_id, Vec::new())
            .unwrap();
        let posts = api.get_post_data(content).unwrap().ready().unwrap().posts;
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].meta.title, "Hello v2");
    }

    #[test]
    fn test_post_with_two_older_versions_rejected() {
        let api = api();
        let mut post = PostRecord {
            meta: MessageMeta::draft(ContentHash::digest(b"group"), NodeType::Post),
            older_versions: [ContentHash::digest(b"a"), ContentHash::digest(b"b")]
                .into_iter()
                .collect(),
            msg: String::new(),
            files: Vec::new(),
            count: 0,
            size: 0,
            thumbnail: None,
        };
        assert!(matches!(
            api.create_post_legacy(&mut post),
            Err(ChansyncError::Validation(_))
        ));
    }

    #[test]
    fn test_distant_search_without_peers_collects_nothing() {
        let api = api();
        let request = api.turtle_search_request_legacy("tech").unwrap();
        assert!(api.retrieve_distant_search_results(request).is_empty());
        assert!(api.retrieve_distant_group(&ContentHash::digest(b"x")).is_none());
    }
}
