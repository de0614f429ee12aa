//! Versioned channel content graph.
//!
//! A channel is a DAG of signed, content-addressed nodes:
//!
//! ```text
//! ChannelGenesis (group id)
//!     ├── ChannelEdit (admin-signed metadata change)
//!     └── Post (publish-signed, may supersede older posts)
//!             └── Comment (author-signed, threaded)
//!                     ├── Comment (reply)
//!                     └── Vote (one per author and comment)
//! ```
//!
//! Every identifier is the SHA3-512 hash of the node's bincode-encoded
//! content, so ids are identical on every peer regardless of arrival order.
//!
//! Two call surfaces share one [`ChannelEngine`]:
//! - [`ChannelService`]: blocking calls returning `Result`
//! - [`LegacyChannelApi`]: the deprecated token/poll protocol
//!
//! Remote discovery goes through [`search`], which never writes to the local
//! graph; importing a result re-validates it like any other remote node.

mod comment;
pub mod constants;
mod edit;
pub mod files;
mod group;
pub mod legacy;
mod node;
mod post;
pub mod reply;
pub mod search;
pub mod service;
pub mod state;
pub mod store;
pub mod tokens;
pub mod types;
pub mod validation;
mod vote;

pub use comment::{Comment, CommentContent};
pub use edit::{ChannelEdit, ChannelEditContent, EffectiveMetadata};
pub use files::{FileSharing, LocalFileShare};
pub use group::{ChannelGenesis, ChannelGenesisContent, ChannelKeys};
pub use legacy::{LegacyChannelApi, TurtleRequestId};
pub use node::ChannelNode;
pub use post::{Post, PostContent};
pub use reply::Reply;
pub use search::{
    ChannelKeyBundle, ChannelSearchResult, DistantChannel, GroupSummary, NullOverlay, Overlay,
    ResultSink, SearchQuery, SearchRequestId, SearchSubscription,
};
pub use service::{
    ChannelContent, ChannelEditRequest, ChannelEngine, ChannelGroup, ChannelService,
    CommentRecord, GroupMeta, Ingest, MessageMeta, NewChannel, NewComment, NewPost, NewVote,
    PostRecord, VoteRecord,
};
pub use state::{Admission, ChannelGraph, ChannelSettings};
pub use store::{GraphStore, MemoryGraphStore, RocksGraphStore};
pub use tokens::{
    InlineDispatcher, RequestStatus, Token, TokenDispatcher, TokenFetch, TokioDispatcher,
};
pub use types::{
    CircleId, CircleType, ContentHash, FileHash, FileRef, Image, MessageRef, NodeType, PeerId,
    VoteType,
};
pub use validation::{validate_node, ValidationContext, ValidationResult};
pub use vote::{Vote, VoteContent};
