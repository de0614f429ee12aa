//! # chansync - Versioned channel synchronization
//!
//! Channels are append-only graphs of signed, content-addressed nodes: a
//! genesis fixing the channel's keys, admin-signed metadata edits, posts
//! signed with the channel's publish key, and author-signed comments and
//! votes. Every peer derives the same identifiers from the same content, so
//! graphs received in any order converge.
//!
//! ## Cryptography
//!
//! - **Signatures**: ML-DSA-87 over the node's SHA3-512 content hash
//! - **Identities**: SHA3-256 of the verifying key
//! - **File hashes**: SHA3-256 of the file contents
//!
//! ## Example
//!
//! ```rust,no_run
//! use chansync::channel::{ChannelEngine, ChannelService, NewChannel, NewPost};
//! use chansync::config::ServiceConfig;
//! # fn main() -> chansync::Result<()> {
//! let engine = ChannelEngine::in_memory(ServiceConfig::default())?;
//! let channel = engine.create_channel(NewChannel {
//!     name: "Tech".to_string(),
//!     ..Default::default()
//! })?;
//! let post = engine.create_post(NewPost {
//!     channel_id: channel,
//!     title: "Hello".to_string(),
//!     body: "First post".to_string(),
//!     files: Vec::new(),
//!     thumbnail: None,
//!     author: None,
//!     orig_post_id: None,
//! })?;
//! println!("published {}", post);
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod cli;
pub mod config;
pub mod dag;
pub mod error;
pub mod identity;
pub mod storage;

pub use error::{ChansyncError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
