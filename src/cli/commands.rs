//! Command implementations for the chansync CLI.

use crate::channel::{
    ChannelContent, ChannelEditRequest, ChannelEngine, ChannelGroup, ChannelService, CircleId,
    CircleType, ContentHash, FileRef, GroupSummary, NewChannel, NewComment, NewPost, NewVote,
    VoteType,
};
use crate::cli::utils::{format_timestamp, print_json, truncate};
use crate::identity::IdentityId;
use crate::{ChansyncError, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Renders command results as text or as JSON replies.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    json: bool,
}

impl Output {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    /// Prints a result. In JSON mode failures are printed as a reply and the
    /// process exits with status 1.
    pub fn emit<T: Serialize>(&self, result: Result<T>, human: impl FnOnce(&T)) -> Result<()> {
        if self.json {
            let failed = result.is_err();
            print_json(result)?;
            if failed {
                process::exit(1);
            }
            return Ok(());
        }
        let value = result?;
        human(&value);
        Ok(())
    }
}

/// One owned identity.
#[derive(Debug, Serialize)]
pub struct IdentityEntry {
    pub id: IdentityId,
    pub name: String,
}

/// A channel with its current content.
#[derive(Debug, Serialize)]
pub struct ChannelView {
    pub group: ChannelGroup,
    pub content: ChannelContent,
}

/// Execute create-identity command
pub fn create_identity(engine: &ChannelEngine, out: Output, name: &str) -> Result<()> {
    out.emit(engine.create_identity(name), |id| {
        println!("{}", id.to_hex());
    })
}

/// Execute identities command
pub fn identities(engine: &ChannelEngine, out: Output) -> Result<()> {
    let entries: Vec<IdentityEntry> = engine
        .keyring()
        .identities()
        .into_iter()
        .map(|(id, name)| IdentityEntry { id, name })
        .collect();
    out.emit(Ok(entries), |entries| {
        if entries.is_empty() {
            println!("No identities. Create one with `chansync create-identity <name>`.");
        }
        for entry in entries {
            println!("{}  {}", entry.id.to_hex(), entry.name);
        }
    })
}

/// Execute create-channel command
pub fn create_channel(
    engine: &ChannelEngine,
    out: Output,
    name: String,
    description: String,
    author: Option<IdentityId>,
    circle_type: CircleType,
    circle_id: Option<CircleId>,
) -> Result<()> {
    let result = engine.create_channel(NewChannel {
        name,
        description,
        thumbnail: None,
        author,
        circle_type,
        circle_id,
    });
    out.emit(result, |id| {
        info!(group = %id, "Channel created");
        println!("{}", id.to_hex());
    })
}

/// Execute edit-channel command
pub fn edit_channel(
    engine: &ChannelEngine,
    out: Output,
    channel: ContentHash,
    name: Option<String>,
    description: Option<String>,
) -> Result<()> {
    let result = engine.edit_channel(ChannelEditRequest {
        group_id: channel,
        name,
        description,
        thumbnail: None,
    });
    out.emit(result, |id| println!("{}", id.to_hex()))
}

fn share_attachment(engine: &ChannelEngine, path: &Path) -> Result<FileRef> {
    let hash = engine.extra_file_hash(path)?;
    let size = fs::metadata(path)?.len();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| ChansyncError::validation(format!("{} is not a file", path.display())))?;
    Ok(FileRef { hash, name, size })
}

/// Execute post command
#[allow(clippy::too_many_arguments)]
pub fn post(
    engine: &ChannelEngine,
    out: Output,
    channel: ContentHash,
    title: String,
    body: String,
    supersede: Option<ContentHash>,
    files: &[PathBuf],
    author: Option<IdentityId>,
) -> Result<()> {
    let result = files
        .iter()
        .map(|path| share_attachment(engine, path))
        .collect::<Result<Vec<_>>>()
        .and_then(|files| {
            engine.create_post(NewPost {
                channel_id: channel,
                title,
                body,
                files,
                thumbnail: None,
                author,
                orig_post_id: supersede,
            })
        });
    out.emit(result, |id| println!("{}", id.to_hex()))
}

/// Execute comment command
pub fn comment(
    engine: &ChannelEngine,
    out: Output,
    channel: ContentHash,
    post: ContentHash,
    body: String,
    author: IdentityId,
    parent: Option<ContentHash>,
) -> Result<()> {
    let result = engine.create_comment(NewComment {
        channel_id: channel,
        thread_id: post,
        parent_id: parent,
        body,
        author,
    });
    out.emit(result, |id| println!("{}", id.to_hex()))
}

/// Execute vote command
pub fn vote(
    engine: &ChannelEngine,
    out: Output,
    channel: ContentHash,
    post: ContentHash,
    comment: ContentHash,
    vote: VoteType,
    author: IdentityId,
) -> Result<()> {
    let result = engine.create_vote(NewVote {
        channel_id: channel,
        post_id: post,
        comment_id: comment,
        author,
        vote,
    });
    out.emit(result, |id| println!("{}", id.to_hex()))
}

/// Execute subscribe command
pub fn subscribe(engine: &ChannelEngine, out: Output, channel: ContentHash, subscribe: bool) -> Result<()> {
    out.emit(engine.subscribe_to_channel(&channel, subscribe), |_| {
        println!("{} {}", if subscribe { "Subscribed to" } else { "Unsubscribed from" }, channel.to_hex());
    })
}

/// Execute list command
pub fn list(engine: &ChannelEngine, out: Output) -> Result<()> {
    out.emit(engine.get_channels_summaries(), |channels| {
        if channels.is_empty() {
            println!("No channels.");
        }
        for meta in channels {
            println!(
                "{}  {}  v{}  posts={}{}{}",
                meta.group_id.to_hex(),
                truncate(&meta.name, 40),
                meta.version,
                meta.post_count,
                if meta.subscribed { "  subscribed" } else { "" },
                if meta.admin_rights { "  admin" } else if meta.publish_rights { "  publisher" } else { "" },
            );
        }
    })
}

/// Execute show command
pub fn show(engine: &ChannelEngine, out: Output, channel: ContentHash) -> Result<()> {
    let result = engine.get_channels_info(&[channel]).and_then(|mut groups| {
        let group = groups
            .pop()
            .ok_or_else(|| ChansyncError::not_found(format!("Unknown channel {}", channel)))?;
        let content = engine.get_channel_content(&channel, &[])?;
        Ok(ChannelView { group, content })
    });

    out.emit(result, |view| {
        let meta = &view.group.meta;
        println!("{} (v{}, {})", meta.name, meta.version, meta.circle_type);
        if !view.group.description.is_empty() {
            println!("{}", view.group.description);
        }
        println!();
        for post in &view.content.posts {
            println!(
                "[{}] {}  {}",
                post.meta.message_id.short(),
                post.meta.title,
                format_timestamp(post.meta.published_at)
            );
            if !post.msg.is_empty() {
                println!("    {}", truncate(&post.msg, 72));
            }
            for file in &post.files {
                println!("    + {} ({} bytes)", file.name, file.size);
            }
            for comment in view
                .content
                .comments
                .iter()
                .filter(|c| c.meta.thread_id == Some(post.meta.message_id))
            {
                println!(
                    "    [{}] {}  (+{} / -{})",
                    comment.meta.message_id.short(),
                    truncate(&comment.comment, 60),
                    comment.up_votes,
                    comment.down_votes
                );
            }
        }
    })
}

/// Execute search command
pub fn search(engine: &ChannelEngine, out: Output, text: &str) -> Result<()> {
    let found: Arc<Mutex<Vec<GroupSummary>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&found);
    let result = engine
        .local_search_request(
            text,
            Box::new(move |hit| {
                sink.lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .push(hit.summary);
            }),
            None,
        )
        .map(|_| {
            std::mem::take(&mut *found.lock().unwrap_or_else(|p| p.into_inner()))
        });

    out.emit(result, |hits| {
        if hits.is_empty() {
            println!("No matching channels.");
        }
        for hit in hits {
            println!(
                "{}  {}  posts={}",
                hit.group_id.to_hex(),
                truncate(&hit.name, 40),
                hit.post_count
            );
        }
    })
}
