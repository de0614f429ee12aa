//! Validation rules for channel graph nodes.
//!
//! Every node, whether created locally or received from a peer, passes
//! through these checks before it is accepted:
//! - Content hash and signature verification
//! - Parent existence and kind checks
//! - Comment parent-chain checks (bounded walk, no cycles)
//! - Supersession checks for post versions
//! - Timestamp sanity checks
//!
//! Missing parents are not validation failures; the graph buffers such nodes
//! as orphans before validation runs.

use crate::channel::constants::{
    MAX_CLOCK_SKEW_MS, MAX_COMMENT_DEPTH, MIN_VALID_TIMESTAMP_MS,
};
use crate::channel::group::{check_circle, check_description, check_name, check_thumbnail};
use crate::channel::{ChannelEdit, ChannelGenesis, ChannelNode, Comment, ContentHash, Post, Vote};
use crate::error::{ChansyncError, Result};
use std::collections::{HashMap, HashSet};

/// Context for validating nodes against the existing graph.
#[derive(Debug)]
pub struct ValidationContext<'a> {
    /// All accepted nodes, keyed by content hash.
    nodes: &'a HashMap<ContentHash, ChannelNode>,
    /// Current timestamp in milliseconds (for timestamp validation).
    current_time_ms: u64,
}

impl<'a> ValidationContext<'a> {
    /// Creates a new validation context.
    pub fn new(nodes: &'a HashMap<ContentHash, ChannelNode>, current_time_ms: u64) -> Self {
        Self {
            nodes,
            current_time_ms,
        }
    }

    /// Gets a node by its hash.
    pub fn get_node(&self, hash: &ContentHash) -> Option<&'a ChannelNode> {
        self.nodes.get(hash)
    }

    /// Gets the genesis of a channel.
    pub fn genesis(&self, channel_id: &ContentHash) -> Option<&'a ChannelGenesis> {
        self.get_node(channel_id).and_then(ChannelNode::as_genesis)
    }
}

/// Result of validation containing every problem found.
#[derive(Debug)]
pub struct ValidationResult {
    /// Whether the node is valid.
    pub is_valid: bool,
    /// Validation errors, if any.
    pub errors: Vec<String>,
}

impl ValidationResult {
    /// Creates a successful validation result.
    pub fn ok() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
        }
    }

    /// Adds an error to the result.
    pub fn add_error(&mut self, error: String) {
        self.is_valid = false;
        self.errors.push(error);
    }

    /// Records the error of a failed check, if any.
    fn check(&mut self, outcome: Result<()>) {
        if let Err(e) = outcome {
            self.add_error(e.to_string());
        }
    }

    /// Converts the result into a `Validation` error when invalid.
    pub fn into_result(self) -> Result<()> {
        if self.is_valid {
            Ok(())
        } else {
            Err(ChansyncError::validation(self.errors.join("; ")))
        }
    }
}

/// Validates any channel node against the context.
pub fn validate_node(node: &ChannelNode, ctx: &ValidationContext) -> ValidationResult {
    let mut result = ValidationResult::ok();
    check_timestamp(node.created_at(), ctx, &mut result);

    match node {
        ChannelNode::Genesis(genesis) => validate_genesis(genesis, &mut result),
        ChannelNode::Edit(edit) => validate_edit(edit, ctx, &mut result),
        ChannelNode::Post(post) => validate_post(post, ctx, &mut result),
        ChannelNode::Comment(comment) => validate_comment(comment, ctx, &mut result),
        ChannelNode::Vote(vote) => validate_vote(vote, ctx, &mut result),
    }

    result
}

fn check_timestamp(created_at: u64, ctx: &ValidationContext, result: &mut ValidationResult) {
    if created_at < MIN_VALID_TIMESTAMP_MS {
        result.add_error("Timestamp is unreasonably old or invalid".to_string());
    }
    if created_at > ctx.current_time_ms.saturating_add(MAX_CLOCK_SKEW_MS) {
        result.add_error(format!(
            "Timestamp is {} ms in the future",
            created_at - ctx.current_time_ms
        ));
    }
}

fn validate_genesis(genesis: &ChannelGenesis, result: &mut ValidationResult) {
    let content = &genesis.content;
    result.check(check_name(&content.name));
    result.check(check_description(&content.description));
    result.check(check_thumbnail(content.thumbnail.as_ref()));
    result.check(check_circle(content.circle_type, content.circle_id.as_ref()));

    if let Err(e) = genesis.verify() {
        result.add_error(format!("Channel genesis verification failed: {}", e));
    }
}

fn validate_edit(edit: &ChannelEdit, ctx: &ValidationContext, result: &mut ValidationResult) {
    let content = &edit.content;
    if let Some(name) = &content.name {
        result.check(check_name(name));
    }
    if let Some(description) = &content.description {
        result.check(check_description(description));
    }
    result.check(check_thumbnail(content.thumbnail.as_ref()));

    let Some(genesis) = ctx.genesis(edit.group_id()) else {
        result.add_error("Edit targets a node that is not a channel".to_string());
        return;
    };

    if let Err(e) = edit.verify(genesis) {
        result.add_error(format!("Channel edit verification failed: {}", e));
    }
}

fn validate_post(post: &Post, ctx: &ValidationContext, result: &mut ValidationResult) {
    result.check(post.content.check_limits());

    let Some(genesis) = ctx.genesis(post.channel_id()) else {
        result.add_error("Post references a node that is not a channel".to_string());
        return;
    };

    if post.older_versions().contains(post.hash()) {
        result.add_error("Post cannot supersede itself".to_string());
    }
    for older in post.older_versions() {
        match ctx.get_node(older) {
            // Unknown versions are allowed: they may simply not have arrived.
            None => {}
            Some(ChannelNode::Post(previous)) if previous.channel_id() == post.channel_id() => {}
            Some(ChannelNode::Post(_)) => result.add_error(format!(
                "Superseded post {} belongs to another channel",
                older
            )),
            Some(other) => result.add_error(format!(
                "Superseded version {} is a {}, not a post",
                older,
                other.node_type()
            )),
        }
    }

    if let Err(e) = post.verify(genesis) {
        result.add_error(format!("Post verification failed: {}", e));
    }
}

fn validate_comment(comment: &Comment, ctx: &ValidationContext, result: &mut ValidationResult) {
    result.check(comment.content.check_limits());

    if comment.parent_id() == comment.hash() {
        result.add_error("Comment cannot be its own parent".to_string());
        return;
    }

    if ctx.genesis(comment.channel_id()).is_none() {
        result.add_error("Comment references a node that is not a channel".to_string());
        return;
    }

    match ctx.get_node(comment.thread_id()) {
        Some(ChannelNode::Post(post)) if post.channel_id() == comment.channel_id() => {}
        Some(ChannelNode::Post(_)) => {
            result.add_error("Comment thread belongs to another channel".to_string());
            return;
        }
        _ => {
            result.add_error("Comment thread is not a post".to_string());
            return;
        }
    }

    if let Err(e) = walk_parent_chain(comment, ctx) {
        result.add_error(e.to_string());
    }

    if let Err(e) = comment.verify() {
        result.add_error(format!("Comment verification failed: {}", e));
    }
}

/// Walks `parent_id` links from the comment up to its thread.
///
/// The walk is bounded by the graph size, so a corrupt or adversarial chain
/// that loops is reported instead of followed forever.
pub fn walk_parent_chain(comment: &Comment, ctx: &ValidationContext) -> Result<usize> {
    let thread_id = comment.thread_id();
    let limit = (ctx.nodes.len() + 1).min(MAX_COMMENT_DEPTH);
    let mut visited: HashSet<ContentHash> = HashSet::new();
    visited.insert(*comment.hash());

    let mut current = *comment.parent_id();
    let mut steps = 0usize;

    while current != *thread_id {
        steps += 1;
        if steps > limit {
            return Err(ChansyncError::validation(
                "Comment parent chain exceeds the graph size",
            ));
        }
        if !visited.insert(current) {
            return Err(ChansyncError::validation(format!(
                "Comment parent chain revisits {}",
                current
            )));
        }

        let parent = match ctx.get_node(&current) {
            Some(ChannelNode::Comment(parent)) => parent,
            Some(other) => {
                return Err(ChansyncError::validation(format!(
                    "Comment parent {} is a {}, not a comment",
                    current,
                    other.node_type()
                )))
            }
            None => {
                return Err(ChansyncError::validation(format!(
                    "Comment parent chain is broken at {}",
                    current
                )))
            }
        };

        if parent.thread_id() != thread_id {
            return Err(ChansyncError::validation(
                "Comment parent belongs to another thread",
            ));
        }
        current = *parent.parent_id();
    }

    Ok(steps)
}

fn validate_vote(vote: &Vote, ctx: &ValidationContext, result: &mut ValidationResult) {
    if ctx.genesis(vote.channel_id()).is_none() {
        result.add_error("Vote references a node that is not a channel".to_string());
        return;
    }

    match ctx.get_node(vote.post_id()) {
        Some(ChannelNode::Post(post)) if post.channel_id() == vote.channel_id() => {}
        _ => result.add_error("Vote post is not a post of this channel".to_string()),
    }

    match ctx.get_node(vote.comment_id()) {
        Some(ChannelNode::Comment(comment))
            if comment.channel_id() == vote.channel_id()
                && comment.thread_id() == vote.post_id() => {}
        _ => result.add_error("Vote target is not a comment of this post".to_string()),
    }

    if let Err(e) = vote.verify() {
        result.add_error(format!("Vote verification failed: {}", e));
    }
}
