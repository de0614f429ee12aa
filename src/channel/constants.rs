//! Shared constants for channel validation and limits.
//!
//! Locally created and remotely received nodes are checked against the same
//! limits.

// =============================================================================
// Content Size Limits
// =============================================================================

/// Maximum channel name size (256 bytes).
pub const MAX_NAME_SIZE: usize = 256;

/// Maximum channel description size (10KB).
pub const MAX_DESCRIPTION_SIZE: usize = 10 * 1024;

/// Maximum post title size (512 bytes).
pub const MAX_TITLE_SIZE: usize = 512;

/// Maximum post body size (256KB).
pub const MAX_POST_BODY_SIZE: usize = 256 * 1024;

/// Maximum comment body size (64KB).
pub const MAX_COMMENT_BODY_SIZE: usize = 64 * 1024;

/// Maximum thumbnail size (512KB).
pub const MAX_THUMBNAIL_SIZE: usize = 512 * 1024;

/// Maximum number of files attached to one post.
pub const MAX_FILES_PER_POST: usize = 256;

/// Maximum file name size in a post's file list.
pub const MAX_FILE_NAME_SIZE: usize = 1024;

/// Maximum number of superseded versions a single post may name.
pub const MAX_OLDER_VERSIONS: usize = 64;

// =============================================================================
// Graph Limits
// =============================================================================

/// Upper bound on comment parent-chain walks, independent of graph size.
pub const MAX_COMMENT_DEPTH: usize = 10_000;

/// Maximum nodes held while waiting for a missing parent.
pub const MAX_ORPHANS: usize = 10_000;

// =============================================================================
// Timestamp Validation
// =============================================================================

/// Maximum allowed clock skew for timestamps (5 minutes in milliseconds).
pub const MAX_CLOCK_SKEW_MS: u64 = 5 * 60 * 1000;

/// Minimum valid timestamp (2024-01-01 00:00:00 UTC in milliseconds).
pub const MIN_VALID_TIMESTAMP_MS: u64 = 1704067200000;

// =============================================================================
// Search Windows
// =============================================================================

/// Default window for overlay searches and channel requests (seconds).
pub const DEFAULT_DISTANT_SEARCH_SECS: u64 = 300;

/// Default window for local searches (seconds).
pub const DEFAULT_LOCAL_SEARCH_SECS: u64 = 30;

/// Retrieve-style search requests whose results are kept; older ones are
/// forgotten first.
pub const MAX_RETAINED_SEARCHES: usize = 64;

/// Distant channels kept for `retrieve_distant_group`; least recently
/// received are evicted first.
pub const MAX_RETAINED_CHANNELS: usize = 1024;

/// Default lifetime of a completed but unfetched token result (seconds).
pub const DEFAULT_TOKEN_RETENTION_SECS: u64 = 600;
