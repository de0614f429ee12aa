//! Token bookkeeping for the deprecated request/poll protocol.
//!
//! Every request gets a `u32` token from a monotonic counter starting at 1.
//! Tokens are never reused: when the counter runs out, submission fails with a
//! state error instead of wrapping.
//!
//! ```text
//! Submitted ──► Pending ──► Complete
//!                      └──► Failed
//! ```
//!
//! A result is fetched exactly once. Fetching removes the token, so a second
//! fetch reports `NotFound`. Results nobody fetches are reaped after the
//! retention window.

use crate::channel::service::{ChannelContent, ChannelGroup};
use crate::channel::types::ContentHash;
use crate::error::{ChansyncError, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Opaque request handle.
pub type Token = u32;

/// Lifecycle of a token request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// Accepted, not yet picked up by the dispatcher.
    Submitted,
    /// Running.
    Pending,
    /// Finished with a result waiting to be fetched.
    Complete,
    /// Finished with an error waiting to be fetched.
    Failed,
}

impl RequestStatus {
    /// Returns true for `Complete` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Complete | RequestStatus::Failed)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestStatus::Submitted => write!(f, "submitted"),
            RequestStatus::Pending => write!(f, "pending"),
            RequestStatus::Complete => write!(f, "complete"),
            RequestStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Result of polling a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenFetch<T> {
    /// The request has not finished yet; the token stays valid.
    NotReady,
    /// The result. The token is gone.
    Ready(T),
}

impl<T> TokenFetch<T> {
    /// Returns the result if ready.
    pub fn ready(self) -> Option<T> {
        match self {
            TokenFetch::Ready(value) => Some(value),
            TokenFetch::NotReady => None,
        }
    }
}

/// What a finished request produced.
#[derive(Debug, Clone)]
pub enum TokenPayload {
    /// Channel records, from a group-info request.
    Groups(Vec<ChannelGroup>),
    /// Channel content, from a post-data request.
    Posts(ChannelContent),
    /// Acknowledgement of a mutation, with the new id if one was created.
    Ack(Option<ContentHash>),
}

/// Payload discriminant used to check a fetch against the request kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Groups,
    Posts,
    Ack,
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadKind::Groups => write!(f, "group data"),
            PayloadKind::Posts => write!(f, "post data"),
            PayloadKind::Ack => write!(f, "acknowledgement"),
        }
    }
}

impl TokenPayload {
    /// Returns the payload discriminant.
    pub fn kind(&self) -> PayloadKind {
        match self {
            TokenPayload::Groups(_) => PayloadKind::Groups,
            TokenPayload::Posts(_) => PayloadKind::Posts,
            TokenPayload::Ack(_) => PayloadKind::Ack,
        }
    }
}

struct TokenEntry {
    status: RequestStatus,
    outcome: Option<Result<TokenPayload>>,
    finished_at: Option<Instant>,
}

/// Token table shared between submitters, dispatched jobs and pollers.
pub struct TokenQueue {
    next: AtomicU32,
    entries: Mutex<HashMap<Token, TokenEntry>>,
    retention: Duration,
}

impl fmt::Debug for TokenQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenQueue")
            .field("outstanding", &self.outstanding())
            .field("retention", &self.retention)
            .finish()
    }
}

impl TokenQueue {
    /// Creates a queue whose unfetched results live for `retention`.
    pub fn new(retention: Duration) -> Self {
        Self::starting_at(1, retention)
    }

    pub(crate) fn starting_at(first: Token, retention: Duration) -> Self {
        Self {
            next: AtomicU32::new(first),
            entries: Mutex::new(HashMap::new()),
            retention,
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<Token, TokenEntry>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn reap(&self, entries: &mut HashMap<Token, TokenEntry>) {
        let retention = self.retention;
        let before = entries.len();
        entries.retain(|_, entry| {
            entry
                .finished_at
                .map_or(true, |finished| finished.elapsed() < retention)
        });
        let reaped = before - entries.len();
        if reaped > 0 {
            debug!(reaped, "Reclaimed unfetched token results");
        }
    }

    /// Issues a token in the `Submitted` state.
    ///
    /// # Errors
    /// `State` once the token space is exhausted.
    pub fn submit(&self) -> Result<Token> {
        let token = self
            .next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n != 0).then(|| n.wrapping_add(1))
            })
            .map_err(|_| ChansyncError::state("Token space exhausted"))?;

        let mut entries = self.entries();
        self.reap(&mut entries);
        entries.insert(
            token,
            TokenEntry {
                status: RequestStatus::Submitted,
                outcome: None,
                finished_at: None,
            },
        );
        trace!(token, "token_submitted");
        Ok(token)
    }

    /// Moves a submitted token to `Pending`.
    pub fn mark_pending(&self, token: Token) {
        if let Some(entry) = self.entries().get_mut(&token) {
            if entry.status == RequestStatus::Submitted {
                entry.status = RequestStatus::Pending;
            }
        }
    }

    /// Records the outcome of a request.
    pub fn complete(&self, token: Token, outcome: Result<TokenPayload>) {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(&token) else {
            return;
        };
        entry.status = if outcome.is_ok() {
            RequestStatus::Complete
        } else {
            RequestStatus::Failed
        };
        debug!(token, status = %entry.status, "Token request finished");
        entry.outcome = Some(outcome);
        entry.finished_at = Some(Instant::now());
    }

    /// Returns the state of a token without consuming it.
    ///
    /// # Errors
    /// `NotFound` for unknown, fetched or reaped tokens.
    pub fn status(&self, token: Token) -> Result<RequestStatus> {
        let mut entries = self.entries();
        self.reap(&mut entries);
        entries
            .get(&token)
            .map(|entry| entry.status)
            .ok_or_else(|| ChansyncError::not_found(format!("Unknown token {}", token)))
    }

    /// Fetches and consumes a finished request's result.
    ///
    /// # Errors
    /// - `NotFound` for unknown, fetched or reaped tokens
    /// - `State` if the result is not of the `expected` kind; the token stays
    ///   valid
    /// - the request's own error if it failed; the token is consumed
    pub fn fetch(&self, token: Token, expected: PayloadKind) -> Result<TokenFetch<TokenPayload>> {
        let mut entries = self.entries();
        self.reap(&mut entries);

        let entry = entries
            .get(&token)
            .ok_or_else(|| ChansyncError::not_found(format!("Unknown token {}", token)))?;
        if !entry.status.is_terminal() {
            return Ok(TokenFetch::NotReady);
        }
        if let Some(Ok(payload)) = &entry.outcome {
            if payload.kind() != expected {
                return Err(ChansyncError::state(format!(
                    "Token {} holds {}, not {}",
                    token,
                    payload.kind(),
                    expected
                )));
            }
        }

        let outcome = entries
            .remove(&token)
            .and_then(|entry| entry.outcome)
            .ok_or_else(|| ChansyncError::state(format!("Token {} finished without a result", token)))?;
        trace!(token, "token_fetched");
        outcome.map(TokenFetch::Ready)
    }

    /// Number of tokens currently held.
    pub fn outstanding(&self) -> usize {
        self.entries().len()
    }
}

// =============================================================================
// Dispatchers
// =============================================================================

/// Job handed to a dispatcher.
pub type TokenJob = Box<dyn FnOnce() + Send + 'static>;

/// Runs token jobs on some execution context.
pub trait TokenDispatcher: Send + Sync {
    /// Schedules a job. Must not block on the job's completion.
    fn dispatch(&self, job: TokenJob);
}

/// Runs jobs on the submitting thread before `dispatch` returns.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl TokenDispatcher for InlineDispatcher {
    fn dispatch(&self, job: TokenJob) {
        job();
    }
}

/// Runs jobs on the blocking pool of a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioDispatcher {
    handle: tokio::runtime::Handle,
}

impl TokioDispatcher {
    /// Uses the given runtime.
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Uses the runtime of the calling context.
    ///
    /// # Errors
    /// `State` when called outside a tokio runtime.
    pub fn current() -> Result<Self> {
        tokio::runtime::Handle::try_current()
            .map(Self::new)
            .map_err(|e| ChansyncError::state(format!("No tokio runtime: {}", e)))
    }
}

impl TokenDispatcher for TokioDispatcher {
    fn dispatch(&self, job: TokenJob) {
        drop(self.handle.spawn_blocking(job));
    }
}
