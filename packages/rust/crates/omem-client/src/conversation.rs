//! Buffered conversation with explicit commit control.
//!
//! Turns accumulate locally and only the delta past the server-confirmed cursor
//! is submitted, once per [`Conversation::commit`]. The buffer and cursor are
//! mutated only after the submit succeeds, so a failed commit can be retried
//! and resubmits exactly the same delta.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

use crate::buffer::TurnBuffer;
use crate::cursor::{CursorSync, CursorTracker};
use crate::error::{ClientError, ValidationError};
use crate::job::{JobHandle, WaitOutcome};
use crate::transport::{MemoryTransport, SubmitDeltaRequest};
use crate::turn::{Turn, TurnId, TurnInput};

const DEFAULT_COMMIT_WAIT_SECS: u64 = 60;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Options for opening a [`Conversation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversationOptions {
    /// Read the committed cursor from the server on open.
    pub sync_cursor: bool,
    /// Stamp turns without a timestamp with the current UTC time.
    pub auto_timestamp: bool,
    /// Job status poll cadence for `commit` with `wait`.
    pub poll_interval: Duration,
}

impl Default for ConversationOptions {
    fn default() -> Self {
        Self {
            sync_cursor: true,
            auto_timestamp: true,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

/// Options for one commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOptions {
    /// Block until the job is terminal or `timeout` elapses.
    pub wait: bool,
    /// Upper bound on waiting.
    pub timeout: Duration,
}

impl Default for CommitOptions {
    fn default() -> Self {
        Self {
            wait: false,
            timeout: Duration::from_secs(DEFAULT_COMMIT_WAIT_SECS),
        }
    }
}

impl CommitOptions {
    /// Submit and return without waiting.
    #[must_use]
    pub fn no_wait() -> Self {
        Self::default()
    }

    /// Submit and wait up to `timeout` for processing.
    #[must_use]
    pub fn wait_for(timeout: Duration) -> Self {
        Self {
            wait: true,
            timeout,
        }
    }
}

/// Externally visible outcome of one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddResult {
    /// Conversation the commit belongs to.
    pub conversation_id: String,
    /// Turns submitted by this commit.
    pub message_count: usize,
    /// Server job tracking the submission, if asynchronous.
    pub job_id: Option<String>,
    /// Whether processing reached `COMPLETED` within the wait window.
    pub completed: bool,
}

impl AddResult {
    fn noop(conversation_id: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            message_count: 0,
            job_id: None,
            completed: true,
        }
    }
}

/// Failure of [`Conversation::commit_scope`].
#[derive(Debug, Error)]
pub enum ScopeError<E> {
    /// The scope body failed; nothing was committed and the buffer is intact.
    #[error("conversation scope aborted: {0}")]
    Body(E),
    /// The body succeeded but the commit failed.
    #[error(transparent)]
    Commit(ClientError),
}

/// Buffer of turns for one conversation. Single writer: `add` and `commit`
/// take `&mut self`.
pub struct Conversation {
    conversation_id: String,
    transport: Arc<dyn MemoryTransport>,
    buffer: TurnBuffer,
    cursor: CursorTracker,
    cursor_sync: CursorSync,
    poll_interval: Duration,
}

impl Debug for Conversation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conversation")
            .field("conversation_id", &self.conversation_id)
            .field("buffered", &self.buffer.len())
            .field("next_index", &self.buffer.next_index())
            .field("cursor", &self.cursor.committed())
            .field("cursor_sync", &self.cursor_sync)
            .finish_non_exhaustive()
    }
}

impl Conversation {
    /// Open a conversation, optionally syncing the cursor from the server.
    ///
    /// Cursor sync is best-effort: any failure starts without a cursor and is
    /// reported through [`Conversation::cursor_sync`].
    ///
    /// # Errors
    /// Returns [`ValidationError::EmptyConversationId`] for a blank id.
    pub async fn open(
        transport: Arc<dyn MemoryTransport>,
        conversation_id: &str,
        options: ConversationOptions,
    ) -> Result<Self, ValidationError> {
        let conversation_id = conversation_id.trim();
        if conversation_id.is_empty() {
            return Err(ValidationError::EmptyConversationId);
        }

        let mut buffer = TurnBuffer::new(options.auto_timestamp);
        let mut cursor = CursorTracker::new();
        let cursor_sync = if options.sync_cursor {
            cursor
                .sync_from_server(transport.as_ref(), conversation_id)
                .await
        } else {
            CursorSync::Skipped
        };
        if let Some(committed) = cursor.committed() {
            buffer.reserve_after(committed);
        }

        Ok(Self {
            conversation_id: conversation_id.to_string(),
            transport,
            buffer,
            cursor,
            cursor_sync,
            poll_interval: options.poll_interval,
        })
    }

    /// Conversation id.
    #[must_use]
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Last server-confirmed turn id.
    #[must_use]
    pub fn cursor(&self) -> Option<TurnId> {
        self.cursor.committed()
    }

    /// How the initial cursor was obtained.
    #[must_use]
    pub fn cursor_sync(&self) -> &CursorSync {
        &self.cursor_sync
    }

    /// Buffered, not yet submitted turns.
    #[must_use]
    pub fn pending(&self) -> &[Turn] {
        self.buffer.turns()
    }

    /// Turns the next commit would submit.
    #[must_use]
    pub fn delta(&self) -> Vec<Turn> {
        self.buffer.delta(self.cursor.committed())
    }

    /// Buffer one message. Never touches the network.
    ///
    /// # Errors
    /// Returns [`ValidationError`] for a bad role or empty text.
    pub fn add(&mut self, input: &TurnInput) -> Result<TurnId, ValidationError> {
        self.buffer.push(input).map(Turn::turn_id)
    }

    /// Buffer several messages; all are validated before any is appended.
    ///
    /// # Errors
    /// Returns the first [`ValidationError`]; the buffer is then unchanged.
    pub fn extend<'a, I>(&mut self, inputs: I) -> Result<Vec<TurnId>, ValidationError>
    where
        I: IntoIterator<Item = &'a TurnInput>,
    {
        let inputs: Vec<&TurnInput> = inputs.into_iter().collect();
        for input in &inputs {
            input.resolve_role()?;
            input.resolve_text()?;
        }
        inputs.into_iter().map(|input| self.add(input)).collect()
    }

    /// Submit the delta once and optionally wait for processing.
    ///
    /// An empty buffer, or one entirely behind the cursor, is a no-op that
    /// reports `completed = true`.
    ///
    /// # Errors
    /// Returns the submit error after the retry policy gave up; buffer and
    /// cursor are left untouched.
    pub async fn commit(&mut self, options: CommitOptions) -> Result<AddResult, ClientError> {
        if self.buffer.is_empty() {
            return Ok(AddResult::noop(&self.conversation_id));
        }
        let base_turn_id = self.cursor.committed();
        let delta = self.buffer.delta(base_turn_id);
        let Some(last_turn_id) = delta.last().map(Turn::turn_id) else {
            tracing::debug!(
                event = "omem.commit.noop",
                conversation_id = %self.conversation_id,
                buffered = self.buffer.len(),
                "buffer is entirely behind cursor"
            );
            return Ok(AddResult::noop(&self.conversation_id));
        };

        let started = Instant::now();
        let request = SubmitDeltaRequest {
            session_id: &self.conversation_id,
            turns: &delta,
            base_turn_id,
        };
        let receipt = match self.transport.submit_delta(&request).await {
            Ok(receipt) => receipt,
            Err(error) => {
                tracing::warn!(
                    event = "omem.commit.submit_failed",
                    conversation_id = %self.conversation_id,
                    delta = delta.len(),
                    base_turn_id = ?base_turn_id.map(|id| id.to_string()),
                    error = %error,
                    "commit failed; buffer kept for retry"
                );
                return Err(error);
            }
        };

        self.cursor.advance(last_turn_id);
        self.buffer.clear();
        tracing::info!(
            event = "omem.commit.submitted",
            conversation_id = %self.conversation_id,
            delta = delta.len(),
            accepted = receipt.accepted_count,
            cursor = %last_turn_id,
            job_id = ?receipt.job_id,
            elapsed_ms = started.elapsed().as_millis(),
            "delta submitted"
        );

        let handle = JobHandle::new(
            receipt.job_id,
            Arc::clone(&self.transport),
            self.poll_interval,
        );
        let completed = match handle.job_id() {
            None => true,
            Some(_) if options.wait => self.wait_completed(&handle, options.timeout).await,
            Some(_) => false,
        };

        Ok(AddResult {
            conversation_id: self.conversation_id.clone(),
            message_count: delta.len(),
            job_id: handle.job_id().map(str::to_string),
            completed,
        })
    }

    /// Run `body` against this conversation; commit once if it succeeds.
    ///
    /// # Errors
    /// [`ScopeError::Body`] when `body` fails (no commit, buffer intact), or
    /// [`ScopeError::Commit`] when the commit itself fails.
    pub async fn commit_scope<F, E>(
        &mut self,
        options: CommitOptions,
        body: F,
    ) -> Result<AddResult, ScopeError<E>>
    where
        F: FnOnce(&mut Self) -> Result<(), E>,
    {
        if let Err(error) = body(self) {
            tracing::debug!(
                event = "omem.commit.scope_aborted",
                conversation_id = %self.conversation_id,
                buffered = self.buffer.len(),
                "scope body failed; skipping commit"
            );
            return Err(ScopeError::Body(error));
        }
        self.commit(options).await.map_err(ScopeError::Commit)
    }

    async fn wait_completed(&self, handle: &JobHandle, timeout: Duration) -> bool {
        match handle.wait(timeout).await {
            Ok(waited) => {
                if waited.outcome == WaitOutcome::TimedOut {
                    tracing::info!(
                        event = "omem.commit.wait_timed_out",
                        conversation_id = %self.conversation_id,
                        job_id = ?handle.job_id(),
                        status = %waited.last_status.status,
                        "job not finished within wait window"
                    );
                }
                waited.completed()
            }
            Err(error) => {
                tracing::warn!(
                    event = "omem.commit.wait_failed",
                    conversation_id = %self.conversation_id,
                    job_id = ?handle.job_id(),
                    error = %error,
                    "job status unavailable after commit"
                );
                false
            }
        }
    }
}
