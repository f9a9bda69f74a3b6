//! Client SDK for the omem memory service.
//!
//! Turns are buffered locally per conversation and committed as one delta past
//! the server-confirmed cursor:
//! - [`Conversation::add`] validates and buffers (no I/O).
//! - [`Conversation::commit`] submits the un-committed delta once, advances the
//!   cursor, clears the buffer, and optionally waits on the resulting job.
//! - [`JobHandle::wait`] polls job status up to a deadline.
//!
//! Transient failures are retried by [`RetryPolicy`] inside the transport;
//! fatal ones surface unchanged as [`ClientError`].

mod buffer;
mod config;
mod conversation;
mod cursor;
mod error;
mod job;
mod memory;
mod models;
mod retry;
pub mod transport;
mod turn;

pub use buffer::TurnBuffer;
pub use config::{ClientConfig, RetryConfig};
pub use conversation::{AddResult, CommitOptions, Conversation, ConversationOptions, ScopeError};
pub use cursor::{CursorSync, CursorTracker};
pub use error::{ClientError, Error, FailureClass, Result, ValidationError};
pub use job::{JobHandle, JobStatus, JobStatusSnapshot, JobWait, WaitOutcome};
pub use memory::{EventSearchOptions, Memory, SearchOptions};
pub use models::{Entity, Event, MemoryItem, SearchResult};
pub use retry::{AttemptOutcome, RetryPolicy};
pub use transport::{HttpTransport, MemoryTransport, RetryingTransport};
pub use turn::{Role, Turn, TurnId, TurnInput};
