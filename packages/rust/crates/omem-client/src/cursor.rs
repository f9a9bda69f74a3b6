//! Server-confirmed commit cursor and its best-effort initial sync.

use crate::error::ClientError;
use crate::transport::MemoryTransport;
use crate::turn::TurnId;

/// How the initial cursor was obtained.
///
/// `Fresh` and `Unreachable` both start without a cursor; they are kept apart
/// so callers can tell a brand-new conversation from a sync that never landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorSync {
    /// Sync was not requested.
    Skipped,
    /// Server reported a committed cursor in turn-id format.
    Adopted(TurnId),
    /// Server has no session or no committed cursor yet.
    Fresh,
    /// Session state could not be read or was not usable.
    Unreachable {
        /// Why the read failed.
        reason: String,
    },
}

/// Last turn id the server has confirmed committed.
#[derive(Debug, Clone, Default)]
pub struct CursorTracker {
    committed: Option<TurnId>,
}

impl CursorTracker {
    /// Tracker with no cursor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current cursor.
    #[must_use]
    pub fn committed(&self) -> Option<TurnId> {
        self.committed
    }

    /// Move the cursor to `turn_id` after a successful submit.
    pub fn advance(&mut self, turn_id: TurnId) {
        self.committed = Some(self.committed.map_or(turn_id, |current| current.max(turn_id)));
    }

    /// Read session state in a single attempt, bypassing any retry policy, and
    /// adopt a well-formed cursor. Never fails.
    pub async fn sync_from_server(
        &mut self,
        transport: &dyn MemoryTransport,
        conversation_id: &str,
    ) -> CursorSync {
        let outcome = match transport.get_session_once(conversation_id).await {
            Ok(state) => match state.cursor_committed.as_deref().map(str::trim) {
                None | Some("") => CursorSync::Fresh,
                Some(raw) => match TurnId::parse(raw) {
                    Some(cursor) => CursorSync::Adopted(cursor),
                    None => CursorSync::Unreachable {
                        reason: format!("cursor {raw:?} is not a turn id"),
                    },
                },
            },
            Err(ClientError::NotFound { .. }) => CursorSync::Fresh,
            Err(error) => CursorSync::Unreachable {
                reason: error.to_string(),
            },
        };

        match &outcome {
            CursorSync::Adopted(cursor) => {
                self.committed = Some(*cursor);
                tracing::debug!(
                    event = "omem.cursor.sync.adopted",
                    conversation_id,
                    cursor = %cursor,
                    "adopted server cursor"
                );
            }
            CursorSync::Fresh => {
                tracing::debug!(
                    event = "omem.cursor.sync.fresh",
                    conversation_id,
                    "no committed cursor on server"
                );
            }
            CursorSync::Unreachable { reason } => {
                tracing::warn!(
                    event = "omem.cursor.sync.unreachable",
                    conversation_id,
                    reason = %reason,
                    "cursor sync failed; starting without cursor"
                );
            }
            CursorSync::Skipped => {}
        }
        outcome
    }
}
