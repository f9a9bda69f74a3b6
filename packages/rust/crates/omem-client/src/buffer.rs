//! Append-only buffer of not-yet-submitted turns with monotonic id assignment.

use chrono::{SecondsFormat, Utc};

use crate::error::ValidationError;
use crate::turn::{Turn, TurnId, TurnInput};

/// Ordered turns owned by one conversation.
///
/// Ids are assigned from `next_index`, which only ever grows: clearing the
/// buffer after a commit keeps the counter, and adopting a server cursor moves
/// it past the cursor's suffix.
#[derive(Debug, Clone)]
pub struct TurnBuffer {
    turns: Vec<Turn>,
    next_index: u32,
    auto_timestamp: bool,
}

impl TurnBuffer {
    /// Empty buffer issuing ids from `t0001`.
    #[must_use]
    pub fn new(auto_timestamp: bool) -> Self {
        Self {
            turns: Vec::new(),
            next_index: 1,
            auto_timestamp,
        }
    }

    /// Validate `input`, assign the next id and append. No I/O.
    ///
    /// # Errors
    /// Returns [`ValidationError::InvalidRole`] or [`ValidationError::EmptyText`];
    /// a rejected input consumes no id.
    pub fn push(&mut self, input: &TurnInput) -> Result<&Turn, ValidationError> {
        let role = input.resolve_role()?;
        let text = input.resolve_text()?;
        let timestamp_iso = input.explicit_timestamp().or_else(|| {
            self.auto_timestamp
                .then(|| Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false))
        });

        let turn_id = TurnId::from_index(self.next_index);
        self.next_index = self.next_index.saturating_add(1);
        self.turns.push(Turn::new(
            turn_id,
            role,
            text,
            input.resolve_name(),
            timestamp_iso,
        ));
        Ok(&self.turns[self.turns.len() - 1])
    }

    /// Ordered turns strictly after `cursor`; the whole buffer when there is no cursor.
    #[must_use]
    pub fn delta(&self, cursor: Option<TurnId>) -> Vec<Turn> {
        self.turns
            .iter()
            .filter(|turn| cursor.is_none_or(|base| turn.turn_id() > base))
            .cloned()
            .collect()
    }

    /// Ensure future ids land after `cursor`.
    pub fn reserve_after(&mut self, cursor: TurnId) {
        self.next_index = self.next_index.max(cursor.index().saturating_add(1));
    }

    /// Drop every buffered turn. The id counter is kept.
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Buffered turns in order.
    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Number of buffered turns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// True when nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Index the next accepted turn will receive.
    #[must_use]
    pub fn next_index(&self) -> u32 {
        self.next_index
    }
}
