//! Conversation turns: role, locally assigned id, and the caller-facing input shape.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

const TURN_ID_PREFIX: char = 't';

/// Speaker role of one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End user.
    User,
    /// Model reply.
    Assistant,
    /// Tool output.
    Tool,
    /// System instruction.
    System,
}

impl Role {
    /// Wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
            Self::System => "system",
        }
    }
}

impl FromStr for Role {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "tool" => Ok(Self::Tool),
            "system" => Ok(Self::System),
            _ => Err(ValidationError::InvalidRole(s.to_string())),
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Locally assigned turn identifier, rendered as `t%04d` (e.g. `t0001`).
///
/// Ordering is numeric, which matches lexicographic order of the rendered
/// form for every index the fixed-width format can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TurnId(u32);

impl TurnId {
    /// Build from a 1-based index.
    #[must_use]
    pub fn from_index(index: u32) -> Self {
        Self(index)
    }

    /// Numeric suffix.
    #[must_use]
    pub fn index(self) -> u32 {
        self.0
    }

    /// Parse `tNNNN`; `None` for anything not in the turn-id format.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let digits = raw.trim().strip_prefix(TURN_ID_PREFIX)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse::<u32>().ok().map(Self)
    }
}

impl Display for TurnId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{TURN_ID_PREFIX}{:04}", self.0)
    }
}

impl From<TurnId> for String {
    fn from(id: TurnId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for TurnId {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw).ok_or_else(|| format!("invalid turn id: {raw:?}"))
    }
}

/// One immutable buffered message. Wire shape: `{turn_id, role, text, name?, timestamp_iso?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    turn_id: TurnId,
    role: Role,
    text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp_iso: Option<String>,
}

impl Turn {
    pub(crate) fn new(
        turn_id: TurnId,
        role: Role,
        text: String,
        name: Option<String>,
        timestamp_iso: Option<String>,
    ) -> Self {
        Self {
            turn_id,
            role,
            text,
            name,
            timestamp_iso,
        }
    }

    /// Locally assigned id.
    #[must_use]
    pub fn turn_id(&self) -> TurnId {
        self.turn_id
    }

    /// Speaker role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Message text (never blank).
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Optional speaker name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// ISO-8601 timestamp, explicit or auto-generated.
    #[must_use]
    pub fn timestamp_iso(&self) -> Option<&str> {
        self.timestamp_iso.as_deref()
    }
}

/// Caller-facing message, OpenAI-style. Deserializes from
/// `{"role": "user", "content": "Hello"}` as well as the `text`/`message` aliases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnInput {
    /// Role name; missing means `user`.
    #[serde(default)]
    pub role: Option<String>,
    /// Primary text field.
    #[serde(default)]
    pub content: Option<String>,
    /// Secondary text alias.
    #[serde(default)]
    pub text: Option<String>,
    /// Tertiary text alias.
    #[serde(default)]
    pub message: Option<String>,
    /// Optional speaker name.
    #[serde(default)]
    pub name: Option<String>,
    /// Explicit timestamp.
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Explicit timestamp, wire-name alias.
    #[serde(default)]
    pub timestamp_iso: Option<String>,
}

impl TurnInput {
    /// Message with an explicit role name.
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Some(role.into()),
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// `user` message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User.as_str(), content)
    }

    /// `assistant` message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant.as_str(), content)
    }

    /// Set the speaker name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set an explicit timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    pub(crate) fn resolve_role(&self) -> Result<Role, ValidationError> {
        match non_blank(self.role.as_deref()) {
            Some(role) => role.parse(),
            None => Ok(Role::User),
        }
    }

    /// First non-blank of `content`, `text`, `message`.
    pub(crate) fn resolve_text(&self) -> Result<String, ValidationError> {
        [&self.content, &self.text, &self.message]
            .into_iter()
            .find_map(|field| field.as_deref().filter(|s| !s.trim().is_empty()))
            .map(str::to_string)
            .ok_or(ValidationError::EmptyText)
    }

    pub(crate) fn resolve_name(&self) -> Option<String> {
        non_blank(self.name.as_deref()).map(str::to_string)
    }

    pub(crate) fn explicit_timestamp(&self) -> Option<String> {
        non_blank(self.timestamp.as_deref())
            .or_else(|| non_blank(self.timestamp_iso.as_deref()))
            .map(str::to_string)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}
