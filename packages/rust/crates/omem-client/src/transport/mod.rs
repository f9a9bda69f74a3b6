//! Transport boundary: the remote operations the commit protocol consumes.
//!
//! [`HttpTransport`] speaks to the memory service over HTTP; [`RetryingTransport`]
//! wraps any transport with the retry policy. Tests plug in their own
//! [`MemoryTransport`] implementations.

mod http;
mod retrying;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;
use crate::job::JobStatusSnapshot;
use crate::turn::{Turn, TurnId};

pub use http::HttpTransport;
pub use retrying::RetryingTransport;

/// Body of one delta submission.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitDeltaRequest<'a> {
    /// Conversation the turns belong to.
    pub session_id: &'a str,
    /// Ordered delta turns.
    pub turns: &'a [Turn],
    /// Cursor before this delta; server-side idempotency key together with `session_id`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_turn_id: Option<TurnId>,
}

/// Server acknowledgement of a submitted delta.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SubmitReceipt {
    /// Asynchronous job reference; absent when processing already finished.
    #[serde(default)]
    pub job_id: Option<String>,
    /// Turns the server accepted.
    #[serde(default)]
    pub accepted_count: usize,
}

/// Read-only session state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SessionState {
    /// Last committed turn id as reported, unvalidated.
    #[serde(default)]
    pub cursor_committed: Option<String>,
}

/// Retrieval request.
#[derive(Debug, Clone, Serialize)]
pub struct SearchRequest {
    /// Free-text query.
    pub query: String,
    /// Maximum number of results.
    pub topk: usize,
    /// Restrict to one conversation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Ask the server to synthesise an answer.
    pub with_answer: bool,
}

/// One retrieved evidence record.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EvidenceRecord {
    /// Evidence text.
    #[serde(default)]
    pub text: Option<String>,
    /// Relevance score.
    #[serde(default)]
    pub score: Option<f64>,
    /// ISO-8601 timestamp.
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Origin label.
    #[serde(default)]
    pub source: Option<String>,
    /// Entity names mentioned.
    #[serde(default)]
    pub entities: Vec<String>,
}

/// Retrieval response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SearchResponse {
    /// Ranked evidence.
    #[serde(default)]
    pub evidence_details: Vec<EvidenceRecord>,
}

/// Entity resolution request.
#[derive(Debug, Clone, Serialize)]
pub struct ResolveEntitiesRequest {
    /// Name to resolve.
    pub name: String,
    /// Optional type filter (`person`, `place`, ...).
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    /// Maximum matches.
    pub limit: usize,
}

/// One resolved graph entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EntityRecord {
    /// Entity id.
    #[serde(default)]
    pub id: Option<String>,
    /// Canonical name.
    #[serde(default)]
    pub name: Option<String>,
    /// Cluster label used when no name is set.
    #[serde(default)]
    pub cluster_label: Option<String>,
    /// Entity type.
    #[serde(default, rename = "type")]
    pub entity_type: Option<String>,
    /// Known aliases.
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Entity resolution response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ResolveEntitiesResponse {
    /// Matches, best first.
    #[serde(default)]
    pub items: Vec<EntityRecord>,
}

/// Timeline of one graph entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EntityTimelineResponse {
    /// Evidence records mentioning the entity.
    #[serde(default)]
    pub evidences: Vec<TimelineEvidenceRecord>,
    /// Raw utterances mentioning the entity.
    #[serde(default)]
    pub utterances: Vec<UtteranceRecord>,
}

/// Evidence entry of an entity timeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TimelineEvidenceRecord {
    /// Evidence id.
    #[serde(default)]
    pub evidence_id: Option<String>,
    /// Fallback id.
    #[serde(default)]
    pub id: Option<String>,
    /// Evidence text.
    #[serde(default)]
    pub text: Option<String>,
    /// Source text when `text` is absent.
    #[serde(default)]
    pub raw_text: Option<String>,
    /// Media start time.
    #[serde(default)]
    pub t_media_start: Option<String>,
    /// Fallback timestamp.
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Utterance entry of an entity timeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UtteranceRecord {
    /// Utterance id.
    #[serde(default)]
    pub utterance_id: Option<String>,
    /// Fallback id.
    #[serde(default)]
    pub id: Option<String>,
    /// Spoken text.
    #[serde(default)]
    pub raw_text: Option<String>,
    /// Media start time.
    #[serde(default)]
    pub t_media_start: Option<String>,
}

/// Full-text event search request.
#[derive(Debug, Clone, Serialize)]
pub struct SearchEventsRequest {
    /// Free-text query.
    pub query: String,
    /// Maximum number of events.
    pub topk: usize,
}

/// One graph event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EventRecord {
    /// Event id.
    #[serde(default)]
    pub id: Option<String>,
    /// Event summary.
    #[serde(default)]
    pub summary: Option<String>,
    /// Absolute start time.
    #[serde(default)]
    pub t_abs_start: Option<String>,
    /// Fallback timestamp.
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Entity names involved.
    #[serde(default)]
    pub involves: Vec<String>,
    /// Supporting evidence text.
    #[serde(default)]
    pub evidence: Option<String>,
    /// Fallback evidence text.
    #[serde(default)]
    pub text: Option<String>,
}

/// Event list. Search responses may use `events` instead of `items`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EventListResponse {
    /// Events under the search key.
    #[serde(default)]
    pub events: Vec<EventRecord>,
    /// Events under the list key.
    #[serde(default)]
    pub items: Vec<EventRecord>,
}

impl EventListResponse {
    /// Whichever list the server filled, `events` first.
    #[must_use]
    pub fn into_records(self) -> Vec<EventRecord> {
        if self.events.is_empty() {
            self.items
        } else {
            self.events
        }
    }
}

/// Time-range query over graph timeslices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimesliceRangeRequest {
    /// Range start, RFC 3339.
    pub start: String,
    /// Range end, RFC 3339.
    pub end: String,
    /// Maximum number of timeslices.
    pub limit: usize,
}

/// One graph timeslice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TimesliceRecord {
    /// Timeslice id.
    #[serde(default)]
    pub id: Option<String>,
    /// Absolute start time, used when an event has none.
    #[serde(default)]
    pub t_abs_start: Option<String>,
}

/// Timeslices in a range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TimesliceListResponse {
    /// Timeslices, oldest first.
    #[serde(default)]
    pub items: Vec<TimesliceRecord>,
}

/// Remote operations consumed by the client. Must be safe for concurrent use.
#[async_trait]
pub trait MemoryTransport: Send + Sync {
    /// Submit an ordered delta. Safe to retry with the same `base_turn_id`.
    async fn submit_delta(
        &self,
        request: &SubmitDeltaRequest<'_>,
    ) -> Result<SubmitReceipt, ClientError>;

    /// Read committed session state.
    async fn get_session(&self, conversation_id: &str) -> Result<SessionState, ClientError>;

    /// Read session state with exactly one attempt, for best-effort callers.
    /// Retrying decorators must forward this without applying their policy.
    async fn get_session_once(&self, conversation_id: &str) -> Result<SessionState, ClientError> {
        self.get_session(conversation_id).await
    }

    /// Read the processing status of a submitted delta.
    async fn get_job_status(&self, job_id: &str) -> Result<JobStatusSnapshot, ClientError>;

    /// Retrieve evidence for a query.
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, ClientError>;

    /// Resolve an entity name in the tenant graph.
    async fn resolve_entities(
        &self,
        request: &ResolveEntitiesRequest,
    ) -> Result<ResolveEntitiesResponse, ClientError>;

    /// Evidences and utterances mentioning an entity.
    async fn entity_timeline(
        &self,
        entity_id: &str,
        limit: usize,
    ) -> Result<EntityTimelineResponse, ClientError>;

    /// Events involving an entity.
    async fn list_entity_events(
        &self,
        entity_id: &str,
        limit: usize,
    ) -> Result<EventListResponse, ClientError>;

    /// Full-text event search.
    async fn search_events(
        &self,
        request: &SearchEventsRequest,
    ) -> Result<EventListResponse, ClientError>;

    /// Timeslices overlapping a time range.
    async fn timeslices_range(
        &self,
        request: &TimesliceRangeRequest,
    ) -> Result<TimesliceListResponse, ClientError>;

    /// Events within one timeslice.
    async fn timeslice_events(
        &self,
        timeslice_id: &str,
        limit: usize,
    ) -> Result<EventListResponse, ClientError>;
}

#[async_trait]
impl<T: MemoryTransport + ?Sized> MemoryTransport for std::sync::Arc<T> {
    async fn submit_delta(
        &self,
        request: &SubmitDeltaRequest<'_>,
    ) -> Result<SubmitReceipt, ClientError> {
        (**self).submit_delta(request).await
    }

    async fn get_session(&self, conversation_id: &str) -> Result<SessionState, ClientError> {
        (**self).get_session(conversation_id).await
    }

    async fn get_session_once(&self, conversation_id: &str) -> Result<SessionState, ClientError> {
        (**self).get_session_once(conversation_id).await
    }

    async fn get_job_status(&self, job_id: &str) -> Result<JobStatusSnapshot, ClientError> {
        (**self).get_job_status(job_id).await
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, ClientError> {
        (**self).search(request).await
    }

    async fn resolve_entities(
        &self,
        request: &ResolveEntitiesRequest,
    ) -> Result<ResolveEntitiesResponse, ClientError> {
        (**self).resolve_entities(request).await
    }

    async fn entity_timeline(
        &self,
        entity_id: &str,
        limit: usize,
    ) -> Result<EntityTimelineResponse, ClientError> {
        (**self).entity_timeline(entity_id, limit).await
    }

    async fn list_entity_events(
        &self,
        entity_id: &str,
        limit: usize,
    ) -> Result<EventListResponse, ClientError> {
        (**self).list_entity_events(entity_id, limit).await
    }

    async fn search_events(
        &self,
        request: &SearchEventsRequest,
    ) -> Result<EventListResponse, ClientError> {
        (**self).search_events(request).await
    }

    async fn timeslices_range(
        &self,
        request: &TimesliceRangeRequest,
    ) -> Result<TimesliceListResponse, ClientError> {
        (**self).timeslices_range(request).await
    }

    async fn timeslice_events(
        &self,
        timeslice_id: &str,
        limit: usize,
    ) -> Result<EventListResponse, ClientError> {
        (**self).timeslice_events(timeslice_id, limit).await
    }
}
