//! Top-level session object: owns the transport and hands out conversations.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::config::ClientConfig;
use crate::conversation::{AddResult, CommitOptions, Conversation, ConversationOptions};
use crate::error::{ClientError, Error, ValidationError};
use crate::job::JobHandle;
use crate::models::{Entity, Event, MemoryItem, SearchResult};
use crate::retry::RetryPolicy;
use crate::transport::{
    EventRecord, HttpTransport, MemoryTransport, ResolveEntitiesRequest, RetryingTransport,
    SearchEventsRequest, SearchRequest, TimesliceRangeRequest,
};
use crate::turn::TurnInput;

const DEFAULT_SEARCH_LIMIT: usize = 10;
const MAX_SILENT_ERROR_CHARS: usize = 200;
const DEFAULT_EVENT_LIMIT: usize = 20;
const MAX_TIMESLICES_SCANNED: usize = 10;

/// Options for [`Memory::search`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOptions {
    /// Maximum number of results.
    pub limit: usize,
    /// Restrict to one conversation.
    pub conversation_id: Option<String>,
    /// Return an empty result carrying the error instead of failing.
    pub fail_silent: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_SEARCH_LIMIT,
            conversation_id: None,
            fail_silent: false,
        }
    }
}

/// Options for [`Memory::search_events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSearchOptions {
    /// Keep only events whose timestamp falls in `[start, end]`.
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    /// List events of the first resolvable name instead of running a text search.
    pub entities: Vec<String>,
    /// Maximum number of events.
    pub limit: usize,
}

impl Default for EventSearchOptions {
    fn default() -> Self {
        Self {
            time_range: None,
            entities: Vec::new(),
            limit: DEFAULT_EVENT_LIMIT,
        }
    }
}

/// Memory service client.
///
/// The transport (and its HTTP connection pool) is acquired once here and shared
/// by every [`Conversation`]; it is released by [`Memory::close`] or on drop,
/// once no conversation still holds it.
pub struct Memory {
    transport: Arc<dyn MemoryTransport>,
    options: ConversationOptions,
}

impl Debug for Memory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Memory {
    /// Validate `config` and build the retrying HTTP transport.
    ///
    /// # Errors
    /// Returns [`ValidationError::InvalidConfig`] for missing credentials or a bad endpoint.
    pub fn connect(config: &ClientConfig) -> Result<Self, ValidationError> {
        config.validate()?;
        let http = HttpTransport::new(config)?;
        let transport = RetryingTransport::new(http, RetryPolicy::new(config.retry));
        tracing::debug!(
            event = "omem.memory.connected",
            endpoint = %config.endpoint,
            tenant_id = %config.tenant_id,
            memory_domain = %config.memory_domain,
            "memory client ready"
        );
        Ok(Self::with_transport(
            Arc::new(transport),
            ConversationOptions {
                sync_cursor: true,
                auto_timestamp: config.auto_timestamp,
                poll_interval: config.poll_interval(),
            },
        ))
    }

    /// Use a caller-supplied transport. `options.sync_cursor` is the default
    /// for [`Memory::conversation`].
    #[must_use]
    pub fn with_transport(
        transport: Arc<dyn MemoryTransport>,
        options: ConversationOptions,
    ) -> Self {
        Self { transport, options }
    }

    /// Shared transport.
    #[must_use]
    pub fn transport(&self) -> Arc<dyn MemoryTransport> {
        Arc::clone(&self.transport)
    }

    /// One-shot write: open the conversation, buffer `messages`, commit once.
    ///
    /// Every message is validated before any network call.
    ///
    /// # Errors
    /// [`Error::Validation`] for bad input, [`Error::Remote`] when the commit fails.
    pub async fn add(
        &self,
        conversation_id: &str,
        messages: &[TurnInput],
        options: CommitOptions,
    ) -> Result<AddResult, Error> {
        if conversation_id.trim().is_empty() {
            return Err(ValidationError::EmptyConversationId.into());
        }
        for message in messages {
            message.resolve_role()?;
            message.resolve_text()?;
        }
        let mut conversation = self.conversation(conversation_id).await?;
        conversation.extend(messages)?;
        Ok(conversation.commit(options).await?)
    }

    /// Open a conversation with the client's default options.
    ///
    /// # Errors
    /// Returns [`ValidationError::EmptyConversationId`] for a blank id.
    pub async fn conversation(&self, conversation_id: &str) -> Result<Conversation, ValidationError> {
        Conversation::open(Arc::clone(&self.transport), conversation_id, self.options).await
    }

    /// Open a conversation with explicit options (e.g. `sync_cursor: false`).
    ///
    /// # Errors
    /// Returns [`ValidationError::EmptyConversationId`] for a blank id.
    pub async fn conversation_with(
        &self,
        conversation_id: &str,
        options: ConversationOptions,
    ) -> Result<Conversation, ValidationError> {
        Conversation::open(Arc::clone(&self.transport), conversation_id, options).await
    }

    /// Options applied by [`Memory::conversation`].
    #[must_use]
    pub fn conversation_options(&self) -> ConversationOptions {
        self.options
    }

    /// Handle for a job id from an earlier [`AddResult`], to poll again later.
    #[must_use]
    pub fn job(&self, job_id: impl Into<String>) -> JobHandle {
        JobHandle::new(
            Some(job_id.into()),
            Arc::clone(&self.transport),
            self.options.poll_interval,
        )
    }

    /// Search memories.
    ///
    /// # Errors
    /// Returns the transport error unless `options.fail_silent` is set.
    pub async fn search(
        &self,
        query: &str,
        options: SearchOptions,
    ) -> Result<SearchResult, ClientError> {
        let started = Instant::now();
        let request = SearchRequest {
            query: query.to_string(),
            topk: options.limit,
            session_id: options
                .conversation_id
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty()),
            with_answer: false,
        };
        match self.transport.search(&request).await {
            Ok(response) => Ok(SearchResult {
                query: request.query,
                items: response
                    .evidence_details
                    .into_iter()
                    .filter_map(MemoryItem::from_evidence)
                    .collect(),
                latency: started.elapsed(),
                error: None,
            }),
            Err(error) if options.fail_silent => {
                tracing::debug!(
                    event = "omem.search.failed_silent",
                    error = %error,
                    "search failed; returning empty result"
                );
                let message: String = error.to_string().chars().take(MAX_SILENT_ERROR_CHARS).collect();
                Ok(SearchResult {
                    query: request.query,
                    items: Vec::new(),
                    latency: started.elapsed(),
                    error: Some(message),
                })
            }
            Err(error) => Err(error),
        }
    }

    /// Resolve an entity by name. Best-effort: failures yield `None`.
    pub async fn resolve_entity(&self, name: &str, entity_type: Option<&str>) -> Option<Entity> {
        let request = ResolveEntitiesRequest {
            name: name.to_string(),
            entity_type: entity_type.map(str::to_string),
            limit: 1,
        };
        match self.transport.resolve_entities(&request).await {
            Ok(response) => response
                .items
                .into_iter()
                .next()
                .map(|record| Entity::from_record(record, name)),
            Err(error) => {
                tracing::debug!(
                    event = "omem.graph.resolve_failed",
                    name,
                    error = %error,
                    "entity resolution failed"
                );
                None
            }
        }
    }

    /// Evidence and utterances mentioning `entity`, resolved by name first.
    ///
    /// Best-effort: an unknown entity or a failed read yields an empty list.
    pub async fn get_entity_timeline(&self, entity: &str, limit: usize) -> Vec<Event> {
        let Some(resolved) = self.resolve_entity(entity, None).await else {
            return Vec::new();
        };
        match self.transport.entity_timeline(&resolved.id, limit).await {
            Ok(response) => response
                .evidences
                .into_iter()
                .map(|record| Event::from_timeline_evidence(record, &resolved.name))
                .chain(
                    response
                        .utterances
                        .into_iter()
                        .map(|record| Event::from_utterance(record, &resolved.name)),
                )
                .collect(),
            Err(error) => {
                tracing::debug!(
                    event = "omem.graph.timeline_failed",
                    entity,
                    entity_id = %resolved.id,
                    error = %error,
                    "entity timeline read failed"
                );
                Vec::new()
            }
        }
    }

    /// Search graph events by text, or list the events of
    /// `options.entities[0]` when names are given. Best-effort.
    pub async fn search_events(&self, query: &str, options: EventSearchOptions) -> Vec<Event> {
        let records = match options.entities.first() {
            Some(name) => {
                let Some(resolved) = self.resolve_entity(name, None).await else {
                    return Vec::new();
                };
                self.transport
                    .list_entity_events(&resolved.id, options.limit)
                    .await
                    .map(|response| response.items)
            }
            None => {
                let request = SearchEventsRequest {
                    query: query.to_string(),
                    topk: options.limit,
                };
                self.transport
                    .search_events(&request)
                    .await
                    .map(crate::transport::EventListResponse::into_records)
            }
        };
        let records: Vec<EventRecord> = match records {
            Ok(records) => records,
            Err(error) => {
                tracing::debug!(
                    event = "omem.graph.search_events_failed",
                    query,
                    error = %error,
                    "event search failed"
                );
                return Vec::new();
            }
        };
        records
            .into_iter()
            .map(|record| Event::from_record(record, None))
            .filter(|event| within(event, options.time_range))
            .collect()
    }

    /// Events of the timeslices overlapping `[start, end]`, at most `limit`.
    ///
    /// Only the first ten timeslices are read; a failing timeslice is skipped.
    /// Best-effort: a failed range read yields an empty list.
    pub async fn get_events_by_time(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Vec<Event> {
        let request = TimesliceRangeRequest {
            start: start.to_rfc3339(),
            end: end.to_rfc3339(),
            limit,
        };
        let timeslices = match self.transport.timeslices_range(&request).await {
            Ok(response) => response.items,
            Err(error) => {
                tracing::debug!(
                    event = "omem.graph.timeslices_failed",
                    start = %request.start,
                    end = %request.end,
                    error = %error,
                    "timeslice range read failed"
                );
                return Vec::new();
            }
        };

        let per_slice = limit / MAX_TIMESLICES_SCANNED + 1;
        let mut events = Vec::new();
        for timeslice in timeslices.into_iter().take(MAX_TIMESLICES_SCANNED) {
            let Some(timeslice_id) = timeslice.id.filter(|id| !id.trim().is_empty()) else {
                continue;
            };
            match self.transport.timeslice_events(&timeslice_id, per_slice).await {
                Ok(response) => events.extend(response.items.into_iter().map(|record| {
                    Event::from_record(record, timeslice.t_abs_start.as_deref())
                })),
                Err(error) => {
                    tracing::debug!(
                        event = "omem.graph.timeslice_events_failed",
                        timeslice_id = %timeslice_id,
                        error = %error,
                        "skipping timeslice"
                    );
                }
            }
        }
        events.truncate(limit);
        events
    }

    /// Release the client. Conversations opened earlier keep the transport
    /// alive until they are dropped.
    pub fn close(self) {
        tracing::debug!(
            event = "omem.memory.closed",
            shared_handles = Arc::strong_count(&self.transport).saturating_sub(1),
            "memory client closed"
        );
    }
}

/// Events without a timestamp never match a range.
fn within(event: &Event, range: Option<(DateTime<Utc>, DateTime<Utc>)>) -> bool {
    let Some((start, end)) = range else {
        return true;
    };
    event.timestamp.is_some_and(|timestamp| {
        let timestamp = timestamp.with_timezone(&Utc);
        start <= timestamp && timestamp <= end
    })
}
