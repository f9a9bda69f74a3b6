//! Retry decorator over any [`MemoryTransport`].

use async_trait::async_trait;

use super::{
    EntityTimelineResponse, EventListResponse, MemoryTransport, ResolveEntitiesRequest,
    ResolveEntitiesResponse, SearchEventsRequest, SearchRequest, SearchResponse, SessionState,
    SubmitDeltaRequest, SubmitReceipt, TimesliceListResponse, TimesliceRangeRequest,
};
use crate::error::ClientError;
use crate::job::JobStatusSnapshot;
use crate::retry::RetryPolicy;

/// Applies a [`RetryPolicy`] to every operation of the wrapped transport.
#[derive(Debug)]
pub struct RetryingTransport<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T: MemoryTransport> RetryingTransport<T> {
    /// Wrap `inner`.
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// Wrapped transport.
    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Active policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl<T: MemoryTransport> MemoryTransport for RetryingTransport<T> {
    async fn submit_delta(
        &self,
        request: &SubmitDeltaRequest<'_>,
    ) -> Result<SubmitReceipt, ClientError> {
        self.policy
            .run("submit_delta", || self.inner.submit_delta(request))
            .await
    }

    async fn get_session(&self, conversation_id: &str) -> Result<SessionState, ClientError> {
        self.policy
            .run("get_session", || self.inner.get_session(conversation_id))
            .await
    }

    async fn get_session_once(&self, conversation_id: &str) -> Result<SessionState, ClientError> {
        self.inner.get_session_once(conversation_id).await
    }

    async fn get_job_status(&self, job_id: &str) -> Result<JobStatusSnapshot, ClientError> {
        self.policy
            .run("get_job_status", || self.inner.get_job_status(job_id))
            .await
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, ClientError> {
        self.policy
            .run("search", || self.inner.search(request))
            .await
    }

    async fn resolve_entities(
        &self,
        request: &ResolveEntitiesRequest,
    ) -> Result<ResolveEntitiesResponse, ClientError> {
        self.policy
            .run("resolve_entities", || self.inner.resolve_entities(request))
            .await
    }

    async fn entity_timeline(
        &self,
        entity_id: &str,
        limit: usize,
    ) -> Result<EntityTimelineResponse, ClientError> {
        self.policy
            .run("entity_timeline", || self.inner.entity_timeline(entity_id, limit))
            .await
    }

    async fn list_entity_events(
        &self,
        entity_id: &str,
        limit: usize,
    ) -> Result<EventListResponse, ClientError> {
        self.policy
            .run("list_entity_events", || {
                self.inner.list_entity_events(entity_id, limit)
            })
            .await
    }

    async fn search_events(
        &self,
        request: &SearchEventsRequest,
    ) -> Result<EventListResponse, ClientError> {
        self.policy
            .run("search_events", || self.inner.search_events(request))
            .await
    }

    async fn timeslices_range(
        &self,
        request: &TimesliceRangeRequest,
    ) -> Result<TimesliceListResponse, ClientError> {
        self.policy
            .run("timeslices_range", || self.inner.timeslices_range(request))
            .await
    }

    async fn timeslice_events(
        &self,
        timeslice_id: &str,
        limit: usize,
    ) -> Result<EventListResponse, ClientError> {
        self.policy
            .run("timeslice_events", || {
                self.inner.timeslice_events(timeslice_id, limit)
            })
            .await
    }
}
