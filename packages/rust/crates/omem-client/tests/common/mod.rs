//! In-memory memory service double shared by integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use omem_client::transport::{
    EntityTimelineResponse, EventListResponse, ResolveEntitiesRequest, ResolveEntitiesResponse,
    SearchEventsRequest, SearchRequest, SearchResponse, SessionState, SubmitDeltaRequest,
    SubmitReceipt, TimesliceListResponse, TimesliceRangeRequest,
};
use omem_client::{ClientError, JobStatus, JobStatusSnapshot, MemoryTransport, Turn};

/// One recorded submit call.
#[derive(Debug, Clone)]
pub struct RecordedSubmit {
    pub session_id: String,
    pub turn_ids: Vec<String>,
    pub texts: Vec<String>,
    pub base_turn_id: Option<String>,
}

#[derive(Default)]
struct ScriptState {
    submits: Vec<RecordedSubmit>,
    submit_outcomes: VecDeque<Result<SubmitReceipt, ClientError>>,
    cursors: HashMap<String, String>,
    session_error: Option<ClientError>,
    raw_session_cursor: Option<String>,
    job_outcomes: VecDeque<Result<JobStatusSnapshot, ClientError>>,
    last_job_status: Option<JobStatus>,
}

/// Behaves like a tiny memory service: a successful submit moves the
/// session cursor, and `get_session` reports it. Outcomes can be scripted.
#[derive(Default)]
pub struct ScriptedTransport {
    state: Mutex<ScriptState>,
    job_counter: AtomicUsize,
    pub submit_calls: AtomicUsize,
    pub session_calls: AtomicUsize,
    pub job_calls: AtomicUsize,
    pub graph_calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Queue the outcome of the next submit; unqueued submits succeed with a fresh job id.
    pub fn push_submit(&self, outcome: Result<SubmitReceipt, ClientError>) {
        self.state().submit_outcomes.push_back(outcome);
    }

    /// Queue the outcome of the next job status poll.
    pub fn push_job(&self, outcome: Result<JobStatusSnapshot, ClientError>) {
        self.state().job_outcomes.push_back(outcome);
    }

    /// Queue a sequence of successful job statuses.
    pub fn push_job_statuses(&self, job_id: &str, statuses: &[JobStatus]) {
        for status in statuses {
            self.push_job(Ok(JobStatusSnapshot {
                job_id: job_id.to_string(),
                status: *status,
                error: None,
            }));
        }
    }

    /// Status reported once the job script is empty.
    pub fn set_steady_job_status(&self, status: JobStatus) {
        self.state().last_job_status = Some(status);
    }

    /// Make every `get_session` fail with `error`.
    pub fn fail_session_reads(&self, error: ClientError) {
        self.state().session_error = Some(error);
    }

    /// Report `cursor` verbatim from `get_session`, for any session.
    pub fn set_raw_session_cursor(&self, cursor: &str) {
        self.state().raw_session_cursor = Some(cursor.to_string());
    }

    /// Seed a committed cursor for `session_id`.
    pub fn set_cursor(&self, session_id: &str, cursor: &str) {
        self.state()
            .cursors
            .insert(session_id.to_string(), cursor.to_string());
    }

    pub fn submits(&self) -> Vec<RecordedSubmit> {
        self.state().submits.clone()
    }

    pub fn submit_count(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }
}

fn record(request: &SubmitDeltaRequest<'_>) -> RecordedSubmit {
    RecordedSubmit {
        session_id: request.session_id.to_string(),
        turn_ids: request
            .turns
            .iter()
            .map(|turn: &Turn| turn.turn_id().to_string())
            .collect(),
        texts: request.turns.iter().map(|turn| turn.text().to_string()).collect(),
        base_turn_id: request.base_turn_id.map(|id| id.to_string()),
    }
}

#[async_trait]
impl MemoryTransport for ScriptedTransport {
    async fn submit_delta(
        &self,
        request: &SubmitDeltaRequest<'_>,
    ) -> Result<SubmitReceipt, ClientError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        state.submits.push(record(request));
        let outcome = state.submit_outcomes.pop_front().unwrap_or_else(|| {
            let n = self.job_counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(SubmitReceipt {
                job_id: Some(format!("job-{n}")),
                accepted_count: request.turns.len(),
            })
        });
        if let (Ok(_), Some(last)) = (&outcome, request.turns.last()) {
            state
                .cursors
                .insert(request.session_id.to_string(), last.turn_id().to_string());
        }
        outcome
    }

    async fn get_session(&self, conversation_id: &str) -> Result<SessionState, ClientError> {
        self.session_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        if let Some(error) = state.session_error.clone() {
            return Err(error);
        }
        if let Some(raw) = state.raw_session_cursor.clone() {
            return Ok(SessionState {
                cursor_committed: Some(raw),
            });
        }
        match state.cursors.get(conversation_id) {
            Some(cursor) => Ok(SessionState {
                cursor_committed: Some(cursor.clone()),
            }),
            None => Err(ClientError::NotFound {
                message: format!("session {conversation_id} not found"),
            }),
        }
    }

    async fn get_job_status(&self, job_id: &str) -> Result<JobStatusSnapshot, ClientError> {
        self.job_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        if let Some(outcome) = state.job_outcomes.pop_front() {
            if let Ok(snapshot) = &outcome {
                state.last_job_status = Some(snapshot.status);
            }
            return outcome;
        }
        Ok(JobStatusSnapshot {
            job_id: job_id.to_string(),
            status: state.last_job_status.unwrap_or(JobStatus::Pending),
            error: None,
        })
    }

    async fn search(&self, _request: &SearchRequest) -> Result<SearchResponse, ClientError> {
        Ok(SearchResponse::default())
    }

    async fn resolve_entities(
        &self,
        _request: &ResolveEntitiesRequest,
    ) -> Result<ResolveEntitiesResponse, ClientError> {
        Ok(ResolveEntitiesResponse::default())
    }

    async fn entity_timeline(
        &self,
        _entity_id: &str,
        _limit: usize,
    ) -> Result<EntityTimelineResponse, ClientError> {
        self.graph_calls.fetch_add(1, Ordering::SeqCst);
        Ok(EntityTimelineResponse::default())
    }

    async fn list_entity_events(
        &self,
        _entity_id: &str,
        _limit: usize,
    ) -> Result<EventListResponse, ClientError> {
        self.graph_calls.fetch_add(1, Ordering::SeqCst);
        Ok(EventListResponse::default())
    }

    async fn search_events(
        &self,
        _request: &SearchEventsRequest,
    ) -> Result<EventListResponse, ClientError> {
        self.graph_calls.fetch_add(1, Ordering::SeqCst);
        Ok(EventListResponse::default())
    }

    async fn timeslices_range(
        &self,
        _request: &TimesliceRangeRequest,
    ) -> Result<TimesliceListResponse, ClientError> {
        self.graph_calls.fetch_add(1, Ordering::SeqCst);
        Ok(TimesliceListResponse::default())
    }

    async fn timeslice_events(
        &self,
        _timeslice_id: &str,
        _limit: usize,
    ) -> Result<EventListResponse, ClientError> {
        self.graph_calls.fetch_add(1, Ordering::SeqCst);
        Ok(EventListResponse::default())
    }
}
