//! HTTP transport for the memory service.
//!
//! One `reqwest::Client` (and its connection pool) per transport, shared by every
//! conversation. Auth and tenant headers are injected as client defaults.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;

use super::{
    EntityTimelineResponse, EventListResponse, MemoryTransport, ResolveEntitiesRequest,
    ResolveEntitiesResponse, SearchEventsRequest, SearchRequest, SearchResponse, SessionState,
    SubmitDeltaRequest, SubmitReceipt, TimesliceListResponse, TimesliceRangeRequest,
};
use crate::config::ClientConfig;
use crate::error::{ClientError, ValidationError};
use crate::job::JobStatusSnapshot;

const HEADER_TENANT_ID: &str = "x-tenant-id";
const HEADER_USER_TOKENS: &str = "x-user-tokens";
const HEADER_MEMORY_DOMAIN: &str = "x-memory-domain";
const MAX_ERROR_MESSAGE_CHARS: usize = 300;

/// Memory service client over HTTP + JSON.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
}

impl HttpTransport {
    /// Build the HTTP client from `config`.
    ///
    /// # Errors
    /// Returns [`ValidationError::InvalidConfig`] when the endpoint is not a base URL,
    /// a header value is not representable, or the client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, ValidationError> {
        let base_url = Url::parse(config.endpoint.trim()).map_err(|e| {
            ValidationError::InvalidConfig(format!("endpoint {:?}: {e}", config.endpoint))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ValidationError::InvalidConfig(format!(
                "endpoint {:?} is not a base url",
                config.endpoint
            )));
        }

        let mut headers = HeaderMap::new();
        let mut bearer = header_value(&format!("Bearer {}", config.api_key.trim()), "api_key")?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(
            HeaderName::from_static(HEADER_TENANT_ID),
            header_value(config.tenant_id.trim(), "tenant_id")?,
        );
        headers.insert(
            HeaderName::from_static(HEADER_USER_TOKENS),
            header_value(&config.effective_user_tokens().join(","), "user_tokens")?,
        );
        headers.insert(
            HeaderName::from_static(HEADER_MEMORY_DOMAIN),
            header_value(config.memory_domain.trim(), "memory_domain")?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ValidationError::InvalidConfig(format!("http client: {e}")))?;

        Ok(Self { client, base_url })
    }

    /// Service base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn url_with_query(&self, segments: &[&str], query: &[(&str, &str)]) -> Url {
        let mut url = self.url(segments);
        url.query_pairs_mut().extend_pairs(query);
        url
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<T, ClientError> {
        let started = Instant::now();
        let response = request.send().await.map_err(|error| {
            tracing::debug!(
                event = "omem.http.request_failed",
                operation,
                elapsed_ms = started.elapsed().as_millis(),
                error = %error,
                "memory service request failed"
            );
            ClientError::from_reqwest(&error)
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = match response.text().await {
                Ok(body) => body,
                Err(error) => {
                    tracing::debug!(
                        event = "omem.http.error_body_unreadable",
                        operation,
                        status = status.as_u16(),
                        error = %error,
                        "failed to read error response body"
                    );
                    String::new()
                }
            };
            let error = classify_status(status, retry_after, &body);
            tracing::debug!(
                event = "omem.http.non_success_status",
                operation,
                status = status.as_u16(),
                elapsed_ms = started.elapsed().as_millis(),
                error = %error,
                "memory service returned non-success status"
            );
            return Err(error);
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|error| ClientError::from_reqwest(&error))?;
        let decoded = serde_json::from_slice(&bytes).map_err(|error| {
            ClientError::Decode(format!("{operation}: {error}"))
        })?;
        tracing::trace!(
            event = "omem.http.completed",
            operation,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis(),
            "memory service request completed"
        );
        Ok(decoded)
    }
}

#[async_trait]
impl MemoryTransport for HttpTransport {
    async fn submit_delta(
        &self,
        request: &SubmitDeltaRequest<'_>,
    ) -> Result<SubmitReceipt, ClientError> {
        let url = self.url(&["ingest", "dialog", "v1"]);
        self.send_json("submit_delta", self.client.post(url).json(request)).await
    }

    async fn get_session(&self, conversation_id: &str) -> Result<SessionState, ClientError> {
        let url = self.url(&["sessions", conversation_id]);
        self.send_json("get_session", self.client.get(url)).await
    }

    async fn get_job_status(&self, job_id: &str) -> Result<JobStatusSnapshot, ClientError> {
        let url = self.url(&["jobs", job_id]);
        let mut snapshot: JobStatusSnapshot =
            self.send_json("get_job_status", self.client.get(url)).await?;
        if snapshot.job_id.is_empty() {
            snapshot.job_id = job_id.to_string();
        }
        Ok(snapshot)
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, ClientError> {
        let url = self.url(&["retrieval", "dialog", "v2"]);
        self.send_json("search", self.client.post(url).json(request)).await
    }

    async fn resolve_entities(
        &self,
        request: &ResolveEntitiesRequest,
    ) -> Result<ResolveEntitiesResponse, ClientError> {
        let url = self.url(&["graph", "v0", "entities", "resolve"]);
        self.send_json("resolve_entities", self.client.post(url).json(request)).await
    }

    async fn entity_timeline(
        &self,
        entity_id: &str,
        limit: usize,
    ) -> Result<EntityTimelineResponse, ClientError> {
        let limit = limit.to_string();
        let url = self.url_with_query(
            &["graph", "v0", "entities", entity_id, "timeline"],
            &[("limit", limit.as_str())],
        );
        self.send_json("entity_timeline", self.client.get(url)).await
    }

    async fn list_entity_events(
        &self,
        entity_id: &str,
        limit: usize,
    ) -> Result<EventListResponse, ClientError> {
        let limit = limit.to_string();
        let url = self.url_with_query(
            &["graph", "v0", "entities", entity_id, "events"],
            &[("limit", limit.as_str())],
        );
        self.send_json("list_entity_events", self.client.get(url)).await
    }

    async fn search_events(
        &self,
        request: &SearchEventsRequest,
    ) -> Result<EventListResponse, ClientError> {
        let url = self.url(&["graph", "v0", "search", "events"]);
        self.send_json("search_events", self.client.post(url).json(request)).await
    }

    async fn timeslices_range(
        &self,
        request: &TimesliceRangeRequest,
    ) -> Result<TimesliceListResponse, ClientError> {
        let limit = request.limit.to_string();
        let url = self.url_with_query(
            &["graph", "v0", "timeslices", "range"],
            &[
                ("start", request.start.as_str()),
                ("end", request.end.as_str()),
                ("limit", limit.as_str()),
            ],
        );
        self.send_json("timeslices_range", self.client.get(url)).await
    }

    async fn timeslice_events(
        &self,
        timeslice_id: &str,
        limit: usize,
    ) -> Result<EventListResponse, ClientError> {
        let limit = limit.to_string();
        let url = self.url_with_query(
            &["graph", "v0", "timeslices", timeslice_id, "events"],
            &[("limit", limit.as_str())],
        );
        self.send_json("timeslice_events", self.client.get(url)).await
    }
}

fn header_value(value: &str, field: &str) -> Result<HeaderValue, ValidationError> {
    HeaderValue::from_str(value)
        .map_err(|_| ValidationError::InvalidConfig(format!("{field} is not a valid header value")))
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Map a non-success status (and its body) onto the error taxonomy.
pub(crate) fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> ClientError {
    let message = error_message(body);
    let mentions_quota = message.to_ascii_lowercase().contains("quota");
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            ClientError::Validation { message }
        }
        StatusCode::UNAUTHORIZED => ClientError::Auth { message },
        StatusCode::PAYMENT_REQUIRED => ClientError::QuotaExceeded { message },
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS if mentions_quota => {
            ClientError::QuotaExceeded { message }
        }
        StatusCode::FORBIDDEN => ClientError::Forbidden { message },
        StatusCode::NOT_FOUND => ClientError::NotFound { message },
        StatusCode::PAYLOAD_TOO_LARGE => ClientError::PayloadTooLarge { message },
        StatusCode::TOO_MANY_REQUESTS => ClientError::RateLimited {
            retry_after,
            message,
        },
        status if status.is_server_error() => ClientError::Server {
            status: status.as_u16(),
            message,
        },
        status => ClientError::Http {
            status: status.as_u16(),
            message,
        },
    }
}

/// `detail`/`message`/`error` from a JSON body, else the truncated raw body.
fn error_message(body: &str) -> String {
    let from_json = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            ["detail", "message", "error"].into_iter().find_map(|key| {
                value
                    .get(key)
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string)
            })
        });
    let text = from_json.unwrap_or_else(|| body.trim().to_string());
    let mut chars = text.chars();
    let truncated: String = chars.by_ref().take(MAX_ERROR_MESSAGE_CHARS).collect();
    if chars.next().is_some() {
        format!("{truncated}...")
    } else {
        truncated
    }
}
