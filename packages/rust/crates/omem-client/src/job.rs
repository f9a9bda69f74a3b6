//! Asynchronous server-side processing of one submitted delta.
//!
//! State machine: `PENDING -> RUNNING -> {COMPLETED, FAILED}`. [`JobHandle::wait`]
//! polls at a fixed cadence until a terminal state or its deadline; running out
//! of time is reported as [`WaitOutcome::TimedOut`], not as an error.

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep, timeout};

use crate::error::ClientError;
use crate::transport::MemoryTransport;

const MAX_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Server-side job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum JobStatus {
    /// Accepted, not started.
    Pending,
    /// Processing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl JobStatus {
    /// Wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// `COMPLETED` or `FAILED`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `next` is a legal successor (or the same state).
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Pending => true,
            Self::Running => next != Self::Pending,
            Self::Completed | Self::Failed => next == self,
        }
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        status.as_str().to_string()
    }
}

impl TryFrom<String> for JobStatus {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            _ => Err(format!("unknown job status: {raw:?}")),
        }
    }
}

/// One observed job status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusSnapshot {
    /// Job id.
    #[serde(default)]
    pub job_id: String,
    /// Observed state.
    pub status: JobStatus,
    /// Failure detail for `FAILED` jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobStatusSnapshot {
    fn synthetic(job_id: &str, status: JobStatus) -> Self {
        Self {
            job_id: job_id.to_string(),
            status,
            error: None,
        }
    }
}

/// Why [`JobHandle::wait`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A terminal state was observed (or no job needed tracking).
    Terminal,
    /// Deadline passed before a terminal state. Poll again later.
    TimedOut,
    /// Polling gave up after retries; `last_status` is the most recent known one.
    PollExhausted(ClientError),
}

/// Result of waiting on a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobWait {
    /// Last observed status.
    pub last_status: JobStatusSnapshot,
    /// Why the wait ended.
    pub outcome: WaitOutcome,
}

impl JobWait {
    /// True only when the job reached `COMPLETED` within the wait.
    #[must_use]
    pub fn completed(&self) -> bool {
        self.last_status.status == JobStatus::Completed
    }
}

/// Handle on the processing of one submitted delta.
#[derive(Clone)]
pub struct JobHandle {
    job_id: Option<String>,
    transport: Arc<dyn MemoryTransport>,
    poll_interval: Duration,
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("job_id", &self.job_id)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl JobHandle {
    /// Wrap a job reference. `None` means processing already finished.
    #[must_use]
    pub fn new(
        job_id: Option<String>,
        transport: Arc<dyn MemoryTransport>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            job_id: job_id.filter(|id| !id.trim().is_empty()),
            transport,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    /// Server job id, if the submission was asynchronous.
    #[must_use]
    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    /// Poll cadence.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Read the current status once.
    ///
    /// # Errors
    /// Returns the transport error after its retry policy is exhausted.
    pub async fn poll(&self) -> Result<JobStatusSnapshot, ClientError> {
        match self.job_id.as_deref() {
            Some(job_id) => self.transport.get_job_status(job_id).await,
            None => Ok(JobStatusSnapshot::synthetic("", JobStatus::Completed)),
        }
    }

    /// Poll until a terminal state or `wait_timeout` elapses.
    ///
    /// Returns within `wait_timeout` plus one poll interval. Polling failures
    /// after retries fall back to the last known status.
    ///
    /// # Errors
    /// Returns the polling error only when no status was ever obtained.
    pub async fn wait(&self, wait_timeout: Duration) -> Result<JobWait, ClientError> {
        let Some(job_id) = self.job_id.as_deref() else {
            return Ok(JobWait {
                last_status: JobStatusSnapshot::synthetic("", JobStatus::Completed),
                outcome: WaitOutcome::Terminal,
            });
        };

        let started = Instant::now();
        let deadline = started
            .checked_add(wait_timeout)
            .unwrap_or_else(|| started + MAX_WAIT);
        let mut last: Option<JobStatusSnapshot> = None;
        let mut polls = 0_u32;

        loop {
            let poll_budget = deadline.saturating_duration_since(Instant::now()) + self.poll_interval;
            polls = polls.saturating_add(1);
            match timeout(poll_budget, self.transport.get_job_status(job_id)).await {
                Ok(Ok(snapshot)) => {
                    last = Some(merge_observation(last, snapshot));
                }
                Ok(Err(error)) => {
                    let Some(last_status) = last else {
                        tracing::warn!(
                            event = "omem.job.wait.poll_failed",
                            job_id,
                            polls,
                            error = %error,
                            "job status unavailable"
                        );
                        return Err(error);
                    };
                    tracing::warn!(
                        event = "omem.job.wait.poll_exhausted",
                        job_id,
                        polls,
                        last_status = %last_status.status,
                        error = %error,
                        "job polling gave up; returning last known status"
                    );
                    return Ok(JobWait {
                        last_status,
                        outcome: WaitOutcome::PollExhausted(error),
                    });
                }
                Err(_) => {
                    return Ok(self.timed_out(job_id, last, started, polls));
                }
            }

            if let Some(snapshot) = last.as_ref().filter(|s| s.status.is_terminal()) {
                tracing::debug!(
                    event = "omem.job.wait.terminal",
                    job_id,
                    status = %snapshot.status,
                    polls,
                    elapsed_ms = started.elapsed().as_millis(),
                    "job reached terminal state"
                );
                return Ok(JobWait {
                    last_status: snapshot.clone(),
                    outcome: WaitOutcome::Terminal,
                });
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(self.timed_out(job_id, last, started, polls));
            }
            sleep(remaining.min(self.poll_interval)).await;
        }
    }

    fn timed_out(
        &self,
        job_id: &str,
        last: Option<JobStatusSnapshot>,
        started: Instant,
        polls: u32,
    ) -> JobWait {
        let last_status =
            last.unwrap_or_else(|| JobStatusSnapshot::synthetic(job_id, JobStatus::Pending));
        tracing::debug!(
            event = "omem.job.wait.timed_out",
            job_id,
            status = %last_status.status,
            polls,
            elapsed_ms = started.elapsed().as_millis(),
            poll_interval_ms = self.poll_interval.as_millis(),
            "job wait deadline elapsed"
        );
        JobWait {
            last_status,
            outcome: WaitOutcome::TimedOut,
        }
    }
}

/// Keep the newest observation unless it would move the state machine backwards.
fn merge_observation(
    last: Option<JobStatusSnapshot>,
    observed: JobStatusSnapshot,
) -> JobStatusSnapshot {
    match last {
        Some(previous) if !previous.status.can_transition_to(observed.status) => {
            tracing::debug!(
                event = "omem.job.wait.stale_status_ignored",
                job_id = %previous.job_id,
                previous = %previous.status,
                observed = %observed.status,
                "ignoring status that regresses the job state machine"
            );
            previous
        }
        _ => observed,
    }
}
