//! Retry policy behaviour and the retrying transport decorator.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use common::ScriptedTransport;
use omem_client::transport::SubmitReceipt;
use omem_client::{
    ClientError, CommitOptions, Conversation, ConversationOptions, CursorSync, MemoryTransport,
    RetryConfig, RetryPolicy, RetryingTransport, TurnInput,
};

fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(RetryConfig {
        max_attempts,
        base_delay_ms: 5,
        max_delay_ms: 20,
        max_elapsed_ms: 5_000,
        jitter: false,
    })
}

fn server_error() -> ClientError {
    ClientError::Server {
        status: 503,
        message: "unavailable".to_string(),
    }
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() -> Result<()> {
    let attempts = &AtomicU32::new(0);
    let value = fast_policy(4)
        .run("scripted_op", move || async move {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 { Err(server_error()) } else { Ok(n) }
        })
        .await?;
    assert_eq!(value, 3);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    Ok(())
}

#[tokio::test]
async fn fatal_failure_is_not_retried() {
    let attempts = &AtomicU32::new(0);
    let error = fast_policy(5)
        .run("scripted_op", move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(ClientError::Auth {
                message: "bad key".to_string(),
            })
        })
        .await
        .expect_err("auth failure is fatal");
    assert!(matches!(error, ClientError::Auth { .. }));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn exhaustion_returns_last_error_unchanged() {
    let attempts = &AtomicU32::new(0);
    let error = fast_policy(3)
        .run("scripted_op", move || async move {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            Err::<(), _>(ClientError::Server {
                status: 500 + u16::try_from(n).unwrap_or(0),
                message: format!("attempt {n}"),
            })
        })
        .await
        .expect_err("every attempt fails");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(
        error,
        ClientError::Server {
            status: 503,
            message: "attempt 3".to_string(),
        }
    );
}

#[tokio::test]
async fn elapsed_budget_stops_retries_early() {
    let policy = RetryPolicy::new(RetryConfig {
        max_attempts: 100,
        base_delay_ms: 40,
        max_delay_ms: 40,
        max_elapsed_ms: 100,
        jitter: false,
    });
    let attempts = &AtomicU32::new(0);
    let started = Instant::now();
    let error = policy
        .run("scripted_op", move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(ClientError::Network("unreachable".to_string()))
        })
        .await
        .expect_err("budget runs out");
    assert!(matches!(error, ClientError::Network(_)));
    let made = attempts.load(Ordering::SeqCst);
    assert!((2..=3).contains(&made), "made {made} attempts");
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn rate_limit_hint_sets_the_delay() -> Result<()> {
    let policy = RetryPolicy::new(RetryConfig {
        max_attempts: 2,
        base_delay_ms: 1,
        max_delay_ms: 5_000,
        max_elapsed_ms: 5_000,
        jitter: true,
    });
    let attempts = &AtomicU32::new(0);
    let started = Instant::now();
    policy
        .run("scripted_op", move || async move {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ClientError::RateLimited {
                    retry_after: Some(Duration::from_millis(120)),
                    message: "slow down".to_string(),
                })
            } else {
                Ok(())
            }
        })
        .await?;
    assert!(started.elapsed() >= Duration::from_millis(120));
    Ok(())
}

#[tokio::test]
async fn retry_after_beyond_max_delay_gives_up_immediately() {
    let policy = RetryPolicy::new(RetryConfig {
        max_attempts: 5,
        base_delay_ms: 1,
        max_delay_ms: 1_000,
        max_elapsed_ms: 120_000,
        jitter: false,
    });
    let attempts = &AtomicU32::new(0);
    let started = Instant::now();
    let error = policy
        .run("scripted_op", move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(ClientError::RateLimited {
                retry_after: Some(Duration::from_secs(60)),
                message: "come back in a minute".to_string(),
            })
        })
        .await
        .expect_err("hint exceeds max_delay");
    assert!(matches!(error, ClientError::RateLimited { .. }));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn retry_after_beyond_remaining_budget_gives_up() {
    let policy = RetryPolicy::new(RetryConfig {
        max_attempts: 5,
        base_delay_ms: 1,
        max_delay_ms: 10_000,
        max_elapsed_ms: 200,
        jitter: false,
    });
    let attempts = &AtomicU32::new(0);
    let started = Instant::now();
    let error = policy
        .run("scripted_op", move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(ClientError::RateLimited {
                retry_after: Some(Duration::from_secs(5)),
                message: "slow down".to_string(),
            })
        })
        .await
        .expect_err("hint exceeds elapsed budget");
    assert!(matches!(error, ClientError::RateLimited { .. }));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn disabled_config_makes_a_single_attempt() {
    let attempts = &AtomicU32::new(0);
    let result = RetryPolicy::new(RetryConfig::disabled())
        .run("scripted_op", move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(server_error())
        })
        .await;
    assert!(result.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retrying_transport_recovers_a_flaky_submit() -> Result<()> {
    let scripted = Arc::new(ScriptedTransport::new());
    scripted.push_submit(Err(ClientError::Network("reset".to_string())));
    scripted.push_submit(Err(server_error()));
    scripted.push_submit(Ok(SubmitReceipt {
        job_id: Some("job-r".to_string()),
        accepted_count: 2,
    }));
    let transport: Arc<dyn MemoryTransport> =
        Arc::new(RetryingTransport::new(Arc::clone(&scripted), fast_policy(3)));

    let options = ConversationOptions {
        sync_cursor: false,
        auto_timestamp: false,
        poll_interval: Duration::from_millis(10),
    };
    let mut conv = Conversation::open(transport, "conv-flaky", options).await?;
    conv.add(&TurnInput::user("a"))?;
    conv.add(&TurnInput::assistant("b"))?;
    let result = conv.commit(CommitOptions::no_wait()).await?;

    assert_eq!(result.job_id.as_deref(), Some("job-r"));
    let submits = scripted.submits();
    assert_eq!(submits.len(), 3);
    assert!(submits.iter().all(|s| s.turn_ids == vec!["t0001", "t0002"]));
    assert!(submits.iter().all(|s| s.base_turn_id.is_none()));
    Ok(())
}

#[tokio::test]
async fn retrying_transport_surfaces_fatal_submit_once() -> Result<()> {
    let scripted = Arc::new(ScriptedTransport::new());
    scripted.push_submit(Err(ClientError::QuotaExceeded {
        message: "monthly quota".to_string(),
    }));
    let transport: Arc<dyn MemoryTransport> =
        Arc::new(RetryingTransport::new(Arc::clone(&scripted), fast_policy(5)));

    let options = ConversationOptions {
        sync_cursor: false,
        ..ConversationOptions::default()
    };
    let mut conv = Conversation::open(transport, "conv-quota", options).await?;
    conv.add(&TurnInput::user("a"))?;
    let error = conv
        .commit(CommitOptions::no_wait())
        .await
        .expect_err("quota is fatal");
    assert!(matches!(error, ClientError::QuotaExceeded { .. }));
    assert_eq!(scripted.submit_count(), 1);
    assert_eq!(conv.pending().len(), 1);
    Ok(())
}

#[tokio::test]
async fn cursor_sync_reads_session_once_through_retrying_transport() -> Result<()> {
    let scripted = Arc::new(ScriptedTransport::new());
    scripted.fail_session_reads(ClientError::Network("connection refused".to_string()));
    let retrying = Arc::new(RetryingTransport::new(Arc::clone(&scripted), fast_policy(3)));

    let options = ConversationOptions {
        sync_cursor: true,
        ..ConversationOptions::default()
    };
    let transport: Arc<dyn MemoryTransport> = Arc::clone(&retrying) as Arc<dyn MemoryTransport>;
    let conv = Conversation::open(transport, "conv-offline", options).await?;
    assert!(matches!(conv.cursor_sync(), CursorSync::Unreachable { .. }));
    assert_eq!(scripted.session_calls.load(Ordering::SeqCst), 1);

    let direct = retrying.get_session("conv-offline").await;
    assert!(direct.is_err());
    assert_eq!(scripted.session_calls.load(Ordering::SeqCst), 4);
    Ok(())
}
