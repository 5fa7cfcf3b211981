use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chat_core::chat_contract::ApiError;
use chat_core::{
    retry_with_backoff, AuthType, ChatError, QuotaFallback, RetryOptions, ValidationIntent,
    ValidationNegotiator, ValidationRequiredError,
};
use tokio_util::sync::CancellationToken;

const VALIDATION_BODY: &str = r#"{"error":{"code":403,"message":"verify your account","status":"PERMISSION_DENIED","details":[{"@type":"type.googleapis.com/google.rpc.ErrorInfo","reason":"VALIDATION_REQUIRED","domain":"cloudcode-pa.googleapis.com","metadata":{}},{"@type":"type.googleapis.com/google.rpc.Help","links":[{"description":"Verify","url":"https://accounts.example.com/verify"}]}]}}"#;

fn options<T>(max_attempts: u32) -> RetryOptions<T> {
    RetryOptions::new(
        max_attempts,
        Duration::from_millis(100),
        Duration::from_secs(1),
    )
}

fn unavailable() -> ChatError {
    ChatError::Api(ApiError::http(503, "service unavailable"))
}

fn daily_quota() -> ChatError {
    ChatError::Api(ApiError::http(429, "quota").with_retry_after(Duration::from_secs(3600)))
}

struct CountingFallback {
    calls: AtomicU32,
    model: Option<String>,
}

impl CountingFallback {
    fn new(model: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            model: model.map(str::to_string),
        })
    }
}

#[async_trait]
impl QuotaFallback for CountingFallback {
    async fn on_persistent_quota(
        &self,
        auth_type: Option<AuthType>,
        _error: &ChatError,
    ) -> Result<Option<String>, ChatError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(auth_type, Some(AuthType::OAuth));
        Ok(self.model.clone())
    }
}

struct ScriptedNegotiator {
    intents: Mutex<Vec<ValidationIntent>>,
}

#[async_trait]
impl ValidationNegotiator for ScriptedNegotiator {
    async fn on_validation_required(&self, error: &ValidationRequiredError) -> ValidationIntent {
        assert_eq!(
            error.validation_link.as_deref(),
            Some("https://accounts.example.com/verify")
        );
        self.intents
            .lock()
            .expect("intents should not be poisoned")
            .remove(0)
    }
}

#[tokio::test(start_paused = true)]
async fn accepted_fallback_resets_the_attempt_budget() {
    let calls = &AtomicU32::new(0);
    let fallback = CountingFallback::new(Some("gemini-2.5-flash"));
    let options = options(2)
        .with_auth_type(AuthType::OAuth)
        .with_quota_fallback(fallback.clone());

    let value = retry_with_backoff(
        move || async move {
            match calls.fetch_add(1, Ordering::SeqCst) {
                0 => Err(unavailable()),
                1 => Err(daily_quota()),
                _ => Ok("answer"),
            }
        },
        options,
    )
    .await
    .expect("fallback model should answer");

    assert_eq!(value, "answer");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn declined_fallback_surfaces_terminal_quota() {
    let calls = &AtomicU32::new(0);
    let fallback = CountingFallback::new(None);
    let options = options(3)
        .with_auth_type(AuthType::OAuth)
        .with_quota_fallback(fallback.clone());

    let error = retry_with_backoff(
        move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(daily_quota())
        },
        options,
    )
    .await
    .expect_err("declined fallback ends the call");

    assert!(matches!(error, ChatError::TerminalQuota(ref quota) if quota.reset_delay == Some(Duration::from_secs(3600))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn retryable_quota_waits_the_server_delay() {
    let calls = &AtomicU32::new(0);
    let observed = Arc::new(Mutex::new(Vec::new()));
    let options = options(3).with_on_retry({
        let observed = Arc::clone(&observed);
        move |attempt, error, delay| {
            assert!(matches!(error, Some(ChatError::RetryableQuota(_))));
            observed
                .lock()
                .expect("observations should not be poisoned")
                .push((attempt, delay));
        }
    });

    let value = retry_with_backoff(
        move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ChatError::Api(
                    ApiError::http(429, "slow down").with_retry_after(Duration::from_millis(50)),
                ))
            } else {
                Ok(42)
            }
        },
        options,
    )
    .await
    .expect("third attempt should succeed");

    assert_eq!(value, 42);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        *observed.lock().expect("observations should not be poisoned"),
        vec![
            (1, Duration::from_millis(50)),
            (2, Duration::from_millis(50))
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn exhausted_retryable_quota_surfaces_typed_error() {
    let calls = &AtomicU32::new(0);
    let error = retry_with_backoff(
        move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(ChatError::Api(
                ApiError::http(429, "slow down").with_retry_after(Duration::from_millis(50)),
            ))
        },
        options(2),
    )
    .await
    .expect_err("budget runs out");

    assert!(matches!(error, ChatError::RetryableQuota(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn cancellation_before_start_never_runs_the_operation() {
    let calls = &AtomicU32::new(0);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let error = retry_with_backoff(
        move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ChatError>(())
        },
        options(3).with_cancel(cancel),
    )
    .await
    .expect_err("cancelled before the first attempt");

    assert!(error.is_cancelled());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_backoff_stops_further_attempts() {
    let calls = &AtomicU32::new(0);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let options = RetryOptions::new(5, Duration::from_secs(10), Duration::from_secs(30))
        .with_cancel(cancel);
    let error = retry_with_backoff(
        move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(unavailable())
        },
        options,
    )
    .await
    .expect_err("cancelled while waiting");

    assert!(error.is_cancelled());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn verified_account_retries_from_a_fresh_budget() {
    let calls = &AtomicU32::new(0);
    let negotiator = Arc::new(ScriptedNegotiator {
        intents: Mutex::new(vec![ValidationIntent::Verify]),
    });

    let value = retry_with_backoff(
        move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ChatError::Api(ApiError::http(403, VALIDATION_BODY)))
            } else {
                Ok("verified")
            }
        },
        options(1).with_validation_negotiator(negotiator),
    )
    .await
    .expect("verification should unblock the call");

    assert_eq!(value, "verified");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn cancelled_verification_is_marked_user_handled() {
    let negotiator = Arc::new(ScriptedNegotiator {
        intents: Mutex::new(vec![ValidationIntent::Cancel]),
    });

    let error = retry_with_backoff(
        || async { Err::<(), _>(ChatError::Api(ApiError::http(403, VALIDATION_BODY))) },
        options(3).with_validation_negotiator(negotiator),
    )
    .await
    .expect_err("user declined verification");

    assert!(error.is_user_handled());
}

#[tokio::test(start_paused = true)]
async fn verification_without_negotiator_is_not_user_handled() {
    let error = retry_with_backoff(
        || async { Err::<(), _>(ChatError::Api(ApiError::http(403, VALIDATION_BODY))) },
        options(3),
    )
    .await
    .expect_err("nobody to ask");

    assert!(matches!(error, ChatError::ValidationRequired(_)));
    assert!(!error.is_user_handled());
}
