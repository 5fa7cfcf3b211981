//! Generic retry driver with classified failures and interactive recovery.
//!
//! [`retry_with_backoff`] owns no state across calls. Every decision comes
//! from the [`ErrorCategory`] of the failure and the callbacks in
//! [`RetryOptions`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::BackoffPolicy;
use crate::classify::{classify_chat_error, ErrorCategory};
use crate::config::AuthType;
use crate::error::{ChatError, ValidationRequiredError};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Decides whether a persistent quota or missing-model failure can continue
/// on another model.
#[async_trait]
pub trait QuotaFallback: Send + Sync {
    /// Returns the model to continue with, or `None` to give up. An `Err`
    /// is treated like `None`.
    async fn on_persistent_quota(
        &self,
        auth_type: Option<AuthType>,
        error: &ChatError,
    ) -> Result<Option<String>, ChatError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationIntent {
    /// The user completed verification; retry from a fresh budget.
    Verify,
    ChangeAuth,
    Cancel,
}

#[async_trait]
pub trait ValidationNegotiator: Send + Sync {
    async fn on_validation_required(&self, error: &ValidationRequiredError) -> ValidationIntent;
}

pub type ErrorClassifierFn = Arc<dyn Fn(&ChatError) -> ErrorCategory + Send + Sync>;
pub type ErrorPredicate = Arc<dyn Fn(&ChatError) -> bool + Send + Sync>;
pub type ContentPredicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;
/// Observability hook: `(attempt, error, delay)`. `error` is `None` for
/// content-level retries.
pub type RetryObserver = Arc<dyn Fn(u32, Option<&ChatError>, Duration) + Send + Sync>;

pub struct RetryOptions<T> {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub auth_type: Option<AuthType>,
    /// Replaces [`ChatError::category`] when set.
    pub classify: Option<ErrorClassifierFn>,
    /// Replaces the default transient check (5xx and network failures) for
    /// errors outside the quota, validation and model categories.
    pub should_retry_on_error: Option<ErrorPredicate>,
    /// Flags a successful result as unacceptable. A result still rejected on
    /// the last attempt fails with [`ChatError::ContentRejected`].
    pub should_retry_on_content: Option<ContentPredicate<T>>,
    pub on_persistent_quota: Option<Arc<dyn QuotaFallback>>,
    pub on_validation_required: Option<Arc<dyn ValidationNegotiator>>,
    pub cancel: Option<CancellationToken>,
    pub on_retry: Option<RetryObserver>,
}

impl<T> Default for RetryOptions<T> {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            auth_type: None,
            classify: None,
            should_retry_on_error: None,
            should_retry_on_content: None,
            on_persistent_quota: None,
            on_validation_required: None,
            cancel: None,
            on_retry: None,
        }
    }
}

impl<T> RetryOptions<T> {
    #[must_use]
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_auth_type(mut self, auth_type: AuthType) -> Self {
        self.auth_type = Some(auth_type);
        self
    }

    #[must_use]
    pub fn with_classifier(
        mut self,
        classify: impl Fn(&ChatError) -> ErrorCategory + Send + Sync + 'static,
    ) -> Self {
        self.classify = Some(Arc::new(classify));
        self
    }

    #[must_use]
    pub fn with_should_retry_on_error(
        mut self,
        predicate: impl Fn(&ChatError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_retry_on_error = Some(Arc::new(predicate));
        self
    }

    #[must_use]
    pub fn with_should_retry_on_content(
        mut self,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_retry_on_content = Some(Arc::new(predicate));
        self
    }

    #[must_use]
    pub fn with_quota_fallback(mut self, fallback: Arc<dyn QuotaFallback>) -> Self {
        self.on_persistent_quota = Some(fallback);
        self
    }

    #[must_use]
    pub fn with_validation_negotiator(mut self, negotiator: Arc<dyn ValidationNegotiator>) -> Self {
        self.on_validation_required = Some(negotiator);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    #[must_use]
    pub fn with_on_retry(
        mut self,
        observer: impl Fn(u32, Option<&ChatError>, Duration) + Send + Sync + 'static,
    ) -> Self {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    fn category_of(&self, error: &ChatError) -> ErrorCategory {
        match &self.classify {
            Some(classify) => classify(error),
            None => error.category(),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    fn notify_retry(&self, attempt: u32, error: Option<&ChatError>, delay: Duration) {
        if let Some(on_retry) = &self.on_retry {
            on_retry(attempt, error, delay);
        }
    }
}

/// Runs `operation` until it succeeds, a failure is final, or the budget
/// is spent.
///
/// A successful model fallback or a completed verification resets both the
/// attempt counter and the backoff delay. Repeated fallbacks can therefore
/// retry without bound; callers that chain fallbacks must stop offering them.
pub async fn retry_with_backoff<T, F, Fut>(
    mut operation: F,
    options: RetryOptions<T>,
) -> Result<T, ChatError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ChatError>>,
{
    let max_attempts = options.max_attempts.max(1);
    let policy = BackoffPolicy::new(options.initial_delay, options.max_delay);
    let cancel = options.cancel.as_ref();
    let mut attempt: u32 = 0;

    loop {
        if options.is_cancelled() {
            return Err(ChatError::Cancelled);
        }

        attempt += 1;
        debug!(attempt, max_attempts, "invoking retryable operation");

        let error = match await_or_cancel(operation(), cancel).await? {
            Ok(value) => {
                let rejected = options
                    .should_retry_on_content
                    .as_ref()
                    .is_some_and(|predicate| predicate(&value));
                if !rejected {
                    return Ok(value);
                }
                if attempt >= max_attempts {
                    warn!(attempt, "result still rejected, giving up");
                    return Err(ChatError::ContentRejected { attempts: attempt });
                }

                let delay = policy.next_delay(attempt - 1);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "result rejected, retrying");
                options.notify_retry(attempt, None, delay);
                sleep_or_cancel(delay, cancel).await?;
                continue;
            }
            Err(error) => error,
        };

        if error.is_cancelled() || options.is_cancelled() {
            return Err(ChatError::Cancelled);
        }

        let category = options.category_of(&error);
        match category {
            ErrorCategory::TerminalQuota { .. } | ErrorCategory::ModelNotFound => {
                let classified = classify_chat_error(error);
                if negotiate_fallback(&options, &classified).await? {
                    attempt = 0;
                    continue;
                }
                return Err(classified);
            }
            ErrorCategory::ValidationRequired { .. } => {
                let classified = classify_chat_error(error);
                let ChatError::ValidationRequired(mut validation) = classified else {
                    return Err(classified);
                };
                let Some(negotiator) = &options.on_validation_required else {
                    return Err(ChatError::ValidationRequired(validation));
                };

                let intent =
                    await_or_cancel(negotiator.on_validation_required(&validation), cancel).await?;
                info!(?intent, "validation negotiation resolved");
                if intent == ValidationIntent::Verify {
                    attempt = 0;
                    continue;
                }
                validation.user_handled = true;
                return Err(ChatError::ValidationRequired(validation));
            }
            ErrorCategory::RetryableQuota { .. } => {
                let classified = classify_chat_error(error);
                if attempt >= max_attempts {
                    if negotiate_fallback(&options, &classified).await? {
                        attempt = 0;
                        continue;
                    }
                    return Err(classified);
                }

                let delay = policy
                    .delay_for(&category, attempt - 1)
                    .unwrap_or_else(|| policy.next_delay(attempt - 1));
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %classified,
                    "quota throttled, retrying"
                );
                options.notify_retry(attempt, Some(&classified), delay);
                sleep_or_cancel(delay, cancel).await?;
            }
            ErrorCategory::Generic5xx { .. }
            | ErrorCategory::GenericNetwork
            | ErrorCategory::NonRetryable => {
                let retryable = match &options.should_retry_on_error {
                    Some(predicate) => predicate(&error),
                    None => category.is_transient(),
                };
                if !retryable || attempt >= max_attempts {
                    debug!(attempt, category = category.name(), "giving up");
                    return Err(error);
                }

                let delay = policy.next_delay(attempt - 1);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    category = category.name(),
                    error = %error,
                    "transient failure, retrying"
                );
                options.notify_retry(attempt, Some(&error), delay);
                sleep_or_cancel(delay, cancel).await?;
            }
        }
    }
}

/// True when the fallback handler chose a model to continue with.
async fn negotiate_fallback<T>(
    options: &RetryOptions<T>,
    error: &ChatError,
) -> Result<bool, ChatError> {
    let Some(fallback) = &options.on_persistent_quota else {
        return Ok(false);
    };

    let decision = await_or_cancel(
        fallback.on_persistent_quota(options.auth_type, error),
        options.cancel.as_ref(),
    )
    .await?;

    match decision {
        Ok(Some(model)) => {
            info!(%model, "continuing with fallback model");
            Ok(true)
        }
        Ok(None) => Ok(false),
        Err(fallback_error) => {
            warn!(error = %fallback_error, "fallback handler failed");
            Ok(false)
        }
    }
}

/// Resolves `future` unless `cancel` fires first.
pub(crate) async fn await_or_cancel<F>(
    future: F,
    cancel: Option<&CancellationToken>,
) -> Result<F::Output, ChatError>
where
    F: Future,
{
    let Some(cancel) = cancel else {
        return Ok(future.await);
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(ChatError::Cancelled),
        output = future => Ok(output),
    }
}

pub(crate) async fn sleep_or_cancel(
    delay: Duration,
    cancel: Option<&CancellationToken>,
) -> Result<(), ChatError> {
    await_or_cancel(tokio::time::sleep(delay), cancel).await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use chat_contract::ApiError;

    use super::*;

    fn fast_options<T>() -> RetryOptions<T> {
        RetryOptions::new(3, Duration::from_millis(10), Duration::from_millis(100))
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_without_retry() {
        let calls = &AtomicU32::new(0);
        let result = retry_with_backoff(
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ChatError>(7)
            },
            fast_options(),
        )
        .await
        .expect("operation should succeed");

        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_fails_immediately() {
        let calls = &AtomicU32::new(0);
        let error = retry_with_backoff(
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ChatError::Api(ApiError::http(400, "bad request")))
            },
            fast_options(),
        )
        .await
        .expect_err("400 should not be retried");

        assert!(matches!(error, ChatError::Api(ref api) if api.status() == Some(400)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_exhaust_budget_and_return_original_error() {
        let calls = &AtomicU32::new(0);
        let error = retry_with_backoff(
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ChatError::Api(ApiError::http(503, "overloaded")))
            },
            fast_options(),
        )
        .await
        .expect_err("persistent 503 should surface");

        assert!(matches!(error, ChatError::Api(ref api) if api.status() == Some(503)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn content_rejection_is_retried_then_fails() {
        let calls = &AtomicU32::new(0);
        let options = RetryOptions::new(2, Duration::from_millis(10), Duration::from_millis(100))
            .with_should_retry_on_content(|value: &u32| *value == 0);

        let error = retry_with_backoff(
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<u32, ChatError>(0)
            },
            options,
        )
        .await
        .expect_err("rejected content must not look like success");

        assert!(matches!(error, ChatError::ContentRejected { attempts: 2 }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_predicate_replaces_transient_check() {
        let calls = &AtomicU32::new(0);
        let options = fast_options().with_should_retry_on_error(|_| false);

        retry_with_backoff(
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ChatError::Api(ApiError::http(500, "internal")))
            },
            options,
        )
        .await
        .expect_err("predicate refuses every retry");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_quota_without_handler_surfaces_typed_error() {
        let body = r#"{"error":{"code":429,"message":"daily cap","details":[{"@type":"type.googleapis.com/google.rpc.ErrorInfo","reason":"QUOTA_EXHAUSTED"}]}}"#;
        let error = retry_with_backoff(
            move || async move { Err::<(), _>(ChatError::Api(ApiError::http(429, body))) },
            fast_options(),
        )
        .await
        .expect_err("terminal quota should surface");

        assert!(matches!(error, ChatError::TerminalQuota(_)));
    }
}
