//! Resilient streaming chat sessions against a remote generative model.
//!
//! The crate layers three concerns over a [`chat_contract::ContentGenerator`]:
//! classifying failures ([`classify`]), retrying them with backoff and user
//! negotiation ([`retry_with_backoff`]), and validating what a completed
//! stream actually delivered ([`StreamValidator`]). [`ChatSession`] ties them
//! together with curated conversation history and lifecycle hooks.

use std::sync::{Mutex, MutexGuard};

mod backoff;
mod classify;
mod config;
mod error;
mod fallback;
pub mod history;
mod negotiation;
mod retry;
pub mod rpc_error;
mod session;
mod validator;

pub use crate::backoff::{BackoffPolicy, DEFAULT_JITTER_RATIO};
pub use crate::classify::{
    classify, classify_chat_error, ErrorCategory, DEFAULT_RATE_LIMIT_DELAY,
    TERMINAL_RETRY_DELAY_THRESHOLD,
};
pub use crate::config::{
    AuthType, ChatSettings, ModelAlias, ModelConfigService, RetrySettings,
    DEFAULT_CONTENT_RETRY_ATTEMPTS, DEFAULT_CONTENT_RETRY_DELAY, DEFAULT_PREVIEW_MARKER,
};
pub use crate::error::{
    ChatError, InvalidHistoryError, InvalidStreamError, InvalidStreamKind, ModelNotFoundError,
    RetryableQuotaError, TerminalQuotaError, ValidationRequiredError,
};
pub use crate::fallback::{FallbackHandler, FallbackIntent, FallbackRequest, ModelFallback};
pub use crate::negotiation::{NegotiationBroker, PendingNegotiation, ValidationRequest};
pub use crate::retry::{
    retry_with_backoff, ContentPredicate, ErrorClassifierFn, ErrorPredicate, QuotaFallback,
    RetryObserver, RetryOptions, ValidationIntent, ValidationNegotiator, DEFAULT_INITIAL_DELAY,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY,
};
pub use crate::session::{ChatSession, ChatSessionBuilder, StreamEvent, TurnOutcome, TurnStream};
pub use crate::validator::{StreamValidator, TurnCompletion};

/// Contract types re-exported for downstream crates.
pub use chat_contract;

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
