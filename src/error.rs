use std::fmt;
use std::time::Duration;

use chat_contract::ApiError;
use thiserror::Error;

use crate::classify::ErrorCategory;

/// Long-window quota exhaustion: waiting a few seconds will not help.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TerminalQuotaError {
    pub message: String,
    /// Time until the quota window resets, when the server said so.
    pub reset_delay: Option<Duration>,
    #[source]
    pub cause: ApiError,
}

/// Short-window throttling with an optional server-suggested wait.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RetryableQuotaError {
    pub message: String,
    pub retry_delay: Option<Duration>,
    #[source]
    pub cause: ApiError,
}

/// The account must complete an out-of-band verification step first.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ValidationRequiredError {
    pub message: String,
    pub validation_link: Option<String>,
    pub validation_description: Option<String>,
    pub learn_more_url: Option<String>,
    /// Set once the user picked change-auth or cancel for this error, so the
    /// caller does not report it a second time.
    pub user_handled: bool,
    #[source]
    pub cause: ApiError,
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ModelNotFoundError {
    pub message: String,
    #[source]
    pub cause: ApiError,
}

/// Why a completed response stream was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidStreamKind {
    NoFinishReason,
    MalformedFunctionCall,
    NoResponseText,
}

impl InvalidStreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoFinishReason => "NO_FINISH_REASON",
            Self::MalformedFunctionCall => "MALFORMED_FUNCTION_CALL",
            Self::NoResponseText => "NO_RESPONSE_TEXT",
        }
    }
}

impl fmt::Display for InvalidStreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("model stream ended with an invalid response ({kind})")]
pub struct InvalidStreamError {
    pub kind: InvalidStreamKind,
}

impl InvalidStreamError {
    #[must_use]
    pub fn new(kind: InvalidStreamKind) -> Self {
        Self { kind }
    }
}

/// Rejected input to [`crate::ChatSession::set_history`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidHistoryError {
    #[error("history entry {index} has no parts")]
    EmptyTurn { index: usize },
    #[error("history entry {index} contains a part with no content")]
    DegeneratePart { index: usize },
}

/// Every failure a chat turn can surface.
///
/// The quota, validation and model variants are produced by classification
/// of an [`ApiError`]; `Api` is an unclassified transport failure kept as the
/// server reported it.
#[derive(Debug, Clone, Error)]
pub enum ChatError {
    #[error(transparent)]
    TerminalQuota(#[from] TerminalQuotaError),
    #[error(transparent)]
    RetryableQuota(#[from] RetryableQuotaError),
    #[error(transparent)]
    ValidationRequired(#[from] ValidationRequiredError),
    #[error(transparent)]
    ModelNotFound(#[from] ModelNotFoundError),
    #[error(transparent)]
    InvalidStream(#[from] InvalidStreamError),
    #[error(transparent)]
    Api(#[from] ApiError),
    /// Every attempt returned a value the content predicate rejected.
    #[error("result rejected after {attempts} attempts")]
    ContentRejected { attempts: u32 },
    #[error("request was cancelled")]
    Cancelled,
}

impl ChatError {
    /// Category of this error, classifying raw transport failures on demand.
    pub fn category(&self) -> ErrorCategory {
        crate::classify::classify(self)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// True for a validation error the user already acted on.
    pub fn is_user_handled(&self) -> bool {
        matches!(self, Self::ValidationRequired(error) if error.user_handled)
    }

    /// The transport error underneath, if any.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::TerminalQuota(error) => Some(&error.cause),
            Self::RetryableQuota(error) => Some(&error.cause),
            Self::ValidationRequired(error) => Some(&error.cause),
            Self::ModelNotFound(error) => Some(&error.cause),
            Self::Api(error) => Some(error),
            Self::InvalidStream(_) | Self::ContentRejected { .. } | Self::Cancelled => None,
        }
    }
}
