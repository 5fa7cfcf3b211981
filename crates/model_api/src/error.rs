use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::time::Duration;

use chat_contract::ApiError;
use time::format_description::BorrowedFormatItem;
use time::{OffsetDateTime, PrimitiveDateTime};

#[derive(Debug)]
pub enum ModelApiError {
    MissingApiKey,
    InvalidBaseUrl(String),
    InvalidHeader(String),
    InvalidRequest(String),
    Request(reqwest::Error),
    /// Non-success response; `body` is kept verbatim for classification.
    Status {
        status: u16,
        body: String,
        retry_after: Option<Duration>,
    },
    /// Error payload delivered inside an otherwise successful stream.
    StreamFailed {
        status: Option<u16>,
        body: String,
    },
    Cancelled,
}

impl fmt::Display for ModelApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingApiKey => write!(f, "API key is required"),
            Self::InvalidBaseUrl(value) => write!(f, "invalid base URL: {value}"),
            Self::InvalidHeader(message) => write!(f, "invalid header: {message}"),
            Self::InvalidRequest(message) => write!(f, "invalid request: {message}"),
            Self::Request(error) => write!(f, "request error: {error}"),
            Self::Status { status, body, .. } => write!(f, "HTTP {status}: {body}"),
            Self::StreamFailed { body, .. } => write!(f, "stream failed: {body}"),
            Self::Cancelled => write!(f, "request was cancelled"),
        }
    }
}

impl StdError for ModelApiError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Request(error) => Some(error),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ModelApiError {
    fn from(error: reqwest::Error) -> Self {
        Self::Request(error)
    }
}

impl From<ModelApiError> for ApiError {
    fn from(error: ModelApiError) -> Self {
        match error {
            ModelApiError::Request(error) => {
                let message = error.to_string();
                let api = match network_code(&error) {
                    Some(code) => ApiError::network(code, message),
                    None => ApiError::new(message),
                };
                let api = match error.status() {
                    Some(status) => api.with_status(status.as_u16()),
                    None => api,
                };
                api.with_source(error)
            }
            ModelApiError::Status {
                status,
                body,
                retry_after,
            } => {
                let api = ApiError::http(status, body);
                match retry_after {
                    Some(delay) => api.with_retry_after(delay),
                    None => api,
                }
            }
            ModelApiError::StreamFailed { status, body } => match status {
                Some(status) => ApiError::http(status, body),
                None => ApiError::new(body),
            },
            ModelApiError::Cancelled => ApiError::network("ABORT_ERR", "request was cancelled"),
            other => ApiError::new(other.to_string()),
        }
    }
}

/// Socket-level code for a transport failure, in the vocabulary the
/// classifier recognizes.
pub(crate) fn network_code(error: &reqwest::Error) -> Option<&'static str> {
    if let Some(code) = io_code(error) {
        return Some(code);
    }
    if error.is_timeout() {
        return Some("ETIMEDOUT");
    }
    if error.is_connect() {
        return Some("ECONNREFUSED");
    }
    if error.is_body() || error.is_decode() || error.is_request() {
        return Some("ECONNRESET");
    }
    None
}

fn io_code(error: &reqwest::Error) -> Option<&'static str> {
    let mut source = error.source();
    while let Some(current) = source {
        if let Some(io) = current.downcast_ref::<io::Error>() {
            return match io.kind() {
                io::ErrorKind::ConnectionReset => Some("ECONNRESET"),
                io::ErrorKind::ConnectionRefused => Some("ECONNREFUSED"),
                io::ErrorKind::ConnectionAborted => Some("ECONNABORTED"),
                io::ErrorKind::TimedOut => Some("ETIMEDOUT"),
                io::ErrorKind::BrokenPipe => Some("EPIPE"),
                io::ErrorKind::UnexpectedEof => Some("ECONNRESET"),
                _ => None,
            };
        }
        source = current.source();
    }
    None
}

const HTTP_DATE: &[BorrowedFormatItem<'static>] = time::macros::format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// Parses a `Retry-After` value: delta seconds or an HTTP date.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    if let Ok(seconds) = value.parse::<f64>() {
        return (seconds.is_finite() && seconds >= 0.0).then(|| Duration::from_secs_f64(seconds));
    }

    let at = PrimitiveDateTime::parse(value, HTTP_DATE).ok()?.assume_utc();
    let remaining = at - OffsetDateTime::now_utc();
    Some(Duration::try_from(remaining).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_accepts_seconds_and_dates() {
        assert_eq!(parse_retry_after("30"), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after("1.5"), Some(Duration::from_millis(1500)));
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after("soon"), None);
    }

    #[test]
    fn status_errors_keep_body_and_retry_hint() {
        let api = ApiError::from(ModelApiError::Status {
            status: 429,
            body: r#"{"error":{"code":429}}"#.to_string(),
            retry_after: Some(Duration::from_secs(7)),
        });

        assert_eq!(api.status(), Some(429));
        assert_eq!(api.message(), r#"{"error":{"code":429}}"#);
        assert_eq!(api.retry_after(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn cancellation_maps_to_abort_code() {
        let api = ApiError::from(ModelApiError::Cancelled);
        assert_eq!(api.code(), Some("ABORT_ERR"));
        assert_eq!(api.status(), None);
    }
}
