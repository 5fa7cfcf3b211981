//! Maps arbitrary errors onto the closed set of recovery categories.

use std::error::Error as StdError;
use std::io;
use std::sync::OnceLock;
use std::time::Duration;

use chat_contract::ApiError;
use regex::Regex;

use crate::error::{
    ChatError, ModelNotFoundError, RetryableQuotaError, TerminalQuotaError,
    ValidationRequiredError,
};
use crate::rpc_error::{parse_rpc_error, RpcError, RpcParse};

/// Server delays above this are treated as a long-window reset.
pub const TERMINAL_RETRY_DELAY_THRESHOLD: Duration = Duration::from_secs(120);
/// Delay assumed for per-minute throttling that names no delay.
pub const DEFAULT_RATE_LIMIT_DELAY: Duration = Duration::from_secs(60);

const MAX_SOURCE_CHAIN: usize = 32;

const NETWORK_CODES: &[&str] = &[
    "ECONNRESET",
    "ETIMEDOUT",
    "EPIPE",
    "ENOTFOUND",
    "EAI_AGAIN",
    "ECONNREFUSED",
    "ECONNABORTED",
    "EHOSTUNREACH",
    "ENETUNREACH",
    "EPROTO",
];

/// Recovery category of a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCategory {
    TerminalQuota {
        reset_delay: Option<Duration>,
    },
    RetryableQuota {
        retry_delay: Option<Duration>,
    },
    ValidationRequired {
        link: Option<String>,
        description: Option<String>,
        learn_more_url: Option<String>,
    },
    ModelNotFound,
    Generic5xx {
        status: u16,
    },
    GenericNetwork,
    NonRetryable,
}

impl ErrorCategory {
    /// Transient failures eligible for plain exponential backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Generic5xx { .. } | Self::GenericNetwork)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::TerminalQuota { .. } => "terminal_quota",
            Self::RetryableQuota { .. } => "retryable_quota",
            Self::ValidationRequired { .. } => "validation_required",
            Self::ModelNotFound => "model_not_found",
            Self::Generic5xx { .. } => "generic_5xx",
            Self::GenericNetwork => "generic_network",
            Self::NonRetryable => "non_retryable",
        }
    }
}

/// Classifies any error. Total and deterministic.
pub fn classify(error: &(dyn StdError + 'static)) -> ErrorCategory {
    inspect(error).category
}

/// Replaces a raw transport failure with its typed counterpart when the
/// category has one; anything else is returned unchanged.
pub fn classify_chat_error(error: ChatError) -> ChatError {
    let ChatError::Api(api) = error else {
        return error;
    };

    let Inspection { category, message } = inspect(&api);
    let message = message.unwrap_or_else(|| api.message().to_string());

    match category {
        ErrorCategory::TerminalQuota { reset_delay } => ChatError::TerminalQuota(TerminalQuotaError {
            message,
            reset_delay,
            cause: api,
        }),
        ErrorCategory::RetryableQuota { retry_delay } => {
            ChatError::RetryableQuota(RetryableQuotaError {
                message,
                retry_delay,
                cause: api,
            })
        }
        ErrorCategory::ValidationRequired {
            link,
            description,
            learn_more_url,
        } => ChatError::ValidationRequired(ValidationRequiredError {
            message,
            validation_link: link,
            validation_description: description,
            learn_more_url,
            user_handled: false,
            cause: api,
        }),
        ErrorCategory::ModelNotFound => ChatError::ModelNotFound(ModelNotFoundError {
            message,
            cause: api,
        }),
        ErrorCategory::Generic5xx { .. }
        | ErrorCategory::GenericNetwork
        | ErrorCategory::NonRetryable => ChatError::Api(api),
    }
}

struct Inspection {
    category: ErrorCategory,
    message: Option<String>,
}

impl Inspection {
    fn bare(category: ErrorCategory) -> Self {
        Self {
            category,
            message: None,
        }
    }
}

fn inspect(error: &(dyn StdError + 'static)) -> Inspection {
    if let Some(chat) = error.downcast_ref::<ChatError>() {
        if let Some(category) = typed_category(chat) {
            return Inspection::bare(category);
        }
    }

    let api = error
        .downcast_ref::<ChatError>()
        .and_then(ChatError::api_error)
        .or_else(|| chain(error).find_map(|item| item.downcast_ref::<ApiError>()));

    if api.is_some_and(is_network_api_error) || chain(error).any(is_network_failure) {
        return Inspection::bare(ErrorCategory::GenericNetwork);
    }

    let text = api
        .map(|api| api.message().to_string())
        .unwrap_or_else(|| error.to_string());

    let rpc = match parse_rpc_error(&text) {
        RpcParse::Found(rpc) => Some(rpc),
        RpcParse::Absent => None,
        RpcParse::TooDeep => return Inspection::bare(ErrorCategory::GenericNetwork),
    };

    // The innermost payload is the most specific account of the failure.
    let status = rpc
        .as_ref()
        .and_then(|rpc| rpc.code)
        .or_else(|| api.and_then(ApiError::status))
        .or_else(|| {
            rpc.as_ref()
                .and_then(|rpc| rpc.status.as_deref())
                .and_then(status_from_code)
        })
        .or_else(|| api.and_then(ApiError::code).and_then(status_from_code));

    let Some(status) = status else {
        return Inspection::bare(ErrorCategory::NonRetryable);
    };

    let server_delay = rpc
        .as_ref()
        .and_then(RpcError::retry_delay)
        .or_else(|| api.and_then(ApiError::retry_after));
    let message = rpc
        .as_ref()
        .map(|rpc| rpc.message.clone())
        .filter(|message| !message.trim().is_empty());

    Inspection {
        category: categorize(status, rpc.as_ref(), server_delay, &text),
        message,
    }
}

fn typed_category(error: &ChatError) -> Option<ErrorCategory> {
    Some(match error {
        ChatError::TerminalQuota(error) => ErrorCategory::TerminalQuota {
            reset_delay: error.reset_delay,
        },
        ChatError::RetryableQuota(error) => ErrorCategory::RetryableQuota {
            retry_delay: error.retry_delay,
        },
        ChatError::ValidationRequired(error) => ErrorCategory::ValidationRequired {
            link: error.validation_link.clone(),
            description: error.validation_description.clone(),
            learn_more_url: error.learn_more_url.clone(),
        },
        ChatError::ModelNotFound(_) => ErrorCategory::ModelNotFound,
        ChatError::InvalidStream(_) | ChatError::ContentRejected { .. } | ChatError::Cancelled => {
            ErrorCategory::NonRetryable
        }
        ChatError::Api(_) => return None,
    })
}

fn categorize(
    status: u16,
    rpc: Option<&RpcError>,
    server_delay: Option<Duration>,
    text: &str,
) -> ErrorCategory {
    if status == 429 {
        return quota_category(rpc, server_delay);
    }

    if let Some(category) = validation_category(status, rpc) {
        return category;
    }

    if status == 404 && names_model_resource(rpc, text) {
        return ErrorCategory::ModelNotFound;
    }

    match status {
        400 => ErrorCategory::NonRetryable,
        500..=599 => ErrorCategory::Generic5xx { status },
        _ => ErrorCategory::NonRetryable,
    }
}

fn quota_category(rpc: Option<&RpcError>, server_delay: Option<Duration>) -> ErrorCategory {
    let Some(rpc) = rpc else {
        return match server_delay {
            Some(delay) if delay > TERMINAL_RETRY_DELAY_THRESHOLD => ErrorCategory::TerminalQuota {
                reset_delay: Some(delay),
            },
            delay => ErrorCategory::RetryableQuota { retry_delay: delay },
        };
    };

    let daily = rpc.quota_violations().any(|violation| {
        violation
            .quota_id
            .as_deref()
            .is_some_and(|id| id.contains("PerDay") || id.contains("Daily"))
    });
    if daily {
        return ErrorCategory::TerminalQuota {
            reset_delay: server_delay,
        };
    }

    let reason = rpc.error_info().map(|(reason, _, _)| reason);
    if reason == Some("QUOTA_EXHAUSTED") {
        return ErrorCategory::TerminalQuota {
            reset_delay: server_delay,
        };
    }

    if let Some(delay) = server_delay {
        if delay > TERMINAL_RETRY_DELAY_THRESHOLD {
            return ErrorCategory::TerminalQuota {
                reset_delay: Some(delay),
            };
        }
    }

    let per_minute = rpc.quota_violations().any(|violation| {
        violation
            .quota_id
            .as_deref()
            .is_some_and(|id| id.contains("PerMinute"))
    });
    if reason == Some("RATE_LIMIT_EXCEEDED") || per_minute {
        return ErrorCategory::RetryableQuota {
            retry_delay: Some(server_delay.unwrap_or(DEFAULT_RATE_LIMIT_DELAY)),
        };
    }

    ErrorCategory::RetryableQuota {
        retry_delay: server_delay,
    }
}

fn validation_category(status: u16, rpc: Option<&RpcError>) -> Option<ErrorCategory> {
    if status != 403 {
        return None;
    }
    let rpc = rpc?;
    let (reason, _, metadata) = rpc.error_info()?;
    if reason != "VALIDATION_REQUIRED" {
        return None;
    }

    let mut links = rpc.help_links();
    let primary = links.next();
    let learn_more = links.next();

    let link = primary
        .map(|link| link.url.clone())
        .or_else(|| metadata.get("validation_link").cloned())
        .or_else(|| metadata.get("validationUrl").cloned());
    let description = primary
        .and_then(|link| link.description.clone())
        .or_else(|| metadata.get("validation_description").cloned());

    Some(ErrorCategory::ValidationRequired {
        link,
        description,
        learn_more_url: learn_more.map(|link| link.url.clone()),
    })
}

fn names_model_resource(rpc: Option<&RpcError>, text: &str) -> bool {
    let message = rpc.map(|rpc| rpc.message.as_str()).unwrap_or(text);
    let lowered = message.to_ascii_lowercase();
    lowered.contains("model")
        || rpc
            .and_then(RpcError::error_info)
            .is_some_and(|(_, _, metadata)| metadata.contains_key("model"))
}

/// Maps RPC status names to the HTTP status they travel with.
fn status_from_code(code: &str) -> Option<u16> {
    Some(match code.trim() {
        "RESOURCE_EXHAUSTED" => 429,
        "NOT_FOUND" => 404,
        "INVALID_ARGUMENT" | "FAILED_PRECONDITION" => 400,
        "PERMISSION_DENIED" => 403,
        "UNAUTHENTICATED" => 401,
        "INTERNAL" => 500,
        "UNAVAILABLE" => 503,
        "DEADLINE_EXCEEDED" => 504,
        other => return other.parse::<u16>().ok().filter(|code| (100..600).contains(code)),
    })
}

fn chain<'a>(
    error: &'a (dyn StdError + 'static),
) -> impl Iterator<Item = &'a (dyn StdError + 'static)> {
    std::iter::successors(Some(error), |item| (*item).source()).take(MAX_SOURCE_CHAIN)
}

fn is_network_failure(error: &(dyn StdError + 'static)) -> bool {
    if let Some(io) = error.downcast_ref::<io::Error>() {
        return matches!(
            io.kind(),
            io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::ConnectionRefused
                | io::ErrorKind::NotConnected
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::TimedOut
        );
    }

    if let Some(api) = error.downcast_ref::<ApiError>() {
        return is_network_api_error(api);
    }

    if error.downcast_ref::<ChatError>().is_some() {
        return false;
    }

    network_message_regex().is_match(&error.to_string())
}

fn is_network_api_error(api: &ApiError) -> bool {
    if api.code().is_some_and(is_network_code) {
        return true;
    }
    api.status().is_none() && network_message_regex().is_match(api.message())
}

fn is_network_code(code: &str) -> bool {
    let code = code.trim();
    NETWORK_CODES.contains(&code) || code.starts_with("ERR_SSL_")
}

fn network_message_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(
            r"(?i)fetch failed|socket hang up|connection (reset|refused|closed|aborted)|tls handshake|dns (lookup|error)|premature close|\b(ECONNRESET|ETIMEDOUT|EPIPE|ENOTFOUND|EAI_AGAIN|ECONNREFUSED)\b",
        )
        .expect("network regex must compile")
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn quota_payload(details: serde_json::Value) -> String {
        json!({
            "error": {
                "code": 429,
                "status": "RESOURCE_EXHAUSTED",
                "message": "Quota exceeded",
                "details": details,
            }
        })
        .to_string()
    }

    #[test]
    fn network_codes_win_over_everything_else() {
        let error = ApiError::network("ECONNRESET", "socket closed");
        assert_eq!(classify(&error), ErrorCategory::GenericNetwork);

        let wrapped = ApiError::new("request failed").with_source(io::Error::new(
            io::ErrorKind::TimedOut,
            "operation timed out",
        ));
        assert_eq!(classify(&wrapped), ErrorCategory::GenericNetwork);

        assert_eq!(
            classify(&ApiError::network("ERR_SSL_WRONG_VERSION_NUMBER", "tls")),
            ErrorCategory::GenericNetwork
        );
    }

    #[test]
    fn daily_quota_is_terminal() {
        let body = quota_payload(json!([
            {
                "@type": "type.googleapis.com/google.rpc.QuotaFailure",
                "violations": [{"quotaId": "GenerateRequestsPerDayPerProject"}]
            }
        ]));
        assert_eq!(
            classify(&ApiError::http(429, body)),
            ErrorCategory::TerminalQuota { reset_delay: None }
        );
    }

    #[test]
    fn long_retry_delay_is_terminal_and_short_one_is_retryable() {
        let long = quota_payload(json!([
            {"@type": "type.googleapis.com/google.rpc.RetryInfo", "retryDelay": "3600s"}
        ]));
        assert_eq!(
            classify(&ApiError::http(429, long)),
            ErrorCategory::TerminalQuota {
                reset_delay: Some(Duration::from_secs(3600))
            }
        );

        let short = quota_payload(json!([
            {"@type": "type.googleapis.com/google.rpc.RetryInfo", "retryDelay": "2s"}
        ]));
        assert_eq!(
            classify(&ApiError::http(429, short)),
            ErrorCategory::RetryableQuota {
                retry_delay: Some(Duration::from_secs(2))
            }
        );
    }

    #[test]
    fn per_minute_quota_defaults_to_a_minute() {
        let body = quota_payload(json!([
            {
                "@type": "type.googleapis.com/google.rpc.QuotaFailure",
                "violations": [{"quotaId": "GenerateRequestsPerMinutePerProject"}]
            }
        ]));
        assert_eq!(
            classify(&ApiError::http(429, body)),
            ErrorCategory::RetryableQuota {
                retry_delay: Some(DEFAULT_RATE_LIMIT_DELAY)
            }
        );
    }

    #[test]
    fn bare_429_uses_retry_after_header() {
        let error = ApiError::http(429, "Too Many Requests").with_retry_after(Duration::from_secs(7));
        assert_eq!(
            classify(&error),
            ErrorCategory::RetryableQuota {
                retry_delay: Some(Duration::from_secs(7))
            }
        );
    }

    #[test]
    fn string_status_code_is_understood() {
        let error = ApiError::new("exhausted").with_code("RESOURCE_EXHAUSTED");
        assert_eq!(
            classify(&error),
            ErrorCategory::RetryableQuota { retry_delay: None }
        );
    }

    #[test]
    fn validation_required_carries_links() {
        let body = json!({
            "error": {
                "code": 403,
                "message": "Verify your account",
                "details": [
                    {
                        "@type": "type.googleapis.com/google.rpc.ErrorInfo",
                        "reason": "VALIDATION_REQUIRED",
                        "domain": "example.googleapis.com"
                    },
                    {
                        "@type": "type.googleapis.com/google.rpc.Help",
                        "links": [
                            {"description": "Verify here", "url": "https://verify.example/"},
                            {"description": "Learn more", "url": "https://docs.example/"}
                        ]
                    }
                ]
            }
        })
        .to_string();

        assert_eq!(
            classify(&ApiError::http(403, body)),
            ErrorCategory::ValidationRequired {
                link: Some("https://verify.example/".to_string()),
                description: Some("Verify here".to_string()),
                learn_more_url: Some("https://docs.example/".to_string()),
            }
        );
    }

    #[test]
    fn status_ladder_for_plain_errors() {
        assert_eq!(
            classify(&ApiError::http(404, "models/gemini-x is not found")),
            ErrorCategory::ModelNotFound
        );
        assert_eq!(
            classify(&ApiError::http(404, "page missing")),
            ErrorCategory::NonRetryable
        );
        assert_eq!(
            classify(&ApiError::http(400, "bad request")),
            ErrorCategory::NonRetryable
        );
        assert_eq!(
            classify(&ApiError::http(503, "overloaded")),
            ErrorCategory::Generic5xx { status: 503 }
        );
        assert_eq!(
            classify(&ApiError::new("boom")),
            ErrorCategory::NonRetryable
        );
    }

    #[test]
    fn status_found_only_inside_nested_message() {
        let inner = json!({"error": {"code": 503, "message": "backend unavailable"}}).to_string();
        let outer = json!({"error": {"message": inner}}).to_string();

        assert_eq!(
            classify(&ApiError::new(outer)),
            ErrorCategory::Generic5xx { status: 503 }
        );
    }

    #[test]
    fn hopelessly_nested_payload_is_network() {
        let mut payload = json!({"error": {"code": 400, "message": "x"}}).to_string();
        for _ in 0..12 {
            payload = json!({"error": {"message": payload}}).to_string();
        }
        assert_eq!(classify(&ApiError::new(payload)), ErrorCategory::GenericNetwork);
    }

    #[test]
    fn classification_is_deterministic() {
        let error = ApiError::http(500, "internal");
        assert_eq!(classify(&error), classify(&error));
    }

    #[test]
    fn classify_chat_error_builds_typed_variant() {
        let body = quota_payload(json!([
            {"@type": "type.googleapis.com/google.rpc.ErrorInfo", "reason": "QUOTA_EXHAUSTED"}
        ]));
        let classified = classify_chat_error(ChatError::Api(ApiError::http(429, body)));

        match classified {
            ChatError::TerminalQuota(error) => {
                assert_eq!(error.message, "Quota exceeded");
                assert_eq!(error.cause.status(), Some(429));
            }
            other => panic!("expected terminal quota, got {other:?}"),
        }

        let passthrough = classify_chat_error(ChatError::Api(ApiError::http(500, "x")));
        assert!(matches!(passthrough, ChatError::Api(_)));
    }

    #[test]
    fn typed_errors_keep_their_category() {
        let error = ChatError::RetryableQuota(RetryableQuotaError {
            message: "slow down".to_string(),
            retry_delay: Some(Duration::from_millis(50)),
            cause: ApiError::http(429, "slow down"),
        });
        assert_eq!(
            error.category(),
            ErrorCategory::RetryableQuota {
                retry_delay: Some(Duration::from_millis(50))
            }
        );
    }
}
