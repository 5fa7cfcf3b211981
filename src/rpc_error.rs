//! Structured error payloads in the `google.rpc.Status` shape.
//!
//! Servers (and proxies in front of them) frequently wrap one error payload
//! inside the `message` string of another. [`parse_rpc_error`] peels those
//! layers with a bounded loop and returns the innermost payload.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

/// Nesting levels unwrapped before giving up.
pub const MAX_NESTING_DEPTH: usize = 10;

const ERROR_INFO_TYPE: &str = "type.googleapis.com/google.rpc.ErrorInfo";
const RETRY_INFO_TYPE: &str = "type.googleapis.com/google.rpc.RetryInfo";
const QUOTA_FAILURE_TYPE: &str = "type.googleapis.com/google.rpc.QuotaFailure";
const HELP_TYPE: &str = "type.googleapis.com/google.rpc.Help";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaViolation {
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub quota_metric: Option<String>,
    #[serde(default)]
    pub quota_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HelpLink {
    #[serde(default)]
    pub description: Option<String>,
    pub url: String,
}

/// One entry of the `details` array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorDetail {
    ErrorInfo {
        reason: Option<String>,
        domain: Option<String>,
        metadata: HashMap<String, String>,
    },
    RetryInfo {
        retry_delay: Option<Duration>,
    },
    QuotaFailure {
        violations: Vec<QuotaViolation>,
    },
    Help {
        links: Vec<HelpLink>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawErrorInfo {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRetryInfo {
    #[serde(default)]
    retry_delay: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawQuotaFailure {
    #[serde(default)]
    violations: Vec<QuotaViolation>,
}

#[derive(Debug, Deserialize)]
struct RawHelp {
    #[serde(default)]
    links: Vec<HelpLink>,
}

/// Innermost structured error found in a payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RpcError {
    pub code: Option<u16>,
    pub status: Option<String>,
    pub message: String,
    pub details: Vec<ErrorDetail>,
}

impl RpcError {
    pub fn error_info(&self) -> Option<(&str, Option<&str>, &HashMap<String, String>)> {
        self.details.iter().find_map(|detail| match detail {
            ErrorDetail::ErrorInfo {
                reason: Some(reason),
                domain,
                metadata,
            } => Some((reason.as_str(), domain.as_deref(), metadata)),
            _ => None,
        })
    }

    pub fn retry_delay(&self) -> Option<Duration> {
        self.details.iter().find_map(|detail| match detail {
            ErrorDetail::RetryInfo { retry_delay } => *retry_delay,
            _ => None,
        })
    }

    pub fn quota_violations(&self) -> impl Iterator<Item = &QuotaViolation> {
        self.details
            .iter()
            .filter_map(|detail| match detail {
                ErrorDetail::QuotaFailure { violations } => Some(violations.iter()),
                _ => None,
            })
            .flatten()
    }

    pub fn help_links(&self) -> impl Iterator<Item = &HelpLink> {
        self.details
            .iter()
            .filter_map(|detail| match detail {
                ErrorDetail::Help { links } => Some(links.iter()),
                _ => None,
            })
            .flatten()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcParse {
    /// No structured payload in the text.
    Absent,
    Found(RpcError),
    /// Still nested after [`MAX_NESTING_DEPTH`] levels.
    TooDeep,
}

/// Extracts the innermost structured error from `text`.
pub fn parse_rpc_error(text: &str) -> RpcParse {
    let mut found: Option<RpcError> = None;
    let mut current = text.to_string();

    for _ in 0..MAX_NESTING_DEPTH {
        let Some(layer) = parse_layer(&current) else {
            return found.map_or(RpcParse::Absent, RpcParse::Found);
        };

        let next_message = layer.message.clone();
        found = Some(merge_layers(found, layer));
        current = next_message;
    }

    if parse_layer(&current).is_some() {
        return RpcParse::TooDeep;
    }

    found.map_or(RpcParse::Absent, RpcParse::Found)
}

/// Keeps the inner layer but inherits fields the inner one lacks.
fn merge_layers(outer: Option<RpcError>, mut inner: RpcError) -> RpcError {
    let Some(outer) = outer else {
        return inner;
    };

    if inner.code.is_none() {
        inner.code = outer.code;
    }
    if inner.status.is_none() {
        inner.status = outer.status;
    }
    if inner.details.is_empty() {
        inner.details = outer.details;
    }
    inner
}

fn parse_layer(text: &str) -> Option<RpcError> {
    let trimmed = text.trim();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return None;
    }

    let value = serde_json::from_str::<Value>(trimmed).ok()?;
    let value = match value {
        Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
        other => other,
    };
    let error = value.get("error")?;

    let code = error
        .get("code")
        .and_then(Value::as_u64)
        .and_then(|code| u16::try_from(code).ok());
    let status = error
        .get("status")
        .and_then(Value::as_str)
        .map(ToString::to_string);
    let message = match error.get("message") {
        Some(Value::String(message)) => message.clone(),
        Some(Value::Object(_)) | Some(Value::Array(_)) => error
            .get("message")
            .map(Value::to_string)
            .unwrap_or_default(),
        _ => String::new(),
    };
    let details = error
        .get("details")
        .and_then(Value::as_array)
        .map(|details| details.iter().filter_map(parse_detail).collect())
        .unwrap_or_default();

    Some(RpcError {
        code,
        status,
        message,
        details,
    })
}

fn parse_detail(value: &Value) -> Option<ErrorDetail> {
    let detail_type = value.get("@type")?.as_str()?;
    match detail_type {
        ERROR_INFO_TYPE => {
            let raw = serde_json::from_value::<RawErrorInfo>(value.clone()).ok()?;
            Some(ErrorDetail::ErrorInfo {
                reason: raw.reason,
                domain: raw.domain,
                metadata: raw.metadata,
            })
        }
        RETRY_INFO_TYPE => {
            let raw = serde_json::from_value::<RawRetryInfo>(value.clone()).ok()?;
            Some(ErrorDetail::RetryInfo {
                retry_delay: raw.retry_delay.as_deref().and_then(parse_proto_duration),
            })
        }
        QUOTA_FAILURE_TYPE => {
            let raw = serde_json::from_value::<RawQuotaFailure>(value.clone()).ok()?;
            Some(ErrorDetail::QuotaFailure {
                violations: raw.violations,
            })
        }
        HELP_TYPE => {
            let raw = serde_json::from_value::<RawHelp>(value.clone()).ok()?;
            Some(ErrorDetail::Help { links: raw.links })
        }
        _ => None,
    }
}

/// Parses protobuf JSON durations such as `"34s"`, `"1.5s"` or `"900ms"`.
pub fn parse_proto_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let (number, scale) = if let Some(ms) = value.strip_suffix("ms") {
        (ms, 0.001)
    } else if let Some(secs) = value.strip_suffix('s') {
        (secs, 1.0)
    } else {
        (value, 1.0)
    };

    let seconds = number.trim().parse::<f64>().ok()? * scale;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(seconds))
}
