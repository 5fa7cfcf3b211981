use url::Url;

use crate::error::ModelApiError;

/// Default service root for generate-content requests.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_API_VERSION: &str = "v1beta";

/// Builds the streaming endpoint for `model`.
///
/// Normalization rules:
/// 1) an empty base falls back to [`DEFAULT_BASE_URL`]
/// 2) trailing slashes on the base are dropped
/// 3) a base already ending in the version segment is not extended again
/// 4) a `models/` prefix on the model id is accepted and not doubled
pub fn stream_endpoint(
    base_url: &str,
    api_version: &str,
    model: &str,
) -> Result<String, ModelApiError> {
    let base = match base_url.trim() {
        "" => DEFAULT_BASE_URL,
        trimmed => trimmed,
    };
    let base = base.trim_end_matches('/');

    let parsed = Url::parse(base)
        .map_err(|error| ModelApiError::InvalidBaseUrl(format!("{base}: {error}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ModelApiError::InvalidBaseUrl(format!(
            "{base}: unsupported scheme '{}'",
            parsed.scheme()
        )));
    }

    let version = api_version.trim().trim_matches('/');
    let root = if version.is_empty() || base.ends_with(&format!("/{version}")) {
        base.to_string()
    } else {
        format!("{base}/{version}")
    };

    let model = model.trim().trim_start_matches("models/");
    if model.is_empty() {
        return Err(ModelApiError::InvalidRequest("model id is empty".to_string()));
    }

    Ok(format!("{root}/models/{model}:streamGenerateContent?alt=sse"))
}
