use std::collections::VecDeque;
use std::future::Future;

use async_trait::async_trait;
use chat_contract::{
    ApiError, CancelSignal, ContentGenerator, GenerateContentRequest, ResponseStream,
};
use futures_util::stream::{self, BoxStream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::{Client, Response};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ModelApiConfig;
use crate::error::{parse_retry_after, ModelApiError};
use crate::headers::build_headers;
use crate::payload::GenerateContentBody;
use crate::sse::{SseStreamParser, StreamFrame};
use crate::url::stream_endpoint;

/// Streaming client for the generate-content endpoint.
///
/// Performs exactly one HTTP attempt per call. Retrying, classification and
/// fallback belong to the chat session layered above.
#[derive(Debug)]
pub struct ModelApiClient {
    http: Client,
    config: ModelApiConfig,
}

impl ModelApiClient {
    pub fn new(config: ModelApiConfig) -> Result<Self, ModelApiError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let http = builder.build().map_err(ModelApiError::from)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ModelApiConfig {
        &self.config
    }

    pub fn endpoint(&self, model: &str) -> Result<String, ModelApiError> {
        stream_endpoint(&self.config.base_url, &self.config.api_version, model)
    }

    pub fn build_headers(&self) -> Result<HeaderMap, ModelApiError> {
        let headers = build_headers(&self.config)?;
        let mut out = HeaderMap::new();
        for (key, value) in headers {
            out.insert(
                HeaderName::from_bytes(key.as_bytes())
                    .map_err(|_| ModelApiError::InvalidHeader(format!("invalid header key: {key}")))?,
                HeaderValue::from_str(&value).map_err(|_| {
                    ModelApiError::InvalidHeader(format!("invalid header value for {key}"))
                })?,
            );
        }
        Ok(out)
    }

    pub fn build_request(
        &self,
        request: &GenerateContentRequest,
    ) -> Result<reqwest::RequestBuilder, ModelApiError> {
        if request.contents.is_empty() {
            return Err(ModelApiError::InvalidRequest(
                "'contents' must hold at least one turn".to_string(),
            ));
        }

        let headers = self.build_headers()?;
        let body = GenerateContentBody::from_request(request);
        Ok(self
            .http
            .post(self.endpoint(&request.model)?)
            .headers(headers)
            .json(&body))
    }

    /// Sends the request and waits for a successful response head.
    pub async fn open(
        &self,
        request: &GenerateContentRequest,
        cancel: &CancellationToken,
    ) -> Result<Response, ModelApiError> {
        if cancel.is_cancelled() {
            return Err(ModelApiError::Cancelled);
        }

        let response = await_or_cancel(self.build_request(request)?.send(), cancel).await??;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_retry_after);
        let body = await_or_cancel(response.text(), cancel)
            .await?
            .unwrap_or_default();
        let body = if body.trim().is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        } else {
            body
        };

        Err(ModelApiError::Status {
            status: status.as_u16(),
            body,
            retry_after,
        })
    }
}

#[async_trait]
impl ContentGenerator for ModelApiClient {
    async fn generate_content_stream(
        &self,
        request: GenerateContentRequest,
        prompt_id: &str,
        cancel: CancelSignal,
    ) -> Result<ResponseStream, ApiError> {
        debug!(model = %request.model, %prompt_id, "opening generate-content stream");
        let response = self.open(&request, &cancel).await?;
        Ok(response_stream(response, cancel))
    }
}

struct StreamState {
    bytes: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    parser: SseStreamParser,
    pending: VecDeque<StreamFrame>,
    cancel: CancellationToken,
    done: bool,
}

/// Adapts the response body into response chunks. An error frame or a
/// transport failure ends the stream after being yielded.
fn response_stream(response: Response, cancel: CancellationToken) -> ResponseStream {
    let state = StreamState {
        bytes: response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed(),
        parser: SseStreamParser::default(),
        pending: VecDeque::new(),
        cancel,
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(frame) = state.pending.pop_front() {
                let item = match frame {
                    StreamFrame::Chunk(chunk) => Ok(chunk),
                    StreamFrame::Error { status, body } => {
                        state.done = true;
                        state.pending.clear();
                        Err(ApiError::from(ModelApiError::StreamFailed { status, body }))
                    }
                };
                return Some((item, state));
            }
            if state.done {
                return None;
            }

            let next = tokio::select! {
                biased;
                () = state.cancel.cancelled() => None,
                next = state.bytes.next() => Some(next),
            };
            let Some(next) = next else {
                state.done = true;
                return Some((Err(ApiError::from(ModelApiError::Cancelled)), state));
            };

            match next {
                Some(Ok(bytes)) => {
                    let frames = state.parser.feed(&bytes);
                    state.pending.extend(frames);
                }
                Some(Err(error)) => {
                    state.done = true;
                    return Some((Err(ApiError::from(ModelApiError::from(error))), state));
                }
                None => {
                    state.done = true;
                    let frames = state.parser.finish();
                    state.pending.extend(frames);
                }
            }
        }
    })
    .boxed()
}

async fn await_or_cancel<F>(future: F, cancel: &CancellationToken) -> Result<F::Output, ModelApiError>
where
    F: Future,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(ModelApiError::Cancelled),
        output = future => Ok(output),
    }
}
