//! Deterministic, scriptable [`ContentGenerator`] for tests and offline runs.
//!
//! Each call to [`ContentGenerator::generate_content_stream`] pops the next
//! [`ScriptedTurn`]. Once the script is empty the generator echoes the last
//! user message back word by word, which is what the CLI's mock provider
//! shows.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chat_contract::{
    ApiError, CancelSignal, Content, ContentGenerator, FinishReason, GenerateContentRequest,
    GenerateContentResponse, Part, ResponseStream, Role, UsageMetadata,
};
use futures_util::stream::{self, StreamExt};
use serde_json::Value;

/// Stable provider identifier used for explicit startup selection.
pub const MOCK_PROVIDER_ID: &str = "mock";

/// One scripted response to a stream request.
#[derive(Debug, Clone)]
pub enum ScriptedTurn {
    /// Opens successfully and yields these chunks.
    Chunks(Vec<GenerateContentResponse>),
    /// Fails before any chunk is produced.
    OpenError(ApiError),
    /// Yields `chunks`, then fails mid-response.
    MidStreamError {
        chunks: Vec<GenerateContentResponse>,
        error: ApiError,
    },
    /// Opens and then never yields until the request is cancelled.
    Hang,
}

impl ScriptedTurn {
    /// A complete text reply split into one chunk per fragment.
    pub fn text(fragments: &[&str]) -> Self {
        let mut chunks: Vec<GenerateContentResponse> = fragments
            .iter()
            .map(|fragment| text_chunk(fragment))
            .collect();
        if let Some(last) = chunks.last_mut() {
            set_finish_reason(last, FinishReason::Stop);
        }
        Self::Chunks(chunks)
    }
}

/// A text chunk without a finish reason.
pub fn text_chunk(text: &str) -> GenerateContentResponse {
    GenerateContentResponse::from_parts(vec![Part::text(text)], None)
}

/// A final text chunk carrying [`FinishReason::Stop`].
pub fn final_chunk(text: &str) -> GenerateContentResponse {
    GenerateContentResponse::from_parts(vec![Part::text(text)], Some(FinishReason::Stop))
}

/// A function-call chunk without a finish reason.
pub fn tool_call_chunk(name: &str, args: Value) -> GenerateContentResponse {
    GenerateContentResponse::from_parts(vec![Part::function_call(name, args)], None)
}

fn set_finish_reason(chunk: &mut GenerateContentResponse, reason: FinishReason) {
    if let Some(candidate) = chunk.candidates.first_mut() {
        candidate.finish_reason = Some(reason);
    }
}

#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<ScriptedTurn>>,
    requests: Mutex<Vec<GenerateContentRequest>>,
    calls: AtomicUsize,
    chunk_delay: Option<Duration>,
}

impl ScriptedGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_turn(self, turn: ScriptedTurn) -> Self {
        self.push(turn);
        self
    }

    /// Pauses between chunks so streaming is visible to a human.
    #[must_use]
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    pub fn push(&self, turn: ScriptedTurn) {
        lock_unpoisoned(&self.script).push_back(turn);
    }

    /// Number of stream requests received so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<GenerateContentRequest> {
        lock_unpoisoned(&self.requests).clone()
    }

    pub fn last_request(&self) -> Option<GenerateContentRequest> {
        lock_unpoisoned(&self.requests).last().cloned()
    }

    fn paced(&self, items: Vec<Result<GenerateContentResponse, ApiError>>) -> ResponseStream {
        match self.chunk_delay {
            Some(delay) => stream::iter(items)
                .then(move |item| async move {
                    tokio::time::sleep(delay).await;
                    item
                })
                .boxed(),
            None => stream::iter(items).boxed(),
        }
    }
}

#[async_trait]
impl ContentGenerator for ScriptedGenerator {
    async fn generate_content_stream(
        &self,
        request: GenerateContentRequest,
        _prompt_id: &str,
        cancel: CancelSignal,
    ) -> Result<ResponseStream, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let turn = lock_unpoisoned(&self.script).pop_front();
        let turn = turn.unwrap_or_else(|| echo_turn(&request));
        lock_unpoisoned(&self.requests).push(request);

        match turn {
            ScriptedTurn::Chunks(chunks) => Ok(self.paced(chunks.into_iter().map(Ok).collect())),
            ScriptedTurn::OpenError(error) => Err(error),
            ScriptedTurn::MidStreamError { chunks, error } => {
                let mut items: Vec<_> = chunks.into_iter().map(Ok).collect();
                items.push(Err(error));
                Ok(self.paced(items))
            }
            ScriptedTurn::Hang => Ok(stream::once(async move {
                cancel.cancelled().await;
                Err(ApiError::network("ABORT_ERR", "request aborted"))
            })
            .boxed()),
        }
    }
}

/// Replies with the last user text, one word per chunk, ending with usage.
fn echo_turn(request: &GenerateContentRequest) -> ScriptedTurn {
    let prompt = request
        .contents
        .iter()
        .rev()
        .find(|content| content.role == Role::User && content.has_literal_text())
        .map(user_text)
        .unwrap_or_default();

    let reply = format!("[{}] You said: {prompt}", request.model);
    let mut chunks: Vec<GenerateContentResponse> = reply
        .split_inclusive(' ')
        .map(text_chunk)
        .collect();
    let usage = UsageMetadata {
        prompt_token_count: Some(prompt.len().div_ceil(4) as u64),
        candidates_token_count: Some(chunks.len() as u64),
        ..UsageMetadata::default()
    };
    chunks.push(
        GenerateContentResponse::from_parts(Vec::new(), Some(FinishReason::Stop)).with_usage(usage),
    );
    ScriptedTurn::Chunks(chunks)
}

fn user_text(content: &Content) -> String {
    content
        .parts
        .iter()
        .filter_map(|part| part.text.as_deref())
        .collect::<Vec<_>>()
        .join(" ")
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use chat_contract::GenerateContentConfig;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use super::*;

    fn request(text: &str) -> GenerateContentRequest {
        GenerateContentRequest {
            model: "mock".to_string(),
            contents: vec![Content::user_text(text)],
            config: GenerateContentConfig::default(),
        }
    }

    async fn collect(
        generator: &ScriptedGenerator,
        text: &str,
    ) -> Result<Vec<Result<GenerateContentResponse, ApiError>>, ApiError> {
        let stream = generator
            .generate_content_stream(request(text), "prompt-1", CancellationToken::new())
            .await?;
        Ok(stream.collect().await)
    }

    #[tokio::test]
    async fn scripted_turns_are_served_in_order() {
        let generator = ScriptedGenerator::new()
            .with_turn(ScriptedTurn::OpenError(ApiError::http(503, "unavailable")))
            .with_turn(ScriptedTurn::text(&["Hel", "lo"]));

        let error = collect(&generator, "hi")
            .await
            .expect_err("first turn should fail to open");
        assert_eq!(error.status(), Some(503));

        let chunks = collect(&generator, "hi").await.expect("second turn opens");
        assert_eq!(chunks.len(), 2);
        let last = chunks[1].as_ref().expect("chunk should be ok");
        assert_eq!(last.finish_reason(), Some(FinishReason::Stop));
        assert_eq!(generator.call_count(), 2);
        assert_eq!(generator.requests().len(), 2);
    }

    #[tokio::test]
    async fn mid_stream_error_follows_chunks() {
        let generator = ScriptedGenerator::new().with_turn(ScriptedTurn::MidStreamError {
            chunks: vec![tool_call_chunk("ls", json!({}))],
            error: ApiError::network("ECONNRESET", "reset"),
        });

        let items = collect(&generator, "hi").await.expect("stream opens");
        assert!(items[0].is_ok());
        assert_eq!(
            items[1].as_ref().expect_err("second item fails").code(),
            Some("ECONNRESET")
        );
    }

    #[tokio::test]
    async fn empty_script_echoes_the_prompt() {
        let generator = ScriptedGenerator::new();
        let items = collect(&generator, "ping").await.expect("stream opens");

        let text: String = items
            .iter()
            .filter_map(|item| item.as_ref().ok())
            .map(GenerateContentResponse::text)
            .collect();
        assert_eq!(text, "[mock] You said: ping");
        let last = items
            .last()
            .and_then(|item| item.as_ref().ok())
            .expect("final chunk");
        assert_eq!(last.finish_reason(), Some(FinishReason::Stop));
        assert!(last.usage_metadata.is_some());
    }

    #[tokio::test]
    async fn hang_resolves_once_cancelled() {
        let generator = ScriptedGenerator::new().with_turn(ScriptedTurn::Hang);
        let cancel = CancellationToken::new();
        let mut stream = generator
            .generate_content_stream(request("hi"), "prompt-1", cancel.clone())
            .await
            .expect("stream opens");

        cancel.cancel();
        let item = stream.next().await.expect("one item after cancel");
        assert_eq!(item.expect_err("aborted").code(), Some("ABORT_ERR"));
    }
}
