//! Conversation state and the turn driver.
//!
//! A [`ChatSession`] owns the comprehensive history and serializes turns: a
//! new turn waits until the previous turn's stream has fully resolved. Each
//! turn runs on its own task and reports to the caller through a
//! [`TurnStream`].
//!
//! Two retry loops are nested per turn. The inner loop reopens the model
//! stream after network, 5xx and quota failures and runs fallback or
//! verification negotiation. The outer loop replays the whole attempt, with
//! a small separate budget, when a completed stream is rejected or the
//! connection drops mid-response. Every outer replay first emits
//! [`StreamEvent::Retry`] so consumers can discard partial output.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use chat_contract::{
    BeforeModelInput, CompletedToolCall, Content, ContentGenerator, GenerateContentRequest,
    GenerateContentResponse, HookSystem, MessageKind, MessageRecord, ModelConfigKey,
    ModelResolver, Part, RecordingError, RecordingSink, ResponseStream, Tool, UsageMetadata,
};
use futures_util::{Stream, StreamExt};
use tokio::sync::{mpsc, oneshot, OwnedMutexGuard};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::classify::{classify_chat_error, ErrorCategory};
use crate::config::ChatSettings;
use crate::error::{ChatError, InvalidHistoryError};
use crate::history::{
    consolidate_parts, curate_history, ensure_active_loop_signatures, estimate_tokens,
    parse_thought, strip_thought_signatures, validate_history,
};
use crate::lock_unpoisoned;
use crate::retry::{
    await_or_cancel, retry_with_backoff, QuotaFallback, RetryOptions, ValidationNegotiator,
};
use crate::validator::{StreamValidator, TurnCompletion};

const EVENT_BUFFER: usize = 64;
const HOOK_STOP_REASON: &str = "stopped by hook";
const HOOK_BLOCK_REASON: &str = "blocked by hook";

/// What a consumer sees while a turn runs.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Chunk(GenerateContentResponse),
    /// Everything received since the last `Retry` (or since the start of the
    /// turn) is void; a fresh attempt follows.
    Retry,
    AgentStopped {
        reason: String,
    },
    AgentBlocked {
        reason: String,
    },
}

/// How a turn ended.
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    /// The model turn was appended to history.
    Committed,
    /// A hook ended the turn before or during the model call.
    Stopped { reason: String },
    /// A hook vetoed the model call.
    Blocked { reason: String },
    Failed(ChatError),
}

impl TurnOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed)
    }

    pub fn error(&self) -> Option<&ChatError> {
        match self {
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }
}

/// Events of one turn. The final item of a failed turn is the error.
///
/// Dropping the stream cancels the turn. The driver releases the session
/// and nothing further is committed.
pub struct TurnStream {
    events: mpsc::Receiver<Result<StreamEvent, ChatError>>,
    outcome: oneshot::Receiver<TurnOutcome>,
    _abandon: DropGuard,
}

impl TurnStream {
    /// Discards any unread events and waits for the turn to end.
    pub async fn finish(mut self) -> TurnOutcome {
        while self.events.recv().await.is_some() {}
        self.outcome
            .await
            .unwrap_or(TurnOutcome::Failed(ChatError::Cancelled))
    }
}

impl Stream for TurnStream {
    type Item = Result<StreamEvent, ChatError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

struct SessionState {
    history: Vec<Content>,
    tools: Vec<Tool>,
    last_prompt_tokens: u64,
}

struct SessionInner {
    generator: Arc<dyn ContentGenerator>,
    resolver: Arc<dyn ModelResolver>,
    hooks: Option<Arc<dyn HookSystem>>,
    recorder: Option<Arc<dyn RecordingSink>>,
    quota_fallback: Option<Arc<dyn QuotaFallback>>,
    validation: Option<Arc<dyn ValidationNegotiator>>,
    settings: ChatSettings,
    state: Mutex<SessionState>,
    turn_lock: Arc<tokio::sync::Mutex<()>>,
}

pub struct ChatSessionBuilder {
    generator: Arc<dyn ContentGenerator>,
    resolver: Arc<dyn ModelResolver>,
    settings: ChatSettings,
    hooks: Option<Arc<dyn HookSystem>>,
    recorder: Option<Arc<dyn RecordingSink>>,
    quota_fallback: Option<Arc<dyn QuotaFallback>>,
    validation: Option<Arc<dyn ValidationNegotiator>>,
}

impl ChatSessionBuilder {
    #[must_use]
    pub fn with_settings(mut self, settings: ChatSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<dyn HookSystem>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    #[must_use]
    pub fn with_recorder(mut self, recorder: Arc<dyn RecordingSink>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    #[must_use]
    pub fn with_quota_fallback(mut self, fallback: Arc<dyn QuotaFallback>) -> Self {
        self.quota_fallback = Some(fallback);
        self
    }

    #[must_use]
    pub fn with_validation_negotiator(mut self, negotiator: Arc<dyn ValidationNegotiator>) -> Self {
        self.validation = Some(negotiator);
        self
    }

    pub fn build(self) -> ChatSession {
        let state = SessionState {
            history: Vec::new(),
            tools: self.settings.tools.clone(),
            last_prompt_tokens: 0,
        };

        ChatSession {
            inner: Arc::new(SessionInner {
                generator: self.generator,
                resolver: self.resolver,
                hooks: self.hooks,
                recorder: self.recorder,
                quota_fallback: self.quota_fallback,
                validation: self.validation,
                settings: self.settings,
                state: Mutex::new(state),
                turn_lock: Arc::new(tokio::sync::Mutex::new(())),
            }),
        }
    }
}

/// One conversation with a remote model. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<SessionInner>,
}

impl ChatSession {
    pub fn builder(
        generator: Arc<dyn ContentGenerator>,
        resolver: Arc<dyn ModelResolver>,
    ) -> ChatSessionBuilder {
        ChatSessionBuilder {
            generator,
            resolver,
            settings: ChatSettings::default(),
            hooks: None,
            recorder: None,
            quota_fallback: None,
            validation: None,
        }
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.inner.settings
    }

    /// Comprehensive history, or the curated view sent to the model.
    pub fn history(&self, curated: bool) -> Vec<Content> {
        let state = lock_unpoisoned(&self.inner.state);
        if curated {
            curate_history(&state.history)
        } else {
            state.history.clone()
        }
    }

    pub fn set_history(&self, history: Vec<Content>) -> Result<(), InvalidHistoryError> {
        validate_history(&history)?;
        lock_unpoisoned(&self.inner.state).history = history;
        Ok(())
    }

    pub fn add_history(&self, content: Content) {
        self.inner.push_history(content);
    }

    pub fn clear_history(&self) {
        let mut state = lock_unpoisoned(&self.inner.state);
        state.history.clear();
        state.last_prompt_tokens = 0;
    }

    /// Drops thought signatures, e.g. after switching to a model that cannot
    /// verify the ones already in history.
    pub fn strip_thoughts_from_history(&self) {
        strip_thought_signatures(&mut lock_unpoisoned(&self.inner.state).history);
    }

    pub fn set_tools(&self, tools: Vec<Tool>) {
        lock_unpoisoned(&self.inner.state).tools = tools;
    }

    /// Prompt size of the most recent request: the server-reported count when
    /// one arrived, otherwise the local estimate.
    pub fn last_prompt_token_count(&self) -> u64 {
        lock_unpoisoned(&self.inner.state).last_prompt_tokens
    }

    /// Forwards finished tool invocations to the transcript.
    pub fn record_completed_tool_calls(&self, model: &str, calls: &[CompletedToolCall]) {
        self.inner
            .record("tool calls", |sink| sink.record_tool_calls(model, calls));
    }

    /// Starts a turn once every earlier turn has finished.
    ///
    /// The user message is appended to history before any network call, so it
    /// survives failure and cancellation of the turn. Cancelling while still
    /// waiting for an earlier turn leaves history untouched.
    pub async fn send_message_stream(
        &self,
        key: ModelConfigKey,
        message: Vec<Part>,
        prompt_id: impl Into<String>,
        cancel: CancellationToken,
        display_content: Option<String>,
    ) -> TurnStream {
        let cancel = cancel.child_token();
        let (events, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (outcome, outcome_rx) = oneshot::channel();
        let stream = TurnStream {
            events: events_rx,
            outcome: outcome_rx,
            _abandon: cancel.clone().drop_guard(),
        };
        let prompt_id = prompt_id.into();

        let guard = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(%prompt_id, "turn cancelled while waiting for previous turn");
                let _ = events.try_send(Err(ChatError::Cancelled));
                let _ = outcome.send(TurnOutcome::Failed(ChatError::Cancelled));
                return stream;
            }
            guard = Arc::clone(&self.inner.turn_lock).lock_owned() => guard,
        };

        let user_turn = Content::user(message);
        self.inner.push_history(user_turn.clone());
        let model = self.inner.resolver.resolve(&key).model;
        self.inner.record("user message", |sink| {
            sink.record_message(MessageRecord {
                model,
                kind: MessageKind::User,
                content: user_turn.parts,
                display_content,
            })
        });

        let turn = Turn {
            inner: Arc::clone(&self.inner),
            key,
            prompt_id,
            cancel,
            events,
            attempts: AtomicU32::new(0),
            stream_opened: Arc::new(AtomicBool::new(false)),
        };
        tokio::spawn(run_turn(turn, guard, outcome));

        stream
    }
}

impl SessionInner {
    fn push_history(&self, content: Content) {
        lock_unpoisoned(&self.state).history.push(content);
    }

    fn record(
        &self,
        what: &'static str,
        write: impl FnOnce(&dyn RecordingSink) -> Result<(), RecordingError>,
    ) {
        let Some(recorder) = &self.recorder else {
            return;
        };
        if let Err(error) = write(recorder.as_ref()) {
            warn!(what, %error, "transcript write failed");
        }
    }

    fn note_usage(&self, usage: &UsageMetadata) {
        if let Some(prompt_tokens) = usage.prompt_token_count {
            lock_unpoisoned(&self.state).last_prompt_tokens = prompt_tokens;
        }
        self.record("token usage", |sink| sink.record_message_tokens(usage));
    }

    fn note_thought(&self, part: &Part) {
        let Some(text) = part.text.as_deref().filter(|text| !text.trim().is_empty()) else {
            return;
        };
        let thought = parse_thought(text);
        self.record("thought", |sink| sink.record_thought(thought));
    }

    fn network_retry_options(&self, cancel: &CancellationToken) -> RetryOptions<Opened> {
        let retry = self.settings.retry;
        let mut options = RetryOptions::new(retry.max_attempts, retry.initial_delay, retry.max_delay)
            .with_cancel(cancel.clone())
            .with_on_retry(|attempt, error, delay| {
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error.map(ToString::to_string).unwrap_or_default(),
                    "reopening model stream"
                );
            });

        if let Some(auth_type) = self.settings.auth_type {
            options = options.with_auth_type(auth_type);
        }
        if let Some(fallback) = &self.quota_fallback {
            options = options.with_quota_fallback(Arc::clone(fallback));
        }
        if let Some(negotiator) = &self.validation {
            options = options.with_validation_negotiator(Arc::clone(negotiator));
        }
        options
    }
}

/// Per-turn context shared by every attempt.
struct Turn {
    inner: Arc<SessionInner>,
    key: ModelConfigKey,
    prompt_id: String,
    cancel: CancellationToken,
    events: mpsc::Sender<Result<StreamEvent, ChatError>>,
    attempts: AtomicU32,
    stream_opened: Arc<AtomicBool>,
}

impl Turn {
    async fn emit(&self, event: StreamEvent) -> Result<(), ChatError> {
        await_or_cancel(self.events.send(Ok(event)), Some(&self.cancel))
            .await?
            .map_err(|_| ChatError::Cancelled)
    }

    async fn emit_error(&self, error: ChatError) {
        let _ = await_or_cancel(self.events.send(Err(error)), Some(&self.cancel)).await;
    }
}

/// Result of opening the model stream.
enum Opened {
    Stream {
        request: GenerateContentRequest,
        stream: ResponseStream,
    },
    Stopped {
        reason: String,
    },
    Blocked {
        reason: String,
        synthetic: Option<GenerateContentResponse>,
    },
}

/// Result of one full attempt.
enum AttemptOutcome {
    Completed {
        model: String,
        parts: Vec<Part>,
        completion: TurnCompletion,
    },
    Stopped {
        reason: String,
    },
    Blocked {
        reason: String,
        synthetic: Option<GenerateContentResponse>,
    },
}

async fn run_turn(turn: Turn, guard: OwnedMutexGuard<()>, outcome: oneshot::Sender<TurnOutcome>) {
    let result = drive_turn(&turn).await;
    let turn_outcome = settle(&turn, result).await;

    drop(guard);
    let _ = outcome.send(turn_outcome);
}

async fn drive_turn(turn: &Turn) -> Result<AttemptOutcome, ChatError> {
    let content_retry = turn.inner.settings.content_retry;
    let stream_opened = Arc::clone(&turn.stream_opened);

    // Quota and verification failures were already negotiated by the inner
    // loop; only rejected streams and dropped connections are replayed here.
    let options = RetryOptions::new(
        content_retry.max_attempts,
        content_retry.initial_delay,
        content_retry.max_delay,
    )
    .with_cancel(turn.cancel.clone())
    .with_classifier(|error| match error.category() {
        category if category.is_transient() => category,
        _ => ErrorCategory::NonRetryable,
    })
    .with_should_retry_on_error(move |error| {
        matches!(error, ChatError::InvalidStream(_))
            || (stream_opened.load(Ordering::Acquire) && error.category().is_transient())
    })
    .with_on_retry(|attempt, error, _| {
        info!(
            attempt,
            error = %error.map(ToString::to_string).unwrap_or_default(),
            "replaying turn"
        );
    });

    retry_with_backoff(move || run_attempt(turn), options).await
}

async fn run_attempt(turn: &Turn) -> Result<AttemptOutcome, ChatError> {
    let attempt = turn.attempts.fetch_add(1, Ordering::AcqRel);
    turn.stream_opened.store(false, Ordering::Release);
    if attempt > 0 {
        turn.emit(StreamEvent::Retry).await?;
    }

    let options = turn.inner.network_retry_options(&turn.cancel);
    let (request, mut stream) = match retry_with_backoff(move || open_stream(turn), options).await? {
        Opened::Stream { request, stream } => (request, stream),
        Opened::Stopped { reason } => return Ok(AttemptOutcome::Stopped { reason }),
        Opened::Blocked { reason, synthetic } => {
            return Ok(AttemptOutcome::Blocked { reason, synthetic })
        }
    };
    turn.stream_opened.store(true, Ordering::Release);

    let mut validator = StreamValidator::new();
    let mut parts = Vec::new();

    while let Some(item) = await_or_cancel(stream.next(), Some(&turn.cancel)).await? {
        let chunk = item.map_err(|error| classify_chat_error(ChatError::Api(error)))?;

        let chunk = match &turn.inner.hooks {
            Some(hooks) => {
                let outcome = hooks.fire_after_model(&request, &chunk).await;
                if outcome.stopped {
                    return Ok(AttemptOutcome::Stopped {
                        reason: outcome.reason.unwrap_or_else(|| HOOK_STOP_REASON.to_string()),
                    });
                }
                if outcome.blocked {
                    return Ok(AttemptOutcome::Blocked {
                        reason: outcome
                            .reason
                            .unwrap_or_else(|| HOOK_BLOCK_REASON.to_string()),
                        synthetic: outcome.response,
                    });
                }
                outcome.response.unwrap_or(chunk)
            }
            None => chunk,
        };

        validator.observe(&chunk);
        if let Some(usage) = &chunk.usage_metadata {
            turn.inner.note_usage(usage);
        }
        for part in chunk.parts() {
            if part.is_thought() {
                turn.inner.note_thought(part);
            }
            parts.push(part.clone());
        }

        turn.emit(StreamEvent::Chunk(chunk)).await?;
    }

    let completion = validator.finish()?;
    Ok(AttemptOutcome::Completed {
        model: request.model,
        parts,
        completion,
    })
}

/// Builds the request for the current model and opens the stream. Runs once
/// per network attempt so a fallback activated in between takes effect.
async fn open_stream(turn: &Turn) -> Result<Opened, ChatError> {
    let inner = &turn.inner;
    let resolved = inner.resolver.resolve(&turn.key);
    let mut config = inner.settings.base_config().merged_with(&resolved.config);

    let (mut contents, tools) = {
        let state = lock_unpoisoned(&inner.state);
        (curate_history(&state.history), state.tools.clone())
    };
    if !tools.is_empty() {
        config.tools = tools;
    }

    let model = resolved.model;
    if inner.settings.is_preview_model(&model) {
        let injected = ensure_active_loop_signatures(&mut contents);
        if injected > 0 {
            debug!(%model, injected, "added placeholder thought signatures");
        }
    }

    if let Some(hooks) = &inner.hooks {
        let input = BeforeModelInput {
            model: model.clone(),
            config: config.clone(),
            contents: contents.clone(),
        };
        let outcome = hooks.fire_before_model(&input).await;
        if outcome.stopped {
            return Ok(Opened::Stopped {
                reason: outcome.reason.unwrap_or_else(|| HOOK_STOP_REASON.to_string()),
            });
        }
        if outcome.blocked {
            return Ok(Opened::Blocked {
                reason: outcome.reason.unwrap_or_else(|| HOOK_BLOCK_REASON.to_string()),
                synthetic: outcome.synthetic_response,
            });
        }
        if let Some(modified) = &outcome.modified_config {
            config = config.merged_with(modified);
        }
        if let Some(modified) = outcome.modified_contents {
            contents = modified;
        }

        let input = BeforeModelInput {
            model: model.clone(),
            config: config.clone(),
            contents: contents.clone(),
        };
        let selection = hooks.fire_before_tool_selection(&input).await;
        if let Some(tools) = selection.tools {
            config.tools = tools;
        }
        if let Some(tool_config) = selection.tool_config {
            config.tool_config = Some(tool_config);
        }
    }

    lock_unpoisoned(&inner.state).last_prompt_tokens = estimate_tokens(&contents);

    let request = GenerateContentRequest {
        model,
        contents,
        config,
    };
    debug!(model = %request.model, prompt_id = %turn.prompt_id, "opening model stream");

    let stream = inner
        .generator
        .generate_content_stream(request.clone(), &turn.prompt_id, turn.cancel.clone())
        .await
        .map_err(ChatError::Api)?;

    Ok(Opened::Stream { request, stream })
}

/// Commits or reports the result and tells the consumer how the turn ended.
async fn settle(turn: &Turn, result: Result<AttemptOutcome, ChatError>) -> TurnOutcome {
    match result {
        Ok(AttemptOutcome::Completed {
            model,
            parts,
            completion,
        }) => {
            let parts = consolidate_parts(parts);
            turn.inner.push_history(Content::model(parts.clone()));
            turn.inner.record("model message", |sink| {
                sink.record_message(MessageRecord {
                    model: model.clone(),
                    kind: MessageKind::Model,
                    content: parts,
                    display_content: None,
                })
            });
            debug!(
                %model,
                prompt_id = %turn.prompt_id,
                has_tool_call = completion.has_tool_call,
                finish_reason = completion.finish_reason.map(|reason| reason.as_str()),
                "turn committed"
            );
            TurnOutcome::Committed
        }
        Ok(AttemptOutcome::Stopped { reason }) => {
            info!(%reason, prompt_id = %turn.prompt_id, "turn stopped by hook");
            let _ = turn
                .emit(StreamEvent::AgentStopped {
                    reason: reason.clone(),
                })
                .await;
            TurnOutcome::Stopped { reason }
        }
        Ok(AttemptOutcome::Blocked { reason, synthetic }) => {
            info!(%reason, prompt_id = %turn.prompt_id, "turn blocked by hook");
            let blocked = turn
                .emit(StreamEvent::AgentBlocked {
                    reason: reason.clone(),
                })
                .await;
            if let (Ok(()), Some(synthetic)) = (blocked, synthetic) {
                let _ = turn.emit(StreamEvent::Chunk(synthetic)).await;
            }
            TurnOutcome::Blocked { reason }
        }
        Err(error) => {
            if error.is_cancelled() {
                debug!(prompt_id = %turn.prompt_id, "turn cancelled");
            } else {
                warn!(
                    prompt_id = %turn.prompt_id,
                    category = error.category().name(),
                    %error,
                    "turn failed"
                );
            }
            turn.emit_error(error.clone()).await;
            TurnOutcome::Failed(error)
        }
    }
}
