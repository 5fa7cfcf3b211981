use std::io::{self, Write};
use std::sync::Arc;

use chat_core::chat_contract::{
    Content, ContentGenerator, ModelConfigKey, ModelResolver, Part, RecordingSink, Role,
};
use chat_core::{
    ChatError, ChatSession, ChatSettings, FallbackIntent, ModelConfigService, ModelFallback,
    NegotiationBroker, PendingNegotiation, StreamEvent, TurnOutcome, TurnStream,
    ValidationIntent,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::commands::{SlashCommand, HELP_TEXT};

const HISTORY_PREVIEW_CHARS: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Everything the REPL needs to run turns against one conversation.
pub struct App {
    session: ChatSession,
    resolver: Arc<ModelConfigService>,
    broker: Arc<NegotiationBroker>,
    chat_key: ModelConfigKey,
    session_id: String,
    prompt_count: u64,
}

impl App {
    /// Wires a session with model fallback and verification prompts routed
    /// through a shared [`NegotiationBroker`].
    pub fn new(
        generator: Arc<dyn ContentGenerator>,
        settings: ChatSettings,
        model: &str,
        fallback_model: &str,
        recorder: Option<Arc<dyn RecordingSink>>,
        session_id: impl Into<String>,
    ) -> Self {
        let resolver = Arc::new(ModelConfigService::new());
        let broker = Arc::new(NegotiationBroker::new());
        let chat_key = ModelConfigKey::chat(model);
        let fallback = ModelFallback::new(
            resolver.clone(),
            broker.clone(),
            chat_key.clone(),
            fallback_model,
        );

        let mut builder = ChatSession::builder(generator, resolver.clone())
            .with_settings(settings)
            .with_quota_fallback(Arc::new(fallback))
            .with_validation_negotiator(broker.clone());
        if let Some(recorder) = recorder {
            builder = builder.with_recorder(recorder);
        }

        Self {
            session: builder.build(),
            resolver,
            broker,
            chat_key,
            session_id: session_id.into(),
            prompt_count: 0,
        }
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    pub fn broker(&self) -> &NegotiationBroker {
        &self.broker
    }

    pub fn active_model(&self) -> String {
        self.resolver.resolve(&self.chat_key).model
    }

    /// Starts a user turn. Prompt ids are unique per process run.
    pub async fn send(&mut self, text: String, cancel: CancellationToken) -> TurnStream {
        self.prompt_count += 1;
        let prompt_id = format!("{}#{}", self.session_id, self.prompt_count);
        self.session
            .send_message_stream(
                self.chat_key.clone(),
                vec![Part::text(text.clone())],
                prompt_id,
                cancel,
                Some(text),
            )
            .await
    }

    pub fn handle_command(&self, command: SlashCommand, out: &mut impl Write) -> io::Result<Flow> {
        match command {
            SlashCommand::Help => writeln!(out, "{HELP_TEXT}")?,
            SlashCommand::Clear => {
                self.session.clear_history();
                writeln!(out, "Conversation cleared.")?;
            }
            SlashCommand::History => {
                let history = self.session.history(true);
                if history.is_empty() {
                    writeln!(out, "(no history)")?;
                }
                for content in &history {
                    writeln!(out, "{}", summarize_content(content))?;
                }
            }
            SlashCommand::Model(None) => writeln!(out, "Model: {}", self.active_model())?,
            SlashCommand::Model(Some(model)) => {
                self.resolver.set_active_model(&model);
                // Signatures from the previous model do not verify on another.
                self.session.strip_thoughts_from_history();
                info!(%model, "model switched by user");
                writeln!(out, "Model: {model}")?;
            }
            SlashCommand::Quit => return Ok(Flow::Quit),
            SlashCommand::Unknown(name) => {
                writeln!(out, "Unknown command {name}. Type /help for commands.")?;
            }
        }
        Ok(Flow::Continue)
    }

    /// Applies a typed answer to the pending negotiation. Returns false when
    /// the line does not answer it.
    pub fn answer_negotiation(&self, pending: &PendingNegotiation, line: &str) -> bool {
        match pending {
            PendingNegotiation::Fallback(_) => parse_fallback_answer(line)
                .is_some_and(|intent| self.broker.resolve_fallback(intent)),
            PendingNegotiation::Validation(_) => parse_validation_answer(line)
                .is_some_and(|intent| self.broker.resolve_validation(intent)),
        }
    }
}

pub fn negotiation_prompt(pending: &PendingNegotiation) -> String {
    match pending {
        PendingNegotiation::Fallback(request) => {
            let headline = if request.terminal {
                "Quota exhausted"
            } else {
                "Model unavailable"
            };
            format!(
                "{headline} for {}: {}\nSwitch to {}? [a]lways / [o]nce more on {} / [s]top / [l]ater / [u]pgrade",
                request.failed_model,
                request.message,
                request.fallback_model,
                request.failed_model,
            )
        }
        PendingNegotiation::Validation(request) => {
            let mut prompt = format!("Account verification required: {}", request.message);
            if let Some(description) = &request.description {
                prompt.push_str(&format!("\n{description}"));
            }
            if let Some(link) = &request.link {
                prompt.push_str(&format!("\nVerify at: {link}"));
            }
            if let Some(url) = &request.learn_more_url {
                prompt.push_str(&format!("\nLearn more: {url}"));
            }
            prompt.push_str("\n[v]erified / [c]hange auth / [x] cancel");
            prompt
        }
    }
}

pub fn parse_fallback_answer(line: &str) -> Option<FallbackIntent> {
    match line.trim().to_ascii_lowercase().as_str() {
        "a" | "always" | "y" | "yes" => Some(FallbackIntent::RetryAlways),
        "o" | "once" => Some(FallbackIntent::RetryOnce),
        "s" | "stop" | "n" | "no" => Some(FallbackIntent::Stop),
        "l" | "later" => Some(FallbackIntent::RetryLater),
        "u" | "upgrade" => Some(FallbackIntent::Upgrade),
        _ => None,
    }
}

pub fn parse_validation_answer(line: &str) -> Option<ValidationIntent> {
    match line.trim().to_ascii_lowercase().as_str() {
        "v" | "verified" | "done" => Some(ValidationIntent::Verify),
        "c" | "change" | "change auth" => Some(ValidationIntent::ChangeAuth),
        "x" | "cancel" | "n" | "no" => Some(ValidationIntent::Cancel),
        _ => None,
    }
}

/// Writes one turn event. Partial output before a `Retry` stays on screen;
/// the marker tells the reader it is void.
pub fn render_event(
    event: &Result<StreamEvent, ChatError>,
    out: &mut impl Write,
) -> io::Result<()> {
    match event {
        Ok(StreamEvent::Chunk(chunk)) => {
            write!(out, "{}", chunk.text())?;
            for call in chunk.parts().iter().filter_map(|part| part.function_call.as_ref()) {
                write!(out, "\n[tool call] {}({})", call.name, call.args)?;
            }
        }
        Ok(StreamEvent::Retry) => writeln!(out, "\n[stream interrupted, retrying]")?,
        Ok(StreamEvent::AgentStopped { reason }) => writeln!(out, "\n[stopped] {reason}")?,
        Ok(StreamEvent::AgentBlocked { reason }) => writeln!(out, "\n[blocked] {reason}")?,
        Err(error) if error.is_user_handled() => {}
        Err(error) => writeln!(out, "\n[error] {error}")?,
    }
    out.flush()
}

pub fn render_outcome(outcome: &TurnOutcome, out: &mut impl Write) -> io::Result<()> {
    match outcome {
        TurnOutcome::Committed => writeln!(out)?,
        TurnOutcome::Failed(ChatError::Cancelled) => writeln!(out, "\n[cancelled]")?,
        TurnOutcome::Stopped { .. } | TurnOutcome::Blocked { .. } | TurnOutcome::Failed(_) => {}
    }
    out.flush()
}

fn summarize_content(content: &Content) -> String {
    let role = match content.role {
        Role::User => "user",
        Role::Model => "model",
    };
    let summary = content
        .parts
        .iter()
        .filter_map(summarize_part)
        .collect::<Vec<_>>()
        .join(" ");
    format!("{role}: {summary}")
}

fn summarize_part(part: &Part) -> Option<String> {
    if let Some(call) = &part.function_call {
        return Some(format!("[tool call {}]", call.name));
    }
    if let Some(response) = &part.function_response {
        return Some(format!("[tool response {}]", response.name));
    }
    if part.is_thought() {
        return None;
    }
    let text = part.text.as_deref()?.trim();
    let mut preview: String = text.chars().take(HISTORY_PREVIEW_CHARS).collect();
    if text.chars().count() > HISTORY_PREVIEW_CHARS {
        preview.push_str("...");
    }
    Some(preview)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::{FallbackRequest, ValidationRequest};

    #[test]
    fn fallback_answers_accept_short_and_long_forms() {
        assert_eq!(parse_fallback_answer(" A "), Some(FallbackIntent::RetryAlways));
        assert_eq!(parse_fallback_answer("once"), Some(FallbackIntent::RetryOnce));
        assert_eq!(parse_fallback_answer("later"), Some(FallbackIntent::RetryLater));
        assert_eq!(parse_fallback_answer("maybe"), None);
    }

    #[test]
    fn validation_answers_map_to_intents() {
        assert_eq!(parse_validation_answer("v"), Some(ValidationIntent::Verify));
        assert_eq!(parse_validation_answer("change"), Some(ValidationIntent::ChangeAuth));
        assert_eq!(parse_validation_answer("x"), Some(ValidationIntent::Cancel));
    }

    #[test]
    fn prompts_name_models_and_links() {
        let fallback = negotiation_prompt(&PendingNegotiation::Fallback(FallbackRequest {
            failed_model: "gemini-2.5-pro".to_string(),
            fallback_model: "gemini-2.5-flash".to_string(),
            message: "daily quota".to_string(),
            terminal: true,
        }));
        assert!(fallback.starts_with("Quota exhausted for gemini-2.5-pro: daily quota"));
        assert!(fallback.contains("Switch to gemini-2.5-flash?"));

        let validation = negotiation_prompt(&PendingNegotiation::Validation(ValidationRequest {
            message: "verify your account".to_string(),
            link: Some("https://accounts.example.com/verify".to_string()),
            description: None,
            learn_more_url: None,
        }));
        assert!(validation.contains("Verify at: https://accounts.example.com/verify"));
        assert!(!validation.contains("Learn more"));
    }

    #[tokio::test]
    async fn switching_model_strips_thought_signatures() {
        let app = App::new(
            Arc::new(model_mock::ScriptedGenerator::new()),
            ChatSettings::default(),
            "gemini-2.5-pro",
            "gemini-2.5-flash",
            None,
            "session-1",
        );
        app.session()
            .set_history(vec![
                Content::user_text("hi"),
                Content::model(vec![Part::text("hello").with_thought_signature("sig-1")]),
            ])
            .expect("history is well formed");

        let mut out = Vec::new();
        let flow = app
            .handle_command(SlashCommand::Model(Some("gemini-2.5-flash".to_string())), &mut out)
            .expect("write to buffer");

        assert_eq!(flow, Flow::Continue);
        assert_eq!(app.active_model(), "gemini-2.5-flash");
        assert_eq!(app.session().history(false)[1].parts[0].thought_signature, None);
    }

    #[test]
    fn history_summary_truncates_long_text() {
        let long = "x".repeat(HISTORY_PREVIEW_CHARS + 10);
        let summary = summarize_content(&Content::user_text(long));
        assert!(summary.starts_with("user: xxx"));
        assert!(summary.ends_with("..."));
    }
}
