use std::sync::Arc;
use std::time::Duration;

use chat_cli::app::App;
use chat_cli::runtime::Repl;
use chat_core::chat_contract::ApiError;
use chat_core::{AuthType, ChatError, ChatSettings, RetrySettings, TurnOutcome};
use model_mock::{ScriptedGenerator, ScriptedTurn};
use tokio::sync::mpsc;

const MODEL: &str = "gemini-2.5-pro";
const FALLBACK_MODEL: &str = "gemini-2.5-flash";

struct Harness {
    repl: Repl<Vec<u8>>,
    input: mpsc::UnboundedSender<String>,
    interrupts: mpsc::UnboundedSender<()>,
}

impl Harness {
    fn new(generator: Arc<ScriptedGenerator>) -> Self {
        let settings = ChatSettings::default()
            .with_retry(RetrySettings::new(
                3,
                Duration::from_millis(5),
                Duration::from_millis(20),
            ))
            .with_content_retry(RetrySettings::new(
                2,
                Duration::from_millis(5),
                Duration::from_millis(5),
            ))
            .with_auth_type(AuthType::OAuth);
        let app = App::new(generator, settings, MODEL, FALLBACK_MODEL, None, "session-1");

        let (input, input_rx) = mpsc::unbounded_channel();
        let (interrupts, interrupt_rx) = mpsc::unbounded_channel();
        Self {
            repl: Repl::new(app, input_rx, interrupt_rx, Vec::new()),
            input,
            interrupts,
        }
    }

    fn output(&self) -> String {
        String::from_utf8_lossy(self.repl.output()).into_owned()
    }
}

#[tokio::test]
async fn turn_output_streams_to_the_writer() {
    let generator = Arc::new(ScriptedGenerator::new());
    let mut harness = Harness::new(generator.clone());

    let outcome = harness
        .repl
        .submit("hello there".to_string())
        .await
        .expect("write to buffer");

    assert!(outcome.is_committed());
    assert!(harness
        .output()
        .contains("[gemini-2.5-pro] You said: hello there"));
    let request = generator.last_request().expect("one request");
    assert_eq!(request.contents.len(), 1);
    assert_eq!(harness.repl.app().session().history(true).len(), 2);
}

#[tokio::test]
async fn quota_prompt_is_answered_from_input() {
    let generator = Arc::new(ScriptedGenerator::new().with_turn(ScriptedTurn::OpenError(
        ApiError::http(429, "daily quota").with_retry_after(Duration::from_secs(3600)),
    )));
    let mut harness = Harness::new(generator.clone());

    let mut negotiations = harness.repl.app().broker().subscribe();
    let input = harness.input.clone();
    tokio::spawn(async move {
        while negotiations.changed().await.is_ok() {
            if negotiations.borrow_and_update().is_some() {
                let _ = input.send("a".to_string());
                break;
            }
        }
    });

    let outcome = harness
        .repl
        .submit("hi".to_string())
        .await
        .expect("write to buffer");

    assert!(outcome.is_committed());
    let output = harness.output();
    assert!(output.contains("Quota exhausted for gemini-2.5-pro"));
    assert!(output.contains("Switch to gemini-2.5-flash?"));
    assert!(output.contains("[gemini-2.5-flash] You said: hi"));
    assert_eq!(harness.repl.app().active_model(), FALLBACK_MODEL);
    let models: Vec<String> = generator
        .requests()
        .into_iter()
        .map(|request| request.model)
        .collect();
    assert_eq!(models, vec![MODEL.to_string(), FALLBACK_MODEL.to_string()]);
}

#[tokio::test]
async fn interrupt_cancels_the_running_turn() {
    let generator = Arc::new(ScriptedGenerator::new().with_turn(ScriptedTurn::Hang));
    let mut harness = Harness::new(generator);

    let interrupts = harness.interrupts.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = interrupts.send(());
    });

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        harness.repl.submit("wait".to_string()),
    )
    .await
    .expect("cancellation should end the turn")
    .expect("write to buffer");

    assert!(matches!(outcome, TurnOutcome::Failed(ChatError::Cancelled)));
    assert!(harness.output().contains("[cancelled]"));
    assert_eq!(harness.repl.app().session().history(false).len(), 1);
}

#[tokio::test]
async fn commands_run_until_quit() {
    let generator = Arc::new(ScriptedGenerator::new());
    let mut harness = Harness::new(generator.clone());

    for line in [
        "/model",
        "/model gemini-2.5-flash",
        "/history",
        "/bogus",
        "/quit",
        "never read",
    ] {
        harness.input.send(line.to_string()).expect("queue input");
    }

    harness.repl.run().await.expect("write to buffer");

    let output = harness.output();
    assert!(output.contains("Model: gemini-2.5-pro"));
    assert!(output.contains("Model: gemini-2.5-flash"));
    assert!(output.contains("(no history)"));
    assert!(output.contains("Unknown command /bogus"));
    assert_eq!(generator.call_count(), 0);
    assert_eq!(harness.repl.app().active_model(), FALLBACK_MODEL);
}

#[tokio::test]
async fn end_of_input_ends_the_loop() {
    let generator = Arc::new(ScriptedGenerator::new());
    let Harness {
        mut repl, input, ..
    } = Harness::new(generator);
    drop(input);

    tokio::time::timeout(Duration::from_secs(5), repl.run())
        .await
        .expect("closed input should end the loop")
        .expect("write to buffer");
}
