use std::sync::Arc;

use chat_cli::app::App;
use chat_cli::cli::Args;
use chat_cli::config::CliConfig;
use chat_cli::open_transcript;
use chat_core::chat_contract::Content;
use chat_core::{AuthType, ChatSettings};
use clap::Parser;
use model_mock::ScriptedGenerator;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;
use transcript_store::TranscriptError;

fn args(flags: &[&str]) -> Args {
    let argv = std::iter::once("chat").chain(flags.iter().copied());
    Args::try_parse_from(argv).expect("args parse")
}

fn config_in(dir: &tempfile::TempDir) -> CliConfig {
    CliConfig {
        transcript_dir: Some(dir.path().join("transcripts")),
        ..CliConfig::default()
    }
}

#[tokio::test]
async fn resume_restores_recorded_turns() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let config = config_in(&dir);

    let setup = open_transcript(&args(&[]), &config, dir.path()).expect("new transcript");
    assert!(setup.recorder.is_some());
    assert!(setup.history.is_empty());
    let session_id = setup.session_id.clone();

    let mut app = App::new(
        Arc::new(ScriptedGenerator::new()),
        ChatSettings::default().with_auth_type(AuthType::OAuth),
        "gemini-2.5-pro",
        "gemini-2.5-flash",
        setup.recorder,
        setup.session_id,
    );
    let outcome = app
        .send("remember me".to_string(), CancellationToken::new())
        .await
        .finish()
        .await;
    assert!(outcome.is_committed());
    let live_history = app.session().history(false);
    assert_eq!(live_history.first(), Some(&Content::user_text("remember me")));
    drop(app);

    let resumed = open_transcript(&args(&["--resume"]), &config, dir.path()).expect("resume");
    assert_eq!(resumed.session_id, session_id);
    assert_eq!(resumed.history, live_history);
}

#[test]
fn resume_without_transcripts_fails() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    std::fs::create_dir_all(dir.path().join("transcripts")).expect("create dir");

    let error = open_transcript(&args(&["--resume"]), &config_in(&dir), dir.path())
        .err()
        .expect("nothing to resume");
    assert!(matches!(error, TranscriptError::NoTranscriptsFound { .. }));
}

#[test]
fn no_transcript_skips_the_store() {
    let dir = tempfile::tempdir().expect("tempdir should be created");

    let setup = open_transcript(&args(&["--no-transcript"]), &config_in(&dir), dir.path())
        .expect("setup without store");
    assert!(setup.recorder.is_none());
    assert!(!setup.session_id.is_empty());
    assert!(!dir.path().join("transcripts").exists());
}
