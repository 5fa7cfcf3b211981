//! Line REPL front end for `chat_core`.
//!
//! ## Provider bootstrap
//!
//! - `--provider mock` (default) streams a local echo; no credentials needed
//! - `--provider api` talks to the streaming generate-content endpoint
//!
//! `CHAT_CLI_PROVIDER` selects the provider when no flag is given, and
//! `CHAT_CLI_API_KEY` supplies the key for `api`.
//!
//! ## Config file
//!
//! `--config <path>` or `CHAT_CLI_CONFIG_PATH` points at a UTF-8 JSON file:
//!
//! ```json
//! {
//!   "provider": "api",
//!   "model": "gemini-2.5-pro",
//!   "fallback_model": "gemini-2.5-flash",
//!   "timeout_sec": 30,
//!   "retry": { "max_attempts": 5, "initial_delay_ms": 2000 }
//! }
//! ```
//!
//! Contract notes:
//! - every field is optional; unknown fields are rejected
//! - `timeout_sec` and `retry.max_attempts` must be > 0 when provided
//! - precedence is flags, then environment, then file
//!
//! Logging goes to stderr and is filtered by `CHAT_LOG` (default `warn`).

pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod logging;
pub mod providers;
pub mod runtime;

use std::path::Path;
use std::sync::Arc;

use chat_core::chat_contract::{Content, RecordingSink};
use transcript_store::{latest_transcript, transcript_root, TranscriptRecorder, TranscriptStore};

use crate::cli::Args;
use crate::config::{CliConfig, ConfigError};

/// Merges the config file, environment and flags, in rising precedence.
pub fn resolve_config(
    args: &Args,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<CliConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => CliConfig::load(path)?,
        None => CliConfig::default(),
    };
    config.apply_env(lookup)?;

    if let Some(provider) = args.provider {
        config.provider = Some(provider);
    }
    if let Some(model) = &args.model {
        config.model = Some(model.clone());
    }
    if let Some(api_key) = &args.api_key {
        config.api_key = Some(api_key.clone());
    }

    config.validate()?;
    Ok(config)
}

/// Transcript wiring for one run: the sink to record into, history to
/// restore, and the session id used for prompt ids.
pub struct TranscriptSetup {
    pub recorder: Option<Arc<dyn RecordingSink>>,
    pub history: Vec<Content>,
    pub session_id: String,
}

pub fn open_transcript(
    args: &Args,
    config: &CliConfig,
    cwd: &Path,
) -> Result<TranscriptSetup, transcript_store::TranscriptError> {
    if args.no_transcript {
        return Ok(TranscriptSetup {
            recorder: None,
            history: Vec::new(),
            session_id: uuid::Uuid::new_v4().to_string(),
        });
    }

    let root = config
        .transcript_dir
        .clone()
        .unwrap_or_else(|| transcript_root(cwd));
    let store = if args.resume {
        TranscriptStore::open(&latest_transcript(&root)?)?
    } else {
        TranscriptStore::create_new(&root)?
    };

    let history = if args.resume {
        store.replay_history()
    } else {
        Vec::new()
    };
    let session_id = store.header().session_id.clone();

    Ok(TranscriptSetup {
        recorder: Some(Arc::new(TranscriptRecorder::new(store))),
        history,
        session_id,
    })
}
