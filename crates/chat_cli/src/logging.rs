//! Logging init: stderr, filtered by `CHAT_LOG`.

use tracing_subscriber::EnvFilter;

pub const LOG_ENV_VAR: &str = "CHAT_LOG";
const DEFAULT_FILTER: &str = "warn";

/// Installs the global subscriber. Log lines go to stderr so they never mix
/// with streamed model output on stdout.
pub fn init_logging() {
    let env_filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}
