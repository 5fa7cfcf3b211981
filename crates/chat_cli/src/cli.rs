use std::path::PathBuf;

use clap::Parser;

use crate::config::{ProviderKind, CONFIG_PATH_ENV_VAR};

#[derive(Debug, Parser)]
#[command(name = "chat")]
#[command(version, about = "Interactive streaming chat with retry and model fallback", long_about = None)]
pub struct Args {
    /// Path to a JSON config file
    #[arg(long, env = CONFIG_PATH_ENV_VAR)]
    pub config: Option<PathBuf>,

    /// Model backend (overrides config and CHAT_CLI_PROVIDER)
    #[arg(long, value_enum)]
    pub provider: Option<ProviderKind>,

    /// Model id or alias for chat turns
    #[arg(long)]
    pub model: Option<String>,

    /// API key for the `api` provider (overrides CHAT_CLI_API_KEY)
    #[arg(long)]
    pub api_key: Option<String>,

    /// Continue the most recent transcript
    #[arg(long, conflicts_with = "no_transcript")]
    pub resume: bool,

    /// Do not write a transcript
    #[arg(long)]
    pub no_transcript: bool,
}
