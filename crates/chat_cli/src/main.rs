use std::io::{self, BufRead};

use anyhow::Context;
use chat_cli::app::App;
use chat_cli::cli::Args;
use chat_cli::runtime::Repl;
use chat_cli::{logging, open_transcript, providers, resolve_config};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init_logging();

    let config = resolve_config(&args, |name| std::env::var(name).ok())?;
    let generator = providers::generator_for(&config)?;

    let cwd = std::env::current_dir().context("failed to resolve the working directory")?;
    let transcript = open_transcript(&args, &config, &cwd)?;

    let app = App::new(
        generator,
        config.settings(),
        config.model(),
        config.fallback_model(),
        transcript.recorder,
        transcript.session_id,
    );
    if !transcript.history.is_empty() {
        info!(turns = transcript.history.len(), "resuming transcript");
        app.session()
            .set_history(transcript.history)
            .context("transcript history is not resumable")?;
    }
    println!(
        "chat ({} provider, model {}). Type /help for commands.",
        config.provider().as_str(),
        app.active_model()
    );

    let (input_tx, input_rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if input_tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("failed to spawn the stdin reader")?;

    let (interrupt_tx, interrupt_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if interrupt_tx.send(()).is_err() {
                break;
            }
        }
    });

    let mut repl = Repl::new(app, input_rx, interrupt_rx, io::stdout());
    repl.run().await?;
    Ok(())
}
