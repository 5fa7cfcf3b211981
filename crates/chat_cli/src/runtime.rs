use std::io::{self, Write};

use chat_core::TurnOutcome;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::app::{negotiation_prompt, render_event, render_outcome, App, Flow};
use crate::commands::parse_slash_command;

const PROMPT: &str = "> ";

/// Line-oriented driver. Input lines and interrupts arrive on channels so
/// the terminal threads stay outside the async runtime.
pub struct Repl<W> {
    app: App,
    input: mpsc::UnboundedReceiver<String>,
    interrupts: mpsc::UnboundedReceiver<()>,
    out: W,
}

impl<W: Write> Repl<W> {
    pub fn new(
        app: App,
        input: mpsc::UnboundedReceiver<String>,
        interrupts: mpsc::UnboundedReceiver<()>,
        out: W,
    ) -> Self {
        Self {
            app,
            input,
            interrupts,
            out,
        }
    }

    pub fn app(&self) -> &App {
        &self.app
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    /// Reads lines until `/quit`, end of input, or an interrupt at the
    /// prompt.
    pub async fn run(&mut self) -> io::Result<()> {
        loop {
            write!(self.out, "{PROMPT}")?;
            self.out.flush()?;

            let line = tokio::select! {
                line = self.input.recv() => line,
                Some(()) = self.interrupts.recv() => None,
            };
            let Some(line) = line else {
                writeln!(self.out)?;
                return Ok(());
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(command) = parse_slash_command(line) {
                if self.app.handle_command(command, &mut self.out)? == Flow::Quit {
                    return Ok(());
                }
                continue;
            }

            self.submit(line.to_string()).await?;
        }
    }

    /// Runs one turn to completion, answering negotiation prompts from the
    /// input channel while it streams.
    pub async fn submit(&mut self, text: String) -> io::Result<TurnOutcome> {
        while self.interrupts.try_recv().is_ok() {}

        let cancel = CancellationToken::new();
        let mut negotiations = self.app.broker().subscribe();
        let mut stream = self.app.send(text, cancel.clone()).await;

        loop {
            // Prompts are shown before input is read so an answer never
            // lands ahead of its question.
            tokio::select! {
                biased;
                Some(()) = self.interrupts.recv() => cancel.cancel(),
                Ok(()) = negotiations.changed() => {
                    let pending = negotiations.borrow_and_update().clone();
                    if let Some(pending) = pending {
                        writeln!(self.out, "\n{}", negotiation_prompt(&pending))?;
                        self.out.flush()?;
                    }
                }
                Some(line) = self.input.recv() => {
                    match self.app.broker().pending() {
                        Some(pending) if self.app.answer_negotiation(&pending, &line) => {}
                        Some(_) => writeln!(self.out, "Please answer the prompt above.")?,
                        None => {
                            debug!("input ignored while a turn is running");
                            writeln!(self.out, "(turn in progress, Ctrl-C to cancel)")?;
                        }
                    }
                }
                event = stream.next() => match event {
                    Some(event) => render_event(&event, &mut self.out)?,
                    None => break,
                },
            }
        }

        let outcome = stream.finish().await;
        render_outcome(&outcome, &mut self.out)?;
        Ok(outcome)
    }
}
