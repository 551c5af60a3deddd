//! Full-screen terminal client.
//!
//! Each question runs a query subprocess (by default this binary's own
//! `query` subcommand) whose output is decoded incrementally; see
//! [`protocol`] for the two supported stdout formats.

mod app;
mod process;
pub mod protocol;
mod ui;

use std::time::Duration;

use crossterm::event::{Event, EventStream, KeyEventKind};
use futures::StreamExt;
use ratatui::DefaultTerminal;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::query::Protocol;

pub use app::{Action, App, Mode, PendingTurn, Phase};
pub use process::{QueryCommand, QueryUpdate};
pub use protocol::{classify_exit, EventDecoder, OutputParser, SentinelParser};

const TICK: Duration = Duration::from_millis(80);

#[derive(Debug, Clone)]
pub struct TuiOptions {
    pub command: QueryCommand,
    pub protocol: Protocol,
    pub history_turns: usize,
}

/// Run the terminal client until the user quits.
pub async fn run(options: TuiOptions) -> Result<()> {
    let mut terminal = ratatui::init();
    let result = event_loop(&mut terminal, options).await;
    ratatui::restore();
    result
}

async fn event_loop(terminal: &mut DefaultTerminal, options: TuiOptions) -> Result<()> {
    let mut app = App::new(options.protocol, options.history_turns);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut events = EventStream::new();
    let mut ticker = tokio::time::interval(TICK);

    loop {
        terminal.draw(|frame| ui::render(frame, &app))?;

        tokio::select! {
            maybe_event = events.next() => match maybe_event {
                Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                    match app.handle_key(key) {
                        Action::Quit => break,
                        Action::Spawn { question, history } => {
                            if let Err(e) = options.command.spawn(&question, &history, tx.clone()) {
                                tracing::error!(error = %e, "Failed to start query");
                                app.spawn_failed(e.to_string());
                            }
                        }
                        Action::None => {}
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => break,
            },
            Some(update) = rx.recv() => app.apply_update(update),
            _ = ticker.tick() => app.tick(),
        }
    }

    Ok(())
}
