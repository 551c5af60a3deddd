use chrono::{DateTime, Utc};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tui_input::{Input, InputRequest};

use crate::models::{Conversation, ConversationTurn, HistoryTurn, Source, StreamEvent, ToolPhase};
use crate::query::Protocol;

use super::process::QueryUpdate;
use super::protocol::{classify_exit, OutputParser};

/// Sources reachable through number keys and `/source N`.
const MAX_JUMP: usize = 5;

/// What the event loop should do after a key press.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    None,
    Quit,
    Spawn {
        question: String,
        history: Vec<HistoryTurn>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Searching,
    Streaming,
}

/// The question currently being answered by a subprocess.
#[derive(Debug)]
pub struct PendingTurn {
    pub question: String,
    pub asked_at: DateTime<Utc>,
    pub phase: Phase,
    pub status: String,
    pub parser: OutputParser,
    pub stderr: String,
}

impl PendingTurn {
    fn new(question: String, protocol: Protocol) -> Self {
        Self {
            question,
            asked_at: Utc::now(),
            phase: Phase::Searching,
            status: "Searching knowledge base...".to_string(),
            parser: OutputParser::new(protocol),
            stderr: String::new(),
        }
    }

    fn apply_event(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::ToolStatus { data } => match data.status {
                ToolPhase::Searching => {
                    self.phase = Phase::Searching;
                    self.status = match data.query.as_deref() {
                        Some(query) => format!("Searching: {query}"),
                        None => "Searching knowledge base...".to_string(),
                    };
                }
                ToolPhase::Complete => {
                    self.phase = Phase::Streaming;
                    self.status = "Generating answer...".to_string();
                }
            },
            StreamEvent::TextDelta { .. } => self.phase = Phase::Streaming,
            _ => {}
        }
    }

    fn apply_stderr(&mut self, line: &str) {
        self.stderr.push_str(line);
        self.stderr.push('\n');

        if let Some(at) = line.find("Searching") {
            self.phase = Phase::Searching;
            self.status = match line[at..].split_once(':') {
                Some((_, query)) if !query.trim().is_empty() => {
                    format!("Searching: {}", query.trim())
                }
                _ => "Searching knowledge base...".to_string(),
            };
        } else if line.contains("Generating") {
            self.phase = Phase::Streaming;
            self.status = "Generating answer...".to_string();
        }
    }
}

#[derive(Debug)]
pub enum Mode {
    Input,
    Running(PendingTurn),
}

pub struct App {
    pub mode: Mode,
    pub conversation: Conversation,
    /// Selected source in the overlay, over the last turn's sources.
    pub viewer: Option<usize>,
    pub error: Option<String>,
    pub input: Input,
    pub spinner: usize,
    protocol: Protocol,
    history_turns: usize,
}

impl App {
    pub fn new(protocol: Protocol, history_turns: usize) -> Self {
        Self {
            mode: Mode::Input,
            conversation: Conversation::new(),
            viewer: None,
            error: None,
            input: Input::default(),
            spinner: 0,
            protocol,
            history_turns,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.mode, Mode::Running(_))
    }

    pub fn pending(&self) -> Option<&PendingTurn> {
        match &self.mode {
            Mode::Running(turn) => Some(turn),
            Mode::Input => None,
        }
    }

    pub fn sources(&self) -> &[Source] {
        self.conversation.last_sources()
    }

    pub fn tick(&mut self) {
        if self.is_running() {
            self.spinner = self.spinner.wrapping_add(1);
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Action {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return Action::Quit;
        }

        if let Some(selected) = self.viewer {
            let count = self.sources().len().max(1);
            match key.code {
                KeyCode::Esc | KeyCode::Char('q') => self.viewer = None,
                KeyCode::Down | KeyCode::Char('j') => self.viewer = Some((selected + 1) % count),
                KeyCode::Up | KeyCode::Char('k') => {
                    self.viewer = Some((selected + count - 1) % count)
                }
                KeyCode::Char(c) if c == 's' || c.is_ascii_digit() => {
                    self.shortcut(c);
                }
                _ => {}
            }
            return Action::None;
        }

        if let KeyCode::Char(c) = key.code {
            if self.shortcuts_enabled() && self.shortcut(c) {
                return Action::None;
            }
        }

        if key.code == KeyCode::Enter {
            return self.submit();
        }

        if let Some(request) = input_request(key) {
            self.input.handle(request);
        }
        Action::None
    }

    /// Handle the current input line: a slash command or a new question.
    pub fn submit(&mut self) -> Action {
        let line = self.input.value().trim().to_string();
        if line.is_empty() {
            return Action::None;
        }

        if let Some(handled) = self.slash_command(&line.to_lowercase()) {
            if handled {
                self.input.reset();
            }
            return Action::None;
        }

        if self.is_running() {
            return Action::None;
        }

        self.input.reset();
        self.viewer = None;
        self.error = None;
        self.spinner = 0;
        self.mode = Mode::Running(PendingTurn::new(line.clone(), self.protocol));

        Action::Spawn {
            question: line,
            history: self.conversation.recent_history(self.history_turns),
        }
    }

    pub fn apply_update(&mut self, update: QueryUpdate) {
        let Mode::Running(turn) = &mut self.mode else {
            tracing::debug!(?update, "Ignoring output with no query running");
            return;
        };

        match update {
            QueryUpdate::Stdout(chunk) => {
                for event in turn.parser.push(&chunk) {
                    turn.apply_event(&event);
                }
                if !turn.parser.answer().is_empty() {
                    turn.phase = Phase::Streaming;
                }
            }
            QueryUpdate::Stderr(line) => turn.apply_stderr(&line),
            QueryUpdate::Exited(code) => self.finish(code),
        }
    }

    /// The query process could not be started.
    pub fn spawn_failed(&mut self, message: impl Into<String>) {
        self.mode = Mode::Input;
        self.error = Some(message.into());
    }

    fn finish(&mut self, code: Option<i32>) {
        let Mode::Running(mut turn) = std::mem::replace(&mut self.mode, Mode::Input) else {
            return;
        };
        for event in turn.parser.finish() {
            turn.apply_event(&event);
        }

        if let Some(message) = classify_exit(&turn.parser, code, &turn.stderr) {
            tracing::warn!(?code, error = %message, "Query failed");
            self.error = Some(message);
            return;
        }

        let answer = turn.parser.answer();
        if answer.is_empty() {
            tracing::warn!("Query finished without an answer");
            return;
        }

        self.conversation.push(ConversationTurn {
            question: turn.question,
            answer: answer.to_string(),
            sources: turn.parser.sources().to_vec(),
            asked_at: turn.asked_at,
        });
    }

    fn shortcuts_enabled(&self) -> bool {
        !self.is_running() && !self.conversation.is_empty() && self.input.value().is_empty()
    }

    /// Number keys jump to a source, `s` toggles the overlay.
    fn shortcut(&mut self, c: char) -> bool {
        if c == 's' {
            if self.sources().is_empty() {
                return false;
            }
            self.viewer = match self.viewer {
                Some(_) => None,
                None => Some(0),
            };
            return true;
        }

        match c.to_digit(10).map(|n| n as usize) {
            Some(n) => self.open_source(n),
            None => false,
        }
    }

    /// `/sources`, `/s`, `/source N` and `/s N`. `None` means `command` is
    /// not one of these and should be asked as a question.
    fn slash_command(&mut self, command: &str) -> Option<bool> {
        let mut parts = command.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("/sources" | "/s"), None) => {
                if self.sources().is_empty() {
                    return Some(false);
                }
                self.viewer = Some(0);
                Some(true)
            }
            (Some("/source" | "/s"), Some(n)) => Some(match n.parse::<usize>() {
                Ok(n) => self.open_source(n),
                Err(_) => false,
            }),
            _ => None,
        }
    }

    /// Open the overlay at 1-based source `n`.
    fn open_source(&mut self, n: usize) -> bool {
        if (1..=MAX_JUMP).contains(&n) && self.sources().len() >= n {
            self.viewer = Some(n - 1);
            true
        } else {
            false
        }
    }
}

fn input_request(key: KeyEvent) -> Option<InputRequest> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Char('u') if ctrl => Some(InputRequest::DeleteLine),
        KeyCode::Char('w') if ctrl => Some(InputRequest::DeletePrevWord),
        KeyCode::Char(c) if !ctrl => Some(InputRequest::InsertChar(c)),
        KeyCode::Backspace => Some(InputRequest::DeletePrevChar),
        KeyCode::Delete => Some(InputRequest::DeleteNextChar),
        KeyCode::Left => Some(InputRequest::GoToPrevChar),
        KeyCode::Right => Some(InputRequest::GoToNextChar),
        KeyCode::Home => Some(InputRequest::GoToStart),
        KeyCode::End => Some(InputRequest::GoToEnd),
        _ => None,
    }
}
