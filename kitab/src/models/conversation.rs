use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Source;

/// One completed question/answer exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
    pub sources: Vec<Source>,
    pub asked_at: DateTime<Utc>,
}

/// Prior exchange as passed to the query subprocess via `--history`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub question: String,
    pub answer: String,
}

/// Append-only conversation log, ordered by submission time.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    turns: Vec<ConversationTurn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    /// Sources of the most recent turn, empty when there is none.
    pub fn last_sources(&self) -> &[Source] {
        self.turns
            .last()
            .map(|turn| turn.sources.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// The last `limit` turns as question/answer pairs, oldest first.
    pub fn recent_history(&self, limit: usize) -> Vec<HistoryTurn> {
        let start = self.turns.len().saturating_sub(limit);
        self.turns[start..]
            .iter()
            .map(|turn| HistoryTurn {
                question: turn.question.clone(),
                answer: turn.answer.clone(),
            })
            .collect()
    }
}
