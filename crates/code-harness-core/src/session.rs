//! Multi-turn conversation state for `chx chat`.
//!
//! History only rewrites the question sent to generation; retrieval still
//! runs on the current question alone.

use std::collections::VecDeque;

const CONTEXT_ENTRIES: usize = 4;
const ENTRY_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    fn label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

/// Bounded question/answer history. Holds at most `2 × max_turns`
/// entries; the oldest are dropped first.
#[derive(Debug, Clone)]
pub struct ConversationSession {
    history: VecDeque<Turn>,
    max_turns: usize,
}

impl ConversationSession {
    pub fn new(max_turns: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(max_turns * 2),
            max_turns,
        }
    }

    /// Record one exchange.
    pub fn record(&mut self, question: &str, answer: &str) {
        self.push(Role::User, question);
        self.push(Role::Assistant, answer);
    }

    fn push(&mut self, role: Role, text: &str) {
        let cap = self.max_turns * 2;
        if cap == 0 {
            return;
        }
        while self.history.len() >= cap {
            self.history.pop_front();
        }
        self.history.push_back(Turn {
            role,
            text: text.to_string(),
        });
    }

    /// Prefix `question` with the most recent history entries.
    pub fn enhance_question(&self, question: &str) -> String {
        if self.history.is_empty() {
            return question.to_string();
        }
        let skip = self.history.len().saturating_sub(CONTEXT_ENTRIES);
        let lines: Vec<String> = self
            .history
            .iter()
            .skip(skip)
            .map(|t| format!("{}: {}", t.role.label(), preview(&t.text)))
            .collect();
        format!(
            "Previous conversation:\n{}\n\nCurrent question: {}",
            lines.join("\n"),
            question
        )
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.history.iter()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}

impl Default for ConversationSession {
    fn default() -> Self {
        Self::new(10)
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() <= ENTRY_PREVIEW_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(ENTRY_PREVIEW_CHARS).collect();
    format!("{}...", cut)
}
