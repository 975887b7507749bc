//! The running transcript of the show.

use std::collections::VecDeque;

use crate::provider::TokenCounter;

/// Speaker label used for every host line.
pub const HOST_LABEL: &str = "Host";

/// One rendered unit of output: a message and who said it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebateTurn {
    pub message: String,
    pub speaker_label: String,
}

impl DebateTurn {
    pub fn new(message: impl Into<String>, speaker_label: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            speaker_label: speaker_label.into(),
        }
    }

    pub fn host(message: impl Into<String>) -> Self {
        Self::new(message, HOST_LABEL)
    }

    pub fn is_host(&self) -> bool {
        self.speaker_label == HOST_LABEL
    }
}

/// What an entry is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Part of the discussion; included in prompt context.
    Spoken,
    /// A host line introducing a guest. Shown to the audience only.
    Introduction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationEntry {
    pub message: String,
    pub speaker_label: String,
    /// Computed once when the entry is added.
    pub token_count: usize,
    pub kind: EntryKind,
}

impl ConversationEntry {
    pub fn turn(&self) -> DebateTurn {
        DebateTurn::new(self.message.clone(), self.speaker_label.clone())
    }
}

/// Transcript stored newest first.
#[derive(Debug, Clone, Default)]
pub struct ConversationLog {
    entries: VecDeque<ConversationEntry>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: &DebateTurn, counter: &dyn TokenCounter) {
        self.push_entry(turn, EntryKind::Spoken, counter);
    }

    pub fn push_introduction(&mut self, turn: &DebateTurn, counter: &dyn TokenCounter) {
        self.push_entry(turn, EntryKind::Introduction, counter);
    }

    fn push_entry(&mut self, turn: &DebateTurn, kind: EntryKind, counter: &dyn TokenCounter) {
        self.entries.push_front(ConversationEntry {
            message: turn.message.clone(),
            speaker_label: turn.speaker_label.clone(),
            token_count: counter.count(&format_line(&turn.speaker_label, &turn.message)),
            kind,
        });
    }

    /// Most recent spoken entries, newest first, whose token counts add up to at
    /// most `budget`. Stops at the first entry that would overflow the budget.
    pub fn retrieve(&self, budget: usize) -> Vec<&ConversationEntry> {
        let mut used = 0;
        let mut selected = Vec::new();
        for entry in self.spoken() {
            if used + entry.token_count > budget {
                break;
            }
            used += entry.token_count;
            selected.push(entry);
        }
        selected
    }

    /// The budgeted history as chronological "Speaker: message" lines.
    pub fn render(&self, budget: usize) -> String {
        let recent = self.retrieve(budget);
        if recent.is_empty() {
            return match self.spoken().next() {
                Some(_) => "(earlier conversation omitted)".to_string(),
                None => "(the conversation has not started yet)".to_string(),
            };
        }
        recent
            .iter()
            .rev()
            .map(|e| format_line(&e.speaker_label, &e.message))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Every spoken turn, newest first.
    pub fn transcript(&self) -> Vec<DebateTurn> {
        self.spoken().map(ConversationEntry::turn).collect()
    }

    /// All entries, introductions included, newest first.
    pub fn entries(&self) -> impl Iterator<Item = &ConversationEntry> {
        self.entries.iter()
    }

    fn spoken(&self) -> impl Iterator<Item = &ConversationEntry> {
        self.entries
            .iter()
            .filter(|e| e.kind == EntryKind::Spoken)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn format_line(speaker: &str, message: &str) -> String {
    format!("{}: {}", speaker, message)
}
